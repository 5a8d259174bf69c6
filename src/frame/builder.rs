use std::cmp::min;

use bytes::{BufMut, Bytes};
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};
use crate::frame::fixed_buffer::FixedBuf;
use crate::frame::header::{encoded_topic_len, put_topic, CorrelationId, FrameHeader, PrefixCode, DATA_HEADER_LEN, FIRST_DATA_COUNTER, GENERIC_PREFIX_LEN, MAX_COUNTER};


/// The ordered frames of a single message: exactly one START frame, followed by zero or more
///  DATA frames. Every frame corresponds to exactly one datagram on the wire.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameSequence {
    correlation_id: CorrelationId,
    frames: Vec<Bytes>,
}
impl FrameSequence {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}


/// Splits a message's payload into frames of at most `package_length` bytes.
///
/// The format is self-describing per frame, i.e. there is no frame count: A START frame carries
///  the topic and the start of the payload, subsequent DATA frames carry a 16 bit sequence
///  counter (starting at 2) and the next slice of the payload, and the continuation flag is 0
///  for the last frame of a message and 1 for all others.
///
/// All frames except the last are filled up to exactly `package_length` bytes. The last frame
///  ends with the payload, so the payload slice of every frame is delimited by the datagram.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    package_length: usize,
}

impl FrameBuilder {
    pub fn new(package_length: usize) -> FrameBuilder {
        assert!(package_length > DATA_HEADER_LEN, "package length {} leaves no room for payload in DATA frames", package_length);
        FrameBuilder { package_length }
    }

    /// The number of payload bytes fitting into a DATA frame
    pub fn data_frame_capacity(&self) -> usize {
        self.package_length - DATA_HEADER_LEN
    }

    /// The number of payload bytes fitting into the START frame for a given topic
    pub fn start_frame_capacity(&self, topic: &str) -> TransportResult<usize> {
        let header_len = GENERIC_PREFIX_LEN + encoded_topic_len(topic)?;
        if header_len > self.package_length {
            return Err(TransportError::ValueTooLarge {
                what: "START frame header length",
                value: header_len,
                max: self.package_length,
            });
        }
        Ok(self.package_length - header_len)
    }

    pub fn build(&self, topic: &str, correlation_id: CorrelationId, payload: &[u8]) -> TransportResult<FrameSequence> {
        let start_capacity = self.start_frame_capacity(topic)?;

        if payload.len() <= start_capacity {
            trace!("message {} fits into a single frame: {} bytes", correlation_id, payload.len());

            let mut frame = FixedBuf::new(self.package_length);
            FrameHeader::ser_generic_prefix(&mut frame, correlation_id, PrefixCode::Start, false);
            put_topic(&mut frame, topic);
            frame.put_slice(payload);

            return Ok(FrameSequence {
                correlation_id,
                frames: vec![frame.freeze()],
            });
        }

        // check the counter range up front rather than failing after building most of the frames
        let num_data_frames = (payload.len() - start_capacity).div_ceil(self.data_frame_capacity());
        let last_counter = FIRST_DATA_COUNTER as usize + num_data_frames - 1;
        if last_counter > MAX_COUNTER {
            return Err(TransportError::ValueTooLarge {
                what: "frame counter",
                value: last_counter,
                max: MAX_COUNTER,
            });
        }

        debug!("splitting message {} with {} bytes of payload into {} frames", correlation_id, payload.len(), num_data_frames + 1);

        let mut frames = Vec::with_capacity(num_data_frames + 1);

        let mut start_frame = FixedBuf::new(self.package_length);
        FrameHeader::ser_generic_prefix(&mut start_frame, correlation_id, PrefixCode::Start, true);
        put_topic(&mut start_frame, topic);
        let mut remaining = Self::put_payload_slice(&mut start_frame, payload);
        frames.push(start_frame.freeze());

        let mut counter = FIRST_DATA_COUNTER;
        loop {
            let is_last = remaining.len() <= self.data_frame_capacity();

            let mut data_frame = FixedBuf::new(self.package_length);
            FrameHeader::ser_generic_prefix(&mut data_frame, correlation_id, PrefixCode::Data, !is_last);
            data_frame.put_u16(counter);
            remaining = Self::put_payload_slice(&mut data_frame, remaining);
            frames.push(data_frame.freeze());

            if is_last {
                break;
            }
            counter += 1;
        }

        debug_assert!(remaining.is_empty());
        debug_assert_eq!(frames.len(), num_data_frames + 1);

        Ok(FrameSequence {
            correlation_id,
            frames,
        })
    }

    /// fill the frame's remaining room with payload, returning the rest of the payload
    fn put_payload_slice<'a>(frame: &mut FixedBuf, payload: &'a [u8]) -> &'a [u8] {
        let slice_len = min(frame.remaining_capacity(), payload.len());
        frame.put_slice(&payload[..slice_len]);
        &payload[slice_len..]
    }
}
