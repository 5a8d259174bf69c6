use std::fmt::{Debug, Display, Formatter};

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::util::buf_ext::BufExt;
use crate::util::safe_converter::PrecheckedCast;

/// Marks a datagram as a frame of this protocol
pub const MAGIC: [u8; 4] = *b"DGRM";

pub const CONTINUATION_LAST: u8 = 0;
pub const CONTINUATION_MORE: u8 = 1;

/// Magic marker, correlation id, prefix code and continuation flag - the same for every frame
pub const GENERIC_PREFIX_LEN: usize = MAGIC.len() + CorrelationId::SERIALIZED_LEN + 1 + 1;

pub const COUNTER_LEN: usize = size_of::<u16>();

/// Header length of a DATA frame, i.e. the generic prefix followed by the sequence counter
pub const DATA_HEADER_LEN: usize = GENERIC_PREFIX_LEN + COUNTER_LEN;

/// The START frame implicitly has counter 1, so the first DATA frame has counter 2
pub const FIRST_DATA_COUNTER: u16 = 2;

pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;
pub const MAX_COUNTER: usize = u16::MAX as usize;

pub const TOPIC_TERMINATOR: u8 = 0;


#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PrefixCode {
    Start = 1,
    Data = 2,
}


/// Ties all frames of a message together. It is generated randomly for each message.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CorrelationId(pub [u8; 16]);
impl CorrelationId {
    pub const SERIALIZED_LEN: usize = 16;

    pub fn random() -> CorrelationId {
        CorrelationId(Uuid::new_v4().into_bytes())
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<CorrelationId> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("buffer underflow reading correlation id");
        }
        let mut raw = [0u8; 16];
        buf.copy_to_slice(&mut raw);
        Ok(CorrelationId(raw))
    }
}
impl Debug for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}
impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}


/// The number of bytes a topic occupies in a START frame, failing if the topic is too long for
///  the 16 bit length field
pub fn encoded_topic_len(topic: &str) -> TransportResult<usize> {
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TransportError::ValueTooLarge {
            what: "topic length",
            value: topic.len(),
            max: MAX_TOPIC_LEN,
        });
    }

    if topic.is_empty() {
        Ok(size_of::<u16>())
    }
    else {
        Ok(size_of::<u16>() + topic.len() + 1)
    }
}

/// NB: callers must check the topic's length using [encoded_topic_len] first
pub fn put_topic(buf: &mut impl BufMut, topic: &str) {
    buf.put_u16(topic.len().prechecked_cast());
    if !topic.is_empty() {
        buf.put_slice(topic.as_bytes());
        buf.put_u8(TOPIC_TERMINATOR);
    }
}

pub fn try_get_topic(buf: &mut impl Buf) -> anyhow::Result<String> {
    let len = buf.checked_get_u16()? as usize;
    if len == 0 {
        return Ok(String::new());
    }

    let raw = buf.checked_get_vec(len)?;
    let terminator = buf.checked_get_u8()?;
    if terminator != TOPIC_TERMINATOR {
        bail!("topic is not terminated: expected {}, was {}", TOPIC_TERMINATOR, terminator);
    }
    Ok(String::from_utf8(raw)?)
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameKind {
    Start { topic: String },
    Data { counter: u16 },
}

/// The parsed header of a received frame. The frame's payload slice is everything after the
///  header.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub correlation_id: CorrelationId,
    pub more_follows: bool,
    pub kind: FrameKind,
}
impl FrameHeader {
    pub fn ser_generic_prefix(buf: &mut impl BufMut, correlation_id: CorrelationId, prefix_code: PrefixCode, more_follows: bool) {
        buf.put_slice(&MAGIC);
        correlation_id.ser(buf);
        buf.put_u8(prefix_code.into());
        buf.put_u8(if more_follows { CONTINUATION_MORE } else { CONTINUATION_LAST });
    }

    /// Parse a frame header, leaving the buffer positioned at the start of the payload slice
    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<FrameHeader> {
        if buf.remaining() < MAGIC.len() {
            bail!("datagram is too short for a frame: {} bytes", buf.remaining());
        }
        let mut magic = [0u8; MAGIC.len()];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            bail!("not a frame: invalid magic marker {:?}", magic);
        }

        let correlation_id = CorrelationId::try_deser(buf)?;

        let raw_prefix_code = buf.checked_get_u8()?;
        let prefix_code = PrefixCode::try_from(raw_prefix_code)
            .map_err(|_| anyhow!("invalid prefix code {}", raw_prefix_code))?;

        let more_follows = match buf.checked_get_u8()? {
            CONTINUATION_LAST => false,
            CONTINUATION_MORE => true,
            n => bail!("invalid continuation flag {}", n),
        };

        let kind = match prefix_code {
            PrefixCode::Start => FrameKind::Start { topic: try_get_topic(buf)? },
            PrefixCode::Data => {
                let counter = buf.checked_get_u16()?;
                if counter < FIRST_DATA_COUNTER {
                    bail!("invalid DATA frame counter {}", counter);
                }
                FrameKind::Data { counter }
            }
        };

        Ok(FrameHeader {
            correlation_id,
            more_follows,
            kind,
        })
    }
}
