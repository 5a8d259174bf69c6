use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::bail;
use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::frame::header::{CorrelationId, FrameHeader, FrameKind, FIRST_DATA_COUNTER};


/// A message's topic and payload, after all of its frames were received
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AssembledMessage {
    pub sender: SocketAddr,
    pub correlation_id: CorrelationId,
    pub topic: String,
    pub payload: Bytes,
}


/// The frames received so far for a message that is not complete yet.
struct PartialMessage {
    first_received: Instant,
    /// topic and payload slice of the START frame, once it arrived
    start: Option<(String, Bytes)>,
    data: BTreeMap<u16, Bytes>,
    /// the counter of the DATA frame with continuation flag 0, once it arrived
    last_counter: Option<u16>,
    payload_len: usize,
}
impl PartialMessage {
    fn new(now: Instant) -> PartialMessage {
        PartialMessage {
            first_received: now,
            start: None,
            data: Default::default(),
            last_counter: None,
            payload_len: 0,
        }
    }

    fn is_complete(&self) -> bool {
        match (&self.start, self.last_counter) {
            (Some(_), Some(last_counter)) => {
                // keys are unique and never exceed the last counter, so counting them is enough
                self.data.len() == (last_counter - FIRST_DATA_COUNTER + 1) as usize
            }
            _ => false,
        }
    }

    fn assemble(self, sender: SocketAddr, correlation_id: CorrelationId) -> Option<AssembledMessage> {
        let (topic, start_payload) = self.start?;

        let mut payload = BytesMut::with_capacity(self.payload_len);
        payload.extend_from_slice(&start_payload);
        for slice in self.data.values() {
            payload.extend_from_slice(slice);
        }

        Some(AssembledMessage {
            sender,
            correlation_id,
            topic,
            payload: payload.freeze(),
        })
    }
}


/// The receiving side's inverse of the [crate::frame::builder::FrameBuilder]: It collects frames
///  per sender and correlation id until a message is complete.
///
/// UDP gives no guarantees regarding order or delivery, so frames are accepted in any order, and
///  partial messages are discarded when they are not completed within a configurable time window.
///  There is no retransmission, so a message with a lost frame is lost altogether.
pub struct Reassembler {
    timeout: Duration,
    max_pending_messages: usize,
    max_message_size: usize,
    pending: FxHashMap<(SocketAddr, CorrelationId), PartialMessage>,
}

impl Reassembler {
    pub fn new(timeout: Duration, max_pending_messages: usize, max_message_size: usize) -> Reassembler {
        Reassembler {
            timeout,
            max_pending_messages,
            max_message_size,
            pending: Default::default(),
        }
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Process a single received datagram, returning the completed message if this was the last
    ///  missing frame.
    ///
    /// NB: An error means that the datagram is not a valid frame. Frames that are valid but do not
    ///      fit the rest of their message cause the partial message to be discarded, which is
    ///      logged rather than returned as an error
    pub fn on_frame(&mut self, sender: SocketAddr, mut datagram: Bytes, now: Instant) -> anyhow::Result<Option<AssembledMessage>> {
        let header = FrameHeader::try_deser(&mut datagram)?;
        // after parsing the header, the rest of the datagram is the payload slice
        let payload_slice = datagram;

        if payload_slice.len() > self.max_message_size {
            bail!("frame payload of {} bytes exceeds max message size of {}", payload_slice.len(), self.max_message_size);
        }

        trace!("received frame from {:?} for message {}: {:?}", sender, header.correlation_id, header.kind);

        // fast path: a single-frame message needs no buffering
        if let FrameKind::Start { topic } = &header.kind {
            if !header.more_follows {
                if self.pending.remove(&(sender, header.correlation_id)).is_some() {
                    warn!("received single-frame START for message {} from {:?} that already has buffered frames - discarding those", header.correlation_id, sender);
                }
                return Ok(Some(AssembledMessage {
                    sender,
                    correlation_id: header.correlation_id,
                    topic: topic.clone(),
                    payload: payload_slice,
                }));
            }
        }

        let key = (sender, header.correlation_id);
        if !self.pending.contains_key(&key) {
            self.make_room(now);
        }
        let partial = self.pending.entry(key)
            .or_insert_with(|| PartialMessage::new(now));

        let slice_len = payload_slice.len();
        let is_new = match header.kind {
            FrameKind::Start { topic } => {
                if partial.start.is_some() {
                    false
                }
                else {
                    partial.start = Some((topic, payload_slice));
                    true
                }
            }
            FrameKind::Data { counter } => {
                if let Some(last_counter) = partial.last_counter {
                    // the final counter must be unique, and no frame may follow it
                    let is_consistent = if header.more_follows {
                        counter < last_counter
                    }
                    else {
                        counter == last_counter
                    };
                    if !is_consistent {
                        warn!("inconsistent DATA frame {} for message {} from {:?} (last frame is {}) - discarding the message", counter, header.correlation_id, sender, last_counter);
                        self.pending.remove(&key);
                        return Ok(None);
                    }
                }
                else if !header.more_follows && partial.data.contains_key(&counter) {
                    warn!("final DATA frame {} for message {} from {:?} was received before as a non-final frame - discarding the message", counter, header.correlation_id, sender);
                    self.pending.remove(&key);
                    return Ok(None);
                }
                if !header.more_follows {
                    let highest_received = partial.data.last_key_value().map(|(&c, _)| c);
                    if let Some(highest) = highest_received {
                        if highest > counter {
                            warn!("final DATA frame {} for message {} from {:?} is below the already received frame {} - discarding the message", counter, header.correlation_id, sender, highest);
                            self.pending.remove(&key);
                            return Ok(None);
                        }
                    }
                    partial.last_counter = Some(counter);
                }

                if partial.data.contains_key(&counter) {
                    false
                }
                else {
                    partial.data.insert(counter, payload_slice);
                    true
                }
            }
        };

        if !is_new {
            debug!("duplicate frame for message {} from {:?} - ignoring", header.correlation_id, sender);
            return Ok(None);
        }

        partial.payload_len += slice_len;
        if partial.payload_len > self.max_message_size {
            warn!("message {} from {:?} exceeds max message size of {} bytes - discarding", header.correlation_id, sender, self.max_message_size);
            self.pending.remove(&key);
            return Ok(None);
        }

        if !partial.is_complete() {
            return Ok(None);
        }

        trace!("message {} from {:?} is complete", header.correlation_id, sender);
        Ok(self.pending.remove(&key)
            .and_then(|partial| partial.assemble(sender, header.correlation_id)))
    }

    /// Discard all partial messages whose first frame arrived more than the configured timeout
    ///  ago, returning the number of discarded messages
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.pending.len();
        self.pending.retain(|(sender, correlation_id), partial| {
            let keep = now.saturating_duration_since(partial.first_received) < timeout;
            if !keep {
                debug!("incomplete message {} from {:?} expired with {} frames received", correlation_id, sender, partial.data.len() + partial.start.iter().count());
            }
            keep
        });
        before - self.pending.len()
    }

    /// evict the oldest partial message if the limit is reached
    fn make_room(&mut self, now: Instant) {
        if self.pending.len() < self.max_pending_messages {
            return;
        }
        self.expire(now);
        if self.pending.len() < self.max_pending_messages {
            return;
        }

        let oldest = self.pending.iter()
            .min_by_key(|(_, partial)| partial.first_received)
            .map(|(&key, _)| key);
        if let Some(key) = oldest {
            warn!("too many incomplete messages - discarding message {} from {:?}", key.1, key.0);
            self.pending.remove(&key);
        }
    }
}
