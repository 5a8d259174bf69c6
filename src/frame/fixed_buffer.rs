//! A fixed-capacity write buffer for assembling a single frame.
//!
//! Its salient points are:
//!
//! * backed by a pre-allocated buffer of exactly the configured package length
//! * implements `BufMut` to fit into the `bytes` ecosystem
//! * can never grow: `BufMut::put_*` panics when a write exceeds the remaining capacity, so
//!    a frame exceeding the package length is a bug that surfaces in tests rather than an
//!    oversized datagram on the wire
//!

use std::fmt::{Debug, Formatter};
use bytes::buf::UninitSlice;
use bytes::Bytes;

#[derive(Eq)]
pub struct FixedBuf {
    buf: Vec<u8>,
    len: usize,
}
impl FixedBuf {
    /// create a new FixedBuf instance with the given buffer capacity
    pub fn new(capacity: usize) -> FixedBuf {
        FixedBuf {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Hand the written part of the buffer over as an immutable, cheaply clonable [Bytes]
    ///  instance - frames are shared between all send jobs of a message
    pub fn freeze(mut self) -> Bytes {
        self.buf.truncate(self.len);
        Bytes::from(self.buf)
    }

    /// This is a convenience function for test code. It derives the buffer's capacity from the
    ///  slice used for initialization, which is a shortcut not intended for production usage.
    #[cfg(test)]
    pub fn from_slice(data: &[u8]) -> FixedBuf {
        let mut result = FixedBuf::new(data.len());
        bytes::BufMut::put_slice(&mut result, data);
        result
    }
}

impl PartialEq for FixedBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for FixedBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<[u8]> for FixedBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for FixedBuf {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}
