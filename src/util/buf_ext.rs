use anyhow::anyhow;
use bytes::{Buf, BufMut};
use bytes_varint::{VarIntResult, VarIntSupport, VarIntSupportMut};


/// Reading fixed-width numbers from a [Buf] panics on underflow. Frames and payloads come from
///  the network, so all reads on the receiving side go through these checked variants instead.
///
/// NB: The names are deliberately different from `try_get_*` to avoid ambiguity with methods
///      that newer versions of `bytes` provide on [Buf] itself
macro_rules! checked_get_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self) -> anyhow::Result<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return Err(anyhow!("buffer underflow reading {}: {} bytes remaining", stringify!($ty), self.remaining()));
            }
            Ok(self.$getter())
        }
    }
}


pub trait BufExt: Buf + VarIntSupport {
    checked_get_impl!(checked_get_u8, u8, get_u8);
    checked_get_impl!(checked_get_u16, u16, get_u16);
    checked_get_impl!(checked_get_f64, f64, get_f64);

    fn checked_get_usize_varint(&mut self) -> anyhow::Result<usize> {
        let raw = self.try_get_u64_varint().a()?;
        usize::try_from(raw)
            .map_err(|_| anyhow!("varint {} exceeds the platform's usize", raw))
    }

    fn checked_get_i64_varint(&mut self) -> anyhow::Result<i64> {
        self.try_get_i64_varint().a()
    }

    /// copy exactly `len` bytes out of the buffer
    fn checked_get_vec(&mut self, len: usize) -> anyhow::Result<Vec<u8>> {
        if self.remaining() < len {
            return Err(anyhow!("buffer underflow: expected {} bytes, {} remaining", len, self.remaining()));
        }
        let mut result = vec![0; len];
        self.copy_to_slice(&mut result);
        Ok(result)
    }

    fn checked_get_string(&mut self) -> anyhow::Result<String> {
        let len = self.checked_get_usize_varint()?;
        let raw = self.checked_get_vec(len)?;
        Ok(String::from_utf8(raw)?)
    }
}

pub trait BufMutExt: BufMut + VarIntSupportMut {
    fn put_usize_varint_len(&mut self, v: usize) {
        self.put_u64_varint(v as u64);
    }

    fn put_varint_string(&mut self, s: &str) {
        self.put_usize_varint_len(s.len());
        self.put_slice(s.as_bytes());
    }
}


pub trait VarIntErrorAdapter<T> {
    fn a(self) -> anyhow::Result<T>;
}
impl <T> VarIntErrorAdapter<T> for VarIntResult<T> {
    fn a(self) -> anyhow::Result<T> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(anyhow!("VarInt error: {:?}", e)),
        }
    }
}


impl <T: Buf> BufExt for T {
}

impl <T: BufMut> BufMutExt for T {
}
