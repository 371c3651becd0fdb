//! Coding related traits.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Error indicating that the provided buffer was too small
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("unexpected end of buffer")]
pub struct UnexpectedEnd;

/// Coding result type
pub(crate) type Result<T> = ::std::result::Result<T, UnexpectedEnd>;

/// Infallible encoding and fallible decoding of fixed-width wire values
pub(crate) trait Codec: Sized {
    /// Decode a `Self` from the provided buffer, if the buffer is large enough
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
    /// Append the encoding of `self` to the provided buffer
    fn encode<B: BufMut>(&self, buf: &mut B);
}

macro_rules! network_order {
    ($($ty:ty => $get:ident, $put:ident;)*) => {
        $(impl Codec for $ty {
            fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
                if buf.remaining() < std::mem::size_of::<$ty>() {
                    return Err(UnexpectedEnd);
                }
                Ok(buf.$get())
            }
            fn encode<B: BufMut>(&self, buf: &mut B) {
                buf.$put(*self);
            }
        })*
    };
}

network_order! {
    u8 => get_u8, put_u8;
    u16 => get_u16, put_u16;
    u32 => get_u32, put_u32;
    u64 => get_u64, put_u64;
}

/// Extension trait for reading from buffers
pub(crate) trait BufExt {
    /// Read and decode a value from the buffer
    fn get<T: Codec>(&mut self) -> Result<T>;
    /// Read a byte string preceded by a 16-bit length
    fn get_len16_bytes(&mut self) -> Result<Bytes>;
}

impl<T: Buf> BufExt for T {
    fn get<U: Codec>(&mut self) -> Result<U> {
        U::decode(self)
    }

    fn get_len16_bytes(&mut self) -> Result<Bytes> {
        let len = self.get::<u16>()? as usize;
        if self.remaining() < len {
            return Err(UnexpectedEnd);
        }
        Ok(self.copy_to_bytes(len))
    }
}

/// Extension trait for writing to buffers
pub(crate) trait BufMutExt {
    /// Write and encode a value to the buffer
    fn write<T: Codec>(&mut self, x: T);
    /// Write a byte string preceded by its 16-bit length
    ///
    /// Anything beyond `u16::MAX` bytes is a caller bug and is truncated.
    fn write_len16_bytes(&mut self, x: &[u8]);
}

impl<T: BufMut> BufMutExt for T {
    fn write<U: Codec>(&mut self, x: U) {
        x.encode(self);
    }

    fn write_len16_bytes(&mut self, x: &[u8]) {
        debug_assert!(x.len() <= u16::MAX as usize);
        let len = x.len().min(u16::MAX as usize);
        self.write(len as u16);
        self.put_slice(&x[..len]);
    }
}
