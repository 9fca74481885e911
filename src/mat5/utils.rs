//! Low-level byte reading primitives with whole-word byte-swap support.
//!
//! MAT scalars are stored in the file's native byte order; the header
//! negotiates a single swap flag that applies to every multi-byte read for
//! the rest of the file. Reads therefore go through fixed-width buffers
//! that are byte-reversed in place when the flag is set, rather than
//! picking a big- or little-endian decode up front.

use std::io::{self, Read};

use super::error::Result;

/// A primitive scalar that can be read off the wire.
pub(crate) trait WireScalar: Copy {
    const WIDTH: usize;
    /// Reassemble from native-order bytes (already swap-corrected).
    fn from_ne(buf: &[u8]) -> Self;
}

macro_rules! wire_scalar {
    ($ty:ty, $width:expr) => {
        impl WireScalar for $ty {
            const WIDTH: usize = $width;
            fn from_ne(buf: &[u8]) -> Self {
                <$ty>::from_ne_bytes(buf.try_into().expect("scalar width"))
            }
        }
    };
}

wire_scalar!(u8, 1);
wire_scalar!(i16, 2);
wire_scalar!(u16, 2);
wire_scalar!(i32, 4);
wire_scalar!(u32, 4);
wire_scalar!(i64, 8);
wire_scalar!(u64, 8);

impl WireScalar for f32 {
    const WIDTH: usize = 4;
    fn from_ne(buf: &[u8]) -> Self {
        f32::from_bits(u32::from_ne(buf))
    }
}

impl WireScalar for f64 {
    const WIDTH: usize = 8;
    fn from_ne(buf: &[u8]) -> Self {
        f64::from_bits(u64::from_ne(buf))
    }
}

/// Fill `buf` completely, or report a clean end of stream.
///
/// Returns `Ok(true)` when the buffer was filled, `Ok(false)` when the
/// stream was already exhausted before the first byte. A stream that ends
/// mid-buffer is a truncated element and surfaces as `UnexpectedEof`.
pub(crate) fn fill_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(true)
}

/// Read one scalar, honoring the byte-swap flag; `None` at clean EOF.
pub(crate) fn read_scalar<T: WireScalar>(r: &mut impl Read, swap: bool) -> Result<Option<T>> {
    let mut buf = [0u8; 8];
    let buf = &mut buf[..T::WIDTH];
    if !fill_or_eof(r, buf)? {
        return Ok(None);
    }
    if swap {
        buf.reverse();
    }
    Ok(Some(T::from_ne(buf)))
}

/// Number of zero bytes needed to advance `len` to the next boundary.
pub(crate) fn padding_for(len: u32, boundary: u32) -> u8 {
    let rem = len % boundary;
    if rem != 0 {
        (boundary - rem) as u8
    } else {
        0
    }
}
