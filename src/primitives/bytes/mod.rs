#![forbid(unsafe_code)]
//! Little-endian encoders, alignment helpers, and a bounds-checked cursor.

pub mod le {
    //! Fixed-width little-endian integers, as used by the container format.

    /// Appends a u16.
    pub fn put_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a u32.
    pub fn put_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a u64.
    pub fn put_u64(out: &mut Vec<u8>, v: u64) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes a u32 into the first four bytes of `dst`.
    pub fn write_u32(dst: &mut [u8], v: u32) {
        dst[..4].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads a u32 from the first four bytes of `src`, if present.
    pub fn read_u32(src: &[u8]) -> Option<u32> {
        let head: [u8; 4] = src.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }
}

pub mod align {
    //! Padding rules of the oldest attribute message layout.

    /// Rounds `len` up to the next multiple of eight.
    pub const fn pad8(len: usize) -> usize {
        (len + 7) & !7
    }

    /// Appends zero bytes until `out.len() - start` is a multiple of eight.
    pub fn zero_pad8(out: &mut Vec<u8>, start: usize) {
        let written = out.len() - start;
        out.resize(start + pad8(written), 0);
    }
}

pub mod buf {
    //! A slice-backed cursor whose reads fail instead of panicking on truncation.

    use core::fmt;

    use crate::types::{AttrError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
        what: &'static str,
    }

    impl<'a> Cursor<'a> {
        /// Creates a cursor; `what` names the structure in truncation errors.
        pub fn new(buf: &'a [u8], what: &'static str) -> Self {
            Self { buf, off: 0, what }
        }

        /// Takes the next `n` bytes, failing with `Corruption` when short.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or(AttrError::Corruption(self.what))?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a little-endian u16.
        pub fn u16_le(&mut self) -> Result<u16> {
            let raw = self.take(2)?;
            Ok(u16::from_le_bytes([raw[0], raw[1]]))
        }

        /// Reads a little-endian u32.
        pub fn u32_le(&mut self) -> Result<u32> {
            let raw = self.take(4)?;
            Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        }

        /// Reads a little-endian u64.
        pub fn u64_le(&mut self) -> Result<u64> {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(self.take(8)?);
            Ok(u64::from_le_bytes(raw))
        }

        /// Skips `n` bytes.
        pub fn skip(&mut self, n: usize) -> Result<()> {
            self.take(n).map(|_| ())
        }

        /// Everything not yet consumed.
        pub fn rest(&mut self) -> &'a [u8] {
            let slice = &self.buf[self.off.min(self.buf.len())..];
            self.off = self.buf.len();
            slice
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("what", &self.what)
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
