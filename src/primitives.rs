//! Shared binary primitives.
//!
//! Every multi-byte integer that crosses the wire or lands on disk carries an
//! explicit byte order in its type: `zerocopy`'s generic byte-order integers
//! (`U16`/`U32` parameterized over `LittleEndian`/`BigEndian`) rather than the
//! host's native order. Most of the container is little-endian; the DCD/CSF
//! tag-length-param convention inherited from the ROM is big-endian.

use core::fmt;
use zerocopy::byteorder::{BigEndian, LittleEndian, U16, U32};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub type Le16 = U16<LittleEndian>;
pub type Le32 = U32<LittleEndian>;
pub type Be16 = U16<BigEndian>;
pub type Be32 = U32<BigEndian>;

/// The 4-byte `{tag, length, param}` header shared by the IVT, the DCD
/// segment and every DCD command record.
///
/// `length` is the header-inclusive byte count of the record it introduces.
#[derive(Immutable, IntoBytes, FromBytes, KnownLayout, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct SegmentHeader {
    pub tag: u8,
    pub length: Be16,
    pub param: u8,
}

pub const HEADER_SIZE: usize = core::mem::size_of::<SegmentHeader>();

impl SegmentHeader {
    pub fn new(tag: u8, length: u16, param: u8) -> Self {
        Self {
            tag,
            length: Be16::new(length),
            param,
        }
    }

    pub fn length(&self) -> usize {
        self.length.get() as usize
    }

    pub fn read(data: &[u8]) -> Result<Self, PrimitiveError> {
        if data.len() < HEADER_SIZE {
            return Err(PrimitiveError::Truncated {
                wanted: HEADER_SIZE,
                got: data.len(),
            });
        }
        let tag = data[0];
        let length = u16::from_be_bytes([data[1], data[2]]);
        let param = data[3];
        Ok(Self::new(tag, length, param))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        out.extend_from_slice(&self.length.get().to_be_bytes());
        out.push(self.param);
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("truncated input: wanted at least {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },
}

pub fn read_u32_le(data: &[u8], off: usize) -> Result<u32, PrimitiveError> {
    let b = data
        .get(off..off + 4)
        .ok_or(PrimitiveError::Truncated {
            wanted: off + 4,
            got: data.len(),
        })?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_u32_be(data: &[u8], off: usize) -> Result<u32, PrimitiveError> {
    let b = data
        .get(off..off + 4)
        .ok_or(PrimitiveError::Truncated {
            wanted: off + 4,
            got: data.len(),
        })?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn write_u32_le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u32_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Zero-pad `buf` up to `len` bytes.
pub fn pad_to(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0x00);
    }
}

pub struct HexU32(pub u32);

impl fmt::Display for HexU32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = SegmentHeader::new(0xd2, 44, 0x40);
        let mut out = Vec::new();
        h.write(&mut out);
        assert_eq!(out, vec![0xd2, 0x00, 0x2c, 0x40]);
        let back = SegmentHeader::read(&out).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.length(), 44);
    }

    #[test]
    fn header_truncated() {
        let err = SegmentHeader::read(&[0xd2, 0x00]).unwrap_err();
        assert_eq!(
            err,
            PrimitiveError::Truncated {
                wanted: HEADER_SIZE,
                got: 2
            }
        );
    }
}
