//! Code Signing File (CSF).
//!
//! Opaque from this codec's perspective: bytes are preserved verbatim and no
//! signing or verification is attempted (out of scope).

use crate::primitives::SegmentHeader;

/// Capture CSF bytes starting at `offset` in `data`.
///
/// Parse policy: the slice ends at `offset + first header's length` when
/// a well-formed `{tag, length, param}` header is present there, otherwise
/// at end of buffer.
pub fn capture(data: &[u8], offset: usize) -> Vec<u8> {
    if offset >= data.len() {
        return Vec::new();
    }
    let rest = &data[offset..];
    match SegmentHeader::read(rest) {
        Ok(hdr) if hdr.length() > 0 && hdr.length() <= rest.len() => {
            rest[..hdr.length()].to_vec()
        }
        _ => rest.to_vec(),
    }
}
