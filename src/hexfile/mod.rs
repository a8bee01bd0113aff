//! S-record and Intel-HEX parsing/emission.
//!
//! Both formats describe a set of addressed byte ranges; a file whose
//! ranges don't form one contiguous block is rejected unless the caller
//! passes `allow_gaps`, in which case the gaps are filled with `0xFF`.

use std::fmt::Write as _;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("checksum mismatch on line {line}")]
    ChecksumMismatch { line: usize },
    #[error("unknown record type {0:#04x}")]
    UnknownRecordType(u8),
    #[error("non-contiguous address ranges: {lowest:#010x}..{highest:#010x} is not fully covered; pass allow_gaps to fill with 0xFF")]
    LengthMismatch { lowest: u32, highest: u32 },
    #[error("file contains no data records")]
    Empty,
}

/// The parsed result of a hex record file: a base address, the assembled
/// byte payload, and an optional entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexImage {
    pub base_addr: u32,
    pub bytes: Vec<u8>,
    pub entry: Option<u32>,
}

struct Segment {
    addr: u32,
    data: Vec<u8>,
}

fn assemble(mut segments: Vec<Segment>, entry: Option<u32>, allow_gaps: bool) -> Result<HexImage, HexError> {
    if segments.is_empty() {
        return Err(HexError::Empty);
    }
    segments.sort_by_key(|s| s.addr);
    let lowest = segments[0].addr;
    let highest = segments
        .iter()
        .map(|s| s.addr + s.data.len() as u32)
        .fold(0u32, u32::max);

    let mut covered = vec![false; (highest - lowest) as usize];
    let mut bytes = vec![0xffu8; (highest - lowest) as usize];
    for seg in &segments {
        let start = (seg.addr - lowest) as usize;
        for (i, b) in seg.data.iter().enumerate() {
            bytes[start + i] = *b;
            covered[start + i] = true;
        }
    }
    if !allow_gaps && covered.iter().any(|c| !c) {
        return Err(HexError::LengthMismatch { lowest, highest });
    }

    Ok(HexImage {
        base_addr: lowest,
        bytes,
        entry,
    })
}

fn hex_byte(s: &str, line: usize) -> Result<u8, HexError> {
    u8::from_str_radix(s, 16).map_err(|_| HexError::MalformedRecord {
        line,
        reason: format!("invalid hex byte {s:?}"),
    })
}

fn decode_bytes(s: &str, line: usize) -> Result<Vec<u8>, HexError> {
    if s.len() % 2 != 0 {
        return Err(HexError::MalformedRecord {
            line,
            reason: "odd number of hex digits".into(),
        });
    }
    let chars: Vec<char> = s.chars().collect();
    chars
        .chunks(2)
        .map(|c| {
            let pair: String = c.iter().collect();
            hex_byte(&pair, line)
        })
        .collect()
}

/// Parse an S-record (Motorola SREC) file. Accepts S1/S2/S3 data records
/// and S7/S8/S9 start-address records; S0 header/S5/S6 count records are
/// skipped.
pub fn parse_srecord(text: &str, allow_gaps: bool) -> Result<HexImage, HexError> {
    let mut segments = Vec::new();
    let mut entry = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = lineno + 1;
        let rest = line.strip_prefix('S').ok_or(HexError::MalformedRecord {
            line: line_no,
            reason: "missing 'S' prefix".into(),
        })?;
        let mut chars = rest.chars();
        let rec_type = chars.next().ok_or(HexError::MalformedRecord {
            line: line_no,
            reason: "missing record type".into(),
        })?;
        let body = &rest[1..];
        if body.len() < 2 {
            return Err(HexError::MalformedRecord {
                line: line_no,
                reason: "record too short".into(),
            });
        }
        let byte_count = hex_byte(&body[0..2], line_no)? as usize;
        let payload = &body[2..];
        let expected_hex_len = byte_count * 2;
        if payload.len() != expected_hex_len {
            return Err(HexError::MalformedRecord {
                line: line_no,
                reason: "byte count does not match record length".into(),
            });
        }
        let all_bytes = decode_bytes(payload, line_no)?;
        let (checksum_input, checksum) = all_bytes.split_at(all_bytes.len() - 1);
        let checksum = checksum[0];
        let mut sum = byte_count as u32;
        for b in checksum_input {
            sum += *b as u32;
        }
        if (!(sum as u8)) != checksum {
            return Err(HexError::ChecksumMismatch { line: line_no });
        }

        match rec_type {
            '0' => continue,
            '1' | '2' | '3' => {
                let addr_len = match rec_type {
                    '1' => 2,
                    '2' => 3,
                    '3' => 4,
                    _ => unreachable!(),
                };
                let addr_bytes = &checksum_input[..addr_len];
                let addr = addr_bytes
                    .iter()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32);
                let data = checksum_input[addr_len..].to_vec();
                segments.push(Segment { addr, data });
            }
            '5' | '6' => continue,
            '7' | '8' | '9' => {
                let addr_len = match rec_type {
                    '7' => 4,
                    '8' => 3,
                    '9' => 2,
                    _ => unreachable!(),
                };
                let addr_bytes = &checksum_input[..addr_len];
                let addr = addr_bytes
                    .iter()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32);
                entry = Some(addr);
            }
            other => {
                return Err(HexError::MalformedRecord {
                    line: line_no,
                    reason: format!("unknown S-record type S{other}"),
                })
            }
        }
    }

    assemble(segments, entry, allow_gaps)
}

/// Emit a tight S3 (32-bit address) data stream plus an S7 termination
/// record carrying `image.entry` (or 0 if absent).
pub fn emit_srecord(image: &HexImage) -> String {
    const CHUNK: usize = 32;
    let mut out = String::new();
    let _ = writeln!(out, "S0030000FC");
    for (i, chunk) in image.bytes.chunks(CHUNK).enumerate() {
        let addr = image.base_addr + (i * CHUNK) as u32;
        write_srecord_line(&mut out, '3', 4, addr, chunk);
    }
    write_srecord_line(&mut out, '7', 4, image.entry.unwrap_or(0), &[]);
    out
}

fn write_srecord_line(out: &mut String, rec_type: char, addr_len: usize, addr: u32, data: &[u8]) {
    let addr_bytes = addr.to_be_bytes();
    let addr_bytes = &addr_bytes[4 - addr_len..];
    let byte_count = addr_len + data.len() + 1;
    let mut sum = byte_count as u32;
    for b in addr_bytes.iter().chain(data.iter()) {
        sum += *b as u32;
    }
    let checksum = !(sum as u8);

    let _ = write!(out, "S{rec_type}{byte_count:02X}");
    for b in addr_bytes {
        let _ = write!(out, "{b:02X}");
    }
    for b in data {
        let _ = write!(out, "{b:02X}");
    }
    let _ = writeln!(out, "{checksum:02X}");
}

const IHEX_DATA: u8 = 0x00;
const IHEX_EOF: u8 = 0x01;
const IHEX_EXT_SEGMENT: u8 = 0x02;
const IHEX_START_SEGMENT: u8 = 0x03;
const IHEX_EXT_LINEAR: u8 = 0x04;
const IHEX_START_LINEAR: u8 = 0x05;

/// Parse an Intel-HEX file.
pub fn parse_ihex(text: &str, allow_gaps: bool) -> Result<HexImage, HexError> {
    let mut segments = Vec::new();
    let mut entry = None;
    let mut upper_linear = 0u32;
    let mut upper_segment = 0u32;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = lineno + 1;
        let body = line.strip_prefix(':').ok_or(HexError::MalformedRecord {
            line: line_no,
            reason: "missing ':' prefix".into(),
        })?;
        let bytes = decode_bytes(body, line_no)?;
        if bytes.len() < 5 {
            return Err(HexError::MalformedRecord {
                line: line_no,
                reason: "record too short".into(),
            });
        }
        let (rest, checksum) = bytes.split_at(bytes.len() - 1);
        let checksum = checksum[0];
        let sum: u32 = rest.iter().map(|b| *b as u32).sum();
        if ((!sum).wrapping_add(1)) as u8 != checksum {
            return Err(HexError::ChecksumMismatch { line: line_no });
        }
        let byte_count = rest[0] as usize;
        let address = u16::from_be_bytes([rest[1], rest[2]]) as u32;
        let record_type = rest[3];
        let data = &rest[4..];
        if data.len() != byte_count {
            return Err(HexError::MalformedRecord {
                line: line_no,
                reason: "byte count does not match record length".into(),
            });
        }

        match record_type {
            IHEX_DATA => {
                let base = upper_linear.wrapping_add(upper_segment);
                segments.push(Segment {
                    addr: base + address,
                    data: data.to_vec(),
                });
            }
            IHEX_EOF => break,
            IHEX_EXT_SEGMENT => {
                let seg = u16::from_be_bytes([data[0], data[1]]) as u32;
                upper_segment = seg << 4;
            }
            IHEX_START_SEGMENT => {
                let cs = u16::from_be_bytes([data[0], data[1]]) as u32;
                let ip = u16::from_be_bytes([data[2], data[3]]) as u32;
                entry = Some((cs << 4) + ip);
            }
            IHEX_EXT_LINEAR => {
                let hi = u16::from_be_bytes([data[0], data[1]]) as u32;
                upper_linear = hi << 16;
            }
            IHEX_START_LINEAR => {
                entry = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            other => return Err(HexError::UnknownRecordType(other)),
        }
    }

    assemble(segments, entry, allow_gaps)
}

/// Emit Intel-HEX: a 04 extended-linear-address record per 64 KiB bank,
/// 16-byte data records, a 05 start-linear-address record if `entry` is
/// set, and a terminating 01 EOF record.
pub fn emit_ihex(image: &HexImage) -> String {
    const CHUNK: usize = 16;
    let mut out = String::new();
    let mut current_bank = u32::MAX;

    for (i, chunk) in image.bytes.chunks(CHUNK).enumerate() {
        let addr = image.base_addr + (i * CHUNK) as u32;
        let bank = addr >> 16;
        if bank != current_bank {
            write_ihex_line(&mut out, IHEX_EXT_LINEAR, 0, &(bank as u16).to_be_bytes());
            current_bank = bank;
        }
        write_ihex_line(&mut out, IHEX_DATA, (addr & 0xffff) as u16, chunk);
    }
    if let Some(entry) = image.entry {
        write_ihex_line(&mut out, IHEX_START_LINEAR, 0, &entry.to_be_bytes());
    }
    write_ihex_line(&mut out, IHEX_EOF, 0, &[]);
    out
}

fn write_ihex_line(out: &mut String, record_type: u8, address: u16, data: &[u8]) {
    let addr_bytes = address.to_be_bytes();
    let byte_count = data.len() as u8;
    let mut sum: u32 = byte_count as u32 + addr_bytes[0] as u32 + addr_bytes[1] as u32 + record_type as u32;
    for b in data {
        sum += *b as u32;
    }
    let checksum = ((!sum).wrapping_add(1)) as u8;

    let _ = write!(out, ":{byte_count:02X}{:02X}{:02X}{record_type:02X}", addr_bytes[0], addr_bytes[1]);
    for b in data {
        let _ = write!(out, "{b:02X}");
    }
    let _ = writeln!(out, "{checksum:02X}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihex_round_trip_recovers_payload() {
        let image = HexImage {
            base_addr: 0x0800_0000,
            bytes: (0..200u32).map(|i| (i % 256) as u8).collect(),
            entry: Some(0x0800_0000),
        };
        let text = emit_ihex(&image);
        let parsed = parse_ihex(&text, false).unwrap();
        assert_eq!(parsed.base_addr, image.base_addr);
        assert_eq!(parsed.bytes, image.bytes);
        assert_eq!(parsed.entry, image.entry);
    }

    #[test]
    fn srecord_round_trip_recovers_payload() {
        let image = HexImage {
            base_addr: 0x1000_0000,
            bytes: vec![0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04, 0x05],
            entry: Some(0x1000_0000),
        };
        let text = emit_srecord(&image);
        let parsed = parse_srecord(&text, false).unwrap();
        assert_eq!(parsed.base_addr, image.base_addr);
        assert_eq!(parsed.bytes, image.bytes);
        assert_eq!(parsed.entry, image.entry);
    }

    #[test]
    fn ihex_rejects_bad_checksum() {
        let bad = ":02000000AAAA01\n";
        let err = parse_ihex(bad, false).unwrap_err();
        assert!(matches!(err, HexError::ChecksumMismatch { .. }));
    }

    #[test]
    fn non_contiguous_ranges_are_rejected_without_allow_gaps() {
        // Two 8-byte records separated by an unwritten 8-byte gap.
        let sparse = format!(
            "{}\n{}",
            write_line(0, &[0xaa; 8]),
            write_line(24, &[0xbb; 8])
        );
        let err = parse_ihex(&sparse, false).unwrap_err();
        assert!(matches!(err, HexError::LengthMismatch { .. }));
        let ok = parse_ihex(&sparse, true).unwrap();
        assert_eq!(ok.bytes.len(), 32);
        assert_eq!(&ok.bytes[8..24], &[0xff; 16][..]);
    }

    fn write_line(addr: u16, data: &[u8]) -> String {
        let mut out = String::new();
        write_ihex_line(&mut out, IHEX_DATA, addr, data);
        out.trim_end().to_string()
    }
}
