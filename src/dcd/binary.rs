//! Binary encode/decode for the DCD segment.
//!
//! Leading header `{tag=0xD2, length=total_bytes, param=version}`, followed
//! by sub-records each carrying their own `{tag, length, param}` header.

use bitfield_struct::bitfield;

use super::{CheckOp, Command, Dcd, DcdError, UnlockEngine, Width, WriteEntry, WriteOp};
use crate::primitives::{PrimitiveError, SegmentHeader, HEADER_SIZE};

pub const TAG_DCD: u8 = 0xd2;
pub const TAG_WRITE_DATA: u8 = 0xcc;
pub const TAG_CHECK_DATA: u8 = 0xcf;
pub const TAG_NOP: u8 = 0xc0;
pub const TAG_UNLOCK: u8 = 0xb2;

impl From<PrimitiveError> for DcdError {
    fn from(e: PrimitiveError) -> Self {
        match e {
            PrimitiveError::Truncated { wanted, got } => DcdError::Truncated { wanted, got },
        }
    }
}

/// Bit layout of the `param` byte on `WriteData`/`CheckData` records: access
/// width in bits 0..2, sub-operation code in bits 3..4, unused above that.
#[bitfield(u8)]
struct CmdParam {
    #[bits(3)]
    width: u8,
    #[bits(2)]
    ops: u8,
    #[bits(3)]
    __reserved: u8,
}

fn ops_width_param(ops: u8, width: Width) -> u8 {
    CmdParam::new().with_width(width.bytes()).with_ops(ops).into()
}

fn split_param(param: u8) -> (u8, u8) {
    let p = CmdParam::from(param);
    (p.ops(), p.width())
}

fn read_be_u32(data: &[u8], off: usize) -> Result<u32, DcdError> {
    crate::primitives::read_u32_be(data, off).map_err(DcdError::from)
}

/// Parse a DCD segment from its binary form.
pub fn parse(data: &[u8]) -> Result<Dcd, DcdError> {
    let outer = SegmentHeader::read(data).map_err(|_| DcdError::MalformedHeader(0))?;
    if outer.tag != TAG_DCD {
        return Err(DcdError::MalformedHeader(0));
    }
    let total = outer.length();
    if total > super::MAX_DCD_SIZE {
        return Err(DcdError::OversizeSegment {
            got: total,
            max: super::MAX_DCD_SIZE,
        });
    }
    if data.len() < total {
        return Err(DcdError::Truncated {
            wanted: total,
            got: data.len(),
        });
    }

    let mut commands = Vec::new();
    let mut off = HEADER_SIZE;
    while off < total {
        let hdr =
            SegmentHeader::read(&data[off..]).map_err(|_| DcdError::MalformedHeader(off))?;
        let rec_len = hdr.length();
        if rec_len < HEADER_SIZE || off + rec_len > total {
            return Err(DcdError::MalformedHeader(off));
        }
        let payload = &data[off + HEADER_SIZE..off + rec_len];
        let cmd = match hdr.tag {
            TAG_WRITE_DATA => {
                let (ops, width_code) = split_param(hdr.param);
                let op = WriteOp::from_code(ops)?;
                let width = Width::from_code(width_code)?;
                if payload.len() % 8 != 0 {
                    return Err(DcdError::MalformedHeader(off));
                }
                let mut entries = Vec::with_capacity(payload.len() / 8);
                for chunk in payload.chunks_exact(8) {
                    let addr = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let value = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                    check_alignment(addr, width)?;
                    entries.push(WriteEntry { addr, value });
                }
                Command::WriteData { op, width, entries }
            }
            TAG_CHECK_DATA => {
                let (ops, width_code) = split_param(hdr.param);
                let op = CheckOp::from_code(ops)?;
                let width = Width::from_code(width_code)?;
                if payload.len() != 8 && payload.len() != 12 {
                    return Err(DcdError::MalformedHeader(off));
                }
                let addr = read_be_u32(payload, 0)?;
                let mask = read_be_u32(payload, 4)?;
                let count = if payload.len() == 12 {
                    Some(read_be_u32(payload, 8)?)
                } else {
                    None
                };
                check_alignment(addr, width)?;
                Command::CheckData {
                    op,
                    width,
                    addr,
                    mask,
                    count,
                }
            }
            TAG_NOP => {
                if rec_len != HEADER_SIZE {
                    return Err(DcdError::MalformedHeader(off));
                }
                Command::Nop
            }
            TAG_UNLOCK => {
                let engine = UnlockEngine::from_code(hdr.param)?;
                if payload.len() % 4 != 0 {
                    return Err(DcdError::MalformedHeader(off));
                }
                let values = payload
                    .chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Command::Unlock { engine, values }
            }
            other => return Err(DcdError::UnknownCommandTag(other)),
        };
        commands.push(cmd);
        off += rec_len;
    }

    Ok(Dcd {
        version: outer.param,
        commands,
    })
}

fn check_alignment(addr: u32, width: Width) -> Result<(), DcdError> {
    let w = width.bytes() as u32;
    if addr % w != 0 {
        return Err(DcdError::BadAlignment {
            addr,
            width: width.bytes(),
        });
    }
    Ok(())
}

/// Serialize a DCD segment to its binary form.
pub fn export(dcd: &Dcd) -> Result<Vec<u8>, DcdError> {
    let mut body = Vec::new();
    for cmd in &dcd.commands {
        encode_command(cmd, &mut body)?;
    }
    let total = HEADER_SIZE + body.len();
    if total > super::MAX_DCD_SIZE {
        return Err(DcdError::OversizeSegment {
            got: total,
            max: super::MAX_DCD_SIZE,
        });
    }
    let mut out = Vec::with_capacity(total);
    SegmentHeader::new(TAG_DCD, total as u16, dcd.version).write(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn encode_command(cmd: &Command, out: &mut Vec<u8>) -> Result<(), DcdError> {
    match cmd {
        Command::WriteData { op, width, entries } => {
            for e in entries {
                check_alignment(e.addr, *width)?;
            }
            let payload_len = entries.len() * 8;
            let rec_len = HEADER_SIZE + payload_len;
            let param = ops_width_param(*op as u8, *width);
            SegmentHeader::new(TAG_WRITE_DATA, rec_len as u16, param).write(out);
            for e in entries {
                out.extend_from_slice(&e.addr.to_be_bytes());
                out.extend_from_slice(&e.value.to_be_bytes());
            }
        }
        Command::CheckData {
            op,
            width,
            addr,
            mask,
            count,
        } => {
            check_alignment(*addr, *width)?;
            let payload_len = 8 + if count.is_some() { 4 } else { 0 };
            let rec_len = HEADER_SIZE + payload_len;
            let param = ops_width_param(*op as u8, *width);
            SegmentHeader::new(TAG_CHECK_DATA, rec_len as u16, param).write(out);
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&mask.to_be_bytes());
            if let Some(c) = count {
                out.extend_from_slice(&c.to_be_bytes());
            }
        }
        Command::Nop => {
            SegmentHeader::new(TAG_NOP, HEADER_SIZE as u16, 0).write(out);
        }
        Command::Unlock { engine, values } => {
            let rec_len = HEADER_SIZE + values.len() * 4;
            SegmentHeader::new(TAG_UNLOCK, rec_len as u16, *engine as u8).write(out);
            for v in values {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_byte_packs_ops_above_width() {
        let param = ops_width_param(WriteOp::SetBitmask as u8, Width::U16);
        assert_eq!(param, (3 << 3) | 0x02);
        assert_eq!(split_param(param), (3, 0x02));
    }

    fn sample() -> Dcd {
        let mut dcd = Dcd::new(0x40);
        dcd.push(Command::WriteData {
            op: WriteOp::WriteValue,
            width: Width::U32,
            entries: vec![
                WriteEntry {
                    addr: 0x3034_0004,
                    value: 0x4f40_0005,
                },
                WriteEntry {
                    addr: 0x3039_1000,
                    value: 0x0000_0002,
                },
                WriteEntry {
                    addr: 0x307a_0000,
                    value: 0x0104_0001,
                },
            ],
        });
        dcd.push(Command::CheckData {
            op: CheckOp::AnyClear,
            width: Width::U32,
            addr: 0x3079_00c4,
            mask: 0x0000_0001,
            count: None,
        });
        dcd
    }

    #[test]
    fn scenario_1_exact_length() {
        let dcd = sample();
        let bytes = export(&dcd).unwrap();
        assert_eq!(bytes.len(), 44);
    }

    #[test]
    fn round_trip() {
        let dcd = sample();
        let bytes = export(&dcd).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(back.commands, dcd.commands);
        let bytes2 = export(&back).unwrap();
        assert_eq!(bytes, bytes2);
    }

    fn write_data_of(n: u32) -> Dcd {
        let mut dcd = Dcd::new(0x40);
        let entries = (0..n)
            .map(|i| WriteEntry {
                addr: 0x1000 + i * 4,
                value: i,
            })
            .collect();
        dcd.push(Command::WriteData {
            op: WriteOp::WriteValue,
            width: Width::U32,
            entries,
        });
        dcd
    }

    #[test]
    fn exactly_at_the_size_limit_is_accepted() {
        // 4 (DCD header) + 4 (WriteData header) + 220*8 == 1768.
        let dcd = write_data_of(220);
        let bytes = export(&dcd).unwrap();
        assert_eq!(bytes.len(), super::super::MAX_DCD_SIZE);
    }

    #[test]
    fn one_byte_over_the_limit_is_rejected() {
        let dcd = write_data_of(221);
        let err = export(&dcd).unwrap_err();
        assert!(matches!(err, DcdError::OversizeSegment { .. }));
    }

    #[test]
    fn bad_alignment_rejected() {
        let mut dcd = Dcd::new(0x40);
        dcd.push(Command::WriteData {
            op: WriteOp::WriteValue,
            width: Width::U32,
            entries: vec![WriteEntry {
                addr: 0x1001,
                value: 0,
            }],
        });
        let err = export(&dcd).unwrap_err();
        assert!(matches!(err, DcdError::BadAlignment { .. }));
    }

    #[test]
    fn unknown_tag_rejected() {
        // DCD header + one record with an unrecognized tag.
        let mut data = vec![0xd2, 0x00, 0x08, 0x40];
        data.extend_from_slice(&[0xee, 0x00, 0x04, 0x00]);
        let err = parse(&data).unwrap_err();
        assert_eq!(err, DcdError::UnknownCommandTag(0xee));
    }
}
