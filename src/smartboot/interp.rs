//! `BODY[].CMDS` text-program interpreter.

use crate::dcd::text::parse_number;
use crate::dcd::Dcd;
use crate::image::{Image, Options, Variant, VariantHint};
use crate::sdp::transport::HidTransport;
use crate::sdp::{Format, SdpClient};

use super::grammar::{
    DataField, DataSegment, EnvPatch, EnvPatchMode, RecipeError, RecipeFile, SegmentType,
};

struct ResolvedSegment {
    bytes: Vec<u8>,
    addr: Option<u32>,
}

fn decode_hex_bytes(s: &str) -> Option<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() || cleaned.len() % 2 != 0 {
        return None;
    }
    cleaned
        .as_bytes()
        .chunks(2)
        .map(|c| u8::from_str_radix(std::str::from_utf8(c).ok()?, 16).ok())
        .collect()
}

fn resolve_addr(raw: &Option<String>, name: &str) -> Result<Option<u32>, RecipeError> {
    match raw {
        None => Ok(None),
        Some(s) => parse_number(s).map(|v| Some(v as u32)).ok_or_else(|| {
            RecipeError::CmdSyntax {
                line: 0,
                reason: format!("segment {name:?} has an unparsable ADDR {s:?}"),
            }
        }),
    }
}

fn resolve_segment(file: &RecipeFile, name: &str) -> Result<ResolvedSegment, RecipeError> {
    let seg = file
        .data
        .get(name)
        .ok_or_else(|| RecipeError::UnknownSegmentRef(name.to_string()))?;
    let addr = resolve_addr(&seg.addr, name)?;

    let mut bytes = if seg.ty == SegmentType::Imx {
        build_imx(file, seg, name)?
    } else {
        match &seg.data {
            Some(DataField::Literal(s)) => {
                decode_hex_bytes(s).ok_or_else(|| RecipeError::CmdSyntax {
                    line: 0,
                    reason: format!("segment {name:?} DATA is not valid hex"),
                })?
            }
            Some(DataField::Composed(_)) => {
                return Err(RecipeError::CmdSyntax {
                    line: 0,
                    reason: format!("segment {name:?} is not of TYPE IMX but has a composed DATA"),
                })
            }
            None => match &seg.file {
                Some(path) => std::fs::read(path).map_err(|e| RecipeError::FileRead {
                    path: path.clone(),
                    reason: e.to_string(),
                })?,
                None => return Err(RecipeError::EmptySegment(name.to_string())),
            },
        }
    };

    if matches!(seg.ty, SegmentType::Imx | SegmentType::Uri) {
        if let Some(patch) = &seg.env_patch {
            apply_env_patch(&mut bytes, patch)?;
        }
    }

    Ok(ResolvedSegment { bytes, addr })
}

/// Locate `ENVPATCH.MARK` inside the embedded image and patch the
/// surrounding NUL-separated `key=value` environment region in place per
/// `ENVPATCH.MODE`. The region's total length never changes: `merge`/
/// `replace` only rewrite bytes already inside it.
fn apply_env_patch(image: &mut [u8], patch: &EnvPatch) -> Result<(), RecipeError> {
    if patch.mode == EnvPatchMode::Disabled {
        return Ok(());
    }

    let mark_pos = find_subslice(image, patch.mark.as_bytes())
        .ok_or_else(|| RecipeError::EnvRegionNotFound(patch.mark.clone()))?;
    let region_start = region_boundary_before(image, mark_pos);
    let region_end = region_boundary_after(image, mark_pos);
    let available = region_end - region_start;

    let mut entries = match patch.mode {
        EnvPatchMode::Disabled => unreachable!(),
        EnvPatchMode::Merge => parse_env_entries(&image[region_start..region_end]),
        EnvPatchMode::Replace => Vec::new(),
    };
    for (key, value) in parse_eval(&patch.eval) {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => entries.push((key, value)),
        }
    }

    let mut blob = Vec::new();
    for (key, value) in &entries {
        blob.extend_from_slice(key.as_bytes());
        blob.push(b'=');
        blob.extend_from_slice(value.as_bytes());
        blob.push(0);
    }
    blob.push(0);

    if blob.len() > available {
        return Err(RecipeError::EnvPatchTooLarge {
            needed: blob.len(),
            available,
        });
    }
    blob.resize(available, 0);
    image[region_start..region_end].copy_from_slice(&blob);
    Ok(())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scan backward from `pos` for the nearest `\0\0` pair, returning the
/// index just past it (or 0 if the mark sits in the image's first region).
fn region_boundary_before(data: &[u8], pos: usize) -> usize {
    let mut i = pos;
    while i >= 2 {
        if data[i - 1] == 0 && data[i - 2] == 0 {
            return i;
        }
        i -= 1;
    }
    0
}

/// Scan forward from `pos` for the region's `\0\0` terminator, then absorb
/// any further contiguous zero padding so the returned region has room for
/// a slightly longer replacement blob.
fn region_boundary_after(data: &[u8], pos: usize) -> usize {
    let mut i = pos;
    while i + 1 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            let mut end = i + 2;
            while end < data.len() && data[end] == 0 {
                end += 1;
            }
            return end;
        }
        i += 1;
    }
    data.len()
}

fn parse_env_entries(region: &[u8]) -> Vec<(String, String)> {
    region
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let text = String::from_utf8_lossy(entry);
            let (k, v) = text.split_once('=')?;
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}

fn parse_eval(eval: &str) -> Vec<(String, String)> {
    eval.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (k, v) = line.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn build_imx(file: &RecipeFile, seg: &DataSegment, name: &str) -> Result<Vec<u8>, RecipeError> {
    let spec = match &seg.data {
        Some(DataField::Composed(spec)) => spec,
        _ => {
            return Err(RecipeError::CmdSyntax {
                line: 0,
                reason: format!("IMX segment {name:?} requires a composed DATA mapping"),
            })
        }
    };
    let start_address = spec
        .staddr
        .as_deref()
        .and_then(parse_number)
        .ok_or_else(|| RecipeError::CmdSyntax {
            line: 0,
            reason: format!("IMX segment {name:?} is missing STADDR"),
        })? as u32;
    let mut options = Options::default();
    if let Some(off) = spec.offset.as_deref().and_then(parse_number) {
        options.ivt_offset = off as u32;
    }

    let dcd = match &spec.dcdseg {
        Some(dcd_name) => Some(Dcd::parse_bin(&resolve_segment(file, dcd_name)?.bytes)?),
        None => None,
    };
    let app = match &spec.appseg {
        Some(app_name) => resolve_segment(file, app_name)?.bytes,
        None => Vec::new(),
    };

    let image = Image::build_v2(Variant::V2, start_address, app, dcd, None, &options)?;
    Ok(image.export()?)
}

enum Instruction {
    WriteRegister {
        bytes: u8,
        address: u32,
        value: u32,
    },
    WriteDcd {
        segment: String,
        address: Option<u32>,
    },
    WriteImage {
        segment: String,
        address: Option<u32>,
    },
    StripDcd,
    Jump {
        target: JumpTarget,
    },
}

enum JumpTarget {
    Address(u32),
    Segment(String),
}

fn tokenize(cmds: &str) -> Result<Vec<Instruction>, RecipeError> {
    let mut out = Vec::new();
    for (i, raw) in cmds.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = i + 1;
        let mut parts = line.split_whitespace();
        let Some(op) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();
        let syntax = |reason: String| RecipeError::CmdSyntax {
            line: line_no,
            reason,
        };

        let instr = match op {
            "WREG" => {
                if args.len() != 3 {
                    return Err(syntax("WREG takes 3 arguments: bytes address value".into()));
                }
                let bytes =
                    parse_number(args[0]).ok_or_else(|| syntax("invalid byte width".into()))? as u8;
                let address =
                    parse_number(args[1]).ok_or_else(|| syntax("invalid address".into()))? as u32;
                let value =
                    parse_number(args[2]).ok_or_else(|| syntax("invalid value".into()))? as u32;
                Instruction::WriteRegister {
                    bytes,
                    address,
                    value,
                }
            }
            "WDCD" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(syntax("WDCD takes a segment name and optional address".into()));
                }
                let address = args
                    .get(1)
                    .map(|a| parse_number(a).ok_or_else(|| syntax("invalid address".into())))
                    .transpose()?
                    .map(|v| v as u32);
                Instruction::WriteDcd {
                    segment: args[0].to_string(),
                    address,
                }
            }
            "WIMG" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(syntax("WIMG takes a segment name and optional address".into()));
                }
                let address = args
                    .get(1)
                    .map(|a| parse_number(a).ok_or_else(|| syntax("invalid address".into())))
                    .transpose()?
                    .map(|v| v as u32);
                Instruction::WriteImage {
                    segment: args[0].to_string(),
                    address,
                }
            }
            "SDCD" => {
                if !args.is_empty() {
                    return Err(syntax("SDCD takes no arguments".into()));
                }
                Instruction::StripDcd
            }
            "JRUN" => {
                if args.len() != 1 {
                    return Err(syntax("JRUN takes exactly one argument".into()));
                }
                let target = match parse_number(args[0]) {
                    Some(v) => JumpTarget::Address(v as u32),
                    None => JumpTarget::Segment(args[0].to_string()),
                };
                Instruction::Jump { target }
            }
            other => return Err(syntax(format!("unknown instruction {other:?}"))),
        };
        out.push(instr);
    }
    Ok(out)
}

/// Execute one named `BODY` recipe against a connected device.
pub fn run_recipe<T: HidTransport>(
    file: &RecipeFile,
    recipe_name: &str,
    client: &mut SdpClient<T>,
) -> Result<(), RecipeError> {
    let recipe = file
        .body
        .iter()
        .find(|r| r.name == recipe_name)
        .ok_or_else(|| RecipeError::CmdSyntax {
            line: 0,
            reason: format!("no recipe named {recipe_name:?}"),
        })?;

    for instr in tokenize(&recipe.cmds)? {
        match instr {
            Instruction::WriteRegister {
                bytes,
                address,
                value,
            } => {
                let format = match bytes {
                    1 => Format::U8,
                    2 => Format::U16,
                    _ => Format::U32,
                };
                client.write_register(address, format, value)?;
            }
            Instruction::WriteDcd { segment, address } => {
                let resolved = resolve_segment(file, &segment)?;
                let addr = address
                    .or(resolved.addr)
                    .ok_or_else(|| RecipeError::MissingAddress(segment.clone()))?;
                client.write_dcd(addr, &resolved.bytes, |_, _| {})?;
            }
            Instruction::WriteImage { segment, address } => {
                let resolved = resolve_segment(file, &segment)?;
                let addr = address
                    .or(resolved.addr)
                    .ok_or_else(|| RecipeError::MissingAddress(segment.clone()))?;
                client.write_file(addr, &resolved.bytes, |_, _| {})?;
            }
            Instruction::StripDcd => {
                client.skip_dcd_header()?;
            }
            Instruction::Jump { target } => {
                let address = match target {
                    JumpTarget::Address(a) => a,
                    JumpTarget::Segment(name) => {
                        let resolved = resolve_segment(file, &name)?;
                        let image = Image::parse(&resolved.bytes, VariantHint::Auto, &Options::default())?;
                        image.ivt_self()?
                    }
                };
                client.jump(address)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::device_table::HidProfile;
    use crate::sdp::transport::MockTransport;
    use std::collections::HashMap;

    fn profile() -> HidProfile {
        HidProfile {
            report1_size: 1025,
            report2_size: 1025,
            report3_size: 5,
            report4_size: 65,
            status_big_endian: true,
        }
    }

    fn file_with(data: HashMap<String, DataSegment>, cmds: &str) -> RecipeFile {
        RecipeFile {
            head: super::super::grammar::Head {
                name: None,
                desc: None,
                chip: "mx7".into(),
            },
            vars: HashMap::new(),
            data,
            body: vec![super::super::grammar::Recipe {
                name: "boot".into(),
                desc: None,
                cmds: cmds.to_string(),
            }],
        }
    }

    #[test]
    fn runs_wreg_then_wdcd_then_jrun() {
        let mut data = HashMap::new();
        data.insert(
            "dcd".to_string(),
            DataSegment {
                ty: SegmentType::Dcd,
                desc: None,
                addr: None,
                data: Some(DataField::Literal("d2000008400c00000040".to_string())),
                file: None,
                env_patch: None,
            },
        );
        let file = file_with(
            data,
            "WREG 4 0x00900000 0x55555555\nWDCD dcd 0x00910000\nJRUN 0x00910000\n",
        );

        let mut mock = MockTransport::new();
        for _ in 0..3 {
            mock.push_response(3, vec![0, 0, 0, 0]);
            mock.push_response(4, vec![0x12, 0x8a, 0x8a, 0x12]);
        }
        let mut client = SdpClient::open(mock, profile());
        run_recipe(&file, "boot", &mut client).unwrap();

        let written = &client.transport.written;
        let opcodes: Vec<u16> = written
            .iter()
            .filter(|(id, _)| *id == 1)
            .map(|(_, buf)| u16::from_be_bytes([buf[0], buf[1]]))
            .collect();
        assert_eq!(
            opcodes,
            vec![
                crate::sdp::Opcode::WriteRegister as u16,
                crate::sdp::Opcode::WriteDcd as u16,
                crate::sdp::Opcode::JumpAddress as u16,
            ]
        );
    }

    #[test]
    fn unknown_segment_reference_is_an_error() {
        let file = file_with(HashMap::new(), "WDCD missing 0x1000\n");
        let mut mock = MockTransport::new();
        mock.push_response(3, vec![0, 0, 0, 0]);
        let mut client = SdpClient::open(mock, profile());
        let err = run_recipe(&file, "boot", &mut client).unwrap_err();
        assert!(matches!(err, RecipeError::UnknownSegmentRef(name) if name == "missing"));
    }

    fn env_region_image() -> Vec<u8> {
        let mut image = vec![0xAAu8; 14];
        image.extend_from_slice(&[0, 0]);
        image.extend_from_slice(b"bootdelay=3\0othervar=1\0");
        image.push(0);
        image.extend(std::iter::repeat(0u8).take(8));
        image.extend_from_slice(&[0xBBu8; 8]);
        image
    }

    fn patch(mode: EnvPatchMode, eval: &str) -> EnvPatch {
        EnvPatch {
            mode,
            mark: "bootdelay=".to_string(),
            eval: eval.to_string(),
        }
    }

    #[test]
    fn env_patch_disabled_is_a_no_op() {
        let mut image = env_region_image();
        let before = image.clone();
        apply_env_patch(&mut image, &patch(EnvPatchMode::Disabled, "bootdelay = 0\n")).unwrap();
        assert_eq!(image, before);
    }

    #[test]
    fn env_patch_merge_upserts_and_keeps_existing_keys() {
        let mut image = env_region_image();
        let len_before = image.len();
        apply_env_patch(
            &mut image,
            &patch(EnvPatchMode::Merge, "bootdelay = 0\nnewvar = hi\n"),
        )
        .unwrap();
        assert_eq!(image.len(), len_before);

        let region_start = 16;
        let region_end = region_start + 24 + 8;
        let entries = parse_env_entries(&image[region_start..region_end]);
        assert!(entries.contains(&("bootdelay".to_string(), "0".to_string())));
        assert!(entries.contains(&("othervar".to_string(), "1".to_string())));
        assert!(entries.contains(&("newvar".to_string(), "hi".to_string())));
        assert_eq!(&image[..14], &[0xAAu8; 14]);
        assert_eq!(&image[14..16], &[0, 0]);
        assert_eq!(&image[image.len() - 8..], &[0xBBu8; 8]);
    }

    #[test]
    fn env_patch_replace_discards_existing_keys() {
        let mut image = env_region_image();
        apply_env_patch(&mut image, &patch(EnvPatchMode::Replace, "bootdelay = 2\n")).unwrap();

        let region_start = 16;
        let region_end = region_start + 24 + 8;
        let entries = parse_env_entries(&image[region_start..region_end]);
        assert_eq!(entries, vec![("bootdelay".to_string(), "2".to_string())]);
    }

    #[test]
    fn env_patch_missing_mark_is_an_error() {
        let mut image = vec![0u8; 16];
        let err = apply_env_patch(&mut image, &patch(EnvPatchMode::Merge, "x = 1\n")).unwrap_err();
        assert!(matches!(err, RecipeError::EnvRegionNotFound(m) if m == "bootdelay="));
    }

    #[test]
    fn resolve_segment_applies_env_patch_on_a_uri_segment() {
        let mut hex_image = vec![0xAAu8; 14];
        hex_image.extend_from_slice(&[0, 0]);
        hex_image.extend_from_slice(b"bootdelay=3\0\0");
        let hex: String = hex_image.iter().map(|b| format!("{b:02X}")).collect();

        let mut data = HashMap::new();
        data.insert(
            "env".to_string(),
            DataSegment {
                ty: SegmentType::Uri,
                desc: None,
                addr: None,
                data: Some(DataField::Literal(hex)),
                file: None,
                env_patch: Some(patch(EnvPatchMode::Replace, "bootdelay = 0\n")),
            },
        );
        let file = file_with(data, "JRUN 0x0\n");

        let resolved = resolve_segment(&file, "env").unwrap();
        let entries = parse_env_entries(&resolved.bytes[16..]);
        assert_eq!(entries, vec![("bootdelay".to_string(), "0".to_string())]);
        assert_eq!(resolved.bytes.len(), hex_image.len());
    }

    #[test]
    fn env_patch_too_large_is_an_error() {
        let mut image = b"bootdelay=1\0\0".to_vec();
        let err = apply_env_patch(
            &mut image,
            &patch(
                EnvPatchMode::Replace,
                "bootdelay = this_value_is_far_too_long_to_fit\n",
            ),
        )
        .unwrap_err();
        assert!(matches!(err, RecipeError::EnvPatchTooLarge { .. }));
    }
}
