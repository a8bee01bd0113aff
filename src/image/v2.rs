//! v2 (v6/v7, RT) and v2b (v8M) boot-image layout.
//!
//! v2b reuses the same field layout and offset math as v2; the two differ
//! only in their default `ivt_offset`/app alignment, which live in
//! [`super::Options`] rather than in a second code path.

use super::bdt::{Bdt, BDT_SIZE};
use super::csf;
use super::ivt::{Ivt, IVT_VERSION_V2, IVT_V2_SIZE};
use super::{ImageError, Options, Variant};
use crate::dcd::Dcd;
use crate::primitives::pad_to;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageV2 {
    pub variant: Variant,
    pub start_address: u32,
    pub ivt_offset: u32,
    pub app_offset: u32,
    pub app_entry_offset: u32,
    pub plugin: bool,
    pub app: Vec<u8>,
    pub dcd: Option<Dcd>,
    pub csf: Option<Vec<u8>>,
}

pub struct Built {
    pub image: ImageV2,
    pub ivt: Ivt,
    pub bdt: Bdt,
}

impl ImageV2 {
    pub fn build(
        variant: Variant,
        start_address: u32,
        app: Vec<u8>,
        dcd: Option<Dcd>,
        csf: Option<Vec<u8>>,
        options: &Options,
    ) -> Result<Self, ImageError> {
        Ok(Self {
            variant,
            start_address,
            ivt_offset: options.ivt_offset,
            app_offset: options.app_offset,
            app_entry_offset: options.app_entry_offset,
            plugin: options.plugin,
            app,
            dcd,
            csf,
        })
    }

    pub(crate) fn layout(&self) -> Result<(Ivt, Bdt, Vec<u8>, usize), ImageError> {
        let dcd_bytes = match &self.dcd {
            Some(d) => Some(d.export_bin()?),
            None => None,
        };
        let dcd_len = dcd_bytes.as_ref().map(Vec::len).unwrap_or(0);

        let header_end = self.ivt_offset as usize + IVT_V2_SIZE + BDT_SIZE + dcd_len;
        let app_off = core::cmp::max(header_end, self.app_offset as usize);
        let app_len = self.app.len();
        if (app_off as u64) + (app_len as u64) > u32::MAX as u64 {
            return Err(ImageError::AppTooLarge {
                app_len,
                available: (u32::MAX as usize).saturating_sub(app_off),
            });
        }
        let csf_bytes = self.csf.clone().unwrap_or_default();
        let total_len = app_off + app_len + csf_bytes.len();

        let self_ptr = self.start_address + self.ivt_offset;
        let boot_data = self_ptr + IVT_V2_SIZE as u32;
        let dcd_ptr = if dcd_bytes.is_some() {
            self_ptr + IVT_V2_SIZE as u32 + BDT_SIZE as u32
        } else {
            0
        };
        let csf_ptr = if self.csf.is_some() {
            self.start_address + (app_off + app_len) as u32
        } else {
            0
        };
        let entry = self.start_address + app_off as u32 + self.app_entry_offset;

        let ivt = Ivt {
            entry,
            dcd: dcd_ptr,
            boot_data,
            self_ptr,
            csf: csf_ptr,
            version: IVT_VERSION_V2,
        };
        let bdt = Bdt {
            start: self.start_address,
            length: total_len as u32,
            plugin: if self.plugin { 1 } else { 0 },
        };

        Ok((ivt, bdt, dcd_bytes.unwrap_or_default(), app_off))
    }

    pub fn export(&self) -> Result<Vec<u8>, ImageError> {
        let (ivt, bdt, dcd_bytes, app_off) = self.layout()?;

        let mut out = Vec::with_capacity(bdt.length as usize);
        pad_to(&mut out, self.ivt_offset as usize);
        ivt.write(&mut out);
        bdt.write(&mut out);
        out.extend_from_slice(&dcd_bytes);
        pad_to(&mut out, app_off);
        out.extend_from_slice(&self.app);
        if let Some(csf) = &self.csf {
            out.extend_from_slice(csf);
        }
        Ok(out)
    }

    pub fn parse(data: &[u8], variant: Variant, ivt_offset: u32) -> Result<Self, ImageError> {
        let off = ivt_offset as usize;
        let ivt_bytes = data
            .get(off..off + IVT_V2_SIZE)
            .ok_or(ImageError::LengthMismatch {
                expected: off + IVT_V2_SIZE,
                got: data.len(),
            })?;
        let ivt = Ivt::read(ivt_bytes).ok_or(ImageError::UnrecognizedVariant)?;
        let bdt_bytes = data
            .get(off + IVT_V2_SIZE..off + IVT_V2_SIZE + BDT_SIZE)
            .ok_or(ImageError::LengthMismatch {
                expected: off + IVT_V2_SIZE + BDT_SIZE,
                got: data.len(),
            })?;
        let bdt = Bdt::read(bdt_bytes).ok_or(ImageError::LengthMismatch {
            expected: off + IVT_V2_SIZE + BDT_SIZE,
            got: data.len(),
        })?;

        if ivt.self_ptr != bdt.start + ivt_offset {
            return Err(ImageError::InvalidPointer(ivt.self_ptr));
        }
        if bdt.length as usize > data.len() {
            return Err(ImageError::LengthMismatch {
                expected: bdt.length as usize,
                got: data.len(),
            });
        }

        let to_offset = |ptr: u32| -> Result<usize, ImageError> {
            if ptr < bdt.start || ptr >= bdt.start + bdt.length {
                return Err(ImageError::InvalidPointer(ptr));
            }
            Ok((ptr - bdt.start) as usize)
        };

        let dcd = if ivt.dcd != 0 {
            let dcd_off = to_offset(ivt.dcd)?;
            Some(Dcd::parse_bin(&data[dcd_off..])?)
        } else {
            None
        };

        // The app offset is not stored explicitly; it is recovered from the
        // entry pointer, which points app_entry_offset bytes into the app.
        let app_off = if ivt.entry >= bdt.start {
            (ivt.entry - bdt.start) as usize
        } else {
            return Err(ImageError::InvalidPointer(ivt.entry));
        };
        let app_end = if ivt.csf != 0 {
            to_offset(ivt.csf)?
        } else {
            bdt.length as usize
        };
        let app = data
            .get(app_off..app_end.max(app_off))
            .ok_or(ImageError::LengthMismatch {
                expected: app_end,
                got: data.len(),
            })?
            .to_vec();

        let csf = if ivt.csf != 0 {
            let csf_off = to_offset(ivt.csf)?;
            Some(csf::capture(data, csf_off))
        } else {
            None
        };

        Ok(Self {
            variant,
            start_address: bdt.start,
            ivt_offset,
            app_offset: app_off as u32,
            app_entry_offset: 0,
            plugin: bdt.plugin != 0,
            app,
            dcd,
            csf,
        })
    }

    pub fn info(&self) -> Result<String, ImageError> {
        let (ivt, bdt, _dcd_bytes, _app_off) = self.layout()?;
        let mut s = String::new();
        s.push_str(&format!("variant:    {:?}\n", self.variant));
        s.push_str(&format!("bdt.start:  {:#010x}\n", bdt.start));
        s.push_str(&format!("bdt.length: {:#010x}\n", bdt.length));
        s.push_str(&format!("bdt.plugin: {}\n", bdt.plugin));
        s.push_str(&format!("ivt.self:   {:#010x}\n", ivt.self_ptr));
        s.push_str(&format!("ivt.entry:  {:#010x}\n", ivt.entry));
        s.push_str(&format!("ivt.dcd:    {:#010x}\n", ivt.dcd));
        s.push_str(&format!("ivt.csf:    {:#010x}\n", ivt.csf));
        if let Some(dcd) = &self.dcd {
            s.push_str(&format!("dcd commands: {}\n", dcd.commands.len()));
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcd::{Command, Width, WriteEntry, WriteOp};

    fn sample_dcd() -> Dcd {
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
        dcd
    }

    #[test]
    fn scenario_2_build_v2_image() {
        let options = Options::default();
        let img = ImageV2::build(
            Variant::V2,
            0x877f_f000,
            vec![0xaa; 100],
            Some(sample_dcd()),
            None,
            &options,
        )
        .unwrap();
        let bytes = img.export().unwrap();
        assert!(bytes.len() as u64 >= 0x400 + 32 + 12 + 44 + 100);

        let (ivt, bdt, _, _) = img.layout().unwrap();
        assert_eq!(ivt.self_ptr, 0x877f_f400);
        assert_eq!(ivt.dcd, 0x877f_f42c);
        assert_eq!(bdt.start, 0x877f_f000);
        assert_eq!(bdt.plugin, 0);
    }

    #[test]
    fn scenario_3_parse_round_trip() {
        let options = Options::default();
        let img = ImageV2::build(
            Variant::V2,
            0x877f_f000,
            vec![0xaa; 100],
            Some(sample_dcd()),
            None,
            &options,
        )
        .unwrap();
        let bytes = img.export().unwrap();

        let parsed = ImageV2::parse(&bytes, Variant::V2, options.ivt_offset).unwrap();
        let (ivt, bdt, ..) = parsed.layout().unwrap();
        let (ivt0, bdt0, ..) = img.layout().unwrap();
        assert_eq!(ivt.self_ptr, ivt0.self_ptr);
        assert_eq!(ivt.dcd, ivt0.dcd);
        assert_eq!(bdt.start, bdt0.start);
        assert_eq!(bdt.length, bdt0.length);
        let dcd = parsed.dcd.unwrap();
        assert_eq!(dcd.commands.len(), 1);
        match &dcd.commands[0] {
            Command::WriteData { entries, .. } => assert_eq!(entries.len(), 3),
            _ => panic!("expected WriteData"),
        }
    }

    #[test]
    fn export_then_parse_is_byte_exact() {
        let options = Options::default();
        let img = ImageV2::build(Variant::V2, 0x1000_0000, vec![0x11; 64], None, None, &options)
            .unwrap();
        let bytes = img.export().unwrap();
        let parsed = ImageV2::parse(&bytes, Variant::V2, options.ivt_offset).unwrap();
        let bytes2 = parsed.export().unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn zero_length_app_is_valid() {
        let options = Options::default();
        let img =
            ImageV2::build(Variant::V2, 0x1000_0000, Vec::new(), None, None, &options).unwrap();
        let bytes = img.export().unwrap();
        let (ivt, bdt, ..) = img.layout().unwrap();
        assert_eq!(ivt.dcd, 0);
        assert_eq!(ivt.csf, 0);
        assert!(!bytes.is_empty());
    }
}
