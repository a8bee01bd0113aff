//! v3a (v8QXP) / v3b (v8QM) container layout.
//!
//! These generations are development-quality: exact pointer semantics for
//! Cortex-M entry/load addresses, SCD alignment, and hash algorithm
//! selection were not cross-checked against a vendor-produced image, so
//! this module favors a self-consistent, round-trippable layout over
//! byte-exact reproduction of the vendor container-tool output.

use super::bdt::{Bdt, BDT_SIZE};
use super::ivt::{Ivt, IvtV3, IVT_VERSION_V3, IVT_V3_SIZE};
use super::{ImageError, Options};
use crate::dcd::Dcd;
use crate::primitives::{pad_to, PrimitiveError};

/// v3a (v8QXP, single A-core cluster) vs v3b (v8QM, A53 + A72).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    V3a,
    V3b,
}

/// Matches the image-description document's `IMG[].TYPE` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    Scfw,
    Scd,
    AppA53,
    AppA72,
    Cm4_0,
    Cm4_1,
}

impl ComponentKind {
    fn code(self) -> u8 {
        match self {
            ComponentKind::Scfw => 0,
            ComponentKind::Scd => 1,
            ComponentKind::AppA53 => 2,
            ComponentKind::AppA72 => 3,
            ComponentKind::Cm4_0 => 4,
            ComponentKind::Cm4_1 => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self, ImageError> {
        Ok(match code {
            0 => ComponentKind::Scfw,
            1 => ComponentKind::Scd,
            2 => ComponentKind::AppA53,
            3 => ComponentKind::AppA72,
            4 => ComponentKind::Cm4_0,
            5 => ComponentKind::Cm4_1,
            _ => return Err(ImageError::UnrecognizedVariant),
        })
    }

    fn valid_for(self, kind: ContainerKind) -> bool {
        !matches!((self, kind), (ComponentKind::AppA72, ContainerKind::V3a))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    pub kind: ComponentKind,
    pub load_addr: u32,
    pub entry_addr: u32,
    pub bytes: Vec<u8>,
}

const DESCRIPTOR_SIZE: usize = 5 * 4 + 4 + 32; // offset,size,load,entry,flags + kind/reserved + hash
const CONTAINER_HEADER_SIZE: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootImageV3 {
    pub kind: ContainerKind,
    pub start_address: u32,
    pub ivt_offset: u32,
    pub scfw: Component,
    pub scd: Option<Dcd>,
    pub extra: Vec<Component>,
    pub csf: Option<Vec<u8>>,
}

impl BootImageV3 {
    pub fn build(
        kind: ContainerKind,
        start_address: u32,
        scfw: Component,
        scd: Option<Dcd>,
        extra: Vec<Component>,
        csf: Option<Vec<u8>>,
        options: &Options,
    ) -> Result<Self, ImageError> {
        if scfw.kind != ComponentKind::Scfw {
            return Err(ImageError::MissingRequiredSegment("SCFW"));
        }
        for c in &extra {
            if !c.kind.valid_for(kind) {
                return Err(ImageError::UnrecognizedVariant);
            }
        }
        Ok(Self {
            kind,
            start_address,
            ivt_offset: options.ivt_offset,
            scfw,
            scd,
            extra,
            csf,
        })
    }

    fn components(&self) -> Vec<&Component> {
        let mut v = vec![&self.scfw];
        v.extend(self.extra.iter());
        v
    }

    pub(crate) fn layout(&self) -> Result<(IvtV3, IvtV3, Bdt, Vec<(Component, u32)>), ImageError> {
        let scd_bytes = match &self.scd {
            Some(d) => Some(d.export_bin()?),
            None => None,
        };

        let ivt1_off = self.ivt_offset;
        let ivt2_off = ivt1_off + IVT_V3_SIZE as u32;
        let bdt_off = ivt2_off + IVT_V3_SIZE as u32;
        let container_off = bdt_off + BDT_SIZE as u32;
        let components = self.components();
        let descriptors_off = container_off + CONTAINER_HEADER_SIZE as u32;
        let descriptor_table_len = (components.len() * DESCRIPTOR_SIZE) as u32;

        let align = 0x400u32;
        let mut cursor = descriptors_off + descriptor_table_len;
        cursor = cursor.div_ceil(align) * align;
        let scd_off = scd_bytes.as_ref().map(|b| {
            let off = cursor;
            cursor += (b.len() as u32).div_ceil(align) * align;
            off
        });

        let mut placed: Vec<(Component, u32)> = Vec::with_capacity(components.len());
        for c in &components {
            let off = cursor;
            cursor += ((c.bytes.len() as u32).max(1)).div_ceil(align) * align;
            placed.push(((*c).clone(), off));
        }

        let total_before_csf = cursor;
        let csf_off = self.csf.as_ref().map(|_| total_before_csf);
        let total = total_before_csf + self.csf.as_ref().map(|c| c.len() as u32).unwrap_or(0);

        let bdt = Bdt {
            start: self.start_address,
            length: total,
            plugin: 0,
        };

        let self1 = self.start_address + ivt1_off;
        let self2 = self.start_address + ivt2_off;
        let ivt1 = IvtV3 {
            base: Ivt {
                entry: 0,
                dcd: scd_off.map(|o| self.start_address + o).unwrap_or(0),
                boot_data: self.start_address + bdt_off,
                self_ptr: self1,
                csf: 0,
                version: IVT_VERSION_V3,
            },
            next: self2,
        };
        let primary_entry = placed
            .iter()
            .find(|(c, _)| matches!(c.kind, ComponentKind::AppA53 | ComponentKind::AppA72))
            .map(|(c, off)| self.start_address + off + (c.entry_addr.saturating_sub(c.load_addr)))
            .unwrap_or(0);
        let ivt2 = IvtV3 {
            base: Ivt {
                entry: primary_entry,
                dcd: 0,
                boot_data: self.start_address + bdt_off,
                self_ptr: self2,
                csf: csf_off.map(|o| self.start_address + o).unwrap_or(0),
                version: IVT_VERSION_V3,
            },
            next: 0,
        };

        Ok((ivt1, ivt2, bdt, placed))
    }

    pub fn export(&self) -> Result<Vec<u8>, ImageError> {
        let (ivt1, ivt2, bdt, placed) = self.layout()?;
        let scd_bytes = match &self.scd {
            Some(d) => Some(d.export_bin()?),
            None => None,
        };

        let mut out = Vec::with_capacity(bdt.length as usize);
        pad_to(&mut out, self.ivt_offset as usize);
        ivt1.write(&mut out);
        ivt2.write(&mut out);
        bdt.write(&mut out);

        let header_off = out.len();
        out.resize(header_off + CONTAINER_HEADER_SIZE, 0);
        out[header_off] = 0x87; // AHAB-style container tag
        out[header_off + 4] = match self.kind {
            ContainerKind::V3a => 0,
            ContainerKind::V3b => 1,
        };
        out[header_off + 8] = (1 + self.extra.len()) as u8;

        for (c, off) in &placed {
            let mut desc = Vec::with_capacity(DESCRIPTOR_SIZE);
            desc.extend_from_slice(&off.to_le_bytes());
            desc.extend_from_slice(&(c.bytes.len() as u32).to_le_bytes());
            desc.extend_from_slice(&c.load_addr.to_le_bytes());
            desc.extend_from_slice(&c.entry_addr.to_le_bytes());
            desc.extend_from_slice(&0u32.to_le_bytes()); // flags
            desc.push(c.kind.code());
            desc.extend_from_slice(&[0u8; 3]);
            desc.extend_from_slice(&[0u8; 32]); // hash: signing unimplemented
            debug_assert_eq!(desc.len(), DESCRIPTOR_SIZE);
            out.extend_from_slice(&desc);
        }

        let align = 0x400usize;
        if let Some(scd) = &scd_bytes {
            pad_to(&mut out, out.len().div_ceil(align) * align);
            out.extend_from_slice(scd);
        }
        for (c, off) in &placed {
            pad_to(&mut out, *off as usize);
            out.extend_from_slice(&c.bytes);
        }
        if let Some(csf) = &self.csf {
            out.extend_from_slice(csf);
        }
        pad_to(&mut out, bdt.length as usize);

        Ok(out)
    }

    pub fn parse(data: &[u8], kind: ContainerKind, ivt_offset: u32) -> Result<Self, ImageError> {
        let off = ivt_offset as usize;
        let slice = |n: usize, at: usize| -> Result<&[u8], ImageError> {
            data.get(at..at + n).ok_or(ImageError::LengthMismatch {
                expected: at + n,
                got: data.len(),
            })
        };
        let ivt1 = IvtV3::read(slice(IVT_V3_SIZE, off)?).ok_or(ImageError::UnrecognizedVariant)?;
        let ivt2_off = off + IVT_V3_SIZE;
        let ivt2 =
            IvtV3::read(slice(IVT_V3_SIZE, ivt2_off)?).ok_or(ImageError::UnrecognizedVariant)?;
        let bdt_off = ivt2_off + IVT_V3_SIZE;
        let bdt = Bdt::read(slice(BDT_SIZE, bdt_off)?).ok_or(ImageError::LengthMismatch {
            expected: bdt_off + BDT_SIZE,
            got: data.len(),
        })?;
        if ivt1.base.self_ptr != bdt.start + ivt_offset
            || ivt1.next != ivt2.base.self_ptr
            || bdt.length as usize > data.len()
        {
            return Err(ImageError::InvalidPointer(ivt1.base.self_ptr));
        }

        let container_off = bdt_off + BDT_SIZE;
        let header = slice(CONTAINER_HEADER_SIZE, container_off)?;
        let num_images = header[8] as usize;
        let descriptors_off = container_off + CONTAINER_HEADER_SIZE;

        let mut extra = Vec::new();
        let mut scfw = None;
        for i in 0..num_images {
            let d = slice(DESCRIPTOR_SIZE, descriptors_off + i * DESCRIPTOR_SIZE)?;
            let comp_off = read_le(d, 0)?;
            let size = read_le(d, 4)?;
            let load_addr = read_le(d, 8)?;
            let entry_addr = read_le(d, 12)?;
            let comp_kind = ComponentKind::from_code(d[20])?;
            let bytes = slice(size as usize, comp_off as usize)?.to_vec();
            let comp = Component {
                kind: comp_kind,
                load_addr,
                entry_addr,
                bytes,
            };
            if comp_kind == ComponentKind::Scfw {
                scfw = Some(comp);
            } else {
                extra.push(comp);
            }
        }
        let scfw = scfw.ok_or(ImageError::MissingRequiredSegment("SCFW"))?;

        let scd = if ivt1.base.dcd != 0 {
            let scd_off = (ivt1.base.dcd - bdt.start) as usize;
            Some(Dcd::parse_bin(data.get(scd_off..).ok_or(
                ImageError::InvalidPointer(ivt1.base.dcd),
            )?)?)
        } else {
            None
        };
        let csf = if ivt2.base.csf != 0 {
            let csf_off = (ivt2.base.csf - bdt.start) as usize;
            Some(crate::image::csf::capture(data, csf_off))
        } else {
            None
        };

        Ok(Self {
            kind,
            start_address: bdt.start,
            ivt_offset,
            scfw,
            scd,
            extra,
            csf,
        })
    }

    pub fn info(&self) -> Result<String, ImageError> {
        let (ivt1, ivt2, bdt, placed) = self.layout()?;
        let mut s = String::new();
        s.push_str(&format!("kind:       {:?}\n", self.kind));
        s.push_str(&format!("bdt.start:  {:#010x}\n", bdt.start));
        s.push_str(&format!("bdt.length: {:#010x}\n", bdt.length));
        s.push_str(&format!("ivt1.self:  {:#010x}\n", ivt1.base.self_ptr));
        s.push_str(&format!("ivt2.self:  {:#010x}\n", ivt2.base.self_ptr));
        s.push_str(&format!("ivt2.entry: {:#010x}\n", ivt2.base.entry));
        for (c, off) in &placed {
            s.push_str(&format!(
                "component {:?} @ {:#010x} ({} bytes)\n",
                c.kind,
                off,
                c.bytes.len()
            ));
        }
        Ok(s)
    }
}

fn read_le(data: &[u8], off: usize) -> Result<u32, ImageError> {
    crate::primitives::read_u32_le(data, off).map_err(|PrimitiveError::Truncated { wanted, got }| {
        ImageError::LengthMismatch {
            expected: wanted,
            got,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scfw() -> Component {
        Component {
            kind: ComponentKind::Scfw,
            load_addr: 0x2000_0000,
            entry_addr: 0x2000_0000,
            bytes: vec![0x11; 64],
        }
    }

    #[test]
    fn v3a_round_trips() {
        let options = Options {
            ivt_offset: 0x400,
            ..Options::default()
        };
        let app = Component {
            kind: ComponentKind::AppA53,
            load_addr: 0x8000_0000,
            entry_addr: 0x8000_0000,
            bytes: vec![0x22; 128],
        };
        let img = BootImageV3::build(
            ContainerKind::V3a,
            0x0800_0000,
            scfw(),
            None,
            vec![app],
            None,
            &options,
        )
        .unwrap();
        let bytes = img.export().unwrap();
        let parsed = BootImageV3::parse(&bytes, ContainerKind::V3a, 0x400).unwrap();
        assert_eq!(parsed.scfw.bytes, img.scfw.bytes);
        assert_eq!(parsed.extra.len(), 1);
        assert_eq!(parsed.extra[0].bytes, vec![0x22; 128]);
        let bytes2 = parsed.export().unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn v3a_rejects_app_a72() {
        let options = Options::default();
        let app = Component {
            kind: ComponentKind::AppA72,
            load_addr: 0,
            entry_addr: 0,
            bytes: vec![],
        };
        let err = BootImageV3::build(
            ContainerKind::V3a,
            0x1000,
            scfw(),
            None,
            vec![app],
            None,
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::UnrecognizedVariant));
    }

    #[test]
    fn v3_requires_scfw_component_kind() {
        let options = Options::default();
        let not_scfw = Component {
            kind: ComponentKind::Scd,
            load_addr: 0,
            entry_addr: 0,
            bytes: vec![],
        };
        let err = BootImageV3::build(
            ContainerKind::V3a,
            0x1000,
            not_scfw,
            None,
            vec![],
            None,
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::MissingRequiredSegment(_)));
    }
}
