//! Boot-image codec.
//!
//! Four container generations (v2, v2b, v3a, v3b) share the IVT/BDT/DCD/CSF
//! sub-segments defined in `ivt`/`bdt`/`csf` but differ in overall layout;
//! `v2`/`v2b` share [`v2::ImageV2`], `v3a`/`v3b` share [`v3::BootImageV3`].

pub mod bdt;
pub mod csf;
pub mod descriptor;
pub mod ivt;
pub mod v2;
pub mod v3;

use crate::dcd::{Dcd, DcdError};
use ivt::IVT_TAG;
use v2::ImageV2;
use v3::{BootImageV3, Component, ContainerKind};

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("unrecognized container variant")]
    UnrecognizedVariant,
    #[error("pointer {0:#010x} does not fall within the image's address range")]
    InvalidPointer(u32),
    #[error("length mismatch: expected at least {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("application payload of {app_len} bytes does not fit in {available} available bytes")]
    AppTooLarge { app_len: usize, available: usize },
    #[error("missing required segment: {0}")]
    MissingRequiredSegment(&'static str),
    #[error(transparent)]
    Dcd(#[from] DcdError),
}

/// Which of the four container generations an image uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    V2,
    V2b,
    V3a,
    V3b,
}

/// Either an explicit container generation, or a request to infer it by
/// scanning the buffer (the `hint` parameter).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VariantHint {
    #[default]
    Auto,
    Explicit(Variant),
}

/// Codec options for `build`/`parse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Offset of the IVT from the image base. Default 0x400 for v2/v3,
    /// overridden to a smaller 0x100 by [`Options::for_variant`] for v2b.
    pub ivt_offset: u32,
    /// Candidate-offset scan step used when `VariantHint::Auto` (default 256).
    pub step: usize,
    /// Absolute offset (from image base) where the application payload
    /// begins. Default 0x1000.
    pub app_offset: u32,
    /// Variant-specific offset from `app_offset` to the entry point.
    pub app_entry_offset: u32,
    pub plugin: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ivt_offset: 0x400,
            step: 256,
            app_offset: 0x1000,
            app_entry_offset: 0,
            plugin: false,
        }
    }
}

impl Options {
    /// Defaults appropriate to a given variant (v2b uses a smaller IVT
    /// offset and a larger app alignment than the v2/v3 default).
    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::V2b => Self {
                ivt_offset: 0x100,
                app_offset: 0x2000,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

const SCAN_OFFSETS: [usize; 3] = [0x0, 0x400, 0x1000];

/// A boot image: either a v2/v2b container or a v3a/v3b container.
#[derive(Clone, Debug)]
pub enum Image {
    V2(ImageV2),
    V3(BootImageV3),
}

impl Image {
    /// Build a v2/v2b image from its constituents.
    pub fn build_v2(
        variant: Variant,
        start_address: u32,
        app: Vec<u8>,
        dcd: Option<Dcd>,
        csf: Option<Vec<u8>>,
        options: &Options,
    ) -> Result<Self, ImageError> {
        assert!(matches!(variant, Variant::V2 | Variant::V2b));
        Ok(Image::V2(ImageV2::build(
            variant,
            start_address,
            app,
            dcd,
            csf,
            options,
        )?))
    }

    /// Build a v3a/v3b image from its constituents.
    #[allow(clippy::too_many_arguments)]
    pub fn build_v3(
        kind: ContainerKind,
        start_address: u32,
        scfw: Component,
        scd: Option<Dcd>,
        extra: Vec<Component>,
        csf: Option<Vec<u8>>,
        options: &Options,
    ) -> Result<Self, ImageError> {
        Ok(Image::V3(BootImageV3::build(
            kind,
            start_address,
            scfw,
            scd,
            extra,
            csf,
            options,
        )?))
    }

    /// Parse a boot image from bytes, optionally hinting the variant.
    pub fn parse(data: &[u8], hint: VariantHint, options: &Options) -> Result<Self, ImageError> {
        match hint {
            VariantHint::Explicit(variant) => Self::parse_as(data, variant, options),
            VariantHint::Auto => Self::parse_auto(data, options),
        }
    }

    fn parse_as(data: &[u8], variant: Variant, options: &Options) -> Result<Self, ImageError> {
        match variant {
            Variant::V2 | Variant::V2b => {
                Ok(Image::V2(ImageV2::parse(data, variant, options.ivt_offset)?))
            }
            Variant::V3a => Ok(Image::V3(BootImageV3::parse(
                data,
                ContainerKind::V3a,
                options.ivt_offset,
            )?)),
            Variant::V3b => Ok(Image::V3(BootImageV3::parse(
                data,
                ContainerKind::V3b,
                options.ivt_offset,
            )?)),
        }
    }

    fn parse_auto(data: &[u8], options: &Options) -> Result<Self, ImageError> {
        let mut candidates: Vec<usize> = vec![options.ivt_offset as usize];
        candidates.extend(SCAN_OFFSETS);
        for off in candidates {
            if let Some(image) = Self::try_offset(data, off, options) {
                return Ok(image);
            }
        }
        let step = options.step.max(1);
        let mut off = 0;
        while off + 4 <= data.len() {
            if let Some(image) = Self::try_offset(data, off, options) {
                return Ok(image);
            }
            off += step;
        }
        Err(ImageError::UnrecognizedVariant)
    }

    fn try_offset(data: &[u8], off: usize, options: &Options) -> Option<Self> {
        if data.get(off) != Some(&IVT_TAG) {
            return None;
        }
        for variant in [Variant::V2, Variant::V3a, Variant::V3b] {
            let opts = Options {
                ivt_offset: off as u32,
                ..*options
            };
            if let Ok(image) = Self::parse_as(data, variant, &opts) {
                return Some(image);
            }
        }
        None
    }

    /// Serialize to the byte-exact on-disk form.
    pub fn export(&self) -> Result<Vec<u8>, ImageError> {
        match self {
            Image::V2(v2) => v2.export(),
            Image::V3(v3) => v3.export(),
        }
    }

    /// A human-readable report, a pure function of the parsed value —
    /// presentation concerns stop here; the CLI front-ends own how this
    /// text is displayed.
    pub fn info(&self) -> Result<String, ImageError> {
        match self {
            Image::V2(v2) => v2.info(),
            Image::V3(v3) => v3.info(),
        }
    }

    pub fn start_address(&self) -> u32 {
        match self {
            Image::V2(v2) => v2.start_address,
            Image::V3(v3) => v3.start_address,
        }
    }

    /// The IVT `self` pointer — the address SDP jump-and-run targets after
    /// `write_image`.
    pub fn ivt_self(&self) -> Result<u32, ImageError> {
        match self {
            Image::V2(v2) => {
                let (ivt, ..) = v2.layout()?;
                Ok(ivt.self_ptr)
            }
            Image::V3(v3) => {
                let (ivt1, ..) = v3.layout()?;
                Ok(ivt1.base.self_ptr)
            }
        }
    }

    /// The IVT `dcd` pointer; 0 if no DCD segment is present.
    pub fn ivt_dcd(&self) -> Result<u32, ImageError> {
        match self {
            Image::V2(v2) => {
                let (ivt, ..) = v2.layout()?;
                Ok(ivt.dcd)
            }
            Image::V3(v3) => {
                let (ivt1, ..) = v3.layout()?;
                Ok(ivt1.base.dcd)
            }
        }
    }

    /// The IVT `csf` pointer; 0 if no CSF segment is present.
    pub fn ivt_csf(&self) -> Result<u32, ImageError> {
        match self {
            Image::V2(v2) => {
                let (ivt, ..) = v2.layout()?;
                Ok(ivt.csf)
            }
            Image::V3(v3) => {
                let (ivt1, ..) = v3.layout()?;
                Ok(ivt1.base.csf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_dcd_and_csf_pointers_are_null() {
        let options = Options::default();
        let image =
            Image::build_v2(Variant::V2, 0x1000_0000, vec![0u8; 16], None, None, &options)
                .unwrap();
        let bytes = image.export().unwrap();
        let parsed = Image::parse(
            &bytes,
            VariantHint::Explicit(Variant::V2),
            &options,
        )
        .unwrap();
        match parsed {
            Image::V2(v2) => {
                assert!(v2.dcd.is_none());
                assert!(v2.csf.is_none());
            }
            _ => panic!("expected v2"),
        }
    }

    #[test]
    fn auto_detection_finds_a_non_default_ivt_offset() {
        let options = Options {
            ivt_offset: 0x1000,
            ..Options::default()
        };
        let image =
            Image::build_v2(Variant::V2, 0x9000_0000, vec![0xaa; 8], None, None, &options)
                .unwrap();
        let bytes = image.export().unwrap();
        let found = Image::parse(&bytes, VariantHint::Auto, &Options::default()).unwrap();
        assert_eq!(found.start_address(), 0x9000_0000);
    }

    #[test]
    fn v2b_defaults_differ_from_v2_v3() {
        let v2b = Options::for_variant(Variant::V2b);
        assert_eq!(v2b.ivt_offset, 0x100);
        assert_eq!(v2b.app_offset, 0x2000);
        assert_ne!(v2b.ivt_offset, Options::default().ivt_offset);

        let v2 = Options::for_variant(Variant::V2);
        assert_eq!(v2, Options::default());
    }

    #[test]
    fn v2b_round_trips_with_its_own_defaults() {
        let options = Options::for_variant(Variant::V2b);
        let image =
            Image::build_v2(Variant::V2b, 0x2000_0000, vec![0x55; 32], None, None, &options)
                .unwrap();
        let bytes = image.export().unwrap();
        let parsed = Image::parse(&bytes, VariantHint::Explicit(Variant::V2b), &options).unwrap();
        assert_eq!(parsed.start_address(), 0x2000_0000);
    }
}
