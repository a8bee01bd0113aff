//! Image-description `.yml` — the `create` command's input format: a
//! declarative `TARGET/PLUGIN/OFFSET/ADDRESS/VERSION/DCD/IMG[]` document
//! that feeds [`super::Image::build_v2`]/[`super::Image::build_v3`].

use serde::Deserialize;

use super::v3::{Component, ComponentKind, ContainerKind};
use super::{Image, ImageError, Options, Variant};
use crate::dcd::{Dcd, DcdError};

#[derive(thiserror::Error, Debug)]
pub enum DescriptorError {
    #[error("unknown TARGET {0:?}")]
    UnknownTarget(String),
    #[error("unknown IMG TYPE {0:?}")]
    UnknownComponentType(String),
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("could not read {path:?}: {reason}")]
    Io { path: String, reason: String },
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Dcd(#[from] DcdError),
    #[error(transparent)]
    Image(#[from] ImageError),
}

fn parse_hex_or_decimal(s: &str) -> Option<u32> {
    let t = s.trim();
    if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u32::from_str_radix(h, 16).ok();
    }
    t.parse::<u32>().ok()
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DcdFormat {
    #[default]
    Bin,
    Text,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct DcdSpec {
    #[serde(rename = "TYPE", default)]
    pub format: DcdFormat,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct ImgSpec {
    #[serde(rename = "TYPE")]
    pub ty: String,
    #[serde(default)]
    pub addr: Option<String>,
    pub path: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct BuildDescriptor {
    pub target: String,
    #[serde(default)]
    pub plugin: bool,
    #[serde(default)]
    pub offset: Option<String>,
    pub address: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dcd: Option<DcdSpec>,
    #[serde(default)]
    pub img: Vec<ImgSpec>,
}

impl BuildDescriptor {
    pub fn parse(yaml: &str) -> Result<Self, DescriptorError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn target_variant(&self) -> Result<TargetKind, DescriptorError> {
        match self.target.to_ascii_lowercase().as_str() {
            "v2" => Ok(TargetKind::V2(Variant::V2)),
            "v2b" => Ok(TargetKind::V2(Variant::V2b)),
            "v3a" => Ok(TargetKind::V3(ContainerKind::V3a)),
            "v3b" => Ok(TargetKind::V3(ContainerKind::V3b)),
            _ => Err(DescriptorError::UnknownTarget(self.target.clone())),
        }
    }

    fn start_address(&self) -> Result<u32, DescriptorError> {
        parse_hex_or_decimal(&self.address).ok_or(DescriptorError::MissingField("ADDRESS"))
    }

    fn options(&self, variant_hint: Variant) -> Options {
        let mut options = Options::for_variant(variant_hint);
        if let Some(off) = self.offset.as_deref().and_then(parse_hex_or_decimal) {
            options.ivt_offset = off;
        }
        options.plugin = self.plugin;
        options
    }

    fn load_dcd(&self, read_file: &dyn Fn(&str) -> Result<Vec<u8>, DescriptorError>) -> Result<Option<Dcd>, DescriptorError> {
        let Some(spec) = &self.dcd else {
            return Ok(None);
        };
        let bytes = match (&spec.data, &spec.path) {
            (Some(inline), _) => decode_dcd_payload(inline, &spec.format)?,
            (None, Some(path)) => read_file(path)?,
            (None, None) => return Err(DescriptorError::MissingField("DCD.PATH|DATA")),
        };
        let dcd = match spec.format {
            DcdFormat::Bin => Dcd::parse_bin(&bytes)?,
            DcdFormat::Text => Dcd::parse_text(std::str::from_utf8(&bytes).unwrap_or(""))?,
        };
        Ok(Some(dcd))
    }
}

fn decode_dcd_payload(inline: &str, format: &DcdFormat) -> Result<Vec<u8>, DescriptorError> {
    match format {
        DcdFormat::Text => Ok(inline.as_bytes().to_vec()),
        DcdFormat::Bin => {
            let cleaned: String = inline.chars().filter(|c| !c.is_whitespace()).collect();
            cleaned
                .as_bytes()
                .chunks(2)
                .map(|c| {
                    u8::from_str_radix(std::str::from_utf8(c).unwrap_or(""), 16)
                        .map_err(|_| DescriptorError::MissingField("DCD.DATA"))
                })
                .collect()
        }
    }
}

enum TargetKind {
    V2(Variant),
    V3(ContainerKind),
}

fn component_kind(ty: &str) -> Option<ComponentKind> {
    match ty.to_ascii_uppercase().as_str() {
        "SCFW" => Some(ComponentKind::Scfw),
        "SCD" => Some(ComponentKind::Scd),
        "APP-A53" => Some(ComponentKind::AppA53),
        "APP-A72" => Some(ComponentKind::AppA72),
        "CM4-0" => Some(ComponentKind::Cm4_0),
        "CM4-1" => Some(ComponentKind::Cm4_1),
        _ => None,
    }
}

/// Build an [`Image`] from a descriptor, reading referenced files through
/// `read_file` (the descriptor format only names paths; actual file access
/// is the caller's concern, matching the core's "no filesystem reads in the
/// codec" stance).
pub fn build_from_descriptor(
    descriptor: &BuildDescriptor,
    read_file: impl Fn(&str) -> Result<Vec<u8>, DescriptorError>,
) -> Result<Image, DescriptorError> {
    let start_address = descriptor.start_address()?;
    match descriptor.target_variant()? {
        TargetKind::V2(variant) => {
            let options = descriptor.options(variant);
            let dcd = descriptor.load_dcd(&read_file)?;
            let app = match descriptor.img.first() {
                Some(spec) => read_file(&spec.path)?,
                None => Vec::new(),
            };
            Ok(Image::build_v2(variant, start_address, app, dcd, None, &options)?)
        }
        TargetKind::V3(kind) => {
            let options = descriptor.options(Variant::V3a);
            let dcd = descriptor.load_dcd(&read_file)?;
            let mut scfw = None;
            let mut extra = Vec::new();
            for spec in &descriptor.img {
                let comp_kind = component_kind(&spec.ty)
                    .ok_or_else(|| DescriptorError::UnknownComponentType(spec.ty.clone()))?;
                let bytes = read_file(&spec.path)?;
                let addr = spec.addr.as_deref().and_then(parse_hex_or_decimal).unwrap_or(0);
                let component = Component {
                    kind: comp_kind,
                    load_addr: addr,
                    entry_addr: addr,
                    bytes,
                };
                if comp_kind == ComponentKind::Scfw {
                    scfw = Some(component);
                } else {
                    extra.push(component);
                }
            }
            let scfw = scfw.ok_or(DescriptorError::MissingField("IMG[TYPE=SCFW]"))?;
            Ok(Image::build_v3(
                kind,
                start_address,
                scfw,
                dcd,
                extra,
                None,
                &options,
            )?)
        }
    }
}
