//! Boot-image codec, SDP client, and Smart-Boot orchestrator for the
//! NXP i.MX/Vybrid ROM bootloader.
//!
//! - [`dcd`] — Device Configuration Data program (binary and text forms).
//! - [`image`] — the four IVT-based container generations (v2/v2b/v3a/v3b).
//! - [`sdp`] — the Serial Download Protocol HID client state machine.
//! - [`smartboot`] — `.smx` recipe parsing and the `CMDS` interpreter.
//! - [`hexfile`] — S-record and Intel-HEX import/export for raw payloads.
//! - [`srk`] — Super Root Key table construction from PEM certificates.

pub mod config;
pub mod dcd;
pub mod hexfile;
pub mod image;
pub mod primitives;
pub mod sdp;
pub mod smartboot;
pub mod srk;

pub use config::{ChipTag, Config, TargetSelector};

/// Crate-wide error, composing every module's own error type. Library APIs
/// return their module-local error; this exists for callers (the `imxim`/
/// `imxsd`/`imxsb` binaries) that want one `?`-friendly type across modules.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Dcd(#[from] dcd::DcdError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Descriptor(#[from] image::descriptor::DescriptorError),
    #[error(transparent)]
    Sdp(#[from] sdp::SdpError),
    #[error(transparent)]
    Recipe(#[from] smartboot::RecipeError),
    #[error(transparent)]
    Hex(#[from] hexfile::HexError),
    #[error(transparent)]
    Srk(#[from] srk::SrkError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
