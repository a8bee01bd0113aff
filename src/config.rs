//! Process-wide configuration: how a CLI front-end's `--target` option and
//! verbosity flag flow down into the library.

pub use crate::sdp::device_table::ChipTag;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unrecognized chip symbol {0:?}")]
    UnknownChip(String),
    #[error("malformed VID:PID literal {0:?}")]
    MalformedUsbId(String),
}

/// The `--target` option's value: a chip symbol, a raw `VID:PID` literal, or
/// left to auto-detection (dynamic USB discovery itself is out of scope,
/// but *selecting among already-known chips* is in scope).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSelector {
    Auto,
    ByChip(ChipTag),
    ByUsbId(u16, u16),
}

impl std::str::FromStr for TargetSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(TargetSelector::Auto);
        }
        if let Some((vid, pid)) = s.split_once(':') {
            let parse_hex = |t: &str| u16::from_str_radix(t.trim_start_matches("0x"), 16);
            return match (parse_hex(vid), parse_hex(pid)) {
                (Ok(vid), Ok(pid)) => Ok(TargetSelector::ByUsbId(vid, pid)),
                _ => Err(ConfigError::MalformedUsbId(s.to_string())),
            };
        }
        chip_from_symbol(s)
            .map(TargetSelector::ByChip)
            .ok_or_else(|| ConfigError::UnknownChip(s.to_string()))
    }
}

fn chip_from_symbol(s: &str) -> Option<ChipTag> {
    match s.to_ascii_lowercase().as_str() {
        "vybrid" | "vf610" => Some(ChipTag::Vybrid),
        "mx6" | "imx6" => Some(ChipTag::Mx6),
        "mx7" | "imx7" => Some(ChipTag::Mx7),
        "mx8mq" | "imx8mq" => Some(ChipTag::Mx8mq),
        "mx8qxp" | "imx8qxp" => Some(ChipTag::Mx8qxp),
        "mx8qm" | "imx8qm" => Some(ChipTag::Mx8qm),
        "rt1050" => Some(ChipTag::RT1050),
        _ => None,
    }
}

/// Verbosity requested on the command line, translated into a `log`
/// filter by the CLI front-ends (library code never reads this directly).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    #[default]
    Quiet,
    Info,
    Debug,
    Trace,
}

/// Process-wide SDP options threaded through the CLI front-ends.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub target: TargetSelector,
    pub debug_level: DebugLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetSelector::Auto,
            debug_level: DebugLevel::Quiet,
        }
    }
}
