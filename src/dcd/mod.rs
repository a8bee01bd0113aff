//! Device Configuration Data (DCD) engine.
//!
//! An ordered program of pre-boot hardware initialization commands executed
//! by the SoC ROM before the application image runs. Round-trips between a
//! binary on-disk form, a line-oriented textual form, and this in-memory
//! representation.

pub mod binary;
pub mod text;

use strum::{Display, EnumString, FromRepr};

/// Maximum size of a DCD segment.
pub const MAX_DCD_SIZE: usize = 1768;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DcdError {
    #[error("malformed header at offset {0:#x}")]
    MalformedHeader(usize),
    #[error("unknown command tag {0:#04x}")]
    UnknownCommandTag(u8),
    #[error("DCD segment is {got} bytes, exceeds the {max} byte limit")]
    OversizeSegment { got: usize, max: usize },
    #[error("invalid width code {0:#04x}")]
    InvalidWidth(u8),
    #[error("invalid ops code {0:#04x}")]
    InvalidOps(u8),
    #[error("address {addr:#x} is not aligned to width {width}")]
    BadAlignment { addr: u32, width: u8 },
    #[error("unknown unlock engine code {0:#04x}")]
    UnknownEngine(u8),
    #[error("truncated DCD data: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },
    #[error("malformed DCD text at line {line}: {reason}")]
    MalformedText { line: usize, reason: String },
}

/// Access width, in bytes, of a `WriteData`/`CheckData` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Width {
    U8 = 0x01,
    U16 = 0x02,
    U32 = 0x04,
}

impl Width {
    pub fn bytes(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, DcdError> {
        Self::from_repr(code).ok_or(DcdError::InvalidWidth(code))
    }
}

/// `WriteData` sub-operation, `param` bits 3..4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum WriteOp {
    WriteValue = 0,
    WriteClear = 1,
    ClearBitmask = 2,
    SetBitmask = 3,
}

impl WriteOp {
    pub fn from_code(code: u8) -> Result<Self, DcdError> {
        Self::from_repr(code).ok_or(DcdError::InvalidOps(code))
    }
}

/// `CheckData` sub-operation, `param` bits 3..4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum CheckOp {
    AllClear = 0,
    AllSet = 1,
    AnyClear = 2,
    AnySet = 3,
}

impl CheckOp {
    pub fn from_code(code: u8) -> Result<Self, DcdError> {
        Self::from_repr(code).ok_or(DcdError::InvalidOps(code))
    }
}

/// Closed set of hardware unlock engines.
///
/// Codes are a sequential bijective assignment in declaration order; the
/// upstream vendor tooling that originated this list is not available to
/// this port, so the exact wire values are an implementation choice (see
/// `DESIGN.md`), not a reproduction of a known-good reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum UnlockEngine {
    Any = 0x00,
    Scc = 0x01,
    Rtic = 0x02,
    Sahara = 0x03,
    Csu = 0x04,
    Srtc = 0x05,
    Dcp = 0x06,
    Caam = 0x07,
    Snvs = 0x08,
    Ocotp = 0x09,
    Dtcp = 0x0a,
    Rom = 0x0b,
    Hdcp = 0x0c,
    Sw = 0x0d,
}

impl UnlockEngine {
    pub fn from_code(code: u8) -> Result<Self, DcdError> {
        Self::from_repr(code).ok_or(DcdError::UnknownEngine(code))
    }
}

/// A single (address, value) write entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteEntry {
    pub addr: u32,
    pub value: u32,
}

/// One DCD command: a tagged variant matching the on-wire tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    WriteData {
        op: WriteOp,
        width: Width,
        entries: Vec<WriteEntry>,
    },
    CheckData {
        op: CheckOp,
        width: Width,
        addr: u32,
        mask: u32,
        count: Option<u32>,
    },
    Nop,
    Unlock {
        engine: UnlockEngine,
        values: Vec<u32>,
    },
}

impl Command {
    pub fn tag(&self) -> u8 {
        match self {
            Command::WriteData { .. } => binary::TAG_WRITE_DATA,
            Command::CheckData { .. } => binary::TAG_CHECK_DATA,
            Command::Nop => binary::TAG_NOP,
            Command::Unlock { .. } => binary::TAG_UNLOCK,
        }
    }
}

/// An ordered DCD program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dcd {
    pub version: u8,
    pub commands: Vec<Command>,
}

impl Dcd {
    pub fn new(version: u8) -> Self {
        Self {
            version,
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, cmd: Command) -> &mut Self {
        self.commands.push(cmd);
        self
    }

    pub fn parse_bin(data: &[u8]) -> Result<Self, DcdError> {
        binary::parse(data)
    }

    pub fn export_bin(&self) -> Result<Vec<u8>, DcdError> {
        binary::export(self)
    }

    pub fn parse_text(text: &str) -> Result<Self, DcdError> {
        text::parse(text)
    }

    pub fn export_text(&self) -> String {
        text::export(self)
    }
}
