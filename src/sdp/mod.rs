//! Serial Download Protocol (SDP) client
//!
//! Drives the ROM's USB-HID command channel: register read/write, DCD/file/
//! CSF upload, composite image write, and jump-and-run. Transport is
//! abstracted behind [`transport::HidTransport`]; this module never
//! enumerates USB devices itself.

pub mod device_table;
pub mod transport;

use crate::image::{Image, ImageError};
use crate::primitives::{Be16, Be32};
use device_table::HidProfile;
use std::time::Duration;
use transport::{HidTransport, TransportError};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[derive(thiserror::Error, Debug)]
pub enum SdpError {
    #[error("transport timed out")]
    TransportTimeout,
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("device not found")]
    DeviceNotFound,
    #[error("device busy")]
    DeviceBusy,
    #[error("address {addr:#x} is not aligned to format width {width}")]
    BadAlignment { addr: u32, width: u8 },
    #[error("unexpected report id {0}")]
    UnexpectedReport(u8),
    #[error("HAB status error: {0:#010x}")]
    HabStatusError(u32),
    #[error("device reported error code {0:#010x}")]
    DeviceError(u32),
    #[error("device handle is in the Error state; call close() or reset()")]
    Sticky,
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl From<TransportError> for SdpError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => SdpError::TransportTimeout,
            TransportError::Io(s) => SdpError::TransportError(s),
        }
    }
}

/// Read/Write Register access width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    U8,
    U16,
    U32,
}

impl Format {
    pub fn bits(self) -> u32 {
        match self {
            Format::U8 => 8,
            Format::U16 => 16,
            Format::U32 => 32,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// On-wire encoding: the hex-style `{8,16,32} -> {0x08,0x10,0x20}`
    /// convention.
    fn wire_code(self) -> u8 {
        match self {
            Format::U8 => 0x08,
            Format::U16 => 0x10,
            Format::U32 => 0x20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    ReadRegister = 0x0101,
    WriteRegister = 0x0202,
    WriteFile = 0x0404,
    ReadStatus = 0x0505,
    WriteDcd = 0x0606,
    WriteCsf = 0x0a0a,
    SkipDcdHeader = 0x0b0b,
    JumpAddress = 0x0f0f,
}

/// The 16-byte Report-1 command block.
#[derive(Immutable, IntoBytes, FromBytes, KnownLayout, Clone, Copy, Debug)]
#[repr(C)]
struct CommandReport {
    opcode: Be16,
    address: Be32,
    format: u8,
    data_count: Be32,
    data_value: Be32,
    reserved: u8,
}

const COMMAND_SIZE: usize = core::mem::size_of::<CommandReport>();

/// Completion code for a successful Write Register/File/DCD/CSF.
pub const SUCCESS_COMPLETION: u32 = 0x128a_8a12;

const REPORT_ID_COMMAND: u8 = 1;
const REPORT_ID_DATA: u8 = 2;
const REPORT_ID_INTERIM: u8 = 3;
const REPORT_ID_FINAL: u8 = 4;

/// Per-device state. `Error` is sticky until `close()`/`reset()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Opened,
    Idle,
    Error,
}

pub struct SdpClient<T: HidTransport> {
    transport: T,
    profile: HidProfile,
    state: State,
    timeout: Duration,
}

impl<T: HidTransport> SdpClient<T> {
    pub fn open(transport: T, profile: HidProfile) -> Self {
        Self {
            transport,
            profile,
            state: State::Idle,
            timeout: Duration::from_millis(1000),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Borrow the underlying transport, e.g. to inspect what a test's
    /// [`transport::MockTransport`] recorded.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn close(&mut self) {
        self.state = State::Disconnected;
    }

    pub fn reset(&mut self) {
        if self.state == State::Error {
            self.state = State::Idle;
        }
    }

    fn guard(&self) -> Result<(), SdpError> {
        if self.state == State::Error {
            return Err(SdpError::Sticky);
        }
        Ok(())
    }

    fn fail<R>(&mut self, err: SdpError) -> Result<R, SdpError> {
        self.state = State::Error;
        Err(err)
    }

    fn send_command(
        &mut self,
        opcode: Opcode,
        address: u32,
        format: u8,
        data_count: u32,
        data_value: u32,
    ) -> Result<(), SdpError> {
        self.guard()?;
        let cmd = CommandReport {
            opcode: Be16::new(opcode as u16),
            address: Be32::new(address),
            format,
            data_count: Be32::new(data_count),
            data_value: Be32::new(data_value),
            reserved: 0,
        };
        let mut buf = cmd.as_bytes().to_vec();
        buf.resize(self.profile.report1_size, 0);
        match self.transport.write_report(REPORT_ID_COMMAND, &buf) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e.into()),
        }
    }

    fn read_report(&mut self, expected_id: u8) -> Result<Vec<u8>, SdpError> {
        let report = match self.transport.read_report(self.timeout) {
            Ok(r) => r,
            Err(e) => return self.fail(e.into()),
        };
        if report.id != expected_id {
            return self.fail(SdpError::UnexpectedReport(report.id));
        }
        Ok(report.data)
    }

    fn read_status_report(&mut self, expected_id: u8) -> Result<(u32, Vec<u8>), SdpError> {
        let data = self.read_report(expected_id)?;
        if data.len() < 4 {
            return self.fail(SdpError::UnexpectedReport(expected_id));
        }
        let b = [data[0], data[1], data[2], data[3]];
        let code = if self.profile.status_big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        };
        Ok((code, data[4..].to_vec()))
    }

    fn read_interim(&mut self) -> Result<u32, SdpError> {
        let (code, _) = self.read_status_report(REPORT_ID_INTERIM)?;
        Ok(code)
    }

    fn read_final(&mut self) -> Result<(u32, Vec<u8>), SdpError> {
        self.read_status_report(REPORT_ID_FINAL)
    }

    fn expect_success(&mut self) -> Result<(), SdpError> {
        self.read_interim()?;
        let (code, _) = self.read_final()?;
        if code != SUCCESS_COMPLETION {
            return self.fail(SdpError::DeviceError(code));
        }
        Ok(())
    }

    /// Read Register: reads `count` cells of `format` width,
    /// little-endian, starting at `address`.
    pub fn read_register(
        &mut self,
        address: u32,
        format: Format,
        count: u32,
    ) -> Result<Vec<u64>, SdpError> {
        self.guard()?;
        if address % format.bytes() != 0 {
            return Err(SdpError::BadAlignment {
                addr: address,
                width: format.bytes() as u8,
            });
        }
        self.send_command(Opcode::ReadRegister, address, format.wire_code(), count, 0)?;
        self.read_interim()?;
        let payload = self.read_report(REPORT_ID_FINAL)?;
        let width = format.bytes() as usize;
        let mut values = Vec::with_capacity(count as usize);
        for chunk in payload.chunks(width).take(count as usize) {
            let mut v = 0u64;
            for (i, b) in chunk.iter().enumerate() {
                v |= (*b as u64) << (8 * i);
            }
            values.push(v);
        }
        Ok(values)
    }

    /// Write Register.
    pub fn write_register(&mut self, address: u32, format: Format, value: u32) -> Result<(), SdpError> {
        self.guard()?;
        if address % format.bytes() != 0 {
            return Err(SdpError::BadAlignment {
                addr: address,
                width: format.bytes() as u8,
            });
        }
        self.send_command(
            Opcode::WriteRegister,
            address,
            format.wire_code(),
            format.bytes(),
            value,
        )?;
        self.expect_success()
    }

    fn stream(
        &mut self,
        opcode: Opcode,
        address: u32,
        data: &[u8],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(), SdpError> {
        self.guard()?;
        self.send_command(opcode, address, 0, data.len() as u32, 0)?;
        let chunk_size = self.profile.report2_size.saturating_sub(1).max(1);
        let total = data.len();
        let mut sent = 0usize;
        for chunk in data.chunks(chunk_size) {
            match self.transport.write_report(REPORT_ID_DATA, chunk) {
                Ok(()) => {}
                Err(e) => return self.fail(e.into()),
            }
            sent += chunk.len();
            progress(sent, total);
        }
        self.expect_success()
    }

    /// Write File: stream arbitrary bytes to `address`.
    pub fn write_file(
        &mut self,
        address: u32,
        data: &[u8],
        progress: impl FnMut(usize, usize),
    ) -> Result<(), SdpError> {
        self.stream(Opcode::WriteFile, address, data, progress)
    }

    /// Write DCD: push a DCD binary segment to `address`.
    pub fn write_dcd(
        &mut self,
        address: u32,
        dcd_bytes: &[u8],
        progress: impl FnMut(usize, usize),
    ) -> Result<(), SdpError> {
        self.stream(Opcode::WriteDcd, address, dcd_bytes, progress)
    }

    /// Write CSF.
    pub fn write_csf(
        &mut self,
        address: u32,
        csf_bytes: &[u8],
        progress: impl FnMut(usize, usize),
    ) -> Result<(), SdpError> {
        self.stream(Opcode::WriteCsf, address, csf_bytes, progress)
    }

    /// Skip DCD Header.
    pub fn skip_dcd_header(&mut self) -> Result<(), SdpError> {
        self.guard()?;
        self.send_command(Opcode::SkipDcdHeader, 0, 0, 0, 0)?;
        self.expect_success()
    }

    /// Jump Address : the device may leave the protocol on jump,
    /// so a missing Report 4 is not an error.
    pub fn jump(&mut self, address: u32) -> Result<(), SdpError> {
        self.guard()?;
        self.send_command(Opcode::JumpAddress, address, 0, 0, 0)?;
        self.read_interim()?;
        match self.read_final() {
            Ok(_) => Ok(()),
            Err(SdpError::TransportTimeout) => {
                self.state = State::Idle;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read Status : pass-through 4-byte code.
    pub fn read_status(&mut self) -> Result<u32, SdpError> {
        self.guard()?;
        self.send_command(Opcode::ReadStatus, 0, 0, 0, 0)?;
        let (code, _) = self.read_final()?;
        Ok(code)
    }

    /// Composite image write: optionally uploads the image's DCD to
    /// `ocram` first, optionally
    /// zeroes the IVT's DCD pointer/size in a working copy before writing
    /// the rest of the image, then optionally jumps to `ivt.self`.
    pub fn write_image(
        &mut self,
        image: &Image,
        init_ddr: bool,
        skip_dcd: bool,
        ocram: u32,
        run: bool,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(), SdpError> {
        self.guard()?;
        let ivt_self = image.ivt_self()?;

        if init_ddr {
            if let Image::V2(v2) = image {
                if let Some(dcd) = &v2.dcd {
                    let dcd_bytes = dcd.export_bin().map_err(ImageError::from)?;
                    self.write_dcd(ocram, &dcd_bytes, &mut progress)?;
                }
            }
        }

        let mut bytes = image.export()?;
        if skip_dcd {
            strip_dcd_in_place(&mut bytes, ivt_offset_of(image) as usize);
        }
        let write_addr = ivt_self - ivt_offset_of(image);
        self.write_file(write_addr, &bytes, &mut progress)?;

        if skip_dcd {
            self.skip_dcd_header()?;
        }

        if run {
            self.jump(ivt_self)?;
        }
        Ok(())
    }
}

fn ivt_offset_of(image: &Image) -> u32 {
    match image {
        Image::V2(v2) => v2.ivt_offset,
        Image::V3(v3) => v3.ivt_offset,
    }
}

/// Zero the IVT's DCD pointer, turning a working copy of an exported image
/// into one the ROM will boot without running any DCD commands.
fn strip_dcd_in_place(bytes: &mut [u8], ivt_offset: usize) {
    // Field layout matches `image::ivt::Ivt::write`: header(4) + entry(4) +
    // reserved(4) + dcd(4) ...
    let dcd_field = ivt_offset + 4 + 4 + 4;
    if bytes.len() >= dcd_field + 4 {
        bytes[dcd_field..dcd_field + 4].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::MockTransport;

    fn profile() -> HidProfile {
        HidProfile {
            report1_size: 1025,
            report2_size: 1025,
            report3_size: 5,
            report4_size: 65,
            status_big_endian: true,
        }
    }

    #[test]
    fn scenario_4_write_register_round_trip() {
        let mut mock = MockTransport::new();
        mock.push_response(3, vec![0x56, 0x78, 0x78, 0x56]);
        mock.push_response(4, vec![0x12, 0x8a, 0x8a, 0x12]);
        let mut client = SdpClient::open(mock, profile());

        client
            .write_register(0x0090_0000, Format::U32, 0x5555_5555)
            .unwrap();

        let written = &client.transport.written;
        assert_eq!(written[0].0, REPORT_ID_COMMAND);
        let cmd = &written[0].1;
        assert_eq!(u16::from_be_bytes([cmd[0], cmd[1]]), Opcode::WriteRegister as u16);
        assert_eq!(
            u32::from_be_bytes([cmd[2], cmd[3], cmd[4], cmd[5]]),
            0x0090_0000
        );
        assert_eq!(cmd[6], 0x20);
        assert_eq!(
            u32::from_be_bytes([cmd[11], cmd[12], cmd[13], cmd[14]]),
            0x5555_5555
        );
    }

    #[test]
    fn read_register_unpacks_little_endian_cells() {
        let mut mock = MockTransport::new();
        mock.push_response(3, vec![0, 0, 0, 0]);
        mock.push_response(4, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let mut client = SdpClient::open(mock, profile());

        let values = client.read_register(0x0090_0000, Format::U32, 2).unwrap();
        assert_eq!(values, vec![0x0403_0201, 0x0807_0605]);
    }

    #[test]
    fn write_register_rejects_misaligned_address() {
        let mock = MockTransport::new();
        let mut client = SdpClient::open(mock, profile());
        let err = client
            .write_register(0x1001, Format::U32, 0)
            .unwrap_err();
        assert!(matches!(err, SdpError::BadAlignment { .. }));
    }

    #[test]
    fn device_error_is_sticky_until_close() {
        let mut mock = MockTransport::new();
        mock.push_response(3, vec![0, 0, 0, 0]);
        mock.push_response(4, vec![0xde, 0xad, 0xbe, 0xef]);
        let mut client = SdpClient::open(mock, profile());
        let err = client.write_register(0x1000, Format::U32, 1).unwrap_err();
        assert!(matches!(err, SdpError::DeviceError(_)));
        assert_eq!(client.state(), State::Error);

        let err2 = client.write_register(0x1000, Format::U32, 1).unwrap_err();
        assert!(matches!(err2, SdpError::Sticky));

        client.reset();
        assert_eq!(client.state(), State::Idle);
    }

    #[test]
    fn jump_tolerates_a_missing_final_report() {
        let mut mock = MockTransport::new();
        mock.push_response(3, vec![0, 0, 0, 0]);
        let mut client = SdpClient::open(mock, profile());
        client.jump(0x877f_f400).unwrap();
    }

    #[test]
    fn scenario_5_write_image_with_dcd_strip() {
        use crate::dcd::{Command, Dcd, Width, WriteEntry, WriteOp};
        use crate::image::{Image, Options, Variant};

        let mut dcd = Dcd::new(0x40);
        dcd.push(Command::WriteData {
            op: WriteOp::WriteValue,
            width: Width::U32,
            entries: vec![WriteEntry {
                addr: 0x3034_0004,
                value: 0x4f40_0005,
            }],
        });
        let options = Options::default();
        let image = Image::build_v2(
            Variant::V2,
            0x877f_f000,
            vec![0xaa; 64],
            Some(dcd),
            None,
            &options,
        )
        .unwrap();

        let success = vec![
            (3u8, vec![0u8, 0, 0, 0]),
            (4u8, vec![0x12, 0x8a, 0x8a, 0x12]),
        ];
        let mut mock = MockTransport::new();
        // WriteDcd to OCRAM, then WriteFile of the whole image, then
        // SkipDcdHeader, then Jump (final report optional).
        for (id, data) in success.iter().cloned().chain(success.iter().cloned()) {
            mock.push_response(id, data);
        }
        mock.push_response(3, vec![0, 0, 0, 0]);
        mock.push_response(4, vec![0x12, 0x8a, 0x8a, 0x12]);
        mock.push_response(3, vec![0, 0, 0, 0]);

        let mut client = SdpClient::open(mock, profile());
        client
            .write_image(&image, true, true, 0x0091_0000, true, |_, _| {})
            .unwrap();

        let written = &client.transport.written;
        let opcode_of = |buf: &[u8]| u16::from_be_bytes([buf[0], buf[1]]);
        let commands: Vec<u16> = written
            .iter()
            .filter(|(id, _)| *id == REPORT_ID_COMMAND)
            .map(|(_, buf)| opcode_of(buf))
            .collect();
        assert_eq!(
            commands,
            vec![
                Opcode::WriteDcd as u16,
                Opcode::WriteFile as u16,
                Opcode::SkipDcdHeader as u16,
                Opcode::JumpAddress as u16,
            ]
        );
    }
}
