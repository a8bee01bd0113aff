//! `imxsd` — drive the Serial Download Protocol over a connected device's
//! USB-HID command channel.
//!
//! Opening the actual USB-HID device is an external collaborator's job, so
//! this binary wires [`imxboot::sdp::SdpClient`] to
//! [`imxboot::sdp::transport::NullTransport`], which cleanly reports
//! `DeviceNotFound`-style errors until it's relinked against a real
//! transport. What it demonstrates is the command surface and exit-code
//! contract; the state machine and wire framing underneath are
//! exercised by the library's own tests against `MockTransport`.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;

use imxboot::config::TargetSelector;
use imxboot::image::{Image, Options, VariantHint};
use imxboot::sdp::device_table::profile_for;
use imxboot::sdp::transport::NullTransport;
use imxboot::sdp::{Format, SdpClient};

/// Drive the i.MX/Vybrid ROM Serial Download Protocol.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
    /// Target chip symbol (e.g. `mx7`) or a `VID:PID` literal.
    #[clap(long, short, default_value = "auto")]
    target: String,
    /// Per-frame transport timeout, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    timeout_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Read `count` register cells of `format` bits, starting at `address`.
    ReadReg {
        address: String,
        #[clap(value_enum)]
        format: FormatArg,
        #[clap(default_value_t = 1)]
        count: u32,
    },
    /// Write one register cell.
    WriteReg {
        address: String,
        #[clap(value_enum)]
        format: FormatArg,
        value: String,
    },
    /// Stream a raw file to `address`.
    WriteFile { address: String, file: PathBuf },
    /// Push a `.imx` image: optionally stage its DCD to `ocram`, optionally
    /// strip the DCD from the written copy, optionally jump on completion.
    WriteImage {
        file: PathBuf,
        #[clap(long)]
        init_ddr: bool,
        #[clap(long)]
        skip_dcd: bool,
        #[clap(long, default_value = "0x00910000")]
        ocram: String,
        #[clap(long)]
        run: bool,
    },
    /// Jump to `address`.
    Jump { address: String },
    /// Read the 4-byte device status code.
    Status,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FormatArg {
    #[value(name = "8")]
    U8,
    #[value(name = "16")]
    U16,
    #[value(name = "32")]
    U32,
}

impl From<FormatArg> for Format {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::U8 => Format::U8,
            FormatArg::U16 => Format::U16,
            FormatArg::U32 => Format::U32,
        }
    }
}

fn parse_addr(s: &str) -> Result<u32, imxboot::Error> {
    let t = s.trim();
    let v = if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u32::from_str_radix(h, 16)
    } else {
        t.parse::<u32>()
    };
    v.map_err(|_| imxboot::Error::Io(format!("not a valid address: {s:?}")))
}

fn run(cli: Cli) -> Result<(), imxboot::Error> {
    let target: TargetSelector = cli
        .target
        .parse()
        .map_err(imxboot::Error::Config)?;
    let chip = match target {
        TargetSelector::ByChip(chip) => chip,
        TargetSelector::ByUsbId(vid, pid) => {
            imxboot::sdp::device_table::chip_for_usb_id(vid, pid).ok_or_else(|| {
                imxboot::Error::Sdp(imxboot::sdp::SdpError::DeviceNotFound)
            })?
        }
        TargetSelector::Auto => {
            return Err(imxboot::Error::Sdp(imxboot::sdp::SdpError::DeviceNotFound));
        }
    };
    let profile = profile_for(chip);
    info!("selected HID profile for {chip:?}");

    let mut client =
        SdpClient::open(NullTransport, profile).with_timeout(Duration::from_millis(cli.timeout_ms));

    match cli.cmd {
        Command::ReadReg {
            address,
            format,
            count,
        } => {
            let values = client.read_register(parse_addr(&address)?, format.into(), count)?;
            for v in values {
                println!("{v:#x}");
            }
        }
        Command::WriteReg {
            address,
            format,
            value,
        } => {
            client.write_register(parse_addr(&address)?, format.into(), parse_addr(&value)?)?;
        }
        Command::WriteFile { address, file } => {
            let data = fs::read(&file)?;
            client.write_file(parse_addr(&address)?, &data, |sent, total| {
                info!("{sent}/{total} bytes");
            })?;
        }
        Command::WriteImage {
            file,
            init_ddr,
            skip_dcd,
            ocram,
            run,
        } => {
            let data = fs::read(&file)?;
            let image = Image::parse(&data, VariantHint::Auto, &Options::default())?;
            client.write_image(
                &image,
                init_ddr,
                skip_dcd,
                parse_addr(&ocram)?,
                run,
                |sent, total| info!("{sent}/{total} bytes"),
            )?;
        }
        Command::Jump { address } => {
            client.jump(parse_addr(&address)?)?;
        }
        Command::Status => {
            println!("{:#010x}", client.read_status()?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::from(0),
        Err(e @ imxboot::Error::Sdp(_)) => {
            eprintln!("imxsd: {e}");
            ExitCode::from(3)
        }
        Err(e) => {
            eprintln!("imxsd: {e}");
            ExitCode::from(2)
        }
    }
}
