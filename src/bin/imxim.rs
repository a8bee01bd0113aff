//! `imxim` — inspect, build and convert `.imx` boot images and their DCD/
//! SRK/hex-record sidecar formats.
//!
//! A thin front-end over [`imxboot`]: every subcommand parses its inputs,
//! calls one core operation, and prints or writes the result. Exit codes:
//! 0 success, 1 usage error, 2 input/parse error.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;

use imxboot::dcd::Dcd;
use imxboot::hexfile;
use imxboot::image::descriptor::{build_from_descriptor, BuildDescriptor, DescriptorError};
use imxboot::image::{Image, Options, Variant, VariantHint};
use imxboot::srk::SrkTable;

/// Inspect, build and convert i.MX/Vybrid boot images.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
    /// Increase verbosity (may be repeated).
    #[clap(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a `.imx` file and print its IVT/BDT/DCD/CSF content.
    Info {
        file: PathBuf,
        /// Force a container variant instead of auto-detecting it.
        #[clap(long, value_enum)]
        variant: Option<VariantArg>,
        /// Offset of the IVT from the image base, if non-default.
        #[clap(long)]
        ivt_offset: Option<String>,
    },
    /// Build a `.imx` file from a YAML image descriptor.
    Create {
        descriptor: PathBuf,
        #[clap(long, short)]
        output: PathBuf,
    },
    /// Convert a binary DCD segment to its textual program form.
    DcdToText { input: PathBuf, output: PathBuf },
    /// Convert a textual DCD program to its binary segment form.
    DcdToBin { input: PathBuf, output: PathBuf },
    /// Convert an S-record or Intel-HEX file to a flat binary.
    HexToBin {
        input: PathBuf,
        output: PathBuf,
        /// Fill gaps between non-contiguous records with 0xFF instead of
        /// rejecting the file.
        #[clap(long)]
        allow_gaps: bool,
    },
    /// Hash up to four PEM certificates' public keys into an SRK fuse blob.
    SrkTable {
        certs: Vec<PathBuf>,
        #[clap(long, short)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum VariantArg {
    V2,
    V2b,
    V3a,
    V3b,
}

impl From<VariantArg> for Variant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::V2 => Variant::V2,
            VariantArg::V2b => Variant::V2b,
            VariantArg::V3a => Variant::V3a,
            VariantArg::V3b => Variant::V3b,
        }
    }
}

fn parse_hex_or_decimal(s: &str) -> Option<u32> {
    let t = s.trim();
    if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u32::from_str_radix(h, 16).ok();
    }
    t.parse::<u32>().ok()
}

fn run(cmd: Command) -> Result<(), imxboot::Error> {
    match cmd {
        Command::Info {
            file,
            variant,
            ivt_offset,
        } => {
            let data = fs::read(&file)?;
            let mut options = Options::default();
            if let Some(off) = ivt_offset.as_deref().and_then(parse_hex_or_decimal) {
                options.ivt_offset = off;
            }
            let hint = match variant {
                Some(v) => VariantHint::Explicit(v.into()),
                None => VariantHint::Auto,
            };
            info!("parsing {}", file.display());
            let image = Image::parse(&data, hint, &options)?;
            print!("{}", image.info()?);
        }
        Command::Create { descriptor, output } => {
            let base = descriptor
                .parent()
                .map(PathBuf::from)
                .unwrap_or_default();
            let yaml = fs::read_to_string(&descriptor)?;
            let descriptor = BuildDescriptor::parse(&yaml).map_err(imxboot::Error::Descriptor)?;
            let image = build_from_descriptor(&descriptor, |path| {
                fs::read(base.join(path)).map_err(|e| DescriptorError::Io {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            })
            .map_err(imxboot::Error::Descriptor)?;
            fs::write(&output, image.export()?)?;
            info!("wrote {}", output.display());
        }
        Command::DcdToText { input, output } => {
            let bytes = fs::read(&input)?;
            let dcd = Dcd::parse_bin(&bytes)?;
            fs::write(&output, dcd.export_text())?;
        }
        Command::DcdToBin { input, output } => {
            let text = fs::read_to_string(&input)?;
            let dcd = Dcd::parse_text(&text)?;
            fs::write(&output, dcd.export_bin()?)?;
        }
        Command::HexToBin {
            input,
            output,
            allow_gaps,
        } => {
            let text = fs::read_to_string(&input)?;
            let image = if text.trim_start().starts_with(':') {
                hexfile::parse_ihex(&text, allow_gaps)?
            } else {
                hexfile::parse_srecord(&text, allow_gaps)?
            };
            fs::write(&output, &image.bytes)?;
            info!(
                "base address {:#010x}, {} bytes",
                image.base_addr,
                image.bytes.len()
            );
        }
        Command::SrkTable { certs, output } => {
            let pem_texts: Vec<String> = certs
                .iter()
                .map(fs::read_to_string)
                .collect::<Result<_, _>>()?;
            let pem_refs: Vec<&str> = pem_texts.iter().map(String::as_str).collect();
            let table = SrkTable::from_pem_certs(&pem_refs)?;
            fs::write(&output, table.fuses())?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env = env_logger::Env::default().default_filter_or(default_level);
    env_logger::Builder::from_env(env).init();

    match run(cli.cmd) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("imxim: {e}");
            ExitCode::from(2)
        }
    }
}
