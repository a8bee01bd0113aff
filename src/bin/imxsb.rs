//! `imxsb` — execute `.smx` Smart-Boot recipes.
//!
//! Like `imxsd`, device commands run over
//! [`imxboot::sdp::transport::NullTransport`] until relinked against a real
//! HID backend; `describe` exercises variable substitution and `IMX`
//! sub-segment composition entirely offline.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;

use imxboot::config::TargetSelector;
use imxboot::sdp::device_table::profile_for;
use imxboot::sdp::transport::NullTransport;
use imxboot::sdp::SdpClient;
use imxboot::smartboot::{run_recipe, RecipeFile};

/// Execute declarative Smart-Boot recipes against a connected device.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the named recipes a `.smx` document defines, or print one
    /// recipe's `CMDS` program after `{{ var }}` substitution, without
    /// touching a device.
    Describe {
        recipe: PathBuf,
        name: Option<String>,
    },
    /// Execute a named recipe against a connected device.
    Run {
        recipe: PathBuf,
        name: String,
        /// Override or add a `VARS` entry as `key=value` (repeatable).
        #[clap(long = "var")]
        vars: Vec<String>,
    },
}

fn load(recipe: &PathBuf, extra_vars: &[String]) -> Result<RecipeFile, imxboot::Error> {
    let yaml = fs::read_to_string(recipe)?;
    let mut doc = RecipeFile::parse(&yaml).map_err(imxboot::Error::Recipe)?;
    for kv in extra_vars {
        let (k, v) = kv.split_once('=').ok_or_else(|| {
            imxboot::Error::Io(format!("expected --var key=value, got {kv:?}"))
        })?;
        doc.vars.insert(k.to_string(), v.to_string());
    }
    doc.substitute().map_err(imxboot::Error::Recipe)?;
    Ok(doc)
}

fn run(cmd: Command) -> Result<(), imxboot::Error> {
    match cmd {
        Command::Describe { recipe, name } => {
            let doc = load(&recipe, &[])?;
            match name {
                Some(name) => {
                    let recipe = doc
                        .body
                        .iter()
                        .find(|r| r.name == name)
                        .ok_or_else(|| {
                            imxboot::Error::Recipe(imxboot::smartboot::RecipeError::CmdSyntax {
                                line: 0,
                                reason: format!("no recipe named {name:?}"),
                            })
                        })?;
                    print!("{}", recipe.cmds);
                }
                None => {
                    for recipe in &doc.body {
                        println!(
                            "{}\t{}",
                            recipe.name,
                            recipe.desc.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        }
        Command::Run { recipe, name, vars } => {
            let doc = load(&recipe, &vars)?;
            let target: TargetSelector = doc.head.chip.parse().map_err(imxboot::Error::Config)?;
            let chip = match target {
                TargetSelector::ByChip(chip) => chip,
                TargetSelector::ByUsbId(vid, pid) => {
                    imxboot::sdp::device_table::chip_for_usb_id(vid, pid).ok_or_else(|| {
                        imxboot::Error::Sdp(imxboot::sdp::SdpError::DeviceNotFound)
                    })?
                }
                TargetSelector::Auto => {
                    return Err(imxboot::Error::Sdp(imxboot::sdp::SdpError::DeviceNotFound))
                }
            };
            let profile = profile_for(chip);
            info!("running recipe {name:?} against {chip:?}");
            let mut client = SdpClient::open(NullTransport, profile);
            run_recipe(&doc, &name, &mut client).map_err(imxboot::Error::Recipe)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    match run(Cli::parse().cmd) {
        Ok(()) => ExitCode::from(0),
        Err(e @ imxboot::Error::Sdp(_)) => {
            eprintln!("imxsb: {e}");
            ExitCode::from(3)
        }
        Err(e) => {
            eprintln!("imxsb: {e}");
            ExitCode::from(2)
        }
    }
}
