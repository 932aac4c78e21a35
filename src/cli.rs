//! Minimal CLI parsing for the analyzer commands.

use std::path::PathBuf;

use crate::services::duplicates::DuplicateMethod;

pub const USAGE: &str = "\
Usage: video-analyzer <command>

Commands:
  scan <folder> [--resume|--discard]   Catalog a folder tree
                                       (--resume / --discard decide what to
                                       do with an interrupted scan)
  stats                                Show catalog statistics
  duplicates <fuzzy|partial|full>      Find duplicate files
  verify                               Run a decode pass over the catalog
  help                                 Show this help
";

/// What to do with a leftover checkpoint when starting a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryChoice {
    /// Report the checkpoint and stop.
    #[default]
    Ask,
    /// Resume the interrupted session.
    Resume,
    /// Delete the checkpoint and scan fresh.
    Discard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Scan {
        folder: PathBuf,
        recovery: RecoveryChoice,
    },
    Stats,
    Duplicates {
        method: DuplicateMethod,
    },
    Verify,
    Help,
}

impl Command {
    pub fn from_args() -> Result<Self, String> {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let Some(command) = args.next() else {
            return Ok(Command::Help);
        };

        match command.as_str() {
            "scan" => {
                let mut folder = None;
                let mut recovery = RecoveryChoice::default();
                for arg in args {
                    match arg.as_str() {
                        "--resume" => recovery = RecoveryChoice::Resume,
                        "--discard" => recovery = RecoveryChoice::Discard,
                        _ if arg.starts_with("--") => {
                            return Err(format!("unknown scan option '{arg}'"));
                        }
                        _ if folder.is_none() => folder = Some(PathBuf::from(arg)),
                        _ => return Err("scan takes a single folder".to_string()),
                    }
                }
                let folder = folder.ok_or_else(|| "scan requires a folder".to_string())?;
                Ok(Command::Scan { folder, recovery })
            }
            "stats" => Ok(Command::Stats),
            "duplicates" => {
                let method = args
                    .next()
                    .ok_or_else(|| "duplicates requires a method: fuzzy, partial or full".to_string())?;
                let method = DuplicateMethod::from_name(&method)
                    .ok_or_else(|| format!("unknown duplicate method '{method}'"))?;
                Ok(Command::Duplicates { method })
            }
            "verify" => Ok(Command::Verify),
            "help" | "--help" | "-h" => Ok(Command::Help),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}
