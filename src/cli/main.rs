//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Labelsync.
//
// Labelsync is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Labelsync is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Labelsync. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SyncConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    Copy(CopyCommand),
    Duplicates(DuplicatesCommand),
}

#[derive(StructOpt)]
pub(super) struct CommonOptions {
    /// The configuration file.
    ///
    /// If `logging.toml` exists in the same directory and standard error is
    /// not a terminal, it is used to configure logging.
    #[structopt(
        short,
        long,
        parse(from_os_str),
        default_value = "labelsync.toml"
    )]
    pub(super) config: PathBuf,
}

/// Copy every message of the source store into the folder hierarchy implied
/// by its labels in the target store.
///
/// Each message is copied exactly once, into the folder derived from all its
/// labels together. The run can be interrupted at any point and restarted;
/// messages already copied are not copied again, and any copy that was
/// underway when the run died is removed from the target before continuing.
#[derive(StructOpt)]
pub(super) struct CopyCommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Maximum number of source folders read at once [default: from config]
    #[structopt(long)]
    pub(super) source_concurrency: Option<usize>,

    /// Maximum number of messages written to the target at once
    /// [default: from config]
    #[structopt(long)]
    pub(super) target_concurrency: Option<usize>,

    /// Copy beneath this folder of the target instead of its root. Nested
    /// folders are separated by '/'.
    #[structopt(long)]
    pub(super) folder: Option<String>,
}

/// Which configured store to operate on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum StoreChoice {
    Source,
    Target,
}

impl FromStr for StoreChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "source" => Ok(StoreChoice::Source),
            "target" => Ok(StoreChoice::Target),
            _ => Err(format!("expected 'source' or 'target', got '{}'", s)),
        }
    }
}

/// Find messages which exist more than once in a store.
///
/// Two messages are duplicates if they have exactly the same set of headers,
/// regardless of the folder they are in. Folders listed in
/// `duplicates.ignore_folders` are not searched.
#[derive(StructOpt)]
pub(super) struct DuplicatesCommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Delete duplicates instead of listing them. The first copy found is
    /// kept.
    #[structopt(long)]
    pub(super) delete: bool,

    /// The store to search, 'source' or 'target'.
    #[structopt(long, default_value = "target")]
    pub(super) store: StoreChoice,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    match cmd {
        Command::Copy(cmd) => {
            let config = load_config(&cmd.common.config);
            super::copy::main(cmd, config)
        },
        Command::Duplicates(cmd) => {
            let config = load_config(&cmd.common.config);
            super::duplicates::main(cmd, config)
        },
    }
}

/// Read the configuration at `path` and set up logging.
///
/// Exits with `EX_CONFIG` if anything is wrong.
fn load_config(path: &Path) -> SyncConfig {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading '{}': {}", path.display(), e);
            EX_CONFIG.exit()
        },
    };

    let config: SyncConfig = match toml::from_slice(&data) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error in config file at '{}': {}", path.display(), e);
            EX_CONFIG.exit()
        },
    };

    init_logging(path);
    config
}

fn init_logging(config_path: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        init_console_log();
        return;
    }

    let log_config_file = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
    } else {
        init_console_log();
    }
}

fn init_console_log() {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{l}][{t}] {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(LevelFilter::Info));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
                EX_SOFTWARE.exit();
            }
        },
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        },
    }
}
