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

use std::io::{self, Write};

use super::main::{DuplicatesCommand, StoreChoice};
use crate::dedup::finder::{write_report, DuplicateFinder};
use crate::store::fs::DirStore;
use crate::store::MailStore;
use crate::support::sysexits::*;
use crate::support::system_config::SyncConfig;

pub(super) fn main(cmd: DuplicatesCommand, config: SyncConfig) {
    let path = match cmd.store {
        StoreChoice::Source => &config.source.path,
        StoreChoice::Target => &config.target.path,
    };
    let store = DirStore::new(path);
    if let Err(e) = store.connect() {
        die!(EX_UNAVAILABLE, "{}", e);
    }

    let finder = DuplicateFinder::new(&store, &config.duplicates);
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    let result = if cmd.delete {
        writeln!(stdout, "Deleted {} duplicates", finder.delete())
    } else {
        write_report(&mut stdout, &finder.find())
    };

    if let Err(e) = result.and_then(|_| writeln!(stdout, "Finished!")) {
        die!(EX_IOERR, "Error writing output: {}", e);
    }
}
