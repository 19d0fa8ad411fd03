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

//! Resumable copying of a label hierarchy from one store to another.

use std::io;
use std::path::Path;

use log::info;

pub mod copier;
pub mod id_set;
pub mod label_path;
pub mod plan;
pub mod progress;
pub mod rollback;

use self::id_set::IdSet;

pub const DONE_FILE: &str = "done.dat";
pub const IN_PROGRESS_FILE: &str = "in-progress.dat";

/// The persistent state of copying between one pair of stores.
#[derive(Debug)]
pub struct SyncState {
    /// Every message which has been copied.
    pub done: IdSet,
    /// Every message a copy was started for since the last completed or
    /// rolled back run.
    pub in_progress: IdSet,
}

impl SyncState {
    /// Open the state kept in `dir`, creating `dir` and empty state if
    /// needed.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let state = SyncState {
            done: IdSet::open(dir.join(DONE_FILE))?,
            in_progress: IdSet::open(dir.join(IN_PROGRESS_FILE))?,
        };

        info!(
            "{} messages already copied according to {}",
            state.done.len(),
            state.done.path().display()
        );
        Ok(state)
    }
}
