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

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The configuration for a Labelsync run.
///
/// This is stored in a TOML file, `labelsync.toml` in the current directory
/// unless another path is given on the command line. Everything except the
/// store locations has a usable default.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SyncConfig {
    /// The store messages are copied from.
    #[serde(default)]
    pub source: StoreConfig,

    /// The store messages are copied to.
    #[serde(default)]
    pub target: StoreConfig,

    /// Options for the copy engine.
    #[serde(default)]
    pub copy: CopyConfig,

    /// How labels are turned into target folders.
    #[serde(default)]
    pub labels: LabelConfig,

    /// Options for duplicate detection.
    #[serde(default)]
    pub duplicates: DuplicatesConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// The root directory of the store.
    pub path: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Maximum number of source folders read at the same time.
    pub source_concurrency: usize,
    /// Maximum number of copy operations executing against the target at the
    /// same time, across all target folders.
    pub target_concurrency: usize,
    /// Messages smaller than this many bytes are fetched in batches.
    pub small_message_size: u64,
    /// A batch of small messages is fetched once it holds more than this
    /// many bytes.
    pub small_message_batch_size: u64,
    /// Interval between progress updates, in milliseconds.
    pub refresh_rate_ms: u64,
    /// If set, everything is copied beneath this folder of the target store
    /// instead of its root. Created if it does not exist.
    pub target_folder: Option<String>,
    /// Directory holding the files which track which messages have been
    /// copied.
    pub state_dir: PathBuf,
}

impl Default for CopyConfig {
    fn default() -> Self {
        CopyConfig {
            source_concurrency: 4,
            target_concurrency: 4,
            small_message_size: 10 * 1024,
            small_message_batch_size: 10 * 1024 * 1024,
            refresh_rate_ms: 200,
            target_folder: None,
            state_dir: PathBuf::from("."),
        }
    }
}

impl CopyConfig {
    pub fn refresh_rate(&self) -> Duration {
        Duration::from_millis(self.refresh_rate_ms.max(1))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Labels which never become part of a target path.
    ///
    /// The inbox is deliberately mapped to the target root.
    pub reserved: Vec<String>,
    /// Labels carried by so many messages that they only become a folder
    /// when the message has no other label, in the order they are dropped.
    pub noise: Vec<String>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        LabelConfig {
            reserved: vec!["INBOX".to_owned(), "[Gmail]".to_owned()],
            noise: vec![
                "Important".to_owned(),
                "Sent".to_owned(),
                "Messages envoyés".to_owned(),
            ],
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DuplicatesConfig {
    /// Full names of folders (with `/` as the delimiter) which are not
    /// searched for duplicates, nor are their sub-folders.
    pub ignore_folders: Vec<String>,
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        DuplicatesConfig {
            ignore_folders: vec![
                "Contacts".to_owned(),
                "EmailedContacts".to_owned(),
                "Calendrier".to_owned(),
            ],
        }
    }
}
