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

//! Mapping the labels of a message to the one folder it is copied into.
//!
//! A message carrying several labels shows up in several source folders, but
//! must be copied exactly once. Its target folder is therefore derived from
//! the union of all its labels, not from where it was found:
//!
//! - System labels lose their leading `\` (`\Important` is `Important`).
//! - The labels implied by the source folder path are added.
//! - Composite labels such as `Projects/Alpha` are split into their
//!   components.
//! - Labels are compared case-insensitively; the first spelling seen wins,
//!   with the message's own labels seen before the folder's.
//! - Reserved labels (the inbox and the provider's namespace folder) are
//!   removed.
//! - Noise labels, which almost every message carries, are dropped in order
//!   as long as another label remains.
//!
//! What is left, sorted case-insensitively, is the path of the target folder
//! beneath the target root. A message with no labels left goes to the root
//! itself.

use std::collections::BTreeMap;
use std::fmt;

use crate::store::FolderPath;
use crate::support::system_config::LabelConfig;

/// The path of a target folder relative to the target root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetPath(pub Vec<String>);

impl TargetPath {
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The full path of this folder within the target store, given the
    /// folder everything is copied beneath.
    pub fn under(&self, base: &FolderPath) -> FolderPath {
        self.0.iter().fold(base.clone(), |path, seg| path.child(seg))
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            write!(f, "(root)")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

#[derive(Clone, Debug)]
pub struct LabelRules {
    /// Lower-cased.
    reserved: Vec<String>,
    /// Lower-cased, in the order they are dropped.
    noise: Vec<String>,
}

impl LabelRules {
    pub fn new(config: &LabelConfig) -> Self {
        LabelRules {
            reserved: config
                .reserved
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
            noise: config.noise.iter().map(|l| l.to_lowercase()).collect(),
        }
    }

    /// Determine the target folder of a message with the given labels, found
    /// in the given source folder.
    pub fn resolve(
        &self,
        folder: &FolderPath,
        message_labels: &[String],
    ) -> TargetPath {
        // Keyed by the lower-cased label so iteration order is the
        // case-insensitive alphabetical order.
        let mut labels = BTreeMap::<String, String>::new();

        let all_labels = message_labels
            .iter()
            .map(|l| l.strip_prefix('\\').unwrap_or(l))
            .chain(folder.segments().iter().map(|s| &s[..]));
        for label in all_labels {
            for component in label.split('/') {
                if component.is_empty() {
                    continue;
                }

                labels
                    .entry(component.to_lowercase())
                    .or_insert_with(|| component.to_owned());
            }
        }

        for reserved in &self.reserved {
            labels.remove(reserved);
        }

        for noise in &self.noise {
            if labels.len() > 1 {
                labels.remove(noise);
            }
        }

        TargetPath(labels.into_iter().map(|(_, label)| label).collect())
    }
}
