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

//! Finding and removing messages which exist more than once in a store.
//!
//! Both modes make one pass over the whole folder tree, parents before
//! children and siblings in the order the store lists them, skipping ignored
//! folders and everything below them. A folder which cannot be read is
//! logged and skipped; it does not stop the pass.
//!
//! Report mode collects every sighting of every fingerprint and returns the
//! fingerprints seen more than once. Delete mode keeps the first sighting of
//! each fingerprint in traversal order and deletes the rest as it goes. That
//! is not necessarily the copy report mode lists first, since the report is
//! sorted by date within each folder.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use log::{debug, info, warn};

use super::fingerprint::Fingerprint;
use crate::store::{
    FolderCapabilities, FolderPath, FolderSession, MailStore, MessageRef,
    OpenMode, StoreError,
};
use crate::support::system_config::DuplicatesConfig;

/// One place a message was seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sighting {
    pub folder: FolderPath,
    pub message: MessageRef,
}

/// All sightings of messages sharing a fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    /// In traversal order. Always at least two.
    pub sightings: Vec<Sighting>,
}

pub struct DuplicateFinder<'a, S> {
    store: &'a S,
    ignore: Vec<FolderPath>,
}

impl<'a, S: MailStore> DuplicateFinder<'a, S> {
    pub fn new(store: &'a S, config: &DuplicatesConfig) -> Self {
        DuplicateFinder {
            store,
            ignore: config
                .ignore_folders
                .iter()
                .map(|f| FolderPath::parse(f, '/'))
                .collect(),
        }
    }

    /// Find every group of duplicates, sorted for display.
    pub fn find(&self) -> Vec<DuplicateGroup> {
        let mut sightings = HashMap::<Fingerprint, Vec<Sighting>>::new();

        self.traverse(&FolderPath::root(), &mut |folder| {
            let mut session = self.store.open(folder, OpenMode::ReadOnly)?;
            let messages = session.messages()?;
            let headers = session.fetch_headers(&messages)?;
            session.close(false)?;

            for (message, raw) in messages.into_iter().zip(headers) {
                sightings
                    .entry(Fingerprint::parse(&raw))
                    .or_default()
                    .push(Sighting {
                        folder: folder.clone(),
                        message,
                    });
            }
            Ok(())
        });

        let mut groups = sightings
            .into_iter()
            .filter(|&(_, ref s)| s.len() >= 2)
            .map(|(fingerprint, sightings)| DuplicateGroup {
                fingerprint,
                sightings,
            })
            .collect::<Vec<_>>();
        sort_for_display(&mut groups);

        info!("Found {} duplicated messages", groups.len());
        groups
    }

    /// Delete every message whose fingerprint was already seen earlier in the
    /// traversal.
    ///
    /// Returns the number of messages deleted.
    pub fn delete(&self) -> usize {
        let mut seen = HashSet::<Fingerprint>::new();
        let mut deleted = 0;

        self.traverse(&FolderPath::root(), &mut |folder| {
            let mut session = self.store.open(folder, OpenMode::ReadWrite)?;
            let messages = session.messages()?;
            let headers = session.fetch_headers(&messages)?;

            let mut deleted_here = 0;
            for (message, raw) in messages.into_iter().zip(headers) {
                if !seen.insert(Fingerprint::parse(&raw)) {
                    session.set_deleted(message, true)?;
                    deleted_here += 1;
                }
            }

            session.close(deleted_here > 0)?;
            if deleted_here > 0 {
                info!("Deleted {} duplicates in '{}'", deleted_here, folder);
            }
            deleted += deleted_here;
            Ok(())
        });

        deleted
    }

    /// Call `visit` on every folder at or below `folder` which holds
    /// messages and is not ignored.
    fn traverse(
        &self,
        folder: &FolderPath,
        visit: &mut impl FnMut(&FolderPath) -> Result<(), StoreError>,
    ) {
        if self.ignore.contains(folder) {
            debug!("Ignoring '{}'", folder);
            return;
        }

        let FolderCapabilities {
            holds_messages,
            holds_folders,
        } = match self.store.capabilities(folder) {
            Ok(caps) => caps,
            Err(e) => {
                warn!("Skipping '{}': {}", folder, e);
                return;
            },
        };

        if holds_messages {
            if let Err(e) = visit(folder) {
                warn!("Skipping messages in '{}': {}", folder, e);
            }
        }

        if holds_folders {
            match self.store.list_children(folder) {
                Ok(children) => {
                    for child in &children {
                        self.traverse(child, visit);
                    }
                },
                Err(e) => {
                    warn!("Skipping sub-folders of '{}': {}", folder, e)
                },
            }
        }
    }
}

/// Sort `groups` by the name of the folder each was first seen in, then by
/// date, with undated messages first.
pub fn sort_for_display(groups: &mut [DuplicateGroup]) {
    groups.sort_by_cached_key(|g| {
        (
            g.sightings.first().map(|s| s.folder.to_string()),
            g.fingerprint.date(),
        )
    });
}

fn display_name(folder: &FolderPath) -> String {
    if folder.is_root() {
        "(root)".to_owned()
    } else {
        folder.to_string()
    }
}

/// Write the human-readable report of `groups` to `out`.
pub fn write_report(
    mut out: impl Write,
    groups: &[DuplicateGroup],
) -> io::Result<()> {
    writeln!(out, "Found {} duplicates:", groups.len())?;
    for group in groups {
        write!(out, "{}", group.fingerprint)?;
        for sighting in &group.sightings {
            writeln!(out, "  in {}", display_name(&sighting.folder))?;
        }
    }
    Ok(())
}
