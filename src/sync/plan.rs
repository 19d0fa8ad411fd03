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

//! Working out which messages still need to be copied.
//!
//! Planning makes two read-only passes over the whole source tree. The first
//! just counts messages so the second can show meaningful progress; the
//! second reads the id of every message and keeps those not yet copied.
//!
//! A message with several labels is seen once per label. Only its first
//! sighting is kept, and every repeat corrects the count from the first pass
//! downwards, so that afterwards the count is the number of distinct
//! messages in the source.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info};

use super::id_set::IdSet;
use super::progress;
use crate::store::{
    walk, Flow, FolderPath, FolderSession, MailStore, MessageId, OpenMode,
};
use crate::support::error::Error;
use crate::support::threading::run_with_progress;

/// What a copy run has to do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Every message not yet copied, with the one source folder it will be
    /// read from.
    pub todo: HashMap<MessageId, FolderPath>,
    /// The number of distinct messages in the source, copied or not.
    pub remote_total: usize,
}

impl Plan {
    /// The messages to copy, grouped by source folder.
    pub fn by_folder(&self) -> BTreeMap<FolderPath, HashSet<MessageId>> {
        let mut folders = BTreeMap::<FolderPath, HashSet<MessageId>>::new();
        for (&id, folder) in &self.todo {
            folders.entry(folder.clone()).or_default().insert(id);
        }
        folders
    }
}

pub struct Planner<'a, S> {
    source: &'a S,
    done: &'a IdSet,
    refresh_rate: Duration,
}

impl<'a, S: MailStore> Planner<'a, S> {
    pub fn new(source: &'a S, done: &'a IdSet, refresh_rate: Duration) -> Self {
        Planner {
            source,
            done,
            refresh_rate,
        }
    }

    pub fn plan(&self) -> Result<Plan, Error> {
        let found = AtomicUsize::new(0);
        let count = run_with_progress(
            self.refresh_rate,
            || self.count(&found),
            || {
                progress::show(&progress::counting_line(
                    found.load(Ordering::Relaxed),
                ))
            },
        )
        .ok_or(Error::WorkerPanicked)??;
        progress::finish();
        info!("{} messages in source", count);

        let total = AtomicUsize::new(count);
        let scanned = AtomicUsize::new(0);
        let todo = run_with_progress(
            self.refresh_rate,
            || self.diff(&scanned, &total),
            || {
                progress::show(&progress::planning_line(
                    scanned.load(Ordering::Relaxed),
                    total.load(Ordering::Relaxed),
                ))
            },
        )
        .ok_or(Error::WorkerPanicked)??;
        progress::finish();

        let plan = Plan {
            todo,
            remote_total: total.into_inner(),
        };
        info!(
            "{} distinct messages in source, {} to copy",
            plan.remote_total,
            plan.todo.len()
        );
        Ok(plan)
    }

    fn count(&self, found: &AtomicUsize) -> Result<usize, Error> {
        let root = FolderPath::root();
        walk::<_, Error, _>(self.source, &root, &mut |folder, caps| {
            if caps.holds_messages {
                let n = self.source.message_count(folder)?;
                debug!("'{}': {} messages", folder, n);
                found.fetch_add(n, Ordering::Relaxed);
            }
            Ok(Flow::Continue)
        })?;

        Ok(found.load(Ordering::Relaxed))
    }

    fn diff(
        &self,
        scanned: &AtomicUsize,
        total: &AtomicUsize,
    ) -> Result<HashMap<MessageId, FolderPath>, Error> {
        let mut seen = HashSet::<MessageId>::new();
        let mut todo = HashMap::<MessageId, FolderPath>::new();

        let root = FolderPath::root();
        walk::<_, Error, _>(self.source, &root, &mut |folder, caps| {
            if !caps.holds_messages {
                return Ok(Flow::Continue);
            }

            let mut session = self.source.open(folder, OpenMode::ReadOnly)?;
            let messages = session.messages()?;
            let summaries = session.fetch_summaries(&messages)?;
            session.close(false)?;

            for summary in summaries {
                scanned.fetch_add(1, Ordering::Relaxed);
                if !seen.insert(summary.id) {
                    // Already counted under another label. The count may
                    // also be stale if the folder changed since the first
                    // pass.
                    let _ = total.fetch_update(
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                        |t| Some(t.saturating_sub(1)),
                    );
                    continue;
                }

                if !self.done.contains(summary.id) {
                    todo.insert(summary.id, folder.clone());
                }
            }

            Ok(Flow::Continue)
        })?;

        // Messages added between the passes
        let distinct = seen.len();
        let _ = total.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
            Some(t.max(distinct))
        });

        Ok(todo)
    }
}
