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

//! An in-memory mail store which records how it is used.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::prelude::*;

use super::*;
use crate::mime::header::Headers;

#[derive(Clone, Debug)]
struct StoredMessage {
    uid: u64,
    id: MessageId,
    labels: Vec<String>,
    data: Vec<u8>,
    received: Option<DateTime<FixedOffset>>,
}

#[derive(Debug)]
struct Folder {
    capabilities: FolderCapabilities,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<FolderPath, Folder>,
    next_uid: u64,
    connected: bool,
    connects: usize,

    fail_appends: usize,
    append_delay: Option<Duration>,
    active_appends: usize,
    max_active_appends: usize,
    active_by_folder: HashMap<FolderPath, usize>,
    max_active_by_folder: HashMap<FolderPath, usize>,
    append_attempts: usize,
    fetch_full_batches: Vec<usize>,
    broken: HashSet<FolderPath>,
}

/// A `MailStore` held entirely in memory.
///
/// Folders created with `create` can hold both messages and folders; other
/// shapes can be set up with `add_folder`. Messages appended through the
/// store get fresh ids and take their labels from their `X-Gmail-Labels`
/// header.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

pub const BOTH: FolderCapabilities = FolderCapabilities {
    holds_messages: true,
    holds_folders: true,
};
pub const MESSAGES_ONLY: FolderCapabilities = FolderCapabilities {
    holds_messages: true,
    holds_folders: false,
};
pub const FOLDERS_ONLY: FolderCapabilities = FolderCapabilities {
    holds_messages: false,
    holds_folders: true,
};

impl MemoryStore {
    /// Create a connected store whose root has `root` capabilities.
    pub fn new(root: FolderCapabilities) -> Self {
        let mut state = State {
            connected: true,
            next_uid: 1 << 32,
            ..State::default()
        };
        state.folders.insert(
            FolderPath::root(),
            Folder {
                capabilities: root,
                messages: Vec::new(),
            },
        );

        MemoryStore {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_folder(&self, path: &str, capabilities: FolderCapabilities) {
        self.lock().folders.insert(
            FolderPath::parse(path, '/'),
            Folder {
                capabilities,
                messages: Vec::new(),
            },
        );
    }

    /// Add a message with a caller-chosen id. The same id may be added to
    /// several folders, as happens with labels.
    pub fn add_message(
        &self,
        folder: &str,
        id: u64,
        labels: &[&str],
        data: &[u8],
        received: Option<DateTime<FixedOffset>>,
    ) {
        let mut state = self.lock();
        let uid = state.next_uid;
        state.next_uid += 1;
        state
            .folders
            .get_mut(&FolderPath::parse(folder, '/'))
            .expect("no such folder")
            .messages
            .push(StoredMessage {
                uid,
                id: MessageId(id),
                labels: labels.iter().map(|&l| l.to_owned()).collect(),
                data: data.to_vec(),
                received,
            });
    }

    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    /// Make the next `n` appends fail as if the connection dropped.
    pub fn fail_next_appends(&self, n: usize) {
        self.lock().fail_appends = n;
    }

    /// Make opening `folder` fail.
    pub fn break_folder(&self, folder: &str) {
        self.lock().broken.insert(FolderPath::parse(folder, '/'));
    }

    /// Make every append take at least `delay`.
    pub fn set_append_delay(&self, delay: Duration) {
        self.lock().append_delay = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn append_attempts(&self) -> usize {
        self.lock().append_attempts
    }

    pub fn max_active_appends(&self) -> usize {
        self.lock().max_active_appends
    }

    /// The most appends ever in flight against any single folder at once.
    pub fn max_active_appends_per_folder(&self) -> usize {
        self.lock()
            .max_active_by_folder
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// The number of messages requested by each `fetch_full` call.
    pub fn fetch_full_batches(&self) -> Vec<usize> {
        self.lock().fetch_full_batches.clone()
    }

    /// The raw messages in `folder`.
    pub fn messages_in(&self, folder: &str) -> Vec<Vec<u8>> {
        self.lock()
            .folders
            .get(&FolderPath::parse(folder, '/'))
            .map(|f| f.messages.iter().map(|m| m.data.clone()).collect())
            .unwrap_or_default()
    }

    pub fn total_messages(&self) -> usize {
        self.lock().folders.values().map(|f| f.messages.len()).sum()
    }
}

impl State {
    fn check_connected(&self) -> Result<(), StoreError> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::Disconnected("not connected".to_owned()))
        }
    }

    fn folder(&self, path: &FolderPath) -> Result<&Folder, StoreError> {
        self.check_connected()?;
        self.folders
            .get(path)
            .ok_or_else(|| StoreError::NxFolder(path.clone()))
    }

    fn folder_mut(
        &mut self,
        path: &FolderPath,
    ) -> Result<&mut Folder, StoreError> {
        self.check_connected()?;
        self.folders
            .get_mut(path)
            .ok_or_else(|| StoreError::NxFolder(path.clone()))
    }
}

impl MailStore for MemoryStore {
    type Session = MemorySession;

    fn connect(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn list_children(
        &self,
        folder: &FolderPath,
    ) -> Result<Vec<FolderPath>, StoreError> {
        let state = self.lock();
        state.folder(folder)?;
        Ok(state
            .folders
            .keys()
            .filter(|k| {
                k.segments().len() == folder.segments().len() + 1
                    && k.segments().starts_with(folder.segments())
            })
            .cloned()
            .collect())
    }

    fn capabilities(
        &self,
        folder: &FolderPath,
    ) -> Result<FolderCapabilities, StoreError> {
        Ok(self.lock().folder(folder)?.capabilities)
    }

    fn exists(&self, folder: &FolderPath) -> Result<bool, StoreError> {
        let state = self.lock();
        state.check_connected()?;
        Ok(state.folders.contains_key(folder))
    }

    fn create(&self, folder: &FolderPath) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_connected()?;
        if state.folders.contains_key(folder) {
            return Ok(());
        }

        let mut parent = folder.segments().to_vec();
        parent.pop();
        let parent = FolderPath(parent);
        if !state.folders.contains_key(&parent) {
            return Err(StoreError::NxFolder(parent));
        }

        state.folders.insert(
            folder.clone(),
            Folder {
                capabilities: BOTH,
                messages: Vec::new(),
            },
        );
        Ok(())
    }

    fn message_count(&self, folder: &FolderPath) -> Result<usize, StoreError> {
        Ok(self.lock().folder(folder)?.messages.len())
    }

    fn open(
        &self,
        folder: &FolderPath,
        mode: OpenMode,
    ) -> Result<MemorySession, StoreError> {
        let state = self.lock();
        if state.broken.contains(folder) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "folder is broken",
            )));
        }

        let uids = state
            .folder(folder)?
            .messages
            .iter()
            .map(|m| m.uid)
            .collect();
        drop(state);
        Ok(MemorySession {
            store: self.clone(),
            folder: folder.clone(),
            mode,
            uids,
            deleted: HashSet::new(),
        })
    }

    fn append(
        &self,
        folder: &FolderPath,
        data: &[u8],
        received: Option<DateTime<FixedOffset>>,
    ) -> Result<(), StoreError> {
        let delay = {
            let mut state = self.lock();
            state.append_attempts += 1;
            state.check_connected()?;
            if state.fail_appends > 0 {
                state.fail_appends -= 1;
                state.connected = false;
                return Err(StoreError::Disconnected(
                    "connection reset".to_owned(),
                ));
            }
            state.folder(folder)?;

            state.active_appends += 1;
            state.max_active_appends =
                state.max_active_appends.max(state.active_appends);
            let active = {
                let active = state
                    .active_by_folder
                    .entry(folder.clone())
                    .or_insert(0);
                *active += 1;
                *active
            };
            let max = state
                .max_active_by_folder
                .entry(folder.clone())
                .or_insert(0);
            *max = (*max).max(active);

            state.append_delay
        };

        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.lock();
        state.active_appends -= 1;
        if let Some(active) = state.active_by_folder.get_mut(folder) {
            *active -= 1;
        }

        let uid = state.next_uid;
        state.next_uid += 1;
        state.folder_mut(folder)?.messages.push(StoredMessage {
            uid,
            id: MessageId(uid),
            labels: Headers::parse(data).labels(),
            data: data.to_vec(),
            received,
        });
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    folder: FolderPath,
    mode: OpenMode,
    uids: Vec<u64>,
    deleted: HashSet<u64>,
}

impl MemorySession {
    fn with_messages<R>(
        &self,
        messages: &[MessageRef],
        mut f: impl FnMut(MessageRef, &StoredMessage) -> R,
    ) -> Result<Vec<R>, StoreError> {
        let state = self.store.lock();
        let folder = state.folder(&self.folder)?;
        messages
            .iter()
            .map(|&m| {
                let uid = *self
                    .uids
                    .get(m.0 as usize)
                    .ok_or(StoreError::NxMessage)?;
                let message = folder
                    .messages
                    .iter()
                    .find(|s| s.uid == uid)
                    .ok_or(StoreError::NxMessage)?;
                Ok(f(m, message))
            })
            .collect()
    }
}

impl FolderSession for MemorySession {
    fn messages(&mut self) -> Result<Vec<MessageRef>, StoreError> {
        Ok((0..self.uids.len() as u32).map(MessageRef).collect())
    }

    fn fetch_summaries(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<MessageSummary>, StoreError> {
        self.with_messages(messages, |m, s| MessageSummary {
            message: m,
            id: s.id,
            labels: s.labels.clone(),
            size: s.data.len() as u64,
            received: s.received,
        })
    }

    fn fetch_headers(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.with_messages(messages, |_, s| {
            crate::mime::header::header_block(&s.data).to_vec()
        })
    }

    fn fetch_full(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let result = self.with_messages(messages, |_, s| s.data.clone())?;
        self.store.lock().fetch_full_batches.push(messages.len());
        Ok(result)
    }

    fn search(
        &mut self,
        query: &SearchQuery,
    ) -> Result<Vec<MessageRef>, StoreError> {
        let all = (0..self.uids.len() as u32)
            .map(MessageRef)
            .collect::<Vec<_>>();
        let hits = self.with_messages(&all, |m, s| {
            if query.matches(s.id, &Headers::parse(&s.data), s.received) {
                Some(m)
            } else {
                None
            }
        })?;
        Ok(hits.into_iter().flatten().collect())
    }

    fn set_deleted(
        &mut self,
        message: MessageRef,
        deleted: bool,
    ) -> Result<(), StoreError> {
        if OpenMode::ReadWrite != self.mode {
            return Err(StoreError::ReadOnly(self.folder.clone()));
        }

        let uid = *self
            .uids
            .get(message.0 as usize)
            .ok_or(StoreError::NxMessage)?;
        if deleted {
            self.deleted.insert(uid);
        } else {
            self.deleted.remove(&uid);
        }
        Ok(())
    }

    fn close(self, expunge: bool) -> Result<(), StoreError> {
        if !expunge || OpenMode::ReadWrite != self.mode {
            return Ok(());
        }

        let mut state = self.store.lock();
        let deleted = &self.deleted;
        state
            .folder_mut(&self.folder)?
            .messages
            .retain(|m| !deleted.contains(&m.uid));
        Ok(())
    }
}
