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

//! A mail store kept in an ordinary directory tree.
//!
//! Every directory is a folder which can hold both messages and sub-folders.
//! Each message is a file named `<id>.eml`, where `<id>` is the 16-digit
//! lower-case hexadecimal store-unique identifier. Anything else in a
//! directory, including hidden entries (which is where new messages are
//! staged), is ignored.
//!
//! The labels of a message are read from its `X-Gmail-Labels` header, and
//! the time it was received is the modification time of its file.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use chrono::prelude::*;
use log::warn;

use super::*;
use crate::mime::header::Headers;
use crate::support::file_ops::{self, IgnoreKinds};
use crate::support::safe_name::is_safe_name;

const MESSAGE_EXTENSION: &str = ".eml";

#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    connected: AtomicBool,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore {
            root: root.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Disconnected(format!(
                "{} not connected",
                self.root.display()
            )))
        }
    }

    fn dir(&self, folder: &FolderPath) -> Result<PathBuf, StoreError> {
        let mut dir = self.root.clone();
        for segment in folder.segments() {
            if !is_safe_name(segment) {
                return Err(StoreError::UnsafeName(segment.to_owned()));
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    fn existing_dir(&self, folder: &FolderPath) -> Result<PathBuf, StoreError> {
        self.check_connected()?;
        let dir = self.dir(folder)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(StoreError::NxFolder(folder.clone()))
        }
    }
}

/// Parse the id out of a message file name, or return `None` if it is not
/// the name of a message file.
fn parse_message_name(name: &str) -> Option<MessageId> {
    let hex = name.strip_suffix(MESSAGE_EXTENSION)?;
    if 16 != hex.len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    u64::from_str_radix(hex, 16).ok().map(MessageId)
}

fn message_name(id: MessageId) -> String {
    format!("{:016x}{}", id.0, MESSAGE_EXTENSION)
}

/// List the messages in `dir`, sorted by id.
fn list_messages(dir: &Path) -> io::Result<Vec<(MessageId, PathBuf)>> {
    let mut messages = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let id = match entry.file_name().to_str().and_then(parse_message_name)
        {
            Some(id) => id,
            None => continue,
        };

        if entry.file_type()?.is_file() {
            messages.push((id, entry.path()));
        }
    }

    messages.sort_unstable();
    Ok(messages)
}

impl MailStore for DirStore {
    type Session = DirSession;

    fn connect(&self) -> Result<(), StoreError> {
        if !self.root.is_dir() {
            return Err(StoreError::Disconnected(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn list_children(
        &self,
        folder: &FolderPath,
    ) -> Result<Vec<FolderPath>, StoreError> {
        let dir = self.existing_dir(folder)?;
        let mut children = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name();
            match name.to_str() {
                Some(name) if is_safe_name(name) => {
                    children.push(folder.child(name))
                },
                Some(_) => (),
                None => warn!(
                    "Skipping folder with non-UTF-8 name {:?} in '{}'",
                    name, folder
                ),
            }
        }

        children.sort_unstable();
        Ok(children)
    }

    fn capabilities(
        &self,
        folder: &FolderPath,
    ) -> Result<FolderCapabilities, StoreError> {
        self.existing_dir(folder)?;
        Ok(FolderCapabilities {
            holds_messages: true,
            holds_folders: true,
        })
    }

    fn exists(&self, folder: &FolderPath) -> Result<bool, StoreError> {
        self.check_connected()?;
        Ok(self.dir(folder)?.is_dir())
    }

    fn create(&self, folder: &FolderPath) -> Result<(), StoreError> {
        self.check_connected()?;
        let dir = self.dir(folder)?;
        match fs::create_dir(&dir).ignore_already_exists() {
            Ok(()) => Ok(()),
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                let mut parent = folder.segments().to_vec();
                parent.pop();
                Err(StoreError::NxFolder(FolderPath(parent)))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn message_count(&self, folder: &FolderPath) -> Result<usize, StoreError> {
        let dir = self.existing_dir(folder)?;
        Ok(list_messages(&dir)?.len())
    }

    fn open(
        &self,
        folder: &FolderPath,
        mode: OpenMode,
    ) -> Result<DirSession, StoreError> {
        let dir = self.existing_dir(folder)?;
        let messages = list_messages(&dir)?;
        Ok(DirSession {
            folder: folder.clone(),
            mode,
            messages,
            deleted: HashSet::new(),
        })
    }

    fn append(
        &self,
        folder: &FolderPath,
        data: &[u8],
        received: Option<DateTime<FixedOffset>>,
    ) -> Result<(), StoreError> {
        let dir = self.existing_dir(folder)?;
        let modified = received.map(SystemTime::from);
        loop {
            let id = MessageId(rand::random());
            let path = dir.join(message_name(id));
            match file_ops::spit(&dir, &path, 0o600, modified, data) {
                Ok(()) => return Ok(()),
                Err(e) if io::ErrorKind::AlreadyExists == e.kind() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// An open directory of a `DirStore`.
///
/// `MessageRef`s are indices into the listing taken when the folder was
/// opened.
#[derive(Debug)]
pub struct DirSession {
    folder: FolderPath,
    mode: OpenMode,
    messages: Vec<(MessageId, PathBuf)>,
    deleted: HashSet<MessageRef>,
}

impl DirSession {
    fn message(
        &self,
        message: MessageRef,
    ) -> Result<&(MessageId, PathBuf), StoreError> {
        self.messages
            .get(message.0 as usize)
            .ok_or(StoreError::NxMessage)
    }

    fn summary(
        &self,
        message: MessageRef,
    ) -> Result<(MessageSummary, Headers), StoreError> {
        let &(id, ref path) = self.message(message)?;
        let metadata = fs::metadata(path)?;
        let received = metadata
            .modified()
            .ok()
            .map(|m| DateTime::<Utc>::from(m).into());
        let headers = Headers::parse(&file_ops::slurp_headers(path)?);

        let summary = MessageSummary {
            message,
            id,
            labels: headers.labels(),
            size: metadata.len(),
            received,
        };
        Ok((summary, headers))
    }
}

impl FolderSession for DirSession {
    fn messages(&mut self) -> Result<Vec<MessageRef>, StoreError> {
        Ok((0..self.messages.len() as u32).map(MessageRef).collect())
    }

    fn fetch_summaries(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<MessageSummary>, StoreError> {
        messages
            .iter()
            .map(|&m| self.summary(m).map(|(summary, _)| summary))
            .collect()
    }

    fn fetch_headers(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        messages
            .iter()
            .map(|&m| {
                let &(_, ref path) = self.message(m)?;
                Ok(file_ops::slurp_headers(path)?)
            })
            .collect()
    }

    fn fetch_full(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        messages
            .iter()
            .map(|&m| {
                let &(_, ref path) = self.message(m)?;
                Ok(fs::read(path)?)
            })
            .collect()
    }

    fn search(
        &mut self,
        query: &SearchQuery,
    ) -> Result<Vec<MessageRef>, StoreError> {
        let mut found = Vec::new();
        for ix in 0..self.messages.len() as u32 {
            let message = MessageRef(ix);
            // Messages can vanish underneath a session; that's not an error
            // for searching purposes.
            let (summary, headers) = match self.summary(message) {
                Ok(s) => s,
                Err(StoreError::Io(e))
                    if io::ErrorKind::NotFound == e.kind() =>
                {
                    continue
                },
                Err(e) => return Err(e),
            };

            if query.matches(summary.id, &headers, summary.received) {
                found.push(message);
            }
        }

        Ok(found)
    }

    fn set_deleted(
        &mut self,
        message: MessageRef,
        deleted: bool,
    ) -> Result<(), StoreError> {
        if OpenMode::ReadWrite != self.mode {
            return Err(StoreError::ReadOnly(self.folder.clone()));
        }

        self.message(message)?;
        if deleted {
            self.deleted.insert(message);
        } else {
            self.deleted.remove(&message);
        }
        Ok(())
    }

    fn close(self, expunge: bool) -> Result<(), StoreError> {
        if !expunge || OpenMode::ReadWrite != self.mode {
            return Ok(());
        }

        for message in &self.deleted {
            let &(_, ref path) = self.message(*message)?;
            fs::remove_file(path).ignore_not_found()?;
        }

        Ok(())
    }
}
