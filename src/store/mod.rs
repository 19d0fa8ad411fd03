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

//! The interface to the mail stores messages are copied between.
//!
//! A store is a tree of folders. Each folder may hold messages, sub-folders,
//! or both. Messages are only accessible through a `FolderSession`, which is
//! obtained by opening a folder and gives every message a `MessageRef` valid
//! for the life of that session.
//!
//! Store handles are long-lived and shared between threads; sessions belong
//! to the thread which opened them.

use std::fmt;
use std::io;

use chrono::prelude::*;
use thiserror::Error;

use crate::mime::header::Headers;

pub mod fs;
#[cfg(test)]
pub mod memory;

/// The store-unique identifier of a message.
///
/// It identifies a message no matter which folder or label it is seen
/// through, and stays the same when the message moves between folders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a message within an open `FolderSession`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageRef(pub u32);

/// The path of a folder from the root of its store.
///
/// The root itself has no segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderPath(Vec<String>);

impl FolderPath {
    pub fn root() -> Self {
        FolderPath(Vec::new())
    }

    /// Split `name` on `delimiter` into a path. Empty segments are dropped.
    pub fn parse(name: &str, delimiter: char) -> Self {
        FolderPath(
            name.split(delimiter)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_owned());
        FolderPath(segments)
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FolderCapabilities {
    pub holds_messages: bool,
    pub holds_folders: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// The cheap metadata of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub message: MessageRef,
    pub id: MessageId,
    /// Labels exactly as the store reports them, including system labels
    /// such as `\Important`.
    pub labels: Vec<String>,
    pub size: u64,
    /// When the store received the message.
    pub received: Option<DateTime<FixedOffset>>,
}

/// A search query, as understood by `FolderSession::search`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchQuery {
    /// The message with the given store-unique identifier.
    MessageId(MessageId),
    /// The `Date` header falls on the given day, in its own time zone.
    SentOn(NaiveDate),
    /// The message was received on the given day (UTC).
    ReceivedOn(NaiveDate),
    /// The `From` header contains the given string, case-insensitively.
    From(String),
    /// The `To` header contains the given string, case-insensitively.
    To(String),
    /// The `Cc` header contains the given string, case-insensitively.
    Cc(String),
    /// The `Subject` header contains the given string, case-insensitively.
    Subject(String),
    /// All of the queries match.
    And(Vec<SearchQuery>),
}

impl SearchQuery {
    /// Evaluate this query against a message.
    ///
    /// This is for stores which search locally; a store speaking a real
    /// protocol translates the query instead.
    pub fn matches(
        &self,
        id: MessageId,
        headers: &Headers,
        received: Option<DateTime<FixedOffset>>,
    ) -> bool {
        match *self {
            SearchQuery::MessageId(want) => want == id,
            SearchQuery::SentOn(day) => {
                headers.date().map(|d| d.naive_local().date()) == Some(day)
            },
            SearchQuery::ReceivedOn(day) => {
                received.map(|r| r.naive_utc().date()) == Some(day)
            },
            SearchQuery::From(ref s) => header_contains(headers, "From", s),
            SearchQuery::To(ref s) => header_contains(headers, "To", s),
            SearchQuery::Cc(ref s) => header_contains(headers, "Cc", s),
            SearchQuery::Subject(ref s) => {
                header_contains(headers, "Subject", s)
            },
            SearchQuery::And(ref queries) => {
                queries.iter().all(|q| q.matches(id, headers, received))
            },
        }
    }
}

fn header_contains(headers: &Headers, name: &str, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    headers
        .get_all(name)
        .any(|value| value.to_lowercase().contains(&needle))
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection to the store lost: {0}")]
    Disconnected(String),
    #[error("No such folder: '{0}'")]
    NxFolder(FolderPath),
    #[error("No such message")]
    NxMessage,
    #[error("Folder '{0}' is not open for writing")]
    ReadOnly(FolderPath),
    #[error("Unsafe folder name: '{0}'")]
    UnsafeName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether the operation which failed may succeed if tried again after
    /// reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(*self, StoreError::Disconnected(..))
    }
}

/// The outcome of one attempt at a store operation.
#[derive(Debug)]
pub enum Attempt<T> {
    Ok(T),
    Retryable(StoreError),
    Fatal(StoreError),
}

impl<T> From<Result<T, StoreError>> for Attempt<T> {
    fn from(result: Result<T, StoreError>) -> Self {
        match result {
            Ok(v) => Attempt::Ok(v),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// A handle on a mail store.
pub trait MailStore: Send + Sync {
    type Session: FolderSession;

    /// Connect to the store if not already connected.
    fn connect(&self) -> Result<(), StoreError>;
    fn is_connected(&self) -> bool;

    /// List the direct sub-folders of `folder`.
    fn list_children(
        &self,
        folder: &FolderPath,
    ) -> Result<Vec<FolderPath>, StoreError>;
    fn capabilities(
        &self,
        folder: &FolderPath,
    ) -> Result<FolderCapabilities, StoreError>;
    fn exists(&self, folder: &FolderPath) -> Result<bool, StoreError>;
    /// Create `folder`, able to hold both messages and folders. Its parent
    /// must exist. Creating a folder which already exists succeeds.
    fn create(&self, folder: &FolderPath) -> Result<(), StoreError>;
    /// The number of messages in `folder`, without opening it.
    fn message_count(&self, folder: &FolderPath) -> Result<usize, StoreError>;

    fn open(
        &self,
        folder: &FolderPath,
        mode: OpenMode,
    ) -> Result<Self::Session, StoreError>;

    /// Append the raw message `data` to `folder`.
    fn append(
        &self,
        folder: &FolderPath,
        data: &[u8],
        received: Option<DateTime<FixedOffset>>,
    ) -> Result<(), StoreError>;
}

/// An open folder.
///
/// Fetch operations return one item per requested message, in the order
/// requested.
pub trait FolderSession {
    /// All messages in the folder at the time it was opened.
    fn messages(&mut self) -> Result<Vec<MessageRef>, StoreError>;
    fn fetch_summaries(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<MessageSummary>, StoreError>;
    /// The raw header blocks of the given messages.
    fn fetch_headers(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<Vec<u8>>, StoreError>;
    /// The full raw content of the given messages.
    fn fetch_full(
        &mut self,
        messages: &[MessageRef],
    ) -> Result<Vec<Vec<u8>>, StoreError>;
    fn search(
        &mut self,
        query: &SearchQuery,
    ) -> Result<Vec<MessageRef>, StoreError>;
    /// Requires the folder to be open read-write.
    fn set_deleted(
        &mut self,
        message: MessageRef,
        deleted: bool,
    ) -> Result<(), StoreError>;
    /// Close the folder, removing messages flagged deleted if `expunge`.
    fn close(self, expunge: bool) -> Result<(), StoreError>;
}

/// What `walk` should do after visiting a folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    SkipChildren,
    Stop,
}

/// Visit `folder` and, recursively, all its sub-folders, depth first, parents
/// before children.
///
/// Returns `Flow::Stop` if some visit asked to stop.
pub fn walk<S, E, F>(
    store: &S,
    folder: &FolderPath,
    visit: &mut F,
) -> Result<Flow, E>
where
    S: MailStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&FolderPath, FolderCapabilities) -> Result<Flow, E>,
{
    let capabilities = store.capabilities(folder)?;
    match visit(folder, capabilities)? {
        Flow::Stop => return Ok(Flow::Stop),
        Flow::SkipChildren => return Ok(Flow::Continue),
        Flow::Continue => (),
    }

    if capabilities.holds_folders {
        for child in store.list_children(folder)? {
            if Flow::Stop == walk(store, &child, visit)? {
                return Ok(Flow::Stop);
            }
        }
    }

    Ok(Flow::Continue)
}
