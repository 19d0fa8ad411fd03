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

use std::io;

use thiserror::Error;

use crate::store::{MessageId, StoreError};
use crate::support::sysexits::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Messages from an interrupted run are still marked in progress")]
    InProgressNotEmpty,
    #[error("Concurrency limits must be at least 1")]
    BadConcurrency,
    #[error("Target root folder cannot hold both folders and messages")]
    TargetRootUnusable,
    #[error(
        "Message {0} has no date; other fields are not sufficiently \
         identifying"
    )]
    NoDate(MessageId),
    #[error(
        "Only {terms} search terms could be built for message {id}, \
         which is not enough to identify its copy"
    )]
    InsufficientIdentity { id: MessageId, terms: usize },
    #[error("A worker thread died")]
    WorkerPanicked,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// The process exit status to use when a run is aborted by this error.
    pub fn sysexit(&self) -> Sysexit {
        match *self {
            Error::InProgressNotEmpty
            | Error::NoDate(..)
            | Error::InsufficientIdentity { .. } => EX_DATAERR,
            Error::BadConcurrency => EX_CONFIG,
            Error::TargetRootUnusable => EX_CANTCREAT,
            Error::Io(..) => EX_IOERR,
            Error::Store(..) => EX_UNAVAILABLE,
            Error::WorkerPanicked => EX_SOFTWARE,
        }
    }
}
