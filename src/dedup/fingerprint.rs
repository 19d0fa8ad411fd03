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

use std::collections::BTreeSet;
use std::fmt;

use chrono::prelude::*;

use crate::mime::header::{self, Headers};

/// Headers shown when a fingerprint is displayed, in order.
const DISPLAY_HEADERS: &[&str] = &["Date", "From", "To", "Subject"];

/// The identity of a message for duplicate detection: the set of all its
/// `(name, value)` header pairs.
///
/// Two messages whose header sets are equal are taken to be copies of the
/// same message, regardless of the order their headers appear in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(BTreeSet<(String, String)>);

impl Fingerprint {
    pub fn of(headers: &Headers) -> Self {
        Fingerprint(
            headers
                .iter()
                .map(|(n, v)| (n.to_owned(), v.to_owned()))
                .collect(),
        )
    }

    /// Fingerprint the raw message or header block `raw`.
    pub fn parse(raw: &[u8]) -> Self {
        Self::of(&Headers::parse(raw))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first value of the header `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.get("Date").and_then(header::parse_date)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &name in DISPLAY_HEADERS {
            if let Some(value) = self.get(name) {
                writeln!(f, "{}: {}", name, value)?;
            }
        }
        Ok(())
    }
}
