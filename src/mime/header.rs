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

//! Utilities for working with the header block of RFC 2822 messages.
//!
//! This is deliberately shallow. Nothing here decodes encoded words or
//! validates syntax; header values are kept as they appear on the wire (minus
//! line folding) so that two copies of the same message produce identical
//! values.

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;

/// The header mail exports use to record the labels of a message.
pub const LABELS_HEADER: &str = "X-Gmail-Labels";

lazy_static! {
    static ref ADDRESS: Regex =
        Regex::new(r#"[^\s<>()\[\]",;:]+@[^\s<>()\[\]",;:]+"#).unwrap();
}

/// Return the header block of `message`, i.e., everything before the first
/// empty line.
///
/// If there is no empty line, the whole message is taken to be headers.
pub fn header_block(message: &[u8]) -> &[u8] {
    let mut start = 0;
    while let Some(nl) = memchr::memchr(b'\n', &message[start..]) {
        let end = start + nl + 1;
        let line = &message[start..end];
        if b"\n" == line || b"\r\n" == line {
            return &message[..start];
        }
        start = end;
    }

    message
}

/// The headers of a message, in the order they appear.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Parse the headers at the start of `raw`, which may be a whole message
    /// or just its header block.
    ///
    /// Continuation lines are unfolded by removing the line ending only. Lines
    /// which are neither continuations nor have a colon (such as an mbox
    /// `From ` line) are skipped.
    pub fn parse(raw: &[u8]) -> Self {
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in header_block(raw).split(|&b| b'\n' == b) {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            if b' ' == line[0] || b'\t' == line[0] {
                if let Some(&mut (_, ref mut value)) = fields.last_mut() {
                    value.push_str(&String::from_utf8_lossy(line));
                }
                continue;
            }

            let colon = match memchr::memchr(b':', line) {
                Some(colon) => colon,
                None => continue,
            };

            let name = String::from_utf8_lossy(&line[..colon]);
            let name = name.trim_end();
            if name.is_empty() || name.contains(' ') {
                continue;
            }

            let value = String::from_utf8_lossy(&line[colon + 1..]);
            fields.push((name.to_owned(), value.trim_start().to_owned()));
        }

        Headers { fields }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.fields.iter().map(|&(ref n, ref v)| (&n[..], &v[..]))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Return the value of the first header called `name`, compared
    /// case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    pub fn get_all<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.iter()
            .filter(move |&(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// The parsed `Date` header, if there is one and it can be understood.
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.get("Date").and_then(parse_date)
    }

    pub fn subject(&self) -> Option<&str> {
        self.get("Subject")
    }

    /// Every bare address found in all headers called `name`.
    pub fn addresses(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .flat_map(|v| ADDRESS.find_iter(v))
            .map(|m| m.as_str().to_owned())
            .collect()
    }

    /// The labels recorded in the `X-Gmail-Labels` header(s).
    pub fn labels(&self) -> Vec<String> {
        self.get_all(LABELS_HEADER).flat_map(split_labels).collect()
    }
}

/// Parse an RFC 2822 date, tolerating a trailing comment such as `(UTC)`.
pub fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s).ok().or_else(|| {
        let comment = s.find('(')?;
        DateTime::parse_from_rfc2822(s[..comment].trim()).ok()
    })
}

/// Split a comma-separated label list. Labels containing commas are
/// double-quoted.
fn split_labels(value: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in value.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                labels.push(std::mem::take(&mut current));
            },
            ch => current.push(ch),
        }
    }
    labels.push(current);

    labels
        .into_iter()
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const MESSAGE: &[u8] = b"Return-Path: <alice@example.com>\r\n\
        Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\
        From: \"Doe, Alice\" <alice@example.com>\r\n\
        To: bob@example.org,\r\n \
        Carol <carol@example.net>\r\n\
        Subject: Quarterly\r\n\
        \t report\r\n\
        X-Gmail-Labels: Inbox,Important,\"Clients, old\",Projects/Alpha\r\n\
        \r\n\
        Not: a header\r\n";

    #[test]
    fn header_block_stops_at_blank_line() {
        assert_eq!(b"A: b\r\n", header_block(b"A: b\r\n\r\nbody"));
        assert_eq!(b"A: b\n", header_block(b"A: b\n\nbody\n\n"));
        assert_eq!(b"A: b", header_block(b"A: b"));
        assert_eq!(b"", header_block(b"\r\nbody"));
    }

    #[test]
    fn parse_unfolds_and_preserves_order() {
        let headers = Headers::parse(MESSAGE);
        let names = headers.iter().map(|(n, _)| n).collect::<Vec<_>>();
        assert_eq!(
            vec![
                "Return-Path",
                "Date",
                "From",
                "To",
                "Subject",
                "X-Gmail-Labels"
            ],
            names
        );
        assert_eq!(
            Some("bob@example.org, Carol <carol@example.net>"),
            headers.get("to")
        );
        assert_eq!(Some("Quarterly\t report"), headers.subject());
        assert_eq!(None, headers.get("Not"));
    }

    #[test]
    fn parse_skips_mbox_from_line() {
        let headers =
            Headers::parse(b"From alice@example.com Thu Jan  1\nSubject: x\n");
        assert_eq!(1, headers.len());
        assert_eq!(Some("x"), headers.get("Subject"));
    }

    #[test]
    fn addresses_are_extracted() {
        let headers = Headers::parse(MESSAGE);
        assert_eq!(vec!["alice@example.com"], headers.addresses("From"));
        assert_eq!(
            vec!["bob@example.org", "carol@example.net"],
            headers.addresses("To")
        );
        assert!(headers.addresses("Cc").is_empty());
    }

    #[test]
    fn labels_honour_quotes() {
        let headers = Headers::parse(MESSAGE);
        assert_eq!(
            vec!["Inbox", "Important", "Clients, old", "Projects/Alpha"],
            headers.labels()
        );
    }

    #[test]
    fn dates() {
        let headers = Headers::parse(MESSAGE);
        let date = headers.date().unwrap();
        assert_eq!(2017, date.year());
        assert_eq!(3600, date.offset().local_minus_utc());

        assert!(parse_date("Mon, 2 Jan 2006 15:04:05 +0000 (UTC)").is_some());
        assert!(parse_date("yesterday").is_none());
        assert!(Headers::parse(b"Subject: x\r\n").date().is_none());
    }
}
