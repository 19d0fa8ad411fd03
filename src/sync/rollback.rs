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

//! Undoing the copies an interrupted run may have left behind.
//!
//! A message is added to the in-progress set just before it is appended to
//! the target and to the done set just after. If the run dies in between,
//! the target may or may not hold a copy, and the next run will copy it
//! again since it is not done. To avoid ending up with two copies, every
//! such message is looked up in the source, and anything in the target that
//! looks like it is deleted before planning starts.
//!
//! The target store knows nothing of source ids, so "looks like" means
//! matching on the sent and received dates plus the sender, recipients and
//! subject. If a message lacks enough of those to be identified safely, the
//! whole run is aborted rather than risk deleting something else.

use std::collections::BTreeSet;

use chrono::prelude::*;
use log::{info, warn};

use super::id_set::IdSet;
use crate::mime::header::Headers;
use crate::store::{
    walk, Flow, FolderPath, FolderSession, MailStore, MessageId, OpenMode,
    SearchQuery, StoreError,
};
use crate::support::error::Error;

/// The fewest conjuncts an identity query may have.
const MIN_IDENTITY_TERMS: usize = 4;

/// The headers and received date of a source message.
type SourceMessage = (Headers, Option<DateTime<FixedOffset>>);

pub struct Rollback<'a, S, T> {
    source: &'a S,
    target: &'a T,
    target_root: &'a FolderPath,
    done: &'a IdSet,
    in_progress: &'a IdSet,
}

impl<'a, S: MailStore, T: MailStore> Rollback<'a, S, T> {
    pub fn new(
        source: &'a S,
        target: &'a T,
        target_root: &'a FolderPath,
        done: &'a IdSet,
        in_progress: &'a IdSet,
    ) -> Self {
        Rollback {
            source,
            target,
            target_root,
            done,
            in_progress,
        }
    }

    /// Delete whatever the target holds of messages left in progress, then
    /// clear the in-progress set.
    ///
    /// Returns the number of target messages deleted.
    pub fn run(&self) -> Result<usize, Error> {
        let done = self.done.snapshot();
        let pending = self
            .in_progress
            .snapshot()
            .into_iter()
            .filter(|id| !done.contains(id))
            .collect::<BTreeSet<_>>();

        if pending.is_empty() {
            info!("No incomplete copies to roll back");
        } else {
            warn!(
                "Rolling back {} possibly incomplete copies",
                pending.len()
            );
        }

        let mut deleted = 0;
        for &id in &pending {
            deleted += self.roll_back(id)?;
        }

        self.in_progress.clear()?;
        info!("Rollback complete, {} messages deleted", deleted);
        Ok(deleted)
    }

    fn roll_back(&self, id: MessageId) -> Result<usize, Error> {
        info!("Looking up message {} in source", id);
        let (headers, received) = match self.find_source(id)? {
            Some(found) => found,
            None => {
                warn!(
                    "Message {} no longer exists in source; \
                     leaving the target as it is",
                    id
                );
                return Ok(0);
            },
        };

        let query = identity_query(id, &headers, received)?;
        let mut deleted = 0;

        let target = self.target;
        walk::<_, Error, _>(target, self.target_root, &mut |folder, caps| {
            if !caps.holds_messages {
                return Ok(Flow::Continue);
            }

            let mut session = target.open(folder, OpenMode::ReadWrite)?;
            let hits = session.search(&query)?;
            for &hit in &hits {
                info!("Deleting copy of message {} in '{}'", id, folder);
                session.set_deleted(hit, true)?;
            }
            session.close(!hits.is_empty())?;
            deleted += hits.len();
            Ok(Flow::Continue)
        })?;

        if 0 == deleted {
            info!("No copy of message {} found in target", id);
        }
        Ok(deleted)
    }

    fn find_source(
        &self,
        id: MessageId,
    ) -> Result<Option<SourceMessage>, Error> {
        let mut found = None;
        let query = SearchQuery::MessageId(id);
        let root = FolderPath::root();

        walk::<_, Error, _>(self.source, &root, &mut |folder, caps| {
            if !caps.holds_messages {
                return Ok(Flow::Continue);
            }

            let mut session = self.source.open(folder, OpenMode::ReadOnly)?;
            let hits = session.search(&query)?;
            if let Some(&hit) = hits.first() {
                let summary = session
                    .fetch_summaries(&[hit])?
                    .pop()
                    .ok_or(StoreError::NxMessage)?;
                let raw = session
                    .fetch_headers(&[hit])?
                    .pop()
                    .ok_or(StoreError::NxMessage)?;
                info!("Found message {} in '{}'", id, folder);
                found = Some((Headers::parse(&raw), summary.received));
            }
            session.close(false)?;

            Ok(if found.is_some() {
                Flow::Stop
            } else {
                Flow::Continue
            })
        })?;

        Ok(found)
    }
}

/// Build the query used to find copies of the message with the given
/// headers and received date in the target.
///
/// Fails if the message has no date at all, or if fewer than four terms can
/// be built.
pub fn identity_query(
    id: MessageId,
    headers: &Headers,
    received: Option<DateTime<FixedOffset>>,
) -> Result<SearchQuery, Error> {
    let mut terms = Vec::new();

    if let Some(sent) = headers.date() {
        terms.push(SearchQuery::SentOn(sent.naive_local().date()));
    }
    if let Some(received) = received {
        terms.push(SearchQuery::ReceivedOn(received.naive_utc().date()));
    }
    if terms.is_empty() {
        return Err(Error::NoDate(id));
    }

    terms.extend(
        headers
            .addresses("From")
            .into_iter()
            .map(SearchQuery::From),
    );
    terms.extend(headers.addresses("To").into_iter().map(SearchQuery::To));
    terms.extend(headers.addresses("Cc").into_iter().map(SearchQuery::Cc));
    // An empty subject still counts; it only matches messages which have a
    // Subject header at all.
    if let Some(subject) = headers.subject() {
        terms.push(SearchQuery::Subject(subject.to_owned()));
    }

    if terms.len() < MIN_IDENTITY_TERMS {
        return Err(Error::InsufficientIdentity {
            id,
            terms: terms.len(),
        });
    }

    Ok(SearchQuery::And(terms))
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::store::memory::*;

    const MESSAGE: &[u8] = b"Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\
        From: Alice <alice@example.com>\r\n\
        To: bob@example.org\r\n\
        Subject: Quarterly report\r\n\
        \r\n\
        Numbers.\r\n";

    const OTHER: &[u8] = b"Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\
        From: Alice <alice@example.com>\r\n\
        To: bob@example.org\r\n\
        Subject: Lunch\r\n\
        \r\n\
        Soup.\r\n";

    fn received() -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339("2017-03-14T08:27:00Z").ok()
    }

    struct Fixture {
        _tmp: TempDir,
        source: MemoryStore,
        target: MemoryStore,
        done: IdSet,
        in_progress: IdSet,
    }

    fn fixture() -> Fixture {
        crate::init_test_log();

        let tmp = TempDir::new().unwrap();
        let done = IdSet::open(tmp.path().join("done.dat")).unwrap();
        let in_progress =
            IdSet::open(tmp.path().join("in-progress.dat")).unwrap();

        let source = MemoryStore::new(BOTH);
        source.add_folder("INBOX", BOTH);
        source.add_message("INBOX", 42, &["Work"], MESSAGE, received());
        source.add_message("INBOX", 43, &["Work"], OTHER, received());

        let target = MemoryStore::new(BOTH);
        target.add_folder("Work", BOTH);

        Fixture {
            _tmp: tmp,
            source,
            target,
            done,
            in_progress,
        }
    }

    fn run(f: &Fixture) -> Result<usize, Error> {
        let root = FolderPath::root();
        Rollback::new(&f.source, &f.target, &root, &f.done, &f.in_progress)
            .run()
    }

    #[test]
    fn partial_copy_is_deleted() {
        let f = fixture();
        let work = FolderPath::parse("Work", '/');
        f.target.append(&work, MESSAGE, received()).unwrap();
        f.target.append(&work, OTHER, received()).unwrap();
        f.in_progress.add(MessageId(42)).unwrap();

        assert_eq!(1, run(&f).unwrap());
        assert_eq!(vec![OTHER.to_vec()], f.target.messages_in("Work"));
        assert!(f.in_progress.is_empty());
    }

    #[test]
    fn done_messages_are_not_rolled_back() {
        let f = fixture();
        let work = FolderPath::parse("Work", '/');
        f.target.append(&work, MESSAGE, received()).unwrap();
        f.in_progress.add(MessageId(42)).unwrap();
        f.done.add(MessageId(42)).unwrap();

        assert_eq!(0, run(&f).unwrap());
        assert_eq!(1, f.target.total_messages());
        assert!(f.in_progress.is_empty());
    }

    #[test]
    fn missing_copy_and_missing_source_are_fine() {
        let f = fixture();
        f.in_progress.add(MessageId(42)).unwrap();
        f.in_progress.add(MessageId(99)).unwrap();

        assert_eq!(0, run(&f).unwrap());
        assert!(f.in_progress.is_empty());
    }

    #[test]
    fn undated_message_aborts() {
        let f = fixture();
        f.source.add_message(
            "INBOX",
            7,
            &[],
            b"From: a@b.c\r\nTo: d@e.f\r\nSubject: x\r\n\r\n",
            None,
        );
        f.in_progress.add(MessageId(7)).unwrap();

        assert_matches!(Err(Error::NoDate(MessageId(7))), run(&f));
        assert!(f.in_progress.contains(MessageId(7)));
    }

    #[test]
    fn identity_needs_four_terms() {
        let headers =
            Headers::parse(b"Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\r\n");
        assert_matches!(
            Err(Error::InsufficientIdentity {
                terms: 2,
                ..
            }),
            identity_query(MessageId(1), &headers, received())
        );

        let headers = Headers::parse(MESSAGE);
        let query =
            identity_query(MessageId(1), &headers, received()).unwrap();
        let day = NaiveDate::from_ymd_opt(2017, 3, 14).unwrap();
        assert_eq!(
            SearchQuery::And(vec![
                SearchQuery::SentOn(day),
                SearchQuery::ReceivedOn(day),
                SearchQuery::From("alice@example.com".to_owned()),
                SearchQuery::To("bob@example.org".to_owned()),
                SearchQuery::Subject("Quarterly report".to_owned()),
            ]),
            query
        );
    }

    #[test]
    fn empty_subject_is_an_identity_term() {
        let headers = Headers::parse(
            b"Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\
              From: alice@example.com\r\n\
              To: bob@example.org\r\n\
              Subject: \r\n\
              \r\n",
        );
        let query = identity_query(MessageId(1), &headers, None).unwrap();
        let day = NaiveDate::from_ymd_opt(2017, 3, 14).unwrap();
        assert_eq!(
            SearchQuery::And(vec![
                SearchQuery::SentOn(day),
                SearchQuery::From("alice@example.com".to_owned()),
                SearchQuery::To("bob@example.org".to_owned()),
                SearchQuery::Subject(String::new()),
            ]),
            query
        );

        assert!(query.matches(MessageId(2), &headers, None));
        let no_subject = Headers::parse(
            b"Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\
              From: alice@example.com\r\n\
              To: bob@example.org\r\n\
              \r\n",
        );
        assert!(!query.matches(MessageId(2), &no_subject, None));
    }
}
