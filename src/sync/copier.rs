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

//! The concurrent copy engine.
//!
//! ## Threads
//!
//! Copying is split between producers, which read from the source, and
//! consumers, which write to the target.
//!
//! There is a fixed number of producers, each taking one source folder at a
//! time from a shared queue. A producer opens its folder read-only, fetches
//! the summaries of the messages it is to copy, and then fetches their
//! content. Small messages are fetched in batches; large ones one at a time.
//!
//! Each fetched message is resolved to its target folder and handed to the
//! consumer for that folder. There is exactly one consumer per target folder,
//! started by whichever producer first needs it, so all appends to a folder
//! happen in order on one thread. The number of appends executing at once
//! across all consumers is bounded by a `Gate`.
//!
//! The thread running `Copier::run` does nothing but wait and report
//! progress: first for all producers to exit, then, once it has closed every
//! consumer's queue, for all consumers to exit.
//!
//! ## Failure
//!
//! There is no cancellation. The first fatal error is recorded and the run
//! stops starting new work: producers stop reading, and consumers discard
//! whatever is still queued for them. The error is returned once every
//! thread has exited. The in-progress set is cleared only if the whole run
//! succeeded, so a failed run is rolled back the next time.
//!
//! ## Per-message states
//!
//! A message is added to the in-progress set right before it is appended,
//! and to the done set after the append succeeded and its size has been
//! counted. Only then is it considered finished.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::prelude::*;
use crossbeam::channel::{self, Sender};
use crossbeam::thread::Scope;
use log::{debug, error, info, warn};

use super::id_set::IdSet;
use super::label_path::{LabelRules, TargetPath};
use super::plan::Plan;
use super::progress::{self, RateMeter};
use crate::store::{
    Attempt, FolderPath, FolderSession, MailStore, MessageId, MessageSummary,
    OpenMode, StoreError,
};
use crate::support::error::Error;
use crate::support::system_config::CopyConfig;
use crate::support::threading::{await_workers, Gate};

/// How many times an operation failing with a retryable error is retried.
pub const MAX_RETRIES: u32 = 1;

/// How many fetched messages may wait for each consumer.
const CONSUMER_QUEUE_SIZE: usize = 16;

/// Run `op` against `store`, reconnecting and retrying up to `MAX_RETRIES`
/// times if it fails with a retryable error.
pub fn with_retry<S: MailStore + ?Sized, R>(
    store: &S,
    what: &str,
    mut op: impl FnMut() -> Result<R, StoreError>,
) -> Result<R, Error> {
    let mut retries = 0;
    loop {
        match Attempt::from(op()) {
            Attempt::Ok(result) => return Ok(result),
            Attempt::Retryable(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!("{}: {}; reconnecting and retrying", what, e);
                store.connect()?;
            },
            Attempt::Retryable(e) | Attempt::Fatal(e) => {
                error!("{}: {}", what, e);
                return Err(e.into());
            },
        }
    }
}

/// Make sure `root` exists in `target` and can be copied into, creating it
/// and any missing parents if needed.
pub fn prepare_target_root<T: MailStore>(
    target: &T,
    root: &FolderPath,
) -> Result<(), Error> {
    let mut path = FolderPath::root();
    for segment in root.segments() {
        path = path.child(segment);
        if !target.exists(&path)? {
            info!("Creating target folder '{}'", path);
            target.create(&path)?;
        }
    }

    Ok(())
}

/// Statistics about a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyStats {
    pub messages: usize,
    pub bytes: u64,
    /// The most appends that were ever executing at the same time.
    pub max_concurrent: usize,
    pub elapsed: Duration,
}

/// A fetched message on its way to a consumer.
#[derive(Debug)]
struct CopyUnit {
    id: MessageId,
    size: u64,
    received: Option<DateTime<FixedOffset>>,
    data: Vec<u8>,
}

/// State shared by all threads of a run.
struct Shared {
    gate: Gate,
    bytes: AtomicU64,
    finished: AtomicUsize,
    aborted: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl Shared {
    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Record `e` as the cause of failure unless something else got there
    /// first, and stop the run.
    fn fail(&self, e: Error) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        } else {
            debug!("Additional error after abort: {}", e);
        }
    }
}

/// The queues of running consumers, by target folder.
struct Consumers {
    senders: Mutex<HashMap<TargetPath, Sender<CopyUnit>>>,
    /// Cloned into every consumer; `None` once no more may be started.
    alive: Mutex<Option<Sender<()>>>,
}

impl Consumers {
    /// Close every consumer's queue, letting them exit once they have
    /// drained it.
    fn close(&self) {
        self.senders.lock().unwrap().clear();
        self.alive.lock().unwrap().take();
    }
}

/// Per-consumer cache of target folders known to exist.
#[derive(Debug, Default)]
struct WorkerContext {
    known_folders: HashSet<FolderPath>,
}

impl WorkerContext {
    /// Create `folder` and any of its ancestors below `root` which do not
    /// exist yet.
    fn ensure_folder<T: MailStore>(
        &mut self,
        target: &T,
        root: &FolderPath,
        folder: &FolderPath,
    ) -> Result<(), StoreError> {
        if self.known_folders.contains(folder) {
            return Ok(());
        }

        let mut path = root.clone();
        for segment in folder.segments().iter().skip(root.segments().len()) {
            path = path.child(segment);
            if self.known_folders.contains(&path) {
                continue;
            }

            if !target.exists(&path)? {
                info!("Creating folder '{}'", path);
                target.create(&path)?;
            }
            self.known_folders.insert(path.clone());
        }

        Ok(())
    }
}

/// A source folder being read by a producer, reopened as needed after the
/// connection drops.
struct SourceFolder<'a, S: MailStore> {
    store: &'a S,
    folder: &'a FolderPath,
    session: Option<S::Session>,
}

impl<'a, S: MailStore> SourceFolder<'a, S> {
    fn new(store: &'a S, folder: &'a FolderPath) -> Self {
        SourceFolder {
            store,
            folder,
            session: None,
        }
    }

    fn with_session<R>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut S::Session) -> Result<R, StoreError>,
    ) -> Result<R, Error> {
        let store = self.store;
        let folder = self.folder;
        let session = &mut self.session;

        with_retry(store, what, || {
            let mut s = match session.take() {
                Some(s) => s,
                None => store.open(folder, OpenMode::ReadOnly)?,
            };

            let result = op(&mut s);
            match result {
                // The session is unusable; drop it and reopen on retry
                Err(ref e) if e.is_retryable() => (),
                _ => *session = Some(s),
            }
            result
        })
    }

    fn close(self) {
        if let Some(session) = self.session {
            if let Err(e) = session.close(false) {
                warn!("Failed to close source folder '{}': {}", self.folder, e);
            }
        }
    }
}

pub struct Copier<'a, S, T> {
    source: &'a S,
    target: &'a T,
    target_root: &'a FolderPath,
    rules: &'a LabelRules,
    config: &'a CopyConfig,
    done: &'a IdSet,
    in_progress: &'a IdSet,
}

impl<'a, S: MailStore, T: MailStore> Copier<'a, S, T> {
    /// Set up a copy into `target_root` of `target`.
    ///
    /// Fails if the in-progress set is not empty (i.e., an interrupted run has
    /// not been rolled back), if either concurrency limit is zero, or if the
    /// target root cannot hold both folders and messages.
    pub fn new(
        source: &'a S,
        target: &'a T,
        target_root: &'a FolderPath,
        rules: &'a LabelRules,
        config: &'a CopyConfig,
        done: &'a IdSet,
        in_progress: &'a IdSet,
    ) -> Result<Self, Error> {
        if !in_progress.is_empty() {
            return Err(Error::InProgressNotEmpty);
        }

        if 0 == config.source_concurrency || 0 == config.target_concurrency {
            return Err(Error::BadConcurrency);
        }

        let caps = target.capabilities(target_root)?;
        if !caps.holds_folders || !caps.holds_messages {
            return Err(Error::TargetRootUnusable);
        }

        Ok(Copier {
            source,
            target,
            target_root,
            rules,
            config,
            done,
            in_progress,
        })
    }

    /// Copy everything in `plan`.
    pub fn run(&self, plan: &Plan) -> Result<CopyStats, Error> {
        let start = Instant::now();
        let total = plan.todo.len();
        info!(
            "Copying {} messages with {} readers and {} writers",
            total,
            self.config.source_concurrency,
            self.config.target_concurrency
        );

        let shared = Shared {
            gate: Gate::new(self.config.target_concurrency),
            bytes: AtomicU64::new(0),
            finished: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            error: Mutex::new(None),
        };
        let jobs = Mutex::new(plan.by_folder().into_iter());

        let (producers_alive_send, producers_alive) = channel::bounded::<()>(0);
        let (consumers_alive_send, consumers_alive) = channel::bounded::<()>(0);
        let consumers = Consumers {
            senders: Mutex::new(HashMap::new()),
            alive: Mutex::new(Some(consumers_alive_send)),
        };

        let mut meter = RateMeter::starting_at(start);
        let mut tick = || {
            progress::show(&meter.line(
                shared.finished.load(Ordering::SeqCst),
                total,
                shared.bytes.load(Ordering::SeqCst),
            ));
        };

        let scope_result = crossbeam::scope(|scope| {
            for _ in 0..self.config.source_concurrency {
                let alive = producers_alive_send.clone();
                let (shared, jobs, consumers) = (&shared, &jobs, &consumers);
                scope.spawn(move |scope| {
                    let _alive = alive;
                    self.run_producer(scope, shared, jobs, consumers);
                });
            }
            drop(producers_alive_send);

            let refresh_rate = self.config.refresh_rate();
            await_workers(&producers_alive, refresh_rate, &mut tick);
            debug!("All producers done");
            consumers.close();
            await_workers(&consumers_alive, refresh_rate, &mut tick);
            debug!("All consumers done");
        });
        tick();
        progress::finish();

        if scope_result.is_err() {
            return Err(Error::WorkerPanicked);
        }

        if let Some(e) = shared.error.into_inner().unwrap() {
            error!(
                "Copy aborted after {} messages: {}",
                shared.finished.load(Ordering::SeqCst),
                e
            );
            return Err(e);
        }

        self.in_progress.clear()?;

        let stats = CopyStats {
            messages: shared.finished.into_inner(),
            bytes: shared.bytes.into_inner(),
            max_concurrent: shared.gate.high_water(),
            elapsed: start.elapsed(),
        };
        info!(
            "Copied {} messages ({}) in {:.1}s",
            stats.messages,
            progress::human_readable_size(stats.bytes),
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }

    fn run_producer<'env, I>(
        &'env self,
        scope: &Scope<'env>,
        shared: &'env Shared,
        jobs: &Mutex<I>,
        consumers: &'env Consumers,
    ) where
        I: Iterator<Item = (FolderPath, HashSet<MessageId>)>,
    {
        while !shared.aborted() {
            let job = jobs.lock().unwrap().next();
            let (folder, ids) = match job {
                Some(job) => job,
                None => break,
            };

            if let Err(e) =
                self.produce(scope, shared, consumers, &folder, &ids)
            {
                shared.fail(e);
            }
        }
    }

    fn produce<'env>(
        &'env self,
        scope: &Scope<'env>,
        shared: &'env Shared,
        consumers: &'env Consumers,
        folder: &FolderPath,
        ids: &HashSet<MessageId>,
    ) -> Result<(), Error> {
        debug!("Reading {} messages from '{}'", ids.len(), folder);
        let mut source = SourceFolder::new(self.source, folder);

        let summaries = source.with_session(
            &format!("Listing messages in '{}'", folder),
            |session| {
                let messages = session.messages()?;
                session.fetch_summaries(&messages)
            },
        )?;

        let mut batch = Vec::<MessageSummary>::new();
        let mut batch_size = 0u64;
        for summary in summaries {
            if shared.aborted() {
                break;
            }

            if !ids.contains(&summary.id) {
                continue;
            }

            if summary.size < self.config.small_message_size {
                batch_size += summary.size;
                batch.push(summary);
                if batch_size > self.config.small_message_batch_size {
                    self.dispatch(
                        scope,
                        shared,
                        consumers,
                        &mut source,
                        std::mem::take(&mut batch),
                    )?;
                    batch_size = 0;
                }
            } else {
                self.dispatch(
                    scope,
                    shared,
                    consumers,
                    &mut source,
                    vec![summary],
                )?;
            }
        }

        if !batch.is_empty() && !shared.aborted() {
            self.dispatch(scope, shared, consumers, &mut source, batch)?;
        }

        source.close();
        Ok(())
    }

    /// Fetch the content of `summaries` and hand each to its consumer.
    fn dispatch<'env>(
        &'env self,
        scope: &Scope<'env>,
        shared: &'env Shared,
        consumers: &'env Consumers,
        source: &mut SourceFolder<'_, S>,
        summaries: Vec<MessageSummary>,
    ) -> Result<(), Error> {
        if !self.target.is_connected() {
            info!("Reconnecting to target");
            self.target.connect()?;
        }

        let refs = summaries.iter().map(|s| s.message).collect::<Vec<_>>();
        let what = format!(
            "Fetching {} messages from '{}'",
            refs.len(),
            source.folder
        );
        let contents =
            source.with_session(&what, |session| session.fetch_full(&refs))?;

        for (summary, data) in summaries.into_iter().zip(contents) {
            let target = self.rules.resolve(source.folder, &summary.labels);
            let sender = self.consumer_for(scope, shared, consumers, &target);
            sender
                .send(CopyUnit {
                    id: summary.id,
                    size: summary.size,
                    received: summary.received,
                    data,
                })
                .map_err(|_| Error::WorkerPanicked)?;
        }

        Ok(())
    }

    /// Return the queue of the consumer for `target`, starting the consumer
    /// if there is none yet.
    fn consumer_for<'env>(
        &'env self,
        scope: &Scope<'env>,
        shared: &'env Shared,
        consumers: &'env Consumers,
        target: &TargetPath,
    ) -> Sender<CopyUnit> {
        let mut senders = consumers.senders.lock().unwrap();
        if let Some(sender) = senders.get(target) {
            return sender.clone();
        }

        let (sender, receiver) = channel::bounded(CONSUMER_QUEUE_SIZE);
        let alive = consumers.alive.lock().unwrap().clone();
        let folder = target.under(self.target_root);
        debug!("Starting writer for '{}'", folder);

        scope.spawn(move |_| {
            let _alive = alive;
            let mut context = WorkerContext::default();
            for unit in receiver {
                if shared.aborted() {
                    // Drain so producers never block on a full queue
                    continue;
                }

                if let Err(e) =
                    self.consume(&mut context, shared, &folder, unit)
                {
                    shared.fail(e);
                }
            }
        });

        senders.insert(target.clone(), sender.clone());
        sender
    }

    fn consume(
        &self,
        context: &mut WorkerContext,
        shared: &Shared,
        folder: &FolderPath,
        unit: CopyUnit,
    ) -> Result<(), Error> {
        if self.done.contains(unit.id) {
            debug!("Message {} already copied", unit.id);
            return Ok(());
        }

        let _permit = shared.gate.acquire();
        self.in_progress.add(unit.id)?;

        let target = self.target;
        let root = self.target_root;
        with_retry(
            target,
            &format!("Copying message {} to '{}'", unit.id, folder),
            || {
                context.ensure_folder(target, root, folder)?;
                target.append(folder, &unit.data, unit.received)
            },
        )?;

        shared.bytes.fetch_add(unit.size, Ordering::SeqCst);
        self.done.add(unit.id)?;
        shared.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
