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

//! Utilities for working with threads.
//!
//! Everything here is built on `crossbeam` channels and scoped threads. Work
//! is never handed to a global pool; whoever starts threads also waits for
//! them, and shared state is passed in by reference.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

/// A counting gate which bounds how many operations may execute at once.
///
/// The gate is a bounded channel pre-filled with one token per slot.
/// Acquiring takes a token, blocking while none is available; dropping the
/// resulting `GatePermit` puts it back.
///
/// The gate also tracks how many permits are outstanding and the most that
/// were ever outstanding at the same time.
pub struct Gate {
    tokens_send: Sender<()>,
    tokens_recv: Receiver<()>,
    active: AtomicUsize,
    high_water: AtomicUsize,
}

/// Proof of a slot in a `Gate`, released on drop.
pub struct GatePermit<'a> {
    gate: &'a Gate,
}

impl Gate {
    pub fn new(limit: usize) -> Self {
        let (tokens_send, tokens_recv) = channel::bounded(limit);
        for _ in 0..limit {
            tokens_send.send(()).unwrap();
        }

        Gate {
            tokens_send,
            tokens_recv,
            active: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Block until a slot is free, then take it.
    pub fn acquire(&self) -> GatePermit<'_> {
        // Both ends of the channel live in `self`, so it cannot disconnect.
        self.tokens_recv.recv().unwrap();
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(active, Ordering::SeqCst);
        GatePermit { gate: self }
    }

    /// The number of permits currently outstanding.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The largest number of permits that were ever outstanding at once.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
        // Can't fail for the same reason as in `acquire`, and can't block
        // since this permit's token is missing from the channel.
        let _ = self.gate.tokens_send.send(());
    }
}

/// Wait until every sender attached to `alive` has been dropped, calling
/// `tick` every `interval` in the meantime.
///
/// Worker threads each hold a clone of the sender and never send anything;
/// the channel disconnects once the last of them has exited, whether it
/// returned normally or unwound.
pub fn await_workers(
    alive: &Receiver<()>,
    interval: Duration,
    mut tick: impl FnMut(),
) {
    loop {
        match alive.recv_timeout(interval) {
            Ok(()) => continue,
            Err(RecvTimeoutError::Timeout) => tick(),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Run `work` on a separate thread, calling `tick` on the current thread
/// every `interval` until it completes, and once more at the end.
///
/// Returns `None` if `work` panicked.
pub fn run_with_progress<T: Send>(
    interval: Duration,
    work: impl FnOnce() -> T + Send,
    mut tick: impl FnMut(),
) -> Option<T> {
    let (result_send, result_recv) = channel::bounded(1);
    crossbeam::scope(|s| {
        s.spawn(move |_| {
            let _ = result_send.send(work());
        });

        loop {
            match result_recv.recv_timeout(interval) {
                Ok(result) => {
                    tick();
                    return Some(result);
                },
                Err(RecvTimeoutError::Timeout) => tick(),
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    })
    .ok()
    .flatten()
}
