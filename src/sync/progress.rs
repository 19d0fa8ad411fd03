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

//! The status line shown while a long operation runs.
//!
//! Status lines go straight to stderr, each starting with `\r` so that it
//! overwrites the previous one. They are not log output.

use std::io::{self, Write};
use std::time::Instant;

/// Format a byte count for humans.
///
/// Integer division throughout; the unit is chosen so that at most four
/// digits are shown before switching to the next one.
pub fn human_readable_size(bytes: u64) -> String {
    if bytes < 10_000 {
        return format!("{} B", bytes);
    }

    let kib = bytes / 1024;
    if kib < 10_000 {
        return format!("{} KiB", kib);
    }

    format!("{} MiB", kib / 1024)
}

/// Overwrite the current status line.
pub fn show(line: &str) {
    let stderr = io::stderr();
    let mut stderr = stderr.lock();
    let _ = write!(stderr, "{}", line);
    let _ = stderr.flush();
}

/// End the current status line so later output starts on a fresh one.
pub fn finish() {
    eprintln!();
}

fn percent(done: usize, total: usize) -> f64 {
    if 0 == total {
        100.0
    } else {
        (done as f64 * 100.0 / total as f64).min(100.0)
    }
}

pub fn counting_line(found: usize) -> String {
    format!("\rCounting messages... {} found", found)
}

pub fn planning_line(scanned: usize, total: usize) -> String {
    format!("\rComputing what to copy... {:5.1}%", percent(scanned, total))
}

/// Tracks the transfer rate of a copy.
#[derive(Clone, Copy, Debug)]
pub struct RateMeter {
    started: Instant,
    last_sample: Instant,
    last_bytes: u64,
}

impl RateMeter {
    pub fn starting_at(now: Instant) -> Self {
        RateMeter {
            started: now,
            last_sample: now,
            last_bytes: 0,
        }
    }

    /// Produce the status line for `finished` out of `total` messages copied
    /// so far, totalling `bytes` bytes.
    pub fn line(
        &mut self,
        finished: usize,
        total: usize,
        bytes: u64,
    ) -> String {
        self.line_at(Instant::now(), finished, total, bytes)
    }

    pub fn line_at(
        &mut self,
        now: Instant,
        finished: usize,
        total: usize,
        bytes: u64,
    ) -> String {
        let since_last = now.duration_since(self.last_sample).as_secs_f64();
        let since_start = now.duration_since(self.started).as_secs_f64();

        let current = rate(bytes.saturating_sub(self.last_bytes), since_last);
        let average = rate(bytes, since_start);
        self.last_sample = now;
        self.last_bytes = bytes;

        format!(
            "\r{:5.1}% done ({} copied, current rate: {}/s, \
             average rate: {}/s)          ",
            percent(finished, total),
            human_readable_size(bytes),
            human_readable_size(current),
            human_readable_size(average)
        )
    }
}

fn rate(bytes: u64, seconds: f64) -> u64 {
    if seconds <= 0.0 {
        0
    } else {
        (bytes as f64 / seconds) as u64
    }
}
