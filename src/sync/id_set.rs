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

//! A set of message ids persisted to an append-only file.
//!
//! The file is a flat sequence of little-endian 64-bit records, one per id,
//! in the order they were added. There is no header and no compaction; the
//! only way to shrink the file is `clear`.
//!
//! A crash can leave a partial record at the end of the file. Replaying the
//! file stops at the last complete record and the partial one is truncated
//! away, since the id it was recording was never reported as added.

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::warn;

use crate::store::MessageId;
use crate::support::file_ops::ReadUninterruptibly;

const RECORD_SIZE: u64 = 8;

#[derive(Debug)]
pub struct IdSet {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    ids: HashSet<MessageId>,
    file: fs::File,
    /// The length of the valid prefix of `file`.
    len: u64,
}

impl IdSet {
    /// Open the set stored at `path`, creating an empty one if the file does
    /// not exist.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut ids = HashSet::new();
        let mut len = 0u64;
        {
            let mut reader = BufReader::new(&mut file);
            let mut record = [0u8; RECORD_SIZE as usize];
            loop {
                let nread = reader.read_uninteruptibly(&mut record)?;
                if record.len() == nread {
                    ids.insert(MessageId(LittleEndian::read_u64(&record)));
                    len += RECORD_SIZE;
                } else {
                    if 0 != nread {
                        warn!(
                            "{}: discarding truncated record of {} bytes \
                             at offset {}",
                            path.display(),
                            nread,
                            len
                        );
                    }
                    break;
                }
            }
        }

        file.set_len(len)?;
        file.seek(SeekFrom::Start(len))?;

        Ok(IdSet {
            path,
            inner: Mutex::new(Inner { ids, file, len }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.inner.lock().unwrap().ids.contains(&id)
    }

    /// Add `id` to the set.
    ///
    /// The id is durably written before this returns. Returns whether the id
    /// was newly added; adding an id already present writes nothing.
    pub fn add(&self, id: MessageId) -> io::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.ids.contains(&id) {
            return Ok(false);
        }

        if let Err(e) = inner.append(id) {
            // Cut off whatever part of the record made it so later records
            // stay aligned.
            let len = inner.len;
            let _ = inner.file.set_len(len);
            let _ = inner.file.seek(SeekFrom::Start(len));
            return Err(e);
        }

        inner.len += RECORD_SIZE;
        inner.ids.insert(id);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Return a copy of the current contents of the set.
    pub fn snapshot(&self) -> HashSet<MessageId> {
        self.inner.lock().unwrap().ids.clone()
    }

    /// Remove everything from the set, in memory and on disk.
    pub fn clear(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.sync_all()?;
        inner.len = 0;
        inner.ids.clear();
        Ok(())
    }
}

impl Inner {
    fn append(&mut self, id: MessageId) -> io::Result<()> {
        self.file.write_u64::<LittleEndian>(id.0)?;
        self.file.sync_data()
    }
}

#[cfg(test)]
impl IdSet {
    /// Make every later write to the backing file fail by replacing its
    /// descriptor with a read-only one.
    pub fn break_writes(&self) {
        use std::os::unix::io::AsRawFd;

        let inner = self.inner.lock().unwrap();
        let read_only = fs::File::open(&self.path).unwrap();
        nix::unistd::dup2(read_only.as_raw_fd(), inner.file.as_raw_fd())
            .unwrap();
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn contents_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("done.dat");

        {
            let set = IdSet::open(&path).unwrap();
            assert!(set.is_empty());
            assert!(set.add(MessageId(42)).unwrap());
            assert!(set.add(MessageId(u64::MAX)).unwrap());
            assert!(set.add(MessageId(0)).unwrap());
            assert!(!set.add(MessageId(42)).unwrap());
            assert_eq!(3, set.len());
        }

        assert_eq!(24, fs::metadata(&path).unwrap().len());

        let set = IdSet::open(&path).unwrap();
        assert_eq!(3, set.len());
        assert!(set.contains(MessageId(42)));
        assert!(set.contains(MessageId(u64::MAX)));
        assert!(set.contains(MessageId(0)));
        assert!(!set.contains(MessageId(1)));
    }

    #[test]
    fn file_format_is_little_endian_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("done.dat");

        let set = IdSet::open(&path).unwrap();
        set.add(MessageId(0x0102030405060708)).unwrap();
        set.add(MessageId(9)).unwrap();

        assert_eq!(
            vec![8, 7, 6, 5, 4, 3, 2, 1, 9, 0, 0, 0, 0, 0, 0, 0],
            fs::read(&path).unwrap()
        );
    }

    #[test]
    fn truncated_record_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("in-progress.dat");

        let mut data = Vec::new();
        data.write_u64::<LittleEndian>(7).unwrap();
        data.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, &data).unwrap();

        let set = IdSet::open(&path).unwrap();
        assert_eq!(1, set.len());
        assert!(set.contains(MessageId(7)));
        assert_eq!(8, fs::metadata(&path).unwrap().len());

        set.add(MessageId(8)).unwrap();
        drop(set);

        let set = IdSet::open(&path).unwrap();
        assert_eq!(2, set.len());
        assert!(set.contains(MessageId(8)));
    }

    #[test]
    fn clear_empties_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("in-progress.dat");

        let set = IdSet::open(&path).unwrap();
        set.add(MessageId(1)).unwrap();
        set.add(MessageId(2)).unwrap();
        set.clear().unwrap();
        assert!(set.is_empty());
        assert_eq!(0, fs::metadata(&path).unwrap().len());

        set.add(MessageId(3)).unwrap();
        drop(set);

        let set = IdSet::open(&path).unwrap();
        assert_eq!(1, set.len());
        assert!(set.contains(MessageId(3)));
    }

    #[test]
    fn concurrent_adds_are_all_recorded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("done.dat");
        let set = IdSet::open(&path).unwrap();

        crossbeam::scope(|s| {
            for thread in 0..8u64 {
                let set = &set;
                s.spawn(move |_| {
                    for i in 0..50u64 {
                        // Every id is added by two threads
                        set.add(MessageId((thread / 2) * 1000 + i)).unwrap();
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(200, set.len());
        drop(set);

        assert_eq!(200 * 8, fs::metadata(&path).unwrap().len());
        let set = IdSet::open(&path).unwrap();
        assert_eq!(200, set.len());
        assert!(set.contains(MessageId(3049)));
    }

    #[test]
    fn failed_add_leaves_set_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("done.dat");

        let set = IdSet::open(&path).unwrap();
        set.add(MessageId(1)).unwrap();
        set.break_writes();

        assert!(set.add(MessageId(2)).is_err());
        assert_eq!(1, set.len());
        assert!(!set.contains(MessageId(2)));

        let file_len = fs::metadata(&path).unwrap().len();
        assert_eq!(0, file_len % RECORD_SIZE);
        assert_eq!(RECORD_SIZE, file_len);

        drop(set);
        let set = IdSet::open(&path).unwrap();
        assert_eq!(1, set.len());
        assert!(set.contains(MessageId(1)));
    }
}
