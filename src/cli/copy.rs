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

use log::{info, warn};

use super::main::CopyCommand;
use crate::store::fs::DirStore;
use crate::store::{FolderPath, MailStore};
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SyncConfig;
use crate::sync::copier::{prepare_target_root, Copier, CopyStats};
use crate::sync::label_path::LabelRules;
use crate::sync::plan::Planner;
use crate::sync::rollback::Rollback;
use crate::sync::SyncState;

pub(super) fn main(cmd: CopyCommand, mut config: SyncConfig) {
    if let Some(n) = cmd.source_concurrency {
        config.copy.source_concurrency = n;
    }
    if let Some(n) = cmd.target_concurrency {
        config.copy.target_concurrency = n;
    }
    if cmd.folder.is_some() {
        config.copy.target_folder = cmd.folder;
    }

    let source = DirStore::new(&config.source.path);
    let target = DirStore::new(&config.target.path);
    for store in &[&source, &target] {
        if let Err(e) = store.connect() {
            die!(EX_UNAVAILABLE, "{}", e);
        }
    }

    match run(&source, &target, &mut config) {
        Ok(_) => (),
        Err(e) => die!(e.sysexit(), "{}", e),
    }
}

/// Roll back whatever an interrupted run left behind, then copy everything
/// not yet copied from `source` to `target`.
///
/// Returns `None` if the source holds no messages at all.
pub(super) fn run<S: MailStore, T: MailStore>(
    source: &S,
    target: &T,
    config: &mut SyncConfig,
) -> Result<Option<CopyStats>, Error> {
    for limit in &mut [
        &mut config.copy.source_concurrency,
        &mut config.copy.target_concurrency,
    ] {
        if 0 == **limit {
            warn!("Concurrency limit of 0 makes no sense, using 1");
            **limit = 1;
        }
    }

    let target_root = config
        .copy
        .target_folder
        .as_ref()
        .map(|f| FolderPath::parse(f, '/'))
        .unwrap_or_else(FolderPath::root);
    prepare_target_root(target, &target_root)?;

    let state = SyncState::open(&config.copy.state_dir)?;
    if !state.in_progress.is_empty() {
        info!("Rolling back an interrupted run");
        let deleted = Rollback::new(
            source,
            target,
            &target_root,
            &state.done,
            &state.in_progress,
        )
        .run()?;
        info!("Rollback deleted {} messages from the target", deleted);
    }

    let plan =
        Planner::new(source, &state.done, config.copy.refresh_rate()).plan()?;
    if 0 == plan.remote_total {
        info!("Nothing to copy; the source is empty");
        return Ok(None);
    }

    let rules = LabelRules::new(&config.labels);
    let stats = Copier::new(
        source,
        target,
        &target_root,
        &rules,
        &config.copy,
        &state.done,
        &state.in_progress,
    )?
    .run(&plan)?;
    Ok(Some(stats))
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::store::MessageId;

    const MESSAGE: &[u8] = b"Date: Tue, 14 Mar 2017 09:26:53 +0100\r\n\
        From: alice@example.com\r\n\
        To: bob@example.org\r\n\
        Subject: Project kickoff\r\n\
        X-Gmail-Labels: \\Important,Projects/Alpha\r\n\
        \r\n\
        Hello\r\n";

    struct Setup {
        tmp: TempDir,
        source: DirStore,
        target: DirStore,
        config: SyncConfig,
    }

    fn setup() -> Setup {
        crate::init_test_log();

        let tmp = TempDir::new().unwrap();
        for dir in &["source/Inbox", "source/Projects/Alpha", "target"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        for dir in &["source/Inbox", "source/Projects/Alpha"] {
            fs::write(
                tmp.path().join(dir).join("000000000000002a.eml"),
                MESSAGE,
            )
            .unwrap();
        }

        let source = DirStore::new(tmp.path().join("source"));
        let target = DirStore::new(tmp.path().join("target"));
        source.connect().unwrap();
        target.connect().unwrap();

        let mut config = SyncConfig::default();
        config.copy.refresh_rate_ms = 5;
        config.copy.target_concurrency = 0;
        config.copy.target_folder = Some("Gmail".to_owned());
        config.copy.state_dir = tmp.path().join("state");

        Setup {
            tmp,
            source,
            target,
            config,
        }
    }

    fn copies_in(dir: &Path) -> Vec<Vec<u8>> {
        let mut copies = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                copies.extend(copies_in(&path));
            } else {
                copies.push(fs::read(path).unwrap());
            }
        }
        copies
    }

    #[test]
    fn copy_and_resume() {
        let mut s = setup();

        let stats = run(&s.source, &s.target, &mut s.config)
            .unwrap()
            .unwrap();
        assert_eq!(1, stats.messages);
        assert_eq!(1, s.config.copy.target_concurrency);

        let folder = s.tmp.path().join("target/Gmail/Alpha/Projects");
        assert_eq!(vec![MESSAGE.to_vec()], copies_in(&folder));
        assert_eq!(1, copies_in(&s.tmp.path().join("target")).len());

        let stats = run(&s.source, &s.target, &mut s.config)
            .unwrap()
            .unwrap();
        assert_eq!(0, stats.messages);
        assert_eq!(1, copies_in(&s.tmp.path().join("target")).len());
    }

    #[test]
    fn interrupted_copy_is_rolled_back() {
        let mut s = setup();
        run(&s.source, &s.target, &mut s.config).unwrap().unwrap();

        // Pretend the run died between appending the message and recording
        // it as done.
        let state_dir = s.config.copy.state_dir.clone();
        fs::remove_file(state_dir.join(crate::sync::DONE_FILE)).unwrap();
        SyncState::open(&state_dir)
            .unwrap()
            .in_progress
            .add(MessageId(42))
            .unwrap();

        let stats = run(&s.source, &s.target, &mut s.config)
            .unwrap()
            .unwrap();
        assert_eq!(1, stats.messages);
        assert_eq!(
            vec![MESSAGE.to_vec()],
            copies_in(&s.tmp.path().join("target"))
        );

        let state = SyncState::open(&state_dir).unwrap();
        assert!(state.done.contains(MessageId(42)));
        assert!(state.in_progress.is_empty());
    }

    #[test]
    fn empty_source_copies_nothing() {
        let tmp = TempDir::new().unwrap();
        let source = DirStore::new(tmp.path());
        let target = DirStore::new(tmp.path());
        source.connect().unwrap();
        target.connect().unwrap();

        let mut config = SyncConfig::default();
        config.copy.refresh_rate_ms = 5;
        config.copy.state_dir = tmp.path().join(".state");

        assert!(run(&source, &target, &mut config).unwrap().is_none());
    }
}
