//! Make a destination directory match a rendered tree with as few
//! filesystem operations as possible.

use std::{
    cmp::Ordering,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, trace, warn};

use crate::{
    error::Error,
    font::RenameSet,
    snapshot::{Entry, EntryFlags, EntryKey, EntryKind, Snapshot},
};

/// What a sync did, paths relative to the destination root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    /// Deleted without being an expected consequence of an edit.
    pub unexpected: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
}

impl WriteReport {
    /// True if nothing on disk was touched.
    pub fn is_noop(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty() && self.removed_dirs.is_empty()
    }
}

enum Step {
    New,
    Both,
    Stale,
}

pub struct SyncWriter<'a> {
    expected_removals: &'a RenameSet,
}

impl<'a> SyncWriter<'a> {
    /// `expected_removals` are paths, relative to the destination root, whose
    /// deletion is the intended result of an edit.
    pub fn new(expected_removals: &'a RenameSet) -> SyncWriter<'a> {
        SyncWriter { expected_removals }
    }

    /// Sync `tree` into its path.
    ///
    /// `dest` is the listing of the destination, if it exists. It is kept up
    /// to date with what was written so a later sync against it compares
    /// against the new content.
    pub fn write(
        &self,
        tree: &mut Snapshot,
        dest: Option<&mut Snapshot>,
    ) -> Result<WriteReport, Error> {
        let root = tree.path().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        let mut report = WriteReport::default();
        self.sync_dir(tree, dest, Path::new(""), &mut report)?;
        info!(
            "Synced {:?}: {} written, {} unchanged, {} deleted ({} unexpected), {} directories removed",
            root,
            report.written.len(),
            report.unchanged.len(),
            report.deleted.len(),
            report.unexpected.len(),
            report.removed_dirs.len()
        );
        Ok(report)
    }

    fn sync_dir(
        &self,
        tree: &mut Snapshot,
        mut dest: Option<&mut Snapshot>,
        rel: &Path,
        report: &mut WriteReport,
    ) -> Result<(), Error> {
        let wanted: Vec<EntryKey> = tree
            .entries()
            .filter(|(_, entry)| entry.flags.contains(EntryFlags::TO_WRITE))
            .map(|(key, _)| key.clone())
            .collect();
        // entries added this session only exist in memory
        let existing: Vec<EntryKey> = dest
            .as_deref()
            .map(|dest| {
                dest.entries()
                    .filter(|(_, entry)| entry.on_disk())
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut wanted = wanted.into_iter().peekable();
        let mut existing = existing.into_iter().peekable();
        loop {
            let step = match (wanted.peek(), existing.peek()) {
                (None, None) => break,
                (Some(_), None) => Step::New,
                (None, Some(_)) => Step::Stale,
                (Some(w), Some(e)) => match w.cmp(e) {
                    Ordering::Less => Step::New,
                    Ordering::Equal => Step::Both,
                    Ordering::Greater => Step::Stale,
                },
            };
            match step {
                Step::New => {
                    let Some(key) = wanted.next() else { break };
                    self.sync_entry(tree, dest.as_deref_mut(), &key, false, rel, report)?;
                }
                Step::Both => {
                    existing.next();
                    let Some(key) = wanted.next() else { break };
                    self.sync_entry(tree, dest.as_deref_mut(), &key, true, rel, report)?;
                }
                Step::Stale => {
                    let Some(key) = existing.next() else { break };
                    if let Some(dest) = dest.as_deref_mut() {
                        self.remove_stale(dest, &key, rel, report)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn sync_entry(
        &self,
        tree: &mut Snapshot,
        dest: Option<&mut Snapshot>,
        key: &EntryKey,
        existed: bool,
        rel: &Path,
        report: &mut WriteReport,
    ) -> Result<(), Error> {
        let path = tree.path().join(&key.name);
        let rel_path = rel.join(&key.name);
        let Some(entry) = tree.entry_mut(key) else {
            return Ok(());
        };
        entry.flags |= EntryFlags::WRITTEN;

        match key.kind {
            EntryKind::File => {
                let bytes = entry.output().unwrap_or_default().to_vec();
                let unchanged =
                    existed && matches_destination(dest.as_deref(), &key.name, &bytes)?;
                if unchanged {
                    trace!("{rel_path:?} is unchanged");
                    report.unchanged.push(rel_path);
                } else {
                    debug!("Writing {rel_path:?}");
                    fs::write(&path, &bytes).map_err(|e| Error::io(&path, e))?;
                    report.written.push(rel_path);
                }
                if let Some(dest) = dest {
                    dest.record_written(&key.name, bytes)?;
                }
            }
            EntryKind::Directory => {
                if !existed {
                    debug!("Creating {rel_path:?}");
                    fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
                }
                let Some(subtree) = entry.subtree_mut() else {
                    return Ok(());
                };
                match dest {
                    Some(dest) => {
                        let sub_dest = dest.record_dir(&key.name)?;
                        self.sync_dir(subtree, Some(sub_dest), &rel_path, report)?;
                        if is_empty_dir(&path)? {
                            debug!("Removing empty directory {rel_path:?}");
                            fs::remove_dir(&path).map_err(|e| Error::io(&path, e))?;
                            dest.remove(key);
                            report.removed_dirs.push(rel_path);
                        }
                    }
                    None => {
                        self.sync_dir(subtree, None, &rel_path, report)?;
                        if is_empty_dir(&path)? {
                            fs::remove_dir(&path).map_err(|e| Error::io(&path, e))?;
                            report.removed_dirs.push(rel_path);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn remove_stale(
        &self,
        dest: &mut Snapshot,
        key: &EntryKey,
        rel: &Path,
        report: &mut WriteReport,
    ) -> Result<(), Error> {
        let path = dest.path().join(&key.name);
        let rel_path = rel.join(&key.name);
        let never_read = dest
            .entry(key)
            .map(|entry| !entry_was_read(entry))
            .unwrap_or(true);

        let result = match key.kind {
            EntryKind::File => fs::remove_file(&path),
            EntryKind::Directory => fs::remove_dir_all(&path),
        };
        match result {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("{rel_path:?} is already gone");
            }
            Err(e) => return Err(Error::io(&path, e)),
        }
        dest.remove(key);

        if self.expected_removals.contains(&rel_path) {
            debug!("Deleted {rel_path:?}");
        } else {
            if never_read {
                warn!("Deleted {rel_path:?}, unrecognized content that was never read");
            } else {
                warn!("Deleted {rel_path:?}, which is no longer part of the bundle");
            }
            report.unexpected.push(rel_path.clone());
        }
        report.deleted.push(rel_path);
        Ok(())
    }
}

/// A directory counts as read if anything in it was.
fn entry_was_read(entry: &Entry) -> bool {
    if entry.flags.contains(EntryFlags::READ) {
        return true;
    }
    entry
        .subtree()
        .map(|tree| tree.entries().any(|(_, e)| entry_was_read(e)))
        .unwrap_or(false)
}

/// Compare against the bytes seen this session if the file is untouched since,
/// otherwise against the disk.
fn matches_destination(dest: Option<&Snapshot>, name: &str, bytes: &[u8]) -> Result<bool, Error> {
    let Some(dest) = dest else {
        return Ok(false);
    };
    if let Some(original) = dest.file(name).and_then(Entry::original) {
        if !dest.state_changed_on_disk(name) {
            return Ok(original == bytes);
        }
    }
    let path = dest.path().join(name);
    match fs::read(&path) {
        Ok(current) => Ok(current == bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(&path, e)),
    }
}

fn is_empty_dir(path: &Path) -> Result<bool, Error> {
    let mut entries = fs::read_dir(path).map_err(|e| Error::io(path, e))?;
    Ok(entries.next().is_none())
}
