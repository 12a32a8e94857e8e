//! A one-time listing of a directory tree and what this session did with it.
//!
//! The same structure describes two things: the bundle as found on disk at
//! open time, and the tree the bundle wants to be on disk after a save. The
//! [crate::sync::SyncWriter] walks one against the other.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Component, Path, PathBuf},
};

use bitflags::bitflags;
use filetime::FileTime;
use log::{debug, trace};

use crate::error::Error;

/// Editor backups, never part of a bundle.
pub const BACKUP_SUFFIX: char = '~';

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// Content was consumed this session
        const READ = 0b00001;
        /// Created this session, not (yet) on disk
        const ADDED = 0b00010;
        /// The backing object was edited
        const CHANGED = 0b00100;
        /// Part of the tree to be written
        const TO_WRITE = 0b01000;
        /// Handled by a sync, whether or not bytes hit the disk
        const WRITTEN = 0b10000;
    }
}

/// Files sort before directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// The total order of a directory listing: kind, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub kind: EntryKind,
    pub name: String,
}

impl EntryKey {
    pub fn file(name: impl Into<String>) -> EntryKey {
        EntryKey {
            kind: EntryKind::File,
            name: name.into(),
        }
    }

    pub fn dir(name: impl Into<String>) -> EntryKey {
        EntryKey {
            kind: EntryKind::Directory,
            name: name.into(),
        }
    }
}

/// What a file was parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Plist,
    Glif,
    /// Copied byte for byte.
    Raw,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct FileState {
    pub(crate) mtime: FileTime,
    pub(crate) size: u64,
}

impl FileState {
    pub(crate) fn of(path: &Path) -> Result<FileState, io::Error> {
        let metadata = path.metadata()?;
        Ok(FileState {
            mtime: FileTime::from_system_time(metadata.modified()?),
            size: metadata.len(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub flags: EntryFlags,
    payload: Option<PayloadKind>,
    state: Option<FileState>,
    original: Option<Vec<u8>>,
    output: Option<Vec<u8>>,
    subtree: Option<Snapshot>,
}

impl Entry {
    pub fn payload(&self) -> Option<PayloadKind> {
        self.payload
    }

    /// Whether the entry was seen on disk, as opposed to added this session.
    pub fn on_disk(&self) -> bool {
        self.state.is_some()
    }

    /// The bytes read from disk this session, if any.
    pub fn original(&self) -> Option<&[u8]> {
        self.original.as_deref()
    }

    /// The bytes this entry should hold after a save.
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub fn subtree(&self) -> Option<&Snapshot> {
        self.subtree.as_ref()
    }

    pub fn subtree_mut(&mut self) -> Option<&mut Snapshot> {
        self.subtree.as_mut()
    }

    pub(crate) fn state(&self) -> Option<FileState> {
        self.state
    }
}

/// One directory: its path and its entries in [EntryKey] order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    path: PathBuf,
    entries: BTreeMap<EntryKey, Entry>,
}

impl Snapshot {
    /// An empty listing for `path`, nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Snapshot {
        Snapshot {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Enumerate `path` recursively.
    pub fn open(path: impl AsRef<Path>) -> Result<Snapshot, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingPath(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(Error::ExpectedDirectory(path.to_path_buf()));
        }
        let mut snapshot = Snapshot::new(path);
        for dir_entry in fs::read_dir(path).map_err(|e| Error::io(path, e))? {
            let dir_entry = dir_entry.map_err(|e| Error::io(path, e))?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(BACKUP_SUFFIX) {
                trace!("Skipping backup {name}");
                continue;
            }
            let entry_path = dir_entry.path();
            let state = FileState::of(&entry_path).map_err(|e| Error::io(&entry_path, e))?;
            if entry_path.is_dir() {
                let subtree = Snapshot::open(&entry_path)?;
                snapshot.entries.insert(
                    EntryKey::dir(name),
                    Entry {
                        state: Some(state),
                        subtree: Some(subtree),
                        ..Default::default()
                    },
                );
            } else {
                snapshot.entries.insert(
                    EntryKey::file(name),
                    Entry {
                        state: Some(state),
                        ..Default::default()
                    },
                );
            }
        }
        debug!(
            "Snapshot of {:?} has {} entries",
            snapshot.path,
            snapshot.entries.len()
        );
        Ok(snapshot)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in `(kind, name)` order.
    pub fn entries(&self) -> impl Iterator<Item = (&EntryKey, &Entry)> {
        self.entries.iter()
    }

    pub fn entry(&self, key: &EntryKey) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn entry_mut(&mut self, key: &EntryKey) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    pub fn file(&self, name: &str) -> Option<&Entry> {
        self.entries.get(&EntryKey::file(name))
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.entries.contains_key(&EntryKey::file(name))
    }

    pub fn contains_dir(&self, name: &str) -> bool {
        self.entries.contains_key(&EntryKey::dir(name))
    }

    /// Names of the files directly in this directory.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .filter(|k| k.kind == EntryKind::File)
            .map(|k| k.name.as_str())
    }

    /// Names of the directories directly in this directory.
    pub fn dir_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .filter(|k| k.kind == EntryKind::Directory)
            .map(|k| k.name.as_str())
    }

    /// The listing of a nested directory, `rel` being relative to this one.
    pub fn subtree(&self, rel: impl AsRef<Path>) -> Option<&Snapshot> {
        let mut current = self;
        for component in rel.as_ref().components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let key = EntryKey::dir(name.to_string_lossy());
            current = current.entries.get(&key)?.subtree.as_ref()?;
        }
        Some(current)
    }

    pub fn subtree_mut(&mut self, rel: impl AsRef<Path>) -> Option<&mut Snapshot> {
        let mut current = self;
        for component in rel.as_ref().components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let key = EntryKey::dir(name.to_string_lossy());
            current = current.entries.get_mut(&key)?.subtree.as_mut()?;
        }
        Some(current)
    }

    fn mark(&mut self, key: &EntryKey, flags: EntryFlags) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.flags |= flags;
                true
            }
            None => false,
        }
    }

    /// Returns false if there is no such entry.
    pub fn mark_read(&mut self, key: &EntryKey) -> bool {
        self.mark(key, EntryFlags::READ)
    }

    pub fn mark_changed(&mut self, key: &EntryKey) -> bool {
        self.mark(key, EntryFlags::CHANGED)
    }

    pub fn mark_to_write(&mut self, key: &EntryKey) -> bool {
        self.mark(key, EntryFlags::TO_WRITE)
    }

    /// Register an entry created this session; an existing entry is only flagged.
    pub fn mark_added(&mut self, key: EntryKey) {
        let is_dir = key.kind == EntryKind::Directory;
        let path = self.path.join(&key.name);
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            subtree: is_dir.then(|| Snapshot::new(path)),
            ..Default::default()
        });
        entry.flags |= EntryFlags::ADDED;
    }

    /// Load a file's bytes, caching them and marking the file read.
    pub fn read(&mut self, name: &str) -> Result<&[u8], Error> {
        let path = self.path.join(name);
        let Some(entry) = self.entries.get_mut(&EntryKey::file(name)) else {
            return Err(Error::MissingPath(path));
        };
        if entry.original.is_none() {
            trace!("Reading {path:?}");
            entry.original = Some(fs::read(&path).map_err(|e| Error::io(&path, e))?);
        }
        entry.flags |= EntryFlags::READ;
        Ok(entry.original.as_deref().unwrap_or_default())
    }

    /// [Snapshot::read] for text files.
    pub fn read_to_string(&mut self, name: &str) -> Result<String, Error> {
        let path = self.path.join(name);
        let bytes = self.read(name)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::ParseError(path, format!("not utf-8: {e}")))
    }

    pub fn set_payload(&mut self, name: &str, payload: PayloadKind) -> bool {
        match self.entries.get_mut(&EntryKey::file(name)) {
            Some(entry) => {
                entry.payload = Some(payload);
                true
            }
            None => false,
        }
    }

    /// Add a file to an output tree.
    pub fn insert_file(&mut self, name: impl Into<String>, bytes: Vec<u8>, payload: PayloadKind) {
        self.entries.insert(
            EntryKey::file(name),
            Entry {
                flags: EntryFlags::TO_WRITE,
                payload: Some(payload),
                output: Some(bytes),
                ..Default::default()
            },
        );
    }

    /// Add (or reuse) a directory in an output tree.
    pub fn insert_dir(&mut self, name: impl Into<String>) -> &mut Snapshot {
        let name = name.into();
        let path = self.path.join(&name);
        let entry = self.entries.entry(EntryKey::dir(name)).or_default();
        entry.flags |= EntryFlags::TO_WRITE;
        entry.subtree.get_or_insert_with(|| Snapshot::new(path))
    }

    pub fn remove(&mut self, key: &EntryKey) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Record that directory `name` now exists on disk.
    pub(crate) fn record_dir(&mut self, name: &str) -> Result<&mut Snapshot, Error> {
        let path = self.path.join(name);
        let state = FileState::of(&path).map_err(|e| Error::io(&path, e))?;
        let entry = self.entries.entry(EntryKey::dir(name)).or_default();
        entry.flags.remove(EntryFlags::ADDED);
        entry.flags |= EntryFlags::WRITTEN;
        entry.state = Some(state);
        Ok(entry.subtree.get_or_insert_with(|| Snapshot::new(path)))
    }

    /// Record that `name` now holds `bytes` on disk.
    pub(crate) fn record_written(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), Error> {
        let path = self.path.join(name);
        let state = FileState::of(&path).map_err(|e| Error::io(&path, e))?;
        let entry = self.entries.entry(EntryKey::file(name)).or_default();
        entry.flags.remove(EntryFlags::ADDED);
        entry.flags |= EntryFlags::READ | EntryFlags::WRITTEN;
        entry.state = Some(state);
        entry.original = Some(bytes);
        Ok(())
    }

    /// Whether a file's mtime or size differ from what was seen at open.
    ///
    /// Files that were never on disk count as changed.
    pub fn state_changed_on_disk(&self, name: &str) -> bool {
        let Some(state) = self.file(name).and_then(Entry::state) else {
            return true;
        };
        match FileState::of(&self.path.join(name)) {
            Ok(current) => current != state,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{ops::Add, time::Duration};

    use filetime::set_file_mtime;
    use tempfile::tempdir;

    use super::*;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("glyphs")).unwrap();
        fs::write(root.join("metainfo.plist"), "meta").unwrap();
        fs::write(root.join("metainfo.plist~"), "backup").unwrap();
        fs::write(root.join("glyphs").join("a.glif"), "a").unwrap();
        fs::write(root.join("zzz"), "last").unwrap();
    }

    #[test]
    fn missing_path_is_fatal() {
        let temp_dir = tempdir().unwrap();
        let result = Snapshot::open(temp_dir.path().join("nope"));
        assert!(matches!(result, Err(Error::MissingPath(..))));

        let file = temp_dir.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            Snapshot::open(&file),
            Err(Error::ExpectedDirectory(..))
        ));
    }

    #[test]
    fn files_sort_before_dirs_and_backups_are_skipped() {
        let temp_dir = tempdir().unwrap();
        sample_tree(temp_dir.path());
        let snapshot = Snapshot::open(temp_dir.path()).unwrap();
        let keys: Vec<_> = snapshot.entries().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            vec![
                EntryKey::file("metainfo.plist"),
                EntryKey::file("zzz"),
                EntryKey::dir("glyphs"),
            ],
            keys
        );
        let glyphs = snapshot.subtree("glyphs").unwrap();
        assert!(glyphs.contains_file("a.glif"));
        assert!(snapshot.subtree("nope").is_none());
        assert!(snapshot
            .entries()
            .all(|(k, e)| (k.kind == EntryKind::Directory) == e.subtree().is_some()));
    }

    #[test]
    fn read_caches_and_marks() {
        let temp_dir = tempdir().unwrap();
        sample_tree(temp_dir.path());
        let mut snapshot = Snapshot::open(temp_dir.path()).unwrap();
        assert!(!snapshot
            .file("metainfo.plist")
            .unwrap()
            .flags
            .contains(EntryFlags::READ));
        assert_eq!(b"meta", snapshot.read("metainfo.plist").unwrap());

        // the cache wins over the disk
        fs::write(temp_dir.path().join("metainfo.plist"), "changed").unwrap();
        assert_eq!(b"meta", snapshot.read("metainfo.plist").unwrap());
        let entry = snapshot.file("metainfo.plist").unwrap();
        assert!(entry.flags.contains(EntryFlags::READ));
        assert_eq!(Some(&b"meta"[..]), entry.original());

        assert!(matches!(
            snapshot.read("nope"),
            Err(Error::MissingPath(..))
        ));
    }

    #[test]
    fn detects_changes_since_open() {
        let temp_dir = tempdir().unwrap();
        sample_tree(temp_dir.path());
        let snapshot = Snapshot::open(temp_dir.path()).unwrap();
        assert!(!snapshot.state_changed_on_disk("zzz"));

        let file = temp_dir.path().join("zzz");
        let new_mtime = file
            .metadata()
            .unwrap()
            .modified()
            .unwrap()
            .add(Duration::from_secs(1));
        set_file_mtime(&file, new_mtime.into()).unwrap();
        assert!(snapshot.state_changed_on_disk("zzz"));
        assert!(snapshot.state_changed_on_disk("never-seen"));
    }

    #[test]
    fn added_entries_are_not_on_disk() {
        let temp_dir = tempdir().unwrap();
        sample_tree(temp_dir.path());
        let mut snapshot = Snapshot::open(temp_dir.path()).unwrap();
        let glyphs = snapshot.subtree_mut("glyphs").unwrap();
        glyphs.mark_added(EntryKey::file("b.glif"));
        glyphs.mark_added(EntryKey::file("a.glif"));

        let added = glyphs.file("b.glif").unwrap();
        assert!(added.flags.contains(EntryFlags::ADDED));
        assert!(!added.on_disk());
        assert!(glyphs.file("a.glif").unwrap().on_disk());

        assert!(glyphs.mark_changed(&EntryKey::file("a.glif")));
        assert!(!glyphs.mark_changed(&EntryKey::file("c.glif")));
        let changed = glyphs.file("a.glif").unwrap();
        assert!(changed.flags.contains(EntryFlags::CHANGED | EntryFlags::ADDED));
    }

    #[test]
    fn output_tree() {
        let mut tree = Snapshot::new("/nowhere");
        tree.insert_file("metainfo.plist", b"x".to_vec(), PayloadKind::Plist);
        tree.insert_dir("glyphs")
            .insert_file("a.glif", b"a".to_vec(), PayloadKind::Glif);
        let layer = tree.subtree("glyphs").unwrap();
        assert_eq!(Path::new("/nowhere/glyphs"), layer.path());
        assert_eq!(Some(&b"a"[..]), layer.file("a.glif").unwrap().output());
        assert_eq!(
            Some(PayloadKind::Glif),
            layer.file("a.glif").unwrap().payload()
        );
    }
}
