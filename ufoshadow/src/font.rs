//! A whole UFO bundle: top-level plists, layers, raw data, and saving it back.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs,
    path::{Component, Path, PathBuf},
};

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::Error,
    filenames::{layer_directory_name, UsedNames},
    layer::{
        LayerEditor, LayerId, LayerIndex, DEFAULT_LAYER_DIRECTORY, DEFAULT_LAYER_NAME,
        LAYERINFO_FILE,
    },
    plist::{PlistFile, PlistMap, PlistStyle, Value, ValueType},
    serialize::{FileType, Serializer},
    snapshot::{EntryKey, PayloadKind, Snapshot},
    sync::{SyncWriter, WriteReport},
    xml::Element,
};

pub const METAINFO_FILE: &str = "metainfo.plist";
pub const FONTINFO_FILE: &str = "fontinfo.plist";
pub const GROUPS_FILE: &str = "groups.plist";
pub const KERNING_FILE: &str = "kerning.plist";
pub const LIB_FILE: &str = "lib.plist";
pub const LAYERCONTENTS_FILE: &str = "layercontents.plist";
pub const FEATURES_FILE: &str = "features.fea";
pub const DATA_DIR: &str = "data";
pub const IMAGES_DIR: &str = "images";

/// The optional top-level dict plists.
pub const TOP_LEVEL_PLISTS: [&str; 4] = [FONTINFO_FILE, GROUPS_FILE, KERNING_FILE, LIB_FILE];

/// The `formatVersion` of a bundle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u32", into = "u32")]
pub enum FormatGeneration {
    /// One implicit layer, glif format 1.
    Two,
    Three,
}

impl FormatGeneration {
    pub fn version(self) -> u32 {
        match self {
            FormatGeneration::Two => 2,
            FormatGeneration::Three => 3,
        }
    }
}

impl TryFrom<u32> for FormatGeneration {
    type Error = Error;

    fn try_from(version: u32) -> Result<Self, Self::Error> {
        match version {
            2 => Ok(FormatGeneration::Two),
            3 => Ok(FormatGeneration::Three),
            other => Err(Error::UnsupportedFormatVersion(other.to_string())),
        }
    }
}

impl From<FormatGeneration> for u32 {
    fn from(generation: FormatGeneration) -> Self {
        generation.version()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    New,
    ReadingTopLevel,
    ReadingLayers,
    Ready,
    Failed,
}

fn advance(state: &mut LoadState, next: LoadState) {
    trace!("{state:?} => {next:?}");
    *state = next;
}

/// Paths, relative to the bundle root, that edits made obsolete.
///
/// Files listed here are deleted on save without a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameSet(BTreeSet<PathBuf>);

impl RenameSet {
    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.0.insert(path)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.0.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }
}

/// An open UFO bundle.
#[derive(Debug)]
pub struct FontBundle {
    path: PathBuf,
    state: LoadState,
    generation: FormatGeneration,
    snapshot: Snapshot,
    metainfo: PlistFile,
    plists: BTreeMap<String, PlistFile>,
    layers: Vec<LayerIndex>,
    default_layer: LayerId,
    /// Files copied byte for byte, relative to the root.
    raw_files: Vec<PathBuf>,
    renames: RenameSet,
}

impl FontBundle {
    /// An empty bundle with just a default layer, not backed by any directory.
    pub fn new(generation: FormatGeneration) -> FontBundle {
        let default_layer = LayerId::new(0);
        FontBundle {
            path: PathBuf::new(),
            state: LoadState::Ready,
            generation,
            snapshot: Snapshot::new(PathBuf::new()),
            metainfo: PlistFile::new(PlistStyle::Dict),
            plists: BTreeMap::new(),
            layers: vec![LayerIndex::new(
                default_layer,
                DEFAULT_LAYER_NAME,
                DEFAULT_LAYER_DIRECTORY,
            )],
            default_layer,
            raw_files: Vec::new(),
            renames: RenameSet::default(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<FontBundle, Error> {
        let path = path.as_ref();
        let mut state = LoadState::New;
        match FontBundle::load(path, &mut state) {
            Ok(font) => Ok(font),
            Err(e) => {
                error!("Unable to open {path:?} while in {state:?}: {e}");
                advance(&mut state, LoadState::Failed);
                Err(e)
            }
        }
    }

    fn load(path: &Path, state: &mut LoadState) -> Result<FontBundle, Error> {
        advance(state, LoadState::ReadingTopLevel);
        let mut snapshot = Snapshot::open(path)?;

        if !snapshot.contains_file(METAINFO_FILE) {
            return Err(Error::MissingRequiredFile(path.join(METAINFO_FILE)));
        }
        let metainfo = read_dict(&mut snapshot, METAINFO_FILE)?;
        let generation = read_generation(metainfo.map(), &path.join(METAINFO_FILE))?;
        debug!("{path:?} is format {}", generation.version());

        let mut plists = BTreeMap::new();
        for name in TOP_LEVEL_PLISTS {
            if snapshot.contains_file(name) {
                plists.insert(name.to_string(), read_dict(&mut snapshot, name)?);
            }
        }

        let layer_order = match (generation, snapshot.contains_file(LAYERCONTENTS_FILE)) {
            (FormatGeneration::Two, true) => {
                return Err(Error::InconsistentFormatVersion {
                    version: 2,
                    reason: "layercontents.plist only exists from format 3",
                })
            }
            (FormatGeneration::Three, false) => {
                return Err(Error::InconsistentFormatVersion {
                    version: 3,
                    reason: "layercontents.plist is missing",
                })
            }
            (FormatGeneration::Two, false) => vec![(
                DEFAULT_LAYER_NAME.to_string(),
                DEFAULT_LAYER_DIRECTORY.to_string(),
            )],
            (FormatGeneration::Three, true) => read_layer_order(&mut snapshot, path)?,
        };

        let mut raw_files = Vec::new();
        if snapshot.contains_file(FEATURES_FILE) {
            snapshot.read(FEATURES_FILE)?;
            snapshot.set_payload(FEATURES_FILE, PayloadKind::Raw);
            raw_files.push(PathBuf::from(FEATURES_FILE));
        }
        for dir in [DATA_DIR, IMAGES_DIR] {
            snapshot.mark_read(&EntryKey::dir(dir));
            if let Some(subtree) = snapshot.subtree_mut(dir) {
                read_raw_dir(subtree, Path::new(dir), &mut raw_files)?;
            }
        }

        warn_unrecognized(&snapshot, &layer_order);

        advance(state, LoadState::ReadingLayers);
        if !layer_order
            .iter()
            .any(|(_, dir)| dir == DEFAULT_LAYER_DIRECTORY)
            || !snapshot.contains_dir(DEFAULT_LAYER_DIRECTORY)
        {
            return Err(Error::NoDefaultLayer);
        }
        let mut layers = Vec::with_capacity(layer_order.len());
        let mut seen = HashSet::new();
        for (index, (name, directory)) in layer_order.into_iter().enumerate() {
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateLayer(name));
            }
            snapshot.mark_read(&EntryKey::dir(directory.as_str()));
            let Some(dir) = snapshot.subtree_mut(&directory) else {
                return Err(Error::MissingPath(path.join(&directory)));
            };
            layers.push(LayerIndex::load(
                LayerId::new(index),
                name,
                directory,
                dir,
            )?);
        }
        let default_layer = layers
            .iter()
            .find(|layer| layer.is_default())
            .map(LayerIndex::id)
            .ok_or(Error::NoDefaultLayer)?;

        advance(state, LoadState::Ready);
        info!(
            "Opened {path:?}: {} layers, {} glyphs in the default layer",
            layers.len(),
            layers[default_layer.index()].len()
        );
        Ok(FontBundle {
            path: path.to_path_buf(),
            state: *state,
            generation,
            snapshot,
            metainfo,
            plists,
            layers,
            default_layer,
            raw_files,
            renames: RenameSet::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// The generation the bundle was read as.
    pub fn format_generation(&self) -> FormatGeneration {
        self.generation
    }

    /// The listing of the bundle directory as of open (and the last in-place save).
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Files that will be deleted, without warning, on the next in-place save.
    pub fn renames(&self) -> &RenameSet {
        &self.renames
    }

    pub fn metainfo(&self) -> &PlistMap {
        self.metainfo.map()
    }

    pub fn default_layer_id(&self) -> LayerId {
        self.default_layer
    }

    pub fn default_layer(&self) -> &LayerIndex {
        &self.layers[self.default_layer.index()]
    }

    pub fn default_layer_mut(&mut self) -> LayerEditor<'_> {
        let id = self.default_layer;
        self.editor(id.index())
    }

    /// Layers in layercontents order.
    pub fn layers(&self) -> &[LayerIndex] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerIndex> {
        self.layers.get(id.index())
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&LayerIndex> {
        self.layers.iter().find(|layer| layer.name() == name)
    }

    pub fn layer_id(&self, name: &str) -> Result<LayerId, Error> {
        self.layer_by_name(name)
            .map(LayerIndex::id)
            .ok_or_else(|| Error::NoSuchLayer(name.to_string()))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<LayerEditor<'_>> {
        (id.index() < self.layers.len()).then(|| self.editor(id.index()))
    }

    fn editor(&mut self, index: usize) -> LayerEditor<'_> {
        let layer = &mut self.layers[index];
        let snapshot = self.snapshot.subtree_mut(layer.directory());
        LayerEditor::new(layer, &mut self.renames, snapshot)
    }

    /// Add an empty layer after the existing ones.
    pub fn add_layer(&mut self, name: &str) -> Result<LayerId, Error> {
        if self.layer_by_name(name).is_some() {
            return Err(Error::DuplicateLayer(name.to_string()));
        }
        let used: UsedNames = self.layers.iter().map(LayerIndex::directory).collect();
        let directory = layer_directory_name(name, &used);
        self.snapshot.mark_added(EntryKey::dir(directory.as_str()));
        // the directory may be coming back after a delete this session
        self.renames.remove(Path::new(&directory));

        let id = LayerId::new(self.layers.len());
        debug!("Adding layer '{name}' in {directory}");
        self.layers.push(LayerIndex::new(id, name, directory));
        Ok(id)
    }

    /// A top-level dict plist such as `lib.plist`, if present.
    pub fn plist(&self, name: &str) -> Option<&PlistMap> {
        self.plists.get(name).map(PlistFile::map)
    }

    pub fn plist_mut(&mut self, name: &str) -> Option<&mut PlistMap> {
        self.plists.get_mut(name).map(PlistFile::map_mut)
    }

    /// A top-level dict plist, created empty if the bundle has none.
    pub fn ensure_plist(&mut self, name: &str) -> Result<&mut PlistMap, Error> {
        if !TOP_LEVEL_PLISTS.contains(&name) {
            return Err(Error::StructuralError(format!(
                "'{name}' is not a top-level plist"
            )));
        }
        if !self.plists.contains_key(name) {
            self.snapshot.mark_added(EntryKey::file(name));
            self.renames.remove(Path::new(name));
        }
        Ok(self
            .plists
            .entry(name.to_string())
            .or_insert_with(|| PlistFile::new(PlistStyle::Dict))
            .map_mut())
    }

    /// The text of `features.fea`, if the bundle has one.
    pub fn features(&self) -> Option<&str> {
        self.snapshot
            .file(FEATURES_FILE)
            .and_then(|entry| entry.original())
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Write the bundle to `path`, touching only what differs.
    ///
    /// Saving to the directory the bundle was opened from reuses what was read
    /// at open; any other destination is listed and compared byte for byte.
    /// Everything is rendered before the first filesystem change.
    pub fn save(&mut self, path: impl AsRef<Path>, config: &Config) -> Result<WriteReport, Error> {
        let path = path.as_ref();
        let generation = config.format_generation.unwrap_or(self.generation);
        let in_place = same_location(&self.path, path);
        debug!(
            "Saving {:?} to {path:?} as format {}, in place: {in_place}",
            self.path,
            generation.version()
        );

        let metainfo = self.metainfo.map_mut();
        metainfo.set("creator", ValueType::String, &config.creator)?;
        metainfo.set(
            "formatVersion",
            ValueType::Integer,
            &generation.version().to_string(),
        )?;
        self.snapshot.mark_to_write(&EntryKey::file(METAINFO_FILE));

        for index in 0..self.layers.len() {
            self.editor(index)
                .prepare_for_output(config.recompute_file_names)?;
        }

        let mut expected_removals = self.renames.clone();
        let mut tree = self.render(path, config, generation, &mut expected_removals)?;

        let writer = SyncWriter::new(&expected_removals);
        let report = if in_place {
            writer.write(&mut tree, Some(&mut self.snapshot))?
        } else if path.exists() {
            let mut dest = Snapshot::open(path)?;
            writer.write(&mut tree, Some(&mut dest))?
        } else {
            writer.write(&mut tree, None)?
        };
        if in_place {
            self.renames = RenameSet::default();
        }
        Ok(report)
    }

    /// The complete output tree for `root`; `expected_removals` collects what
    /// the chosen generation leaves out.
    fn render(
        &self,
        root: &Path,
        config: &Config,
        generation: FormatGeneration,
        expected_removals: &mut RenameSet,
    ) -> Result<Snapshot, Error> {
        let serializer = Serializer::new(config);
        let plist_bytes =
            |plist: &PlistFile| serializer.to_bytes(FileType::Plist, &plist.to_document());

        let mut tree = Snapshot::new(root);
        tree.insert_file(
            METAINFO_FILE,
            plist_bytes(&self.metainfo),
            PayloadKind::Plist,
        );
        for (name, plist) in self.plists.iter() {
            tree.insert_file(name.as_str(), plist_bytes(plist), PayloadKind::Plist);
        }

        match generation {
            FormatGeneration::Three => {
                tree.insert_file(
                    LAYERCONTENTS_FILE,
                    plist_bytes(&self.layer_contents()?),
                    PayloadKind::Plist,
                );
                for layer in self.layers.iter() {
                    layer.render(tree.insert_dir(layer.directory()), config, generation)?;
                }
            }
            FormatGeneration::Two => {
                expected_removals.insert(PathBuf::from(LAYERCONTENTS_FILE));
                for dir in [DATA_DIR, IMAGES_DIR] {
                    if self.snapshot.contains_dir(dir) {
                        expected_removals.insert(PathBuf::from(dir));
                    }
                }
                for layer in self.layers.iter() {
                    if layer.is_default() {
                        if layer.layerinfo().is_some() {
                            expected_removals
                                .insert(Path::new(layer.directory()).join(LAYERINFO_FILE));
                        }
                        layer.render(tree.insert_dir(layer.directory()), config, generation)?;
                    } else {
                        warn!(
                            "Format 2 has a single layer, dropping layer '{}' ({} glyphs)",
                            layer.name(),
                            layer.len()
                        );
                        expected_removals.insert(PathBuf::from(layer.directory()));
                    }
                }
            }
        }

        for rel in self.raw_files.iter() {
            let only_in_three = rel.starts_with(DATA_DIR) || rel.starts_with(IMAGES_DIR);
            if generation == FormatGeneration::Two && only_in_three {
                debug!("Format 2 has no {rel:?}, dropping it");
                expected_removals.insert(rel.clone());
                continue;
            }
            let (Some(parent), Some(name)) = (rel.parent(), rel.file_name()) else {
                continue;
            };
            let name = name.to_string_lossy();
            let bytes = self
                .snapshot
                .subtree(parent)
                .and_then(|dir| dir.file(&name))
                .and_then(|entry| entry.original())
                .ok_or_else(|| Error::MissingPath(self.path.join(rel)))?;
            let mut dir = &mut tree;
            for component in parent.components() {
                if let Component::Normal(part) = component {
                    dir = dir.insert_dir(part.to_string_lossy());
                }
            }
            dir.insert_file(name.as_ref(), bytes.to_vec(), PayloadKind::Raw);
        }
        Ok(tree)
    }

    /// layercontents.plist for the current layers.
    fn layer_contents(&self) -> Result<PlistFile, Error> {
        let mut plist = PlistFile::new(PlistStyle::Array);
        for layer in self.layers.iter() {
            plist.map_mut().push_element(Element::with_children(
                "array",
                vec![
                    Element::with_text("string", layer.name()),
                    Element::with_text("string", layer.directory()),
                ],
            ))?;
        }
        Ok(plist)
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn read_dict(snapshot: &mut Snapshot, name: &str) -> Result<PlistFile, Error> {
    let path = snapshot.path().join(name);
    let xml = snapshot.read_to_string(name)?;
    let plist =
        PlistFile::parse(&xml).map_err(|e| Error::ParseError(path.clone(), e.to_string()))?;
    if plist.map().style() != PlistStyle::Dict {
        return Err(Error::ParseError(path, "expected a dict".to_string()));
    }
    snapshot.set_payload(name, PayloadKind::Plist);
    Ok(plist)
}

fn read_generation(metainfo: &PlistMap, path: &Path) -> Result<FormatGeneration, Error> {
    let Some(element) = metainfo.get("formatVersion") else {
        return Err(Error::ParseError(
            path.to_path_buf(),
            "no formatVersion".to_string(),
        ));
    };
    match Value::from_element(element) {
        Ok(Value::Integer(version)) => u32::try_from(version)
            .map_err(|_| Error::UnsupportedFormatVersion(version.to_string()))
            .and_then(FormatGeneration::try_from),
        _ => Err(Error::UnsupportedFormatVersion(element.text().to_string())),
    }
}

/// `(name, directory)` pairs from layercontents.plist.
fn read_layer_order(snapshot: &mut Snapshot, root: &Path) -> Result<Vec<(String, String)>, Error> {
    let path = root.join(LAYERCONTENTS_FILE);
    let xml = snapshot.read_to_string(LAYERCONTENTS_FILE)?;
    let plist =
        PlistFile::parse(&xml).map_err(|e| Error::ParseError(path.clone(), e.to_string()))?;
    snapshot.set_payload(LAYERCONTENTS_FILE, PayloadKind::Plist);
    if plist.map().style() != PlistStyle::Array {
        return Err(Error::ParseError(path, "expected an array".to_string()));
    }

    let mut order = Vec::with_capacity(plist.map().len());
    for element in plist.map().values() {
        let value = Value::from_element(element)?;
        let pair = match value.as_array() {
            Some([name, directory]) => name.as_str().zip(directory.as_str()),
            _ => None,
        };
        let Some((name, directory)) = pair else {
            return Err(Error::ParseError(
                path,
                "each layer must be a [name, directory] pair of strings".to_string(),
            ));
        };
        let mut components = Path::new(directory).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::ParseError(
                path,
                format!("'{directory}' is not a directory name"),
            ));
        }
        order.push((name.to_string(), directory.to_string()));
    }
    Ok(order)
}

fn read_raw_dir(dir: &mut Snapshot, rel: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    let files: Vec<String> = dir.file_names().map(str::to_string).collect();
    for name in files {
        dir.read(&name)?;
        dir.set_payload(&name, PayloadKind::Raw);
        out.push(rel.join(&name));
    }
    let dirs: Vec<String> = dir.dir_names().map(str::to_string).collect();
    for name in dirs {
        dir.mark_read(&EntryKey::dir(name.as_str()));
        if let Some(subtree) = dir.subtree_mut(&name) {
            read_raw_dir(subtree, &rel.join(&name), out)?;
        }
    }
    Ok(())
}

/// Top-level entries nothing claims are deleted by an in-place save; say so early.
fn warn_unrecognized(snapshot: &Snapshot, layer_order: &[(String, String)]) {
    for name in snapshot.file_names() {
        let known = name == METAINFO_FILE
            || name == LAYERCONTENTS_FILE
            || name == FEATURES_FILE
            || TOP_LEVEL_PLISTS.contains(&name);
        if !known {
            warn!("Unrecognized file '{name}' in {:?}", snapshot.path());
        }
    }
    for name in snapshot.dir_names() {
        let known = name == DATA_DIR
            || name == IMAGES_DIR
            || layer_order.iter().any(|(_, dir)| dir == name);
        if !known {
            warn!("Unrecognized directory '{name}' in {:?}", snapshot.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use filetime::{set_file_mtime, FileTime};
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    use crate::{
        glyph::{Advance, Anchor, GlifFormat, GlyphRecord},
        layer::CONTENTS_FILE,
    };

    use super::*;

    fn testdata_dir() -> PathBuf {
        // cargo test seems to run in the project directory so this is relative to that
        let path = Path::new("../resources/testdata").to_path_buf();
        assert!(path.is_dir(), "{path:?} not found");
        path
    }

    fn copy_dir(from: &Path, to: &Path) {
        fs::create_dir_all(to).unwrap();
        for entry in fs::read_dir(from).unwrap() {
            let entry = entry.unwrap();
            let target = to.join(entry.file_name());
            if entry.path().is_dir() {
                copy_dir(&entry.path(), &target);
            } else {
                fs::copy(entry.path(), target).unwrap();
            }
        }
    }

    /// A scratch copy of a fixture bundle.
    fn scratch(name: &str) -> (TempDir, PathBuf) {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join(name);
        copy_dir(&testdata_dir().join(name), &path);
        (temp_dir, path)
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    fn paths(values: &[&str]) -> Vec<PathBuf> {
        values.iter().map(PathBuf::from).collect()
    }

    /// Every file under `root` with its content, relative paths.
    fn listing(root: &Path) -> Vec<(PathBuf, String)> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, String)>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_path_buf();
                    out.push((rel, read(&path)));
                }
            }
        }
        let mut out = Vec::new();
        walk(root, root, &mut out);
        out.sort();
        out
    }

    #[test]
    fn open_ufo3() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let font = FontBundle::open(&path).unwrap();
        assert_eq!(LoadState::Ready, font.state());
        assert_eq!(FormatGeneration::Three, font.format_generation());
        assert_eq!(
            vec!["public.default", "public.background"],
            font.layers().iter().map(|l| l.name()).collect::<Vec<_>>()
        );
        let default = font.default_layer();
        assert_eq!("glyphs", default.directory());
        assert_eq!(3, default.len());
        assert_eq!(
            Some(500.0),
            default["A"].advance.as_ref().and_then(|a| a.width)
        );
        assert_eq!(1, default["A"].anchors.len());
        assert!(font.plist(FONTINFO_FILE).is_some());
        assert!(font.plist(KERNING_FILE).is_none());
        assert!(font.features().unwrap().contains("languagesystem"));
        assert_eq!(
            Some("Simple"),
            font.plist(FONTINFO_FILE).unwrap().get_str("familyName")
        );
    }

    #[test]
    fn open_ufo2_synthesizes_default_layer() {
        let (_temp_dir, path) = scratch("Legacy.ufo");
        let font = FontBundle::open(&path).unwrap();
        assert_eq!(FormatGeneration::Two, font.format_generation());
        assert_eq!(1, font.layers().len());
        let default = font.default_layer();
        assert_eq!(DEFAULT_LAYER_NAME, default.name());
        assert_eq!(GlifFormat::One, default["a"].format());
        // the move contour surfaces as an anchor
        assert_eq!(
            vec![Some("top".to_string())],
            default["a"]
                .anchors
                .iter()
                .map(|a| a.name.clone())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_metainfo_is_fatal() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        fs::remove_file(path.join(METAINFO_FILE)).unwrap();
        assert!(matches!(
            FontBundle::open(&path),
            Err(Error::MissingRequiredFile(..))
        ));
    }

    #[test]
    fn unsupported_version_is_fatal() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let metainfo = read(&path.join(METAINFO_FILE));
        fs::write(
            path.join(METAINFO_FILE),
            metainfo.replace("<integer>3</integer>", "<integer>1</integer>"),
        )
        .unwrap();
        assert!(matches!(
            FontBundle::open(&path),
            Err(Error::UnsupportedFormatVersion(v)) if v == "1"
        ));
    }

    #[test]
    fn layercontents_must_match_version() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        fs::remove_file(path.join(LAYERCONTENTS_FILE)).unwrap();
        assert!(matches!(
            FontBundle::open(&path),
            Err(Error::InconsistentFormatVersion { version: 3, .. })
        ));

        let (_temp_dir, path) = scratch("Legacy.ufo");
        fs::write(path.join(LAYERCONTENTS_FILE), "").unwrap();
        assert!(matches!(
            FontBundle::open(&path),
            Err(Error::InconsistentFormatVersion { version: 2, .. })
        ));
    }

    #[test]
    fn missing_default_layer_is_fatal() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        fs::remove_dir_all(path.join("glyphs")).unwrap();
        assert!(matches!(
            FontBundle::open(&path),
            Err(Error::NoDefaultLayer)
        ));
    }

    #[test]
    fn glyph_name_mismatch_is_fatal() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let glif = read(&path.join("glyphs/B_.glif"));
        fs::write(
            path.join("glyphs/B_.glif"),
            glif.replace(r#"name="B""#, r#"name="C""#),
        )
        .unwrap();
        assert!(matches!(
            FontBundle::open(&path),
            Err(Error::GlyphNameMismatch { .. })
        ));
    }

    #[test]
    fn second_save_changes_nothing() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        let config = Config::default();
        font.save(&path, &config).unwrap();
        let after_first = listing(&path);

        let report = font.save(&path, &config).unwrap();
        assert!(report.is_noop(), "{report:?}");
        assert_eq!(after_first, listing(&path));

        // and a fresh open of the normalized bundle agrees
        let mut reopened = FontBundle::open(&path).unwrap();
        let report = reopened.save(&path, &config).unwrap();
        assert!(report.is_noop(), "{report:?}");
    }

    #[test]
    fn only_edited_glyph_is_written() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        let config = Config::default();
        font.save(&path, &config).unwrap();

        let untouched = path.join("glyphs/B_.glif");
        let old_mtime = FileTime::from_unix_time(1_000_000_000, 0);
        set_file_mtime(&untouched, old_mtime).unwrap();

        font.default_layer_mut().glyph_mut("A").unwrap().advance = Some(Advance {
            width: Some(600.0),
            ..Default::default()
        });
        let report = font.save(&path, &config).unwrap();

        assert_eq!(paths(&["glyphs/A_.glif"]), report.written);
        assert!(report.deleted.is_empty());
        assert_eq!(
            old_mtime,
            FileTime::from_last_modification_time(&untouched.metadata().unwrap())
        );
        assert!(read(&path.join("glyphs/A_.glif")).contains(r#"<advance width="600"/>"#));
    }

    #[test]
    fn rename_and_back_is_byte_identical() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let config = Config::default();
        FontBundle::open(&path).unwrap().save(&path, &config).unwrap();
        let before = listing(&path);

        let mut font = FontBundle::open(&path).unwrap();
        let mut layer = font.default_layer_mut();
        layer.rename_glyph("a", "b").unwrap();
        layer.rename_glyph("b", "a").unwrap();
        let report = font.save(&path, &config).unwrap();

        assert!(report.is_noop(), "{report:?}");
        assert_eq!(before, listing(&path));
    }

    #[test]
    fn renamed_file_is_deleted_quietly() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        font.default_layer_mut().rename_glyph("a", "b").unwrap();
        let report = font.save(&path, &Config::default()).unwrap();

        assert!(report.deleted.contains(&PathBuf::from("glyphs/a.glif")));
        assert!(report.unexpected.is_empty(), "{report:?}");
        assert!(!path.join("glyphs/a.glif").exists());
        assert!(read(&path.join("glyphs/b.glif")).contains(r#"<glyph name="b" format="2">"#));
        let contents = read(&path.join("glyphs").join(CONTENTS_FILE));
        assert!(contents.contains("<string>b.glif</string>"), "{contents}");
        assert!(!contents.contains("a.glif"), "{contents}");
        assert!(font.renames().is_empty());
    }

    #[test]
    fn stray_file_is_deleted_with_warning() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        fs::write(path.join("glyphs/stray.glif"), "not listed").unwrap();
        let mut font = FontBundle::open(&path).unwrap();
        let report = font.save(&path, &Config::default()).unwrap();
        assert_eq!(paths(&["glyphs/stray.glif"]), report.unexpected);
        assert!(!path.join("glyphs/stray.glif").exists());
    }

    #[test]
    fn added_glyphs_get_unique_files() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        let mut layer = font.default_layer_mut();
        // A_.glif is taken by "A"
        layer.add_glyph(GlyphRecord::new("a_")).unwrap();
        layer.add_glyph(GlyphRecord::new("A_")).unwrap();
        let names: Vec<String> = ["A", "a_", "A_"]
            .iter()
            .map(|g| font.default_layer()[*g].file_name().to_string())
            .collect();
        assert_eq!(
            vec!["A_.glif", "a_000000000000001.glif", "A__.glif"],
            names
        );

        let report = font.save(&path, &Config::default()).unwrap();
        assert!(report
            .written
            .contains(&PathBuf::from("glyphs/a_000000000000001.glif")));
        let reopened = FontBundle::open(&path).unwrap();
        assert_eq!(5, reopened.default_layer().len());
    }

    #[test]
    fn save_elsewhere_leaves_source_alone() {
        let (temp_dir, path) = scratch("Simple.ufo");
        let before = listing(&path);
        let out = temp_dir.path().join("Out.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        font.default_layer_mut().delete_glyph("a").unwrap();

        let report = font.save(&out, &Config::default()).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(before, listing(&path));
        assert!(!out.join("glyphs/a.glif").exists());
        assert!(out.join("data/com.example.notes/readme.txt").exists());

        // writing the same thing there again is a no-op
        let report = font.save(&out, &Config::default()).unwrap();
        assert!(report.is_noop(), "{report:?}");
    }

    #[test]
    fn downgrade_drops_layers_and_converts_anchors() {
        let (temp_dir, path) = scratch("Simple.ufo");
        let out = temp_dir.path().join("Two.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        let config = Config {
            format_generation: Some(FormatGeneration::Two),
            ..Default::default()
        };
        font.save(&out, &config).unwrap();

        assert!(!out.join(LAYERCONTENTS_FILE).exists());
        assert!(!out.join("glyphs.public.background").exists());
        assert!(!out.join(DATA_DIR).exists());
        assert!(out.join(FEATURES_FILE).exists());
        let glif = read(&out.join("glyphs/A_.glif"));
        assert!(glif.contains(r#"format="1""#), "{glif}");
        assert!(glif.contains(r#"type="move" name="top""#), "{glif}");
        assert!(read(&out.join(METAINFO_FILE)).contains("<integer>2</integer>"));

        // the in-memory glyph is untouched
        assert_eq!(GlifFormat::Two, font.default_layer()["A"].format());

        let legacy = FontBundle::open(&out).unwrap();
        assert_eq!(FormatGeneration::Two, legacy.format_generation());
        assert_eq!(
            vec![Anchor::new("top", 250.0, 700.0)],
            legacy.default_layer()["A"].anchors
        );
    }

    #[test]
    fn downgrade_in_place_expects_its_removals() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        let mut font = FontBundle::open(&path).unwrap();
        let config = Config {
            format_generation: Some(FormatGeneration::Two),
            ..Default::default()
        };
        let report = font.save(&path, &config).unwrap();

        assert!(report.unexpected.is_empty(), "{report:?}");
        let mut deleted = report.deleted.clone();
        deleted.sort();
        assert_eq!(
            paths(&["data", "glyphs.public.background", LAYERCONTENTS_FILE]),
            deleted
        );
        assert!(!path.join(DATA_DIR).exists());
        assert!(path.join(FEATURES_FILE).exists());
    }

    #[test]
    fn legacy_round_trip_keeps_move_contours() {
        let (_temp_dir, path) = scratch("Legacy.ufo");
        let config = Config::default();
        FontBundle::open(&path).unwrap().save(&path, &config).unwrap();
        let glif = read(&path.join("glyphs/a.glif"));
        assert!(glif.contains(r#"format="1""#), "{glif}");
        assert!(glif.contains(r#"type="move" name="top""#), "{glif}");
        assert!(!glif.contains("<anchor"), "{glif}");
    }

    #[test]
    fn new_bundle_and_layers() {
        let temp_dir = tempdir().unwrap();
        let out = temp_dir.path().join("New.ufo");
        let mut font = FontBundle::new(FormatGeneration::Three);
        font.default_layer_mut()
            .add_glyph(GlyphRecord::new("space"))
            .unwrap();
        let sketch = font.add_layer("Sketch").unwrap();
        assert!(matches!(
            font.add_layer("Sketch"),
            Err(Error::DuplicateLayer(..))
        ));
        font.layer_mut(sketch)
            .unwrap()
            .add_glyph(GlyphRecord::new("space"))
            .unwrap();
        font.ensure_plist(LIB_FILE)
            .unwrap()
            .set("public.glyphOrder", ValueType::String, "space")
            .unwrap();
        assert!(font.ensure_plist("nope.plist").is_err());

        font.save(&out, &Config::default()).unwrap();
        let reopened = FontBundle::open(&out).unwrap();
        let layer = reopened
            .layer(reopened.layer_id("Sketch").unwrap())
            .unwrap();
        assert_eq!("glyphs.S_ketch", layer.directory());
        assert!(layer.contains("space"));
        assert_eq!(
            Some("com.github.ufoshadow"),
            reopened.metainfo().get_str("creator")
        );
        assert!(matches!(
            reopened.layer_id("Missing"),
            Err(Error::NoSuchLayer(..))
        ));
    }

    #[test]
    fn recompute_file_names_on_save() {
        let (_temp_dir, path) = scratch("Simple.ufo");
        fs::rename(path.join("glyphs/a.glif"), path.join("glyphs/lower.glif")).unwrap();
        let contents_path = path.join("glyphs").join(CONTENTS_FILE);
        let contents = read(&contents_path).replace(">a.glif<", ">lower.glif<");
        fs::write(&contents_path, contents).unwrap();

        let mut font = FontBundle::open(&path).unwrap();
        let config = Config {
            recompute_file_names: true,
            ..Default::default()
        };
        let report = font.save(&path, &config).unwrap();
        assert!(report.unexpected.is_empty(), "{report:?}");
        assert!(path.join("glyphs/a.glif").exists());
        assert!(!path.join("glyphs/lower.glif").exists());
    }
}
