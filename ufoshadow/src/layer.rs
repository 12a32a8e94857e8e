//! Glyph layers: a `contents.plist` and the glif files it names.

use std::{ops::Index, path::PathBuf};

use indexmap::IndexMap;
use log::{debug, trace, warn};

use crate::{
    config::Config,
    error::Error,
    filenames::{glyph_file_name, UsedNames, GLIF_SUFFIX},
    font::{FormatGeneration, RenameSet},
    glyph::{GlifFormat, GlyphRecord},
    plist::{PlistFile, PlistMap, PlistStyle, ValueType},
    serialize::{FileType, Serializer},
    snapshot::{EntryKey, PayloadKind, Snapshot},
    types::GlyphName,
};

pub const DEFAULT_LAYER_NAME: &str = "public.default";
pub const DEFAULT_LAYER_DIRECTORY: &str = "glyphs";
pub const CONTENTS_FILE: &str = "contents.plist";
pub const LAYERINFO_FILE: &str = "layerinfo.plist";

/// Position of a layer in its bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(usize);

impl LayerId {
    pub(crate) fn new(index: usize) -> LayerId {
        LayerId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// One layer directory.
///
/// `contents` and the glyph map always hold the same names, and every glyph's
/// file name is the one `contents` maps it to.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerIndex {
    id: LayerId,
    name: String,
    directory: String,
    contents: PlistFile,
    glyphs: IndexMap<GlyphName, GlyphRecord>,
    layerinfo: Option<PlistFile>,
    used_file_names: UsedNames,
}

impl LayerIndex {
    /// A layer with no glyphs.
    pub fn new(id: LayerId, name: impl Into<String>, directory: impl Into<String>) -> LayerIndex {
        LayerIndex {
            id,
            name: name.into(),
            directory: directory.into(),
            contents: PlistFile::new(PlistStyle::Dict),
            glyphs: IndexMap::new(),
            layerinfo: None,
            used_file_names: UsedNames::new(),
        }
    }

    /// Read the layer from its directory listing.
    pub fn load(
        id: LayerId,
        name: impl Into<String>,
        directory: impl Into<String>,
        dir: &mut Snapshot,
    ) -> Result<LayerIndex, Error> {
        let mut layer = LayerIndex::new(id, name, directory);
        if !dir.contains_file(CONTENTS_FILE) {
            return Err(Error::MissingRequiredFile(dir.path().join(CONTENTS_FILE)));
        }
        layer.contents = read_plist(dir, CONTENTS_FILE)?;
        if layer.contents.map().style() != PlistStyle::Dict {
            return Err(Error::ParseError(
                dir.path().join(CONTENTS_FILE),
                "expected a dict".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(layer.contents.map().len());
        for (glyph_name, value) in layer.contents.map().iter() {
            if value.name != "string" {
                return Err(Error::ParseError(
                    dir.path().join(CONTENTS_FILE),
                    format!("'{glyph_name}' maps to a <{}>, not a file name", value.name),
                ));
            }
            entries.push((GlyphName::new(glyph_name), value.text().to_string()));
        }

        for (glyph_name, file_name) in entries {
            let path = dir.path().join(&file_name);
            if !dir.contains_file(&file_name) {
                return Err(Error::MissingRequiredFile(path));
            }
            let xml = dir.read_to_string(&file_name)?;
            let mut glyph = GlyphRecord::parse(&xml)
                .map_err(|e| Error::ParseError(path.clone(), e.to_string()))?;
            if glyph.name() != &glyph_name {
                return Err(Error::GlyphNameMismatch {
                    path,
                    expected: glyph_name,
                    actual: glyph.name().clone(),
                });
            }
            dir.set_payload(&file_name, PayloadKind::Glif);
            glyph.set_file_name(file_name.as_str());
            glyph.set_layer(id);
            layer.used_file_names.insert(&file_name);
            layer.glyphs.insert(glyph_name, glyph);
        }

        if dir.contains_file(LAYERINFO_FILE) {
            layer.layerinfo = Some(read_plist(dir, LAYERINFO_FILE)?);
        }

        let unread: Vec<String> = dir
            .entries()
            .filter(|(_, entry)| entry.payload().is_none())
            .map(|(key, _)| key.name.clone())
            .collect();
        for name in unread {
            if name.ends_with(GLIF_SUFFIX) {
                warn!(
                    "Orphan glyph file '{}' in layer '{}' is not listed in {CONTENTS_FILE}",
                    name, layer.name
                );
            } else {
                warn!("Unrecognized '{}' in layer '{}'", name, layer.name);
            }
        }
        debug!("Layer '{}' has {} glyphs", layer.name, layer.glyphs.len());
        Ok(layer)
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory name relative to the bundle root.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn is_default(&self) -> bool {
        self.directory == DEFAULT_LAYER_DIRECTORY
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.glyphs.contains_key(name)
    }

    pub fn glyph(&self, name: &str) -> Option<&GlyphRecord> {
        self.glyphs.get(name)
    }

    /// Glyph contents and attributes are free to edit; renames go through
    /// [LayerEditor::rename_glyph].
    pub fn glyph_mut(&mut self, name: &str) -> Option<&mut GlyphRecord> {
        self.glyphs.get_mut(name)
    }

    pub fn glyphs(&self) -> impl Iterator<Item = &GlyphRecord> {
        self.glyphs.values()
    }

    pub fn glyph_names(&self) -> impl Iterator<Item = &GlyphName> {
        self.glyphs.keys()
    }

    /// Glyph name to file name.
    pub fn contents(&self) -> &PlistMap {
        self.contents.map()
    }

    pub fn layerinfo(&self) -> Option<&PlistMap> {
        self.layerinfo.as_ref().map(PlistFile::map)
    }

    pub fn layerinfo_mut(&mut self) -> &mut PlistMap {
        self.layerinfo
            .get_or_insert_with(|| PlistFile::new(PlistStyle::Dict))
            .map_mut()
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        PathBuf::from(&self.directory).join(file_name)
    }

    /// Write the layer's files into `dir`, an output tree.
    ///
    /// For the older generation every glyph is converted on a copy, the
    /// records themselves keep their format.
    pub fn render(
        &self,
        dir: &mut Snapshot,
        config: &Config,
        generation: FormatGeneration,
    ) -> Result<(), Error> {
        let serializer = Serializer::new(config);
        dir.insert_file(
            CONTENTS_FILE,
            serializer.to_bytes(FileType::Plist, &self.contents.to_document()),
            PayloadKind::Plist,
        );
        if let Some(layerinfo) = &self.layerinfo {
            if generation == FormatGeneration::Three {
                dir.insert_file(
                    LAYERINFO_FILE,
                    serializer.to_bytes(FileType::Plist, &layerinfo.to_document()),
                    PayloadKind::Plist,
                );
            } else {
                debug!(
                    "Dropping {LAYERINFO_FILE} of '{}' for format generation 2",
                    self.name
                );
            }
        }
        for glyph in self.glyphs.values() {
            let document = if generation == FormatGeneration::Two
                && glyph.format() != GlifFormat::One
            {
                let mut legacy = glyph.clone();
                legacy.convert_to_older_format();
                legacy.to_document(config.preserve_unrecognized)
            } else {
                glyph.to_document(config.preserve_unrecognized)
            };
            trace!("Rendering {}", glyph.file_name());
            dir.insert_file(
                glyph.file_name(),
                serializer.to_bytes(FileType::Glif, &document),
                PayloadKind::Glif,
            );
        }
        Ok(())
    }
}

impl Index<&str> for LayerIndex {
    type Output = GlyphRecord;

    fn index(&self, name: &str) -> &GlyphRecord {
        match self.glyphs.get(name) {
            Some(glyph) => glyph,
            None => panic!("No glyph '{name}' in layer '{}'", self.name),
        }
    }
}

fn read_plist(dir: &mut Snapshot, name: &str) -> Result<PlistFile, Error> {
    let path = dir.path().join(name);
    let xml = dir.read_to_string(name)?;
    let plist = PlistFile::parse(&xml).map_err(|e| Error::ParseError(path, e.to_string()))?;
    dir.set_payload(name, PayloadKind::Plist);
    Ok(plist)
}

/// Mutable access to one layer along with the bundle state its edits touch.
pub struct LayerEditor<'a> {
    layer: &'a mut LayerIndex,
    renames: &'a mut RenameSet,
    snapshot: Option<&'a mut Snapshot>,
}

impl<'a> LayerEditor<'a> {
    pub(crate) fn new(
        layer: &'a mut LayerIndex,
        renames: &'a mut RenameSet,
        snapshot: Option<&'a mut Snapshot>,
    ) -> LayerEditor<'a> {
        LayerEditor {
            layer,
            renames,
            snapshot,
        }
    }

    pub fn layer(&self) -> &LayerIndex {
        self.layer
    }

    pub fn glyph_mut(&mut self, name: &str) -> Option<&mut GlyphRecord> {
        self.layer.glyph_mut(name)
    }

    pub fn layerinfo_mut(&mut self) -> &mut PlistMap {
        self.layer.layerinfo_mut()
    }

    fn claim_file_name(&mut self, glyph_name: &str) -> String {
        let file_name = glyph_file_name(glyph_name, &self.layer.used_file_names);
        self.layer.used_file_names.insert(&file_name);
        // coming back to a name given up earlier this session
        self.renames.remove(&self.layer.path_of(&file_name));
        file_name
    }

    fn release_file_name(&mut self, file_name: &str) {
        self.layer.used_file_names.remove(file_name);
        self.renames.insert(self.layer.path_of(file_name));
    }

    /// Add a glyph under a fresh, unique file name.
    pub fn add_glyph(&mut self, mut glyph: GlyphRecord) -> Result<&mut GlyphRecord, Error> {
        let name = glyph.name().clone();
        if name.is_empty() {
            return Err(Error::EmptyGlyphName);
        }
        if self.layer.glyphs.contains_key(&name) {
            return Err(Error::DuplicateGlyph(name));
        }
        let file_name = self.claim_file_name(name.as_str());
        self.layer
            .contents
            .map_mut()
            .add(name.as_str(), ValueType::String, &file_name)?;
        if let Some(snapshot) = self.snapshot.as_deref_mut() {
            snapshot.mark_added(EntryKey::file(file_name.as_str()));
        }
        debug!(
            "Added glyph '{name}' as {file_name} to layer '{}'",
            self.layer.name
        );
        glyph.set_file_name(file_name);
        glyph.set_layer(self.layer.id);
        let entry = self.layer.glyphs.entry(name).or_insert(glyph);
        Ok(entry)
    }

    /// Remove a glyph; its file is expected to disappear on save.
    pub fn delete_glyph(&mut self, name: &str) -> Result<GlyphRecord, Error> {
        let Some(glyph) = self.layer.glyphs.shift_remove(name) else {
            return Err(Error::NoSuchGlyph(name.into()));
        };
        self.layer.contents.map_mut().remove(name);
        self.release_file_name(glyph.file_name());
        if let Some(snapshot) = self.snapshot.as_deref_mut() {
            snapshot.mark_changed(&EntryKey::file(glyph.file_name()));
        }
        debug!("Deleted glyph '{name}' from layer '{}'", self.layer.name);
        Ok(glyph)
    }

    /// Rename a glyph, updating contents, the file name and the rename set.
    pub fn rename_glyph(&mut self, old: &str, new: &str) -> Result<(), Error> {
        if old == new {
            return Ok(());
        }
        if new.is_empty() {
            return Err(Error::EmptyGlyphName);
        }
        if self.layer.glyphs.contains_key(new) {
            return Err(Error::DuplicateGlyph(new.into()));
        }
        let Some(mut glyph) = self.layer.glyphs.shift_remove(old) else {
            return Err(Error::NoSuchGlyph(old.into()));
        };
        let old_file = glyph.file_name().to_string();
        self.release_file_name(&old_file);
        let new_file = self.claim_file_name(new);

        let contents = self.layer.contents.map_mut();
        contents.remove(old);
        contents.add(new, ValueType::String, &new_file)?;
        if let Some(snapshot) = self.snapshot.as_deref_mut() {
            snapshot.mark_changed(&EntryKey::file(old_file.as_str()));
            snapshot.mark_added(EntryKey::file(new_file.as_str()));
        }
        debug!(
            "Renamed glyph '{old}' ({old_file}) to '{new}' ({new_file}) in layer '{}'",
            self.layer.name
        );

        let new_name = GlyphName::new(new);
        glyph.set_name(new_name.clone());
        glyph.set_file_name(new_file);
        self.layer.glyphs.insert(new_name, glyph);
        Ok(())
    }

    /// Get the layer ready to be rendered.
    ///
    /// With `recompute_file_names` every glyph gets the file name its name
    /// would get in an empty layer, changes being recorded as renames. Every
    /// glyph's element tree is rebuilt from its fields.
    pub fn prepare_for_output(&mut self, recompute_file_names: bool) -> Result<(), Error> {
        if recompute_file_names {
            self.recompute_file_names()?;
        }
        if let Some(snapshot) = self.snapshot.as_deref_mut() {
            snapshot.mark_to_write(&EntryKey::file(CONTENTS_FILE));
        }
        for glyph in self.layer.glyphs.values_mut() {
            glyph.rebuild_tree();
            if let Some(snapshot) = self.snapshot.as_deref_mut() {
                snapshot.mark_to_write(&EntryKey::file(glyph.file_name()));
            }
        }
        Ok(())
    }

    fn recompute_file_names(&mut self) -> Result<(), Error> {
        let mut current: Vec<(GlyphName, String)> = self
            .layer
            .glyphs
            .values()
            .map(|g| (g.name().clone(), g.file_name().to_string()))
            .collect();
        current.sort();
        let mut used = UsedNames::new();
        let mut changes = Vec::new();
        for (name, current_file) in current {
            let file_name = glyph_file_name(name.as_str(), &used);
            used.insert(&file_name);
            if current_file != file_name {
                changes.push((name, current_file, file_name));
            }
        }
        for (_, old_file, _) in changes.iter() {
            self.renames.insert(self.layer.path_of(old_file));
        }
        for (name, old_file, new_file) in changes {
            debug!("'{name}' moves from {old_file} to {new_file}");
            self.renames.remove(&self.layer.path_of(&new_file));
            self.layer
                .contents
                .map_mut()
                .set(name.as_str(), ValueType::String, &new_file)?;
            if let Some(snapshot) = self.snapshot.as_deref_mut() {
                snapshot.mark_changed(&EntryKey::file(old_file.as_str()));
                snapshot.mark_added(EntryKey::file(new_file.as_str()));
            }
            if let Some(glyph) = self.layer.glyphs.get_mut(&name) {
                glyph.set_file_name(new_file);
            }
        }
        self.layer.used_file_names = used;
        Ok(())
    }
}
