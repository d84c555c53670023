//! The meta-directory model (Component C).
//!
//! A [`MetaDirectory`] is the persistent record of one artifact: the
//! original input, or any artifact recovered from it. Its attribute
//! dictionary (`info`) is cached in memory and written to disk only when
//! the `open()` scope exits, matching the original implementation's
//! caching contract: repeated `open()` calls on an already-loaded
//! `MetaDirectory` never re-read `info.json` from disk, and writes are
//! last-write-wins per worker.

use crate::error::{BangError, Result};
use memmap2::Mmap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Attribute dictionary persisted as a single JSON blob per meta directory.
/// Field names match the recognized `info` keys from the spec so the
/// on-disk representation stays self-describing.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub unpack_parser: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub parent_md: Option<String>,
    #[serde(default)]
    pub extracted_files: BTreeMap<String, String>,
    #[serde(default)]
    pub unpacked_relative_files: BTreeMap<String, String>,
    #[serde(default)]
    pub unpacked_absolute_files: BTreeMap<String, String>,
    #[serde(default)]
    pub unpacked_symlinks: BTreeMap<String, String>,
    #[serde(default)]
    pub unpacked_hardlinks: BTreeMap<String, String>,
    #[serde(default)]
    pub suggested_parsers: Vec<String>,
    #[serde(default)]
    pub propagated: Map<String, Value>,
}

/// A logical path for an unpacked (container-produced) child. Absolute
/// logical paths live under the meta directory's `abs/` subtree, relative
/// ones under `rel/`. `..` components are stripped on construction —
/// defence against traversal from a hostile archive member.
#[derive(Debug, Clone)]
pub struct LogicalPath {
    pub path: PathBuf,
    pub absolute: bool,
}

impl LogicalPath {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let p = path.as_ref();
        let absolute = p.is_absolute();
        let mut out = PathBuf::new();
        for comp in p.components() {
            if let Component::Normal(s) = comp {
                out.push(s);
            }
            // RootDir/Prefix/CurDir/ParentDir are all dropped: the root
            // marker is tracked separately via `absolute`, and `..`/`.`
            // never contribute path segments.
        }
        LogicalPath {
            path: out,
            absolute,
        }
    }
}

const REL_UNPACK_DIR: &str = "rel";
const ABS_UNPACK_DIR: &str = "abs";
pub const ROOT_MD_PATH: &str = "root";

/// The persistent record of one artifact.
pub struct MetaDirectory {
    meta_root: Arc<PathBuf>,
    md_path: String,
    file_path: Mutex<Option<PathBuf>>,
    size: Mutex<Option<u64>>,
    info: Mutex<Info>,
    info_loaded: AtomicBool,
    mapped: Mutex<Option<(File, Arc<Mmap>)>>,
    bound_parser: Mutex<Option<Box<dyn crate::parser::Parser>>>,
}

impl MetaDirectory {
    /// Creates the in-memory record for a brand-new artifact. `file_path`
    /// is relative to `meta_root` and must already exist on disk (or be
    /// about to be created by the caller before `open()`).
    fn new(meta_root: Arc<PathBuf>, md_path: String, file_path: Option<PathBuf>) -> Self {
        MetaDirectory {
            meta_root,
            md_path,
            file_path: Mutex::new(file_path),
            size: Mutex::new(None),
            info: Mutex::new(Info::default()),
            info_loaded: AtomicBool::new(false),
            mapped: Mutex::new(None),
            bound_parser: Mutex::new(None),
        }
    }

    /// Creates the `MetaDirectory` for the root artifact (`md_path ==
    /// "root"`), pointing at `input_file` relative to `meta_root`.
    pub fn for_root(meta_root: Arc<PathBuf>, input_file: PathBuf) -> Result<Arc<Self>> {
        let md = Arc::new(MetaDirectory::new(
            meta_root,
            ROOT_MD_PATH.to_string(),
            Some(input_file.clone()),
        ));
        md.persist_pathname(&input_file)?;
        Ok(md)
    }

    /// References an existing meta directory by its path, reading nothing
    /// until `open()` is called.
    pub fn from_md_path(meta_root: Arc<PathBuf>, md_path: impl Into<String>) -> Arc<Self> {
        Arc::new(MetaDirectory::new(meta_root, md_path.into(), None))
    }

    /// Allocates a fresh, unique md_path (a 128-bit random hex name) for a
    /// new non-root artifact, and creates its file at `rel_file_path`
    /// (relative to `meta_root`).
    fn fresh(meta_root: Arc<PathBuf>, rel_file_path: PathBuf) -> Result<Arc<Self>> {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let name: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let md = Arc::new(MetaDirectory::new(
            meta_root,
            name,
            Some(rel_file_path.clone()),
        ));
        md.persist_pathname(&rel_file_path)?;
        Ok(md)
    }

    pub fn md_path(&self) -> &str {
        &self.md_path
    }

    pub fn is_root(&self) -> bool {
        self.md_path == ROOT_MD_PATH
    }

    pub fn meta_root(&self) -> &Path {
        &self.meta_root
    }

    /// The absolute path of this meta directory's own directory
    /// (`meta_root / md_path`).
    pub fn abs_md_path(&self) -> PathBuf {
        self.meta_root.join(&self.md_path)
    }

    fn pathname_file(&self) -> PathBuf {
        self.abs_md_path().join("pathname")
    }

    fn info_file(&self) -> PathBuf {
        self.abs_md_path().join("info.json")
    }

    fn persist_pathname(&self, path: &Path) -> Result<()> {
        let p = self.pathname_file();
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| BangError::extraction_io(parent, e))?;
        }
        fs::write(&p, path.to_string_lossy().as_bytes())
            .map_err(|e| BangError::extraction_io(&p, e))?;
        Ok(())
    }

    /// The path of the byte content this meta directory refers to,
    /// relative to `meta_root`. Read from the `pathname` file on first
    /// access if not already known in memory.
    pub fn file_path(&self) -> Result<PathBuf> {
        let mut guard = self.file_path.lock().unwrap();
        if let Some(p) = guard.as_ref() {
            return Ok(p.clone());
        }
        let p = self.pathname_file();
        let contents =
            fs::read_to_string(&p).map_err(|e| BangError::extraction_io(&p, e))?;
        let path = PathBuf::from(contents);
        *guard = Some(path.clone());
        Ok(path)
    }

    pub fn abs_file_path(&self) -> Result<PathBuf> {
        Ok(self.meta_root.join(self.file_path()?))
    }

    /// The byte length of the content this meta directory refers to.
    pub fn size(&self) -> Result<u64> {
        let mut guard = self.size.lock().unwrap();
        if let Some(s) = *guard {
            return Ok(s);
        }
        let path = self.abs_file_path()?;
        let len = fs::metadata(&path)
            .map_err(|e| BangError::extraction_io(&path, e))?
            .len();
        *guard = Some(len);
        Ok(len)
    }

    /// Opens the meta directory for processing: memory-maps the file
    /// content (unless it is already mapped) and loads `info.json` into
    /// memory (unless it is already non-empty). Returns a guard that
    /// persists `info` and, if this call performed the mapping, releases
    /// it, when dropped.
    pub fn open(self: &Arc<Self>, open_file: bool) -> Result<OpenGuard> {
        let already_open = self.mapped.lock().unwrap().is_some();
        let should_open = open_file || !already_open;
        if should_open && !already_open {
            let path = self.abs_file_path()?;
            let file = File::open(&path).map_err(|e| BangError::extraction_io(&path, e))?;
            let mmap = if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
                None
            } else {
                Some(unsafe { Mmap::map(&file) }.map_err(|e| BangError::extraction_io(&path, e))?)
            };
            *self.mapped.lock().unwrap() = Some((file, Arc::new(mmap.unwrap_or_else(|| {
                // zero-length files cannot be mmap'd; fall back to an
                // always-empty mapping backed by a throwaway anonymous map.
                empty_mmap()
            }))));
        }
        if !self.info_loaded.swap(true, Ordering::SeqCst) {
            let loaded = self.read_info()?;
            *self.info.lock().unwrap() = loaded;
        }
        Ok(OpenGuard {
            md: Arc::clone(self),
            opened_file_here: should_open && !already_open,
        })
    }

    fn read_info(&self) -> Result<Info> {
        let path = self.info_file();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| BangError::InfoSerde { path, source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Info::default()),
            Err(e) => Err(BangError::extraction_io(&path, e)),
        }
    }

    fn persist_info(&self) -> Result<()> {
        let path = self.info_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BangError::extraction_io(parent, e))?;
        }
        let info = self.info.lock().unwrap();
        let bytes = serde_json::to_vec_pretty(&*info)
            .map_err(|e| BangError::InfoSerde { path: path.clone(), source: e })?;
        fs::write(&path, bytes).map_err(|e| BangError::extraction_io(&path, e))?;
        Ok(())
    }

    fn close_file(&self) {
        *self.mapped.lock().unwrap() = None;
    }

    /// The memory-mapped content. Only valid while an [`OpenGuard`] for
    /// this directory is live.
    pub fn mmap(&self) -> Result<Arc<Mmap>> {
        self.mapped
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, m)| Arc::clone(m))
            .ok_or_else(|| BangError::Configuration(format!("{}: not open", self.md_path)))
    }

    /// A BLAKE3 content digest of the artifact, as an ambient convenience
    /// (not part of the spec's persisted model).
    pub fn digest(&self) -> Result<String> {
        let mmap = self.mmap()?;
        Ok(blake3::hash(&mmap).to_hex().to_string())
    }

    // --- info accessors -------------------------------------------------

    pub fn labels(&self) -> Vec<String> {
        self.info.lock().unwrap().labels.clone()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.info.lock().unwrap().labels.iter().any(|l| l == label)
    }

    pub fn add_labels(&self, labels: Vec<String>) {
        self.info.lock().unwrap().labels.extend(labels);
    }

    pub fn set_unpack_parser(&self, name: &str) {
        self.info.lock().unwrap().unpack_parser = Some(name.to_string());
    }

    pub fn merge_metadata(&self, metadata: Value) {
        if let Value::Object(map) = metadata {
            self.info.lock().unwrap().metadata.extend(map);
        }
    }

    pub fn set_parsed_size(&self, size: u64) {
        self.info.lock().unwrap().size = Some(size);
    }

    pub fn set_suggested_parsers(&self, names: Vec<String>) {
        self.info.lock().unwrap().suggested_parsers = names;
    }

    pub fn suggested_parsers(&self) -> Vec<String> {
        self.info.lock().unwrap().suggested_parsers.clone()
    }

    pub fn set_propagated(&self, propagated: Value) {
        if let Value::Object(map) = propagated {
            self.info.lock().unwrap().propagated = map;
        }
    }

    pub fn extracted_files(&self) -> BTreeMap<String, String> {
        self.info.lock().unwrap().extracted_files.clone()
    }

    pub fn unpacked_relative_files(&self) -> BTreeMap<String, String> {
        self.info.lock().unwrap().unpacked_relative_files.clone()
    }

    pub fn unpacked_absolute_files(&self) -> BTreeMap<String, String> {
        self.info.lock().unwrap().unpacked_absolute_files.clone()
    }

    pub fn parent_md(&self) -> Option<String> {
        self.info.lock().unwrap().parent_md.clone()
    }

    // --- runtime parser binding (not persisted) --------------------------

    /// True once a parser has been installed via [`Self::bind_parser`].
    pub fn is_scanned(&self) -> bool {
        self.bound_parser.lock().unwrap().is_some()
    }

    pub fn bind_parser(&self, parser: Box<dyn crate::parser::Parser>) {
        *self.bound_parser.lock().unwrap() = Some(parser);
    }

    /// Clears the in-memory parser binding so a cached instance becomes
    /// `!is_scanned()` again. Used when [`crate::parser::UnpackItem::SelfAgain`]
    /// re-queues this same meta directory for another pipeline pass — the
    /// `MetaDirectoryCache` hands back the same `Arc`, so without this the
    /// prior binding would make `stop_if_scanned` short-circuit the rescan
    /// before any later stage ever runs.
    pub fn unbind_parser(&self) {
        *self.bound_parser.lock().unwrap() = None;
    }

    /// Lets the bound parser write its identity/labels/metadata into this
    /// meta directory's info.
    pub fn write_info_with_unpack_parser(&self) {
        let guard = self.bound_parser.lock().unwrap();
        if let Some(parser) = guard.as_ref() {
            parser.write_info(self);
        }
    }

    /// Lets the bound parser unpack child artifacts. Returns an empty
    /// stream if no parser is bound.
    pub fn unpack_with_unpack_parser(self: &Arc<Self>) -> crate::parser::UnpackStream {
        let guard = self.bound_parser.lock().unwrap();
        match guard.as_ref() {
            Some(parser) => parser.unpack(self),
            None => Box::new(std::iter::empty()),
        }
    }

    // --- extracted (byte sub-range) children -----------------------------

    fn extracted_filename(offset: u64, len: u64) -> String {
        format!("{:012x}-{:012x}", offset, len)
    }

    /// Carves `bytes` (the content of `[offset, offset+bytes.len())` in
    /// this artifact) into a freshly allocated child meta directory, and
    /// records the parent/child relationship.
    pub fn extract_file(self: &Arc<Self>, offset: u64, bytes: &[u8]) -> Result<Arc<MetaDirectory>> {
        let name = Self::extracted_filename(offset, bytes.len() as u64);
        let rel_path = PathBuf::from(&self.md_path)
            .join("extracted")
            .join(&name);
        let child = MetaDirectory::fresh(Arc::clone(&self.meta_root), rel_path.clone())?;
        let abs_path = self.meta_root.join(&rel_path);
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BangError::extraction_io(parent, e))?;
        }
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&abs_path)
            .map_err(|e| BangError::extraction_io(&abs_path, e))?;
        f.write_all(bytes)
            .map_err(|e| BangError::extraction_io(&abs_path, e))?;
        drop(f);
        self.info
            .lock()
            .unwrap()
            .extracted_files
            .insert(name, child.md_path.clone());
        self.add_extracted_file(&child)?;
        Ok(child)
    }

    /// Records the parent/child relation for an extracted (or otherwise
    /// externally created) child meta directory: sets `parent_md` on the
    /// child.
    pub fn add_extracted_file(self: &Arc<Self>, child: &Arc<MetaDirectory>) -> Result<()> {
        let guard = child.open(false)?;
        child.info.lock().unwrap().parent_md = Some(self.md_path.clone());
        drop(guard);
        Ok(())
    }

    pub fn extracted_md(&self, offset: u64, len: u64) -> Option<Arc<MetaDirectory>> {
        let name = Self::extracted_filename(offset, len);
        let target = self.info.lock().unwrap().extracted_files.get(&name).cloned()?;
        Some(MetaDirectory::from_md_path(Arc::clone(&self.meta_root), target))
    }

    // --- unpacked (logical-path) children --------------------------------

    fn unpacked_rel_path(&self, logical: &LogicalPath) -> PathBuf {
        let sub = if logical.absolute {
            ABS_UNPACK_DIR
        } else {
            REL_UNPACK_DIR
        };
        PathBuf::from(&self.md_path).join(sub).join(&logical.path)
    }

    /// Writes `bytes` as an unpacked regular file at `logical` and records
    /// it under `unpacked_relative_files`/`unpacked_absolute_files`.
    pub fn unpack_regular_file(
        self: &Arc<Self>,
        logical: &LogicalPath,
        bytes: &[u8],
    ) -> Result<Arc<MetaDirectory>> {
        let rel_path = self.unpacked_rel_path(logical);
        let abs_path = self.meta_root.join(&rel_path);
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BangError::extraction_io(parent, e))?;
        }
        let child = MetaDirectory::fresh(Arc::clone(&self.meta_root), rel_path)?;
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&abs_path)
            .map_err(|e| BangError::extraction_io(&abs_path, e))?;
        f.write_all(bytes)
            .map_err(|e| BangError::extraction_io(&abs_path, e))?;
        drop(f);
        let logical_str = logical.path.to_string_lossy().to_string();
        {
            let mut info = self.info.lock().unwrap();
            if logical.absolute {
                info.unpacked_absolute_files
                    .insert(logical_str, child.md_path.clone());
            } else {
                info.unpacked_relative_files
                    .insert(logical_str, child.md_path.clone());
            }
        }
        self.add_extracted_file(&child)?;
        Ok(child)
    }

    pub fn unpack_directory(&self, logical: &LogicalPath) -> Result<PathBuf> {
        let rel_path = self.unpacked_rel_path(logical);
        let abs_path = self.meta_root.join(&rel_path);
        fs::create_dir_all(&abs_path).map_err(|e| BangError::extraction_io(&abs_path, e))?;
        Ok(rel_path)
    }

    pub fn unpack_symlink(&self, logical: &LogicalPath, target: &Path) -> Result<PathBuf> {
        let rel_path = self.unpacked_rel_path(logical);
        let abs_path = self.meta_root.join(&rel_path);
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BangError::extraction_io(parent, e))?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &abs_path)
            .map_err(|e| BangError::extraction_io(&abs_path, e))?;
        #[cfg(not(unix))]
        let _ = &abs_path; // symlinks are a unix-only unpack operation here
        let logical_str = rel_path.to_string_lossy().to_string();
        self.info
            .lock()
            .unwrap()
            .unpacked_symlinks
            .insert(logical_str, target.to_string_lossy().to_string());
        Ok(rel_path)
    }

    pub fn unpack_hardlink(&self, logical: &LogicalPath, target: &Path) -> Result<PathBuf> {
        let rel_path = self.unpacked_rel_path(logical);
        let abs_path = self.meta_root.join(&rel_path);
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BangError::extraction_io(parent, e))?;
        }
        let abs_target = self.meta_root.join(&self.md_path).join(target);
        fs::hard_link(&abs_target, &abs_path).map_err(|e| BangError::extraction_io(&abs_path, e))?;
        let logical_str = rel_path.to_string_lossy().to_string();
        self.info
            .lock()
            .unwrap()
            .unpacked_hardlinks
            .insert(logical_str, target.to_string_lossy().to_string());
        Ok(rel_path)
    }
}

/// RAII scope returned by [`MetaDirectory::open`]. Persists `info.json`
/// unconditionally on drop, and releases the memory map if this scope was
/// the one that created it.
pub struct OpenGuard {
    md: Arc<MetaDirectory>,
    opened_file_here: bool,
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        if self.opened_file_here {
            self.md.close_file();
        }
        if let Err(e) = self.md.persist_info() {
            tracing::error!(md_path = %self.md.md_path, error = %e, "failed to persist info.json on close");
        }
    }
}

fn empty_mmap() -> Mmap {
    // memmap2 cannot map a zero-length file; build a throwaway anonymous
    // mapping of size 0 worth of semantics by mapping a 1-byte anonymous
    // region and never reading it. We instead special-case zero-length
    // reads at the `OffsetWindow` boundary, so this path is never read.
    memmap2::MmapOptions::new()
        .len(1)
        .map_anon()
        .expect("anonymous mmap")
        .make_read_only()
        .expect("make read-only")
}

/// Guarantees at most one in-memory [`MetaDirectory`] per `md_path` within
/// a process, per the spec's invariant. Environments hand this to workers
/// so repeated references to the same artifact share state.
#[derive(Default)]
pub struct MetaDirectoryCache {
    entries: Mutex<HashMap<String, Arc<MetaDirectory>>>,
}

impl MetaDirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&self, md_path: &str, meta_root: &Arc<PathBuf>) -> Arc<MetaDirectory> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(md_path.to_string())
            .or_insert_with(|| MetaDirectory::from_md_path(Arc::clone(meta_root), md_path))
            .clone()
    }

    pub fn insert(&self, md: Arc<MetaDirectory>) {
        self.entries
            .lock()
            .unwrap()
            .insert(md.md_path().to_string(), md);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_root(dir: &Path, content: &[u8]) -> Arc<MetaDirectory> {
        let meta_root = Arc::new(dir.to_path_buf());
        fs::write(dir.join("input.bin"), content).unwrap();
        MetaDirectory::for_root(meta_root, PathBuf::from("input.bin")).unwrap()
    }

    #[test]
    fn logical_path_strips_parent_dir_components() {
        let lp = LogicalPath::new("../../etc/passwd");
        assert!(!lp.absolute);
        assert_eq!(lp.path, PathBuf::from("etc/passwd"));

        // ".." is stripped outright rather than resolved against the
        // preceding segment, so it can never cancel out a component we
        // already accepted.
        let lp2 = LogicalPath::new("/etc/../etc/shadow");
        assert!(lp2.absolute);
        assert_eq!(lp2.path, PathBuf::from("etc/etc/shadow"));
    }

    #[test]
    fn open_reads_info_once_and_persists_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let root = new_root(dir.path(), b"hello world");
        {
            let _g = root.open(true).unwrap();
            root.add_labels(vec!["padding".into()]);
        }
        // info.json now has the label persisted.
        let on_disk: Info =
            serde_json::from_slice(&fs::read(root.abs_md_path().join("info.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk.labels, vec!["padding".to_string()]);

        // Re-opening the *same* Arc does not re-read (info already loaded);
        // mutate in-memory differently and confirm the write wins.
        {
            let _g = root.open(true).unwrap();
            assert_eq!(root.labels(), vec!["padding".to_string()]);
            root.add_labels(vec!["extra".into()]);
        }
        let on_disk2: Info =
            serde_json::from_slice(&fs::read(root.abs_md_path().join("info.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk2.labels, vec!["padding".to_string(), "extra".to_string()]);
    }

    #[test]
    fn extract_file_records_parent_and_child() {
        let dir = tempfile::tempdir().unwrap();
        let root = new_root(dir.path(), b"0123456789");
        let _g = root.open(true).unwrap();
        let child = root.extract_file(2, b"234").unwrap();
        assert_eq!(root.extracted_files().len(), 1);
        let g2 = child.open(true).unwrap();
        assert_eq!(child.parent_md().unwrap(), root.md_path().to_string());
        drop(g2);
    }
}
