//! Workspace cache index
//!
//! Binary little-endian `.tsnc` format:
//!
//! | field | meaning |
//! |-------|---------|
//! | `u32` magic `0x4E535450` ("PTSN") | file tag |
//! | `u32` builtin-API version | must match the runtime |
//! | `u32` extended-API version | must match the runtime |
//! | `u16` root length + bytes | staleness check |
//! | `u32` script count, then per script: path, size, modified-on, cached-on, trusted | source inventory |
//! | `u32` path count, then per path: length + bytes | interned paths |
//! | `u32` id-map count, then `(module_id, path_index)` pairs | module -> source map |
//!
//! A cache entry is stale when its source's modification timestamp
//! exceeds `cached_on`. Read failures are reported as warnings and the
//! pipeline falls back to a rebuild from source.

use std::io::Read;
use std::path::Path;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::types::ModuleId;

/// File tag, "PTSN" read as a little-endian u32
pub const MAGIC: u32 = 0x4E53_5450;
/// Version of the builtin API the cache was produced against
pub const BUILTIN_API_VERSION: u32 = 1;
/// Version of the extended API the cache was produced against
pub const EXTENDED_API_VERSION: u32 = 1;
/// Cache file extension
pub const CACHE_EXTENSION: &str = "tsnc";

/// Inventory entry for one script source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    /// Source path relative to the workspace root
    pub path: String,
    /// Source size in bytes
    pub size: u64,
    /// Source modification timestamp, milliseconds since the epoch
    pub modified_on: i64,
    /// When the cached artifact was produced
    pub cached_on: i64,
    /// Whether the script runs with trusted permissions
    pub is_trusted: bool,
}

impl ScriptInfo {
    /// Whether the cache entry is stale for the given current source
    /// modification time.
    pub fn is_stale(&self, current_modified_on: i64) -> bool {
        current_modified_on > self.cached_on
    }
}

/// The workspace cache index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceIndex {
    /// Root directory the index was produced for
    pub workspace_root: String,
    /// Script inventory
    pub scripts: Vec<ScriptInfo>,
    /// Interned paths
    pub paths: Vec<String>,
    /// Module id -> interned path index
    pub id_map: Vec<(ModuleId, u32)>,
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn str16(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Workspace("unexpected end of cache file".into()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn str16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Workspace("invalid path encoding in cache file".into()))
    }
}

impl WorkspaceIndex {
    /// New empty index for a root.
    pub fn new(workspace_root: &str) -> Self {
        Self {
            workspace_root: workspace_root.to_string(),
            ..Self::default()
        }
    }

    /// Record a compiled script and its module mapping.
    pub fn record(&mut self, path: &str, size: u64, modified_on: i64, module: ModuleId) {
        let path_index = match self.paths.iter().position(|p| p == path) {
            Some(i) => i as u32,
            None => {
                self.paths.push(path.to_string());
                (self.paths.len() - 1) as u32
            }
        };
        self.scripts.retain(|s| s.path != path);
        self.scripts.push(ScriptInfo {
            path: path.to_string(),
            size,
            modified_on,
            cached_on: Utc::now().timestamp_millis(),
            is_trusted: false,
        });
        self.id_map.retain(|(m, _)| *m != module);
        self.id_map.push((module, path_index));
    }

    /// Look up a script's inventory entry.
    pub fn script(&self, path: &str) -> Option<&ScriptInfo> {
        self.scripts.iter().find(|s| s.path == path)
    }

    /// Path mapped to a module id.
    pub fn path_of(&self, module: ModuleId) -> Option<&str> {
        let (_, idx) = self.id_map.iter().find(|(m, _)| *m == module)?;
        self.paths.get(*idx as usize).map(String::as_str)
    }

    /// Serialize to the on-disk format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(MAGIC);
        w.u32(BUILTIN_API_VERSION);
        w.u32(EXTENDED_API_VERSION);
        w.str16(&self.workspace_root);

        w.u32(self.scripts.len() as u32);
        for s in &self.scripts {
            w.str16(&s.path);
            w.u64(s.size);
            w.i64(s.modified_on);
            w.i64(s.cached_on);
            w.u8(u8::from(s.is_trusted));
        }

        w.u32(self.paths.len() as u32);
        for p in &self.paths {
            w.str16(p);
        }

        w.u32(self.id_map.len() as u32);
        for (module, idx) in &self.id_map {
            w.u32(module.0);
            w.u32(*idx);
        }
        w.buf
    }

    /// Parse the on-disk format. A bad magic or mismatched API version
    /// invalidates the whole cache.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        if r.u32()? != MAGIC {
            return Err(Error::Workspace("bad cache magic".into()));
        }
        if r.u32()? != BUILTIN_API_VERSION {
            return Err(Error::Workspace("builtin API version mismatch".into()));
        }
        if r.u32()? != EXTENDED_API_VERSION {
            return Err(Error::Workspace("extended API version mismatch".into()));
        }
        let workspace_root = r.str16()?;

        let script_count = r.u32()?;
        let mut scripts = Vec::with_capacity(script_count as usize);
        for _ in 0..script_count {
            scripts.push(ScriptInfo {
                path: r.str16()?,
                size: r.u64()?,
                modified_on: r.i64()?,
                cached_on: r.i64()?,
                is_trusted: r.u8()? != 0,
            });
        }

        let path_count = r.u32()?;
        let mut paths = Vec::with_capacity(path_count as usize);
        for _ in 0..path_count {
            paths.push(r.str16()?);
        }

        let map_count = r.u32()?;
        let mut id_map = Vec::with_capacity(map_count as usize);
        for _ in 0..map_count {
            let module = ModuleId(r.u32()?);
            let idx = r.u32()?;
            id_map.push((module, idx));
        }

        Ok(Self {
            workspace_root,
            scripts,
            paths,
            id_map,
        })
    }

    /// Cache file location under a workspace root.
    pub fn cache_file(root: &Path) -> std::path::PathBuf {
        root.join(format!("workspace.{}", CACHE_EXTENSION))
    }

    /// Persist the index.
    pub fn save(&self, root: &Path) -> Result<()> {
        std::fs::write(Self::cache_file(root), self.serialize())?;
        Ok(())
    }

    /// Load the index, falling back to an empty one (with a logged
    /// warning) when the file is missing, truncated or version-skewed.
    pub fn load_or_default(root: &Path, workspace_root: &str) -> Self {
        let path = Self::cache_file(root);
        let mut bytes = Vec::new();
        let loaded = std::fs::File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(Error::from)
            .and_then(|_| Self::deserialize(&bytes));
        match loaded {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, ?path, "cache unusable, rebuilding from source");
                Self::new(workspace_root)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkspaceIndex {
        let mut idx = WorkspaceIndex::new("/proj");
        idx.record("scripts/main.tsn", 120, 1_000, ModuleId(7));
        idx.record("scripts/util.tsn", 64, 2_000, ModuleId(9));
        idx
    }

    #[test]
    fn roundtrip() {
        let idx = sample();
        let bytes = idx.serialize();
        let parsed = WorkspaceIndex::deserialize(&bytes).unwrap();
        assert_eq!(idx, parsed);
    }

    #[test]
    fn magic_is_ptsn() {
        let bytes = sample().serialize();
        assert_eq!(&bytes[..4], &[0x50, 0x54, 0x53, 0x4E]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample().serialize();
        bytes[0] = 0;
        assert!(WorkspaceIndex::deserialize(&bytes).is_err());
    }

    #[test]
    fn rejects_truncation() {
        let bytes = sample().serialize();
        assert!(WorkspaceIndex::deserialize(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn staleness_compares_against_cached_on() {
        let idx = sample();
        let s = idx.script("scripts/main.tsn").unwrap();
        assert!(!s.is_stale(s.cached_on));
        assert!(s.is_stale(s.cached_on + 1));
    }

    #[test]
    fn id_map_resolves_paths() {
        let idx = sample();
        assert_eq!(idx.path_of(ModuleId(7)), Some("scripts/main.tsn"));
        assert_eq!(idx.path_of(ModuleId(8)), None);
    }
}
