//! Result cache for batch runs.
//!
//! Remembers which inputs were already upscaled, keyed by canonical input
//! path. Each
//! entry carries a signature of the input file (size, mtime and a sha256
//! digest of both with the path); a changed signature evicts the entry on the
//! next lookup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::PathsConfig;
use crate::error::{Result, UpscaleError};
use crate::persist::{atomic_read_json, atomic_write_json};

/// Identity of an input file at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub size: u64,
    pub modified_secs: u64,
    pub modified_nanos: u32,
    /// Hex sha256 of `path:size:secs.nanos`.
    pub digest: String,
}

impl FileSignature {
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| UpscaleError::io_with_path(e, path))?;
        let modified = metadata
            .modified()
            .map_err(|e| UpscaleError::io_with_path(e, path))?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let size = metadata.len();
        let modified_secs = modified.as_secs();
        let modified_nanos = modified.subsec_nanos();
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}:{}:{}.{:09}",
            path.display(),
            size,
            modified_secs,
            modified_nanos
        ));

        Ok(Self {
            size,
            modified_secs,
            modified_nanos,
            digest: hex::encode(hasher.finalize()),
        })
    }
}

/// What was produced for an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUpscale {
    pub output: PathBuf,
    pub model: String,
    pub scale: u32,
    pub completed_at: DateTime<Utc>,
}

impl CachedUpscale {
    pub fn new(output: impl Into<PathBuf>, model: impl Into<String>, scale: u32) -> Self {
        Self {
            output: output.into(),
            model: model.into(),
            scale,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    signature: FileSignature,
    data: CachedUpscale,
}

/// Where the cache lives and how big it is.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub cache_dir: PathBuf,
    pub cache_file: PathBuf,
    pub size_bytes: u64,
    pub entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Entries whose input changed or disappeared.
    pub stale_entries: usize,
    /// Entries whose output file is gone.
    pub missing_outputs: usize,
}

/// Persistent map from input path to upscale result.
#[derive(Debug)]
pub struct ResultCache {
    dir: PathBuf,
    file: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
}

impl ResultCache {
    /// Open (or start) the cache stored in `dir`.
    ///
    /// An unreadable cache file is logged and replaced by an empty cache.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| UpscaleError::io_with_path(e, &dir))?;
        let file = dir.join(PathsConfig::CACHE_FILENAME);

        let entries = match atomic_read_json(&file) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!("Could not load cache {}: {}", file.display(), e);
                BTreeMap::new()
            }
        };
        debug!("Opened result cache {} ({} entries)", file.display(), entries.len());

        Ok(Self {
            dir,
            file,
            entries,
            dirty: false,
        })
    }

    /// Open the cache under [`PathsConfig::cache_root`].
    pub fn open_default() -> Result<Self> {
        Self::open(PathsConfig::cache_root().join(PathsConfig::RESULT_CACHE_NAME))
    }

    /// Canonical form of `input`, so relative and absolute spellings of the
    /// same file share one entry. Missing files keep the path as given.
    fn canonical(input: &Path) -> PathBuf {
        fs::canonicalize(input).unwrap_or_else(|_| input.to_path_buf())
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    /// Cached result for `input`, if its signature still matches.
    pub fn get(&mut self, input: &Path) -> Option<CachedUpscale> {
        let path = Self::canonical(input);
        let key = Self::key(&path);
        let entry = self.entries.get(&key)?;
        match FileSignature::of(&path) {
            Ok(current) if current == entry.signature => Some(entry.data.clone()),
            _ => {
                debug!("Evicting stale cache entry for {}", input.display());
                self.entries.remove(&key);
                self.dirty = true;
                None
            }
        }
    }

    /// Whether `input` was already upscaled with `model` at `scale` and the
    /// output still exists.
    pub fn is_fresh(&mut self, input: &Path, model: &str, scale: u32) -> bool {
        self.get(input)
            .map(|c| c.model == model && c.scale == scale && c.output.exists())
            .unwrap_or(false)
    }

    pub fn insert(&mut self, input: &Path, data: CachedUpscale) -> Result<()> {
        let path = Self::canonical(input);
        let signature = FileSignature::of(&path)?;
        self.entries
            .insert(Self::key(&path), CacheEntry { signature, data });
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, input: &Path) -> bool {
        let removed = self
            .entries
            .remove(&Self::key(&Self::canonical(input)))
            .is_some();
        self.dirty |= removed;
        removed
    }

    /// Write the cache if anything changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        atomic_write_json(&self.file, &self.entries)?;
        self.dirty = false;
        Ok(())
    }

    /// Drop every entry and delete the cache file.
    pub fn clear(&mut self) -> Result<()> {
        if self.file.exists() {
            fs::remove_file(&self.file).map_err(|e| UpscaleError::io_with_path(e, &self.file))?;
        }
        self.entries.clear();
        self.dirty = false;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            cache_dir: self.dir.clone(),
            cache_file: self.file.clone(),
            size_bytes: fs::metadata(&self.file).map(|m| m.len()).unwrap_or(0),
            entries: self.entries.len(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            total_entries: self.entries.len(),
            ..Default::default()
        };
        for (key, entry) in &self.entries {
            let current = FileSignature::of(Path::new(key)).ok();
            if current.as_ref() != Some(&entry.signature) {
                stats.stale_entries += 1;
            }
            if !entry.data.output.exists() {
                stats.missing_outputs += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("photo.png");
        let output = temp.path().join("photo_upscaled.png");
        fs::write(&input, b"raw pixels").unwrap();
        fs::write(&output, b"big pixels").unwrap();
        (temp, input, output)
    }

    #[test]
    fn test_signature_is_stable() {
        let (_temp, input, _) = setup();
        let a = FileSignature::of(&input).unwrap();
        let b = FileSignature::of(&input).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size, 10);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn test_insert_save_reopen() {
        let (temp, input, output) = setup();
        let cache_dir = temp.path().join("cache");

        let mut cache = ResultCache::open(&cache_dir).unwrap();
        cache
            .insert(&input, CachedUpscale::new(&output, "RealESRGAN_x4plus", 4))
            .unwrap();
        cache.save().unwrap();

        let mut reopened = ResultCache::open(&cache_dir).unwrap();
        assert_eq!(reopened.len(), 1);
        let cached = reopened.get(&input).unwrap();
        assert_eq!(cached.output, output);
        assert!(reopened.is_fresh(&input, "RealESRGAN_x4plus", 4));
        assert!(!reopened.is_fresh(&input, "RealESRGAN_x2plus", 2));
    }

    #[test]
    fn test_changed_input_evicts_entry() {
        let (temp, input, output) = setup();
        let mut cache = ResultCache::open(temp.path().join("cache")).unwrap();
        cache.insert(&input, CachedUpscale::new(&output, "m", 4)).unwrap();

        fs::write(&input, b"different and longer content").unwrap();
        assert!(cache.get(&input).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_output_not_fresh() {
        let (temp, input, output) = setup();
        let mut cache = ResultCache::open(temp.path().join("cache")).unwrap();
        cache.insert(&input, CachedUpscale::new(&output, "m", 4)).unwrap();
        fs::remove_file(&output).unwrap();

        assert!(!cache.is_fresh(&input, "m", 4));
        assert_eq!(cache.stats().missing_outputs, 1);
    }

    #[test]
    fn test_clear_and_info() {
        let (temp, input, output) = setup();
        let mut cache = ResultCache::open(temp.path().join("cache")).unwrap();
        cache.insert(&input, CachedUpscale::new(&output, "m", 4)).unwrap();
        cache.save().unwrap();

        let info = cache.info();
        assert_eq!(info.entries, 1);
        assert!(info.size_bytes > 0);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!info.cache_file.exists());
    }

    #[test]
    fn test_equivalent_paths_share_an_entry() {
        let (temp, input, output) = setup();
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        let roundabout = temp.path().join("sub").join("..").join("photo.png");

        let mut cache = ResultCache::open(temp.path().join("cache")).unwrap();
        cache.insert(&roundabout, CachedUpscale::new(&output, "m", 4)).unwrap();
        assert!(cache.is_fresh(&input, "m", 4));
        assert_eq!(cache.stats().stale_entries, 0);

        assert!(cache.remove(&input));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PathsConfig::CACHE_FILENAME), "not json").unwrap();

        let cache = ResultCache::open(&dir).unwrap();
        assert!(cache.is_empty());
    }
}
