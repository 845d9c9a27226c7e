//! Resolving model names to ONNX files.
//!
//! A models directory may carry a `config.json` registry mapping names to
//! files and per-model settings. Names missing from the registry are searched
//! on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::ValueRange;
use crate::config::PathsConfig;
use crate::error::{Result, UpscaleError};
use crate::persist::{atomic_read_json, atomic_write_json};

/// Registry record for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Absolute, or relative to the models directory.
    pub onnx_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default)]
    pub value_range: ValueRange,
}

/// Contents of `<models_dir>/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModelRegistry {
    pub fn path_in(models_dir: &Path) -> PathBuf {
        models_dir.join(PathsConfig::REGISTRY_FILENAME)
    }

    /// Load the registry from `models_dir`.
    pub fn load(models_dir: &Path) -> Result<Self> {
        let path = Self::path_in(models_dir);
        atomic_read_json(&path)?.ok_or_else(|| UpscaleError::Config {
            message: format!(
                "no model registry at {} (place .onnx files in {} or create config.json)",
                path.display(),
                models_dir.display()
            ),
        })
    }

    /// Load the registry, treating a missing file as empty.
    pub fn load_or_default(models_dir: &Path) -> Result<Self> {
        Ok(atomic_read_json(&Self::path_in(models_dir))?.unwrap_or_default())
    }

    pub fn save(&mut self, models_dir: &Path) -> Result<()> {
        self.updated_at = Some(Utc::now());
        atomic_write_json(&Self::path_in(models_dir), self)
    }

    pub fn register(&mut self, name: impl Into<String>, entry: ModelEntry) {
        self.models.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.models.get(name)
    }

    /// Every registered model with its path resolved against `models_dir`.
    pub fn list(&self, models_dir: &Path) -> Vec<ResolvedModel> {
        self.models
            .iter()
            .map(|(name, entry)| ResolvedModel::from_entry(name, entry, models_dir))
            .collect()
    }
}

/// A model file ready to load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModel {
    pub name: String,
    pub path: PathBuf,
    /// Known scale; `None` leaves inference to the loader.
    pub scale: Option<u32>,
    pub value_range: ValueRange,
}

impl ResolvedModel {
    fn from_entry(name: &str, entry: &ModelEntry, models_dir: &Path) -> Self {
        let path = if entry.onnx_path.is_absolute() {
            entry.onnx_path.clone()
        } else {
            models_dir.join(&entry.onnx_path)
        };
        Self {
            name: name.to_string(),
            path,
            scale: entry.scale.or_else(|| scale_from_name(name)),
            value_range: entry.value_range,
        }
    }

    fn from_file(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            scale: scale_from_name(&name),
            name,
            path,
            value_range: ValueRange::default(),
        }
    }
}

/// Find the model file for `name_or_path`.
///
/// Order: an existing file path, a registry entry whose file exists,
/// `<dir>/<name>.onnx`, `<dir>/onnx/<name>.onnx`, lowercase variants of both,
/// then any `*<name>*.onnx` below `models_dir`.
pub fn resolve_model(name_or_path: &str, models_dir: &Path) -> Result<ResolvedModel> {
    let direct = PathBuf::from(name_or_path);
    if direct.is_file() {
        return Ok(ResolvedModel::from_file(direct));
    }

    let mut searched = Vec::new();

    match ModelRegistry::load_or_default(models_dir) {
        Ok(registry) => {
            if let Some(entry) = registry.get(name_or_path) {
                let resolved = ResolvedModel::from_entry(name_or_path, entry, models_dir);
                if resolved.path.is_file() {
                    return Ok(resolved);
                }
                warn!(
                    "Registry entry '{}' points at missing file {}",
                    name_or_path,
                    resolved.path.display()
                );
                searched.push(resolved.path);
            }
        }
        Err(e) => warn!("Ignoring unreadable model registry: {}", e),
    }

    let file_name = format!("{}.{}", name_or_path, PathsConfig::MODEL_EXTENSION);
    let lower_name = file_name.to_lowercase();
    let onnx_dir = models_dir.join(PathsConfig::ONNX_SUBDIR_NAME);
    let candidates = [
        models_dir.join(&file_name),
        onnx_dir.join(&file_name),
        models_dir.join(&lower_name),
        onnx_dir.join(&lower_name),
    ];
    for candidate in candidates {
        if candidate.is_file() {
            debug!("Resolved model '{}' to {}", name_or_path, candidate.display());
            return Ok(ResolvedModel::from_file(candidate));
        }
        if !searched.contains(&candidate) {
            searched.push(candidate);
        }
    }

    if let Some(found) = search_models(models_dir, name_or_path) {
        debug!("Found model '{}' by search at {}", name_or_path, found.display());
        return Ok(ResolvedModel::from_file(found));
    }
    searched.push(models_dir.to_path_buf());

    Err(UpscaleError::ModelNotFound {
        name: name_or_path.to_string(),
        searched,
    })
}

/// All `.onnx` files below `models_dir`, sorted by path.
pub fn discover_models(models_dir: &Path) -> Vec<ResolvedModel> {
    onnx_files(models_dir)
        .into_iter()
        .map(ResolvedModel::from_file)
        .collect()
}

fn search_models(models_dir: &Path, name: &str) -> Option<PathBuf> {
    let needle = name.to_lowercase();
    onnx_files(models_dir).into_iter().find(|path| {
        path.file_name()
            .map(|f| f.to_string_lossy().to_lowercase().contains(&needle))
            .unwrap_or(false)
    })
}

fn onnx_files(models_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(models_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case(PathsConfig::MODEL_EXTENSION))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Upscale factor encoded in a model name (`RealESRGAN_x4plus`, `4x-UltraSharp`).
pub fn scale_from_name(name: &str) -> Option<u32> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"(?i)(?:^|[^a-z0-9])(?:x([1-8])|([1-8])x)(?:[^0-9]|$)").ok())
        .as_ref()?;
    let caps = pattern.captures(name)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"onnx").unwrap();
    }

    #[test]
    fn test_scale_from_name() {
        assert_eq!(scale_from_name("RealESRGAN_x4plus"), Some(4));
        assert_eq!(scale_from_name("RealESRGAN_x2plus"), Some(2));
        assert_eq!(scale_from_name("4x-UltraSharp"), Some(4));
        assert_eq!(scale_from_name("realesr-animevideov3-x2"), Some(2));
        assert_eq!(scale_from_name("2x_AnimeJaNai_HD"), Some(2));
        assert_eq!(scale_from_name("codec_x264"), None);
        assert_eq!(scale_from_name("sdxl"), None);
    }

    #[test]
    fn test_resolve_existing_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("custom_x2.onnx");
        touch(&file);

        let resolved = resolve_model(file.to_str().unwrap(), Path::new("/nonexistent")).unwrap();
        assert_eq!(resolved.path, file);
        assert_eq!(resolved.scale, Some(2));
    }

    #[test]
    fn test_resolve_registry_entry() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("weights/esrgan.onnx"));

        let mut registry = ModelRegistry::default();
        registry.register(
            "anime",
            ModelEntry {
                onnx_path: PathBuf::from("weights/esrgan.onnx"),
                scale: Some(2),
                value_range: ValueRange::Byte,
            },
        );
        registry.save(temp.path()).unwrap();

        let resolved = resolve_model("anime", temp.path()).unwrap();
        assert_eq!(resolved.path, temp.path().join("weights/esrgan.onnx"));
        assert_eq!(resolved.scale, Some(2));
        assert_eq!(resolved.value_range, ValueRange::Byte);
    }

    #[test]
    fn test_resolve_onnx_subdir_and_lowercase() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("onnx/realesrgan_x4plus.onnx"));

        let resolved = resolve_model("RealESRGAN_x4plus", temp.path()).unwrap();
        assert_eq!(resolved.path, temp.path().join("onnx/realesrgan_x4plus.onnx"));
        assert_eq!(resolved.scale, Some(4));
    }

    #[test]
    fn test_resolve_by_search() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("deep/nested/4x-UltraSharp-fp16.onnx"));

        let resolved = resolve_model("UltraSharp", temp.path()).unwrap();
        assert!(resolved.path.ends_with("4x-UltraSharp-fp16.onnx"));
    }

    #[test]
    fn test_not_found_lists_searched_paths() {
        let temp = TempDir::new().unwrap();
        let err = resolve_model("missing", temp.path()).unwrap_err();
        match err {
            UpscaleError::ModelNotFound { name, searched } => {
                assert_eq!(name, "missing");
                assert!(searched.contains(&temp.path().join("missing.onnx")));
                assert!(searched.contains(&temp.path().join("onnx/missing.onnx")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_missing_registry_is_config_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            ModelRegistry::load(temp.path()),
            Err(UpscaleError::Config { .. })
        ));
    }

    #[test]
    fn test_registry_roundtrip_sets_updated_at() {
        let temp = TempDir::new().unwrap();
        let mut registry = ModelRegistry {
            default_model: Some("RealESRGAN_x4plus".to_string()),
            ..Default::default()
        };
        registry.save(temp.path()).unwrap();

        let loaded = ModelRegistry::load(temp.path()).unwrap();
        assert_eq!(loaded.default_model.as_deref(), Some("RealESRGAN_x4plus"));
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_discover_models_sorted() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("b_x2.onnx"));
        touch(&temp.path().join("onnx/a_x4.onnx"));
        fs::write(temp.path().join("readme.txt"), "x").unwrap();

        let names: Vec<String> = discover_models(temp.path())
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["b_x2".to_string(), "a_x4".to_string()]);
    }
}
