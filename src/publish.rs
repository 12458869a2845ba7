//! Writing finished bundles to the output directory.
//!
//! In atomic mode every bundle is first written to a staging directory inside
//! the output directory and renamed into place only once the whole build
//! succeeded; dropping an uncommitted [`Publisher`] discards the staging
//! directory. Incremental mode writes each bundle as soon as it is accepted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cli::BuildMode;
use crate::compat::LanguageLevel;
use crate::config::{Config, PublishMode};
use crate::errors::{DashpackError, Result};
use crate::hash::HashProvider;

pub const MANIFEST_FILE_NAME: &str = "dashpack-manifest.json";

/// A bundle ready to be written
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    pub entry: String,
    pub file_name: String,
    pub code: String,
    /// Source map JSON, written as `<file_name>.map`
    pub source_map: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedBundle {
    pub entry: String,
    pub file: String,
    pub size: usize,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
}

#[derive(Debug, Serialize)]
struct BuildManifest<'a> {
    build_id: &'a str,
    created_at: String,
    version: &'static str,
    mode: &'static str,
    level: String,
    hash_function: &'a str,
    bundles: &'a [PublishedBundle],
}

/// Outcome of a committed build
#[derive(Debug)]
pub struct PublishSummary {
    pub build_id: String,
    pub output_dir: PathBuf,
    pub bundles: Vec<PublishedBundle>,
    /// Stale bundles removed by `output.clean`
    pub removed: Vec<PathBuf>,
    pub manifest: Option<PathBuf>,
}

pub struct Publisher {
    output_dir: PathBuf,
    publish: PublishMode,
    clean: bool,
    manifest: bool,
    filename_pattern: String,
    hash: Arc<HashProvider>,
    hash_function: String,
    digest_length: usize,
    mode: BuildMode,
    level: LanguageLevel,
    build_id: String,
    staging: Option<TempDir>,
    accepted: Vec<PublishedBundle>,
}

impl Publisher {
    pub fn new(config: &Config, mode: BuildMode, level: LanguageLevel, hash: Arc<HashProvider>) -> Self {
        Self {
            output_dir: config.output_dir(),
            publish: config.output.publish,
            clean: config.output.clean,
            manifest: config.output.manifest,
            filename_pattern: config.output.filename.clone(),
            hash,
            hash_function: config.output.hash_function.clone(),
            digest_length: config.output.hash_digest_length,
            mode,
            level,
            build_id: Uuid::new_v4().to_string(),
            staging: None,
            accepted: Vec::new(),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Take one finished bundle: staged in atomic mode, written in incremental mode
    pub fn accept(&mut self, bundle: &BuiltBundle) -> Result<()> {
        let dir = match self.publish {
            PublishMode::Atomic => self.staging_dir()?,
            PublishMode::Incremental => {
                self.ensure_output_dir()?;
                self.output_dir.clone()
            }
        };

        let target = dir.join(&bundle.file_name);
        std::fs::write(&target, &bundle.code)
            .map_err(|e| DashpackError::file_system_error("Failed to write bundle", &target, e))?;
        debug!("Wrote {}", target.display());

        let source_map = match &bundle.source_map {
            Some(json) => {
                let name = map_file_name(&bundle.file_name);
                let target = dir.join(&name);
                std::fs::write(&target, json)
                    .map_err(|e| DashpackError::file_system_error("Failed to write source map", &target, e))?;
                Some(name)
            }
            None => None,
        };

        let hash = self
            .hash
            .digest_hex(&self.hash_function, bundle.code.as_bytes(), self.digest_length)?;
        self.accepted.push(PublishedBundle {
            entry: bundle.entry.clone(),
            file: bundle.file_name.clone(),
            size: bundle.code.len(),
            hash,
            source_map,
        });
        Ok(())
    }

    /// Publish everything accepted so far, then clean up and write the manifest
    pub fn commit(mut self) -> Result<PublishSummary> {
        if let Some(staging) = self.staging.take() {
            for bundle in &self.accepted {
                for file in std::iter::once(&bundle.file).chain(bundle.source_map.as_ref()) {
                    let from = staging.path().join(file);
                    let to = self.output_dir.join(file);
                    std::fs::rename(&from, &to)
                        .map_err(|e| DashpackError::file_system_error("Failed to publish bundle", &to, e))?;
                }
            }
            staging
                .close()
                .map_err(|e| DashpackError::file_system_error("Failed to remove staging directory", &self.output_dir, e))?;
        }

        self.accepted.sort_by(|a, b| a.entry.cmp(&b.entry));

        let removed = if self.clean { self.remove_stale()? } else { Vec::new() };
        let manifest = if self.manifest {
            Some(self.write_manifest()?)
        } else {
            None
        };

        info!(
            "Published {} bundles to {}",
            self.accepted.len(),
            self.output_dir.display()
        );

        Ok(PublishSummary {
            build_id: self.build_id,
            output_dir: self.output_dir,
            bundles: self.accepted,
            removed,
            manifest,
        })
    }

    fn ensure_output_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            DashpackError::file_system_error("Failed to create output directory", &self.output_dir, e)
        })
    }

    fn staging_dir(&mut self) -> Result<PathBuf> {
        if let Some(staging) = &self.staging {
            return Ok(staging.path().to_path_buf());
        }

        self.ensure_output_dir()?;
        let staging = tempfile::Builder::new()
            .prefix(".dashpack-staging-")
            .tempdir_in(&self.output_dir)
            .map_err(|e| {
                DashpackError::file_system_error("Failed to create staging directory", &self.output_dir, e)
            })?;
        let path = staging.path().to_path_buf();
        self.staging = Some(staging);
        Ok(path)
    }

    /// Bundles (and their maps) in the output directory that match the file
    /// name pattern but were not written by this build
    fn remove_stale(&self) -> Result<Vec<PathBuf>> {
        let (prefix, suffix) = self
            .filename_pattern
            .split_once("[name]")
            .unwrap_or((self.filename_pattern.as_str(), ""));
        let current: HashSet<&str> = self
            .accepted
            .iter()
            .flat_map(|b| std::iter::once(b.file.as_str()).chain(b.source_map.as_deref()))
            .collect();

        let mut removed = Vec::new();
        for entry in WalkDir::new(&self.output_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            let bundle_name = name.strip_suffix(".map").unwrap_or(&name);
            let is_bundle = bundle_name.len() > prefix.len() + suffix.len()
                && bundle_name.starts_with(prefix)
                && bundle_name.ends_with(suffix);
            if !is_bundle || current.contains(&*name) {
                continue;
            }

            std::fs::remove_file(entry.path()).map_err(|e| {
                DashpackError::file_system_error("Failed to remove stale bundle", entry.path(), e)
            })?;
            info!("Removed stale bundle {}", name);
            removed.push(entry.path().to_path_buf());
        }

        Ok(removed)
    }

    fn write_manifest(&self) -> Result<PathBuf> {
        let manifest = BuildManifest {
            build_id: &self.build_id,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            version: crate::VERSION,
            mode: self.mode.as_str(),
            level: self.level.to_string(),
            hash_function: self.hash.effective_algorithm(&self.hash_function),
            bundles: &self.accepted,
        };

        let path = self.output_dir.join(MANIFEST_FILE_NAME);
        let content = serde_json::to_string_pretty(&manifest).map_err(|e| {
            DashpackError::configuration_with_source("Failed to serialize build manifest", e)
        })?;
        std::fs::write(&path, content)
            .map_err(|e| DashpackError::file_system_error("Failed to write build manifest", &path, e))?;
        Ok(path)
    }
}

pub(crate) fn map_file_name(bundle_file: &str) -> String {
    format!("{}.map", bundle_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(root: &Path, publish: PublishMode) -> Config {
        let mut config = Config::default();
        config.root = root.to_path_buf();
        config.output.publish = publish;
        config
    }

    fn publisher(config: &Config) -> Publisher {
        Publisher::new(
            config,
            BuildMode::Development,
            LanguageLevel::Es5,
            Arc::new(HashProvider::default()),
        )
    }

    fn bundle(entry: &str) -> BuiltBundle {
        BuiltBundle {
            entry: entry.to_string(),
            file_name: format!("{}.bundle.js", entry),
            code: format!("var {} = 1;\n", entry),
            source_map: None,
        }
    }

    #[test]
    fn test_atomic_publish_waits_for_commit() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), PublishMode::Atomic);
        let mut publisher = publisher(&config);

        publisher.accept(&bundle("shellui")).unwrap();
        assert!(!dir.path().join("dist/shellui.bundle.js").exists());

        let summary = publisher.commit().unwrap();
        assert!(dir.path().join("dist/shellui.bundle.js").exists());
        assert_eq!(summary.bundles.len(), 1);
        assert_eq!(summary.bundles[0].hash.len(), 20);

        // staging directory is gone
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("dist")).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_dropped_publisher_publishes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), PublishMode::Atomic);
        let mut publisher = publisher(&config);

        publisher.accept(&bundle("shellui")).unwrap();
        drop(publisher);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("dist")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_incremental_writes_immediately() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), PublishMode::Incremental);
        let mut publisher = publisher(&config);

        publisher.accept(&bundle("shellui")).unwrap();
        assert!(dir.path().join("dist/shellui.bundle.js").exists());
    }

    #[test]
    fn test_clean_removes_unconfigured_bundles_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let dist = dir.path().join("dist");
        std::fs::create_dir_all(&dist).unwrap();
        std::fs::write(dist.join("Old.dashboard.bundle.js"), "var old;").unwrap();
        std::fs::write(dist.join("notes.txt"), "keep").unwrap();

        let mut config = config(dir.path(), PublishMode::Atomic);
        config.output.clean = true;
        let mut publisher = publisher(&config);
        publisher.accept(&bundle("shellui")).unwrap();
        let summary = publisher.commit().unwrap();

        assert_eq!(summary.removed, vec![dist.join("Old.dashboard.bundle.js")]);
        assert!(dist.join("notes.txt").exists());
        assert!(dist.join("shellui.bundle.js").exists());
    }

    #[test]
    fn test_source_maps_are_published_and_cleaned() {
        let dir = tempfile::TempDir::new().unwrap();
        let dist = dir.path().join("dist");
        std::fs::create_dir_all(&dist).unwrap();
        std::fs::write(dist.join("Old.dashboard.bundle.js.map"), "{}").unwrap();
        std::fs::write(dist.join("shellui.bundle.js.map"), "{}").unwrap();

        let mut config = config(dir.path(), PublishMode::Atomic);
        config.output.clean = true;
        let mut publisher = publisher(&config);
        let mut mapped = bundle("Base.dashboard");
        mapped.source_map = Some("{\"version\":3}".to_string());
        publisher.accept(&mapped).unwrap();
        publisher.accept(&bundle("shellui")).unwrap();
        assert!(!dist.join("Base.dashboard.bundle.js.map").exists());

        let summary = publisher.commit().unwrap();
        assert_eq!(
            std::fs::read_to_string(dist.join("Base.dashboard.bundle.js.map")).unwrap(),
            "{\"version\":3}"
        );
        assert_eq!(summary.bundles[0].source_map.as_deref(), Some("Base.dashboard.bundle.js.map"));
        assert_eq!(summary.bundles[1].source_map, None);

        // maps of removed entries and maps this build no longer writes
        let mut removed = summary.removed.clone();
        removed.sort();
        assert_eq!(
            removed,
            vec![dist.join("Old.dashboard.bundle.js.map"), dist.join("shellui.bundle.js.map")]
        );
    }

    #[test]
    fn test_manifest_lists_bundles() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config(dir.path(), PublishMode::Atomic);
        config.output.manifest = true;
        let mut publisher = publisher(&config);
        publisher.accept(&bundle("shellui")).unwrap();
        publisher.accept(&bundle("Base.dashboard")).unwrap();
        let summary = publisher.commit().unwrap();

        let content = std::fs::read_to_string(summary.manifest.unwrap()).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(manifest["mode"], "development");
        assert_eq!(manifest["level"], "es5");
        assert_eq!(manifest["hash_function"], "md5");
        assert_eq!(manifest["bundles"][0]["entry"], "Base.dashboard");
        assert_eq!(manifest["bundles"][1]["file"], "shellui.bundle.js");
    }
}
