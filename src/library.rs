//! Library resolution: expands the user archives into the flat list of
//! libraries shipped with a job.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::{ExecutorError, Result};

/// Directory searched for the python runtime library in special runtime mode.
pub const OPT_DIR_ENV: &str = "SESSION_EXECUTOR_OPT_DIR";

const PYTHON_RUNTIME_PREFIX: &str = "python-runtime";
const LIBRARY_EXTENSION: &str = ".jar";

/// Extracts the libraries bundled inside an archive.
#[async_trait]
pub trait LibraryExtractor: Send + Sync {
    /// Returns local paths of the extracted libraries, possibly empty.
    async fn extract_bundled_libraries(&self, location: &Url) -> Result<Vec<PathBuf>>;
}

/// Combines the primary archive and the extracted libraries into the final
/// library list. Must be deterministic for identical inputs.
pub trait LibraryPolicy: Send + Sync {
    fn compute_library_set(
        &self,
        primary: &Url,
        extracted: &[PathBuf],
        special_runtime_mode: bool,
    ) -> Result<Vec<Url>>;
}

#[derive(Clone)]
pub struct DependencyResolver {
    extractor: Arc<dyn LibraryExtractor>,
    policy: Arc<dyn LibraryPolicy>,
}

impl DependencyResolver {
    pub fn new(extractor: Arc<dyn LibraryExtractor>, policy: Arc<dyn LibraryPolicy>) -> Self {
        Self { extractor, policy }
    }

    /// Resolve the libraries for `jar_locations`.
    ///
    /// The bundled libraries of every archive are extracted, but only the
    /// first archive is shipped itself. An empty list resolves to nothing.
    pub async fn resolve_libraries(
        &self,
        jar_locations: &[Url],
        special_runtime_mode: bool,
    ) -> Result<Vec<Url>> {
        let Some(primary) = jar_locations.first() else {
            return Ok(Vec::new());
        };

        let mut extracted = Vec::new();
        for location in jar_locations {
            let libs = self.extractor.extract_bundled_libraries(location).await?;
            debug!("Extracted {} bundled libraries from {}", libs.len(), location);
            extracted.extend(libs);
        }

        let libraries = self
            .policy
            .compute_library_set(primary, &extracted, special_runtime_mode)?;
        info!(
            "Resolved {} libraries from {} archives (special runtime mode: {})",
            libraries.len(),
            jar_locations.len(),
            special_runtime_mode
        );
        Ok(libraries)
    }
}

/// Extracts `lib/*.jar` entries of exploded archive directories.
///
/// Extracted files are named after a digest of the source archive path, so
/// resubmitting the same archive overwrites the previous copies instead of
/// piling up new ones. A plain-file archive is checked for readability and
/// bundles nothing.
#[derive(Debug, Clone)]
pub struct BundleExtractor {
    work_dir: PathBuf,
}

impl BundleExtractor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn in_temp_dir() -> Self {
        Self::new(env::temp_dir().join("session-executor").join("libs"))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn bundled_entries(lib_dir: &Path, location: &Url) -> Result<Vec<(String, PathBuf)>> {
        let read_err = |e: std::io::Error| {
            ExecutorError::extraction(format!(
                "Cannot list bundled libraries of {}: {}",
                location, e
            ))
        };

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(lib_dir).await.map_err(read_err)?;
        while let Some(entry) = dir.next_entry().await.map_err(read_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(LIBRARY_EXTENSION) {
                continue;
            }
            if entry.file_type().await.map_err(read_err)?.is_file() {
                entries.push((name, entry.path()));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[async_trait]
impl LibraryExtractor for BundleExtractor {
    async fn extract_bundled_libraries(&self, location: &Url) -> Result<Vec<PathBuf>> {
        if location.scheme() != "file" {
            return Err(ExecutorError::extraction(format!(
                "Only local archives can be extracted, got {}",
                location
            )));
        }
        let path = location.to_file_path().map_err(|_| {
            ExecutorError::extraction(format!("{} is not a valid local path", location))
        })?;

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            ExecutorError::extraction(format!("Cannot read archive {}: {}", location, e))
        })?;

        if metadata.is_file() {
            tokio::fs::File::open(&path).await.map_err(|e| {
                ExecutorError::extraction(format!("Cannot read archive {}: {}", location, e))
            })?;
            return Ok(Vec::new());
        }
        if !metadata.is_dir() {
            return Err(ExecutorError::extraction(format!(
                "{} is neither a file nor a directory",
                location
            )));
        }

        let lib_dir = path.join("lib");
        let has_lib_dir = tokio::fs::try_exists(&lib_dir).await.map_err(|e| {
            ExecutorError::extraction(format!(
                "Cannot inspect {} of {}: {}",
                lib_dir.display(),
                location,
                e
            ))
        })?;
        if !has_lib_dir {
            return Ok(Vec::new());
        }

        let entries = Self::bundled_entries(&lib_dir, location).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            ExecutorError::extraction(format!(
                "Cannot create extraction directory {}: {}",
                self.work_dir.display(),
                e
            ))
        })?;

        let digest = archive_digest(&path);
        let mut extracted = Vec::with_capacity(entries.len());
        for (name, source) in entries {
            let target = self.work_dir.join(format!("{}_{}", digest, name));
            tokio::fs::copy(&source, &target).await.map_err(|e| {
                ExecutorError::extraction(format!(
                    "Could not extract {} from {}: {}",
                    name, location, e
                ))
            })?;
            extracted.push(target);
        }

        Ok(extracted)
    }
}

fn archive_digest(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// Primary archive first, then extracted libraries in extraction order, then
/// the python runtime library in special runtime mode. Duplicates keep their
/// first position.
#[derive(Debug, Clone, Default)]
pub struct DefaultLibraryPolicy {
    runtime_library_dir: Option<PathBuf>,
}

impl DefaultLibraryPolicy {
    pub fn new(runtime_library_dir: Option<PathBuf>) -> Self {
        Self {
            runtime_library_dir,
        }
    }

    pub fn from_env() -> Self {
        Self::new(env::var_os(OPT_DIR_ENV).map(PathBuf::from))
    }

    fn python_runtime_library(&self) -> Result<PathBuf> {
        let dir = self.runtime_library_dir.as_ref().ok_or_else(|| {
            ExecutorError::extraction(format!(
                "Special runtime mode needs the runtime library directory ({} is not set)",
                OPT_DIR_ENV
            ))
        })?;

        let entries = std::fs::read_dir(dir).map_err(|e| {
            ExecutorError::extraction(format!("Cannot list {}: {}", dir.display(), e))
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| {
                        n.starts_with(PYTHON_RUNTIME_PREFIX) && n.ends_with(LIBRARY_EXTENSION)
                    })
            })
            .collect();
        candidates.sort();

        candidates.into_iter().next().ok_or_else(|| {
            ExecutorError::extraction(format!(
                "No {}*{} found in {}",
                PYTHON_RUNTIME_PREFIX,
                LIBRARY_EXTENSION,
                dir.display()
            ))
        })
    }
}

impl LibraryPolicy for DefaultLibraryPolicy {
    fn compute_library_set(
        &self,
        primary: &Url,
        extracted: &[PathBuf],
        special_runtime_mode: bool,
    ) -> Result<Vec<Url>> {
        let mut libraries = vec![primary.clone()];
        let mut push = |url: Url| {
            if !libraries.contains(&url) {
                libraries.push(url);
            }
        };

        for path in extracted {
            push(file_url(path)?);
        }
        if special_runtime_mode {
            push(file_url(&self.python_runtime_library()?)?);
        }

        Ok(libraries)
    }
}

fn file_url(path: &Path) -> Result<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).map_err(|e| {
            ExecutorError::extraction(format!("Cannot resolve {}: {}", path.display(), e))
        })?
    };
    Url::from_file_path(&absolute).map_err(|_| {
        ExecutorError::extraction(format!("{} cannot be expressed as a URL", path.display()))
    })
}
