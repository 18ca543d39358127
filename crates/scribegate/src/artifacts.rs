//! Artifact storage layout and secure path resolution.
//!
//! Every run writes into its own directory under the output root:
//! `{owner_type}_{owner_identifier}/run_{id}_{topic_slug}`. Artifact
//! reads go through [`ArtifactStore::resolve`], which refuses anything
//! that would escape the run's directory. Denials surface as NotFound
//! so a probing caller learns nothing about what exists.

use std::path::{Component, Path, PathBuf};

use crate::actor::OwnerType;
use crate::error::{Result, ScribegateError};

/// Well-known artifact filenames a completed run may contain.
pub const ARTIFACT_OUTLINE: &str = "outline.json";
pub const ARTIFACT_ARTICLE: &str = "article_polished.txt";
pub const ARTIFACT_SOURCES: &str = "sources.json";

/// Maximum length of a topic slug in a directory name.
const MAX_SLUG_LEN: usize = 64;

/// Lowercases a topic and folds path-hostile characters to `_`.
/// This is the single source of directory names derived from topics;
/// submission and retrieval both go through it.
pub fn topic_slug(topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len());
    for c in topic.trim().chars().take(MAX_SLUG_LEN) {
        if c.is_whitespace() || c == '/' || c == '\\' {
            slug.push('_');
        } else {
            slug.extend(c.to_lowercase());
        }
    }
    slug
}

/// Relative directory for a run: `{owner_type}_{identifier}/run_{id}_{slug}`.
pub fn run_dir_name(
    owner_type: OwnerType,
    owner_identifier: &str,
    run_id: i64,
    topic: &str,
) -> String {
    format!(
        "{}_{}/run_{}_{}",
        owner_type.as_str(),
        owner_identifier,
        run_id,
        topic_slug(topic)
    )
}

/// Resolves artifact paths inside a fixed output root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory for a run, creating it if needed.
    pub fn create_run_dir(&self, run_dir: &str) -> Result<PathBuf> {
        let dir = self.root.join(run_dir);
        std::fs::create_dir_all(&dir).map_err(|e| {
            log::error!("Failed to create run directory {}: {}", dir.display(), e);
            ScribegateError::Storage {
                path: dir.display().to_string(),
                source: e,
            }
        })?;
        Ok(dir)
    }

    /// Resolves a named artifact inside a run's directory.
    ///
    /// The filename must be a bare name (no separators, no parent
    /// references) and the canonicalized result must stay inside the
    /// run directory. Violations and missing files alike come back as
    /// NotFound.
    pub fn resolve(&self, run_dir: &str, filename: &str) -> Result<PathBuf> {
        if !is_bare_filename(filename) {
            log::warn!("Rejected artifact name '{}'", filename);
            return Err(ScribegateError::not_found("artifact"));
        }

        let run_root = self
            .root
            .join(run_dir)
            .canonicalize()
            .map_err(|_| ScribegateError::not_found("artifact"))?;
        let candidate = run_root
            .join(filename)
            .canonicalize()
            .map_err(|_| ScribegateError::not_found("artifact"))?;

        // Symlinks resolved above; containment is checked on the real path.
        if !candidate.starts_with(&run_root) || !candidate.is_file() {
            log::warn!(
                "Artifact resolution escaped run directory: {}",
                candidate.display()
            );
            return Err(ScribegateError::not_found("artifact"));
        }
        Ok(candidate)
    }
}

/// A bare filename: non-empty, no separators, no `.`/`..`, no NUL.
fn is_bare_filename(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') {
        return false;
    }
    let path = Path::new(name);
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
