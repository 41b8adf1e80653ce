//! Directory catalog: read-mostly reference data about submission targets.
//!
//! The queue only ever reads the catalog through [`DirectoryCatalog`]. The
//! bundled [`StaticCatalog`] is loaded from a JSON array on disk.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How hard a directory is to submit to. Orders easy first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Derives difficulty from a domain authority score.
    pub fn from_domain_authority(authority: Option<u32>) -> Self {
        match authority {
            Some(da) if da >= 70 => Difficulty::Hard,
            Some(da) if da >= 40 => Difficulty::Medium,
            Some(_) => Difficulty::Easy,
            None => Difficulty::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submission target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub id: String,
    pub name: String,
    pub submission_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_authority: Option<u32>,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl Directory {
    /// The declared difficulty, or one derived from domain authority.
    pub fn effective_difficulty(&self) -> Difficulty {
        self.difficulty
            .unwrap_or_else(|| Difficulty::from_domain_authority(self.domain_authority))
    }
}

/// Lookup of directory reference data by id.
pub trait DirectoryCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<Directory>;
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate directory id '{0}' in catalog")]
    DuplicateId(String),
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    directories: HashMap<String, Directory>,
}

impl StaticCatalog {
    pub fn new(directories: Vec<Directory>) -> Result<Self, CatalogError> {
        let mut map = HashMap::with_capacity(directories.len());
        for directory in directories {
            if map.contains_key(&directory.id) {
                return Err(CatalogError::DuplicateId(directory.id));
            }
            map.insert(directory.id.clone(), directory);
        }
        Ok(Self { directories: map })
    }

    pub fn from_json_str(content: &str) -> Result<Self, CatalogError> {
        let directories: Vec<Directory> = serde_json::from_str(content)?;
        Self::new(directories)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let catalog = Self::from_json_str(&content)?;
        log::info!(
            "Loaded {} directories from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }
}

impl DirectoryCatalog for StaticCatalog {
    fn get(&self, id: &str) -> Option<Directory> {
        self.directories.get(id).cloned()
    }
}
