//! Template storage
//!
//! The include pass never talks to blob storage directly. It asks a
//! [`TemplateStore`] whether a storage key exists and, in deep mode, for
//! the content behind it. This module also owns the mapping from a logical
//! include path to a storage key and the list of accepted source types.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Source types templates can be stored under
pub const SOURCE_TYPES: &[&str] = &["HL7", "Hl7v2", "HL7V2", "CDA", "FHIR", "X12", "CUSTOM", "ADT"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Source type must be one of: {}", SOURCE_TYPES.join(", "))]
    UnknownSourceType(String),
}

/// A validated source type, used as the storage namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceType(String);

impl SourceType {
    /// Accept any known source type case-insensitively, keeping the caller's casing
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        if SOURCE_TYPES.iter().any(|known| known.eq_ignore_ascii_case(value)) {
            Ok(Self(value.to_string()))
        } else {
            Err(StorageError::UnknownSourceType(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map a logical include path onto its storage key
///
/// The last segment becomes `_name.liquid` (prefix and extension are only
/// added when missing) and the whole path is placed under `namespace`:
/// `Resource/Organization` in `HL7` is `HL7/Resource/_Organization.liquid`.
pub fn storage_key(namespace: &str, include_path: &str) -> String {
    let (folders, file_name) = match include_path.rsplit_once('/') {
        Some((folders, file_name)) => (Some(folders), file_name),
        None => (None, include_path),
    };

    let mut file_name = if file_name.starts_with('_') {
        file_name.to_string()
    } else {
        format!("_{file_name}")
    };
    if !file_name.ends_with(".liquid") {
        file_name.push_str(".liquid");
    }

    match folders {
        Some(folders) => format!("{namespace}/{folders}/{file_name}"),
        None => format!("{namespace}/{file_name}"),
    }
}

/// Include-existence capability
///
/// `exists` must not fail: implementations report anything they cannot
/// resolve, transient errors included, as `false`.
pub trait TemplateStore: Send + Sync {
    fn exists(&self, key: &str) -> bool;

    /// Content behind a key, used to follow includes recursively
    fn fetch(&self, _key: &str) -> Option<String> {
        None
    }
}

impl<F> TemplateStore for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn exists(&self, key: &str) -> bool {
        self(key)
    }
}

/// Storage keys resolved as paths below a root directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty() && *segment != "..")
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl TemplateStore for DirectoryStore {
    fn exists(&self, key: &str) -> bool {
        let path = self.resolve(key);
        match path.try_exists() {
            Ok(exists) => exists && path.is_file(),
            Err(e) => {
                log::warn!("Failed to check template {}: {}", path.display(), e);
                false
            }
        }
    }

    fn fetch(&self, key: &str) -> Option<String> {
        let path = self.resolve(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                log::warn!("Failed to read template {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// In-memory key to content map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    templates: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, content: impl Into<String>) {
        self.templates.insert(key.into(), content.into());
    }

    pub fn with_template(mut self, key: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(key, content);
        self
    }
}

impl TemplateStore for MemoryStore {
    fn exists(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    fn fetch(&self, key: &str) -> Option<String> {
        self.templates.get(key).cloned()
    }
}
