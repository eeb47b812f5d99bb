//! Library catalog loading and selection.
//!
//! The catalog is a JSON document mapping categories to subcategories to
//! library names:
//!
//! ```json
//! {
//!   "frontend_frameworks": {
//!     "react": ["react", "next-js"],
//!     "vue": ["vue"]
//!   }
//! }
//! ```
//!
//! File order is preserved, so jobs are queued in the order they appear.
//! Two names in one subcategory that slugify to the same file name (`Next.js`
//! and `next-js`) would overwrite each other's document, so only the first is
//! kept.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::job::JobId;
use crate::{Error, Result};

/// Library selected when test mode names no filter.
pub const TEST_CATEGORY: &str = "frontend_frameworks";
/// Subcategory selected when test mode names no filter.
pub const TEST_SUBCATEGORY: &str = "react";
/// Library selected when test mode names no filter.
pub const TEST_LIBRARY: &str = "react";

#[allow(clippy::expect_used)]
static SLUG_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9-]+").expect("slug pattern is valid"));

/// File-system safe name for a library.
///
/// ```rust
/// use rulegen_core::catalog::slugify;
///
/// assert_eq!(slugify("Next.js"), "next-js");
/// assert_eq!(slugify("  @tanstack/Query "), "tanstack-query");
/// ```
#[must_use]
pub fn slugify(name: &str) -> String {
    SLUG_UNSAFE
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// One library in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Top-level category.
    pub category: String,
    /// Subcategory within the category.
    pub subcategory: String,
    /// Library name as written in the catalog.
    pub name: String,
}

impl LibraryEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        subcategory: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            name: name.into(),
        }
    }

    /// Job identifier for this library.
    #[must_use]
    pub fn id(&self) -> JobId {
        JobId::from_parts(&self.category, &self.subcategory, &self.name)
    }

    /// File-system safe name.
    #[must_use]
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// Exact-match selection applied once at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryFilter {
    /// Keep only this category.
    pub category: Option<String>,
    /// Keep only this subcategory.
    pub subcategory: Option<String>,
    /// Keep only this library.
    pub library: Option<String>,
}

impl LibraryFilter {
    /// Whether `entry` passes every field that is set.
    #[must_use]
    pub fn matches(&self, entry: &LibraryEntry) -> bool {
        self.category.as_deref().is_none_or(|c| c == entry.category)
            && self
                .subcategory
                .as_deref()
                .is_none_or(|s| s == entry.subcategory)
            && self.library.as_deref().is_none_or(|l| l == entry.name)
    }

    /// Whether no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.category.is_none() && self.subcategory.is_none() && self.library.is_none()
    }
}

/// Ordered, de-duplicated list of libraries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<LibraryEntry>,
}

impl Catalog {
    /// Read and parse the catalog at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("library catalog {}", path.display()))
            } else {
                Error::Catalog(format!("Failed to read {}: {e}", path.display()))
            }
        })?;
        Self::from_json(&content)
    }

    /// Parse a catalog document.
    pub fn from_json(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| Error::Catalog(format!("invalid catalog JSON: {e}")))?;
        let categories = root
            .as_object()
            .ok_or_else(|| Error::Catalog("catalog root must be an object".into()))?;

        let mut seen = HashSet::new();
        let mut documents: HashMap<(String, String, String), JobId> = HashMap::new();
        let mut entries = Vec::new();
        for (category, subcategories) in categories {
            let subcategories = subcategories.as_object().ok_or_else(|| {
                Error::Catalog(format!("category '{category}' must map subcategories"))
            })?;
            for (subcategory, libraries) in subcategories {
                let libraries = libraries.as_array().ok_or_else(|| {
                    Error::Catalog(format!(
                        "subcategory '{category}/{subcategory}' must be a list of libraries"
                    ))
                })?;
                for library in libraries {
                    let name = library.as_str().ok_or_else(|| {
                        Error::Catalog(format!(
                            "library names in '{category}/{subcategory}' must be strings"
                        ))
                    })?;
                    let entry = LibraryEntry::new(category.as_str(), subcategory.as_str(), name);
                    if !seen.insert(entry.id()) {
                        warn!(library = %entry.id(), "duplicate catalog entry ignored");
                        continue;
                    }
                    let document = (category.clone(), subcategory.clone(), entry.slug());
                    if let Some(kept) = documents.get(&document) {
                        warn!(
                            library = %entry.id(),
                            kept = %kept,
                            "catalog entry ignored: its document name collides with an earlier entry"
                        );
                        continue;
                    }
                    documents.insert(document, entry.id());
                    entries.push(entry);
                }
            }
        }

        debug!(libraries = entries.len(), "catalog loaded");
        Ok(Self { entries })
    }

    /// Every entry in file order.
    #[must_use]
    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    /// Number of libraries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the catalog lists no library.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries passing `filter`, in file order.
    #[must_use]
    pub fn select(&self, filter: &LibraryFilter) -> Vec<LibraryEntry> {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// The single library used by test mode.
    ///
    /// Unset filter fields fall back to `frontend_frameworks/react/react`.
    pub fn select_test(&self, filter: &LibraryFilter) -> Result<LibraryEntry> {
        let wanted = LibraryEntry::new(
            filter.category.as_deref().unwrap_or(TEST_CATEGORY),
            filter.subcategory.as_deref().unwrap_or(TEST_SUBCATEGORY),
            filter.library.as_deref().unwrap_or(TEST_LIBRARY),
        );
        self.entries
            .iter()
            .find(|entry| **entry == wanted)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("test library {} not in catalog", wanted.id())))
    }
}
