use clap::ValueEnum;
use serde::Deserialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Tags that are mutable aliases rather than build identifiers.
pub const DEFAULT_EXCLUDED_TAGS: &[&str] = &["latest", "prod", "stg", "production", "staging"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no promotable tag among {tags:?}")]
pub struct NoValidTagError {
    pub tags: Vec<String>,
}

/// How to choose between several promotable tags on the same image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TagSelection {
    /// Lexicographically greatest candidate, independent of registry ordering.
    #[default]
    Lexicographic,
    /// First candidate in the order the registry returned the tags.
    RegistryOrder,
}

/// Exact, case-sensitive set of tags that must never be written into a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    excluded: BTreeSet<String>,
}

impl Default for TagFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_TAGS.iter().copied())
    }
}

impl TagFilter {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_excluded(mut self, tag: impl Into<String>) -> Self {
        self.excluded.insert(tag.into());
        self
    }

    pub fn is_excluded(&self, tag: &str) -> bool {
        self.excluded.contains(tag)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn select_tag(
        &self,
        tags: &[String],
        selection: TagSelection,
    ) -> Result<String, NoValidTagError> {
        let mut candidates = tags.iter().filter(|tag| !self.is_excluded(tag));
        let chosen = match selection {
            TagSelection::RegistryOrder => candidates.next(),
            TagSelection::Lexicographic => candidates.max(),
        };

        chosen.cloned().ok_or_else(|| NoValidTagError {
            tags: tags.to_vec(),
        })
    }
}
