//! Selection predicates: decide from metadata alone whether a crawled resource is queued.

use crate::engine::tools::glob_match;
use crate::{MetaKeys, Metadata};

/// Pure, side-effect-free inclusion test run by the crawler before enqueueing.
pub trait Selector: Send + Sync {
    fn select(&self, metadata: &Metadata) -> bool;
}

impl<F> Selector for F
where
    F: Fn(&Metadata) -> bool + Send + Sync,
{
    fn select(&self, metadata: &Metadata) -> bool {
        self(metadata)
    }
}

/// Include/exclude globs over file name or relative path, plus optional size bounds.
#[derive(Clone, Debug, Default)]
pub struct FileSelector {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl FileSelector {
    fn any_matches(patterns: &[String], name: &str, path: &str) -> bool {
        patterns
            .iter()
            .any(|p| glob_match(p, name) || glob_match(p, path))
    }
}

impl Selector for FileSelector {
    fn select(&self, metadata: &Metadata) -> bool {
        let name = metadata.get(MetaKeys::NAME).map(String::as_str).unwrap_or("");
        let path = metadata.get(MetaKeys::PATH).map(String::as_str).unwrap_or("");

        if Self::any_matches(&self.exclude, name, path) {
            return false;
        }
        if !self.include.is_empty() && !Self::any_matches(&self.include, name, path) {
            return false;
        }
        // Unknown size passes: the bounds only filter what the source could stat.
        let size = metadata.get(MetaKeys::SIZE).and_then(|s| s.parse::<u64>().ok());
        match size {
            Some(size) => {
                self.min_size.is_none_or(|min| size >= min)
                    && self.max_size.is_none_or(|max| size <= max)
            }
            None => true,
        }
    }
}
