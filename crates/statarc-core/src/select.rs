//! Selection predicates over archives, types, stats and instances.
//!
//! Selectors serve two purposes: at decode time they decide which types,
//! stats and instances are worth keeping in memory, and at query time they
//! pick the values returned by [`StatArchiveReader::matches`].
//!
//! [`StatArchiveReader::matches`]: crate::reader::StatArchiveReader::matches

use std::fmt;
use std::path::Path;

use regex_lite::Regex;

use crate::error::{ArchiveError, Result};

/// File suffixes recognised as archives by default.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &[".gfs", ".gfs.gz"];

/// Scope of aggregation for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CombineType {
    /// Every matching value on its own.
    #[default]
    None,
    /// One combined value per archive file.
    File,
    /// One combined value across all archives.
    Global,
}

impl std::str::FromStr for CombineType {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CombineType::None),
            "file" => Ok(CombineType::File),
            "global" => Ok(CombineType::Global),
            _ => Err(ArchiveError::InvalidCombineType(s.to_string())),
        }
    }
}

/// True when the file name of `path` ends with one of `extensions`.
pub fn has_archive_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    extensions.iter().any(|ext| name.ends_with(ext.as_ref()))
}

/// A predicate set choosing archive data.
///
/// Every predicate accepts by default.
pub trait StatSelector: Send + Sync + fmt::Debug {
    fn archive_matches(&self, path: &Path) -> bool {
        has_archive_extension(path, DEFAULT_ARCHIVE_EXTENSIONS)
    }

    fn type_matches(&self, _type_name: &str) -> bool {
        true
    }

    fn stat_matches(&self, _stat_name: &str) -> bool {
        true
    }

    fn instance_matches(&self, _name: &str, _numeric_id: i64) -> bool {
        true
    }

    fn combine_type(&self) -> CombineType {
        CombineType::None
    }
}

/// Selects everything in any archive with a recognised extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllStats;

impl StatSelector for AllStats {}

/// Delegates every predicate to `inner` but never combines.
#[derive(Debug, Clone, Copy)]
pub struct RawSelector<'a> {
    inner: &'a dyn StatSelector,
}

impl<'a> RawSelector<'a> {
    pub fn new(inner: &'a dyn StatSelector) -> Self {
        Self { inner }
    }
}

impl StatSelector for RawSelector<'_> {
    fn archive_matches(&self, path: &Path) -> bool {
        self.inner.archive_matches(path)
    }

    fn type_matches(&self, type_name: &str) -> bool {
        self.inner.type_matches(type_name)
    }

    fn stat_matches(&self, stat_name: &str) -> bool {
        self.inner.stat_matches(stat_name)
    }

    fn instance_matches(&self, name: &str, numeric_id: i64) -> bool {
        self.inner.instance_matches(name, numeric_id)
    }

    fn combine_type(&self) -> CombineType {
        CombineType::None
    }
}

// ---------------------------------------------------------------------------
// StatFilter
// ---------------------------------------------------------------------------

/// Matches a name exactly or against a whole-name pattern.
#[derive(Debug, Clone, Default)]
pub enum NameMatcher {
    #[default]
    Any,
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    pub fn exact(name: impl Into<String>) -> Self {
        NameMatcher::Exact(name.into())
    }

    /// Compiles `pattern`; it must match the whole name.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(&format!("^(?:{pattern})$"))
            .map(NameMatcher::Pattern)
            .map_err(|e| ArchiveError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Any => true,
            NameMatcher::Exact(expected) => expected == name,
            NameMatcher::Pattern(re) => re.is_match(name),
        }
    }
}

/// A configurable selector.
///
/// ```
/// use statarc_core::select::{CombineType, NameMatcher, StatFilter};
///
/// let filter = StatFilter::new()
///     .type_name(NameMatcher::exact("VMStats"))
///     .stat(NameMatcher::pattern("ops|threads").unwrap())
///     .combine(CombineType::File);
/// ```
#[derive(Debug, Clone)]
pub struct StatFilter {
    extensions: Vec<String>,
    type_name: NameMatcher,
    stat: NameMatcher,
    instance: NameMatcher,
    numeric_id: Option<i64>,
    combine: CombineType,
}

impl Default for StatFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            type_name: NameMatcher::Any,
            stat: NameMatcher::Any,
            instance: NameMatcher::Any,
            numeric_id: None,
            combine: CombineType::None,
        }
    }
}

impl StatFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the accepted archive file suffixes.
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn type_name(mut self, matcher: NameMatcher) -> Self {
        self.type_name = matcher;
        self
    }

    pub fn stat(mut self, matcher: NameMatcher) -> Self {
        self.stat = matcher;
        self
    }

    pub fn instance(mut self, matcher: NameMatcher) -> Self {
        self.instance = matcher;
        self
    }

    pub fn numeric_id(mut self, id: i64) -> Self {
        self.numeric_id = Some(id);
        self
    }

    pub fn combine(mut self, combine: CombineType) -> Self {
        self.combine = combine;
        self
    }
}

impl StatSelector for StatFilter {
    fn archive_matches(&self, path: &Path) -> bool {
        has_archive_extension(path, &self.extensions)
    }

    fn type_matches(&self, type_name: &str) -> bool {
        self.type_name.matches(type_name)
    }

    fn stat_matches(&self, stat_name: &str) -> bool {
        self.stat.matches(stat_name)
    }

    fn instance_matches(&self, name: &str, numeric_id: i64) -> bool {
        self.instance.matches(name) && self.numeric_id.is_none_or(|id| id == numeric_id)
    }

    fn combine_type(&self) -> CombineType {
        self.combine
    }
}
