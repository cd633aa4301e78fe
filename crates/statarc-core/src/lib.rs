//! statarc-core — decoder and query engine for statistics archives.
//!
//! Provides:
//! - `archive` — token-stream decoder for one archive file (plain or gzip)
//! - `reader` — multi-archive reader with tailing and selection queries
//! - `select` — selectors driving decode-time pruning and queries
//! - `value` — filtered simple and combined value series, summary statistics
//! - `schema` / `instance` — resource types, stat descriptors, resource instances
//! - `series` — timestamp series and run-compressed value storage
//! - `codec` / `format` — wire primitives and format constants
//! - `error` — error type shared by all of the above

pub mod archive;
pub mod codec;
pub mod error;
pub mod format;
pub mod instance;
pub mod reader;
pub mod schema;
pub mod select;
pub mod series;
pub mod value;

#[cfg(test)]
mod testutil;

pub use archive::{ArchiveFile, ArchiveInfo};
pub use error::{ArchiveError, ErrorKind, Result};
pub use reader::{ReaderConfig, StatArchiveReader};
pub use select::{CombineType, NameMatcher, StatFilter, StatSelector};
pub use value::{Filter, StatSummary, StatValue};
