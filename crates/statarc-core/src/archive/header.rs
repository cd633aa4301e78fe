use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;

use crate::codec::MarkReader;
use crate::error::{ArchiveError, Result};
use crate::format::{ARCHIVE_VERSION, MIN_ARCHIVE_VERSION};

/// Decoded HEADER record of one archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub version: u8,
    /// Start of sampling, ms since the Unix epoch. Base of the timestamp series.
    pub start_time: i64,
    pub system_id: i64,
    pub system_start_time: i64,
    /// Offset of the archive's timezone from UTC, in milliseconds.
    pub time_zone_offset: i32,
    pub time_zone_name: String,
    pub system_directory: String,
    pub product_version: String,
    pub os: String,
    pub machine: String,
}

impl ArchiveInfo {
    /// Reads the body of a HEADER token.
    pub(crate) fn read<R: Read>(path: &Path, input: &mut MarkReader<R>) -> Result<Self> {
        let version = input.read_u8()?;
        if version < MIN_ARCHIVE_VERSION {
            return Err(ArchiveError::VersionTooOld {
                version,
                min: MIN_ARCHIVE_VERSION,
            });
        }
        if version > ARCHIVE_VERSION {
            return Err(ArchiveError::VersionTooNew {
                version,
                max: ARCHIVE_VERSION,
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            version,
            start_time: input.read_i64()?,
            system_id: input.read_i64()?,
            system_start_time: input.read_i64()?,
            time_zone_offset: input.read_i32()?,
            time_zone_name: input.read_utf()?,
            system_directory: input.read_utf()?,
            product_version: input.read_utf()?,
            os: input.read_utf()?,
            machine: input.read_utf()?,
        })
    }

    pub fn time_zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.time_zone_offset / 1000).unwrap_or_else(|| Utc.fix())
    }

    /// Renders an absolute millisecond timestamp in the archive's timezone.
    pub fn format_timestamp(&self, millis: i64) -> String {
        match DateTime::<Utc>::from_timestamp_millis(millis) {
            Some(dt) => format!(
                "{} {}",
                dt.with_timezone(&self.time_zone())
                    .format("%Y/%m/%d %H:%M:%S%.3f"),
                self.time_zone_name
            ),
            None => millis.to_string(),
        }
    }
}
