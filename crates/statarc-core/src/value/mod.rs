//! Value engine: filtered views over decoded stat series.
//!
//! A [`SimpleValue`] reads one stat of one resource instance. A [`ComboValue`]
//! merges several values that share a stat identity onto one synthesized
//! timeline. Both are handed out as `Arc<dyn StatValue>`.

mod combo;
mod simple;

pub use combo::ComboValue;
pub use simple::SimpleValue;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::error::{ArchiveError, Result};
use crate::instance::ResourceInst;
use crate::schema::StatDescriptor;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// How raw samples are turned into snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Filter {
    /// Raw values as decoded.
    None,
    /// Change between consecutive samples, scaled to one second.
    PerSecond,
    /// Change between consecutive samples.
    PerSample,
}

impl Filter {
    /// Numeric code of the filter (0 none, 1 per-second, 2 per-sample).
    pub fn code(self) -> u8 {
        match self {
            Filter::None => 0,
            Filter::PerSecond => 1,
            Filter::PerSample => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Filter::None),
            1 => Ok(Filter::PerSecond),
            2 => Ok(Filter::PerSample),
            other => Err(ArchiveError::InvalidFilter(other.to_string())),
        }
    }

    /// Counters default to a per-second rate, gauges to raw values.
    pub fn default_for(descriptor: &StatDescriptor) -> Self {
        if descriptor.is_counter {
            Filter::PerSecond
        } else {
            Filter::None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::None => "none",
            Filter::PerSecond => "per-second",
            Filter::PerSample => "per-sample",
        }
    }

    /// Applies the filter to a raw series sampled at `timestamps` (ms).
    ///
    /// Rate filters yield one element fewer than the input.
    pub fn apply(self, timestamps: &[i64], raw: &[f64]) -> Vec<f64> {
        match self {
            Filter::None => raw.to_vec(),
            Filter::PerSample => raw.windows(2).map(|w| w[1] - w[0]).collect(),
            Filter::PerSecond => raw
                .windows(2)
                .zip(timestamps.windows(2))
                .map(|(v, t)| {
                    let elapsed = t[1] - t[0];
                    if elapsed <= 0 {
                        0.0
                    } else {
                        (v[1] - v[0]) * 1000.0 / elapsed as f64
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filter {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "raw" => Ok(Filter::None),
            "per-second" | "persecond" | "rate" => Ok(Filter::PerSecond),
            "per-sample" | "persample" | "delta" => Ok(Filter::PerSample),
            _ => Err(ArchiveError::InvalidFilter(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

/// Summary of a snapshot series. All fields are 0 for an empty series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    /// Sample standard deviation (n - 1 divisor); 0 for fewer than two values.
    pub std_dev: f64,
    pub most_recent: f64,
}

impl StatSummary {
    pub fn compute(values: &[f64]) -> Self {
        let Some(&most_recent) = values.last() else {
            return Self::default();
        };
        let count = values.len();
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let average = sum / count as f64;
        let std_dev = if count > 1 {
            let squares: f64 = values.iter().map(|v| (v - average).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Self {
            count,
            min,
            max,
            average,
            std_dev,
            most_recent,
        }
    }
}

/// Lazily computed summary, valid while the sample count and filter are unchanged.
#[derive(Debug, Default)]
pub(crate) struct SummaryCache {
    slot: Mutex<Option<(usize, Filter, StatSummary)>>,
}

impl SummaryCache {
    pub(crate) fn get_or_compute(
        &self,
        samples: usize,
        filter: Filter,
        compute: impl FnOnce() -> Result<StatSummary>,
    ) -> Result<StatSummary> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((n, f, summary)) = *slot {
            if n == samples && f == filter {
                return Ok(summary);
            }
        }
        let summary = compute()?;
        *slot = Some((samples, filter, summary));
        Ok(summary)
    }
}

/// Rounds a millisecond timestamp to the nearest whole second.
pub fn round_to_second(millis: i64) -> i64 {
    (millis + 500).div_euclid(1000) * 1000
}

// ---------------------------------------------------------------------------
// StatValue
// ---------------------------------------------------------------------------

/// Timestamps (ms) and raw values of a value, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

impl RawSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keeps only samples with `start <= t < end`.
    pub(crate) fn trim(mut self, start: i64, end: i64) -> Self {
        let lo = self.timestamps.partition_point(|&t| t < start);
        let hi = self.timestamps.partition_point(|&t| t < end).max(lo);
        self.timestamps.truncate(hi);
        self.values.truncate(hi);
        self.timestamps.drain(..lo);
        self.values.drain(..lo);
        self
    }
}

/// Capabilities shared by simple and combined values.
pub trait StatValue: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &Arc<StatDescriptor>;

    /// Name of the resource type the stat belongs to.
    fn type_name(&self) -> &str;

    /// Resource instances contributing to this value.
    fn resources(&self) -> Vec<Arc<ResourceInst>>;

    fn filter(&self) -> Filter;

    fn set_filter(&self, filter: Filter);

    /// Raw series, restricted to the value's trim window.
    fn raw_series(&self) -> Result<RawSeries>;

    /// Builds a view of this value restricted to `[start, end)` (ms).
    fn create_trimmed(&self, start: i64, end: i64) -> Result<Arc<dyn StatValue>>;

    fn summary(&self) -> Result<StatSummary>;

    fn is_combo(&self) -> bool {
        false
    }

    fn sample_count(&self) -> Result<usize> {
        Ok(self.raw_series()?.len())
    }

    /// Exact sample times in milliseconds.
    fn raw_absolute_timestamps(&self) -> Result<Vec<i64>> {
        Ok(self.raw_series()?.timestamps)
    }

    /// Sample times rounded to the nearest second, in milliseconds.
    fn timestamps(&self) -> Result<Vec<i64>> {
        Ok(self
            .raw_series()?
            .timestamps
            .into_iter()
            .map(round_to_second)
            .collect())
    }

    fn raw_snapshots(&self) -> Result<Vec<f64>> {
        Ok(self.raw_series()?.values)
    }

    /// Raw values with the current filter applied.
    fn snapshots(&self) -> Result<Vec<f64>> {
        let series = self.raw_series()?;
        Ok(self.filter().apply(&series.timestamps, &series.values))
    }

    fn min(&self) -> Result<f64> {
        Ok(self.summary()?.min)
    }

    fn max(&self) -> Result<f64> {
        Ok(self.summary()?.max)
    }

    fn average(&self) -> Result<f64> {
        Ok(self.summary()?.average)
    }

    fn std_dev(&self) -> Result<f64> {
        Ok(self.summary()?.std_dev)
    }

    fn most_recent(&self) -> Result<f64> {
        Ok(self.summary()?.most_recent)
    }
}

/// Rejects windows ending before they start.
pub(crate) fn check_trim_window(start: i64, end: i64) -> Result<()> {
    if end < start {
        return Err(ArchiveError::InvalidTrimWindow { start, end });
    }
    Ok(())
}
