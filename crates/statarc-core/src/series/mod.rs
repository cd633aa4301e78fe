//! Per-archive timestamp series and per-stat compressed value series.

mod bits;
mod timestamps;

pub use bits::BitSeries;
pub use timestamps::TimeStampSeries;
