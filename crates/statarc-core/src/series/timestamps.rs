/// Sample times of one archive, stored as millisecond offsets from a base epoch.
///
/// Shared by every resource instance of the archive; an instance addresses
/// its own samples as an index window into this series.
#[derive(Debug, Clone, Default)]
pub struct TimeStampSeries {
    base: i64,
    offsets: Vec<i64>,
}

impl TimeStampSeries {
    pub fn new(base: i64) -> Self {
        Self {
            base,
            offsets: Vec::new(),
        }
    }

    /// Base epoch in milliseconds.
    pub fn base(&self) -> i64 {
        self.base
    }

    /// Resets the series to an empty one starting at `base`.
    pub fn reset(&mut self, base: i64) {
        self.base = base;
        self.offsets.clear();
    }

    /// Appends a sample `delta_ms` after the previous one (after the base for the first).
    pub fn add(&mut self, delta_ms: i64) {
        let prev = self.offsets.last().copied().unwrap_or(0);
        self.offsets.push(prev + delta_ms.max(0));
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Absolute time (ms) of sample `idx`.
    pub fn absolute(&self, idx: usize) -> Option<i64> {
        self.offsets.get(idx).map(|off| self.base + off)
    }

    /// Absolute times (ms) of samples in `range`.
    pub fn absolute_range(&self, range: std::ops::Range<usize>) -> Vec<i64> {
        let end = range.end.min(self.offsets.len());
        let start = range.start.min(end);
        self.offsets[start..end]
            .iter()
            .map(|off| self.base + off)
            .collect()
    }

    pub fn shrink(&mut self) {
        self.offsets.shrink_to_fit();
    }

    pub fn memory_used(&self) -> usize {
        self.offsets.capacity() * std::mem::size_of::<i64>()
    }
}
