//! Resource instances and their per-stat value storage.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::archive::ArchiveInfo;
use crate::error::{ArchiveError, Result};
use crate::schema::ResourceType;
use crate::series::{BitSeries, TimeStampSeries};

/// Samples of one stat plus the delta staged by the SAMPLE being decoded.
#[derive(Debug, Default)]
struct StatSeries {
    bits: BitSeries,
    pending: Option<i64>,
}

#[derive(Debug)]
struct InstState {
    active: bool,
    /// Index of this instance's first sample in the archive timestamp series.
    first_ts_idx: Option<usize>,
    sample_count: usize,
    /// One slot per stat of the type; `None` when the stat is not retained.
    values: Vec<Option<StatSeries>>,
}

/// One concrete occurrence of a resource type within an archive.
pub struct ResourceInst {
    archive: Arc<ArchiveInfo>,
    id: i32,
    name: String,
    numeric_id: i64,
    rtype: Arc<ResourceType>,
    loaded: bool,
    timestamps: Arc<RwLock<TimeStampSeries>>,
    state: RwLock<InstState>,
}

impl fmt::Debug for ResourceInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceInst")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("numeric_id", &self.numeric_id)
            .field("type", &self.rtype.name())
            .field("active", &self.is_active())
            .finish()
    }
}

impl ResourceInst {
    pub(crate) fn new(
        archive: Arc<ArchiveInfo>,
        id: i32,
        name: String,
        numeric_id: i64,
        rtype: Arc<ResourceType>,
        loaded: bool,
        timestamps: Arc<RwLock<TimeStampSeries>>,
    ) -> Self {
        let values = (0..rtype.stat_count())
            .map(|offset| {
                (loaded && rtype.descriptor(offset).is_some()).then(StatSeries::default)
            })
            .collect();
        Self {
            archive,
            id,
            name,
            numeric_id,
            rtype,
            loaded,
            timestamps,
            state: RwLock::new(InstState {
                active: true,
                first_ts_idx: None,
                sample_count: 0,
                values,
            }),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, InstState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, InstState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_offset(&self, offset: usize) -> Result<()> {
        if offset >= self.rtype.stat_count() {
            return Err(ArchiveError::StatOffsetOutOfRange {
                offset,
                stat_count: self.rtype.stat_count(),
            });
        }
        Ok(())
    }

    /// Seeds the accumulator of stat `offset` (INITIALIZE token).
    pub(crate) fn initial_value(&self, offset: usize, bits: i64) -> Result<()> {
        self.check_offset(offset)?;
        if let Some(series) = &mut self.state_mut().values[offset] {
            series.bits.initial_bits(bits);
        }
        Ok(())
    }

    /// Stages `delta` for stat `offset`; applied by the next [`tick`](Self::tick).
    pub(crate) fn prepare_delta(&self, offset: usize, delta: i64) -> Result<()> {
        self.check_offset(offset)?;
        if let Some(series) = &mut self.state_mut().values[offset] {
            series.pending = Some(series.pending.unwrap_or(0).wrapping_add(delta));
        }
        Ok(())
    }

    /// Records one sample at archive timestamp `ts_idx`, consuming staged deltas.
    pub(crate) fn tick(&self, ts_idx: usize) {
        let mut state = self.state_mut();
        if !state.active {
            return;
        }
        state.first_ts_idx.get_or_insert(ts_idx);
        state.sample_count += 1;
        for series in state.values.iter_mut().flatten() {
            let delta = series.pending.take().unwrap_or(0);
            series.bits.add_bits(delta);
        }
    }

    /// Retires the instance; it records no further samples.
    pub(crate) fn make_inactive(&self) {
        let mut state = self.state_mut();
        state.active = false;
        for series in state.values.iter_mut().flatten() {
            series.pending = None;
            series.bits.shrink();
        }
        state.values.shrink_to_fit();
    }

    pub(crate) fn shrink(&self) {
        for series in self.state_mut().values.iter_mut().flatten() {
            series.bits.shrink();
        }
    }

    pub fn archive(&self) -> &Arc<ArchiveInfo> {
        &self.archive
    }

    /// Id of the instance within its archive's token stream.
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn numeric_id(&self) -> i64 {
        self.numeric_id
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.rtype
    }

    /// Whether the instance's samples were retained by the selectors.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn has_stat(&self, offset: usize) -> bool {
        self.state()
            .values
            .get(offset)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn sample_count(&self) -> usize {
        self.state().sample_count
    }

    /// Window of this instance's samples in the archive timestamp series.
    pub fn sample_window(&self) -> Range<usize> {
        let state = self.state();
        match state.first_ts_idx {
            Some(first) => first..first + state.sample_count,
            None => 0..0,
        }
    }

    /// Absolute sample times in milliseconds.
    pub fn raw_timestamps(&self) -> Vec<i64> {
        let window = self.sample_window();
        self.timestamps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .absolute_range(window)
    }

    /// Decodes `count` samples of stat `offset`, starting at sample `skip`.
    pub fn raw_values(&self, offset: usize, skip: usize, count: usize) -> Result<Vec<f64>> {
        self.check_offset(offset)?;
        let type_code = self
            .rtype
            .type_code(offset)
            .ok_or(ArchiveError::StatOffsetOutOfRange {
                offset,
                stat_count: self.rtype.stat_count(),
            })?;
        let state = self.state();
        match &state.values[offset] {
            Some(series) => series.bits.values(type_code, skip, count),
            None if count == 0 => Ok(Vec::new()),
            None => Err(ArchiveError::FillMismatch {
                expected: count,
                filled: 0,
            }),
        }
    }

    /// Timestamps and values of stat `offset` taken under one lock, so both
    /// always have the same length even while the archive is being updated.
    pub fn series(&self, offset: usize) -> Result<(Vec<i64>, Vec<f64>)> {
        self.check_offset(offset)?;
        let type_code = self
            .rtype
            .type_code(offset)
            .ok_or(ArchiveError::StatOffsetOutOfRange {
                offset,
                stat_count: self.rtype.stat_count(),
            })?;
        let state = self.state();
        let window = match state.first_ts_idx {
            Some(first) => first..first + state.sample_count,
            None => 0..0,
        };
        let timestamps = self
            .timestamps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .absolute_range(window);
        let values = match &state.values[offset] {
            Some(series) => series.bits.values(type_code, 0, timestamps.len())?,
            None => Vec::new(),
        };
        Ok((timestamps, values))
    }

    /// Approximate bytes held by this instance's value storage.
    pub fn memory_used(&self) -> usize {
        self.state()
            .values
            .iter()
            .flatten()
            .map(|s| s.bits.memory_used())
            .sum()
    }
}
