use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use super::{
    check_trim_window, Filter, RawSeries, StatSummary, StatValue, SummaryCache,
};
use crate::error::{ArchiveError, Result};
use crate::instance::ResourceInst;
use crate::schema::StatDescriptor;

/// Several values sharing stat name, type name and filter, merged onto one
/// timeline and summed per slot.
///
/// Members are read once at construction; the combined series never grows.
#[derive(Debug)]
pub struct ComboValue {
    members: Vec<Arc<dyn StatValue>>,
    descriptor: Arc<StatDescriptor>,
    type_name: String,
    base_filter: Filter,
    filter: Mutex<Filter>,
    series: Arc<RawSeries>,
    summary: SummaryCache,
}

impl ComboValue {
    pub fn new(members: Vec<Arc<dyn StatValue>>) -> Result<Self> {
        let Some(first) = members.first() else {
            return Err(ArchiveError::IncompatibleCombination(
                "no values to combine".to_string(),
            ));
        };
        let descriptor = first.descriptor().clone();
        let type_name = first.type_name().to_string();
        let filter = first.filter();
        for m in &members[1..] {
            if m.descriptor().name != descriptor.name {
                return Err(ArchiveError::IncompatibleCombination(format!(
                    "stat {} differs from {}",
                    m.descriptor().name,
                    descriptor.name
                )));
            }
            if m.type_name() != type_name {
                return Err(ArchiveError::IncompatibleCombination(format!(
                    "type {} differs from {}",
                    m.type_name(),
                    type_name
                )));
            }
            if m.filter() != filter {
                return Err(ArchiveError::IncompatibleCombination(format!(
                    "filter {} differs from {}",
                    m.filter(),
                    filter
                )));
            }
        }

        let inputs = members
            .iter()
            .map(|m| m.raw_series())
            .collect::<Result<Vec<_>>>()?;
        let series = combine(&inputs, descriptor.is_counter, &descriptor.name);

        Ok(Self {
            members,
            descriptor,
            type_name,
            base_filter: filter,
            filter: Mutex::new(filter),
            series: Arc::new(series),
            summary: SummaryCache::default(),
        })
    }

    pub fn members(&self) -> &[Arc<dyn StatValue>] {
        &self.members
    }

    /// Filter the members had when the value was built.
    pub fn base_filter(&self) -> Filter {
        self.base_filter
    }

    /// A copy sharing the merged series but with its own filter (reset to
    /// the base filter) and summary cache.
    pub fn detached(&self) -> Self {
        Self {
            members: self.members.clone(),
            descriptor: self.descriptor.clone(),
            type_name: self.type_name.clone(),
            base_filter: self.base_filter,
            filter: Mutex::new(self.base_filter),
            series: self.series.clone(),
            summary: SummaryCache::default(),
        }
    }
}

impl StatValue for ComboValue {
    fn descriptor(&self) -> &Arc<StatDescriptor> {
        &self.descriptor
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resources(&self) -> Vec<Arc<ResourceInst>> {
        let mut out: Vec<Arc<ResourceInst>> = Vec::new();
        for inst in self.members.iter().flat_map(|m| m.resources()) {
            if !out.iter().any(|r| Arc::ptr_eq(r, &inst)) {
                out.push(inst);
            }
        }
        out
    }

    fn filter(&self) -> Filter {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_filter(&self, filter: Filter) {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    fn raw_series(&self) -> Result<RawSeries> {
        Ok(RawSeries::clone(&self.series))
    }

    fn create_trimmed(&self, start: i64, end: i64) -> Result<Arc<dyn StatValue>> {
        check_trim_window(start, end)?;
        let filter = self.filter();
        let members = self
            .members
            .iter()
            .map(|m| {
                let trimmed = m.create_trimmed(start, end)?;
                trimmed.set_filter(filter);
                Ok(trimmed)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(ComboValue::new(members)?))
    }

    fn summary(&self) -> Result<StatSummary> {
        self.summary
            .get_or_compute(self.series.len(), self.filter(), || {
                Ok(StatSummary::compute(&self.snapshots()?))
            })
    }

    fn is_combo(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Timeline merge
// ---------------------------------------------------------------------------

/// Smallest distance from sample `i` to an adjacent sample; 0 when alone.
fn local_gap(timestamps: &[i64], i: usize) -> i64 {
    let before = i.checked_sub(1).map(|p| timestamps[i] - timestamps[p]);
    let after = timestamps.get(i + 1).map(|n| n - timestamps[i]);
    match (before, after) {
        (Some(b), Some(a)) => b.min(a),
        (Some(g), None) | (None, Some(g)) => g,
        (None, None) => 0,
    }
}

fn nearest_slot(master: &BTreeSet<i64>, t: i64) -> Option<i64> {
    let below = master.range(..=t).next_back().copied();
    let above = master.range(t..).next().copied();
    match (below, above) {
        (Some(b), Some(a)) => Some(if t - b <= a - t { b } else { a }),
        (b, a) => b.or(a),
    }
}

/// Builds the master timeline. A sample joins an existing slot when it is
/// closer to it than half its own member's sampling gap.
pub(crate) fn merge_timelines(members: &[&[i64]]) -> Vec<i64> {
    let mut master = BTreeSet::new();
    for timestamps in members {
        for (i, &t) in timestamps.iter().enumerate() {
            let gap = local_gap(timestamps, i);
            let close = nearest_slot(&master, t)
                .is_some_and(|s| s == t || 2 * (s - t).abs() < gap);
            if !close {
                master.insert(t);
            }
        }
    }
    master.into_iter().collect()
}

/// Index of the slot nearest to `t` in a sorted, non-empty `master`.
fn slot_index(master: &[i64], t: i64) -> usize {
    let idx = master.partition_point(|&s| s < t);
    if idx == master.len() {
        return idx - 1;
    }
    if idx > 0 && t - master[idx - 1] <= master[idx] - t {
        return idx - 1;
    }
    idx
}

fn combine(inputs: &[RawSeries], is_counter: bool, stat: &str) -> RawSeries {
    let timelines: Vec<&[i64]> = inputs.iter().map(|s| s.timestamps.as_slice()).collect();
    let master = merge_timelines(&timelines);
    if master.is_empty() {
        return RawSeries::default();
    }
    let mut totals = vec![0.0; master.len()];

    for input in inputs {
        let mut contrib: Vec<Option<f64>> = vec![None; master.len()];
        let mut skipped = 0usize;
        for (&t, &v) in input.timestamps.iter().zip(&input.values) {
            let slot = slot_index(&master, t);
            if contrib[slot].replace(v).is_some() {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!(stat, skipped, "samples skipped while combining values");
        }
        if is_counter {
            let mut last = None;
            for slot in contrib.iter_mut() {
                match *slot {
                    Some(v) => last = Some(v),
                    None => *slot = last,
                }
            }
        }
        for (total, v) in totals.iter_mut().zip(&contrib) {
            *total += v.unwrap_or(0.0);
        }
    }

    RawSeries {
        timestamps: master,
        values: totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{decode_all, two_instance_archive};
    use crate::value::SimpleValue;

    fn simple_values(stat: &str) -> Vec<Arc<dyn StatValue>> {
        let archive = decode_all(two_instance_archive());
        archive
            .instances()
            .iter()
            .map(|inst| {
                let d = inst.resource_type().descriptor_by_name(stat).unwrap().clone();
                Arc::new(SimpleValue::new(inst.clone(), d)) as Arc<dyn StatValue>
            })
            .collect()
    }

    fn series(ts: &[i64], values: &[f64]) -> RawSeries {
        RawSeries {
            timestamps: ts.to_vec(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_disjoint_members_form_sorted_union() {
        let a: &[i64] = &[0, 10_000, 20_000];
        let b: &[i64] = &[5_000, 15_000, 25_000];
        // b's samples sit exactly half a gap from a's slots, so they get their own.
        assert_eq!(
            merge_timelines(&[a, b]),
            vec![0, 5_000, 10_000, 15_000, 20_000, 25_000]
        );
        let far: &[i64] = &[100_000, 110_000];
        assert_eq!(
            merge_timelines(&[a, far]),
            vec![0, 10_000, 20_000, 100_000, 110_000]
        );
    }

    #[test]
    fn test_near_simultaneous_samples_collapse() {
        let a: &[i64] = &[0, 1_000, 2_000];
        let b: &[i64] = &[10, 1_020, 1_990];
        assert_eq!(merge_timelines(&[a, b]), vec![0, 1_000, 2_000]);
    }

    #[test]
    fn test_single_sample_member_needs_exact_match() {
        let a: &[i64] = &[0, 1_000];
        assert_eq!(merge_timelines(&[a, &[1_000]]), vec![0, 1_000]);
        assert_eq!(merge_timelines(&[a, &[1_001]]), vec![0, 1_000, 1_001]);
    }

    #[test]
    fn test_counter_carries_forward() {
        let a = series(&[0, 2_000, 4_000], &[1.0, 3.0, 5.0]);
        let b = series(&[1_000, 3_000], &[10.0, 20.0]);
        let combined = combine(&[a, b], true, "ops");
        assert_eq!(combined.timestamps, vec![0, 1_000, 2_000, 3_000, 4_000]);
        assert_eq!(combined.values, vec![1.0, 11.0, 13.0, 23.0, 25.0]);
        assert!(combined.values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_gauge_contributes_only_mapped_slots() {
        let a = series(&[0, 2_000], &[1.0, 3.0]);
        let b = series(&[1_000], &[10.0]);
        let combined = combine(&[a, b], false, "threads");
        assert_eq!(combined.values, vec![1.0, 10.0, 3.0]);
    }

    #[test]
    fn test_collision_keeps_later_sample() {
        let master = [0i64, 1_000];
        assert_eq!(slot_index(&master, 400), 0);
        assert_eq!(slot_index(&master, 500), 0);
        assert_eq!(slot_index(&master, 600), 1);
        assert_eq!(slot_index(&master, 5_000), 1);

        let a = series(&[0, 1_000], &[1.0, 2.0]);
        let b = series(&[0, 0, 1_000], &[5.0, 7.0, 9.0]);
        let combined = combine(&[a, b], false, "threads");
        assert_eq!(combined.timestamps, vec![0, 1_000]);
        assert_eq!(combined.values, vec![8.0, 11.0]);
    }

    #[test]
    fn test_combo_of_archive_instances() {
        let combo = ComboValue::new(simple_values("ops")).unwrap();
        assert!(combo.is_combo());
        assert_eq!(combo.resources().len(), 2);
        assert_eq!(
            combo.raw_snapshots().unwrap(),
            vec![110.0, 120.0, 170.0, 205.0, 230.0]
        );
        assert_eq!(combo.filter(), Filter::PerSecond);
        assert_eq!(combo.snapshots().unwrap(), vec![10.0, 25.0, 35.0, 10.0]);
        assert_eq!(combo.summary().unwrap().count, 4);
    }

    #[test]
    fn test_detached_copy_has_own_filter() {
        let combo = ComboValue::new(simple_values("ops")).unwrap();
        combo.set_filter(Filter::None);
        let copy = combo.detached();
        assert_eq!(copy.filter(), Filter::PerSecond);
        assert_eq!(copy.base_filter(), Filter::PerSecond);
        assert_eq!(copy.snapshots().unwrap(), vec![10.0, 25.0, 35.0, 10.0]);

        copy.set_filter(Filter::PerSample);
        assert_eq!(combo.filter(), Filter::None);
        assert_eq!(combo.snapshots().unwrap().len(), 5);
        assert_eq!(copy.raw_snapshots().unwrap(), combo.raw_snapshots().unwrap());
    }

    #[test]
    fn test_incompatible_members_rejected() {
        let mut members = simple_values("ops");
        members.extend(simple_values("threads"));
        assert!(matches!(
            ComboValue::new(members),
            Err(ArchiveError::IncompatibleCombination(_))
        ));

        let members = simple_values("ops");
        members[1].set_filter(Filter::None);
        assert!(ComboValue::new(members).is_err());

        assert!(ComboValue::new(Vec::new()).is_err());
    }

    #[test]
    fn test_trimmed_combo() {
        let combo = ComboValue::new(simple_values("threads")).unwrap();
        let ts = combo.raw_absolute_timestamps().unwrap();
        let trimmed = combo.create_trimmed(ts[1], ts[3]).unwrap();
        assert!(trimmed.is_combo());
        assert_eq!(trimmed.raw_snapshots().unwrap(), vec![8.0, 9.0]);
        let full = combo.create_trimmed(ts[0], ts[4] + 1).unwrap();
        assert_eq!(full.sample_count().unwrap(), combo.sample_count().unwrap());
    }

    #[test]
    fn test_local_gap() {
        let ts = [0, 100, 150, 400];
        assert_eq!(local_gap(&ts, 0), 100);
        assert_eq!(local_gap(&ts, 1), 50);
        assert_eq!(local_gap(&ts, 3), 250);
        assert_eq!(local_gap(&[7], 0), 0);
    }
}
