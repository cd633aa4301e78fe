use std::sync::{Arc, Mutex, PoisonError};

use super::{
    check_trim_window, Filter, RawSeries, StatSummary, StatValue, SummaryCache,
};
use crate::error::Result;
use crate::instance::ResourceInst;
use crate::schema::StatDescriptor;

/// One stat of one resource instance.
#[derive(Debug)]
pub struct SimpleValue {
    inst: Arc<ResourceInst>,
    descriptor: Arc<StatDescriptor>,
    filter: Mutex<Filter>,
    /// Trim window `[start, end)` in ms; `None` covers every sample.
    window: Option<(i64, i64)>,
    summary: SummaryCache,
}

impl SimpleValue {
    pub fn new(inst: Arc<ResourceInst>, descriptor: Arc<StatDescriptor>) -> Self {
        let filter = Filter::default_for(&descriptor);
        Self {
            inst,
            descriptor,
            filter: Mutex::new(filter),
            window: None,
            summary: SummaryCache::default(),
        }
    }

    pub fn instance(&self) -> &Arc<ResourceInst> {
        &self.inst
    }

    pub fn window(&self) -> Option<(i64, i64)> {
        self.window
    }
}

impl StatValue for SimpleValue {
    fn descriptor(&self) -> &Arc<StatDescriptor> {
        &self.descriptor
    }

    fn type_name(&self) -> &str {
        self.inst.resource_type().name().unwrap_or("")
    }

    fn resources(&self) -> Vec<Arc<ResourceInst>> {
        vec![self.inst.clone()]
    }

    fn filter(&self) -> Filter {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_filter(&self, filter: Filter) {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    fn raw_series(&self) -> Result<RawSeries> {
        let (timestamps, values) = self.inst.series(self.descriptor.offset)?;
        let series = RawSeries { timestamps, values };
        Ok(match self.window {
            Some((start, end)) => series.trim(start, end),
            None => series,
        })
    }

    fn create_trimmed(&self, start: i64, end: i64) -> Result<Arc<dyn StatValue>> {
        check_trim_window(start, end)?;
        let window = match self.window {
            Some((s, e)) => (start.max(s), end.min(e).max(start.max(s))),
            None => (start, end),
        };
        Ok(Arc::new(Self {
            inst: self.inst.clone(),
            descriptor: self.descriptor.clone(),
            filter: Mutex::new(self.filter()),
            window: Some(window),
            summary: SummaryCache::default(),
        }))
    }

    fn summary(&self) -> Result<StatSummary> {
        let filter = self.filter();
        self.summary
            .get_or_compute(self.inst.sample_count(), filter, || {
                Ok(StatSummary::compute(&self.snapshots()?))
            })
    }
}
