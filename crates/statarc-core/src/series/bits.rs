//! Run-length compression of per-stat raw bit patterns.
//!
//! Every sample of a stat is kept as the 64-bit pattern read off the wire
//! (integers as-is, floats as their IEEE-754 bits) so no precision is lost.
//! Consecutive samples are grouped into runs `(start, interval, count)`; a
//! closed run is stored in the narrowest [`BitInterval`] that can hold it:
//!
//! - `interval == 0`: [`BitInterval::ZeroRun`] (one value + count)
//! - `count <= 3`: [`BitInterval::ExplicitDeltas`] (per-step delta array)
//! - otherwise: [`BitInterval::ArithmeticRun`]
//!
//! A freshly closed run first tries to extend the previous interval in place.

use std::mem::size_of;

use crate::error::{ArchiveError, Result};
use crate::format::TypeCode;

/// A value stored in 32 bits when it fits, 64 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Word {
    Narrow(i32),
    Wide(i64),
}

impl Word {
    fn new(v: i64) -> Self {
        match i32::try_from(v) {
            Ok(n) => Word::Narrow(n),
            Err(_) => Word::Wide(v),
        }
    }

    fn get(self) -> i64 {
        match self {
            Word::Narrow(v) => v as i64,
            Word::Wide(v) => v,
        }
    }

    fn is_wide(self) -> bool {
        matches!(self, Word::Wide(_))
    }
}

/// Step deltas of an explicit run, in the narrowest width that fit when created.
#[derive(Debug, Clone)]
enum DeltaArray {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
}

impl DeltaArray {
    fn for_delta(delta: i64) -> Self {
        if i8::try_from(delta).is_ok() {
            DeltaArray::Byte(Vec::with_capacity(4))
        } else if i16::try_from(delta).is_ok() {
            DeltaArray::Short(Vec::with_capacity(4))
        } else if i32::try_from(delta).is_ok() {
            DeltaArray::Int(Vec::with_capacity(4))
        } else {
            DeltaArray::Long(Vec::with_capacity(4))
        }
    }

    /// Longest incoming run this width accepts as a continuation.
    fn max_merge_run(&self) -> u32 {
        match self {
            DeltaArray::Byte(_) => 11,
            DeltaArray::Short(_) => 6,
            DeltaArray::Int(_) => 4,
            DeltaArray::Long(_) => 3,
        }
    }

    fn fits(&self, delta: i64) -> bool {
        match self {
            DeltaArray::Byte(_) => i8::try_from(delta).is_ok(),
            DeltaArray::Short(_) => i16::try_from(delta).is_ok(),
            DeltaArray::Int(_) => i32::try_from(delta).is_ok(),
            DeltaArray::Long(_) => true,
        }
    }

    /// Appends `delta`; callers check [`fits`](Self::fits) first.
    fn push(&mut self, delta: i64) {
        match self {
            DeltaArray::Byte(v) => v.push(delta as i8),
            DeltaArray::Short(v) => v.push(delta as i16),
            DeltaArray::Int(v) => v.push(delta as i32),
            DeltaArray::Long(v) => v.push(delta),
        }
    }

    fn get(&self, idx: usize) -> i64 {
        match self {
            DeltaArray::Byte(v) => v[idx] as i64,
            DeltaArray::Short(v) => v[idx] as i64,
            DeltaArray::Int(v) => v[idx] as i64,
            DeltaArray::Long(v) => v[idx],
        }
    }

    fn len(&self) -> usize {
        match self {
            DeltaArray::Byte(v) => v.len(),
            DeltaArray::Short(v) => v.len(),
            DeltaArray::Int(v) => v.len(),
            DeltaArray::Long(v) => v.len(),
        }
    }

    fn shrink(&mut self) {
        match self {
            DeltaArray::Byte(v) => v.shrink_to_fit(),
            DeltaArray::Short(v) => v.shrink_to_fit(),
            DeltaArray::Int(v) => v.shrink_to_fit(),
            DeltaArray::Long(v) => v.shrink_to_fit(),
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            DeltaArray::Byte(v) => v.capacity(),
            DeltaArray::Short(v) => v.capacity() * 2,
            DeltaArray::Int(v) => v.capacity() * 4,
            DeltaArray::Long(v) => v.capacity() * 8,
        }
    }
}

/// One closed, compressed run of samples.
#[derive(Debug, Clone)]
enum BitInterval {
    ZeroRun {
        bits: Word,
        count: u32,
    },
    ExplicitDeltas {
        first: i64,
        last: i64,
        deltas: DeltaArray,
    },
    ArithmeticRun {
        start: Word,
        interval: Word,
        count: u32,
    },
}

impl BitInterval {
    fn create(start: i64, interval: i64, count: u32) -> Self {
        if interval == 0 {
            BitInterval::ZeroRun {
                bits: Word::new(start),
                count,
            }
        } else if count <= 3 {
            let mut deltas = DeltaArray::for_delta(interval);
            for _ in 1..count {
                deltas.push(interval);
            }
            BitInterval::ExplicitDeltas {
                first: start,
                last: start.wrapping_add(interval.wrapping_mul(count as i64 - 1)),
                deltas,
            }
        } else {
            BitInterval::ArithmeticRun {
                start: Word::new(start),
                interval: Word::new(interval),
                count,
            }
        }
    }

    /// Tries to append the run `(start, interval, count)` to this interval.
    fn attempt_add(&mut self, start: i64, interval: i64, count: u32) -> bool {
        match self {
            BitInterval::ZeroRun { bits, count: n } => {
                if interval == 0 && start == bits.get() {
                    *n += count;
                    return true;
                }
                false
            }
            BitInterval::ArithmeticRun {
                start: first,
                interval: step,
                count: n,
            } => {
                let next = first
                    .get()
                    .wrapping_add(step.get().wrapping_mul(*n as i64));
                if interval == step.get() && start == next {
                    *n += count;
                    return true;
                }
                false
            }
            BitInterval::ExplicitDeltas { last, deltas, .. } => {
                if count > deltas.max_merge_run() {
                    return false;
                }
                let bridge = start.wrapping_sub(*last);
                if !deltas.fits(bridge) || (count > 1 && !deltas.fits(interval)) {
                    return false;
                }
                deltas.push(bridge);
                for _ in 1..count {
                    deltas.push(interval);
                }
                *last = start.wrapping_add(interval.wrapping_mul(count as i64 - 1));
                true
            }
        }
    }

    fn sample_count(&self) -> usize {
        match self {
            BitInterval::ZeroRun { count, .. } | BitInterval::ArithmeticRun { count, .. } => {
                *count as usize
            }
            BitInterval::ExplicitDeltas { deltas, .. } => deltas.len() + 1,
        }
    }

    /// Writes values from sample `skip` onwards into `out`; returns how many were written.
    fn fill(&self, out: &mut [f64], skip: usize, type_code: TypeCode) -> usize {
        let n = self.sample_count().saturating_sub(skip).min(out.len());
        match self {
            BitInterval::ZeroRun { bits, .. } => {
                out[..n].fill(type_code.bits_to_f64(bits.get()));
            }
            BitInterval::ArithmeticRun {
                start, interval, ..
            } => {
                fill_arithmetic(&mut out[..n], start.get(), interval.get(), skip, type_code);
            }
            BitInterval::ExplicitDeltas { first, deltas, .. } => {
                let mut v = *first;
                for k in 0..skip {
                    v = v.wrapping_add(deltas.get(k));
                }
                for (i, slot) in out[..n].iter_mut().enumerate() {
                    if i > 0 {
                        v = v.wrapping_add(deltas.get(skip + i - 1));
                    }
                    *slot = type_code.bits_to_f64(v);
                }
            }
        }
        n
    }

    fn shrink(&mut self) {
        if let BitInterval::ExplicitDeltas { deltas, .. } = self {
            deltas.shrink();
        }
    }

    fn memory_used(&self) -> usize {
        let heap = match self {
            BitInterval::ExplicitDeltas { deltas, .. } => deltas.heap_bytes(),
            _ => 0,
        };
        size_of::<Self>() + heap
    }

    fn kind(&self) -> &'static str {
        match self {
            BitInterval::ZeroRun { bits, .. } => {
                if bits.is_wide() {
                    "zero-long"
                } else {
                    "zero-int"
                }
            }
            BitInterval::ExplicitDeltas { deltas, .. } => match deltas {
                DeltaArray::Byte(_) => "explicit-byte",
                DeltaArray::Short(_) => "explicit-short",
                DeltaArray::Int(_) => "explicit-int",
                DeltaArray::Long(_) => "explicit-long",
            },
            BitInterval::ArithmeticRun {
                start, interval, ..
            } => match (start.is_wide(), interval.is_wide()) {
                (false, false) => "arith-int-int",
                (false, true) => "arith-int-long",
                (true, false) => "arith-long-int",
                (true, true) => "arith-long-long",
            },
        }
    }
}

fn fill_arithmetic(out: &mut [f64], start: i64, interval: i64, skip: usize, type_code: TypeCode) {
    let mut v = start.wrapping_add(interval.wrapping_mul(skip as i64));
    for slot in out.iter_mut() {
        *slot = type_code.bits_to_f64(v);
        v = v.wrapping_add(interval);
    }
}

/// Compressed history of one stat.
#[derive(Debug, Clone, Default)]
pub struct BitSeries {
    count: usize,
    current_start: i64,
    current_end: i64,
    current_interval: i64,
    current_count: u32,
    intervals: Vec<BitInterval>,
}

impl BitSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the accumulator the first delta is added to.
    pub fn initial_bits(&mut self, bits: i64) {
        self.current_end = bits;
    }

    /// Appends one sample whose value is the previous value plus `delta`.
    pub fn add_bits(&mut self, delta: i64) {
        let bits = self.current_end.wrapping_add(delta);
        match self.current_count {
            0 => {
                self.current_start = bits;
                self.current_count = 1;
            }
            1 => {
                self.current_interval = delta;
                self.current_count = 2;
            }
            _ if delta == self.current_interval => {
                self.current_count += 1;
            }
            _ => {
                self.close_run();
                self.current_start = bits;
                self.current_interval = 0;
                self.current_count = 1;
            }
        }
        self.current_end = bits;
        self.count += 1;
    }

    fn close_run(&mut self) {
        let (start, interval, count) =
            (self.current_start, self.current_interval, self.current_count);
        if let Some(last) = self.intervals.last_mut() {
            if last.attempt_add(start, interval, count) {
                return;
            }
        }
        self.intervals
            .push(BitInterval::create(start, interval, count));
    }

    /// Number of samples stored.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Most recent raw bit pattern (the initial value before any sample).
    pub fn last_bits(&self) -> i64 {
        self.current_end
    }

    /// Decodes samples `skip..skip + out.len()` into `out`.
    ///
    /// Failing to fill every slot means the run bookkeeping is corrupt.
    pub fn fill(&self, out: &mut [f64], skip: usize, type_code: TypeCode) -> Result<()> {
        let mut skip = skip;
        let mut filled = 0;
        for interval in &self.intervals {
            if filled == out.len() {
                break;
            }
            let n = interval.sample_count();
            if skip >= n {
                skip -= n;
                continue;
            }
            filled += interval.fill(&mut out[filled..], skip, type_code);
            skip = 0;
        }
        if filled < out.len() && (skip as u32) < self.current_count {
            let n = (self.current_count as usize - skip).min(out.len() - filled);
            fill_arithmetic(
                &mut out[filled..filled + n],
                self.current_start,
                self.current_interval,
                skip,
                type_code,
            );
            filled += n;
        }
        if filled != out.len() {
            return Err(ArchiveError::FillMismatch {
                expected: out.len(),
                filled,
            });
        }
        Ok(())
    }

    /// Decodes `count` samples starting at `skip`.
    pub fn values(&self, type_code: TypeCode, skip: usize, count: usize) -> Result<Vec<f64>> {
        let mut out = vec![0.0; count];
        self.fill(&mut out, skip, type_code)?;
        Ok(out)
    }

    pub fn shrink(&mut self) {
        self.intervals.shrink_to_fit();
        for interval in &mut self.intervals {
            interval.shrink();
        }
    }

    /// Approximate bytes held by this series.
    pub fn memory_used(&self) -> usize {
        size_of::<Self>()
            + self.intervals.iter().map(BitInterval::memory_used).sum::<usize>()
            + (self.intervals.capacity() - self.intervals.len()) * size_of::<BitInterval>()
    }

    /// Encodings of the closed runs, oldest first.
    pub fn interval_kinds(&self) -> Vec<&'static str> {
        self.intervals.iter().map(BitInterval::kind).collect()
    }
}
