//! Lazy integer range with an arbitrary, nonzero step.

use std::fmt;

use crate::error::{Error, Result};

/// An immutable `(begin, end, step)` triple. `step`'s sign must agree with
/// `sign(end - begin)`, and `step == 0` is rejected — mirroring the
/// original's `checkValid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerRange {
    begin: i64,
    end: i64,
    step: i64,
}

impl IntegerRange {
    pub fn new(begin: i64, end: i64, step: i64) -> Result<Self> {
        if step == 0 {
            return Err(Error::invalid_expression("range step cannot be zero"));
        }
        let diff = end - begin;
        if (diff > 0 && step < 0) || (diff < 0 && step > 0) {
            return Err(Error::invalid_expression("range step sign must match direction"));
        }
        Ok(IntegerRange { begin, end, step })
    }

    pub fn ending_at(end: i64) -> Result<Self> {
        Self::new(0, end, 1)
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn len(&self) -> usize {
        let span = (self.begin.max(self.end) - self.begin.min(self.end)) as f64;
        span.abs() as usize
    }

    fn len_exact(&self) -> usize {
        let span = (self.begin - self.end).unsigned_abs() as f64;
        (span / (self.step.unsigned_abs() as f64)).ceil() as usize
    }

    pub fn size(&self) -> usize {
        self.len_exact()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn ascending(&self) -> bool {
        self.step > 0
    }

    pub fn iter(&self) -> IntegerRangeIter {
        IntegerRangeIter { rng: *self, cur: Some(self.begin) }
    }
}

impl PartialOrd for IntegerRange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.size().partial_cmp(&other.size())
    }
}

impl fmt::Display for IntegerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.begin, self.step, self.end)
    }
}

pub struct IntegerRangeIter {
    rng: IntegerRange,
    cur: Option<i64>,
}

impl Iterator for IntegerRangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let cur = self.cur?;
        let in_range = if self.rng.ascending() { cur < self.rng.end } else { cur > self.rng.end };
        if !in_range {
            self.cur = None;
            return None;
        }
        let n = cur + self.rng.step;
        self.cur = Some(n);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_matches_ceiling_formula() {
        let r = IntegerRange::new(1, 11, 1).unwrap();
        assert_eq!(r.size(), 10);
    }

    #[test]
    fn rejects_mismatched_step_sign() {
        assert_matches::assert_matches!(IntegerRange::new(0, 10, -1), Err(_));
    }

    #[test]
    fn rejects_zero_step() {
        assert_matches::assert_matches!(IntegerRange::new(0, 10, 0), Err(_));
    }

    #[test]
    fn iterates_inclusive_of_begin_exclusive_of_end() {
        let r = IntegerRange::new(1, 5, 1).unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }
}
