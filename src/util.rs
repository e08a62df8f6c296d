//! Free-standing helpers with no natural home on a single value or AST
//! type. Currently just the epsilon-based real-number comparisons ported
//! from `util.cpp`; `Real` is an `f64` throughout this crate, so exact
//! equality against `0.0` is the wrong test for "did this divide by zero".

/// Mirrors `Util::RealThreshold` (`util.cpp`): `1e-10`.
pub const REAL_THRESHOLD: f64 = 0.0000000001;

/// True if `val` is within [`REAL_THRESHOLD`] of zero.
pub fn is_zero(val: f64) -> bool {
    val.abs() <= REAL_THRESHOLD
}

/// True if `lhs` and `rhs` are within [`REAL_THRESHOLD`] of each other.
pub fn is_equal(lhs: f64, rhs: f64) -> bool {
    (lhs - rhs).abs() <= REAL_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_zero() {
        assert!(is_zero(0.0));
    }

    #[test]
    fn tiny_value_within_threshold_is_zero() {
        assert!(is_zero(1e-12));
    }

    #[test]
    fn value_outside_threshold_is_not_zero() {
        assert!(!is_zero(1e-9));
    }

    #[test]
    fn equal_within_threshold() {
        assert!(is_equal(1.0, 1.0 + 1e-12));
    }

    #[test]
    fn not_equal_outside_threshold() {
        assert!(!is_equal(1.0, 1.000001));
    }
}
