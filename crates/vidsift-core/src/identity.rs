//! Comparison of fingerprint hash strings.

use crate::error::CompareError;

/// Count the positions at which two equal-length hash strings differ.
///
/// Each hex digit is one atomic symbol: `e` vs `f` costs the same as `0` vs
/// `f`. It is not a bit-level Hamming distance.
pub fn symbol_distance(a: &str, b: &str) -> Result<usize, CompareError> {
    let left = a.chars().count();
    let right = b.chars().count();
    if left != right {
        return Err(CompareError::LengthMismatch { left, right });
    }

    Ok(a.chars().zip(b.chars()).filter(|(x, y)| x != y).count())
}

/// Check whether two fingerprints are within both similarity bounds.
///
/// The duration bound is checked first; hash strings are only compared for
/// pairs that pass it.
pub fn within_bounds(
    (value_a, duration_a): (&str, f64),
    (value_b, duration_b): (&str, f64),
    max_duration_diff: f64,
    max_hash_distance: usize,
) -> Result<bool, CompareError> {
    if (duration_a - duration_b).abs() > max_duration_diff {
        return Ok(false);
    }
    Ok(symbol_distance(value_a, value_b)? <= max_hash_distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings() {
        assert_eq!(symbol_distance("0f0f0f0f0f0f0f0f", "0f0f0f0f0f0f0f0f").unwrap(), 0);
    }

    #[test]
    fn test_single_bit_counts_as_one_symbol() {
        // 'e' and 'f' differ by one bit, '0' and 'f' by four: both cost one.
        assert_eq!(symbol_distance("000f", "000e").unwrap(), 1);
        assert_eq!(symbol_distance("000f", "0000").unwrap(), 1);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let err = symbol_distance("abcd", "abc").unwrap_err();
        assert_eq!(err, CompareError::LengthMismatch { left: 4, right: 3 });
    }

    #[test]
    fn test_within_bounds_duration_gate() {
        let a = ("0f0f0f0f0f0f0f0f", 100.0);
        let b = ("0f0f0f0f0f0f0f0e", 102.0);
        assert!(within_bounds(a, b, 5.0, 4).unwrap());
        assert!(!within_bounds(a, ("0f0f0f0f0f0f0f0e", 110.0), 5.0, 4).unwrap());
    }
}
