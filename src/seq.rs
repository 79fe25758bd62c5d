//! Wrap-safe arithmetic over the 32-bit TCP sequence space (RFC 793 3.3).
//!
//! Sequence numbers live on a circle of 2^32 values, so ordinary integer
//! comparison is meaningless once a transfer wraps. All comparisons here are
//! defined through the signed interpretation of the wrapped difference, which
//! gives the correct answer as long as the two values are within 2^31 of each
//! other.

/// Returns `true` if `a` precedes `b` in sequence space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Returns `true` if `a` precedes or equals `b` in sequence space.
#[inline]
pub fn seq_lte(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// Returns `true` if `a` follows `b` in sequence space.
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Returns `true` if `a` follows or equals `b` in sequence space.
#[inline]
pub fn seq_gte(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// Advances `a` by `len` octets, wrapping around the sequence space.
#[inline]
pub fn seq_add(a: u32, len: u32) -> u32 {
    a.wrapping_add(len)
}

/// Distance from `b` forward to `a` in sequence space.
///
/// Meaningful when `a` does not precede `b`.
#[inline]
pub fn seq_sub(a: u32, b: u32) -> u32 {
    a.wrapping_sub(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_without_wrap() {
        assert!(seq_lt(100, 200));
        assert!(seq_lte(100, 200));
        assert!(seq_lte(200, 200));
        assert!(seq_gt(200, 100));
        assert!(seq_gte(200, 200));
        assert!(!seq_lt(200, 100));
    }

    #[test]
    fn ordering_across_wrap() {
        // 10 is "after" u32::MAX - 10 on the sequence circle.
        assert!(seq_lt(u32::MAX - 10, 10));
        assert!(seq_gt(10, u32::MAX - 10));
        assert!(seq_gte(0, u32::MAX));
        assert!(!seq_lt(10, u32::MAX - 10));
    }

    #[test]
    fn lt_is_negation_of_gte() {
        for &(a, b) in &[(0u32, 0u32), (5, 9), (9, 5), (u32::MAX, 0), (0, u32::MAX)] {
            assert_eq!(seq_lt(a, b), !seq_gte(a, b));
            assert_eq!(seq_gt(a, b), !seq_lte(a, b));
        }
    }

    #[test]
    fn add_and_sub_wrap() {
        assert_eq!(seq_add(u32::MAX - 1, 3), 1);
        assert_eq!(seq_sub(1, u32::MAX - 1), 3);
        assert_eq!(seq_sub(500, 200), 300);
    }
}
