//! Wrap-aware tick arithmetic.
//!
//! Every protocol timestamp is a 16-bit tick number. Comparisons go through
//! the signed difference so the counter can wrap; raw `<`/`>` on ticks is
//! never meaningful.

/// Logical server time step, wrapping at 2^16.
pub type Tick = u16;

/// Signed distance from `b` to `a`. Positive means `a` is newer.
///
/// Only valid while the two ticks are within half the sequence space
/// (2^15) of each other.
#[inline]
pub fn seq_diff(a: Tick, b: Tick) -> i16 {
    a.wrapping_sub(b) as i16
}

/// True iff `a` is strictly newer than `b`.
#[inline]
pub fn seq_newer(a: Tick, b: Tick) -> bool {
    seq_diff(a, b) > 0
}

/// Interpolate between two ticks with `t` clamped into `[0, 1]`.
#[inline]
pub fn lerp_seq(a: Tick, b: Tick, t: f32) -> Tick {
    let span = seq_diff(b, a) as f32;
    a.wrapping_add((span * t.clamp(0.0, 1.0)).round() as i16 as Tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_ordering() {
        assert_eq!(seq_diff(5, 3), 2);
        assert_eq!(seq_diff(3, 5), -2);
        assert_eq!(seq_diff(7, 7), 0);
        assert!(seq_newer(5, 3));
        assert!(!seq_newer(3, 5));
        assert!(!seq_newer(7, 7));
    }

    #[test]
    fn diff_across_wrap() {
        assert_eq!(seq_diff(2, u16::MAX), 3);
        assert!(seq_newer(0, u16::MAX));
        assert!(!seq_newer(u16::MAX, 0));
        assert_eq!(seq_diff(u16::MAX, 2), -3);
    }

    #[test]
    fn lerp_endpoints_and_midpoint() {
        assert_eq!(lerp_seq(10, 20, 0.0), 10);
        assert_eq!(lerp_seq(10, 20, 1.0), 20);
        assert_eq!(lerp_seq(10, 20, 0.5), 15);
        // Clamped outside [0, 1].
        assert_eq!(lerp_seq(10, 20, -3.0), 10);
        assert_eq!(lerp_seq(10, 20, 2.0), 20);
    }

    #[test]
    fn lerp_across_wrap() {
        assert_eq!(lerp_seq(u16::MAX - 1, 2, 0.5), 0);
        assert_eq!(lerp_seq(u16::MAX, 1, 1.0), 1);
    }
}
