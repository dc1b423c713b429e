use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Jitter source based on std, without the `rand` crate.
// xorshift64 seeded from the clock, mixed with a counter so concurrent
// callers within the same nanosecond still diverge.
// ---------------------------------------------------------------------------

static SEQUENCE: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);

fn next_u64() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut x = nanos ^ SEQUENCE.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    if x == 0 {
        x = 0x2545_F491_4F6C_DD1D;
    }
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// Uniform value in `[0, max)`. Returns 0 when `max` is 0.
pub fn rand_below(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    next_u64() % max
}

/// Uniform value in `[-1.0, 1.0]`, used to spread delays symmetrically.
pub fn rand_signed_unit() -> f64 {
    let unit = (next_u64() >> 11) as f64 / (1u64 << 53) as f64;
    unit * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_below_is_bounded() {
        for _ in 0..1000 {
            assert!(rand_below(50) < 50);
        }
        assert_eq!(rand_below(0), 0);
    }

    #[test]
    fn signed_unit_is_bounded() {
        for _ in 0..1000 {
            let v = rand_signed_unit();
            assert!((-1.0..=1.0).contains(&v), "out of range: {v}");
        }
    }
}
