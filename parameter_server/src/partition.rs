use std::ops::Range;

/// Splits a flat vector of `total` parameters among `count` parameter servers and
/// returns the range owned by server `index`.
///
/// Ranges are contiguous, disjoint and cover `0..total`, their sizes differ by at most 1.
///
/// # Panics
/// If `count` is zero or `index` is out of range.
pub fn shard_range(total: usize, index: usize, count: usize) -> Range<usize> {
    assert!(count > 0);
    assert!(index < count);

    let base = total / count;
    let rem = total % count;

    let start = index * base + index.min(rem);
    let extra = usize::from(index < rem);
    start..start + base + extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_balanced() {
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shard_ranges_cover_everything_once() {
        for count in 1..6 {
            let mut next = 0;
            for index in 0..count {
                let range = shard_range(17, index, count);
                assert_eq!(range.start, next);
                next = range.end;
            }
            assert_eq!(next, 17);
        }
    }

    #[test]
    fn more_servers_than_params() {
        assert_eq!(shard_range(2, 0, 3), 0..1);
        assert_eq!(shard_range(2, 1, 3), 1..2);
        assert!(shard_range(2, 2, 3).is_empty());
    }
}
