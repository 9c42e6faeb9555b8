use crate::{AUTO_CONNECTION_CAP, BYTES_PER_CONNECTION, MANUAL_CONNECTION_CAP, models::RangeSpec};

/// How a transfer is split across connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// One connection, unranged request, read until the peer closes.
    Single,
    /// One ranged connection per range, in ascending start order.
    Ranged(Vec<RangeSpec>),
}

impl Plan {
    pub fn connections(&self) -> usize {
        match self {
            Plan::Single => 1,
            Plan::Ranged(ranges) => ranges.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlanner {
    pub bytes_per_connection: u64,
    pub auto_cap: usize,
    pub manual_cap: usize,
}

impl Default for RangePlanner {
    fn default() -> Self {
        Self {
            bytes_per_connection: BYTES_PER_CONNECTION,
            auto_cap: AUTO_CONNECTION_CAP,
            manual_cap: MANUAL_CONNECTION_CAP,
        }
    }
}

impl RangePlanner {
    /// Number of connections to open for a resource of `content_length` bytes.
    pub fn connection_count(
        &self,
        content_length: Option<u64>,
        accepts_ranges: bool,
        requested: Option<usize>,
    ) -> usize {
        let length = match content_length {
            Some(length) if length > 0 && accepts_ranges => length,
            _ => return 1,
        };

        let count = match requested {
            Some(requested) => requested.clamp(1, self.manual_cap),
            None => {
                let derived = length / self.bytes_per_connection.max(1);
                (derived.min(self.auto_cap as u64) as usize).max(1)
            }
        };

        // never hand out empty ranges
        count.min(usize::try_from(length).unwrap_or(usize::MAX))
    }

    pub fn plan(
        &self,
        content_length: Option<u64>,
        accepts_ranges: bool,
        requested: Option<usize>,
    ) -> Plan {
        match content_length {
            Some(length) if length > 0 && accepts_ranges => {
                let count = self.connection_count(content_length, accepts_ranges, requested);
                Plan::Ranged(split_ranges(length, count))
            }
            _ => Plan::Single,
        }
    }
}

/// Splits `[0, length - 1]` into `count` contiguous ranges; the last one absorbs the remainder.
pub fn split_ranges(length: u64, count: usize) -> Vec<RangeSpec> {
    if length == 0 {
        return Vec::new();
    }

    let count = (count.max(1) as u64).min(length);
    let chunk = length / count;

    (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = if i == count - 1 { length - 1 } else { start + chunk - 1 };
            RangeSpec::new(start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(ranges: &[RangeSpec], length: u64) {
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(length - 1));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start, "gap or overlap in {pair:?}");
        }
        assert_eq!(ranges.iter().map(RangeSpec::len).sum::<u64>(), length);
    }

    #[test]
    fn test_split_ranges_remainder_goes_last() {
        let ranges = split_ranges(10, 3);
        assert_eq!(
            ranges,
            vec![RangeSpec::new(0, 2), RangeSpec::new(3, 5), RangeSpec::new(6, 9)]
        );
    }

    #[test]
    fn test_split_ranges_cover_for_all_counts() {
        let planner = RangePlanner::default();
        for length in [1u64, 2, 3, 7, 31, 100, 4096, 1_000_000, 999_999_937] {
            for requested in 1..=MANUAL_CONNECTION_CAP {
                let Plan::Ranged(ranges) = planner.plan(Some(length), true, Some(requested)) else {
                    panic!("expected a ranged plan");
                };
                assert!(ranges.len() <= requested);
                assert!(!ranges.is_empty());
                assert_exact_cover(&ranges, length);
            }
        }
    }

    #[test]
    fn test_no_ranges_means_single() {
        let planner = RangePlanner::default();
        assert_eq!(planner.plan(Some(10_000_000), false, Some(8)), Plan::Single);
        assert_eq!(planner.plan(None, true, None), Plan::Single);
        assert_eq!(planner.plan(Some(0), true, Some(4)), Plan::Single);
        assert_eq!(planner.connection_count(None, true, Some(8)), 1);
    }

    #[test]
    fn test_manual_count_is_capped() {
        let planner = RangePlanner::default();
        assert_eq!(
            planner.connection_count(Some(1 << 30), true, Some(1000)),
            MANUAL_CONNECTION_CAP
        );
        assert_eq!(planner.connection_count(Some(1 << 30), true, Some(0)), 1);
        assert_eq!(planner.connection_count(Some(1 << 30), true, Some(5)), 5);
    }

    #[test]
    fn test_auto_count_heuristic() {
        let planner = RangePlanner::default();
        assert_eq!(planner.connection_count(Some(1_000_000), true, None), 7);
        assert_eq!(planner.connection_count(Some(1000), true, None), 1);
        assert_eq!(planner.connection_count(Some(1 << 40), true, None), AUTO_CONNECTION_CAP);
        assert!(planner.auto_cap < planner.manual_cap);
    }

    #[test]
    fn test_count_never_exceeds_length() {
        let planner = RangePlanner::default();
        let plan = planner.plan(Some(3), true, Some(8));
        assert_eq!(plan.connections(), 3);
        assert_eq!(
            plan,
            Plan::Ranged(vec![RangeSpec::new(0, 0), RangeSpec::new(1, 1), RangeSpec::new(2, 2)])
        );
    }
}
