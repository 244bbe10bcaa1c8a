//! As-of join of TVL facts against the SCD2 dimension.
//!
//! Hash join on `pool_id`, then a binary search over that pool's versions for
//! the interval containing the fact date. Versions per pool are few, so the
//! cost is effectively linear in the number of facts.

use log::debug;
use time::Date;

use crate::db::models::{HistoricalFact, PoolVersion, TvlPoint};
use crate::scd::DimensionStore;

/// Attribution counters for one join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Facts handed to the join
    pub input: usize,
    /// Facts removed by the date filter before joining
    pub filtered_out: usize,
    /// Facts attributed to exactly one version
    pub matched: usize,
    /// Facts whose pool has no version at all
    pub unknown_pool: usize,
    /// Facts whose pool exists but no version covers the fact date
    pub outside_coverage: usize,
}

impl JoinStats {
    /// Facts dropped for lack of a matching version.
    pub fn attribution_gaps(&self) -> usize {
        self.unknown_pool + self.outside_coverage
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinOutput {
    /// Ordered by `(date, pool_id)`
    pub facts: Vec<HistoricalFact>,
    pub stats: JoinStats,
}

/// Find the version of `history` whose interval contains `date`.
///
/// `history` must be ordered by `valid_from` with non-overlapping intervals.
#[inline]
pub fn version_at(history: &[PoolVersion], date: Date) -> Option<&PoolVersion> {
    let idx = history.partition_point(|v| v.valid_from <= date);
    if idx == 0 {
        return None;
    }
    let candidate = &history[idx - 1];
    candidate.covers(date).then_some(candidate)
}

/// Attribute each fact to the dimension version valid on its date.
///
/// # Arguments
/// * `facts` - TVL measurements, any order
/// * `store` - Validated dimension store
/// * `date_filter` - When set, only facts dated exactly this day are joined.
///   The filter never touches the dimension side.
///
/// Facts with no covering version are dropped and counted, never an error.
pub fn join(facts: &[TvlPoint], store: &DimensionStore, date_filter: Option<Date>) -> JoinOutput {
    let index = store.by_pool();
    let mut stats = JoinStats {
        input: facts.len(),
        ..Default::default()
    };
    let mut out = Vec::with_capacity(facts.len());

    for fact in facts {
        let date = fact.date();
        if date_filter.is_some_and(|target| target != date) {
            stats.filtered_out += 1;
            continue;
        }

        let Some(history) = index.get(fact.pool_id.as_str()) else {
            stats.unknown_pool += 1;
            continue;
        };

        match version_at(history, date) {
            Some(version) => {
                out.push(HistoricalFact::attribute(fact, version));
                stats.matched += 1;
            },
            None => {
                stats.outside_coverage += 1;
            },
        }
    }

    out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.pool_id.cmp(&b.pool_id)));

    debug!(
        "Join: {} in, {} filtered, {} matched, {} unknown pool, {} outside coverage",
        stats.input, stats.filtered_out, stats.matched, stats.unknown_pool, stats.outside_coverage
    );

    JoinOutput { facts: out, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{PoolAttributes, PoolSnapshot};
    use crate::scd::advance;
    use time::{macros::date, Duration, OffsetDateTime, Time};

    fn snap(pool_id: &str, symbol: &str) -> PoolSnapshot {
        PoolSnapshot::new(
            pool_id,
            PoolAttributes {
                protocol_slug: "aave-v3".to_string(),
                chain: "Ethereum".to_string(),
                symbol: symbol.to_string(),
                ..Default::default()
            },
        )
    }

    fn point(pool_id: &str, date: Date, hour: u8) -> TvlPoint {
        TvlPoint {
            pool_id: pool_id.to_string(),
            timestamp: OffsetDateTime::new_utc(date, Time::from_hms(hour, 1, 37).unwrap()),
            tvl_usd: Some(1_000.0),
            apy: Some(2.5),
            apy_base: Some(2.0),
            apy_reward: Some(0.5),
        }
    }

    /// E1 seen with attributes A on 2024-01-01, changed to B on 2024-06-01.
    fn e1_store() -> DimensionStore {
        let first =
            advance(&DimensionStore::empty(), &[snap("E1", "A")], date!(2024 - 01 - 01)).unwrap();
        advance(&first.store, &[snap("E1", "B")], date!(2024 - 06 - 01))
            .unwrap()
            .store
    }

    #[test]
    fn test_boundary_date_matches_new_version() {
        let store = e1_store();
        let h1 = store.history("E1")[0].attrib_hash.clone();
        let h2 = store.history("E1")[1].attrib_hash.clone();

        let out = join(
            &[
                point("E1", date!(2024 - 05 - 31), 23),
                point("E1", date!(2024 - 06 - 01), 0),
            ],
            &store,
            None,
        );

        assert_eq!(out.facts.len(), 2);
        assert_eq!(out.facts[0].date, date!(2024 - 05 - 31));
        assert_eq!(out.facts[0].attrib_hash, h1);
        assert_eq!(out.facts[0].attributes.symbol, "A");
        assert!(!out.facts[0].is_current);
        assert_eq!(out.facts[0].valid_to, date!(2024 - 06 - 01));

        assert_eq!(out.facts[1].date, date!(2024 - 06 - 01));
        assert_eq!(out.facts[1].attrib_hash, h2);
        assert_eq!(out.facts[1].attributes.symbol, "B");
        assert!(out.facts[1].is_current);
    }

    #[test]
    fn test_unattributable_facts_are_dropped() {
        let store = e1_store();
        let out = join(
            &[
                point("ghost", date!(2024 - 03 - 01), 12),
                // Before E1 was first observed
                point("E1", date!(2023 - 12 - 31), 12),
                point("E1", date!(2024 - 03 - 01), 12),
            ],
            &store,
            None,
        );

        assert_eq!(out.facts.len(), 1);
        assert_eq!(out.stats.matched, 1);
        assert_eq!(out.stats.unknown_pool, 1);
        assert_eq!(out.stats.outside_coverage, 1);
        assert_eq!(out.stats.attribution_gaps(), 2);
    }

    #[test]
    fn test_empty_store_yields_empty_output() {
        let out = join(&[point("E1", date!(2024 - 03 - 01), 12)], &DimensionStore::empty(), None);
        assert!(out.facts.is_empty());
        assert_eq!(out.stats.unknown_pool, 1);
    }

    #[test]
    fn test_date_filter_keeps_attribution() {
        let store = e1_store();
        let facts = vec![
            point("E1", date!(2024 - 05 - 30), 12),
            point("E1", date!(2024 - 05 - 31), 12),
            point("E1", date!(2024 - 06 - 02), 12),
        ];

        let unfiltered = join(&facts, &store, None);
        let filtered = join(&facts, &store, Some(date!(2024 - 05 - 31)));

        assert_eq!(filtered.facts.len(), 1);
        assert_eq!(filtered.stats.filtered_out, 2);
        assert_eq!(filtered.facts[0], unfiltered.facts[1]);
    }

    #[test]
    fn test_output_ordered_by_date_then_pool() {
        let store = advance(
            &DimensionStore::empty(),
            &[snap("b", "B"), snap("a", "A")],
            date!(2024 - 01 - 01),
        )
        .unwrap()
        .store;

        let out = join(
            &[
                point("b", date!(2024 - 01 - 03), 1),
                point("a", date!(2024 - 01 - 03), 1),
                point("b", date!(2024 - 01 - 02), 1),
            ],
            &store,
            None,
        );

        let keys: Vec<(Date, &str)> =
            out.facts.iter().map(|f| (f.date, f.pool_id.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                (date!(2024 - 01 - 02), "b"),
                (date!(2024 - 01 - 03), "a"),
                (date!(2024 - 01 - 03), "b"),
            ]
        );
    }

    /// xorshift64*, enough to spread facts without pulling in an RNG crate
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 >> 12;
            self.0 ^= self.0 << 25;
            self.0 ^= self.0 >> 27;
            self.0.wrapping_mul(0x2545_f491_4f6c_dd1d)
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    fn brute_force<'a>(store: &'a DimensionStore, fact: &TvlPoint) -> Option<&'a PoolVersion> {
        let date = fact.date();
        let hits: Vec<&PoolVersion> = store
            .versions()
            .iter()
            .filter(|v| v.pool_id == fact.pool_id && v.valid_from <= date && date < v.valid_to)
            .collect();
        assert!(hits.len() <= 1, "overlapping versions for {}", fact.pool_id);
        hits.into_iter().next()
    }

    #[test]
    fn test_full_history_matches_brute_force() {
        const POOLS: u64 = 1_200;
        const FACTS: usize = 500_000;
        const WEEKS: i64 = 26;

        let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
        let start = date!(2024 - 01 - 01);

        // Weekly snapshots; pools trickle in and change attributes at random
        let mut store = DimensionStore::empty();
        for week in 0..WEEKS {
            let snapshot: Vec<PoolSnapshot> = (0..POOLS)
                .filter(|i| (*i as i64) < 200 + week * 40)
                .map(|i| {
                    let revision = if rng.below(4) == 0 { week } else { 0 };
                    snap(&format!("pool-{i:04}"), &format!("SYM-{i}-{revision}"))
                })
                .collect();
            store = advance(&store, &snapshot, start + Duration::weeks(week))
                .unwrap()
                .store;
        }

        // Facts span a little before the first snapshot and a few unknown pools
        let span_days = WEEKS * 7 + 14;
        let facts: Vec<TvlPoint> = (0..FACTS)
            .map(|_| {
                let pool = rng.below(POOLS + 20);
                let day = start + Duration::days(rng.below(span_days as u64) as i64 - 7);
                point(&format!("pool-{pool:04}"), day, rng.below(24) as u8)
            })
            .collect();

        let out = join(&facts, &store, None);

        let expected_matches = facts
            .iter()
            .filter(|f| {
                let date = f.date();
                store.history(&f.pool_id).iter().filter(|v| v.covers(date)).count() == 1
            })
            .count();
        assert_eq!(out.stats.matched, expected_matches);
        assert_eq!(out.facts.len(), expected_matches);
        assert_eq!(out.stats.matched + out.stats.attribution_gaps(), FACTS);

        // Spot-check 100 output rows against a linear scan
        for _ in 0..100 {
            let row = &out.facts[rng.below(out.facts.len() as u64) as usize];
            let probe = TvlPoint {
                pool_id: row.pool_id.clone(),
                timestamp: OffsetDateTime::new_utc(row.date, Time::MIDNIGHT),
                tvl_usd: None,
                apy: None,
                apy_base: None,
                apy_reward: None,
            };
            let expected = brute_force(&store, &probe).expect("joined row must be coverable");
            assert_eq!(row.attrib_hash, expected.attrib_hash);
            assert_eq!(row.valid_from, expected.valid_from);
            assert!(row.valid_from <= row.date && row.date < row.valid_to);
        }
    }
}
