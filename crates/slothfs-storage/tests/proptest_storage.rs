//! Property-based tests for slothfs-storage using proptest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use slothfs_storage::{fisher_yates, parse_df_output, CapacitySnapshot, CapacityStat};

proptest! {
    /// A shuffle is always a permutation of its input.
    #[test]
    fn test_shuffle_preserves_multiset(
        items in proptest::collection::vec(any::<u16>(), 0..64),
        seed in any::<u64>(),
    ) {
        let mut shuffled = items.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        fisher_yates(&mut shuffled, &mut rng);

        let mut expected = items.clone();
        expected.sort();
        shuffled.sort();
        prop_assert_eq!(shuffled, expected);
    }

    /// Aggregated used fraction always lies between the min and max per-mount fraction.
    #[test]
    fn test_aggregate_fraction_bounded(
        mounts in proptest::collection::vec((1u64..1_000_000, 0u32..=100), 1..8),
    ) {
        let stats: BTreeMap<PathBuf, CapacityStat> = mounts
            .iter()
            .enumerate()
            .map(|(i, (size, pct))| {
                (
                    PathBuf::from(format!("/m/{}", i)),
                    CapacityStat { size_bytes: *size, used_fraction: *pct as f64 / 100.0 },
                )
            })
            .collect();
        let min = stats.values().map(|s| s.used_fraction).fold(f64::MAX, f64::min);
        let max = stats.values().map(|s| s.used_fraction).fold(f64::MIN, f64::max);

        let snap = CapacitySnapshot::from_stats(stats);
        let used = snap.used_fraction.unwrap();
        prop_assert!(used >= min - 1e-9 && used <= max + 1e-9);
    }

    /// Parsing never yields a mount outside the devices path.
    #[test]
    fn test_parse_respects_prefix(
        rows in proptest::collection::vec(("[a-z]{1,6}", any::<bool>(), 0u64..100_000, 0u32..=100), 0..16),
    ) {
        let mut out = String::from("Mounted on 1K-blocks Use%\n");
        for (name, inside, size, pct) in &rows {
            let base = if *inside { "/devs" } else { "/other" };
            out.push_str(&format!("{}/{} {} {}%\n", base, name, size, pct));
        }
        let stats = parse_df_output(&out, Path::new("/devs"));
        for target in stats.keys() {
            prop_assert!(target.starts_with("/devs"));
        }
    }
}
