//! Integration tests for multi-series merging and reductions
//!
//! These tests validate the merge engine on sequences shaped like real
//! query results:
//! - Policy semantics (keep_all, keep_equal, keep_first)
//! - Reductions over merged values and their error cases
//! - Chained scalar transforms
//! - Merge properties over arbitrary inputs

use std::collections::BTreeSet;

use proptest::prelude::*;

use kuba_tsquery::merge::{MergePolicy, Reduction};
use kuba_tsquery::types::{Sample, SampleValue, Samples};
use kuba_tsquery::Error;

// ============================================================================
// Helper Functions
// ============================================================================

fn series(points: &[(i64, f64)]) -> Samples {
    points.iter().map(|&(ts, v)| Sample::new(ts, v)).collect()
}

/// Monthly consumption of three meters, one missing March
fn meters() -> Vec<Samples> {
    vec![
        series(&[(1, 10.0), (2, 20.0), (3, 30.0)]),
        series(&[(1, 1.0), (2, 2.0)]),
        series(&[(1, 5.0), (2, f64::NAN), (3, 7.0)]),
    ]
}

// ============================================================================
// Policies
// ============================================================================

#[test]
fn test_policies_on_meter_data() {
    let all = Samples::merge(&meters(), MergePolicy::KeepAll);
    assert_eq!(all.timestamps(), vec![1, 2, 3]);
    assert_eq!(all[2].value, SampleValue::List(vec![30.0, 7.0]));

    let equal = Samples::merge(&meters(), MergePolicy::KeepEqual);
    assert_eq!(equal.timestamps(), vec![1, 2]);

    let first = Samples::merge(&meters(), MergePolicy::KeepFirst);
    assert_eq!(first.timestamps(), vec![1, 2, 3]);
}

#[test]
fn test_keep_first_ignores_extra_timestamps() {
    let inputs = [series(&[(5, 1.0)]), series(&[(4, 2.0), (5, 3.0), (6, 4.0)])];
    let merged = Samples::merge(&inputs, MergePolicy::KeepFirst);
    assert_eq!(merged.timestamps(), vec![5]);
    assert_eq!(merged[0].value, SampleValue::List(vec![1.0, 3.0]));
}

#[test]
fn test_reversed_inputs_stay_descending() {
    let newest_first = [
        series(&[(3, 30.0), (2, 20.0), (1, 10.0)]),
        series(&[(3, 3.0), (2, 2.0), (1, 1.0)]),
    ];

    for policy in [MergePolicy::KeepAll, MergePolicy::KeepEqual, MergePolicy::KeepFirst] {
        let mut merged = Samples::merge(&newest_first, policy);
        assert_eq!(merged.timestamps(), vec![3, 2, 1], "{}", policy);
        merged.sum().unwrap();
        assert_eq!(merged.values(), vec![33.0, 22.0, 11.0]);
    }
}

#[test]
fn test_merge_of_nothing_is_empty() {
    assert!(Samples::merge(&[], MergePolicy::KeepAll).is_empty());
    assert!(Samples::merge(&[Samples::new(), Samples::new()], MergePolicy::KeepEqual).is_empty());
}

// ============================================================================
// Reductions
// ============================================================================

#[test]
fn test_sum_and_avg() {
    let mut total = Samples::merge(&meters(), MergePolicy::KeepAll);
    total.sum().unwrap();
    assert_eq!(total.values(), vec![16.0, 22.0, 37.0]);

    // A NaN reading makes that month's average NaN
    let mut mean = Samples::merge(&meters(), MergePolicy::KeepEqual);
    mean.avg().unwrap();
    assert_eq!(mean[0].value, SampleValue::Single(16.0 / 3.0));
    assert!(mean[1].value.is_nan());
}

#[test]
fn test_subtract_literal_fold() {
    let mut two = Samples::merge(&[series(&[(1, 3.0)]), series(&[(1, 4.0)])], MergePolicy::KeepAll);
    two.reduce(Reduction::Subtract).unwrap();
    assert_eq!(two.values(), vec![2.0]);

    let mut three = Samples::merge(
        &[series(&[(1, 1.0)]), series(&[(1, 2.0)]), series(&[(1, 3.0)])],
        MergePolicy::KeepAll,
    );
    three.reduce(Reduction::Subtract).unwrap();
    assert_eq!(three.values(), vec![-3.0]);
}

#[test]
fn test_min_max_skip_nan() {
    let mut low = Samples::merge(&meters(), MergePolicy::KeepAll);
    low.min().unwrap();
    assert_eq!(low.values(), vec![1.0, 2.0, 7.0]);

    let mut high = Samples::merge(&meters(), MergePolicy::KeepAll);
    high.max().unwrap();
    assert_eq!(high.values(), vec![10.0, 20.0, 30.0]);
}

#[test]
fn test_reducing_twice_is_calculation_error() {
    for reduction in [
        Reduction::Sum,
        Reduction::Avg,
        Reduction::Subtract,
        Reduction::Min,
        Reduction::Max,
    ] {
        let mut merged = Samples::merge(&meters(), MergePolicy::KeepEqual);
        merged.reduce(reduction).unwrap();
        // NaN can survive a reduction, so compare rendered forms
        let before = format!("{:?}", merged);

        let err = merged.reduce(reduction).unwrap_err();
        assert!(matches!(err, Error::Calculation(_)), "{:?}", reduction);
        assert_eq!(format!("{:?}", merged), before);
    }
}

#[test]
fn test_reducing_raw_results_is_rejected() {
    let mut raw = series(&[(1, 1.0)]);
    assert!(matches!(raw.sum(), Err(Error::Calculation(_))));
}

// ============================================================================
// Transforms
// ============================================================================

#[test]
fn test_watts_to_kilowatts_pipeline() {
    let mut merged = Samples::merge(
        &[
            series(&[(1, 1500.0), (2, -200.0)]),
            series(&[(1, 2499.0), (2, f64::NAN)]),
        ],
        MergePolicy::KeepAll,
    );

    merged
        .replace_nan(0.0)
        .sum()
        .unwrap()
        .clamp_negative()
        .divide(1000.0)
        .round(1);

    assert_eq!(merged.to_pairs(), vec![(1, Some(4.0)), (2, Some(0.0))]);
}

#[test]
fn test_negate_and_multiply() {
    let mut samples = series(&[(1, 2.0), (2, -3.0)]);
    samples.negate().multiply(1.5);
    assert_eq!(samples.values(), vec![-3.0, 4.5]);
}

#[test]
fn test_transforms_leave_errors_alone() {
    let mut samples = series(&[(1, 2.0)]);
    samples.push(Sample::error(2, "ERR TSDB: the key does not exist"));
    samples.multiply(10.0).negate();

    assert_eq!(samples.values(), vec![-20.0]);
    assert_eq!(samples.errors(), vec![(2, "ERR TSDB: the key does not exist")]);
}

// ============================================================================
// Property Tests
// ============================================================================

fn sample_sequence() -> impl Strategy<Value = Samples> {
    prop::collection::btree_map(0i64..50, -1000.0..1000.0f64, 0..20)
        .prop_map(|points| points.into_iter().map(|(ts, v)| Sample::new(ts, v)).collect())
}

/// Unordered sequences that may repeat timestamps, like split buckets
fn repeating_sequence() -> impl Strategy<Value = Samples> {
    prop::collection::vec((0i64..10, -1000.0..1000.0f64), 0..20)
        .prop_map(|points| points.into_iter().map(|(ts, v)| Sample::new(ts, v)).collect())
}

proptest! {
    /// keep_equal keeps only shared timestamps; keep_all is a superset
    #[test]
    fn keep_equal_within_keep_all(inputs in prop::collection::vec(sample_sequence(), 1..5)) {
        let equal: BTreeSet<i64> = Samples::merge(&inputs, MergePolicy::KeepEqual)
            .timestamps()
            .into_iter()
            .collect();
        let all: BTreeSet<i64> = Samples::merge(&inputs, MergePolicy::KeepAll)
            .timestamps()
            .into_iter()
            .collect();

        prop_assert!(equal.is_subset(&all));
        for ts in &equal {
            for input in &inputs {
                prop_assert!(input.iter().any(|s| s.timestamp == *ts));
            }
        }
    }

    /// Merged lists never hold more entries than there are inputs
    #[test]
    fn merged_width_bounded(inputs in prop::collection::vec(sample_sequence(), 1..5)) {
        let merged = Samples::merge(&inputs, MergePolicy::KeepAll);
        for sample in merged.iter() {
            let width = sample.value.as_list().map_or(0, |v| v.len());
            prop_assert!(width >= 1 && width <= inputs.len());
        }

        let equal = Samples::merge(&inputs, MergePolicy::KeepEqual);
        for sample in equal.iter() {
            prop_assert_eq!(sample.value.as_list().map(|v| v.len()), Some(inputs.len()));
        }
    }

    /// Repeated timestamps within one input still count once for it
    #[test]
    fn repeated_timestamps_width_bounded(
        inputs in prop::collection::vec(repeating_sequence(), 1..5)
    ) {
        for policy in [MergePolicy::KeepAll, MergePolicy::KeepEqual, MergePolicy::KeepFirst] {
            let merged = Samples::merge(&inputs, policy);
            let mut seen = BTreeSet::new();
            for sample in merged.iter() {
                prop_assert!(seen.insert(sample.timestamp));
                let width = sample.value.as_list().map_or(0, |v| v.len());
                prop_assert!(width >= 1 && width <= inputs.len());
            }
        }
    }

    /// Output order is the order timestamps were first seen
    #[test]
    fn merge_preserves_first_seen_order(
        inputs in prop::collection::vec(repeating_sequence(), 1..5)
    ) {
        let mut expected = Vec::new();
        for input in &inputs {
            for sample in input.iter() {
                if !expected.contains(&sample.timestamp) {
                    expected.push(sample.timestamp);
                }
            }
        }
        prop_assert_eq!(Samples::merge(&inputs, MergePolicy::KeepAll).timestamps(), expected);
    }
}
