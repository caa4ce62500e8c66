//! Transform invariants over generated inputs

use apilink::transform::kind::{ClipParams, OffsetParams, RandomParams, ScaleParams};
use apilink::transform::{EvalContext, TransformChain, TransformKind, TransformStep, TransformValue};
use proptest::prelude::*;
use proptest::test_runner::Config;
use serde_json::Map;

fn apply(kind: TransformKind) -> TransformStep {
    TransformStep::Apply(kind)
}

fn unknown(function: String) -> TransformStep {
    TransformStep::Unknown {
        function,
        args: Map::new(),
    }
}

/// `(min, max)` with `min <= max`
fn bounds() -> impl Strategy<Value = (f64, f64)> {
    (-1000_i32..1000, 0_i32..1000).prop_map(|(min, span)| (f64::from(min), f64::from(min + span)))
}

fn known_step() -> impl Strategy<Value = TransformStep> {
    prop_oneof![
        (-1000.0..1000.0_f64).prop_map(|amount| apply(TransformKind::Offset(OffsetParams { amount }))),
        Just(apply(TransformKind::Invert)),
        Just(apply(TransformKind::Absolute)),
        bounds().prop_map(|(min, max)| apply(TransformKind::Clip(ClipParams { min, max }))),
        bounds().prop_map(|(min, max)| apply(TransformKind::ScaleNumber(ScaleParams { min, max }))),
        (-50_i64..50, 0_i64..50)
            .prop_map(|(min, span)| apply(TransformKind::RandomValue(RandomParams { min, max: min + span }))),
    ]
}

fn any_step() -> impl Strategy<Value = TransformStep> {
    prop_oneof![
        4 => known_step(),
        1 => "[a-z_]{0,12}".prop_map(unknown),
    ]
}

proptest! {
    #![proptest_config(Config::with_cases(128))]

    #[test]
    fn clip_stays_in_bounds((min, max) in bounds(), value in -1e7_f64..1e7) {
        let out = ClipParams { min, max }.clip(value);
        prop_assert!(out >= min && out <= max, "{} -> {} outside [{}, {}]", value, out, min, max);

        let truncated = value.trunc();
        if truncated >= min && truncated <= max {
            prop_assert_eq!(out, truncated);
        }
    }

    #[test]
    fn invert_twice_is_identity(whole in -1_000_000_i64..1_000_000, quarters in 0_u8..4) {
        let value = TransformValue::Number(whole as f64 + f64::from(quarters) * 0.25);
        let ctx = EvalContext::now();
        let once = TransformKind::Invert.apply(&value, &ctx);
        prop_assert_eq!(TransformKind::Invert.apply(&once, &ctx), value);
    }

    #[test]
    fn scale_number_is_bounded_and_monotonic(
        (min, max) in bounds(),
        a in -1e4_f64..1e4,
        b in -1e4_f64..1e4,
    ) {
        let params = ScaleParams { min, max };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (out_lo, out_hi) = (params.scale(lo), params.scale(hi));

        prop_assert!((0.0..=100.0).contains(&out_lo), "scale({}) = {}", lo, out_lo);
        prop_assert!((0.0..=100.0).contains(&out_hi), "scale({}) = {}", hi, out_hi);
        prop_assert!(out_lo <= out_hi, "scale({}) = {} > scale({}) = {}", lo, out_lo, hi, out_hi);
    }

    #[test]
    fn chain_always_ends_in_percent_range(
        steps in prop::collection::vec(any_step(), 0..8),
        raw in -1e9_f64..1e9,
    ) {
        let first_unknown = steps.iter().find_map(|step| match step {
            TransformStep::Unknown { function, .. } => Some(function.clone()),
            TransformStep::Apply(_) => None,
        });

        let out = TransformChain::new(steps).evaluate(TransformValue::Number(raw), &EvalContext::now());
        prop_assert!((0..=100).contains(&out.value), "{} -> {}", raw, out.value);
        prop_assert_eq!(out.stopped_at, first_unknown);
    }

    #[test]
    fn unknown_step_keeps_value_so_far(
        before in prop::collection::vec(known_step(), 0..4),
        name in "[a-z_]{0,12}",
        after in prop::collection::vec(known_step(), 1..4),
        raw in -1e6_f64..1e6,
    ) {
        let ctx = EvalContext::now();
        let mut steps = before.clone();
        steps.push(unknown(name.clone()));
        steps.extend(after);

        let out = TransformChain::new(steps).evaluate(TransformValue::Number(raw), &ctx);
        prop_assert!((0..=100).contains(&out.value));
        prop_assert_eq!(out.stopped_at, Some(name));

        // random_value steps make the prefix non-deterministic
        let deterministic = before.iter().all(|step| {
            !matches!(step, TransformStep::Apply(TransformKind::RandomValue(_)))
        });
        if deterministic {
            let prefix = TransformChain::new(before).evaluate(TransformValue::Number(raw), &ctx);
            prop_assert_eq!(out.value, prefix.value);
        }
    }
}
