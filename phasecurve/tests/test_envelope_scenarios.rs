//! End-to-end envelope behaviour through the public library API.

use phasecurve::config::{AdsrParams, ConfigLoader, build_envelope};
use phasecurve::error::EnvelopeError;
use phasecurve::formula::Calculator;
use phasecurve::phase::{
    CompletionPolicy, PhaseDefinition, PhaseEnvelope, PhaseId, TransitionCause, TriggerOutcome,
};
use phasecurve::simulate::{SimulationEnd, SimulationOptions};
use proptest::prelude::*;

fn adsr() -> PhaseEnvelope {
    build_envelope(&AdsrParams::default().to_config()).unwrap()
}

fn phase(name: &str, formula: Option<&str>, completion: CompletionPolicy) -> PhaseDefinition<phasecurve::formula::Expr> {
    let def = PhaseDefinition::new(name, completion);
    match formula {
        Some(text) => def.with_formula(&Calculator::default(), text).unwrap(),
        None => def,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn adsr_full_cycle() {
    let mut env = adsr();
    assert!(!env.is_active());
    assert_eq!(env.value(), 0.0);

    env.trigger("attack").unwrap();
    assert_eq!(env.phase_name(), Some("attack"));

    // 10*X reaches 10 after one second; the value is clamped exactly.
    for _ in 0..4 {
        env.tick(0.25).unwrap();
    }
    assert_eq!(env.phase_name(), Some("decay"));
    assert_eq!(env.value(), 10.0);
    assert_eq!(env.previous_phase_value(), 10.0);
    assert_eq!(env.phase_elapsed(), 0.0);

    // -2*X needs three seconds to fall to 4.
    for _ in 0..12 {
        env.tick(0.25).unwrap();
    }
    assert_eq!(env.phase_name(), Some("sustain"));
    assert_eq!(env.value(), 4.0);

    // External phases never complete on their own.
    for _ in 0..100 {
        assert!(env.tick(0.25).unwrap().transitions.is_empty());
    }
    assert_eq!(env.value(), 4.0);

    let outcome = env.trigger("release").unwrap();
    assert_eq!(outcome.transitions().len(), 1);
    assert_eq!(env.phase_name(), Some("release"));

    for _ in 0..16 {
        env.tick(0.25).unwrap();
    }
    assert!(!env.is_active());
    assert_eq!(env.value(), 0.0);
    assert_eq!(env.total_elapsed(), 0.0);
}

#[test]
fn overshoot_is_detected_and_clamped() {
    let mut env = adsr();
    env.start().unwrap();
    // 10*0.3 = 3, 10*0.6 = 6, 10*0.9 = 9, 10*1.2 = 12 overshoots.
    for _ in 0..3 {
        env.tick(0.3).unwrap();
    }
    assert_eq!(env.phase_name(), Some("attack"));
    let outcome = env.tick(0.3).unwrap();
    assert_eq!(
        outcome.transitions[0].cause,
        TransitionCause::TargetHit { target: 10.0 }
    );
    assert_eq!(env.value(), 10.0);
}

#[test]
fn large_step_skips_through_zero_length_phases() {
    let phases = vec![
        phase("a", Some("X"), CompletionPolicy::target(1.0)).with_next(PhaseId(1)),
        phase("b", None, CompletionPolicy::target(1.0)).with_next(PhaseId(2)),
        phase("c", Some("-X"), CompletionPolicy::duration(0.0)).with_next(PhaseId(3)),
        phase("d", None, CompletionPolicy::Indefinite),
    ];
    let mut env = PhaseEnvelope::new(Calculator::default(), phases, 0.0).unwrap();
    env.start().unwrap();
    let outcome = env.tick(5.0).unwrap();
    let path: Vec<Option<PhaseId>> = outcome.transitions.iter().map(|t| t.to).collect();
    assert_eq!(path, vec![Some(PhaseId(1)), Some(PhaseId(2)), Some(PhaseId(3))]);
    assert_eq!(env.phase_name(), Some("d"));
    assert_eq!(env.value(), 1.0);
}

#[test]
fn zero_length_cycle_is_an_error_and_leaves_state() {
    let phases = vec![
        phase("a", None, CompletionPolicy::duration(0.0)).with_next(PhaseId(1)),
        phase("b", None, CompletionPolicy::duration(0.0)).with_next(PhaseId(0)),
    ];
    let mut env = PhaseEnvelope::new(Calculator::default(), phases, 0.0).unwrap();
    assert!(matches!(env.start(), Err(EnvelopeError::CascadeLimit { .. })));
    assert!(!env.is_active());
}

#[test]
fn deactivate_is_idempotent() {
    let mut env = adsr();
    env.start().unwrap();
    env.tick(0.5).unwrap();
    let transition = env.deactivate().unwrap();
    assert_eq!(transition.cause, TransitionCause::Deactivated);
    assert_eq!(transition.value, 5.0);
    assert!(env.deactivate().is_none());
    assert_eq!(env.value(), env.default_value());
}

#[test]
fn evaluation_failure_leaves_state_untouched() {
    let phases = vec![phase("log", Some("LN(1 - X)"), CompletionPolicy::Indefinite)];
    let mut env = PhaseEnvelope::new(Calculator::default(), phases, 0.0).unwrap();
    env.start().unwrap();
    env.tick(0.5).unwrap();
    let before = (env.value(), env.phase_elapsed(), env.total_elapsed());
    let err = env.tick(0.5).unwrap_err();
    assert!(matches!(err, EnvelopeError::Evaluation { .. }));
    assert_eq!(before, (env.value(), env.phase_elapsed(), env.total_elapsed()));
}

#[test]
fn unmatched_trigger_is_ignored() {
    let mut env = adsr();
    assert_eq!(env.trigger("decay").unwrap(), TriggerOutcome::Ignored);
    assert!(!env.is_active());
}

#[test]
fn simulate_does_not_touch_the_receiver() {
    let mut env = adsr();
    env.start().unwrap();
    env.tick(0.3).unwrap();
    let simulation = env.simulate(0.5).unwrap();
    assert_eq!(simulation.end, SimulationEnd::Idle);
    assert_eq!(env.phase_name(), Some("attack"));
    assert_eq!(env.phase_elapsed(), 0.3);
}

#[test]
fn loaded_yaml_matches_preset() {
    let yaml = serde_yaml::to_string(&AdsrParams::default().to_config()).unwrap();
    let loaded = ConfigLoader::with_defaults()
        .load_str(&yaml, std::path::Path::new("adsr.yaml"))
        .unwrap();
    let a = build_envelope(&loaded.config).unwrap().simulate(1.0).unwrap();
    let b = adsr().simulate(1.0).unwrap();
    assert_eq!(a, b);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn phase_time_is_monotonic_within_a_phase(steps in prop::collection::vec(0.0f64..0.5, 1..200)) {
        let mut env = adsr();
        env.start().unwrap();
        let mut last_phase = env.phase();
        let mut last_elapsed = env.phase_elapsed();
        let mut last_total = env.total_elapsed();
        for dt in steps {
            let outcome = env.tick(dt).unwrap();
            if !env.is_active() {
                break;
            }
            prop_assert!(env.total_elapsed() >= last_total);
            if outcome.transitions.is_empty() {
                prop_assert_eq!(env.phase(), last_phase);
                prop_assert!(env.phase_elapsed() >= last_elapsed);
            }
            last_phase = env.phase();
            last_elapsed = env.phase_elapsed();
            last_total = env.total_elapsed();
        }
    }

    #[test]
    fn value_never_drops_below_default(steps in prop::collection::vec(0.001f64..1.0, 1..100)) {
        let mut env = adsr();
        env.start().unwrap();
        for (i, dt) in steps.into_iter().enumerate() {
            if i == 20 {
                env.trigger("release").unwrap();
            }
            env.tick(dt).unwrap();
            prop_assert!(env.value() >= env.default_value());
        }
    }

    #[test]
    fn simulation_is_deterministic(dt in 0.01f64..0.5, hold in 0.0f64..2.0) {
        let env = adsr();
        let options = SimulationOptions::new(hold).with_dt(dt);
        let first = env.simulate_with(&options).unwrap();
        let second = env.simulate_with(&options).unwrap();
        prop_assert_eq!(first.end, SimulationEnd::Idle);
        prop_assert_eq!(first, second);
    }
}
