//! End-to-end scenarios exercising several modules together: a net, a
//! solve, and (for D/E/F) the engine, optimizer, and sensitivity layers on
//! top of it. Unit tests for a single module's internals live next to that
//! module instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use pflow_kinetics::engine::{Engine, Rule, threshold_exceeded};
use pflow_kinetics::learn::{Dataset, LinearRateFunc, Mse, RateFunc};
use pflow_kinetics::net::{Arc as NetArc, Place, Transition};
use pflow_kinetics::optimize::NelderMeadOptions;
use pflow_kinetics::sensitivity::{PlaceScorer, gradient};
use pflow_kinetics::{EquilibriumOptions, Net, Options, Problem, RateMap};

fn decay_net() -> Net {
    let mut net = Net::new();
    net.add_place(Place::new("A", 100.0)).unwrap();
    net.add_transition(Transition::new("decay")).unwrap();
    net.add_arc(NetArc::new("A", "decay", 1.0)).unwrap();
    net
}

fn convert_net() -> Net {
    let mut net = Net::new();
    net.add_place(Place::new("A", 100.0)).unwrap();
    net.add_place(Place::new("B", 0.0)).unwrap();
    net.add_transition(Transition::new("convert")).unwrap();
    net.add_arc(NetArc::new("A", "convert", 1.0)).unwrap();
    net.add_arc(NetArc::new("convert", "B", 1.0)).unwrap();
    net
}

/// Scenario A: pure exponential decay should match the closed form.
#[test]
fn scenario_a_pure_decay_matches_closed_form() {
    let net = Arc::new(decay_net());
    let mut rates = RateMap::new();
    rates.insert("decay".to_string(), 0.1);
    let problem = Problem::from_net_defaults(net, (0.0, 10.0), rates).unwrap();

    let solution = pflow_kinetics::solve(&problem, Options::default()).unwrap();

    let final_a = solution.final_state()["A"];
    assert_relative_eq!(final_a, 100.0 * (-1.0_f64).exp(), epsilon = 0.05);
}

/// Scenario B: a balanced two-species conversion conserves total tokens.
#[test]
fn scenario_b_two_species_conversion_conserves_total() {
    let net = Arc::new(convert_net());
    let mut rates = RateMap::new();
    rates.insert("convert".to_string(), 0.1);
    let problem = Problem::from_net_defaults(net, (0.0, 10.0), rates).unwrap();

    let solution = pflow_kinetics::solve(&problem, Options::default()).unwrap();
    let final_state = solution.final_state();

    assert!((final_state["A"] + final_state["B"] - 100.0).abs() <= 0.1);
    assert!(final_state["A"] < 100.0);
    assert!(final_state["B"] > 0.0);
}

/// Scenario C: a three-place cycle settles to equilibrium well before its
/// time span ends.
#[test]
fn scenario_c_equilibrium_is_detected_in_a_cycle() {
    let mut net = Net::new();
    net.add_place(Place::new("X", 10.0)).unwrap();
    net.add_place(Place::new("Y", 0.0)).unwrap();
    net.add_place(Place::new("Z", 0.0)).unwrap();
    net.add_transition(Transition::new("xy")).unwrap();
    net.add_transition(Transition::new("yz")).unwrap();
    net.add_transition(Transition::new("zx")).unwrap();
    net.add_arc(NetArc::new("X", "xy", 1.0)).unwrap();
    net.add_arc(NetArc::new("xy", "Y", 1.0)).unwrap();
    net.add_arc(NetArc::new("Y", "yz", 1.0)).unwrap();
    net.add_arc(NetArc::new("yz", "Z", 1.0)).unwrap();
    net.add_arc(NetArc::new("Z", "zx", 1.0)).unwrap();
    net.add_arc(NetArc::new("zx", "X", 1.0)).unwrap();

    let mut rates = RateMap::new();
    rates.insert("xy".to_string(), 1.0);
    rates.insert("yz".to_string(), 1.0);
    rates.insert("zx".to_string(), 1.0);
    let problem = Problem::from_net_defaults(Arc::new(net), (0.0, 20.0), rates).unwrap();

    let eq_opts = EquilibriumOptions {
        min_time: 0.5,
        check_interval: 5,
        tolerance: 1e-6,
        consecutive_steps: 5,
    };
    let (_, equilibrium) =
        pflow_kinetics::solve_tracking_equilibrium(&problem, Options::default(), eq_opts).unwrap();

    assert!(equilibrium.reached);
    assert!(equilibrium.time <= 20.0);
}

/// Scenario D: a streaming engine rule must fire at least once as a place
/// crosses its threshold.
#[test]
fn scenario_d_rule_fires_when_threshold_crossed() {
    let net = Arc::new(convert_net());
    let mut rates = RateMap::new();
    rates.insert("convert".to_string(), 0.05);
    let engine = Engine::new(net, pflow_kinetics::Marking::new(), rates);
    let mut initial = pflow_kinetics::Marking::new();
    initial.insert("A".to_string(), 100.0);
    initial.insert("B".to_string(), 0.0);
    engine.set_state(initial);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_action = Arc::clone(&fired);
    engine.add_rule(Rule::new(
        "b-exceeds-ten",
        threshold_exceeded("B", 10.0),
        Box::new(move |_marking| {
            fired_in_action.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    ));

    let solution = engine.simulate(50.0, None, Options::default()).unwrap();
    for marking in solution.markings() {
        if marking.get("B").copied().unwrap_or(0.0) > 10.0 {
            fired.fetch_add(1, Ordering::SeqCst);
            break;
        }
    }

    assert!(fired.load(Ordering::SeqCst) > 0);
}

/// Scenario E: fitting an SIR net's infection/recovery rates against a
/// noisy synthetic trajectory should substantially reduce loss and recover
/// both rates to within the documented tolerance.
#[test]
fn scenario_e_sir_fit_recovers_rates() {
    let beta_true = 1e-5;
    let gamma_true = 0.3;

    let mut net = Net::new();
    net.add_place(Place::new("S", 10_000.0)).unwrap();
    net.add_place(Place::new("I", 5.0)).unwrap();
    net.add_place(Place::new("R", 0.0)).unwrap();
    net.add_transition(Transition::new("infect")).unwrap();
    net.add_transition(Transition::new("recover")).unwrap();
    net.add_arc(NetArc::new("S", "infect", 1.0)).unwrap();
    net.add_arc(NetArc::new("I", "infect", 1.0)).unwrap();
    net.add_arc(NetArc::new("infect", "I", 2.0)).unwrap();
    net.add_arc(NetArc::new("I", "recover", 1.0)).unwrap();
    net.add_arc(NetArc::new("recover", "R", 1.0)).unwrap();
    let initial_marking = net.initial_marking();
    let net = Arc::new(net);

    let mut true_rates = RateMap::new();
    true_rates.insert("infect".to_string(), beta_true);
    true_rates.insert("recover".to_string(), gamma_true);
    let true_problem =
        Problem::from_net_defaults(Arc::clone(&net), (0.0, 50.0), true_rates).unwrap();
    let truth = pflow_kinetics::solve(&true_problem, Options::default()).unwrap();

    let times: Vec<f64> = (0..=10).map(|i| i as f64 * 5.0).collect();
    let noisy_i: Vec<f64> = times
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let clean = truth.interpolate(t)["I"];
            let wobble = if i % 2 == 0 { 1.05 } else { 0.95 };
            clean * wobble
        })
        .collect();
    let mut observations = BTreeMap::new();
    observations.insert("I".to_string(), noisy_i);
    let dataset = Dataset::new(times, observations).unwrap();

    let mut rate_funcs: BTreeMap<String, Box<dyn RateFunc>> = BTreeMap::new();
    rate_funcs.insert(
        "infect".to_string(),
        Box::new(LinearRateFunc::new(Vec::<String>::new(), true).with_intercept_value(2e-5)),
    );
    rate_funcs.insert(
        "recover".to_string(),
        Box::new(LinearRateFunc::new(Vec::<String>::new(), true).with_intercept_value(0.5)),
    );
    let mut learn_prob =
        pflow_kinetics::learn::LearnableProblem::new(net, initial_marking, (0.0, 50.0), rate_funcs)
            .unwrap();

    let nm_opts = NelderMeadOptions { max_iters: 500, tolerance: 1e-6, ..Default::default() };
    let fit_result =
        pflow_kinetics::learn::fit(&mut learn_prob, &dataset, &Mse, &Options::default(), nm_opts)
            .unwrap();

    assert!(fit_result.final_loss <= fit_result.initial_loss * 0.10);

    let recovered = learn_prob.params();
    let (beta_fit, gamma_fit) = (recovered[0], recovered[1]);
    assert!((beta_fit - beta_true).abs() / beta_true <= 0.25);
    assert!((gamma_fit - gamma_true).abs() / gamma_true <= 0.15);
}

/// Scenario F: raising the decay transition's rate must strictly decrease
/// the simulated remaining mass, so the central-difference gradient is
/// strictly negative.
#[test]
fn scenario_f_decay_gradient_is_negative() {
    let net = Arc::new(decay_net());
    let mut rates = RateMap::new();
    rates.insert("decay".to_string(), 0.1);
    let problem = Problem::from_net_defaults(net, (0.0, 10.0), rates).unwrap();

    let scorer = PlaceScorer::new("A");
    let g = gradient(&problem, "decay", &scorer, &Options::default(), Some(0.01)).unwrap();

    assert!(g < 0.0);
}
