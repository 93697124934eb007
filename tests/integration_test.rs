//! End-to-end tests: netlist text through solve, evaluation, fitting and
//! regeneration.

use std::collections::BTreeMap;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ohmfit::analysis::ac::log_frequencies;
use ohmfit::analysis::target::{Factor, TransferTemplate};
use ohmfit::numeng::num2eng;
use ohmfit::optim::{Method, Status};
use ohmfit::{
    compile, compile_with, evaluate, generate, optimize, Flow, MagnitudeMode, OptimizeConfig,
    SelectorError, SolveError, Solver, SubstitutionPolicy, Target,
};

const RC: &str = "\
Vin 1 0 1 AC 1
R1 out 1 5M
C1 out 0 10p
";

/// Transfer function of `input` → `output` after compiling `netlist`.
fn solve(netlist: &str, input: &str, output: &str) -> ohmfit::Solution {
    let circuit = compile(netlist).expect("compile failed");
    Solver::new()
        .solve(&circuit, input, output, SubstitutionPolicy::default())
        .expect("solve failed")
}

fn pole_target(f0: f64, frequencies: &[f64]) -> Target {
    let template = TransferTemplate::new(1.0, 0.0).with(Factor::RealPole { f0 });
    Target::from_template(&template, frequencies).expect("target failed")
}

fn fit_only_magnitude(method: Method) -> OptimizeConfig {
    OptimizeConfig {
        method,
        makeup_gain: false,
        optimize_reg: false,
        ..Default::default()
    }
}

// ── Evaluation ────────────────────────────────────────────────────

#[test]
fn test_rc_lowpass_corner() {
    let sol = solve(RC, "Vin", "V(out)");
    let r = evaluate(&sol.initial, &[10.0, 3183.1, 1e6], MagnitudeMode::Decibel).unwrap();
    assert_eq!(r.frequencies, vec![10.0, 3183.1, 1e6]);
    assert_abs_diff_eq!(r.magnitude[0], 0.0, epsilon = 1e-3);
    assert_abs_diff_eq!(r.magnitude[1], -3.01, epsilon = 0.1);
    assert_abs_diff_eq!(r.phase_deg[1], -45.0, epsilon = 0.1);
    assert!(r.magnitude[2] < -45.0);
}

#[test]
fn test_buffered_ladder_phase_is_continuous() {
    let netlist = "\
Vin 1 0 1
R1 1 2 1k
C1 2 0 1u
E1 3 0 2 0 1
R2 3 4 1k
C2 4 0 1u
E2 5 0 4 0 1
R3 5 6 1k
C3 6 0 1u
";
    let sol = solve(netlist, "Vin", "V(6)");
    let f = log_frequencies(1.0, 1e6, 200);
    let r = evaluate(&sol.initial, &f, MagnitudeMode::Decibel).unwrap();
    for pair in r.phase_deg.windows(2) {
        assert!((pair[1] - pair[0]).abs() < 10.0, "phase jump {:?}", pair);
    }
    assert!(*r.phase_deg.last().unwrap() < -260.0);
}

// ── Selectors ─────────────────────────────────────────────────────

#[test]
fn test_malformed_selector_distinct_from_unknown_node() {
    let circuit = compile("V1 1 0 1\nR1 1 2 1k\nR2 2 0 1k\n").unwrap();
    let mut solver = Solver::new();
    let policy = SubstitutionPolicy::default();
    assert_eq!(
        solver.solve(&circuit, "V1", "V(1,)", policy).unwrap_err(),
        SolveError::Selector(SelectorError::MalformedSelector("V(1,)".into()))
    );
    assert_eq!(
        solver.solve(&circuit, "V1", "V(7)", policy).unwrap_err(),
        SolveError::Selector(SelectorError::UnknownNode("7".into()))
    );
    let half = solver.solve(&circuit, "V1", "V(2)", policy).unwrap();
    let r = evaluate(&half.initial, &[1.0], MagnitudeMode::Linear).unwrap();
    assert_relative_eq!(r.magnitude[0], 0.5, max_relative = 1e-12);
}

// ── Bounds ────────────────────────────────────────────────────────

#[test]
fn test_bound_overrides_only_touch_their_elements() {
    let circuit = compile("V1 1 0 1\nR1 1 2 1k max=10M\nR2 2 0 1k\nC1 2 0 10p min=1p max=100p\nC2 2 0 1n\n")
        .unwrap();
    let params: BTreeMap<String, (f64, f64)> = circuit
        .free_params()
        .into_iter()
        .map(|p| (p.name, (p.min, p.max)))
        .collect();
    assert_eq!(params["R1"], (1e-9, 10e6));
    assert_eq!(params["R2"], (1e-9, 1e9));
    assert_relative_eq!(params["C1"].0, 1e-12, max_relative = 1e-12);
    assert_relative_eq!(params["C1"].1, 100e-12, max_relative = 1e-12);
    assert_eq!(params["C2"], (10e-15, 1.0));
}

#[test]
fn test_bounds_table_sets_kind_defaults() {
    let mut bounds = ohmfit::ir::BoundsTable::default();
    bounds.r = ohmfit::ir::Range::new(10.0, 1e6);
    let circuit = compile_with("V1 1 0 1\nR1 1 2 1k\nR2 2 0 1k max=2k\n", &bounds).unwrap();
    let params = circuit.free_params();
    assert_eq!((params[0].min, params[0].max), (10.0, 1e6));
    assert_eq!((params[1].min, params[1].max), (10.0, 2e3));
}

// ── Optimization ──────────────────────────────────────────────────

#[test]
fn test_identity_fit_has_zero_residual() {
    let sol = solve(RC, "Vin", "V(out)");
    let circuit = compile(RC).unwrap();
    let f = log_frequencies(10.0, 1e6, 40);
    let target = Target::from_response(&evaluate(&sol.initial, &f, MagnitudeMode::Decibel).unwrap());
    let result = optimize(
        &sol.expr,
        &circuit.free_params(),
        &target,
        &OptimizeConfig::default(),
        |_| Flow::Continue,
    )
    .unwrap();
    assert!(result.status.is_success());
    assert_abs_diff_eq!(result.residual_norm, 0.0, epsilon = 1e-9);
    assert_relative_eq!(result.values["R1"], 5e6, max_relative = 1e-6);
    assert_relative_eq!(result.values["C1"], 10e-12, max_relative = 1e-6);
}

#[test]
fn test_least_squares_moves_pole() {
    let netlist = "Vin 1 0 1\nR1 out 1 1M\nC1 out 0 10p*\n";
    let sol = solve(netlist, "Vin", "V(out)");
    let circuit = compile(netlist).unwrap();
    let target = pole_target(1e4, &log_frequencies(100.0, 1e6, 50));
    let result = optimize(
        &sol.expr,
        &circuit.free_params(),
        &target,
        &fit_only_magnitude(Method::LeastSquares),
        |_| Flow::Continue,
    )
    .unwrap();
    // pole at 1/(2π·R·C)
    let expected = 1.0 / (2.0 * std::f64::consts::PI * 1e4 * 10e-12);
    assert_relative_eq!(result.values["R1"], expected, max_relative = 1e-3);
    assert!(result.residual_norm < 1e-4);
}

#[test]
fn test_differential_evolution_moves_pole() {
    let netlist = "Vin 1 0 1\nR1 out 1 1M min=10k max=100M\nC1 out 0 10p*\n";
    let sol = solve(netlist, "Vin", "V(out)");
    let circuit = compile(netlist).unwrap();
    let target = pole_target(1e4, &log_frequencies(100.0, 1e6, 50));
    let result = optimize(
        &sol.expr,
        &circuit.free_params(),
        &target,
        &fit_only_magnitude(Method::DifferentialEvolution),
        |_| Flow::Continue,
    )
    .unwrap();
    let expected = 1.0 / (2.0 * std::f64::consts::PI * 1e4 * 10e-12);
    assert_relative_eq!(result.values["R1"], expected, max_relative = 0.02);
    assert_ne!(result.status, Status::Cancelled);
}

#[test]
fn test_stop_returns_best_so_far() {
    let netlist = "Vin 1 0 1\nR1 out 1 1M\nC1 out 0 10p*\n";
    let sol = solve(netlist, "Vin", "V(out)");
    let circuit = compile(netlist).unwrap();
    let target = pole_target(1e4, &log_frequencies(100.0, 1e6, 50));
    let mut steps = 0;
    let result = optimize(
        &sol.expr,
        &circuit.free_params(),
        &target,
        &OptimizeConfig::default(),
        |_| {
            steps += 1;
            Flow::Stop
        },
    )
    .unwrap();
    assert_eq!(steps, 1);
    assert_eq!(result.status, Status::Cancelled);
    assert!(result.values["R1"].is_finite());
}

#[test]
fn test_expression_element_tracks_its_source() {
    let netlist = "\
Vin 1 0 1
R1 out 1 1M
C1 out 0 10p
C2 out 0 {10*C1}
";
    let sol = solve(netlist, "Vin", "V(out)");
    let circuit = compile(netlist).unwrap();
    let target = pole_target(1e3, &log_frequencies(10.0, 1e5, 40));
    let result = optimize(
        &sol.expr,
        &circuit.free_params(),
        &target,
        &OptimizeConfig::default(),
        |_| Flow::Continue,
    )
    .unwrap();
    assert!(!result.values.contains_key("C2"));

    let resolved = circuit.resolve_values(&result.values);
    assert_relative_eq!(resolved["C2"], 10.0 * result.values["C1"], max_relative = 1e-12);

    let text = generate(&circuit, &result.values);
    let c2_line = text.lines().find(|l| l.starts_with("C2")).unwrap();
    assert_eq!(c2_line, format!("C2 out 0 {{10*C1}} ; {}", num2eng(resolved["C2"])));
}

// ── Generation ────────────────────────────────────────────────────

#[test]
fn test_generate_round_trips_optimized_values() {
    let netlist = "; lowpass\nVin 1 0 1 AC 1\nR1 out 1 1M\nC1 out 0 10p*\n";
    let sol = solve(netlist, "Vin", "V(out)");
    let circuit = compile(netlist).unwrap();
    let target = pole_target(1e4, &log_frequencies(100.0, 1e6, 50));
    let result = optimize(
        &sol.expr,
        &circuit.free_params(),
        &target,
        &fit_only_magnitude(Method::LeastSquares),
        |_| Flow::Continue,
    )
    .unwrap();

    let text = generate(&circuit, &result.values);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "; lowpass");
    assert_eq!(lines[1], "Vin 1 0 1 AC 1");
    assert_eq!(lines[3], "C1 out 0 10p*");

    let again = compile(&text).unwrap();
    let r1 = &again.free_params()[0];
    assert_relative_eq!(r1.initial, result.values["R1"], max_relative = 1e-4);
    assert_eq!(generate(&again, &result.values), text);
}
