mod common;

use std::time::Duration;

use clipsolve::config::SolverConfig;
use clipsolve::prompts::ProblemInput;
use clipsolve::solve::{ModelSwitch, ProbeReport, SolveOutcome, CANCELED_STATUS};
use common::{test_config, Harness, Reply};

const ANSWER: &str = "x + 1 = 3\nFINAL ANSWER:\nx = 2";

#[tokio::test]
async fn switch_activates_persists_and_announces() {
    let h = Harness::new();
    let solver = h.solver(test_config()).with_config_path(h.config_path());

    let outcome = solver.switch_model("gpt-4.1").await;
    assert_eq!(
        outcome,
        ModelSwitch::Activated {
            old: "gpt-4o".into(),
            new: "gpt-4.1".into()
        }
    );
    assert_eq!(solver.active_model(), "gpt-4.1");
    assert_eq!(SolverConfig::load(h.config_path()).unwrap().model, "gpt-4.1");

    assert_eq!(h.clipboard.writes(), vec!["MODEL ACTIVE: gpt-4.1".to_string()]);
    assert!(h.status.saw("MODEL CHANGED: gpt-4o -> gpt-4.1"));
    assert!(h.status.saw("MODEL ACTIVE: gpt-4.1"));
    let changed = h.telemetry.named("model_changed");
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].get("source").and_then(|v| v.as_str()), Some("select"));

    let probes = h.service.requests_for("probe");
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].model, "gpt-4.1");

    h.service.script("solve", [Reply::text(ANSWER)]);
    assert!(solver
        .solve_input(ProblemInput::Text("x + 1 = 3".into()))
        .await
        .is_success());
    assert_eq!(h.service.requests_for("solve")[0].model, "gpt-4.1");
}

#[tokio::test]
async fn unknown_or_empty_targets_are_rejected_without_probing() {
    let h = Harness::new();
    let solver = h.solver(test_config());

    assert_eq!(
        solver.switch_model("gpt-3").await,
        ModelSwitch::Rejected("MODEL CHANGE FAILED: unknown model 'gpt-3'".into())
    );
    assert_eq!(
        solver.switch_model("   ").await,
        ModelSwitch::Rejected("MODEL CHANGE FAILED: empty model".into())
    );
    assert!(h.service.requests().is_empty());
    assert_eq!(solver.active_model(), "gpt-4o");
    assert!(h.clipboard.writes().is_empty());
}

#[tokio::test]
async fn offline_target_keeps_the_current_model() {
    let h = Harness::new();
    h.service.script("probe", [Reply::fatal("down")]);
    let solver = h.solver(test_config()).with_config_path(h.config_path());

    let outcome = solver.switch_model("gpt-4.1").await;
    assert_eq!(
        outcome,
        ModelSwitch::Rejected("MODEL CHANGE FAILED: gpt-4.1 is offline (fake error: down)".into())
    );
    assert_eq!(solver.active_model(), "gpt-4o");
    assert!(!h.config_path().exists());
    assert!(h.telemetry.named("model_changed").is_empty());
    assert!(h.clipboard.writes().is_empty());
}

#[tokio::test]
async fn reselecting_the_active_model_only_confirms_it() {
    let h = Harness::new();
    let solver = h.solver(test_config());

    let outcome = solver.switch_model("gpt-4o").await;
    assert_eq!(
        outcome,
        ModelSwitch::Activated {
            old: "gpt-4o".into(),
            new: "gpt-4o".into()
        }
    );
    assert!(h.telemetry.named("model_changed").is_empty());
    assert!(!h.status.messages().iter().any(|m| m.starts_with("MODEL CHANGED")));
    assert_eq!(h.clipboard.writes(), vec!["MODEL ACTIVE: gpt-4o".to_string()]);
}

#[tokio::test]
async fn cycling_wraps_around_the_model_list() {
    let h = Harness::new();
    let solver = h.solver(test_config());

    let mut seen = Vec::new();
    for _ in 0..3 {
        match solver.cycle_model().await {
            ModelSwitch::Activated { new, .. } => seen.push(new),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(seen, vec!["gpt-4.1", "gpt-5.2", "gpt-4o"]);
    let sources: Vec<_> = h
        .telemetry
        .named("model_changed")
        .iter()
        .filter_map(|e| e.get("source").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    assert_eq!(sources, vec!["cycle", "cycle", "cycle"]);
}

#[tokio::test]
async fn switch_cancels_the_in_flight_solve() {
    let h = Harness::new();
    h.service.script(
        "solve",
        [Reply::Delayed(Duration::from_millis(200), ANSWER.into())],
    );
    let solver = h.solver(test_config());

    let (solved, switched) = tokio::join!(
        solver.solve_input(ProblemInput::Text("x + 1 = 3".into())),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            solver.switch_model("gpt-4.1").await
        }
    );

    assert!(matches!(solved, SolveOutcome::Cancelled));
    assert!(matches!(switched, ModelSwitch::Activated { .. }));
    assert_eq!(h.clipboard.writes(), vec!["MODEL ACTIVE: gpt-4.1".to_string()]);
    assert!(h.status.saw(CANCELED_STATUS));
    assert_eq!(h.service.requests_for("solve")[0].model, "gpt-4o");
}

#[tokio::test]
async fn startup_probes_report_reachability() {
    let h = Harness::new();
    let solver = h.solver(test_config());
    assert_eq!(
        solver.startup_probes().await,
        ProbeReport {
            selected_model_online: true,
            graph_extraction_online: true
        }
    );
    assert!(h.status.messages().is_empty());

    h.service.script("probe", [Reply::transient("unreachable")]);
    assert_eq!(
        solver.startup_probes().await,
        ProbeReport {
            selected_model_online: false,
            graph_extraction_online: false
        }
    );
    assert!(h
        .status
        .saw("Selected model [gpt-4o] is offline; please select another."));
    assert!(h
        .status
        .saw("5.2 is offline; High-precision Graph Extraction is disabled."));
    assert_eq!(h.telemetry.named("model_probe_failed").len(), 2);
}
