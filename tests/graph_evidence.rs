use clipsolve::graph::interval::split_work_final;
use clipsolve::graph::{
    parse_graph_evidence, validate_consistency, EvidenceError, Marker, MismatchKind, Side,
};
use clipsolve::response::postprocess;

const MODEL_OUTPUT: &str = "Domain and range of the graphed function
WORK:
GRAPH_EVIDENCE:
LEFT_ENDPOINT: x=-2, y=0, marker=closed
RIGHT_ENDPOINT: x=4, y=-5, marker=open
ASYMPTOTES: none
DISCONTINUITIES: none
INTERCEPTS: (x=2, y=0); (x=0, y=-4)
KEY_POINTS: (x=1, y=-3)
SCALE: x_tick=1, y_tick=1
CONFIDENCE: 0.88
The closed dot is included, the open circle is not.
Domain: [-2, 4)
FINAL ANSWER:
Domain: [-2, 4)
Range: (-5, 4]";

#[test]
fn full_block_inside_a_solve_answer() {
    let ev = parse_graph_evidence(MODEL_OUTPUT).unwrap();
    assert_eq!(ev.left_endpoint.x, "-2");
    assert_eq!(ev.left_endpoint.marker, Marker::Closed);
    assert_eq!(ev.right_endpoint.marker, Marker::Open);
    assert_eq!(ev.intercepts, vec!["(x=2, y=0)", "(x=0, y=-4)"]);
    assert_eq!(ev.key_points, vec!["(x=1, y=-3)"]);
    assert_eq!(ev.scale.y_tick, "1");
    assert!(ev.extra.is_empty());

    let (work, final_text) = split_work_final(MODEL_OUTPUT);
    assert!(validate_consistency(&ev, &work, &final_text).is_empty());
}

#[test]
fn survives_postprocessing() {
    let out = postprocess(MODEL_OUTPUT, None);
    let ev = parse_graph_evidence(&out).unwrap();
    assert!((ev.confidence - 0.88).abs() < 1e-12);
}

#[test]
fn header_is_case_insensitive_and_optional_fields_may_be_absent() {
    let text = "graph_evidence:\r\nLEFT_ENDPOINT: x=-∞, y=∞, marker=arrow\r\nRIGHT_ENDPOINT: x=∞, y=∞, marker=arrow\r\nASYMPTOTES: x=0; y=0\r\nDISCONTINUITIES: n/a\r\nSCALE: x_tick=2, y_tick=0.5\r\nCONFIDENCE: 1\r\nNOTE: hyperbola\r\n";
    let ev = parse_graph_evidence(text).unwrap();
    assert_eq!(ev.asymptotes, vec!["x=0", "y=0"]);
    assert!(ev.discontinuities.is_empty());
    assert!(ev.intercepts.is_empty());
    assert_eq!(ev.extra, vec![("NOTE".to_string(), "hyperbola".to_string())]);
}

#[test]
fn final_answer_before_required_fields_is_rejected() {
    let text = "GRAPH_EVIDENCE:\nLEFT_ENDPOINT: x=0, y=0, marker=closed\nFINAL ANSWER:\nDomain: [0, ∞)";
    assert!(matches!(
        parse_graph_evidence(text),
        Err(EvidenceError::BoundaryBeforeComplete { .. })
    ));
}

#[test]
fn each_rule_has_its_own_error() {
    let base = "GRAPH_EVIDENCE:\nLEFT_ENDPOINT: x=0, y=0, marker=closed\nRIGHT_ENDPOINT: x=3, y=9, marker=open\nASYMPTOTES: none\nDISCONTINUITIES: none\nSCALE: x_tick=1, y_tick=1\nCONFIDENCE: 0.7";
    assert!(parse_graph_evidence(base).is_ok());

    let cases = [
        (base.replace("CONFIDENCE: 0.7", ""), "missing_field"),
        (base.replace("ASYMPTOTES: none", "ASYMPTOTES:"), "empty_field"),
        (base.replace("marker=open", "marker=hollow"), "malformed_endpoint"),
        (base.replace("x_tick=1, y_tick=1", "1 unit"), "malformed_scale"),
        (base.replace("0.7", "sure"), "malformed_confidence"),
        (base.replace("0.7", "-0.1"), "confidence_out_of_range"),
        (base.replace("GRAPH_EVIDENCE:", "EVIDENCE:"), "missing_header"),
    ];
    for (text, code) in cases {
        let err = parse_graph_evidence(&text).unwrap_err();
        assert_eq!(err.code(), code, "{text}");
    }
}

#[test]
fn fields_past_the_scan_window_are_not_seen() {
    let filler: String = (0..200).map(|i| format!("NOTE_{i}: padding\n")).collect();
    let text = format!(
        "GRAPH_EVIDENCE:\n{filler}LEFT_ENDPOINT: x=0, y=0, marker=closed\nRIGHT_ENDPOINT: x=1, y=1, marker=closed\nASYMPTOTES: none\nDISCONTINUITIES: none\nSCALE: x_tick=1, y_tick=1\nCONFIDENCE: 0.5\n"
    );
    assert_eq!(
        parse_graph_evidence(&text).unwrap_err(),
        EvidenceError::MissingField("LEFT_ENDPOINT")
    );
}

#[test]
fn mismatches_against_a_wrong_final_answer() {
    let wrong = MODEL_OUTPUT.replace(
        "FINAL ANSWER:\nDomain: [-2, 4)",
        "FINAL ANSWER:\nDomain: (-2, 4]",
    );
    let ev = parse_graph_evidence(&wrong).unwrap();
    let (work, final_text) = split_work_final(&wrong);
    let ms = validate_consistency(&ev, &work, &final_text);

    let kinds: Vec<_> = ms.iter().map(|m| (m.mismatch_type, m.side)).collect();
    assert_eq!(
        kinds,
        vec![
            (MismatchKind::EndpointInclusionConflict, Some(Side::Left)),
            (MismatchKind::EndpointInclusionConflict, Some(Side::Right)),
            (MismatchKind::IntervalDisagreementDomain, None),
        ]
    );
    assert_eq!(ms[2].work_interval.as_deref(), Some("[-2, 4)"));
    assert_eq!(ms[2].final_interval.as_deref(), Some("(-2, 4]"));

    let json = serde_json::to_value(&ms).unwrap();
    assert_eq!(json[0]["mismatch_type"], "endpoint_inclusion_conflict");
    assert_eq!(json[0]["side"], "left");
    assert_eq!(json[0]["marker"], "closed");
}
