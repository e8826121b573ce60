use clipsolve::gateway::{ContentPart, ImageInput, Role};
use clipsolve::prompts::{
    build_solve_messages, ProblemInput, PromptInputs, FORCED_EXTRACTION_HINT, REFERENCE_GUIDE,
    SYSTEM_PROMPT,
};
use clipsolve::reference::ReferencePayload;

const EVIDENCE: &str = "GRAPH_EVIDENCE:\nLEFT_ENDPOINT: x=0, y=0, marker=closed\nRIGHT_ENDPOINT: x=∞, y=∞, marker=arrow\nASYMPTOTES: none\nDISCONTINUITIES: none\nSCALE: x_tick=1, y_tick=1\nCONFIDENCE: 0.8";

#[test]
fn cached_evidence_needs_graph_mode() {
    let input = ProblemInput::Text("find the range".into());
    let mut inputs = PromptInputs::new(&input);
    inputs.cached_evidence = Some(EVIDENCE);

    let msgs = build_solve_messages(&inputs);
    assert_eq!(msgs[1].content.len(), 1);

    inputs.graph_mode = true;
    let msgs = build_solve_messages(&inputs);
    assert_eq!(msgs[1].content.len(), 2);
    assert!(msgs[1].content[0]
        .as_text()
        .is_some_and(|t| t.ends_with(EVIDENCE)));
}

#[test]
fn image_reference_forces_extraction_for_text_problems() {
    let input = ProblemInput::Text("solve for x".into());
    let reference = ReferencePayload::Image(ImageInput::png(vec![9]));
    let mut inputs = PromptInputs::new(&input);
    inputs.reference = Some(&reference);
    inputs.forced_visual_extraction = true;

    let msgs = build_solve_messages(&inputs);
    assert_eq!(msgs[0].role, Role::System);
    assert_eq!(msgs[1].role, Role::User);

    let parts = &msgs[1].content;
    assert_eq!(parts[0].as_text(), Some(FORCED_EXTRACTION_HINT));
    assert!(parts[1].as_text().is_some_and(|t| t.starts_with(REFERENCE_GUIDE)));
    assert!(parts[2].as_text().is_some_and(|t| t.ends_with("STARRED IMAGE:")));
    assert!(matches!(parts[3], ContentPart::Image(_)));
}

#[test]
fn image_problem_without_reference_is_just_the_image() {
    let input = ProblemInput::Image(ImageInput::png(vec![1, 2]));
    let mut inputs = PromptInputs::new(&input);
    inputs.request_graph_grammar = true;

    let msgs = build_solve_messages(&inputs);
    assert!(msgs[0].text().starts_with(SYSTEM_PROMPT));
    assert!(msgs[0].text().contains("GRAPH_EVIDENCE:"));
    assert_eq!(msgs[1].content.len(), 1);
    assert!(msgs[1].content[0].is_image());
}

#[test]
fn reference_guide_keeps_the_reference_secondary() {
    let input = ProblemInput::Text("solve for x".into());
    let reference = ReferencePayload::Text("Unit 3 notes".into());
    let mut inputs = PromptInputs::new(&input);
    inputs.reference = Some(&reference);

    let msgs = build_solve_messages(&inputs);
    let guide = msgs[1].content[0].as_text().unwrap();
    assert!(guide.contains("secondary context"));
    assert!(guide.contains("must not override the current problem"));
    assert!(!guide.to_lowercase().contains("high-priority"));
}
