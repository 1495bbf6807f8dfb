//! Runner end to end with a canned model: snapshot in, report, escalation
//! queue and run log out.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use match_runner::cli::Cli;
use match_runner::sink::JsonlEscalationSink;
use match_runner::telemetry::RunLogReader;
use matchmaking::model::ADVOCATE_PROMPT;
use matchmaking::{
    EngineConfig, EscalationReason, ModelClient, ModelError, ModelRequest, ModelResponse,
    TokenUsage,
};

/// f1 never converges; every other offer agrees on the first round.
struct CannedModel;

#[async_trait]
impl ModelClient for CannedModel {
    async fn evaluate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let advocate = request.prompt_name == ADVOCATE_PROMPT;
        let offer = request.variables["offer"]["id"].as_str().unwrap_or_default();
        let score = match (offer, advocate) {
            ("f1", true) => 85.0,
            ("f1", false) => 50.0,
            (_, true) => 72.0,
            (_, false) => 68.0,
        };
        Ok(ModelResponse {
            content: json!({
                "score": score,
                "confidence": 0.9,
                "reasoning": "canned",
                "talking_points": [],
                "concerns": [],
                "hard_exclusion": null
            })
            .to_string(),
            usage: TokenUsage {
                prompt_tokens: 40,
                completion_tokens: 10,
            },
            model: "canned".into(),
        })
    }

    fn name(&self) -> &str {
        "canned"
    }
}

const SNAPSHOT: &str = r#"{
    "offers": [
        {"id": "f1", "name": "Northwind Growth III",
         "attributes": {"strategies": ["growth"], "size": 250.0, "geographies": ["us"]},
         "updated_at": "2026-01-05T10:00:00Z"},
        {"id": "f2", "name": "Harbor Growth I",
         "attributes": {"strategies": ["growth"], "size": 150.0, "geographies": ["us"]},
         "updated_at": "2026-01-05T10:00:00Z"},
        {"id": "f3", "name": "Seed Lab",
         "attributes": {"strategies": ["venture"], "size": 40.0, "geographies": ["us"]},
         "updated_at": "2026-01-05T10:00:00Z"}
    ],
    "demands": [
        {"id": "a1", "name": "Lakeside Pension",
         "attributes": {"strategy_preferences": ["growth"], "geography_preferences": ["us"],
                        "size_range": {"min": 100.0, "max": 500.0}},
         "updated_at": "2026-01-06T10:00:00Z"}
    ]
}"#;

#[tokio::test]
async fn test_full_run_writes_report_escalations_and_run_log() {
    let dir = tempfile::tempdir().unwrap();
    let entities = dir.path().join("entities.json");
    let escalations = dir.path().join("escalations.jsonl");
    let run_log = dir.path().join("runs.jsonl");
    std::fs::write(&entities, SNAPSHOT).unwrap();

    let cli = Cli::try_parse_from([
        "match-runner",
        "--entities",
        entities.to_str().unwrap(),
        "--escalations",
        escalations.to_str().unwrap(),
        "--run-log",
        run_log.to_str().unwrap(),
        "full",
    ])
    .unwrap();

    let output = match_runner::execute(
        &cli,
        &EngineConfig::default(),
        Arc::new(CannedModel),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(output["plan"]["universe"], 3);
    assert_eq!(output["plan"]["filtered"], 1);
    assert_eq!(output["report"]["processed"], 1);
    assert_eq!(output["report"]["escalated"], 1);
    assert_eq!(output["report"]["failed"], 0);

    let queued = JsonlEscalationSink::read_all(&escalations).unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].pair_key(), "f1:a1");
    assert_eq!(queued[0].reason, EscalationReason::Disagreement);

    let runs = RunLogReader::read_from_file(&run_log).unwrap();
    assert_eq!(runs.runs().len(), 1);
    assert_eq!(runs.runs()[0].trigger, "full");
    assert_eq!(runs.totals().escalation_rate, 0.5);
}

#[tokio::test]
async fn test_cancelled_run_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let entities = dir.path().join("entities.json");
    std::fs::write(&entities, SNAPSHOT).unwrap();

    let cli = Cli::try_parse_from(["match-runner", "--entities", entities.to_str().unwrap(), "full"])
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let output = match_runner::execute(&cli, &EngineConfig::default(), Arc::new(CannedModel), cancel)
        .await
        .unwrap();
    assert_eq!(output["report"]["skipped"], 2);
    assert_eq!(output["report"]["cancelled"], true);
    assert_eq!(output["report"]["processed"], 0);
}

#[tokio::test]
async fn test_pair_entity_trigger_is_an_error() {
    let cli = Cli::try_parse_from(["match-runner", "entity", "--kind", "pair", "--id", "f1:a1"])
        .unwrap();
    let err = match_runner::execute(
        &cli,
        &EngineConfig::default(),
        Arc::new(CannedModel),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().to_lowercase().contains("pair"));
}
