//! Shared fixtures for integration tests: entity builders and a scripted
//! model client (no network).

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use matchmaking::entities::{DemandAttributes, OfferAttributes, SizeRange};
use matchmaking::model::ADVOCATE_PROMPT;
use matchmaking::{
    CandidatePair, DebateRequest, DemandEntity, ModelClient, ModelError, ModelRequest,
    ModelResponse, OfferEntity, TokenUsage,
};

pub fn offer(id: &str, strategies: &[&str], geos: &[&str], size: f64) -> OfferEntity {
    OfferEntity {
        id: id.to_string(),
        name: format!("Fund {}", id),
        attributes: OfferAttributes {
            strategies: strategies.iter().map(|s| s.to_string()).collect(),
            size,
            geographies: geos.iter().map(|s| s.to_string()).collect(),
            track_record: vec![],
        },
        thesis: "Growth equity in vertical software".to_string(),
        embedding: None,
        active: true,
        updated_at: Utc::now(),
    }
}

pub fn demand(id: &str, strategies: &[&str], geos: &[&str], range: Option<(f64, f64)>) -> DemandEntity {
    DemandEntity {
        id: id.to_string(),
        name: format!("Allocator {}", id),
        attributes: DemandAttributes {
            strategy_preferences: strategies.iter().map(|s| s.to_string()).collect(),
            size_range: range.map(|(min, max)| SizeRange { min, max }),
            geography_preferences: geos.iter().map(|s| s.to_string()).collect(),
            exclusions: Default::default(),
        },
        mandate: "Diversified private markets programme".to_string(),
        embedding: None,
        active: true,
        updated_at: Utc::now(),
    }
}

/// Route engine logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn request(offer_id: &str) -> DebateRequest {
    DebateRequest {
        pair: CandidatePair::new(
            Arc::new(offer(offer_id, &["growth"], &["us"], 100.0)),
            Arc::new(demand("a1", &["growth"], &["us"], Some((50.0, 150.0)))),
        ),
        preliminary_score: 70.0,
        value_score: 70.0,
    }
}

/// Well-formed role output.
pub fn reply(score: f64, confidence: f64) -> String {
    json!({
        "score": score,
        "confidence": confidence,
        "reasoning": format!("scored {}", score),
        "talking_points": [{"topic": "strategy", "text": "strategy overlap"}],
        "concerns": [],
        "hard_exclusion": null
    })
    .to_string()
}

pub fn is_advocate(request: &ModelRequest) -> bool {
    request.prompt_name == ADVOCATE_PROMPT
}

pub fn iteration(request: &ModelRequest) -> u64 {
    request.variables["iteration"].as_u64().unwrap_or(0)
}

pub fn offer_id(request: &ModelRequest) -> String {
    request.variables["offer"]["id"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

type Script = dyn Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync;

/// Model client answering from a closure and counting calls.
pub struct ScriptedModel {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fixed advocate and skeptic scores on every round.
    pub fn fixed(advocate: f64, skeptic: f64) -> Self {
        Self::new(move |req| {
            if is_advocate(req) {
                Ok(reply(advocate, 0.9))
            } else {
                Ok(reply(skeptic, 0.9))
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn evaluate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = (self.script)(&request)?;
        Ok(ModelResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 10,
            },
            model: "scripted".to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
