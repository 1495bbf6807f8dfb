//! Model access layer.
//!
//! The engine treats the language model as an external capability behind
//! [`ModelClient`]. This module owns the call contract, the retry policy
//! wrapped around every call, the prompt registry that renders requests, the
//! strict JSON extraction applied to responses, and an HTTP implementation
//! for OpenAI-compatible endpoints.
//!
//! ```text
//! PromptRegistry::build_request ──► call_with_retry ──► ModelClient::evaluate
//!                                        │  (timeout per attempt,
//!                                        │   2s/4s/8s… capped at 30s)
//!                                        ▼
//!                                 parse_structured::<T>
//! ```

pub mod client;
pub mod http;
pub mod parse;
pub mod prompts;
pub mod retry;

pub use client::{
    ModelClient, ModelError, ModelRequest, ModelResponse, ModelSettings, PromptVariables,
    TokenUsage,
};
pub use http::{EndpointConfig, HttpModelClient};
pub use parse::{extract_json_object, parse_structured};
pub use prompts::{PromptRegistry, PromptTemplate, ADVOCATE_PROMPT, SKEPTIC_PROMPT};
pub use retry::{call_with_retry, RetryPolicy};
