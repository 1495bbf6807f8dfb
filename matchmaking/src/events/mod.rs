//! Engine event stream
//!
//! The batch processor, scheduler and cache publish [`EngineEvent`]s on a
//! shared [`EventBus`]. Monitoring and notification layers subscribe; the
//! engine itself never reads events back.
//!
//! ```text
//! Scheduler ──┐
//! Batch     ──┼──▶ EventBus (broadcast) ──▶ subscribers
//! Cache     ──┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, SharedEventBus};
pub use types::{BatchId, EngineEvent};
