//! Route reconciliation engine for the BGP speaker
//!
//! This library provides:
//! - Expected-state computation for each operating mode
//! - Diffing of expected prefixes against the speaker's routes
//! - Event-driven IptablesEIP handling on a per-key retry queue
//! - The controller tying the periodic and event paths together

pub mod cache;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod modes;
pub mod placement;
pub mod prefix;
pub mod queue;
pub mod reconcile;
pub mod speaker;

pub use cache::{MemoryCache, ResourceCache, ResourceEvent};
pub use config::{Mode, SpeakerConfig};
pub use controller::SpeakerController;
pub use dispatcher::EipEventHandler;
pub use error::{Result, SpeakerError};
pub use metrics::SpeakerMetrics;
pub use modes::Caches;
pub use placement::PlacementResolver;
pub use prefix::{parse_prefix, PrefixSet};
pub use queue::RetryQueue;
pub use reconcile::{reconcile_routes, ReconcileSummary};
pub use speaker::{MemorySpeaker, RouteSpeaker};
