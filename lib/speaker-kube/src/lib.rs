//! Kubernetes adapters for the BGP speaker
//!
//! Reflector-backed [`speaker_core::ResourceCache`] implementations and the
//! watches that keep them current.

pub mod cache;
pub mod client;
pub mod watch;

pub use cache::ReflectorCache;
pub use client::{SpeakerClient, Watches};
pub use watch::{watch_resource, EventClassifier};
