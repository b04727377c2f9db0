//! gobgp adapter for the BGP speaker
//!
//! Routes are originated by a gobgpd sidecar; this crate drives it through
//! the `gobgp` command line client.

pub mod cli;
pub mod config;
pub mod error;
pub mod speaker;

pub use cli::GobgpCli;
pub use config::BgpConfig;
pub use error::{GobgpError, Result};
pub use speaker::{parse_rib, GobgpSpeaker};
