//! Error kinds for the director subsystems.

use thiserror::Error;

/// Fatal startup misconfiguration. Refuses to start the subsystem.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{violation} moderation requires an AI spline")]
    MissingAiSpline { violation: &'static str },

    #[error("no-lights moderation requires a sun position")]
    MissingSunPosition,

    #[error("invalid AI parameter: {0}")]
    InvalidAiParameter(String),
}

/// Failure inside a single director tick.
///
/// Caught at the tick boundary, logged and swallowed; the next tick
/// re-evaluates from scratch.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("outbound packet channel closed")]
    OutboundClosed,

    #[error("{0}")]
    Internal(String),
}
