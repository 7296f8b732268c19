//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Socket label associated with the log event.
    pub socket: Option<&'a str>,
    /// Socket topology (pair, bus, push, ...).
    pub topology: Option<&'a str>,
    /// Peer link identifier within the socket.
    pub peer: Option<u64>,
    /// Transport address involved in the event.
    pub address: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a socket label.
    pub fn with_socket(mut self, socket: &'a str) -> Self {
        self.socket = Some(socket);
        self
    }

    /// Attach a topology name.
    pub fn with_topology(mut self, topology: &'a str) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Attach a peer identifier.
    pub fn with_peer(mut self, peer: u64) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Attach a transport address.
    pub fn with_address(mut self, address: &'a str) -> Self {
        self.address = Some(address);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (socket open, bind, close) with a
/// success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            socket = ctx.socket.unwrap_or(""),
            topology = ctx.topology.unwrap_or(""),
            peer = ctx.peer.unwrap_or_default(),
            address = ctx.address.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            socket = ctx.socket.unwrap_or(""),
            topology = ctx.topology.unwrap_or(""),
            peer = ctx.peer.unwrap_or_default(),
            address = ctx.address.unwrap_or(""),
            message = %message
        ),
    }
}
