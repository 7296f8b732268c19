//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and tracing setup for messaging services."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for R-EMS messaging processes.
//! This crate exposes configuration loading and tracing setup consumed by
//! the workspace binaries.

pub mod config;
pub mod logging;

pub use config::{LoadedMessagingConfig, LoggingConfig, MessagingConfig, SocketConfig};
pub use logging::{init_tracing, LogFormat};
