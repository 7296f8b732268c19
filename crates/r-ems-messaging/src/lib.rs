//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Scalability-protocol sockets for R-EMS.
//!
//! A [`Socket`] implements one [`Topology`]: pair, bus, push/pull,
//! pub/sub, req/rep, or surveyor/respondent. Sockets listen on and dial any
//! number of `inproc://` or `tcp://` addresses; every blocking call takes an
//! optional timeout.
//!
//! ```no_run
//! # async fn demo() -> r_ems_messaging::Result<()> {
//! use r_ems_messaging::{Socket, SocketOptions, Topology};
//!
//! let rep = Socket::open(Topology::Rep, SocketOptions::default().listen("inproc://date")).await?;
//! let req = Socket::open(Topology::Req, SocketOptions::default().dial("inproc://date")).await?;
//!
//! req.send("DATE").await?;
//! let request = rep.recv().await?;
//! rep.send(request.reply("2024-01-01")).await?;
//! assert_eq!(req.recv().await?.as_str(), Some("2024-01-01"));
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

mod correlation;
pub mod error;
pub mod filter;
pub mod message;
pub mod metrics;
pub mod options;
mod registry;
mod router;
mod socket;
pub mod topology;

pub use error::{Result, SocketError};
pub use filter::TopicFilter;
pub use message::Message;
pub use metrics::{SocketMetricsExporter, SocketStats};
pub use options::SocketOptions;
pub use r_ems_transport::{Address, CorrelationId};
pub use registry::{PeerId, PeerInfo, PeerRole};
pub use socket::{Socket, SocketBuilder};
pub use topology::Topology;
