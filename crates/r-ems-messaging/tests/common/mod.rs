//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::time::{Duration, Instant};

use r_ems_messaging::{Socket, SocketError, SocketOptions, Topology};

pub const SETTLE: Option<Duration> = Some(Duration::from_secs(2));
pub const QUIET: Option<Duration> = Some(Duration::from_millis(50));

/// Options tuned for fast, deterministic tests.
pub fn options(name: &str) -> SocketOptions {
    SocketOptions::default()
        .with_name(name)
        .recv_timeout(Some(Duration::from_secs(2)))
        .send_timeout(Some(Duration::from_secs(2)))
        .reconnect_interval(Duration::from_millis(10))
}

pub async fn listener(topology: Topology, name: &str, address: &str) -> Socket {
    Socket::open(topology, options(name).listen(address))
        .await
        .expect("open listening socket")
}

pub async fn dialer(topology: Topology, name: &str, address: &str) -> Socket {
    Socket::open(topology, options(name).dial(address))
        .await
        .expect("open dialing socket")
}

/// Receive until the socket stays quiet, returning message bodies.
pub async fn drain(socket: &Socket) -> Vec<String> {
    let mut bodies = Vec::new();
    loop {
        match socket.recv_timeout(QUIET).await {
            Ok(message) => bodies.push(message.as_str().unwrap_or_default().to_owned()),
            Err(SocketError::Timeout) => return bodies,
            Err(err) => panic!("unexpected receive error: {err}"),
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
