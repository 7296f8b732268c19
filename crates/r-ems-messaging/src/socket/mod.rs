//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The socket: one topology bound to any number of listen and dial
//! addresses, with a background task per listener, dialer, and connection.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use r_ems_logging::{
    ems_debug, ems_info, ems_trace, log_system_event, LogContext, SystemEventOutcome,
};
use r_ems_transport::{transport_for, Address, Connection, Transport, TransportError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::correlation::{Outbound, Protocol, Verdict};
use crate::error::{Result, SocketError};
use crate::metrics::{Event, SocketMetrics, SocketMetricsExporter, SocketStats};
use crate::registry::{Inbound, PeerId, PeerInfo, PeerRole, Registry};
use crate::router::{Route, Router};
use crate::{Message, SocketOptions, Topology};

mod tasks;

/// Grace period for background tasks to observe shutdown before abort.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(1);

struct State {
    registry: Registry,
    router: Router,
    protocol: Protocol,
    bound: Vec<Address>,
}

/// State shared between the socket handle and its background tasks.
pub(crate) struct Shared {
    topology: Topology,
    name: String,
    options: SocketOptions,
    transport: Option<Arc<dyn Transport>>,
    state: Mutex<State>,
    /// Inbound frame queued, or a peer attached or retired.
    activity: Notify,
    /// An inbox was drained.
    space: Notify,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics: SocketMetrics,
}

enum Targets {
    Fanout(Vec<(PeerId, Arc<dyn Connection>)>),
    Single(PeerId, Arc<dyn Connection>),
    Waiting { wait: bool },
}

impl Shared {
    fn context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_socket(&self.name)
            .with_topology(self.topology.as_str())
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolve once the socket starts closing.
    async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn transport(&self, address: &Address) -> Arc<dyn Transport> {
        self.transport
            .clone()
            .unwrap_or_else(|| transport_for(address))
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Register a connection. `None` means the socket is full or closing.
    fn attach(&self, conn: Arc<dyn Connection>, role: PeerRole) -> Option<PeerId> {
        if self.is_closed() {
            return None;
        }
        let remote = conn.remote().to_owned();
        let peer = self
            .state
            .lock()
            .registry
            .insert(conn, role, remote.clone())?;
        self.metrics.record(Event::PeerAdded);
        ems_debug!(
            context = self.context().with_peer(peer.get()).with_address(&remote),
            "peer attached ({:?})",
            role
        );
        self.activity.notify_waiters();
        Some(peer)
    }

    /// Mark a peer dead and close its connection. Frames already queued
    /// from it remain receivable; replies owed to it are forgotten.
    async fn retire_peer(&self, peer: PeerId) {
        let conn = {
            let mut state = self.state.lock();
            state.protocol.forget_peer(peer);
            state.registry.mark_dead(peer)
        };
        if let Some(conn) = conn {
            conn.close().await;
            self.metrics.record(Event::PeerRemoved);
            ems_debug!(
                context = self.context().with_peer(peer.get()).with_address(conn.remote()),
                "peer retired"
            );
            self.activity.notify_waiters();
            self.space.notify_waiters();
        }
    }

    /// Queue an inbound frame, pausing while the peer's inbox is full.
    /// Returns `false` once the peer or socket is gone.
    async fn enqueue(&self, peer: PeerId, mut frame: r_ems_transport::Frame) -> bool {
        loop {
            let space = self.space.notified();
            let outcome = self.state.lock().registry.push_inbound(peer, frame);
            match outcome {
                Inbound::Queued => {
                    self.activity.notify_waiters();
                    return true;
                }
                Inbound::Gone => return false,
                Inbound::Full(back) => {
                    frame = back;
                    tokio::select! {
                        _ = space => {}
                        _ = self.closed() => return false,
                    }
                }
            }
        }
    }

    fn remaining(deadline: Option<Instant>) -> Option<Duration> {
        deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    async fn sleep_until(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
            }
            None => std::future::pending().await,
        }
    }
}

/// Builder for sockets that need a custom transport or metrics exporter.
#[derive(Debug)]
pub struct SocketBuilder {
    topology: Topology,
    options: SocketOptions,
    transport: Option<Arc<dyn Transport>>,
    exporter: Option<SocketMetricsExporter>,
}

impl SocketBuilder {
    /// Start a builder with default options.
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            options: SocketOptions::default(),
            transport: None,
            exporter: None,
        }
    }

    /// Replace the socket options.
    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `transport` for every address instead of resolving by scheme.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Mirror the socket counters into a Prometheus exporter.
    pub fn metrics(mut self, exporter: SocketMetricsExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Validate the options, then bind and dial the configured addresses.
    pub async fn open(self) -> Result<Socket> {
        self.options.validate()?;
        let topology = self.topology;
        let name = self.options.name.clone().unwrap_or_else(|| {
            format!("{}-{}", topology, SOCKET_SEQ.fetch_add(1, Ordering::Relaxed))
        });
        let state = State {
            registry: Registry::new(topology.max_peers(), self.options.recv_buffer),
            router: Router::for_topology(topology),
            protocol: Protocol::for_topology(topology, &self.options.topics),
            bound: Vec::new(),
        };
        let shared = Arc::new(Shared {
            topology,
            metrics: SocketMetrics::new(name.clone(), topology.as_str(), self.exporter),
            name,
            options: self.options,
            transport: self.transport,
            state: Mutex::new(state),
            activity: Notify::new(),
            space: Notify::new(),
            shutdown: watch::Sender::new(false),
            tasks: Mutex::new(Vec::new()),
        });
        let socket = Socket { shared };

        let listen = socket.shared.options.listen.clone();
        let dial = socket.shared.options.dial.clone();
        for address in &listen {
            if let Err(err) = socket.listen(address).await {
                log_system_event(
                    Some(&socket.shared.context().with_address(address)),
                    "socket.open",
                    &err.to_string(),
                    SystemEventOutcome::Fault,
                );
                socket.close().await;
                return Err(err);
            }
        }
        for address in &dial {
            if let Err(err) = socket.dial(address).await {
                socket.close().await;
                return Err(err);
            }
        }
        log_system_event(
            Some(&socket.shared.context()),
            "socket.open",
            "socket opened",
            SystemEventOutcome::Success,
        );
        Ok(socket)
    }
}

/// A messaging socket bound to one [`Topology`].
///
/// `send` and `recv` may be called concurrently from different tasks; wrap
/// the socket in an `Arc` to share it. Dropping the socket stops its
/// background tasks; [`Socket::close`] does the same and waits for them.
pub struct Socket {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("name", &self.shared.name)
            .field("topology", &self.shared.topology)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl Socket {
    /// Open a socket with the given options.
    pub async fn open(topology: Topology, options: SocketOptions) -> Result<Self> {
        SocketBuilder::new(topology).options(options).open().await
    }

    /// Builder for sockets needing a custom transport or metrics.
    pub fn builder(topology: Topology) -> SocketBuilder {
        SocketBuilder::new(topology)
    }

    /// Socket topology.
    pub fn topology(&self) -> Topology {
        self.shared.topology
    }

    /// Label used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Options the socket was opened with.
    pub fn options(&self) -> &SocketOptions {
        &self.shared.options
    }

    /// Bind a listener. Returns the effective address (TCP port 0 resolves
    /// to the port actually bound).
    pub async fn listen(&self, address: &str) -> Result<Address> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(SocketError::Closed);
        }
        let address: Address = address.parse()?;
        let listener = shared.transport(&address).listen(&address).await?;
        let bound = listener.address().clone();
        shared.state.lock().bound.push(bound.clone());
        let bound_text = bound.to_string();
        ems_info!(
            context = shared.context().with_address(&bound_text),
            "listening"
        );
        shared.track(tokio::spawn(tasks::accept_loop(shared.clone(), listener)));
        Ok(bound)
    }

    /// Start dialing `address`. Returns immediately; the connection is
    /// established (and re-established) in the background.
    pub async fn dial(&self, address: &str) -> Result<()> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(SocketError::Closed);
        }
        let address: Address = address.parse()?;
        let transport = shared.transport(&address);
        let address_text = address.to_string();
        ems_info!(
            context = shared.context().with_address(&address_text),
            "dialing"
        );
        shared.track(tokio::spawn(tasks::dial_loop(
            shared.clone(),
            transport,
            address,
        )));
        Ok(())
    }

    /// Send with the configured send timeout.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.send_timeout(message, self.shared.options.send_timeout)
            .await
    }

    /// Send with an explicit timeout; `None` waits indefinitely.
    pub async fn send_timeout(
        &self,
        message: impl Into<Message>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let shared = &self.shared;
        let message = message.into();
        if !shared.topology.can_send() {
            return Err(SocketError::InvalidOperation {
                topology: shared.topology,
                operation: "send",
            });
        }
        if shared.is_closed() {
            return Err(SocketError::Closed);
        }
        let now = Instant::now();
        let deadline = timeout.map(|timeout| now + timeout);
        let outbound = shared.state.lock().protocol.prepare_send(
            &message,
            now,
            shared.options.recv_timeout,
            shared.options.survey_time,
        )?;
        let result = self.deliver(&message, outbound, deadline).await;
        if result.is_err() {
            if let Some(id) = outbound.correlation {
                shared.state.lock().protocol.abort_request(id);
            }
        }
        result
    }

    async fn deliver(
        &self,
        message: &Message,
        outbound: Outbound,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let shared = &self.shared;
        let frame = message.to_frame(outbound.correlation);
        loop {
            let activity = shared.activity.notified();
            if shared.is_closed() {
                return Err(SocketError::Closed);
            }
            let targets = {
                let mut guard = shared.state.lock();
                let State {
                    registry,
                    router,
                    protocol,
                    ..
                } = &mut *guard;
                let live = registry.live_ids();
                match router.select(&live, outbound.origin) {
                    Route::All(peers) => Targets::Fanout(
                        peers
                            .into_iter()
                            .filter_map(|peer| registry.connection(peer).map(|c| (peer, c)))
                            .collect(),
                    ),
                    Route::One(peer) => match registry.connection(peer) {
                        Some(conn) => {
                            if let Some(id) = outbound.correlation {
                                protocol.request_sent(id, peer);
                            }
                            Targets::Single(peer, conn)
                        }
                        None => Targets::Waiting {
                            wait: router.waits_for_peer(),
                        },
                    },
                    Route::NoPeer => Targets::Waiting {
                        wait: router.waits_for_peer(),
                    },
                }
            };

            match targets {
                Targets::Fanout(peers) => return self.fanout(&frame, peers, deadline).await,
                Targets::Single(peer, conn) => {
                    let sent = tokio::select! {
                        biased;
                        _ = shared.closed() => return Err(SocketError::Closed),
                        sent = conn.send(frame.clone(), Shared::remaining(deadline)) => sent,
                    };
                    match sent {
                        Ok(()) => {
                            shared.state.lock().registry.touch(peer);
                            shared.metrics.record(Event::Sent);
                            return Ok(());
                        }
                        Err(_) if shared.is_closed() => return Err(SocketError::Closed),
                        Err(TransportError::Timeout) => return Err(SocketError::Timeout),
                        Err(err) if err.is_disconnect() => {
                            shared.retire_peer(peer).await;
                            if shared.topology != Topology::Push {
                                return Err(SocketError::ConnectionClosed);
                            }
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Targets::Waiting { wait: false } => return Err(SocketError::ConnectionClosed),
                Targets::Waiting { wait: true } => {
                    if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                        return Err(SocketError::Timeout);
                    }
                    tokio::select! {
                        _ = activity => {}
                        _ = Shared::sleep_until(deadline) => return Err(SocketError::Timeout),
                        _ = shared.closed() => return Err(SocketError::Closed),
                    }
                }
            }
        }
    }

    /// Best-effort delivery to every peer. Slow peers that miss the deadline
    /// are skipped; the message counts as dropped only if no peer took it.
    /// Closing the socket mid-broadcast fails the call with `Closed`.
    async fn fanout(
        &self,
        frame: &r_ems_transport::Frame,
        peers: Vec<(PeerId, Arc<dyn Connection>)>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let shared = &self.shared;
        let mut delivered = 0usize;
        for (peer, conn) in peers {
            let sent = tokio::select! {
                biased;
                _ = shared.closed() => return Err(SocketError::Closed),
                sent = conn.send(frame.clone(), Shared::remaining(deadline)) => sent,
            };
            match sent {
                Err(_) if shared.is_closed() => return Err(SocketError::Closed),
                Ok(()) => {
                    shared.state.lock().registry.touch(peer);
                    delivered += 1;
                }
                Err(err) if err.is_disconnect() => shared.retire_peer(peer).await,
                Err(err) => {
                    ems_debug!(
                        context = shared.context().with_peer(peer.get()),
                        "broadcast skipped peer: {}",
                        err
                    );
                }
            }
        }
        if delivered == 0 {
            shared.metrics.record(Event::Dropped);
            ems_debug!(context = shared.context(), "no peer took broadcast; dropped");
        } else {
            shared.metrics.record(Event::Sent);
        }
        Ok(())
    }

    /// Receive with the configured receive timeout.
    pub async fn recv(&self) -> Result<Message> {
        self.recv_timeout(self.shared.options.recv_timeout).await
    }

    /// Receive with an explicit timeout; `None` waits indefinitely.
    ///
    /// Request and survey sockets are additionally bounded by the deadline
    /// of the outstanding request or open survey.
    pub async fn recv_timeout(&self, timeout: Option<Duration>) -> Result<Message> {
        let shared = &self.shared;
        if !shared.topology.can_receive() {
            return Err(SocketError::InvalidOperation {
                topology: shared.topology,
                operation: "recv",
            });
        }
        let call_deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let activity = shared.activity.notified();
            if shared.is_closed() {
                return Err(SocketError::Closed);
            }
            let now = Instant::now();
            let (bound, delivered, discarded, freed) = {
                let mut guard = shared.state.lock();
                let State {
                    registry, protocol, ..
                } = &mut *guard;
                let bound = protocol.prepare_receive(now, |peer| registry.contains(peer))?;
                let mut delivered = None;
                let mut discarded = Vec::new();
                let mut freed = false;
                while let Some((peer, frame)) = registry.next_inbound() {
                    freed = true;
                    match protocol.inbound(peer, frame, now) {
                        Verdict::Deliver(message) => {
                            delivered = Some(message);
                            break;
                        }
                        Verdict::Discard(reason) => discarded.push((peer, reason)),
                    }
                }
                (bound, delivered, discarded, freed)
            };

            for (peer, reason) in discarded {
                shared.metrics.record(Event::Discarded);
                ems_trace!(
                    context = shared.context().with_peer(peer.get()),
                    "inbound frame discarded: {}",
                    reason
                );
            }
            if freed {
                shared.space.notify_waiters();
            }
            if let Some(message) = delivered {
                shared.metrics.record(Event::Received);
                return Ok(message);
            }
            if call_deadline.is_some_and(|deadline| deadline <= now) {
                return Err(SocketError::Timeout);
            }

            let wake = match (bound, call_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            tokio::select! {
                _ = activity => {}
                _ = Shared::sleep_until(wake) => {}
                _ = shared.closed() => return Err(SocketError::Closed),
            }
        }
    }

    /// Add a subscription prefix (`Sub` only).
    pub fn subscribe(&self, topic: impl AsRef<[u8]>) -> Result<()> {
        let mut state = self.shared.state.lock();
        let filter = state
            .protocol
            .filter_mut()
            .ok_or(SocketError::InvalidOperation {
                topology: self.shared.topology,
                operation: "subscribe",
            })?;
        filter.subscribe(topic.as_ref());
        Ok(())
    }

    /// Remove a subscription prefix (`Sub` only). Returns whether it existed.
    pub fn unsubscribe(&self, topic: impl AsRef<[u8]>) -> Result<bool> {
        let mut state = self.shared.state.lock();
        let filter = state
            .protocol
            .filter_mut()
            .ok_or(SocketError::InvalidOperation {
                topology: self.shared.topology,
                operation: "unsubscribe",
            })?;
        Ok(filter.unsubscribe(topic.as_ref()))
    }

    /// Number of live peers.
    pub fn peer_count(&self) -> usize {
        self.shared.state.lock().registry.live_count()
    }

    /// Snapshot of the live peers in registry order.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.state.lock().registry.snapshot()
    }

    /// Addresses this socket is listening on.
    pub fn local_addresses(&self) -> Vec<Address> {
        self.shared.state.lock().bound.clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SocketStats {
        self.shared.metrics.snapshot()
    }

    /// Wait until at least `count` peers are attached.
    pub async fn wait_for_peers(&self, count: usize, timeout: Option<Duration>) -> Result<()> {
        let shared = &self.shared;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let activity = shared.activity.notified();
            if shared.is_closed() {
                return Err(SocketError::Closed);
            }
            if self.peer_count() >= count {
                return Ok(());
            }
            tokio::select! {
                _ = activity => {}
                _ = Shared::sleep_until(deadline) => return Err(SocketError::Timeout),
                _ = shared.closed() => return Err(SocketError::Closed),
            }
        }
    }

    /// Whether [`Socket::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close every connection and listener and stop background tasks.
    /// Pending calls fail with [`SocketError::Closed`]. Idempotent.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.shutdown.send_replace(true) {
            return;
        }
        let conns = shared.state.lock().registry.drain();
        for conn in conns {
            conn.close().await;
            shared.metrics.record(Event::PeerRemoved);
        }
        shared.activity.notify_waiters();
        shared.space.notify_waiters();

        let tasks = std::mem::take(&mut *shared.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        log_system_event(
            Some(&shared.context()),
            "socket.close",
            "socket closed",
            SystemEventOutcome::Success,
        );
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
