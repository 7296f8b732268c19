//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{dialer, listener, options, SETTLE};
use r_ems_messaging::{
    Address, Socket, SocketError, SocketMetricsExporter, SocketOptions, Topology,
};
use r_ems_transport::TransportError;
use tokio::task::JoinHandle;

/// Send until a call fails; the receiving side never drains, so the loop
/// ends up suspended on back-pressure.
fn send_until_error(socket: Arc<Socket>) -> JoinHandle<SocketError> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = socket.send_timeout("fill", None).await {
                return err;
            }
        }
    })
}

async fn assert_close_unblocks_send(topology: Topology, address: &str) {
    let sink = Socket::open(
        topology,
        SocketOptions {
            recv_buffer: 1,
            ..options("sink").listen(address)
        },
    )
    .await
    .expect("sink");
    let source = Arc::new(dialer(topology, "source", address).await);
    source.wait_for_peers(1, SETTLE).await.expect("source attached");

    let sender = send_until_error(source.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sender.is_finished(), "send should be suspended");

    source.close().await;
    let err = tokio::time::timeout(Duration::from_secs(1), sender)
        .await
        .expect("send returns promptly")
        .expect("task joins");
    assert!(matches!(err, SocketError::Closed), "{topology}: {err}");
    assert_eq!(source.stats().dropped, 0);
    drop(sink);
}

#[tokio::test]
async fn close_unblocks_pending_receive() {
    let pull = Arc::new(listener(Topology::Pull, "pull", "inproc://lifecycle-close").await);
    let waiter = {
        let pull = pull.clone();
        tokio::spawn(async move { pull.recv_timeout(None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pull.close().await;
    let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("receive returns promptly")
        .expect("task joins");
    assert!(matches!(outcome, Err(SocketError::Closed)));

    pull.close().await;
    assert!(pull.is_closed());
    assert!(matches!(pull.recv().await, Err(SocketError::Closed)));
    assert!(matches!(
        pull.listen("inproc://lifecycle-close-again").await,
        Err(SocketError::Closed)
    ));
}

#[tokio::test]
async fn close_unblocks_pending_send() {
    assert_close_unblocks_send(Topology::Pair, "inproc://lifecycle-close-send-pair").await;
}

#[tokio::test]
async fn close_unblocks_pending_broadcast() {
    assert_close_unblocks_send(Topology::Bus, "inproc://lifecycle-close-send-bus").await;
}

#[tokio::test]
async fn close_releases_listen_address_and_peers() {
    let pair = listener(Topology::Pair, "first", "inproc://lifecycle-rebind").await;
    let peer = dialer(Topology::Pair, "peer", "inproc://lifecycle-rebind").await;
    pair.wait_for_peers(1, SETTLE).await.expect("peer attached");

    pair.close().await;
    assert_eq!(pair.peer_count(), 0);
    assert!(common::eventually(|| peer.peer_count() == 0).await);

    let again = listener(Topology::Pair, "second", "inproc://lifecycle-rebind").await;
    again.wait_for_peers(1, SETTLE).await.expect("peer redials");
}

#[tokio::test]
async fn duplicate_inproc_listen_is_rejected() {
    let _first = listener(Topology::Bus, "first", "inproc://lifecycle-dup").await;
    let err = Socket::open(Topology::Bus, options("second").listen("inproc://lifecycle-dup"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SocketError::Transport(TransportError::AddressInUse(_))
    ));
}

#[tokio::test]
async fn invalid_addresses_and_options_are_rejected() {
    let socket = Socket::open(Topology::Bus, options("bus")).await.expect("bus");
    assert!(matches!(
        socket.dial("udp://127.0.0.1:1").await,
        Err(SocketError::Transport(TransportError::InvalidAddress(_)))
    ));

    let invalid = SocketOptions::default().survey_time(Duration::ZERO);
    assert!(matches!(
        Socket::open(Topology::Surveyor, invalid).await,
        Err(SocketError::InvalidOption(_))
    ));
}

#[tokio::test]
async fn tcp_request_reply_round_trip() {
    let rep = Socket::open(Topology::Rep, options("rep")).await.expect("rep");
    let bound = rep.listen("tcp://127.0.0.1:0").await.expect("bind tcp");
    assert!(matches!(bound, Address::Tcp(_)));
    assert_ne!(bound.target(), "127.0.0.1:0");
    assert_eq!(rep.local_addresses(), vec![bound.clone()]);

    let req = dialer(Topology::Req, "req", &bound.to_string()).await;
    req.send("DATE").await.expect("request over tcp");
    let request = rep.recv().await.expect("request arrives");
    rep.send(request.reply("today")).await.expect("reply");
    assert_eq!(req.recv().await.expect("reply").as_str(), Some("today"));
}

#[tokio::test]
async fn stats_and_exporter_track_traffic() {
    let registry = prometheus::Registry::new();
    let exporter = SocketMetricsExporter::register(&registry).expect("register metrics");
    let pull = Socket::builder(Topology::Pull)
        .options(options("pull").listen("inproc://lifecycle-stats"))
        .metrics(exporter)
        .open()
        .await
        .expect("pull");
    let push = dialer(Topology::Push, "push", "inproc://lifecycle-stats").await;

    push.send("one").await.expect("send");
    push.send("two").await.expect("send");
    pull.recv().await.expect("recv");
    pull.recv().await.expect("recv");

    assert_eq!(push.stats().sent, 2);
    let stats = pull.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.peers_added, 1);
    assert_eq!(pull.peers().len(), 1);

    let received = registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "r_ems_socket_messages_total")
        .expect("message family");
    let total: f64 = received
        .get_metric()
        .iter()
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(total, 2.0);
}
