//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for exercising R-EMS messaging sockets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Console renditions of the classic scalability-protocol demos. Every
//! pattern has a `demo` role running all parties in this process.
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};
use r_ems_common::config::MessagingConfig;
use r_ems_messaging::{Message, Socket, SocketError, SocketOptions, Topology};
use tracing::{debug, warn};

const SURVEY_WINDOW: Duration = Duration::from_millis(500);
const PEER_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PairRole {
    Node0,
    Node1,
    Demo,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PipelineRole {
    Node0,
    Node1,
    Demo,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ServerRole {
    Server,
    Client,
    Demo,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct Pace {
    /// Stop after this many rounds (runs until interrupted when omitted).
    #[arg(long)]
    pub rounds: Option<u64>,
    /// Pause between rounds in milliseconds.
    #[arg(long = "interval-ms", default_value_t = 1000)]
    pub interval_ms: u64,
}

impl Pace {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn rounds(&self) -> impl Iterator<Item = u64> {
        let limit = self.rounds;
        (0u64..).take_while(move |n| limit.map_or(true, |max| *n < max))
    }

    fn unbounded(self) -> Self {
        Self {
            rounds: None,
            ..self
        }
    }
}

fn date() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

fn text(message: &Message) -> String {
    String::from_utf8_lossy(message.body()).into_owned()
}

async fn open(topology: Topology, options: SocketOptions) -> Result<Socket> {
    Socket::open(topology, options)
        .await
        .with_context(|| format!("can't open {topology} socket"))
}

pub async fn pair(role: PairRole, url: &str, pace: Pace) -> Result<()> {
    match role {
        PairRole::Node0 => pair_node("node0", SocketOptions::default().listen(url), pace).await,
        PairRole::Node1 => pair_node("node1", SocketOptions::default().dial(url), pace).await,
        PairRole::Demo => {
            tokio::try_join!(
                pair_node("node0", SocketOptions::default().listen(url), pace),
                pair_node("node1", SocketOptions::default().dial(url), pace),
            )?;
            Ok(())
        }
    }
}

async fn pair_node(name: &str, options: SocketOptions, pace: Pace) -> Result<()> {
    let socket = open(
        Topology::Pair,
        options
            .with_name(name)
            .recv_timeout(Some(Duration::from_millis(100))),
    )
    .await?;
    for _ in pace.rounds() {
        match socket.recv().await {
            Ok(message) => println!("{name}: RECEIVED: \"{}\"", text(&message)),
            Err(SocketError::Timeout) => {}
            Err(err) => return Err(err.into()),
        }
        tokio::time::sleep(pace.interval()).await;
        println!("{name}: SENDING \"{name}\"");
        match socket.send(name.to_owned()).await {
            Ok(()) => {}
            Err(SocketError::Timeout) => warn!(node = name, "no peer to send to"),
            Err(err) => return Err(err.into()),
        }
    }
    socket.close().await;
    Ok(())
}

pub async fn bus(name: &str, listen: &str, dial: &[String], pace: Pace) -> Result<()> {
    let mut options = SocketOptions::default()
        .with_name(name)
        .listen(listen)
        .recv_timeout(Some(pace.interval()));
    for address in dial {
        options = options.dial(address.as_str());
    }
    let socket = open(Topology::Bus, options).await?;
    if let Err(err) = socket.wait_for_peers(dial.len(), Some(PEER_WAIT)).await {
        warn!(node = name, error = %err, "bus not fully connected");
    }

    println!("{name}: SENDING '{name}' ONTO BUS");
    socket.send(name.to_owned()).await?;
    for _ in pace.rounds() {
        match socket.recv().await {
            Ok(message) => println!("{name}: RECEIVED '{}' FROM BUS", text(&message)),
            Err(SocketError::Timeout) => debug!(node = name, "bus quiet"),
            Err(err) => return Err(err.into()),
        }
    }
    socket.close().await;
    Ok(())
}

pub async fn pipeline(role: PipelineRole, url: &str, message: Option<&str>) -> Result<()> {
    match role {
        PipelineRole::Node0 => pull_node(url).await,
        PipelineRole::Node1 => {
            let message = message.ok_or_else(|| anyhow!("node1 needs a message to push"))?;
            push_node(url, message).await
        }
        PipelineRole::Demo => {
            let collector = pull_node(url);
            let producers = async {
                push_node(url, message.unwrap_or("Hello, World!")).await?;
                push_node(url, "STOP").await
            };
            tokio::try_join!(collector, producers)?;
            Ok(())
        }
    }
}

async fn pull_node(url: &str) -> Result<()> {
    let socket = open(
        Topology::Pull,
        SocketOptions::default()
            .with_name("node0")
            .listen(url)
            .recv_timeout(None),
    )
    .await?;
    loop {
        let message = socket.recv().await.context("can't receive from pull socket")?;
        let body = text(&message);
        println!("NODE0: RECEIVED \"{body}\"");
        if body == "STOP" {
            println!("NODE0: STOPPING");
            break;
        }
    }
    socket.close().await;
    Ok(())
}

async fn push_node(url: &str, message: &str) -> Result<()> {
    let socket = open(
        Topology::Push,
        SocketOptions::default()
            .with_name("node1")
            .dial(url)
            .send_timeout(Some(PEER_WAIT)),
    )
    .await?;
    println!("NODE1: SENDING \"{message}\"");
    socket
        .send(message.to_owned())
        .await
        .context("can't send message on push socket")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    socket.close().await;
    Ok(())
}

pub async fn pubsub(role: ServerRole, url: &str, name: Option<&str>, pace: Pace) -> Result<()> {
    let name = name.unwrap_or("client");
    match role {
        ServerRole::Server => publisher(url, pace).await,
        ServerRole::Client => subscriber(url, name, pace).await,
        ServerRole::Demo => {
            let server = publisher(url, pace.unbounded());
            tokio::select! {
                served = server => served,
                listened = subscriber(url, name, pace) => listened,
            }
        }
    }
}

async fn publisher(url: &str, pace: Pace) -> Result<()> {
    let socket = open(
        Topology::Pub,
        SocketOptions::default().with_name("server").listen(url),
    )
    .await?;
    for _ in pace.rounds() {
        let now = date();
        println!("SERVER: PUBLISHING DATE {now}");
        socket.send(now).await.context("failed publishing")?;
        tokio::time::sleep(pace.interval()).await;
    }
    socket.close().await;
    Ok(())
}

async fn subscriber(url: &str, name: &str, pace: Pace) -> Result<()> {
    let socket = open(
        Topology::Sub,
        SocketOptions::default()
            .with_name(name)
            .dial(url)
            .topic("")
            .recv_timeout(None),
    )
    .await?;
    for _ in pace.rounds() {
        let message = socket.recv().await.context("can't recv")?;
        println!("CLIENT ({name}): RECEIVED {}", text(&message));
    }
    socket.close().await;
    Ok(())
}

pub async fn reqrep(role: PairRole, url: &str, pace: Pace) -> Result<()> {
    match role {
        PairRole::Node0 => date_service(url, pace).await,
        PairRole::Node1 => date_request(url).await,
        PairRole::Demo => {
            let service = date_service(url, pace.unbounded());
            let requests = async {
                for _ in pace.rounds() {
                    date_request(url).await?;
                }
                Ok::<(), anyhow::Error>(())
            };
            tokio::select! {
                served = service => served,
                requested = requests => requested,
            }
        }
    }
}

async fn date_service(url: &str, pace: Pace) -> Result<()> {
    let socket = open(
        Topology::Rep,
        SocketOptions::default()
            .with_name("node0")
            .listen(url)
            .recv_timeout(None),
    )
    .await?;
    for _ in pace.rounds() {
        let request = socket.recv().await.context("can't receive on rep socket")?;
        if text(&request) == "DATE" {
            println!("NODE0: RECEIVED DATE REQUEST");
            let now = date();
            println!("NODE0: SENDING DATE {now}");
            socket
                .send(request.reply(now))
                .await
                .context("can't send reply")?;
        }
    }
    socket.close().await;
    Ok(())
}

async fn date_request(url: &str) -> Result<()> {
    let socket = open(
        Topology::Req,
        SocketOptions::default()
            .with_name("node1")
            .dial(url)
            .send_timeout(Some(PEER_WAIT))
            .recv_timeout(Some(PEER_WAIT)),
    )
    .await?;
    println!("NODE1: SENDING DATE REQUEST DATE");
    socket.send("DATE").await.context("can't send request")?;
    let reply = socket.recv().await.context("can't receive date")?;
    println!("NODE1: RECEIVED DATE {}", text(&reply));
    socket.close().await;
    Ok(())
}

pub async fn survey(role: ServerRole, url: &str, name: Option<&str>, pace: Pace) -> Result<()> {
    match role {
        ServerRole::Server => surveyor(url, 0, pace).await,
        ServerRole::Client => respondent(url, name.unwrap_or("client"), pace).await,
        ServerRole::Demo => {
            let clients = async {
                tokio::try_join!(
                    respondent(url, "client0", pace.unbounded()),
                    respondent(url, "client1", pace.unbounded()),
                )?;
                Ok::<(), anyhow::Error>(())
            };
            tokio::select! {
                surveyed = surveyor(url, 2, pace) => surveyed,
                answered = clients => answered,
            }
        }
    }
}

async fn surveyor(url: &str, expected_peers: usize, pace: Pace) -> Result<()> {
    let socket = open(
        Topology::Surveyor,
        SocketOptions::default()
            .with_name("server")
            .listen(url)
            .survey_time(SURVEY_WINDOW),
    )
    .await?;
    if expected_peers > 0 {
        socket
            .wait_for_peers(expected_peers, Some(PEER_WAIT))
            .await
            .context("respondents did not connect")?;
    }
    for _ in pace.rounds() {
        println!("SERVER: SENDING DATE SURVEY REQUEST");
        socket.send("DATE").await.context("failed send DATE SURVEY")?;
        loop {
            match socket.recv_timeout(None).await {
                Ok(answer) => println!("SERVER: RECEIVED \"{}\" SURVEY RESPONSE", text(&answer)),
                Err(SocketError::Timeout) => break,
                Err(err) => return Err(err.into()),
            }
        }
        println!("SERVER: SURVEY COMPLETE");
    }
    socket.close().await;
    Ok(())
}

async fn respondent(url: &str, name: &str, pace: Pace) -> Result<()> {
    let socket = open(
        Topology::Respondent,
        SocketOptions::default()
            .with_name(name)
            .dial(url)
            .recv_timeout(None),
    )
    .await?;
    for _ in pace.rounds() {
        let question = socket.recv().await.context("can't recv")?;
        println!("CLIENT ({name}): RECEIVED \"{}\" SURVEY REQUEST", text(&question));
        println!("CLIENT ({name}): SENDING DATE SURVEY RESPONSE");
        socket
            .send(question.reply(date()))
            .await
            .context("can't send")?;
    }
    socket.close().await;
    Ok(())
}

/// Open a socket from its `[sockets.<name>]` table, send `messages`, then
/// print what arrives.
pub async fn configured(
    config: &MessagingConfig,
    name: &str,
    messages: &[String],
    pace: Pace,
) -> Result<()> {
    let definition = config
        .socket(name)
        .with_context(|| format!("no socket named '{name}' in configuration"))?;
    let socket = open(definition.topology, definition.socket_options(name)).await?;

    for message in messages {
        println!("{name}: SENDING \"{message}\"");
        socket.send(message.clone()).await?;
    }
    if !definition.topology.can_receive() {
        socket.close().await;
        return Ok(());
    }
    for _ in pace.rounds() {
        match socket.recv().await {
            Ok(message) => println!("{name}: RECEIVED \"{}\"", text(&message)),
            Err(SocketError::Timeout) => debug!(socket = name, "nothing received"),
            Err(SocketError::State(reason)) => {
                debug!(socket = name, reason, "nothing to receive");
                tokio::time::sleep(pace.interval()).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
    socket.close().await;
    Ok(())
}
