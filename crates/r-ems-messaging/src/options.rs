//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Messaging orchestrators and IPC bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{formats::PreferOne, serde_as, DurationMilliSeconds, OneOrMany};

use crate::error::{Result, SocketError};

fn default_timeout() -> Option<Duration> {
    Some(Duration::from_millis(1000))
}

fn default_survey_time() -> Duration {
    Duration::from_millis(1000)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_recv_buffer() -> usize {
    128
}

/// Construction-time configuration of a socket.
///
/// Deserializes from the `[sockets.<name>]` tables of the messaging config.
/// Timeouts are milliseconds; `"infinite"` disables the deadline.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    /// Label used in logs and metrics.
    #[serde(default)]
    pub name: Option<String>,
    /// Addresses to bind when the socket opens.
    #[serde(default)]
    #[serde_as(as = "OneOrMany<_, PreferOne>")]
    pub listen: Vec<String>,
    /// Addresses to dial when the socket opens.
    #[serde(default)]
    #[serde_as(as = "OneOrMany<_, PreferOne>")]
    pub dial: Vec<String>,
    /// Default deadline for `recv`. Also bounds an outstanding request.
    #[serde(default = "default_timeout", with = "timeout_ms")]
    pub recv_timeout: Option<Duration>,
    /// Default deadline for `send`.
    #[serde(default = "default_timeout", with = "timeout_ms")]
    pub send_timeout: Option<Duration>,
    /// Response window of a survey.
    #[serde(default = "default_survey_time")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub survey_time: Duration,
    /// Initial subscriptions of a subscriber socket.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Pause before a dialer retries a failed or dropped connection.
    #[serde(default = "default_reconnect_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_interval: Duration,
    /// Frames buffered per connection before its reader pauses.
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            name: None,
            listen: Vec::new(),
            dial: Vec::new(),
            recv_timeout: default_timeout(),
            send_timeout: default_timeout(),
            survey_time: default_survey_time(),
            topics: Vec::new(),
            reconnect_interval: default_reconnect_interval(),
            recv_buffer: default_recv_buffer(),
        }
    }
}

impl SocketOptions {
    /// Set the socket label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a listen address.
    pub fn listen(mut self, address: impl Into<String>) -> Self {
        self.listen.push(address.into());
        self
    }

    /// Add a dial address.
    pub fn dial(mut self, address: impl Into<String>) -> Self {
        self.dial.push(address.into());
        self
    }

    /// Set the receive deadline; `None` waits indefinitely.
    pub fn recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Set the send deadline; `None` waits indefinitely.
    pub fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the survey response window.
    pub fn survey_time(mut self, window: Duration) -> Self {
        self.survey_time = window;
        self
    }

    /// Add an initial subscription.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Set the dialer retry pause.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Reject option combinations the socket cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.survey_time.is_zero() {
            return Err(SocketError::InvalidOption(
                "survey_time must be greater than zero".into(),
            ));
        }
        if self.reconnect_interval.is_zero() {
            return Err(SocketError::InvalidOption(
                "reconnect_interval must be greater than zero".into(),
            ));
        }
        if self.recv_buffer == 0 {
            return Err(SocketError::InvalidOption(
                "recv_buffer must be at least 1".into(),
            ));
        }
        for address in self.listen.iter().chain(&self.dial) {
            if address.trim().is_empty() {
                return Err(SocketError::InvalidOption("empty address".into()));
            }
        }
        Ok(())
    }
}

/// `Option<Duration>` as milliseconds, with `"infinite"`/`"never"` for `None`.
pub mod timeout_ms {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    const INFINITE: &str = "infinite";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Word(String),
    }

    /// Serialize a timeout.
    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timeout) => {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                serializer.serialize_u64(millis)
            }
            None => serializer.serialize_str(INFINITE),
        }
    }

    /// Deserialize a timeout.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Some(Duration::from_millis(millis))),
            Raw::Word(word) => match word.trim().to_ascii_lowercase().as_str() {
                "infinite" | "never" | "none" => Ok(None),
                other => other
                    .parse::<u64>()
                    .map(|millis| Some(Duration::from_millis(millis)))
                    .map_err(|_| {
                        de::Error::custom(format!(
                            "expected milliseconds or \"{INFINITE}\", found {word:?}"
                        ))
                    }),
            },
        }
    }
}
