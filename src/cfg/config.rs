// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::{BaseVersion, DatastoreFamily, WithDefaultsMode};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Transport and session lifetime parameters.
    pub transport: TransportConfig,
    /// Datastore family, startup persistence and defaults handling.
    pub datastores: DatastoreConfig,
    /// Notification replay and delivery fairness knobs.
    pub notifications: NotificationConfig,
    /// Protocol version and capability toggles.
    pub protocol: ProtocolConfig,
}

/// Local-socket transport and per-session timers.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_socket_path", rename = "socket-path")]
    /// Filesystem path of the listening stream socket.
    pub socket_path: PathBuf,

    #[serde(default = "default_hello_timeout", rename = "hello-timeout", with = "serde_secs")]
    /// How long a new session may take to send `<hello>`.
    pub hello_timeout: Duration,

    #[serde(default = "default_idle_timeout", rename = "idle-timeout", with = "serde_secs")]
    /// How long a session may sit idle; sessions with an active
    /// subscription are exempt.
    pub idle_timeout: Duration,

    #[serde(default = "default_max_sessions", rename = "max-sessions")]
    /// Upper bound on concurrently open sessions.
    pub max_sessions: u32,
}

/// Datastore family selection plus startup persistence.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DatastoreConfig {
    #[serde(default = "default_family", rename = "target")]
    /// Which writable store the server advertises.
    pub family: DatastoreFamily,

    #[serde(default, rename = "with-startup")]
    /// Whether a distinct `startup` datastore exists and `:startup` is
    /// advertised.
    pub with_startup: bool,

    #[serde(default, rename = "startup-path")]
    /// File the startup datastore is serialized to (inside `data-dir`).
    pub startup_path: Option<PathBuf>,

    #[serde(default = "default_data_dir", rename = "data-dir")]
    /// Directory that bounds `:url?scheme=file` targets.
    pub data_dir: PathBuf,

    #[serde(default = "default_with_defaults", rename = "with-defaults")]
    /// RFC 6243 basic mode.
    pub with_defaults: WithDefaultsMode,
}

/// Replay log and delivery fairness.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_eventlog_size", rename = "eventlog-size")]
    /// Bounded replay FIFO size; 0 disables replay entirely.
    pub eventlog_size: u32,

    #[serde(default = "default_max_burst", rename = "max-burst")]
    /// Max notifications sent per event-loop tick; 0 means unbounded.
    pub max_burst: u32,
}

/// Protocol versions and capability toggles.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_base_versions", rename = "base-versions")]
    /// Base protocol versions to advertise (1.0 and/or 1.1).
    pub base_versions: Vec<BaseVersion>,

    #[serde(default = "default_true", rename = "validate")]
    /// Advertise `:validate:1.1` and accept `<validate>`.
    pub validate: bool,

    #[serde(default = "default_true", rename = "notifications")]
    /// Advertise `:notification` + `:interleave`.
    pub notifications: bool,

    #[serde(default = "default_true", rename = "partial-lock")]
    /// Advertise `:partial-lock`.
    pub partial_lock: bool,
}

impl Config {
    /// Loads the profile from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.protocol.base_versions.is_empty(),
            "at least one base protocol version must be advertised"
        );

        ensure!(
            self.transport.hello_timeout >= Duration::from_secs(1),
            "hello-timeout must be >= 1s"
        );
        ensure!(self.transport.max_sessions >= 1, "max-sessions must be >= 1");

        // A distinct startup store needs somewhere to persist.
        if self.datastores.with_startup && self.datastores.startup_path.is_none() {
            self.datastores.startup_path =
                Some(self.datastores.data_dir.join("startup-cfg.xml"));
        }
        if let Some(p) = &self.datastores.startup_path {
            ensure!(
                p.starts_with(&self.datastores.data_dir),
                "startup-path must live inside data-dir"
            );
        }

        Ok(())
    }

    /// Highest base version this server will negotiate.
    pub fn best_base(&self) -> BaseVersion {
        if self.protocol.base_versions.contains(&BaseVersion::Base11) {
            BaseVersion::Base11
        } else {
            BaseVersion::Base10
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                socket_path: default_socket_path(),
                hello_timeout: default_hello_timeout(),
                idle_timeout: default_idle_timeout(),
                max_sessions: default_max_sessions(),
            },
            datastores: DatastoreConfig {
                family: default_family(),
                with_startup: false,
                startup_path: None,
                data_dir: default_data_dir(),
                with_defaults: default_with_defaults(),
            },
            notifications: NotificationConfig {
                eventlog_size: default_eventlog_size(),
                max_burst: default_max_burst(),
            },
            protocol: ProtocolConfig {
                base_versions: default_base_versions(),
                validate: true,
                notifications: true,
                partial_lock: true,
            },
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/ncxserver.sock")
}

fn default_hello_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_sessions() -> u32 {
    1024
}

fn default_family() -> DatastoreFamily {
    DatastoreFamily::Candidate
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/netconfd")
}

fn default_with_defaults() -> WithDefaultsMode {
    WithDefaultsMode::Explicit
}

fn default_eventlog_size() -> u32 {
    1000
}

fn default_max_burst() -> u32 {
    10
}

fn default_base_versions() -> Vec<BaseVersion> {
    vec![BaseVersion::Base10, BaseVersion::Base11]
}

fn default_true() -> bool {
    true
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
