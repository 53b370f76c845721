// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Which writable datastore family the server advertises.
///
/// `WritableRunning` exposes `:writable-running`; `Candidate` exposes
/// `:candidate` plus `:confirmed-commit` and routes edits through the
/// candidate store.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreFamily {
    #[serde(
        rename = "writable-running",
        alias = "running",
        alias = "WritableRunning"
    )]
    WritableRunning,
    #[serde(rename = "candidate", alias = "Candidate")]
    Candidate,
}

impl fmt::Display for DatastoreFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatastoreFamily::WritableRunning => "writable-running",
            DatastoreFamily::Candidate => "candidate",
        })
    }
}

impl DatastoreFamily {
    pub fn is_candidate(&self) -> bool {
        matches!(self, DatastoreFamily::Candidate)
    }
}

/// RFC 6243 `with-defaults` basic modes.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithDefaultsMode {
    #[serde(rename = "report-all", alias = "ReportAll")]
    ReportAll,
    #[serde(rename = "trim", alias = "Trim")]
    Trim,
    #[serde(rename = "explicit", alias = "Explicit")]
    Explicit,
}

impl fmt::Display for WithDefaultsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WithDefaultsMode::ReportAll => "report-all",
            WithDefaultsMode::Trim => "trim",
            WithDefaultsMode::Explicit => "explicit",
        })
    }
}

/// NETCONF protocol base versions the server may advertise.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseVersion {
    #[serde(rename = "1.0", alias = "base:1.0")]
    Base10,
    #[serde(rename = "1.1", alias = "base:1.1")]
    Base11,
}

impl fmt::Display for BaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BaseVersion::Base10 => "1.0",
            BaseVersion::Base11 => "1.1",
        })
    }
}
