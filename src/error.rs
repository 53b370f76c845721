// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NETCONF error taxonomy (RFC 6241 appendix A).
//!
//! Every protocol-visible failure in the server is expressed as an
//! [`RpcError`]: an error-tag kind plus layer, severity and the optional
//! app-tag / path / message / info fields that end up inside `<rpc-error>`.
//! Engine-internal fatal errors use `anyhow` and never reach the wire.

use core::fmt;

use thiserror::Error;

/// RFC 6241 `error-tag` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("in-use")]
    InUse,
    #[error("invalid-value")]
    InvalidValue,
    #[error("too-big")]
    TooBig,
    #[error("missing-attribute")]
    MissingAttribute,
    #[error("bad-attribute")]
    BadAttribute,
    #[error("unknown-attribute")]
    UnknownAttribute,
    #[error("missing-element")]
    MissingElement,
    #[error("bad-element")]
    BadElement,
    #[error("unknown-element")]
    UnknownElement,
    #[error("unknown-namespace")]
    UnknownNamespace,
    #[error("access-denied")]
    AccessDenied,
    #[error("lock-denied")]
    LockDenied,
    #[error("resource-denied")]
    ResourceDenied,
    #[error("rollback-failed")]
    RollbackFailed,
    #[error("data-exists")]
    DataExists,
    #[error("data-missing")]
    DataMissing,
    #[error("operation-not-supported")]
    OperationNotSupported,
    #[error("operation-failed")]
    OperationFailed,
    #[error("partial-operation")]
    PartialOperation,
    #[error("malformed-message")]
    MalformedMessage,
}

impl ErrorKind {
    /// The `error-tag` string emitted on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InUse => "in-use",
            Self::InvalidValue => "invalid-value",
            Self::TooBig => "too-big",
            Self::MissingAttribute => "missing-attribute",
            Self::BadAttribute => "bad-attribute",
            Self::UnknownAttribute => "unknown-attribute",
            Self::MissingElement => "missing-element",
            Self::BadElement => "bad-element",
            Self::UnknownElement => "unknown-element",
            Self::UnknownNamespace => "unknown-namespace",
            Self::AccessDenied => "access-denied",
            Self::LockDenied => "lock-denied",
            Self::ResourceDenied => "resource-denied",
            Self::RollbackFailed => "rollback-failed",
            Self::DataExists => "data-exists",
            Self::DataMissing => "data-missing",
            Self::OperationNotSupported => "operation-not-supported",
            Self::OperationFailed => "operation-failed",
            Self::PartialOperation => "partial-operation",
            Self::MalformedMessage => "malformed-message",
        }
    }
}

/// RFC 6241 `error-type`: which layer detected the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorLayer {
    Transport,
    Rpc,
    Protocol,
    #[default]
    Application,
}

impl fmt::Display for ErrorLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Rpc => "rpc",
            Self::Protocol => "protocol",
            Self::Application => "application",
        })
    }
}

/// RFC 6241 `error-severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorSeverity {
    #[default]
    Error,
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// One `error-info` child element: name plus text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub name: String,
    pub value: String,
}

/// A fully described `<rpc-error>`.
#[derive(Debug, Clone, Error)]
#[error("{layer} {severity} {kind}{}", .path.as_deref().map(|p| format!(" at {p}")).unwrap_or_default())]
pub struct RpcError {
    pub kind: ErrorKind,
    pub layer: ErrorLayer,
    pub severity: ErrorSeverity,
    /// Data-model specific tag (`error-app-tag`).
    pub app_tag: Option<String>,
    /// Canonical instance-identifier of the offending node (`error-path`).
    pub path: Option<String>,
    /// Human readable description (`error-message`).
    pub message: Option<String>,
    /// Structured `error-info` children.
    pub info: Vec<ErrorInfo>,
}

impl RpcError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            layer: ErrorLayer::default(),
            severity: ErrorSeverity::default(),
            app_tag: None,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    pub fn protocol(kind: ErrorKind) -> Self {
        Self::new(kind).with_layer(ErrorLayer::Protocol)
    }

    pub fn rpc(kind: ErrorKind) -> Self {
        Self::new(kind).with_layer(ErrorLayer::Rpc)
    }

    pub fn with_layer(mut self, layer: ErrorLayer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_app_tag(mut self, tag: impl Into<String>) -> Self {
        self.app_tag = Some(tag.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn with_info(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.push(ErrorInfo {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Shorthand used by handlers and the transaction engine.
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_rfc_spelling() {
        assert_eq!(ErrorKind::DataExists.tag(), "data-exists");
        assert_eq!(ErrorKind::MalformedMessage.tag(), "malformed-message");
        assert_eq!(ErrorKind::OperationNotSupported.tag(), "operation-not-supported");
    }

    #[test]
    fn display_carries_path() {
        let e = RpcError::new(ErrorKind::DataMissing).with_path("/foo/bar");
        assert_eq!(e.to_string(), "application error data-missing at /foo/bar");
    }
}
