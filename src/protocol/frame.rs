// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session frames.
//!
//! Uses newline-delimited JSON. Every frame is tagged with `kind`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;
use crate::mcp::{ErrorKind, McpError};

/// One message on a session channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub kind: String,
    pub message: String,
}

pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INTERNAL: i64 = -32603;
pub const CODE_SESSION: i64 = -32000;

impl ErrorBody {
    pub fn new(code: i64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, "invalid_params", message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            CODE_METHOD_NOT_FOUND,
            "method_not_found",
            format!("Method not found: {}", method),
        )
    }
}

impl From<&McpError> for ErrorBody {
    fn from(err: &McpError) -> Self {
        let code = match err {
            McpError::Protocol { code, .. } => *code,
            _ => CODE_INTERNAL,
        };
        Self::new(code, error_kind_name(err.kind()), err.to_string())
    }
}

impl From<McpError> for ErrorBody {
    fn from(err: McpError) -> Self {
        Self::from(&err)
    }
}

impl From<&SessionError> for ErrorBody {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Remote {
                code,
                kind,
                message,
            } => Self::new(*code, kind.clone(), message.clone()),
            SessionError::Timeout { .. } => Self::new(CODE_SESSION, "timeout", err.to_string()),
            SessionError::PeerNotFound(_) => Self::new(CODE_SESSION, "not_found", err.to_string()),
            SessionError::InvalidFrame(_) => Self::invalid_params(err.to_string()),
            _ => Self::new(CODE_SESSION, "session", err.to_string()),
        }
    }
}

impl From<SessionError> for ErrorBody {
    fn from(err: SessionError) -> Self {
        Self::from(&err)
    }
}

impl From<ErrorBody> for SessionError {
    fn from(body: ErrorBody) -> Self {
        SessionError::Remote {
            code: body.code,
            kind: body.kind,
            message: body.message,
        }
    }
}

/// Wire name of an error kind.
pub fn error_kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Transport => "transport",
        ErrorKind::Configuration => "configuration",
        ErrorKind::Policy => "policy",
        ErrorKind::Timeout => "timeout",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::Capability => "capability",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Protocol => "protocol",
    }
}

impl Frame {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self::Response {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: ErrorBody) -> Self {
        Self::Response {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }
}

/// Encode a frame as one JSON line.
pub fn encode(frame: &Frame) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string(frame)?;
    json.push('\n');
    Ok(json)
}

/// Decode one frame.
pub fn decode(line: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Parse every non-empty line of a buffer.
pub fn decode_frames(buffer: &str) -> Vec<Result<Frame, serde_json::Error>> {
    buffer
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(decode)
        .collect()
}
