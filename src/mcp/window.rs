// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `window://` resource URIs.
//!
//! A window is a resource a server exposes for composed presentation:
//!
//! ```text
//! window://<mcp_id>/<segment>/<segment>?priority=<0..100>&fullscreen=<bool>
//! ```
//!
//! Path segments are percent-encoded on build and decoded on parse.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// URI scheme that marks a resource as a window.
pub const WINDOW_SCHEME: &str = "window";

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Errors produced while parsing a window URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowUriError {
    #[error("not a window uri: {0}")]
    Scheme(String),

    #[error("window uri is missing its host: {0}")]
    MissingHost(String),

    #[error("invalid priority '{0}': expected an integer between 0 and 100")]
    Priority(String),

    #[error("invalid fullscreen value '{0}'")]
    Fullscreen(String),
}

/// A parsed `window://` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowUri {
    /// Host part; identifies the MCP server that owns the window.
    pub mcp_id: String,

    /// Decoded path segments.
    pub windows: Vec<String>,

    /// Ordering weight within the owning server, higher first.
    pub priority: Option<u8>,

    /// Whether the window asks to occupy the whole desktop.
    pub fullscreen: Option<bool>,
}

impl WindowUri {
    /// Parse a window URI.
    pub fn parse(uri: &str) -> Result<Self, WindowUriError> {
        let rest = uri
            .strip_prefix("window://")
            .ok_or_else(|| WindowUriError::Scheme(uri.to_string()))?;

        let (path, query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };
        let path = path.split('#').next().unwrap_or_default();

        let mut parts = path.split('/');
        let host = parts.next().unwrap_or_default();
        if host.is_empty() {
            return Err(WindowUriError::MissingHost(uri.to_string()));
        }

        let windows = parts
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();

        let mut priority = None;
        let mut fullscreen = None;
        if let Some(query) = query {
            let query = query.split('#').next().unwrap_or_default();
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "priority" => priority = Some(parse_priority(&value)?),
                    "fullscreen" => fullscreen = Some(parse_bool(&value)?),
                    _ => {}
                }
            }
        }

        Ok(Self {
            mcp_id: host.to_string(),
            windows,
            priority,
            fullscreen,
        })
    }

    /// Build a window URI, percent-encoding the path segments.
    pub fn build(
        host: impl Into<String>,
        windows: Vec<String>,
        priority: Option<u8>,
        fullscreen: Option<bool>,
    ) -> Self {
        Self {
            mcp_id: host.into(),
            windows,
            priority: priority.map(|p| p.min(100)),
            fullscreen,
        }
    }

    /// Whether a URI string uses the window scheme.
    pub fn is_window_uri(uri: &str) -> bool {
        uri.starts_with("window://")
    }

    /// Priority with the default of 0 applied.
    pub fn effective_priority(&self) -> u8 {
        self.priority.unwrap_or(0)
    }

    /// Whether the window requests fullscreen.
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.unwrap_or(false)
    }
}

fn parse_priority(value: &str) -> Result<u8, WindowUriError> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| WindowUriError::Priority(value.to_string()))
}

fn parse_bool(value: &str) -> Result<bool, WindowUriError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(WindowUriError::Fullscreen(value.to_string())),
    }
}

impl fmt::Display for WindowUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window://{}", self.mcp_id)?;
        for segment in &self.windows {
            write!(f, "/{}", utf8_percent_encode(segment, SEGMENT))?;
        }

        let mut sep = '?';
        if let Some(priority) = self.priority {
            write!(f, "{}priority={}", sep, priority)?;
            sep = '&';
        }
        if let Some(fullscreen) = self.fullscreen {
            write!(f, "{}fullscreen={}", sep, fullscreen)?;
        }
        Ok(())
    }
}

impl FromStr for WindowUri {
    type Err = WindowUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
