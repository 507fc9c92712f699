// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `${input:<id>}` placeholder rendering over JSON trees.

use std::future::Future;
use std::pin::Pin;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::resolver::InputResolver;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{input:([^}]+)\}").unwrap());

/// Nesting depth beyond which values are left untouched.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Output of a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub value: Value,
    /// One message per placeholder that could not be resolved.
    pub warnings: Vec<String>,
}

/// Walks a JSON tree and substitutes placeholders.
///
/// A string that is exactly one placeholder becomes the resolved value as is;
/// otherwise resolved values are spliced in as text. Placeholders that fail to
/// resolve stay in place and produce a warning.
#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    max_depth: usize,
}

impl Default for ConfigRenderer {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ConfigRenderer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Whether a string contains any placeholder.
    pub fn has_placeholder(text: &str) -> bool {
        PLACEHOLDER.is_match(text)
    }

    /// Render a whole tree.
    pub async fn render(&self, value: &Value, resolver: &InputResolver) -> Rendered {
        let mut warnings = Vec::new();
        let value = self.render_at(value, 0, resolver, &mut warnings).await;
        Rendered { value, warnings }
    }

    fn render_at<'a>(
        &'a self,
        value: &'a Value,
        depth: usize,
        resolver: &'a InputResolver,
        warnings: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
        Box::pin(async move {
            if depth > self.max_depth {
                let message = format!("render depth exceeds {}; value left as is", self.max_depth);
                warn!(depth, "{}", message);
                warnings.push(message);
                return value.clone();
            }

            match value {
                Value::String(text) => render_str(text, resolver, warnings).await,
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.render_at(item, depth + 1, resolver, warnings).await);
                    }
                    Value::Array(out)
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(
                            key.clone(),
                            self.render_at(item, depth + 1, resolver, warnings).await,
                        );
                    }
                    Value::Object(out)
                }
                other => other.clone(),
            }
        })
    }
}

async fn render_str(text: &str, resolver: &InputResolver, warnings: &mut Vec<String>) -> Value {
    let matches: Vec<(std::ops::Range<usize>, String)> = PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(1)?;
            Some((whole.range(), id.as_str().trim().to_string()))
        })
        .collect();

    if matches.is_empty() {
        return Value::String(text.to_string());
    }

    if matches.len() == 1 && matches[0].0 == (0..text.len()) {
        let id = &matches[0].1;
        return match resolver.resolve(id).await {
            Ok(value) => value,
            Err(e) => {
                note_unresolved(id, &e.to_string(), warnings);
                Value::String(text.to_string())
            }
        };
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (range, id) in matches {
        out.push_str(&text[last..range.start]);
        match resolver.resolve(&id).await {
            Ok(Value::String(s)) => out.push_str(&s),
            Ok(other) => out.push_str(&other.to_string()),
            Err(e) => {
                note_unresolved(&id, &e.to_string(), warnings);
                out.push_str(&text[range.clone()]);
            }
        }
        last = range.end;
    }
    out.push_str(&text[last..]);
    Value::String(out)
}

fn note_unresolved(id: &str, reason: &str, warnings: &mut Vec<String>) {
    warn!(input = id, reason, "Input not resolved; placeholder left in place");
    warnings.push(format!("input '{}' not resolved: {}", id, reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::provider::StaticProvider;
    use crate::inputs::types::InputDefinition;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver(values: &[(&str, &str)]) -> InputResolver {
        let mut provider = StaticProvider::new();
        let mut definitions = Vec::new();
        for (id, value) in values {
            provider = provider.with_value(*id, *value);
            definitions.push(InputDefinition::prompt(*id, ""));
        }
        InputResolver::new(definitions, Arc::new(provider))
    }

    #[tokio::test]
    async fn test_no_placeholders() {
        let r = resolver(&[]);
        let out = ConfigRenderer::default()
            .render(&json!("no placeholders here"), &r)
            .await;
        assert_eq!(out.value, json!("no placeholders here"));
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_whole_string_keeps_value_type() {
        let r = resolver(&[("x", "")]);
        r.set_value("x", json!({"a": 1}));
        let out = ConfigRenderer::default().render(&json!("${input:x}"), &r).await;
        assert_eq!(out.value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_multiple_placeholders_coerced_to_text() {
        let r = resolver(&[("x", ""), ("y", "ok")]);
        r.set_value("x", json!(42));
        let out = ConfigRenderer::default()
            .render(&json!("A=${input:x},B=${input:y}"), &r)
            .await;
        assert_eq!(out.value, json!("A=42,B=ok"));
    }

    #[tokio::test]
    async fn test_undefined_input_left_in_place() {
        let r = resolver(&[("port", "8080")]);
        let config = json!({
            "command": "${input:missing}",
            "args": ["--port", "${input:port}", "Hello ${input:missing}"]
        });
        let out = ConfigRenderer::default().render(&config, &r).await;
        assert_eq!(
            out.value,
            json!({
                "command": "${input:missing}",
                "args": ["--port", "8080", "Hello ${input:missing}"]
            })
        );
        assert_eq!(out.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let r = resolver(&[("foo", "X")]);
        let renderer = ConfigRenderer::new(2);

        let out = renderer.render(&json!({"k": ["a", "${input:foo}"]}), &r).await;
        assert_eq!(out.value, json!({"k": ["a", "X"]}));

        let deep = json!({"a": {"b": {"c": "${input:foo}"}}});
        let out = renderer.render(&deep, &r).await;
        assert_eq!(out.value["a"]["b"]["c"], "${input:foo}");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_has_placeholder() {
        assert!(ConfigRenderer::has_placeholder("x ${input:a} y"));
        assert!(!ConfigRenderer::has_placeholder("${env:HOME}"));
    }
}
