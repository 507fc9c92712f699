// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Result reshaping with `ret_object_mapper`.
//!
//! A mapper is a JSON object. String leaves are dotted paths (`a.b.0.c`)
//! looked up in the raw result; other leaves are copied as they are and
//! nested objects recurse.

use serde_json::{Map, Value};

use crate::mcp::{McpContent, ToolResult};

/// Apply `mapper` to `source`. Paths that do not resolve map to `null`.
pub fn apply_mapper(mapper: &Value, source: &Value) -> Value {
    match mapper {
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, rule) in fields {
                out.insert(key.clone(), apply_mapper(rule, source));
            }
            Value::Object(out)
        }
        Value::String(path) => lookup(source, path).cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Follow a dotted path through objects and arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// The object a mapper reads from: structured content if present, otherwise
/// the first text content parsed as JSON.
pub fn raw_object(result: &ToolResult) -> Option<Value> {
    if let Some(structured) = &result.structured_content {
        return Some(structured.clone());
    }
    result.content.iter().find_map(|content| match content {
        McpContent::Text { text } => serde_json::from_str(text).ok(),
        _ => None,
    })
}

/// Reshape a successful result in place. The raw content is kept.
pub fn map_result(result: &mut ToolResult, mapper: &Value) -> bool {
    if result.is_error {
        return false;
    }
    let Some(source) = raw_object(result) else {
        return false;
    };
    result.structured_content = Some(apply_mapper(mapper, &source));
    true
}
