// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for config rendering and window URI parsing.
//!
//! Run with: `cargo bench --bench render`

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

use smcp::inputs::{ConfigRenderer, InputDefinition, InputResolver, StaticProvider};
use smcp::mcp::WindowUri;

fn prompt(id: &str) -> InputDefinition {
    InputDefinition::PromptString {
        id: id.to_string(),
        description: String::new(),
        default: Some(format!("{}-default", id)),
        password: false,
    }
}

fn server_config(i: usize) -> Value {
    json!({
        "name": format!("server-{}", i),
        "transport": {
            "type": "stdio",
            "command": "${input:command}",
            "args": ["--port", "${input:port}", "--token=${input:token}"],
            "env": {"HOME": "/home/${input:user}", "LOG": "debug"}
        },
        "tool_meta": {"search": {"auto_apply": true, "tags": ["read", "${input:user}"]}}
    })
}

async fn render_all(
    renderer: &ConfigRenderer,
    resolver: &InputResolver,
    configs: &[Value],
    fresh: bool,
) {
    if fresh {
        resolver.begin_session();
    }
    for config in configs {
        black_box(renderer.render(black_box(config), resolver).await);
    }
}

fn bench_render(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let provider = StaticProvider::new()
        .with_value("command", "mcp-server")
        .with_value("port", "8080")
        .with_value("user", "ops");
    let definitions = ["command", "port", "token", "user"].map(prompt).to_vec();
    let resolver = InputResolver::new(definitions, Arc::new(provider));
    let renderer = ConfigRenderer::default();

    let mut group = c.benchmark_group("render");
    for count in [1usize, 10, 50] {
        let configs: Vec<Value> = (0..count).map(server_config).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("cached", count), &configs, |b, configs| {
            b.to_async(&rt)
                .iter(|| render_all(&renderer, &resolver, configs, false));
        });
        group.bench_with_input(BenchmarkId::new("fresh_session", count), &configs, |b, configs| {
            b.to_async(&rt)
                .iter(|| render_all(&renderer, &resolver, configs, true));
        });
    }
    group.finish();

    c.bench_function("has_placeholder", |b| {
        b.iter(|| ConfigRenderer::has_placeholder(black_box("--token=${input:token}")))
    });
}

fn bench_window_uri(c: &mut Criterion) {
    let uris = [
        "window://files",
        "window://files/main?priority=80",
        "window://browser/tabs/active%20tab?priority=10&fullscreen=true",
    ];

    let mut group = c.benchmark_group("window_uri");
    for uri in uris {
        group.bench_with_input(BenchmarkId::new("parse", uri), uri, |b, uri| {
            b.iter(|| WindowUri::parse(black_box(uri)))
        });
    }

    let built = WindowUri::build(
        "browser",
        vec!["tabs".to_string(), "active tab".to_string()],
        Some(10),
        Some(true),
    );
    group.bench_function("display", |b| b.iter(|| black_box(&built).to_string()));
    group.finish();
}

criterion_group!(benches, bench_render, bench_window_uri);
criterion_main!(benches);
