// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Desktop composition from window resources.

use std::collections::BTreeMap;

use crate::mcp::WindowEntry;

/// Choose and order the windows that make up a desktop.
///
/// Servers used most recently come first, then the rest by id. Within a server
/// windows keep their priority order, except that a server holding the
/// fullscreen window shows only that window. The result holds at most `size`
/// windows when a size is given.
pub fn organize(
    windows: Vec<WindowEntry>,
    recent_servers: &[String],
    size: Option<usize>,
) -> Vec<WindowEntry> {
    let mut by_server: BTreeMap<String, Vec<WindowEntry>> = BTreeMap::new();
    for window in windows {
        by_server
            .entry(window.server.clone())
            .or_default()
            .push(window);
    }

    let mut order: Vec<String> = recent_servers
        .iter()
        .filter(|s| by_server.contains_key(*s))
        .cloned()
        .collect();
    for server in by_server.keys() {
        if !order.contains(server) {
            order.push(server.clone());
        }
    }

    let limit = size.unwrap_or(usize::MAX);
    let mut desktop = Vec::new();
    for server in order {
        let Some(mut group) = by_server.remove(&server) else {
            continue;
        };
        if let Some(index) = group.iter().position(|w| w.fullscreen) {
            group = vec![group.swap_remove(index)];
        }
        for window in group {
            if desktop.len() >= limit {
                return desktop;
            }
            desktop.push(window);
        }
    }
    desktop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{ResourceEntry, WindowUri};

    fn window(server: &str, path: &str, priority: u8, fullscreen: bool) -> WindowEntry {
        let uri = WindowUri::build(server, vec![path.to_string()], Some(priority), Some(fullscreen));
        WindowEntry {
            server: server.to_string(),
            resource: ResourceEntry::new(uri.to_string(), path),
            uri,
            fullscreen,
        }
    }

    fn names(desktop: &[WindowEntry]) -> Vec<String> {
        desktop.iter().map(|w| w.resource.name.clone()).collect()
    }

    #[test]
    fn test_recent_servers_first() {
        let windows = vec![
            window("a", "a1", 90, false),
            window("a", "a2", 10, false),
            window("b", "b1", 50, false),
            window("c", "c1", 50, false),
        ];
        let desktop = organize(windows, &["c".to_string()], None);
        assert_eq!(names(&desktop), vec!["c1", "a1", "a2", "b1"]);
    }

    #[test]
    fn test_fullscreen_alone_for_its_server() {
        let windows = vec![
            window("a", "a1", 90, false),
            window("a", "full", 10, true),
            window("b", "b1", 50, false),
        ];
        let desktop = organize(windows, &[], None);
        assert_eq!(names(&desktop), vec!["full", "b1"]);
    }

    #[test]
    fn test_size_cap() {
        let windows = vec![
            window("a", "a1", 90, false),
            window("a", "a2", 80, false),
            window("b", "b1", 50, false),
        ];
        assert_eq!(names(&organize(windows.clone(), &[], Some(2))), vec!["a1", "a2"]);
        assert!(organize(windows, &[], Some(0)).is_empty());
    }
}
