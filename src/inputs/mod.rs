// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Templated inputs for server configurations.
//!
//! Configurations may reference `${input:<id>}`. Before a configuration is
//! applied, [`ConfigRenderer`] walks it and asks the [`InputResolver`] for
//! each id; the resolver acquires a value through its [`InputProvider`] once
//! per resolution session and caches it.

mod provider;
mod render;
mod resolver;
mod types;

#[cfg(test)]
pub use provider::MockInputProvider;
pub use provider::{
    run_shell_command, CommandRequest, InputProvider, PickRequest, PromptRequest, StaticProvider,
    TerminalProvider, COMMAND_TIMEOUT,
};
pub use render::{ConfigRenderer, Rendered, DEFAULT_MAX_DEPTH};
pub use resolver::InputResolver;
pub use types::InputDefinition;
