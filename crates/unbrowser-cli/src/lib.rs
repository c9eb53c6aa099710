// Copyright 2026 Unbrowser Contributors
// SPDX-License-Identifier: MIT

//! Composition root for the `unbrowser` command: store resolution, HTTP-backed
//! tier executors, the proxy pool and terminal output.

pub mod config;
pub mod executors;
pub mod output;
pub mod proxy;

pub use config::{build_orchestrator, load_engine_config, open_knowledge, resolve_store_path};
pub use proxy::StaticProxyPool;
