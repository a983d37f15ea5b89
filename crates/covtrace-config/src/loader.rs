// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./covtrace.toml` > `~/.config/covtrace/covtrace.toml`
//! > `/etc/covtrace/covtrace.toml` with environment variable overrides via the
//! `COVTRACE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CovtraceConfig;

/// Sections that environment variables may target.
const SECTIONS: &[&str] = &[
    "service",
    "storage",
    "ephemeral",
    "presence",
    "trace",
    "notify",
    "push",
    "fanout",
    "prometheus",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/covtrace/covtrace.toml`
/// 3. `~/.config/covtrace/covtrace.toml`
/// 4. `./covtrace.toml`
/// 5. `COVTRACE_*` environment variables
pub fn load_config() -> Result<CovtraceConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<CovtraceConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CovtraceConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CovtraceConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CovtraceConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The full layered Figment, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(CovtraceConfig::default()))
        .merge(Toml::file("/etc/covtrace/covtrace.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("covtrace/covtrace.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("covtrace.toml"))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// Only the first `_` after a known section name becomes a dot, so
/// `COVTRACE_TRACE_PAGE_SIZE` maps to `trace.page_size`, not `trace.page.size`.
pub fn env_provider() -> Env {
    Env::prefixed("COVTRACE_").map(|key| {
        let key_str = key.as_str();
        for section in SECTIONS {
            if let Some(rest) = key_str
                .strip_prefix(section)
                .and_then(|r| r.strip_prefix('_'))
            {
                return format!("{section}.{rest}").into();
            }
        }
        key_str.to_string().into()
    })
}
