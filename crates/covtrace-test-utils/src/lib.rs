// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Covtrace integration tests.
//!
//! Provides a mock push gateway and a throwaway environment (temp SQLite
//! database plus in-memory ephemeral store) so service tests run without
//! external processes.
//!
//! # Components
//!
//! - [`MockGateway`] - Records push calls and replays scripted failures
//! - [`TestEnv`] - Temp durable store, ephemeral store, gateway and user seeding
//! - [`FaultyDurable`] - Durable store wrapper that fails message writes on demand

pub mod env;
pub mod faulty_durable;
pub mod mock_gateway;

pub use env::TestEnv;
pub use faulty_durable::FaultyDurable;
pub use mock_gateway::MockGateway;
