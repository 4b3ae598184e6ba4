// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concrete implementations of the remote collaborator traits.
//!
//! - `http`: reqwest client for the platform's internal API (default)
//! - `sqlite`: local SQLite storage for embedded deployments

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "sqlite")]
pub mod sqlite;
