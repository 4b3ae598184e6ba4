// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote execution of sync work.
//!
//! Instead of running the replication loop in-process, an attempt can submit a
//! workload to a remote execution surface and poll it to completion with a
//! [`WorkloadPoller`]. Workload ids are derived from the connection, job and
//! attempt, so a resubmission after a crash finds the existing workload.

mod api;
mod doc_store;
mod poller;
mod types;

pub use api::{DocumentStore, WorkloadApi};
pub use doc_store::LocalDocumentStore;
pub use poller::{WorkloadPoller, WorkloadPollerConfig, output_document_key};
pub use types::{
    CreateOutcome, SyncWorkloadInput, Workload, WorkloadCreateRequest, WorkloadIdGenerator,
    WorkloadLabel, WorkloadResult, WorkloadStatus, WorkloadType,
};
