// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Merge semantics for buffered state.

use std::collections::BTreeMap;
use std::mem;

use serde_json::Value;
use uuid::Uuid;

use super::types::{
    ConnectionState, ConnectionStateType, StateMessage, StateType, StreamDescriptor, StreamState,
};
use crate::error::{Result, StateError};

/// Aggregated state of one connection.
///
/// Stream states are merged last-write-wins per stream; legacy and global
/// payloads keep only the newest message.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StateAggregator {
    /// Nothing buffered.
    #[default]
    Empty,
    /// Newest legacy payload.
    Legacy(Value),
    /// Newest global payload.
    Global(Value),
    /// Newest payload per stream.
    Streams(BTreeMap<StreamDescriptor, Value>),
}

impl StateAggregator {
    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        matches!(self, StateAggregator::Empty)
    }

    /// Tag of the buffered state.
    pub fn state_type(&self) -> Option<StateType> {
        match self {
            StateAggregator::Empty => None,
            StateAggregator::Legacy(_) => Some(StateType::Legacy),
            StateAggregator::Global(_) => Some(StateType::Global),
            StateAggregator::Streams(_) => Some(StateType::Stream),
        }
    }

    /// Buffer a newer message.
    pub fn ingest(&mut self, message: StateMessage) -> Result<()> {
        let incoming = match message {
            StateMessage::Legacy { data } => StateAggregator::Legacy(data),
            StateMessage::Global { data } => StateAggregator::Global(data),
            StateMessage::Stream {
                stream_descriptor,
                stream_state,
            } => StateAggregator::Streams(BTreeMap::from([(stream_descriptor, stream_state)])),
        };
        self.merge_newer(incoming)
    }

    /// Merge `newer` on top of this aggregate; newer values win.
    pub fn merge_newer(&mut self, newer: StateAggregator) -> Result<()> {
        if let (Some(expected), Some(actual)) = (self.state_type(), newer.state_type())
            && expected != actual
        {
            return Err(StateError::StateTypeMismatch { expected, actual });
        }

        match (self, newer) {
            (_, StateAggregator::Empty) => {}
            (StateAggregator::Streams(current), StateAggregator::Streams(newer)) => {
                current.extend(newer);
            }
            (current, newer) => *current = newer,
        }
        Ok(())
    }

    /// Move the aggregate out, leaving it empty.
    pub fn take(&mut self) -> StateAggregator {
        mem::take(self)
    }

    /// Wire representation for `connection_id`, `None` when empty.
    pub fn to_connection_state(&self, connection_id: Uuid) -> Option<ConnectionState> {
        let mut state = ConnectionState::not_set(connection_id);
        match self {
            StateAggregator::Empty => return None,
            StateAggregator::Legacy(data) => {
                state.state_type = ConnectionStateType::Legacy;
                state.state = Some(data.clone());
            }
            StateAggregator::Global(data) => {
                state.state_type = ConnectionStateType::Global;
                state.global_state = Some(data.clone());
            }
            StateAggregator::Streams(streams) => {
                state.state_type = ConnectionStateType::Stream;
                state.stream_state = Some(
                    streams
                        .iter()
                        .map(|(descriptor, value)| StreamState {
                            stream_descriptor: descriptor.clone(),
                            stream_state: Some(value.clone()),
                        })
                        .collect(),
                );
            }
        }
        Some(state)
    }
}
