//! Bounded ledger of executed transfers.

use crate::fixed::{Fixed64, Millis};
use crate::id::{NodeId, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One transfer along a connection during an optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub timestamp: Millis,
    pub source: NodeId,
    pub target: NodeId,
    pub resource_type: ResourceType,
    pub amount: Fixed64,
}

/// Criteria for [`HistoryLedger::query`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub resource_type: Option<ResourceType>,
    /// Matches records where the node is either source or target.
    pub node: Option<NodeId>,
    /// Matches records with `timestamp >= since`.
    pub since: Option<Millis>,
}

impl HistoryFilter {
    pub fn resource(mut self, resource: ResourceType) -> Self {
        self.resource_type = Some(resource);
        self
    }

    pub fn node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn since(mut self, since: Millis) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, record: &TransferRecord) -> bool {
        self.resource_type.is_none_or(|r| r == record.resource_type)
            && self
                .node
                .is_none_or(|n| n == record.source || n == record.target)
            && self.since.is_none_or(|t| record.timestamp >= t)
    }
}

/// Keeps the most recent `max_size` transfers, evicting oldest first.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    records: VecDeque<TransferRecord>,
    max_size: usize,
    total_recorded: u64,
}

impl HistoryLedger {
    /// A `max_size` of 0 is clamped to 1.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            records: VecDeque::with_capacity(max_size.min(4096)),
            max_size,
            total_recorded: 0,
        }
    }

    pub fn record_transfer(&mut self, record: TransferRecord) {
        if self.records.len() == self.max_size {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total_recorded += 1;
    }

    /// Matching records, oldest first.
    pub fn query(&self, filter: &HistoryFilter) -> Vec<TransferRecord> {
        self.records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Records ever appended, evicted ones included.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
