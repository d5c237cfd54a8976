//! The transfer record model (spec §3 `TransferRecord`, §6 schema).

use serde::{Deserialize, Serialize};

/// Read or write direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Read,
    Write,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }
}

/// Lifecycle state of a transfer record. `Failed`/`Done` are terminal; a
/// record never transitions back out of a terminal state (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Active,
    Paused,
    Failed,
    Done,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Done)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "failed" => Some(Self::Failed),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

pub type TransferId = String;

/// A durable record of one in-flight or completed transfer (spec §3/§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub device_id: String,
    pub kind: TransferKind,
    pub handle: Option<u32>,
    pub parent_handle: Option<u32>,
    pub path_key: Option<String>,
    pub name: String,
    pub total_bytes: Option<u64>,
    pub committed_bytes: u64,
    pub supports_partial: bool,
    pub local_temp_url: String,
    pub final_url: Option<String>,
    pub state: TransferState,
    pub last_error: Option<String>,
    pub remote_handle: Option<u32>,
    pub content_hash: Option<String>,
    pub throughput_mbps: Option<f64>,
    pub updated_at: u64,
}

impl TransferRecord {
    /// `committedBytes <= totalBytes` whenever the total is known (spec §3).
    pub fn respects_size_invariant(&self) -> bool {
        match self.total_bytes {
            Some(total) => self.committed_bytes <= total,
            None => true,
        }
    }

    /// `state=done ⇒ committedBytes=totalBytes` whenever the size was known
    /// at begin (spec §8 Universal invariants).
    pub fn done_implies_fully_committed(&self) -> bool {
        if self.state != TransferState::Done {
            return true;
        }
        match self.total_bytes {
            Some(total) => self.committed_bytes == total,
            None => true,
        }
    }
}
