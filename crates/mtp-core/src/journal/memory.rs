//! In-memory `TransferJournal`, used by this crate's own tests and by
//! callers that don't need cross-process durability.

use super::{BeginTransfer, TransferId, TransferJournal, TransferKind, TransferRecord, TransferState};
use crate::error::MtpError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn not_found(id: &TransferId) -> MtpError {
    MtpError::Internal { reason: format!("no transfer record with id {id}") }
}

#[derive(Default)]
pub struct InMemoryJournal {
    records: Mutex<HashMap<TransferId, TransferRecord>>,
    next_id: AtomicU64,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate(&self, id: &TransferId, f: impl FnOnce(&mut TransferRecord)) -> Result<(), MtpError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(id).ok_or_else(|| not_found(id))?;
        f(record);
        record.updated_at = now_epoch_secs();
        Ok(())
    }
}

impl TransferJournal for InMemoryJournal {
    fn begin(&self, params: BeginTransfer) -> Result<TransferId, MtpError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}-{n}", params.device_id, params.kind.as_str());
        let record = TransferRecord {
            id: id.clone(),
            device_id: params.device_id,
            kind: params.kind,
            handle: params.handle,
            parent_handle: params.parent_handle,
            path_key: params.path_key,
            name: params.name,
            total_bytes: params.total_bytes,
            committed_bytes: 0,
            supports_partial: params.supports_partial,
            local_temp_url: params.local_temp_url,
            final_url: params.final_url,
            state: TransferState::Active,
            last_error: None,
            remote_handle: None,
            content_hash: None,
            throughput_mbps: None,
            updated_at: now_epoch_secs(),
        };
        self.records.lock().unwrap().insert(id.clone(), record);
        Ok(id)
    }

    fn update_progress(&self, id: &TransferId, committed_bytes: u64) -> Result<(), MtpError> {
        self.mutate(id, |r| {
            if !r.state.is_terminal() {
                r.committed_bytes = committed_bytes;
            }
        })
    }

    fn record_remote_handle(&self, id: &TransferId, handle: u32) -> Result<(), MtpError> {
        self.mutate(id, |r| r.remote_handle = Some(handle))
    }

    fn add_content_hash(&self, id: &TransferId, hash: &str) -> Result<(), MtpError> {
        self.mutate(id, |r| r.content_hash = Some(hash.to_string()))
    }

    fn record_throughput(&self, id: &TransferId, mbps: f64) -> Result<(), MtpError> {
        self.mutate(id, |r| r.throughput_mbps = Some(mbps))
    }

    fn fail(&self, id: &TransferId, error: &str) -> Result<(), MtpError> {
        self.mutate(id, |r| {
            if !r.state.is_terminal() {
                r.state = TransferState::Failed;
                r.last_error = Some(error.to_string());
            }
        })
    }

    fn complete(&self, id: &TransferId) -> Result<(), MtpError> {
        self.mutate(id, |r| {
            if !r.state.is_terminal() {
                if let Some(total) = r.total_bytes {
                    r.committed_bytes = total;
                }
                r.state = TransferState::Done;
            }
        })
    }

    fn get(&self, id: &TransferId) -> Result<TransferRecord, MtpError> {
        self.records.lock().unwrap().get(id).cloned().ok_or_else(|| not_found(id))
    }

    fn load_resumables(&self, device_id: &str) -> Result<Vec<TransferRecord>, MtpError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.device_id == device_id && matches!(r.state, TransferState::Active | TransferState::Paused))
            .cloned()
            .collect())
    }

    fn writes_pending_reconciliation(&self, device_id: &str) -> Result<Vec<TransferRecord>, MtpError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.device_id == device_id
                    && r.kind == TransferKind::Write
                    && r.remote_handle.is_some()
                    && matches!(r.state, TransferState::Active | TransferState::Paused | TransferState::Failed)
            })
            .cloned()
            .collect())
    }

    fn clear_stale_temps(&self, older_than_epoch_secs: u64) -> Result<Vec<TransferRecord>, MtpError> {
        let mut records = self.records.lock().unwrap();
        let stale_ids: Vec<TransferId> = records
            .values()
            .filter(|r| matches!(r.state, TransferState::Failed | TransferState::Paused) && r.updated_at < older_than_epoch_secs)
            .map(|r| r.id.clone())
            .collect();
        let mut removed = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(r) = records.remove(&id) {
                removed.push(r);
            }
        }
        Ok(removed)
    }
}
