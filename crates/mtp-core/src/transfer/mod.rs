//! Bulk transfer engine: chunked, journaled read/write with timeout-class
//! retries, stall recovery (via the actor), and write-target ladder walking
//! (spec §4.6).

mod read;
mod write;

pub use read::{read, ReadRequest};
pub use write::{write, WriteOutcome, WriteRequest, WriteTargetKind};

use crate::actor::DeviceActor;
use crate::error::MtpError;
use crate::journal::TransferJournal;
use crate::ptp::OperationCode;
use std::sync::Arc;

/// Object property code for `GetObjectPropValue(ObjectSize64)`, used when
/// `ObjectInfo.size` reports the `0xFFFFFFFF` unknown-size sentinel (spec
/// §4.6 step 2, §9 Open Question "GetObjectSize64 fallback").
const OBJECT_PROP_OBJECT_SIZE64: u32 = 0xDC04;

/// Reads the true object size via `GetObjectPropValue(ObjectSize64)` when
/// `ObjectInfo` reported the unknown-size sentinel.
async fn fetch_object_size64(actor: &DeviceActor, handle: u32) -> Result<Option<u64>, MtpError> {
    let outcome = actor
        .transact(OperationCode::GetObjectPropValue as u16, vec![handle, OBJECT_PROP_OBJECT_SIZE64], None, true)
        .await?;
    let Some(payload) = outcome.payload else { return Ok(None) };
    if payload.len() < 8 {
        return Ok(None);
    }
    Ok(Some(u64::from_le_bytes(payload[0..8].try_into().unwrap())))
}

/// Drives write-target ladder reconciliation and partial-object cleanup
/// (spec §4.6): owns nothing beyond a journal handle, and is reused by both
/// the write path and reopen-time reconciliation.
pub struct TransferEngine {
    journal: Arc<dyn TransferJournal>,
}

impl TransferEngine {
    pub fn new(journal: Arc<dyn TransferJournal>) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> &Arc<dyn TransferJournal> {
        &self.journal
    }

    /// Best-effort removal of a partially-written remote object (spec §4.6
    /// "reconcilePartials"): issues `DeleteObject(handle)` and swallows any
    /// error, since the object may already be gone.
    async fn reconcile_partial(actor: &DeviceActor, handle: u32) {
        let _ = actor.transact(OperationCode::DeleteObject as u16, vec![handle], None, false).await;
    }

    /// Reconciliation on reopen (spec §4.6): for every write with a
    /// recorded `remote_handle` in `{active, paused, failed}`, deletes the
    /// remote partial before any resume attempt is honored. Read records
    /// are left untouched — a partial read leaves no remote state to clean
    /// up.
    pub async fn reconcile_on_reopen(&self, actor: &DeviceActor, device_id: &str) -> Result<(), MtpError> {
        for record in self.journal.writes_pending_reconciliation(device_id)? {
            if let Some(handle) = record.remote_handle {
                Self::reconcile_partial(actor, handle).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryJournal;

    #[test]
    fn engine_exposes_its_journal() {
        let journal: Arc<dyn TransferJournal> = Arc::new(InMemoryJournal::new());
        let engine = TransferEngine::new(journal.clone());
        assert!(Arc::ptr_eq(engine.journal(), &journal));
    }
}
