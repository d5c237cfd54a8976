//! Transfer journal: an at-least-once durable log of transfer lifecycle
//! (spec §4.7). Operations are synchronous w.r.t. the caller; the journal
//! serializes writes (its own mutex / dedicated writer thread, spec §5).

mod record;
pub mod memory;
pub mod sqlite;

pub use memory::InMemoryJournal;
pub use record::{TransferId, TransferKind, TransferRecord, TransferState};
pub use sqlite::SqliteJournal;

use crate::error::MtpError;

/// Parameters for beginning a new transfer (kept as one struct, rather than
/// a long positional parameter list, per spec §4.7's `beginRead`/`beginWrite`).
#[derive(Debug, Clone)]
pub struct BeginTransfer {
    pub device_id: String,
    pub kind: TransferKind,
    pub handle: Option<u32>,
    pub parent_handle: Option<u32>,
    pub path_key: Option<String>,
    pub name: String,
    pub total_bytes: Option<u64>,
    pub supports_partial: bool,
    pub local_temp_url: String,
    pub final_url: Option<String>,
}

/// Durable transfer lifecycle log (spec §4.7). Implementations: an
/// in-memory map for tests ([`InMemoryJournal`]) and a WAL-mode SQLite store
/// ([`SqliteJournal`]) grounded on the teacher's indexing store/writer.
pub trait TransferJournal: Send + Sync {
    fn begin(&self, params: BeginTransfer) -> Result<TransferId, MtpError>;
    fn update_progress(&self, id: &TransferId, committed_bytes: u64) -> Result<(), MtpError>;
    fn record_remote_handle(&self, id: &TransferId, handle: u32) -> Result<(), MtpError>;
    fn add_content_hash(&self, id: &TransferId, hash: &str) -> Result<(), MtpError>;
    fn record_throughput(&self, id: &TransferId, mbps: f64) -> Result<(), MtpError>;
    fn fail(&self, id: &TransferId, error: &str) -> Result<(), MtpError>;
    fn complete(&self, id: &TransferId) -> Result<(), MtpError>;
    fn get(&self, id: &TransferId) -> Result<TransferRecord, MtpError>;
    /// Records in `{active, paused}` for the given device (spec §4.7 `loadResumables`).
    fn load_resumables(&self, device_id: &str) -> Result<Vec<TransferRecord>, MtpError>;
    /// Write records in `{active, paused, failed}` with a `remote_handle`
    /// set, for the given device — the broader state set reopen-time
    /// reconciliation walks (spec §4.6), a superset of `load_resumables`.
    fn writes_pending_reconciliation(&self, device_id: &str) -> Result<Vec<TransferRecord>, MtpError>;
    /// Deletes records in `{failed, paused}` with `updated_at` older than the
    /// given epoch-seconds cutoff; returns the removed records so the caller
    /// can clean up their temp files (spec §4.7 `clearStaleTemps`).
    fn clear_stale_temps(&self, older_than_epoch_secs: u64) -> Result<Vec<TransferRecord>, MtpError>;
}
