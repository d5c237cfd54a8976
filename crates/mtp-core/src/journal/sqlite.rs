//! SQLite-backed `TransferJournal`.
//!
//! Grounded on the teacher's `indexing/store.rs` (WAL pragmas, schema-version
//! guard with delete-and-recreate) and `indexing/writer.rs` (a single
//! dedicated thread owns the write connection; callers talk to it over a
//! message channel rather than sharing the connection directly).

use super::{BeginTransfer, TransferId, TransferJournal, TransferRecord, TransferState};
use crate::error::MtpError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

const SCHEMA_VERSION: i64 = 1;

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn sql_err(e: rusqlite::Error) -> MtpError {
    MtpError::Internal { reason: format!("sqlite error: {e}") }
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS transfers (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            handle INTEGER,
            parent_handle INTEGER,
            path_key TEXT,
            name TEXT NOT NULL,
            total_bytes INTEGER,
            committed_bytes INTEGER NOT NULL,
            supports_partial INTEGER NOT NULL,
            local_temp_url TEXT NOT NULL,
            final_url TEXT,
            state TEXT NOT NULL,
            last_error TEXT,
            remote_handle INTEGER,
            content_hash TEXT,
            throughput_mbps REAL,
            updated_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS transfers_state_idx ON transfers(state);
         CREATE INDEX IF NOT EXISTS transfers_device_idx ON transfers(device_id);",
    )
}

/// Opens (or creates) the journal database, guarding against a schema
/// version mismatch by dropping and recreating the tables — the same
/// delete-and-recreate fallback the teacher's index store uses rather than
/// attempting an in-place migration.
fn open_with_schema_guard(conn: &Connection) -> rusqlite::Result<()> {
    apply_pragmas(conn)?;
    create_schema(conn)?;
    let stored: Option<i64> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get::<_, String>(0))
        .ok()
        .and_then(|v| v.parse().ok());
    if stored != Some(SCHEMA_VERSION) {
        conn.execute_batch("DROP TABLE IF EXISTS transfers;")?;
        create_schema(conn)?;
        conn.execute(
            "INSERT INTO meta(key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransferRecord> {
    let kind: String = row.get("kind")?;
    let state: String = row.get("state")?;
    Ok(TransferRecord {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        kind: super::TransferKind::parse(&kind).unwrap_or(super::TransferKind::Read),
        handle: row.get::<_, Option<i64>>("handle")?.map(|v| v as u32),
        parent_handle: row.get::<_, Option<i64>>("parent_handle")?.map(|v| v as u32),
        path_key: row.get("path_key")?,
        name: row.get("name")?,
        total_bytes: row.get::<_, Option<i64>>("total_bytes")?.map(|v| v as u64),
        committed_bytes: row.get::<_, i64>("committed_bytes")? as u64,
        supports_partial: row.get::<_, i64>("supports_partial")? != 0,
        local_temp_url: row.get("local_temp_url")?,
        final_url: row.get("final_url")?,
        state: TransferState::parse(&state).unwrap_or(TransferState::Active),
        last_error: row.get("last_error")?,
        remote_handle: row.get::<_, Option<i64>>("remote_handle")?.map(|v| v as u32),
        content_hash: row.get("content_hash")?,
        throughput_mbps: row.get("throughput_mbps")?,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    })
}

type Reply<T> = mpsc::Sender<Result<T, MtpError>>;

enum Command {
    Begin { params: BeginTransfer, id: TransferId, reply: Reply<()> },
    UpdateProgress { id: TransferId, committed: u64, reply: Reply<()> },
    RecordRemoteHandle { id: TransferId, handle: u32, reply: Reply<()> },
    AddContentHash { id: TransferId, hash: String, reply: Reply<()> },
    RecordThroughput { id: TransferId, mbps: f64, reply: Reply<()> },
    Fail { id: TransferId, error: String, reply: Reply<()> },
    Complete { id: TransferId, reply: Reply<()> },
    Get { id: TransferId, reply: Reply<TransferRecord> },
    LoadResumables { device_id: String, reply: Reply<Vec<TransferRecord>> },
    WritesPendingReconciliation { device_id: String, reply: Reply<Vec<TransferRecord>> },
    ClearStaleTemps { older_than: u64, reply: Reply<Vec<TransferRecord>> },
    Shutdown,
}

fn run_writer_thread(conn: Connection, rx: mpsc::Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Shutdown => break,
            Command::Begin { params, id, reply } => {
                let result = conn
                    .execute(
                        "INSERT INTO transfers (id, device_id, kind, handle, parent_handle, path_key, name,
                            total_bytes, committed_bytes, supports_partial, local_temp_url, final_url,
                            state, last_error, remote_handle, content_hash, throughput_mbps, updated_at)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0,?9,?10,?11,'active',NULL,NULL,NULL,NULL,?12)",
                        rusqlite::params![
                            id,
                            params.device_id,
                            params.kind.as_str(),
                            params.handle,
                            params.parent_handle,
                            params.path_key,
                            params.name,
                            params.total_bytes.map(|v| v as i64),
                            params.supports_partial as i64,
                            params.local_temp_url,
                            params.final_url,
                            now_epoch_secs() as i64,
                        ],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::UpdateProgress { id, committed, reply } => {
                let result = conn
                    .execute(
                        "UPDATE transfers SET committed_bytes = ?1, updated_at = ?2 WHERE id = ?3 AND state NOT IN ('failed','done')",
                        rusqlite::params![committed as i64, now_epoch_secs() as i64, id],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::RecordRemoteHandle { id, handle, reply } => {
                let result = conn
                    .execute(
                        "UPDATE transfers SET remote_handle = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![handle, now_epoch_secs() as i64, id],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::AddContentHash { id, hash, reply } => {
                let result = conn
                    .execute(
                        "UPDATE transfers SET content_hash = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![hash, now_epoch_secs() as i64, id],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::RecordThroughput { id, mbps, reply } => {
                let result = conn
                    .execute(
                        "UPDATE transfers SET throughput_mbps = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![mbps, now_epoch_secs() as i64, id],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::Fail { id, error, reply } => {
                let result = conn
                    .execute(
                        "UPDATE transfers SET state = 'failed', last_error = ?1, updated_at = ?2
                         WHERE id = ?3 AND state NOT IN ('failed','done')",
                        rusqlite::params![error, now_epoch_secs() as i64, id],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::Complete { id, reply } => {
                let result = conn
                    .execute(
                        "UPDATE transfers SET state = 'done', updated_at = ?1,
                            committed_bytes = COALESCE(total_bytes, committed_bytes)
                         WHERE id = ?2 AND state NOT IN ('failed','done')",
                        rusqlite::params![now_epoch_secs() as i64, id],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::Get { id, reply } => {
                let result = conn
                    .query_row("SELECT * FROM transfers WHERE id = ?1", [&id], row_to_record)
                    .map_err(|_| MtpError::Internal { reason: format!("no transfer record with id {id}") });
                let _ = reply.send(result);
            }
            Command::LoadResumables { device_id, reply } => {
                let result = (|| {
                    let mut stmt = conn
                        .prepare("SELECT * FROM transfers WHERE device_id = ?1 AND state IN ('active','paused')")
                        .map_err(sql_err)?;
                    let rows = stmt.query_map([&device_id], row_to_record).map_err(sql_err)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
                })();
                let _ = reply.send(result);
            }
            Command::WritesPendingReconciliation { device_id, reply } => {
                let result = (|| {
                    let mut stmt = conn
                        .prepare(
                            "SELECT * FROM transfers WHERE device_id = ?1 AND kind = 'write'
                             AND remote_handle IS NOT NULL AND state IN ('active','paused','failed')",
                        )
                        .map_err(sql_err)?;
                    let rows = stmt.query_map([&device_id], row_to_record).map_err(sql_err)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
                })();
                let _ = reply.send(result);
            }
            Command::ClearStaleTemps { older_than, reply } => {
                let result = (|| {
                    let mut stmt = conn
                        .prepare("SELECT * FROM transfers WHERE state IN ('failed','paused') AND updated_at < ?1")
                        .map_err(sql_err)?;
                    let rows = stmt.query_map([older_than as i64], row_to_record).map_err(sql_err)?;
                    let removed = rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)?;
                    conn.execute("DELETE FROM transfers WHERE state IN ('failed','paused') AND updated_at < ?1", [older_than as i64])
                        .map_err(sql_err)?;
                    Ok(removed)
                })();
                let _ = reply.send(result);
            }
        }
    }
}

/// A WAL-mode SQLite transfer journal with a single dedicated writer thread
/// (spec §5: "TransferJournal: its own mutex; writes serialize").
pub struct SqliteJournal {
    tx: mpsc::Sender<Command>,
    writer: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    device_seq_prefix: String,
}

impl SqliteJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MtpError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        open_with_schema_guard(&conn).map_err(sql_err)?;
        let (tx, rx) = mpsc::channel();
        let writer = std::thread::Builder::new()
            .name("mtp-journal-writer".to_string())
            .spawn(move || run_writer_thread(conn, rx))
            .map_err(|e| MtpError::Internal { reason: format!("failed to spawn journal writer thread: {e}") })?;
        Ok(Self { tx, writer: Some(writer), next_id: AtomicU64::new(1), device_seq_prefix: "txn".to_string() })
    }

    fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, MtpError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| MtpError::Internal { reason: "journal writer thread is gone".to_string() })?;
        reply_rx
            .recv()
            .map_err(|_| MtpError::Internal { reason: "journal writer thread dropped the reply channel".to_string() })?
    }
}

impl Drop for SqliteJournal {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl TransferJournal for SqliteJournal {
    fn begin(&self, params: BeginTransfer) -> Result<TransferId, MtpError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}-{}-{n}", params.device_id, params.kind.as_str(), self.device_seq_prefix);
        self.call(|reply| Command::Begin { params, id: id.clone(), reply })?;
        Ok(id)
    }

    fn update_progress(&self, id: &TransferId, committed_bytes: u64) -> Result<(), MtpError> {
        self.call(|reply| Command::UpdateProgress { id: id.clone(), committed: committed_bytes, reply })
    }

    fn record_remote_handle(&self, id: &TransferId, handle: u32) -> Result<(), MtpError> {
        self.call(|reply| Command::RecordRemoteHandle { id: id.clone(), handle, reply })
    }

    fn add_content_hash(&self, id: &TransferId, hash: &str) -> Result<(), MtpError> {
        self.call(|reply| Command::AddContentHash { id: id.clone(), hash: hash.to_string(), reply })
    }

    fn record_throughput(&self, id: &TransferId, mbps: f64) -> Result<(), MtpError> {
        self.call(|reply| Command::RecordThroughput { id: id.clone(), mbps, reply })
    }

    fn fail(&self, id: &TransferId, error: &str) -> Result<(), MtpError> {
        self.call(|reply| Command::Fail { id: id.clone(), error: error.to_string(), reply })
    }

    fn complete(&self, id: &TransferId) -> Result<(), MtpError> {
        self.call(|reply| Command::Complete { id: id.clone(), reply })
    }

    fn get(&self, id: &TransferId) -> Result<TransferRecord, MtpError> {
        self.call(|reply| Command::Get { id: id.clone(), reply })
    }

    fn load_resumables(&self, device_id: &str) -> Result<Vec<TransferRecord>, MtpError> {
        self.call(|reply| Command::LoadResumables { device_id: device_id.to_string(), reply })
    }

    fn writes_pending_reconciliation(&self, device_id: &str) -> Result<Vec<TransferRecord>, MtpError> {
        self.call(|reply| Command::WritesPendingReconciliation { device_id: device_id.to_string(), reply })
    }

    fn clear_stale_temps(&self, older_than_epoch_secs: u64) -> Result<Vec<TransferRecord>, MtpError> {
        self.call(|reply| Command::ClearStaleTemps { older_than: older_than_epoch_secs, reply })
    }
}
