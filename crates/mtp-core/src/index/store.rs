//! The live index's persistent catalog (spec §4.8, §6). Writer is the crawl
//! scheduler; readers may be concurrent and see snapshot-consistent reads
//! (spec §5), via WAL mode for the SQLite-backed implementation.

use super::object::IndexedObject;
use crate::error::MtpError;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;

/// Read/write surface of the local catalog. Implementations: an in-memory
/// map for tests ([`InMemoryLiveIndex`]) and a WAL-mode SQLite store
/// ([`SqliteLiveIndex`]), both grounded on the teacher's indexing store.
pub trait LiveIndexStore: Send + Sync {
    /// Starts a new crawl generation for a storage, returning the generation
    /// number subsequent upserts/purges for this pass should use.
    fn begin_generation(&self, device_id: &str, storage_id: u32) -> Result<u64, MtpError>;
    /// The generation currently in effect for a storage (for event handlers
    /// that need to tag a live insert so it survives an in-progress purge).
    fn current_generation(&self, device_id: &str, storage_id: u32) -> Result<u64, MtpError>;
    fn upsert_object(&self, object: IndexedObject) -> Result<(), MtpError>;
    fn get_by_handle(&self, device_id: &str, handle: u32) -> Result<Option<IndexedObject>, MtpError>;
    fn list_children(&self, device_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<Vec<IndexedObject>, MtpError>;
    /// Tombstones every non-tombstoned object under `parent_handle` whose
    /// generation is not `current_gen` (spec §4.8 `purgeStale`); returns how
    /// many were tombstoned.
    fn purge_stale(&self, device_id: &str, storage_id: u32, parent_handle: Option<u32>, current_gen: u64) -> Result<u64, MtpError>;
    fn remove_by_handle(&self, device_id: &str, handle: u32) -> Result<(), MtpError>;
}

struct InMemoryState {
    objects: HashMap<(String, u32), IndexedObject>,
    generations: HashMap<(String, u32), u64>,
    change_counter: u64,
}

/// In-memory [`LiveIndexStore`], used by this crate's own scheduler tests.
pub struct InMemoryLiveIndex {
    state: Mutex<InMemoryState>,
}

impl Default for InMemoryLiveIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLiveIndex {
    pub fn new() -> Self {
        Self { state: Mutex::new(InMemoryState { objects: HashMap::new(), generations: HashMap::new(), change_counter: 0 }) }
    }
}

impl LiveIndexStore for InMemoryLiveIndex {
    fn begin_generation(&self, device_id: &str, storage_id: u32) -> Result<u64, MtpError> {
        let mut s = self.state.lock().unwrap();
        let gen = s.generations.entry((device_id.to_string(), storage_id)).or_insert(0);
        *gen += 1;
        Ok(*gen)
    }

    fn current_generation(&self, device_id: &str, storage_id: u32) -> Result<u64, MtpError> {
        let s = self.state.lock().unwrap();
        Ok(s.generations.get(&(device_id.to_string(), storage_id)).copied().unwrap_or(0))
    }

    fn upsert_object(&self, mut object: IndexedObject) -> Result<(), MtpError> {
        let mut s = self.state.lock().unwrap();
        s.change_counter += 1;
        object.change_counter = s.change_counter;
        s.objects.insert((object.device_id.clone(), object.handle), object);
        Ok(())
    }

    fn get_by_handle(&self, device_id: &str, handle: u32) -> Result<Option<IndexedObject>, MtpError> {
        Ok(self.state.lock().unwrap().objects.get(&(device_id.to_string(), handle)).cloned())
    }

    fn list_children(&self, device_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<Vec<IndexedObject>, MtpError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .values()
            .filter(|o| o.device_id == device_id && o.storage_id == storage_id && o.parent_handle == parent_handle && !o.tombstone)
            .cloned()
            .collect())
    }

    fn purge_stale(&self, device_id: &str, storage_id: u32, parent_handle: Option<u32>, current_gen: u64) -> Result<u64, MtpError> {
        let mut s = self.state.lock().unwrap();
        let mut purged = 0u64;
        for obj in s.objects.values_mut() {
            if obj.device_id == device_id && obj.storage_id == storage_id && obj.parent_handle == parent_handle && !obj.tombstone && obj.generation != current_gen {
                obj.tombstone = true;
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn remove_by_handle(&self, device_id: &str, handle: u32) -> Result<(), MtpError> {
        let mut s = self.state.lock().unwrap();
        if let Some(obj) = s.objects.get_mut(&(device_id.to_string(), handle)) {
            obj.tombstone = true;
        }
        Ok(())
    }
}

fn sql_err(e: rusqlite::Error) -> MtpError {
    MtpError::Internal { reason: format!("sqlite error: {e}") }
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Schema exactly as laid out in spec §6 "Live index".
fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS devices (id TEXT PRIMARY KEY, model TEXT, last_seen_at INTEGER);
         CREATE TABLE IF NOT EXISTS storages (
            id INTEGER NOT NULL, device_id TEXT NOT NULL, description TEXT,
            capacity INTEGER, free INTEGER, read_only INTEGER NOT NULL, last_indexed_at INTEGER,
            PRIMARY KEY (id, device_id)
         );
         CREATE TABLE IF NOT EXISTS objects (
            device_id TEXT NOT NULL, storage_id INTEGER NOT NULL, handle INTEGER NOT NULL,
            parent_handle INTEGER, name TEXT NOT NULL, path_key TEXT NOT NULL,
            size INTEGER, mtime TEXT, format INTEGER NOT NULL, gen INTEGER NOT NULL,
            tombstone INTEGER NOT NULL, change_counter INTEGER NOT NULL,
            PRIMARY KEY (device_id, handle)
         );
         CREATE TABLE IF NOT EXISTS snapshots (device_id TEXT NOT NULL, gen INTEGER NOT NULL, created_at INTEGER, PRIMARY KEY (device_id, gen));
         CREATE INDEX IF NOT EXISTS objects_parent_idx ON objects(device_id, storage_id, parent_handle);",
    )
}

fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexedObject> {
    Ok(IndexedObject {
        device_id: row.get("device_id")?,
        storage_id: row.get::<_, i64>("storage_id")? as u32,
        handle: row.get::<_, i64>("handle")? as u32,
        parent_handle: row.get::<_, Option<i64>>("parent_handle")?.map(|v| v as u32),
        name: row.get("name")?,
        path_key: row.get("path_key")?,
        size_bytes: row.get::<_, Option<i64>>("size")?.map(|v| v as u64),
        mtime: row.get("mtime")?,
        format_code: row.get::<_, i64>("format")? as u16,
        is_directory: row.get::<_, i64>("format")? == 0x3001,
        generation: row.get::<_, i64>("gen")? as u64,
        change_counter: row.get::<_, i64>("change_counter")? as u64,
        tombstone: row.get::<_, i64>("tombstone")? != 0,
    })
}

type Reply<T> = mpsc::Sender<Result<T, MtpError>>;

enum Command {
    BeginGeneration { device_id: String, storage_id: u32, reply: Reply<u64> },
    CurrentGeneration { device_id: String, storage_id: u32, reply: Reply<u64> },
    Upsert { object: IndexedObject, reply: Reply<()> },
    GetByHandle { device_id: String, handle: u32, reply: Reply<Option<IndexedObject>> },
    ListChildren { device_id: String, storage_id: u32, parent_handle: Option<u32>, reply: Reply<Vec<IndexedObject>> },
    PurgeStale { device_id: String, storage_id: u32, parent_handle: Option<u32>, current_gen: u64, reply: Reply<u64> },
    RemoveByHandle { device_id: String, handle: u32, reply: Reply<()> },
    Shutdown,
}

fn run_writer_thread(conn: Connection, rx: mpsc::Receiver<Command>) {
    let mut change_counter: i64 = conn
        .query_row("SELECT COALESCE(MAX(change_counter), 0) FROM objects", [], |r| r.get(0))
        .unwrap_or(0);
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Shutdown => break,
            Command::BeginGeneration { device_id, storage_id, reply } => {
                let result = (|| {
                    conn.execute(
                        "INSERT INTO storages(id, device_id, read_only) VALUES (?1, ?2, 0)
                         ON CONFLICT(id, device_id) DO NOTHING",
                        rusqlite::params![storage_id, device_id],
                    )
                    .map_err(sql_err)?;
                    let current: i64 = conn
                        .query_row(
                            "SELECT COALESCE(MAX(gen), 0) FROM objects WHERE device_id = ?1 AND storage_id = ?2",
                            rusqlite::params![device_id, storage_id],
                            |r| r.get(0),
                        )
                        .map_err(sql_err)?;
                    let next = current + 1;
                    conn.execute(
                        "INSERT INTO snapshots(device_id, gen, created_at) VALUES (?1, ?2, 0)",
                        rusqlite::params![device_id, next],
                    )
                    .map_err(sql_err)?;
                    Ok(next as u64)
                })();
                let _ = reply.send(result);
            }
            Command::CurrentGeneration { device_id, storage_id, reply } => {
                let result = conn
                    .query_row(
                        "SELECT COALESCE(MAX(gen), 0) FROM objects WHERE device_id = ?1 AND storage_id = ?2",
                        rusqlite::params![device_id, storage_id],
                        |r| r.get::<_, i64>(0),
                    )
                    .map(|v| v as u64)
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::Upsert { object, reply } => {
                change_counter += 1;
                let result = conn
                    .execute(
                        "INSERT INTO objects(device_id, storage_id, handle, parent_handle, name, path_key,
                            size, mtime, format, gen, tombstone, change_counter)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                         ON CONFLICT(device_id, handle) DO UPDATE SET
                            storage_id = excluded.storage_id, parent_handle = excluded.parent_handle,
                            name = excluded.name, path_key = excluded.path_key, size = excluded.size,
                            mtime = excluded.mtime, format = excluded.format, gen = excluded.gen,
                            tombstone = excluded.tombstone, change_counter = excluded.change_counter",
                        rusqlite::params![
                            object.device_id,
                            object.storage_id,
                            object.handle,
                            object.parent_handle,
                            object.name,
                            object.path_key,
                            object.size_bytes.map(|v| v as i64),
                            object.mtime,
                            object.format_code,
                            object.generation as i64,
                            object.tombstone as i64,
                            change_counter,
                        ],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::GetByHandle { device_id, handle, reply } => {
                let result = conn
                    .query_row(
                        "SELECT * FROM objects WHERE device_id = ?1 AND handle = ?2",
                        rusqlite::params![device_id, handle],
                        row_to_object,
                    )
                    .map(Some)
                    .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(sql_err(e)) });
                let _ = reply.send(result);
            }
            Command::ListChildren { device_id, storage_id, parent_handle, reply } => {
                let result = (|| {
                    let mut stmt = conn
                        .prepare(
                            "SELECT * FROM objects WHERE device_id = ?1 AND storage_id = ?2
                             AND parent_handle IS ?3 AND tombstone = 0",
                        )
                        .map_err(sql_err)?;
                    let rows = stmt.query_map(rusqlite::params![device_id, storage_id, parent_handle], row_to_object).map_err(sql_err)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
                })();
                let _ = reply.send(result);
            }
            Command::PurgeStale { device_id, storage_id, parent_handle, current_gen, reply } => {
                let result = conn
                    .execute(
                        "UPDATE objects SET tombstone = 1 WHERE device_id = ?1 AND storage_id = ?2
                         AND parent_handle IS ?3 AND tombstone = 0 AND gen != ?4",
                        rusqlite::params![device_id, storage_id, parent_handle, current_gen as i64],
                    )
                    .map(|n| n as u64)
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
            Command::RemoveByHandle { device_id, handle, reply } => {
                let result = conn
                    .execute(
                        "UPDATE objects SET tombstone = 1 WHERE device_id = ?1 AND handle = ?2",
                        rusqlite::params![device_id, handle],
                    )
                    .map(|_| ())
                    .map_err(sql_err);
                let _ = reply.send(result);
            }
        }
    }
}

/// WAL-mode SQLite [`LiveIndexStore`], grounded on the teacher's
/// `indexing/store.rs`/`indexing/writer.rs` dedicated-writer-thread pattern
/// (same shape as [`crate::journal::SqliteJournal`]).
pub struct SqliteLiveIndex {
    tx: mpsc::Sender<Command>,
    writer: Option<JoinHandle<()>>,
}

impl SqliteLiveIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MtpError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        apply_pragmas(&conn).map_err(sql_err)?;
        create_schema(&conn).map_err(sql_err)?;
        let (tx, rx) = mpsc::channel();
        let writer = std::thread::Builder::new()
            .name("mtp-index-writer".to_string())
            .spawn(move || run_writer_thread(conn, rx))
            .map_err(|e| MtpError::Internal { reason: format!("failed to spawn index writer thread: {e}") })?;
        Ok(Self { tx, writer: Some(writer) })
    }

    fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, MtpError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| MtpError::Internal { reason: "index writer thread is gone".to_string() })?;
        reply_rx
            .recv()
            .map_err(|_| MtpError::Internal { reason: "index writer thread dropped the reply channel".to_string() })?
    }
}

impl Drop for SqliteLiveIndex {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl LiveIndexStore for SqliteLiveIndex {
    fn begin_generation(&self, device_id: &str, storage_id: u32) -> Result<u64, MtpError> {
        self.call(|reply| Command::BeginGeneration { device_id: device_id.to_string(), storage_id, reply })
    }

    fn current_generation(&self, device_id: &str, storage_id: u32) -> Result<u64, MtpError> {
        self.call(|reply| Command::CurrentGeneration { device_id: device_id.to_string(), storage_id, reply })
    }

    fn upsert_object(&self, object: IndexedObject) -> Result<(), MtpError> {
        self.call(|reply| Command::Upsert { object, reply })
    }

    fn get_by_handle(&self, device_id: &str, handle: u32) -> Result<Option<IndexedObject>, MtpError> {
        self.call(|reply| Command::GetByHandle { device_id: device_id.to_string(), handle, reply })
    }

    fn list_children(&self, device_id: &str, storage_id: u32, parent_handle: Option<u32>) -> Result<Vec<IndexedObject>, MtpError> {
        self.call(|reply| Command::ListChildren { device_id: device_id.to_string(), storage_id, parent_handle, reply })
    }

    fn purge_stale(&self, device_id: &str, storage_id: u32, parent_handle: Option<u32>, current_gen: u64) -> Result<u64, MtpError> {
        self.call(|reply| Command::PurgeStale { device_id: device_id.to_string(), storage_id, parent_handle, current_gen, reply })
    }

    fn remove_by_handle(&self, device_id: &str, handle: u32) -> Result<(), MtpError> {
        self.call(|reply| Command::RemoveByHandle { device_id: device_id.to_string(), handle, reply })
    }
}
