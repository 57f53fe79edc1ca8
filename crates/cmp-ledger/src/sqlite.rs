//! Durable ledger backed by `SQLite`.
//!
//! # Schema
//!
//! One table, `ledger_entries`, with columns `id`, `timestamp`, `actor`,
//! `action`, `data`, `prev_hash`, `hash`. `data` holds the canonical JSON of
//! the payload (or `NULL`). `prev_hash` and `hash` are `UNIQUE`, so two rows
//! can never claim the same predecessor. Triggers abort any `UPDATE` or
//! `DELETE`.
//!
//! # Appends
//!
//! Each append runs in a `BEGIN IMMEDIATE` transaction: the tail read and the
//! insert happen under the database's write lock, which also serializes
//! writers in other processes sharing the file. Busy/locked results and
//! unique-constraint hits are retried up to `max_append_attempts` times;
//! the transaction is rolled back before every retry, and the writer
//! connection is released while backing off.
//!
//! # Reads
//!
//! A file-backed store reads through a small pool of read-only connections,
//! never through the writer connection. With WAL, reads see the last
//! committed state and run alongside an append in progress.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use cmp_crypto::{canonicalize, compute_hash};
use cmp_types::{LedgerEntry, NewEntry, Payload, Timestamp, GENESIS};
use rusqlite::{
    ffi, params, Connection, ErrorCode, OpenFlags, OptionalExtension, Params, Row,
    TransactionBehavior,
};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::traits::{LedgerReader, LedgerRecord, LedgerWriter};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const SELECT_ENTRIES: &str =
    "SELECT id, timestamp, actor, action, data, prev_hash, hash FROM ledger_entries";

/// Idle read connections kept per store.
const MAX_IDLE_READERS: usize = 4;

/// Tuning for [`SqliteLedger`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqliteOptions {
    /// How long a connection waits on a locked database before reporting busy.
    pub busy_timeout: Duration,
    /// Total attempts for one append before surfacing [`LedgerError::Conflict`].
    pub max_append_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            max_append_attempts: 5,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// The append-only ledger backed by `SQLite`.
pub struct SqliteLedger {
    writer: Mutex<Connection>,
    /// `None` for a private in-memory database, which only the writer
    /// connection can see.
    readers: Option<ReaderPool>,
    path: Option<PathBuf>,
    options: SqliteOptions,
}

impl SqliteLedger {
    /// Open or create a ledger database at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::open_with(path, SqliteOptions::default())
    }

    /// Open or create a ledger database at `path`.
    pub fn open_with(path: impl AsRef<Path>, options: SqliteOptions) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Storage(e.to_string()))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize(&conn, &options)?;

        info!(path = %path.display(), "ledger opened");
        Ok(Self {
            writer: Mutex::new(conn),
            readers: Some(ReaderPool::new(path, options.busy_timeout)),
            path: Some(path.to_path_buf()),
            options,
        })
    }

    /// A private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let options = SqliteOptions::default();
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn, &options)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: None,
            path: None,
            options,
        })
    }

    fn initialize(conn: &Connection, options: &SqliteOptions) -> Result<(), LedgerError> {
        conn.busy_timeout(options.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(journal_mode = %mode, "ledger schema ready");
        Ok(())
    }

    /// Open an independent read-only connection to the same database.
    pub fn open_reader(&self) -> Result<SqliteReader, LedgerError> {
        let path = self.path.as_ref().ok_or_else(|| {
            LedgerError::Storage("an in-memory ledger has no independent readers".into())
        })?;
        let conn = open_read_only(path, self.options.busy_timeout)?;
        Ok(SqliteReader {
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close every connection, reporting the first error from `SQLite`.
    pub fn close(self) -> Result<(), LedgerError> {
        let pooled = match self.readers {
            Some(pool) => pool.into_idle()?,
            None => Vec::new(),
        };
        for conn in pooled {
            conn.close().map_err(|(_, e)| LedgerError::from(e))?;
        }

        let conn = self
            .writer
            .into_inner()
            .map_err(|_| LedgerError::Storage("ledger connection lock poisoned".into()))?;
        conn.close().map_err(|(_, e)| LedgerError::from(e))?;
        if let Some(path) = &self.path {
            info!(path = %path.display(), "ledger closed");
        }
        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        lock(&self.writer)
    }

    fn with_reader<T>(
        &self,
        read: impl FnOnce(&Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        match &self.readers {
            Some(pool) => pool.with(read),
            None => read(&*self.lock_writer()?),
        }
    }

    fn try_append(
        conn: &mut Connection,
        entry: &NewEntry,
        data: Option<&str>,
    ) -> Result<LedgerEntry, AppendFailure> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<String> = tx
            .query_row(
                "SELECT hash FROM ledger_entries ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let prev_hash = last.unwrap_or_else(|| GENESIS.to_string());

        let timestamp = Timestamp::now();
        let hash = compute_hash(
            &prev_hash,
            &timestamp,
            entry.actor(),
            entry.action(),
            entry.data(),
        );

        tx.execute(
            "INSERT INTO ledger_entries (timestamp, actor, action, data, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                timestamp.to_canonical_string(),
                entry.actor(),
                entry.action(),
                data,
                prev_hash,
                hash,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        let id = u64::try_from(id).map_err(|_| {
            AppendFailure::Fatal(LedgerError::Storage(format!("negative row id {id}")))
        })?;
        Ok(entry.clone().into_entry(id, timestamp, prev_hash, hash))
    }
}

impl LedgerWriter for SqliteLedger {
    fn append_entry(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError> {
        let data = entry.data().map(|p| canonicalize(Some(p)));
        let max_attempts = self.options.max_append_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = {
                let mut conn = self.lock_writer()?;
                Self::try_append(&mut conn, &entry, data.as_deref())
            };
            match outcome {
                Ok(committed) => {
                    debug!(
                        id = committed.id,
                        actor = %committed.actor,
                        action = %committed.action,
                        "entry appended"
                    );
                    return Ok(committed);
                }
                Err(AppendFailure::Conflict(reason)) if attempt < max_attempts => {
                    warn!(attempt, %reason, "append conflicted with another writer; retrying");
                    thread::sleep(self.options.retry_backoff * attempt);
                }
                Err(AppendFailure::Conflict(reason)) => {
                    warn!(attempts = attempt, %reason, "append abandoned after repeated conflicts");
                    return Err(LedgerError::Conflict { attempts: attempt });
                }
                Err(AppendFailure::Fatal(e)) => return Err(e),
            }
        }
    }
}

impl LedgerReader for SqliteLedger {
    fn read_all_in_order(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_reader(select_all)
    }

    fn read_after(&self, after_id: u64, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_reader(|conn| decode(select_after(conn, after_id, limit)?))
    }

    fn read_recent(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_reader(|conn| decode(select_recent(conn, n)?))
    }

    fn get(&self, id: u64) -> Result<Option<LedgerEntry>, LedgerError> {
        self.with_reader(|conn| select_one(conn, id))
    }

    fn head(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        self.with_reader(select_head)
    }

    fn count(&self) -> Result<u64, LedgerError> {
        self.with_reader(select_count)
    }

    fn read_records_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.with_reader(|conn| Ok(records(select_after(conn, after_id, limit)?)))
    }

    fn read_recent_records(&self, n: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.with_reader(|conn| Ok(records(select_recent(conn, n)?)))
    }
}

/// Read-only view over a ledger database on its own connection.
pub struct SqliteReader {
    conn: Mutex<Connection>,
}

impl SqliteReader {
    fn with_conn<T>(
        &self,
        read: impl FnOnce(&Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        read(&*lock(&self.conn)?)
    }
}

impl LedgerReader for SqliteReader {
    fn read_all_in_order(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_conn(select_all)
    }

    fn read_after(&self, after_id: u64, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_conn(|conn| decode(select_after(conn, after_id, limit)?))
    }

    fn read_recent(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_conn(|conn| decode(select_recent(conn, n)?))
    }

    fn get(&self, id: u64) -> Result<Option<LedgerEntry>, LedgerError> {
        self.with_conn(|conn| select_one(conn, id))
    }

    fn head(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        self.with_conn(select_head)
    }

    fn count(&self) -> Result<u64, LedgerError> {
        self.with_conn(select_count)
    }

    fn read_records_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.with_conn(|conn| Ok(records(select_after(conn, after_id, limit)?)))
    }

    fn read_recent_records(&self, n: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.with_conn(|conn| Ok(records(select_recent(conn, n)?)))
    }
}

/// Read-only connections checked out one per read.
struct ReaderPool {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn new(path: &Path, busy_timeout: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            busy_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn with<T>(
        &self,
        read: impl FnOnce(&Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let pooled = lock(&self.idle)?.pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => open_read_only(&self.path, self.busy_timeout)?,
        };

        let result = read(&conn);

        let mut idle = lock(&self.idle)?;
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
        result
    }

    fn into_idle(self) -> Result<Vec<Connection>, LedgerError> {
        self.idle
            .into_inner()
            .map_err(|_| LedgerError::Storage("ledger reader pool lock poisoned".into()))
    }
}

fn open_read_only(path: &Path, busy_timeout: Duration) -> Result<Connection, LedgerError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, LedgerError> {
    mutex
        .lock()
        .map_err(|_| LedgerError::Storage("ledger connection lock poisoned".into()))
}

/// Why one append attempt failed.
enum AppendFailure {
    /// Another writer holds the lock or already extended the tail.
    Conflict(String),
    Fatal(LedgerError),
}

impl From<rusqlite::Error> for AppendFailure {
    fn from(e: rusqlite::Error) -> Self {
        if is_conflict(&e) {
            Self::Conflict(e.to_string())
        } else {
            Self::Fatal(e.into())
        }
    }
}

fn is_conflict(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => true,
            ErrorCode::ConstraintViolation => err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE,
            _ => false,
        },
        _ => false,
    }
}

fn select<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<StoredRow>, LedgerError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params, StoredRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn decode(rows: Vec<StoredRow>) -> Result<Vec<LedgerEntry>, LedgerError> {
    rows.into_iter().map(StoredRow::into_entry).collect()
}

fn records(rows: Vec<StoredRow>) -> Vec<LedgerRecord> {
    rows.into_iter().map(StoredRow::into_record).collect()
}

fn select_all(conn: &Connection) -> Result<Vec<LedgerEntry>, LedgerError> {
    decode(select(conn, &format!("{SELECT_ENTRIES} ORDER BY id ASC"), [])?)
}

fn select_after(
    conn: &Connection,
    after_id: u64,
    limit: usize,
) -> Result<Vec<StoredRow>, LedgerError> {
    select(
        conn,
        &format!("{SELECT_ENTRIES} WHERE id > ?1 ORDER BY id ASC LIMIT ?2"),
        params![to_sql_int(after_id), to_sql_int(limit as u64)],
    )
}

fn select_recent(conn: &Connection, n: usize) -> Result<Vec<StoredRow>, LedgerError> {
    select(
        conn,
        &format!("SELECT * FROM ({SELECT_ENTRIES} ORDER BY id DESC LIMIT ?1) ORDER BY id ASC"),
        params![to_sql_int(n as u64)],
    )
}

fn select_one(conn: &Connection, id: u64) -> Result<Option<LedgerEntry>, LedgerError> {
    let mut found = select(
        conn,
        &format!("{SELECT_ENTRIES} WHERE id = ?1"),
        params![to_sql_int(id)],
    )?;
    found.pop().map(StoredRow::into_entry).transpose()
}

fn select_head(conn: &Connection) -> Result<Option<LedgerEntry>, LedgerError> {
    let mut found = select(conn, &format!("{SELECT_ENTRIES} ORDER BY id DESC LIMIT 1"), [])?;
    found.pop().map(StoredRow::into_entry).transpose()
}

fn select_count(conn: &Connection) -> Result<u64, LedgerError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A row exactly as stored, before decoding.
struct StoredRow {
    id: i64,
    timestamp: String,
    actor: String,
    action: String,
    data: Option<String>,
    prev_hash: String,
    hash: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            actor: row.get(2)?,
            action: row.get(3)?,
            data: row.get(4)?,
            prev_hash: row.get(5)?,
            hash: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry, LedgerError> {
        let id = u64::try_from(self.id).map_err(|_| LedgerError::Corrupt {
            id: 0,
            reason: format!("negative id {}", self.id),
        })?;
        let corrupt = |reason: String| LedgerError::Corrupt { id, reason };

        let timestamp = Timestamp::parse(&self.timestamp).map_err(|e| corrupt(e.to_string()))?;
        let data = self
            .data
            .as_deref()
            .map(Payload::parse)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(LedgerEntry {
            id,
            timestamp,
            actor: self.actor,
            action: self.action,
            data,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }

    fn into_record(self) -> LedgerRecord {
        match self.into_entry() {
            Ok(entry) => LedgerRecord::Entry(entry),
            Err(LedgerError::Corrupt { id, reason }) => LedgerRecord::Undecodable { id, reason },
            Err(other) => LedgerRecord::Undecodable {
                id: 0,
                reason: other.to_string(),
            },
        }
    }
}
