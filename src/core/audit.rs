//! Append-only audit trail.
//!
//! Every stage transition of the gate lands here as one [`AuditRecord`].
//! Sinks expose `append` and nothing else to the gate; reading back is a
//! separate, sink-specific concern used by tooling and tests.
//!
//! Three sinks ship with the crate:
//! - [`MemoryAuditLog`]: in-process vector, for embedding and tests
//! - [`JsonlAuditLog`]: JSON-lines file with a SHA-256 hash chain
//! - [`SqliteAuditLog`]: insert-only SQLite table guarded by triggers

use crate::core::config::{AuditBackend, AuditConfig};
use crate::core::error::GateError;
use crate::core::model::Proposal;
use crate::core::redact;
use crate::core::schemas;
use crate::core::time;
use rusqlite::{Connection, OpenFlags, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Lifecycle stage an audit record belongs to, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Proposed,
    Explained,
    Decided,
    Executed,
    Learning,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Proposed,
        Stage::Explained,
        Stage::Decided,
        Stage::Executed,
        Stage::Learning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Proposed => "proposed",
            Stage::Explained => "explained",
            Stage::Decided => "decided",
            Stage::Executed => "executed",
            Stage::Learning => "learning",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Stage::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub proposal_id: String,
    pub trace_id: String,
    pub stage: Stage,
    pub payload: Value,
    pub timestamp: u64,
}

impl AuditRecord {
    /// Build a record for `proposal`, redacting secrets out of the payload.
    pub fn for_proposal(proposal: &Proposal, stage: Stage, payload: Value) -> Self {
        Self {
            proposal_id: proposal.proposal_id().to_string(),
            trace_id: proposal.trace_id().to_string(),
            stage,
            payload: redact::redact_value(payload),
            timestamp: time::now_millis(),
        }
    }
}

/// Append-only destination for audit records.
///
/// Implementations must preserve append order and must return an error rather
/// than drop a record; the gate treats any error as fatal for the stage.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<(), GateError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the sink described by `config`.
pub fn open_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, GateError> {
    match config.backend {
        AuditBackend::Memory => Ok(Arc::new(MemoryAuditLog::new())),
        AuditBackend::Jsonl => Ok(Arc::new(JsonlAuditLog::open(&config.path)?)),
        AuditBackend::Sqlite => Ok(Arc::new(SqliteAuditLog::open(&config.path)?)),
    }
}

// --- Memory ---

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditRecord> {
        lock(&self.records).clone()
    }

    pub fn entries_for_trace(&self, trace_id: &str) -> Vec<AuditRecord> {
        lock(&self.records)
            .iter()
            .filter(|r| r.trace_id == trace_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), GateError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }
}

// --- JSON lines ---

/// Hash that precedes the first line of a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One line of a JSONL audit file: the record plus its chain position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedLine {
    pub seq: u64,
    #[serde(flatten)]
    pub record: AuditRecord,
    pub prev_hash: String,
    pub hash: String,
}

fn chain_hash(prev_hash: &str, seq: u64, record: &AuditRecord) -> Result<String, GateError> {
    let body = serde_json::to_string(record)?;
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(seq.to_be_bytes());
    hasher.update(body.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

struct ChainCursor {
    file: File,
    next_seq: u64,
    last_hash: String,
}

/// JSON-lines audit file.
///
/// The handle holds an exclusive lock on the file for its whole lifetime, so
/// one path has exactly one writer and one chain cursor. Appends from threads
/// sharing the handle are serialized by the cursor mutex.
pub struct JsonlAuditLog {
    path: PathBuf,
    cursor: Mutex<ChainCursor>,
}

impl JsonlAuditLog {
    /// Open (or create) the log, resuming the hash chain from the last line.
    ///
    /// Fails with [`GateError::AuditWrite`] while another handle, in this
    /// process or another one, has the same file open.
    pub fn open(path: &Path) -> Result<Self, GateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(GateError::IoError)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(GateError::IoError)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(GateError::AuditWrite(format!(
                    "{} is already open by another audit writer",
                    path.display()
                )));
            }
            Err(TryLockError::Error(e)) => return Err(GateError::IoError(e)),
        }

        let (next_seq, last_hash) = match read_chain(path)?.last() {
            Some(line) => (line.seq + 1, line.hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };

        debug!(path = %path.display(), next_seq, "opened jsonl audit log");
        Ok(Self {
            path: path.to_path_buf(),
            cursor: Mutex::new(ChainCursor {
                file,
                next_seq,
                last_hash,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<AuditRecord>, GateError> {
        let _guard = lock(&self.cursor);
        read_entries(&self.path)
    }

    pub fn verify_chain(&self) -> Result<usize, GateError> {
        let _guard = lock(&self.cursor);
        verify_chain(&self.path)
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), GateError> {
        let mut cursor = lock(&self.cursor);
        let seq = cursor.next_seq;
        let hash = chain_hash(&cursor.last_hash, seq, record)?;
        let line = ChainedLine {
            seq,
            record: record.clone(),
            prev_hash: cursor.last_hash.clone(),
            hash: hash.clone(),
        };
        let json = serde_json::to_string(&line)?;
        writeln!(cursor.file, "{}", json).map_err(GateError::IoError)?;
        cursor.file.flush().map_err(GateError::IoError)?;
        cursor.next_seq = seq + 1;
        cursor.last_hash = hash;
        Ok(())
    }
}

/// Parse every line of a JSONL audit file. A missing file is an empty log.
pub fn read_chain(path: &Path) -> Result<Vec<ChainedLine>, GateError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let reader = BufReader::new(File::open(path).map_err(GateError::IoError)?);
    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(GateError::IoError)?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ChainedLine = serde_json::from_str(&line).map_err(|e| {
            GateError::AuditIntegrity(format!("line {} is not a valid record: {}", idx + 1, e))
        })?;
        lines.push(parsed);
    }
    Ok(lines)
}

pub fn read_entries(path: &Path) -> Result<Vec<AuditRecord>, GateError> {
    Ok(read_chain(path)?.into_iter().map(|l| l.record).collect())
}

/// Recompute the hash chain. Returns the number of verified records.
pub fn verify_chain(path: &Path) -> Result<usize, GateError> {
    let lines = read_chain(path)?;
    let mut expected_prev = GENESIS_HASH.to_string();
    for (idx, line) in lines.iter().enumerate() {
        if line.seq != idx as u64 {
            return Err(GateError::AuditIntegrity(format!(
                "sequence gap: expected {}, found {}",
                idx, line.seq
            )));
        }
        if line.prev_hash != expected_prev {
            return Err(GateError::AuditIntegrity(format!(
                "record {} does not link to its predecessor",
                line.seq
            )));
        }
        let recomputed = chain_hash(&line.prev_hash, line.seq, &line.record)?;
        if recomputed != line.hash {
            warn!(seq = line.seq, "audit record hash mismatch");
            return Err(GateError::AuditIntegrity(format!(
                "record {} was modified after it was written",
                line.seq
            )));
        }
        expected_prev = line.hash.clone();
    }
    Ok(lines.len())
}

// --- SQLite ---

pub fn db_connect(db_path: &Path) -> Result<Connection, GateError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

fn initialize_audit_db(conn: &Connection) -> Result<(), GateError> {
    conn.execute(schemas::AUDIT_DB_SCHEMA_RECORDS, [])?;
    conn.execute(schemas::AUDIT_DB_SCHEMA_TRACE_INDEX, [])?;
    conn.execute(schemas::AUDIT_DB_TRIGGER_NO_UPDATE, [])?;
    conn.execute(schemas::AUDIT_DB_TRIGGER_NO_DELETE, [])?;
    Ok(())
}

/// Insert-only SQLite audit table.
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

fn audit_db_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(schemas::AUDIT_DB_NAME)
    } else {
        path.to_path_buf()
    }
}

impl SqliteAuditLog {
    /// Open a database file. A directory path gets `audit.db` inside it.
    pub fn open(path: &Path) -> Result<Self, GateError> {
        let db_path = audit_db_file(path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(GateError::IoError)?;
            }
        }
        let conn = db_connect(&db_path)?;
        initialize_audit_db(&conn)?;
        debug!(path = %db_path.display(), "opened sqlite audit log");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing database without creating or migrating anything.
    /// Appends through the returned handle fail.
    pub fn open_read_only(path: &Path) -> Result<Self, GateError> {
        let db_path = audit_db_file(path);
        if !db_path.is_file() {
            return Err(GateError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no audit database at {}", db_path.display()),
            )));
        }
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, GateError> {
        let conn = Connection::open_in_memory()?;
        initialize_audit_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn entries(&self) -> Result<Vec<AuditRecord>, GateError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT proposal_id, trace_id, stage, payload, ts FROM audit_records ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (proposal_id, trace_id, stage, payload, ts) = row?;
            let stage = Stage::parse(&stage).ok_or_else(|| {
                GateError::AuditIntegrity(format!("unknown stage '{}' in audit table", stage))
            })?;
            out.push(AuditRecord {
                proposal_id,
                trace_id,
                stage,
                payload: serde_json::from_str(&payload)?,
                timestamp: ts as u64,
            });
        }
        Ok(out)
    }

    /// Hand the writable connection to `f`.
    #[cfg(test)]
    fn with_conn<F, R>(&self, f: F) -> Result<R, GateError>
    where
        F: FnOnce(&Connection) -> Result<R, GateError>,
    {
        let conn = lock(&self.conn);
        f(&conn)
    }
}

impl AuditSink for SqliteAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), GateError> {
        let payload = serde_json::to_string(&record.payload)?;
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO audit_records(proposal_id, trace_id, stage, payload, ts) VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                record.proposal_id,
                record.trace_id,
                record.stage.as_str(),
                payload,
                record.timestamp as i64
            ],
        )?;
        Ok(())
    }
}
