//! SQLite schema definitions for the audit store.

pub const AUDIT_DB_NAME: &str = "audit.db";

pub const AUDIT_DB_SCHEMA_RECORDS: &str = "
    CREATE TABLE IF NOT EXISTS audit_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        proposal_id TEXT NOT NULL,
        trace_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        payload TEXT NOT NULL,
        ts INTEGER NOT NULL
    )
";
pub const AUDIT_DB_SCHEMA_TRACE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_records_trace ON audit_records(trace_id)";

/// Rejects any UPDATE or DELETE so the table stays append-only even for
/// callers holding a raw connection.
pub const AUDIT_DB_TRIGGER_NO_UPDATE: &str = "
    CREATE TRIGGER IF NOT EXISTS audit_records_no_update
    BEFORE UPDATE ON audit_records
    BEGIN
        SELECT RAISE(ABORT, 'audit_records is append-only');
    END
";
pub const AUDIT_DB_TRIGGER_NO_DELETE: &str = "
    CREATE TRIGGER IF NOT EXISTS audit_records_no_delete
    BEFORE DELETE ON audit_records
    BEGIN
        SELECT RAISE(ABORT, 'audit_records is append-only');
    END
";
