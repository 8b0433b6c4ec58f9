use std::io::Write;
use std::sync::Arc;
use stewardgate::core::audit::{
    self, AuditRecord, AuditSink, GENESIS_HASH, JsonlAuditLog, SqliteAuditLog, Stage,
};
use stewardgate::core::config::{AuditBackend, AuditConfig, GateConfig};
use stewardgate::core::error::{DecisionError, ExecutionError, GateError};
use stewardgate::core::model::{Proposal, ProposalRequest};
use stewardgate::gate::Gate;
use stewardgate::plugins::coordinator::{Explanation, Verdict};
use tempfile::tempdir;

fn config() -> GateConfig {
    GateConfig::default()
        .allow("turn_on", "light.kitchen")
        .safe_domain("lights")
}

fn run_lifecycle(gate: &Gate) -> Proposal {
    let p = gate
        .propose(
            ProposalRequest::new("agent", "turn_on", "light.kitchen", "lights", "dusk")
                .rollback_plan("turn_off light.kitchen"),
        )
        .unwrap();
    let d = gate
        .decide(&p, "steward", &|_: &Explanation| -> Result<Option<Verdict>, DecisionError> {
            Ok(None)
        })
        .unwrap();
    let r = gate
        .execute(&p, &d, &|_: &Proposal| -> Result<String, ExecutionError> {
            Ok("on".to_string())
        })
        .unwrap();
    gate.learn(&p, &r, None).unwrap();
    p
}

#[test]
fn test_jsonl_log_chains_every_stage() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit").join("audit.jsonl");
    let log = Arc::new(JsonlAuditLog::open(&path).unwrap());
    let gate = Gate::new(config(), log.clone()).unwrap();

    let p = run_lifecycle(&gate);

    let records = log.entries().unwrap();
    let stages: Vec<Stage> = records.iter().map(|r| r.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert!(records.iter().all(|r| r.trace_id == p.trace_id()));
    assert_eq!(log.verify_chain().unwrap(), 5);

    let chain = audit::read_chain(&path).unwrap();
    assert_eq!(chain[0].prev_hash, GENESIS_HASH);
    for pair in chain.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }
}

#[test]
fn test_reopened_log_continues_the_chain() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");

    {
        let log = Arc::new(JsonlAuditLog::open(&path).unwrap());
        let gate = Gate::new(config(), log).unwrap();
        run_lifecycle(&gate);
    }
    {
        let log = Arc::new(JsonlAuditLog::open(&path).unwrap());
        let gate = Gate::new(config(), log).unwrap();
        run_lifecycle(&gate);
    }

    assert_eq!(audit::verify_chain(&path).unwrap(), 10);
    let chain = audit::read_chain(&path).unwrap();
    assert_eq!(chain.last().unwrap().seq, 9);
}

#[test]
fn test_tampered_record_is_detected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let log = Arc::new(JsonlAuditLog::open(&path).unwrap());
    let gate = Gate::new(config(), log).unwrap();
    run_lifecycle(&gate);

    let pristine = std::fs::read_to_string(&path).unwrap();
    let forged = pristine.replacen("\"SUCCESS\"", "\"FAILURE\"", 1);
    assert_ne!(pristine, forged);
    std::fs::write(&path, forged).unwrap();

    let err = audit::verify_chain(&path).unwrap_err();
    assert!(matches!(err, GateError::AuditIntegrity(_)));
}

#[test]
fn test_dropped_record_is_detected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let log = Arc::new(JsonlAuditLog::open(&path).unwrap());
    let gate = Gate::new(config(), log).unwrap();
    run_lifecycle(&gate);

    let pristine = std::fs::read_to_string(&path).unwrap();
    let without_second: Vec<&str> = pristine
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, l)| l)
        .collect();
    std::fs::write(&path, without_second.join("\n") + "\n").unwrap();

    assert!(matches!(
        audit::verify_chain(&path),
        Err(GateError::AuditIntegrity(_))
    ));
}

#[test]
fn test_garbage_line_is_an_integrity_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "not json").unwrap();
    assert!(matches!(
        audit::read_chain(&path),
        Err(GateError::AuditIntegrity(_))
    ));
}

#[test]
fn test_missing_file_is_an_empty_log() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("nothing-here.jsonl");
    assert_eq!(audit::verify_chain(&path).unwrap(), 0);
    assert!(audit::read_entries(&path).unwrap().is_empty());
}

#[test]
fn test_sqlite_log_keeps_stage_order() {
    let tmp = tempdir().unwrap();
    let log = Arc::new(SqliteAuditLog::open(tmp.path()).unwrap());
    let gate = Gate::new(config(), log.clone()).unwrap();

    let first = run_lifecycle(&gate);
    let second = run_lifecycle(&gate);

    let records = log.entries().unwrap();
    assert_eq!(records.len(), 10);
    assert!(records[..5].iter().all(|r| r.proposal_id == first.proposal_id()));
    assert!(records[5..].iter().all(|r| r.proposal_id == second.proposal_id()));
    assert_eq!(records[3].stage, Stage::Executed);
    assert_eq!(records[3].payload["details"], "on");
    assert!(tmp.path().join("audit.db").exists());
}

#[test]
fn test_open_sink_follows_backend() {
    let tmp = tempdir().unwrap();
    let jsonl = AuditConfig {
        backend: AuditBackend::Jsonl,
        path: tmp.path().join("a.jsonl"),
    };
    let sink = audit::open_sink(&jsonl).unwrap();
    let gate = Gate::new(config(), sink).unwrap();
    run_lifecycle(&gate);
    assert_eq!(audit::verify_chain(&jsonl.path).unwrap(), 5);

    let sqlite = AuditConfig {
        backend: AuditBackend::Sqlite,
        path: tmp.path().join("a.db"),
    };
    audit::open_sink(&sqlite).unwrap();
    assert!(sqlite.path.exists());
}

#[test]
fn test_sensitive_payload_keys_are_masked_on_disk() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let log = JsonlAuditLog::open(&path).unwrap();

    let p = ProposalRequest::new("agent", "rotate", "wifi.guest", "network", "")
        .build()
        .unwrap();
    let record = AuditRecord::for_proposal(
        &p,
        Stage::Learning,
        serde_json::json!({
            "note": "rotated",
            "api_key": "sk-live-0123456789abcdef",
            "nested": { "password": "hunter2" }
        }),
    );
    log.append(&record).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("sk-live-0123456789abcdef"));
    assert!(!raw.contains("hunter2"));
    assert!(raw.contains("rotated"));
    assert_eq!(log.verify_chain().unwrap(), 1);
}

#[test]
fn test_second_writer_on_one_file_is_refused() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let p = ProposalRequest::new("agent", "turn_on", "light.kitchen", "lights", "")
        .build()
        .unwrap();

    let first = JsonlAuditLog::open(&path).unwrap();
    first
        .append(&AuditRecord::for_proposal(&p, Stage::Proposed, serde_json::json!({})))
        .unwrap();

    match JsonlAuditLog::open(&path) {
        Err(GateError::AuditWrite(msg)) => assert!(msg.contains("already open")),
        other => panic!("expected AuditWrite, got {:?}", other.map(|_| ())),
    }

    first
        .append(&AuditRecord::for_proposal(&p, Stage::Explained, serde_json::json!({})))
        .unwrap();
    drop(first);

    let second = JsonlAuditLog::open(&path).unwrap();
    second
        .append(&AuditRecord::for_proposal(&p, Stage::Decided, serde_json::json!({})))
        .unwrap();
    assert_eq!(second.verify_chain().unwrap(), 3);
}

#[test]
fn test_read_only_sqlite_open_leaves_the_filesystem_alone() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("missing.db");
    assert!(SqliteAuditLog::open_read_only(&missing).is_err());
    assert!(!missing.exists());

    let db = tmp.path().join("audit.db");
    {
        let log = Arc::new(SqliteAuditLog::open(&db).unwrap());
        let gate = Gate::new(config(), log).unwrap();
        run_lifecycle(&gate);
    }

    let reader = SqliteAuditLog::open_read_only(&db).unwrap();
    assert_eq!(reader.entries().unwrap().len(), 5);

    let p = ProposalRequest::new("agent", "turn_on", "light.kitchen", "lights", "")
        .build()
        .unwrap();
    let write = reader.append(&AuditRecord::for_proposal(
        &p,
        Stage::Proposed,
        serde_json::json!({}),
    ));
    assert!(write.is_err());
    assert_eq!(reader.entries().unwrap().len(), 5);
}
