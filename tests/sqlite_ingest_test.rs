//! Local directory to SQLite warehouse, the whole way through
//!
//! The source tree and the database live in separate temp directories so the
//! database files never show up in the catalog.

#![cfg(feature = "sqlite")]

use orbit_ingest::config::{
    FilePattern, IngestConfig, LocalSourceConfig, SourceConfig, SqliteWarehouseConfig,
    WarehouseConfig,
};
use orbit_ingest::core::{Orchestrator, TransferStatus};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, key: &str, content: &[u8]) {
    let path = root.join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config(source: &Path, db: &Path) -> IngestConfig {
    IngestConfig {
        stream_threshold: 1024,
        source: SourceConfig::Local(LocalSourceConfig {
            root: source.to_path_buf(),
            prefix: "landing/".to_string(),
        }),
        warehouse: WarehouseConfig::Sqlite(SqliteWarehouseConfig {
            path: db.to_path_buf(),
            busy_timeout_ms: 5000,
        }),
        patterns: vec![
            FilePattern::new("landing/*.csv", "CSV_FILES").with_max_file_size(64 * 1024),
            FilePattern::new("landing/*.json", "JSON_FILES"),
        ],
        ..Default::default()
    }
}

fn rows(db: &Path, table: &str) -> Vec<(String, String, i64, Vec<u8>)> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn
        .prepare(&format!(
            "SELECT s3_key, file_name, file_size, file_content FROM {} ORDER BY s3_key",
            table
        ))
        .unwrap();
    stmt.query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

#[tokio::test]
async fn test_local_to_sqlite_run() {
    let source = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db = db_dir.path().join("warehouse.db");

    let big_csv: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    write(source.path(), "landing/small.csv", b"a,b\n1,2\n");
    write(source.path(), "landing/big.csv", &big_csv);
    write(source.path(), "landing/huge.csv", &vec![b'x'; 70 * 1024]);
    write(source.path(), "landing/nested/event.json", b"{\"ok\":true}");
    write(source.path(), "landing/readme.txt", b"hello");
    write(source.path(), "elsewhere/ignored.csv", b"nope");

    let orch = Orchestrator::from_config(config(source.path(), &db))
        .await
        .unwrap();
    let report = orch.run_report().await.unwrap();

    let status = |key: &str| {
        report
            .outcomes
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.status)
    };
    assert_eq!(status("landing/small.csv"), Some(TransferStatus::Copied));
    assert_eq!(status("landing/big.csv"), Some(TransferStatus::Copied));
    assert_eq!(status("landing/huge.csv"), Some(TransferStatus::SkippedPolicy));
    assert_eq!(status("landing/nested/event.json"), Some(TransferStatus::Copied));
    assert_eq!(status("landing/readme.txt"), Some(TransferStatus::Copied));
    assert_eq!(status("elsewhere/ignored.csv"), None);

    let csv = rows(&db, "CSV_FILES");
    assert_eq!(csv.len(), 2);
    assert_eq!(csv[0].0, "landing/big.csv");
    assert_eq!(csv[0].1, "big.csv");
    assert_eq!(csv[0].2, 5000);
    assert_eq!(csv[0].3, big_csv);
    assert_eq!(csv[1].3, b"a,b\n1,2\n".to_vec());

    let json = rows(&db, "JSON_FILES");
    assert_eq!(json.len(), 1);
    assert_eq!(json[0].1, "event.json");

    let fallback = rows(&db, "S3_FILES");
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].0, "landing/readme.txt");

    assert!(!report.summary.has_failures());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let source = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db = db_dir.path().join("warehouse.db");

    write(source.path(), "landing/a.csv", b"1");
    write(source.path(), "landing/b.json", b"{}");

    let orch = Orchestrator::from_config(config(source.path(), &db))
        .await
        .unwrap();

    let first = orch.run().await.unwrap();
    assert_eq!(first.totals().copied, 2);

    let second = orch.run().await.unwrap();
    assert_eq!(second.totals().copied, 0);
    assert_eq!(second.totals().skipped_duplicate, 2);

    assert_eq!(rows(&db, "CSV_FILES").len(), 1);
    assert_eq!(rows(&db, "JSON_FILES").len(), 1);

    // A new object after the first runs is picked up alone
    write(source.path(), "landing/c.csv", b"3");
    let third = orch.run().await.unwrap();
    assert_eq!(third.totals().copied, 1);
    assert_eq!(rows(&db, "CSV_FILES").len(), 2);
}

#[tokio::test]
async fn test_parallel_sqlite_run() {
    let source = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db = db_dir.path().join("warehouse.db");

    for i in 0..12 {
        let content = vec![b'0' + (i % 10) as u8; 600 + i * 100];
        write(source.path(), &format!("landing/part-{:02}.csv", i), &content);
    }

    let mut cfg = config(source.path(), &db);
    cfg.parallel = 3;
    let summary = Orchestrator::from_config(cfg)
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.table("CSV_FILES").copied, 12);
    let stored = rows(&db, "CSV_FILES");
    assert_eq!(stored.len(), 12);
    for (i, row) in stored.iter().enumerate() {
        assert_eq!(row.2 as usize, 600 + i * 100);
        assert_eq!(row.3.len(), row.2 as usize);
    }
}

#[tokio::test]
async fn test_plan_creates_tables_but_no_rows() {
    let source = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db = db_dir.path().join("warehouse.db");

    write(source.path(), "landing/a.csv", b"1");

    let orch = Orchestrator::from_config(config(source.path(), &db))
        .await
        .unwrap();
    let plan = orch.plan().await.unwrap();

    assert_eq!(plan.transfer_count(), 1);
    assert!(rows(&db, "CSV_FILES").is_empty());
}

#[tokio::test]
async fn test_missing_source_root_fails_check() {
    let db_dir = TempDir::new().unwrap();
    let missing = db_dir.path().join("does-not-exist");

    let orch = Orchestrator::from_config(config(&missing, &db_dir.path().join("w.db")))
        .await
        .unwrap();
    let err = orch.check().await.unwrap_err();
    assert!(err.is_fatal());
}
