#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tablevault_engine::config::parser::parse_archive_str;
use tablevault_engine::config::types::ArchiveConfig;
use tablevault_engine::config::validator::validate_archive;
use tablevault_engine::resolve::resolve_context;
use tablevault_engine::{ArchiveContext, CancellationToken, ExecutionOptions};
use tempfile::TempDir;

/// Five January rows, one on each side of the window, two later in February.
pub const SHOP_SQL: &str = "
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer TEXT,
    total REAL,
    created_at TEXT NOT NULL
);
INSERT INTO orders VALUES (1, 'Ada', 10.5, '2022-12-31 23:59:59');
INSERT INTO orders VALUES (2, 'Grace', 20.0, '2023-01-01 00:00:00');
INSERT INTO orders VALUES (3, 'O''Brien', 7.25, '2023-01-09 08:15:00');
INSERT INTO orders VALUES (4, NULL, 0.0, '2023-01-15 12:00:00');
INSERT INTO orders VALUES (5, 'Linus', 99.99, '2023-01-28 17:45:10');
INSERT INTO orders VALUES (6, 'Barbara', 3.0, '2023-01-31 23:59:59');
INSERT INTO orders VALUES (7, 'Ken', 1.0, '2023-02-01 00:00:00');
INSERT INTO orders VALUES (8, 'Dennis', 2.0, '2023-02-10 09:00:00');
INSERT INTO orders VALUES (9, 'Edsger', 4.0, '2023-02-10 10:00:00');
CREATE VIEW order_view AS SELECT id, created_at FROM orders;
CREATE TABLE archive_manager (table_name TEXT, key_column TEXT);
INSERT INTO archive_manager VALUES ('orders', 'id'), ('order_view', 'id');
";

pub const ORDERS_DDL: &str =
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, total REAL, created_at TEXT NOT NULL);";

pub const JANUARY: &str = "window:\n  start: 2023-01-01\n  end: 2023-02-01\n";

pub fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Run options pinned to noon on 2023-02-01, giving tag `2023-02-01`.
pub fn options_at(now: DateTime<Utc>) -> ExecutionOptions {
    ExecutionOptions {
        now: Some(now),
        ..ExecutionOptions::default()
    }
}

pub fn options() -> ExecutionOptions {
    options_at(Utc.with_ymd_and_hms(2023, 2, 1, 12, 0, 0).unwrap())
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn shop() -> Self {
        let fixture = Self::new();
        fixture.execute(&fixture.source_path(), SHOP_SQL);
        fixture
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn source_path(&self) -> PathBuf {
        self.path("shop.db")
    }

    pub fn dump_root(&self) -> PathBuf {
        self.path("work/dumps")
    }

    pub fn execute(&self, db: &Path, sql: &str) {
        Connection::open(db).unwrap().execute_batch(sql).unwrap();
    }

    pub fn count(&self, db: &Path, sql: &str) -> i64 {
        Connection::open(db)
            .unwrap()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    /// Validated config with `window` (a full `window:` block) and `extra` YAML.
    pub fn config(&self, window: &str, extra: &str) -> ArchiveConfig {
        let yaml = format!(
            "version: \"1.0\"\narchive: nightly\nsource:\n  driver: sqlite\n  path: {}\nwork_dir: {}\n{window}{extra}",
            self.source_path().display(),
            self.path("work").display(),
        );
        let config = parse_archive_str(&yaml).unwrap();
        validate_archive(&config).unwrap();
        config
    }

    pub fn context(&self, config: &ArchiveConfig) -> ArchiveContext {
        resolve_context(config, CancellationToken::new()).unwrap()
    }

    /// Every file under the dump root, relative to it, sorted.
    pub fn artifacts(&self) -> Vec<String> {
        let root = self.dump_root();
        let mut out: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        out.sort();
        out
    }

    pub fn insert_lines(&self, artifact: &str) -> Vec<String> {
        std::fs::read_to_string(self.dump_root().join(artifact))
            .unwrap()
            .lines()
            .filter(|l| l.starts_with("INSERT"))
            .map(String::from)
            .collect()
    }
}
