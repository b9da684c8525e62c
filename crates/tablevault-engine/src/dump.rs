//! Dump engine: writes one object's matching rows into an artifact.
//!
//! Output lands in `{path}.partial` first and is renamed into place only
//! after it is flushed and fsynced, so a visible artifact is always
//! complete. The partial file is removed on every other exit path.
//!
//! An existing artifact is never replaced. A rerun that produces the same
//! bytes reuses the file already in place; any other content lands in the
//! first free `_{n}` sibling of the layout path.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tablevault_db::{DatabaseError, SourceDatabase, StatementSink};
use tablevault_types::artifact::{ArtifactLayout, DumpArtifact, DumpMode};
use tablevault_types::error::ObjectError;
use tokio_util::sync::CancellationToken;

use crate::planner::ObjectPlan;

/// Suffix of in-progress artifacts; excluded from sync.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Removes the partial file unless committed.
struct PartialArtifact {
    path: PathBuf,
    committed: bool,
}

impl PartialArtifact {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialArtifact {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial artifact"
            ),
        }
    }
}

struct FileSink<'a> {
    writer: BufWriter<File>,
    cancel: &'a CancellationToken,
}

impl StatementSink for FileSink<'_> {
    fn write_statement(&mut self, statement: &str) -> Result<(), DatabaseError> {
        if self.cancel.is_cancelled() {
            return Err(DatabaseError::Cancelled);
        }
        self.writer.write_all(statement.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// `orders_full_t.sql` -> `orders_full_t_{sequence}.sql`; sequence 0 is the path itself.
fn sequenced_path(path: &Path, sequence: u32) -> PathBuf {
    if sequence == 0 {
        return path.to_path_buf();
    }
    let mut name = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(format!("_{sequence}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    let mut left = BufReader::new(File::open(a)?);
    let mut right = BufReader::new(File::open(b)?);
    let mut lbuf = [0_u8; 8192];
    let mut rbuf = [0_u8; 8192];
    loop {
        let n = left.read(&mut lbuf)?;
        if n == 0 {
            return Ok(true);
        }
        right.read_exact(&mut rbuf[..n])?;
        if lbuf[..n] != rbuf[..n] {
            return Ok(false);
        }
    }
}

enum Placement {
    /// An artifact with identical bytes is already in place.
    Existing(PathBuf),
    Free(PathBuf),
}

fn place(finished: &Path, base: &Path) -> io::Result<Placement> {
    let mut sequence = 0_u32;
    loop {
        let candidate = sequenced_path(base, sequence);
        if !candidate.exists() {
            return Ok(Placement::Free(candidate));
        }
        if same_contents(finished, &candidate)? {
            return Ok(Placement::Existing(candidate));
        }
        sequence = sequence.checked_add(1).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free artifact name next to {}", base.display()),
            )
        })?;
    }
}

/// Writes artifacts for one run under a shared root, database and tag.
#[derive(Debug, Clone)]
pub struct DumpEngine {
    root: PathBuf,
    database: String,
    layout: ArtifactLayout,
    tag: String,
}

impl DumpEngine {
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        database: impl Into<String>,
        layout: ArtifactLayout,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            database: database.into(),
            layout,
            tag: tag.into(),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn artifact_path(&self, table: &str, mode: DumpMode) -> PathBuf {
        self.layout
            .artifact_path(&self.root, &self.database, table, mode, &self.tag)
    }

    /// Dump the rows selected by `plan`.
    ///
    /// Returns `Ok(None)` when the dump found no rows; no file is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::DumpFailed`] on I/O or query failure, or when
    /// cancelled mid-dump.
    pub fn dump(
        &self,
        source: &dyn SourceDatabase,
        plan: &ObjectPlan,
        cancel: &CancellationToken,
    ) -> Result<Option<DumpArtifact>, ObjectError> {
        let table = plan.entry.table_name.as_str();
        let failed = |message: String| ObjectError::DumpFailed {
            table: table.to_string(),
            message,
        };

        let base = self.artifact_path(table, plan.mode);
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| failed(format!("creating {}: {e}", parent.display())))?;
        }

        let partial = PartialArtifact::new(partial_path(&base));
        let file = File::create(&partial.path)
            .map_err(|e| failed(format!("creating {}: {e}", partial.path.display())))?;
        let mut sink = FileSink {
            writer: BufWriter::new(file),
            cancel,
        };

        let header = format!(
            "-- tablevault dump\n-- database: {}\n-- table: {table}\n-- mode: {}\n-- filter: {}\n-- tag: {}\n",
            self.database, plan.mode, plan.filter, self.tag
        );
        sink.writer
            .write_all(header.as_bytes())
            .map_err(|e| failed(format!("writing header: {e}")))?;

        let rows = source
            .dump_rows(table, &plan.entry.key_column, &plan.filter, &mut sink)
            .map_err(|e| failed(e.to_string()))?;

        if rows == 0 {
            tracing::info!(
                table,
                filter = %plan.filter,
                "Dump found no rows, leaving no artifact"
            );
            return Ok(None);
        }
        if rows != plan.matched_rows {
            tracing::warn!(
                table,
                counted = plan.matched_rows,
                dumped = rows,
                "Row count changed between planning and dump; using dumped count"
            );
        }

        writeln!(sink.writer, "-- end of dump: {rows} row(s)")
            .map_err(|e| failed(format!("writing footer: {e}")))?;
        let file = sink
            .writer
            .into_inner()
            .map_err(|e| failed(format!("flushing: {}", e.error())))?;
        file.sync_all()
            .map_err(|e| failed(format!("fsync {}: {e}", partial.path.display())))?;
        drop(file);

        let placement = place(&partial.path, &base)
            .map_err(|e| failed(format!("placing artifact next to {}: {e}", base.display())))?;
        let path = match placement {
            Placement::Existing(path) => {
                tracing::info!(
                    table,
                    rows,
                    path = %path.display(),
                    "Identical artifact already present, reusing it"
                );
                path
            }
            Placement::Free(path) => {
                fs::rename(&partial.path, &path).map_err(|e| {
                    failed(format!(
                        "renaming {} to {}: {e}",
                        partial.path.display(),
                        path.display()
                    ))
                })?;
                partial.commit();
                if path != base {
                    tracing::info!(
                        table,
                        taken = %base.display(),
                        "Artifact name already taken for this tag, using next sequence"
                    );
                }
                tracing::info!(
                    table,
                    rows,
                    mode = %plan.mode,
                    path = %path.display(),
                    "Artifact written"
                );
                path
            }
        };
        Ok(Some(DumpArtifact {
            path,
            object: table.to_string(),
            tag: self.tag.clone(),
            mode: plan.mode,
            row_count: rows,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use rusqlite::Connection;
    use tablevault_db::{RowFilter, SqliteDatabase};
    use tablevault_types::registry::RegistryEntry;
    use tablevault_types::window::ArchiveWindow;
    use tempfile::tempdir;

    fn source() -> SqliteDatabase {
        source_with("")
    }

    fn source_with(extra: &str) -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, note TEXT, created_at TEXT);
             INSERT INTO orders VALUES (2, 'b', '2023-01-05 00:00:00'), (1, 'a', '2023-01-01 00:00:00');
             CREATE TABLE broken (id INTEGER, \"bad col\" TEXT, created_at TEXT);
             INSERT INTO broken VALUES (1, 'x', '2023-01-02 00:00:00');",
        )
        .unwrap();
        conn.execute_batch(extra).unwrap();
        SqliteDatabase::from_connection(conn, "shop")
    }

    fn january() -> ArchiveWindow {
        ArchiveWindow::new(
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn plan(table: &str, mode: DumpMode, window: ArchiveWindow, matched: u64) -> ObjectPlan {
        ObjectPlan {
            entry: RegistryEntry::new(table, "id"),
            mode,
            filter: RowFilter::window("created_at", window),
            window: Some(window),
            matched_rows: matched,
            checkpoint_to: Some(window.end()),
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .map(Result::unwrap)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    #[test]
    fn writes_ordered_insert_statements() {
        let dir = tempdir().unwrap();
        let engine = DumpEngine::new(dir.path(), "shop", ArtifactLayout::Checkpointed, "2023-02-01");
        let artifact = engine
            .dump(
                &source(),
                &plan("orders", DumpMode::Full, january(), 2),
                &CancellationToken::new(),
            )
            .unwrap()
            .unwrap();

        assert_eq!(artifact.row_count, 2);
        assert_eq!(
            artifact.path,
            dir.path().join("shop/orders/full/2023-02-01/orders_full_2023-02-01.sql")
        );
        let body = fs::read_to_string(&artifact.path).unwrap();
        let inserts: Vec<&str> = body.lines().filter(|l| l.starts_with("INSERT")).collect();
        assert_eq!(inserts.len(), 2);
        assert!(inserts[0].contains("VALUES (1, "), "rows must be ordered by key: {body}");
        assert!(body.starts_with("-- tablevault dump"));
        assert!(!partial_path(&artifact.path).exists());
    }

    #[test]
    fn empty_dump_leaves_no_file() {
        let dir = tempdir().unwrap();
        let engine = DumpEngine::new(dir.path(), "shop", ArtifactLayout::Simple, "t");
        let window = ArchiveWindow::new(
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let result = engine
            .dump(
                &source(),
                &plan("orders", DumpMode::Full, window, 1),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(result.is_none());
        assert!(files_under(dir.path()).is_empty());
    }

    #[test]
    fn failed_dump_removes_partial() {
        let dir = tempdir().unwrap();
        let engine = DumpEngine::new(dir.path(), "shop", ArtifactLayout::Simple, "t");
        let p = plan("broken", DumpMode::Full, january(), 1);
        let err = engine.dump(&source(), &p, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind(), "dump_failed");
        assert!(files_under(dir.path()).is_empty());
    }

    #[test]
    fn cancelled_dump_removes_partial() {
        let dir = tempdir().unwrap();
        let engine = DumpEngine::new(dir.path(), "shop", ArtifactLayout::Simple, "t");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .dump(&source(), &plan("orders", DumpMode::Full, january(), 2), &cancel)
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"), "got: {err}");
        assert!(files_under(dir.path()).is_empty());
    }

    #[rstest]
    #[case(DumpMode::Full)]
    #[case(DumpMode::Incremental)]
    fn differing_rerun_takes_next_sequence(#[case] mode: DumpMode) {
        let dir = tempdir().unwrap();
        let engine = DumpEngine::new(dir.path(), "shop", ArtifactLayout::Checkpointed, "t");
        let p = plan("orders", mode, january(), 2);
        let first = engine.dump(&source(), &p, &CancellationToken::new()).unwrap().unwrap();
        let before = fs::read(&first.path).unwrap();

        let late = source_with("INSERT INTO orders VALUES (3, 'c', '2023-01-20 00:00:00');");
        let second = engine
            .dump(&late, &plan("orders", mode, january(), 3), &CancellationToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(fs::read(&first.path).unwrap(), before);
        assert_eq!(second.path, sequenced_path(&first.path, 1));
        assert_eq!(
            second.path.file_name().unwrap().to_string_lossy(),
            format!("orders_{mode}_t_1.sql")
        );
        assert_eq!(second.row_count, 3);
        assert_eq!(files_under(dir.path()).len(), 2);
    }

    #[test]
    fn identical_rerun_reuses_existing_artifact() {
        let dir = tempdir().unwrap();
        let engine = DumpEngine::new(dir.path(), "shop", ArtifactLayout::Checkpointed, "t");
        let p = plan("orders", DumpMode::Full, january(), 2);
        let first = engine.dump(&source(), &p, &CancellationToken::new()).unwrap().unwrap();
        let before = fs::read(&first.path).unwrap();
        let second = engine.dump(&source(), &p, &CancellationToken::new()).unwrap().unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(fs::read(&second.path).unwrap(), before);
        assert_eq!(files_under(dir.path()), vec![first.path]);
    }

    #[test]
    fn sequence_goes_before_the_extension() {
        assert_eq!(
            sequenced_path(Path::new("/a/orders_t.sql"), 2),
            PathBuf::from("/a/orders_t_2.sql")
        );
        assert_eq!(
            sequenced_path(Path::new("/a/orders_t.sql"), 0),
            PathBuf::from("/a/orders_t.sql")
        );
    }

    #[test]
    fn partial_suffix_is_appended() {
        assert_eq!(
            partial_path(Path::new("/a/orders_t.sql")),
            PathBuf::from("/a/orders_t.sql.partial")
        );
    }
}
