//! Window planning: per-object eligibility, window and match count.

use anyhow::{anyhow, bail, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, FixedOffset, Months, NaiveDate, TimeZone, Utc};
use tablevault_db::{RowFilter, SourceDatabase};
use tablevault_state::CheckpointStore;
use tablevault_types::artifact::DumpMode;
use tablevault_types::checkpoint::CheckpointScope;
use tablevault_types::error::ObjectError;
use tablevault_types::registry::{ObjectKind, RegistryEntry};
use tablevault_types::window::ArchiveWindow;

use crate::config::types::{MissingColumnPolicy, WindowConfig};

/// Window settings resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub mode: DumpMode,
    /// Run reference time.
    pub now: DateTime<Utc>,
    /// Artifact tag shared by every object in the run.
    pub tag: String,
    pub timestamp_column: String,
    pub missing_column: MissingColumnPolicy,
    /// Fixed window applied to every table in full mode.
    pub full_window: Option<ArchiveWindow>,
    /// Incremental start used when a table has no checkpoint yet.
    pub incremental_floor: DateTime<Utc>,
    /// Incremental end shared by every table.
    pub incremental_end: DateTime<Utc>,
}

impl RunPlan {
    /// End of the run's window, recorded as the database-scope checkpoint.
    #[must_use]
    pub fn global_end(&self) -> DateTime<Utc> {
        match (self.mode, self.full_window) {
            (DumpMode::Full, Some(window)) => window.end(),
            _ => self.incremental_end,
        }
    }
}

/// First instant of the calendar month before the one containing `now`,
/// and the first instant of `now`'s month, both in `offset`.
///
/// # Errors
///
/// Returns an error if either bound does not exist in `offset`.
pub fn previous_month(now: DateTime<Utc>, offset: FixedOffset) -> Result<ArchiveWindow> {
    let local = now.with_timezone(&offset);
    let this_month = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)
        .ok_or_else(|| anyhow!("invalid calendar date for {local}"))?;
    let last_month = this_month
        .checked_sub_months(Months::new(1))
        .ok_or_else(|| anyhow!("no month before {this_month}"))?;
    let to_utc = |date: NaiveDate| -> Result<DateTime<Utc>> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid midnight for {date}"))?;
        offset
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| anyhow!("{date} is ambiguous in offset {offset}"))
    };
    Ok(ArchiveWindow::new(to_utc(last_month)?, to_utc(this_month)?)?)
}

/// Render the run tag for `now`.
///
/// # Errors
///
/// Returns an error if `format` is not a valid `strftime` pattern.
pub fn render_tag(now: DateTime<Utc>, format: &str, offset: FixedOffset) -> Result<String> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        bail!("invalid tag_format '{format}'");
    }
    Ok(now.with_timezone(&offset).format(format).to_string())
}

/// Resolve the run-wide window settings at reference time `now`.
///
/// # Errors
///
/// Returns an error for malformed bounds, offset or tag format, or an
/// inverted full-mode window.
pub fn resolve_run_plan(config: &WindowConfig, now: DateTime<Utc>) -> Result<RunPlan> {
    let offset = config.offset()?;
    let start = config.start_at()?;
    let end = config.end_at()?;

    let full_window = match config.mode {
        DumpMode::Full => Some(match (start, end) {
            (Some(s), Some(e)) => ArchiveWindow::new(s, e)?,
            (None, None) => previous_month(now, offset)?,
            _ => bail!("full mode needs both window.start and window.end, or neither"),
        }),
        DumpMode::Incremental => None,
    };

    Ok(RunPlan {
        mode: config.mode,
        now,
        tag: render_tag(now, &config.tag_format, offset)?,
        timestamp_column: config.timestamp_column.clone(),
        missing_column: config.missing_column,
        full_window,
        incremental_floor: start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        incremental_end: end.unwrap_or(now),
    })
}

/// Why an object is not archived this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    View,
    Missing,
    MissingTimestampColumn,
    MissingKeyColumn,
    /// Timestamp column holds values the window bounds cannot be compared with.
    UnsupportedTimestampType,
    /// Incremental window collapsed (`start >= end`).
    EmptyWindow,
    NoMatchingRows,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Missing => "missing",
            Self::MissingTimestampColumn => "missing_timestamp_column",
            Self::MissingKeyColumn => "missing_key_column",
            Self::UnsupportedTimestampType => "unsupported_timestamp_type",
            Self::EmptyWindow => "empty_window",
            Self::NoMatchingRows => "no_matching_rows",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A skip, with the checkpoint to record despite skipping (zero-match
/// incremental windows only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipDecision {
    pub reason: SkipReason,
    pub window: Option<ArchiveWindow>,
    pub checkpoint_to: Option<DateTime<Utc>>,
}

/// An object selected for archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPlan {
    pub entry: RegistryEntry,
    pub mode: DumpMode,
    pub filter: RowFilter,
    /// `None` for whole-table fallback dumps.
    pub window: Option<ArchiveWindow>,
    /// Pre-count; the dump's own count is authoritative.
    pub matched_rows: u64,
    /// Table checkpoint to record after a successful dump.
    pub checkpoint_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Archive(ObjectPlan),
    Skip(SkipDecision),
}

/// Decides, per registry entry, whether and what to archive.
pub struct WindowPlanner<'a> {
    plan: &'a RunPlan,
    source: &'a dyn SourceDatabase,
    checkpoints: &'a dyn CheckpointStore,
}

impl<'a> WindowPlanner<'a> {
    #[must_use]
    pub fn new(
        plan: &'a RunPlan,
        source: &'a dyn SourceDatabase,
        checkpoints: &'a dyn CheckpointStore,
    ) -> Self {
        Self {
            plan,
            source,
            checkpoints,
        }
    }

    fn skip(reason: SkipReason) -> PlanDecision {
        PlanDecision::Skip(SkipDecision {
            reason,
            window: None,
            checkpoint_to: None,
        })
    }

    /// Plan one registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::SchemaIntrospectionFailed`] when the object
    /// cannot be described, [`ObjectError::CheckpointFailed`] when its
    /// checkpoint cannot be read, and [`ObjectError::DumpFailed`] when the
    /// window cannot be counted.
    pub fn plan(&self, entry: &RegistryEntry) -> Result<PlanDecision, ObjectError> {
        let table = entry.table_name.as_str();
        let description = self
            .source
            .describe(table)
            .map_err(|e| ObjectError::SchemaIntrospectionFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?;

        let Some(description) = description else {
            return Ok(Self::skip(SkipReason::Missing));
        };
        if description.kind == ObjectKind::View {
            return Ok(Self::skip(SkipReason::View));
        }

        let has_timestamp = description.has_column(&self.plan.timestamp_column);
        let fallback = !has_timestamp
            && self.plan.mode == DumpMode::Incremental
            && self.plan.missing_column == MissingColumnPolicy::FullDump;
        if !has_timestamp && !fallback {
            return Ok(Self::skip(SkipReason::MissingTimestampColumn));
        }
        if let Some(column) = description.column(&self.plan.timestamp_column) {
            if !self.source.supports_window_column(column) {
                tracing::warn!(
                    table,
                    column = column.name,
                    declared_type = column.declared_type,
                    "Timestamp column type cannot be compared with the window, skipping"
                );
                return Ok(Self::skip(SkipReason::UnsupportedTimestampType));
            }
        }
        if !description.has_column(&entry.key_column) {
            return Ok(Self::skip(SkipReason::MissingKeyColumn));
        }

        let (mode, window) = if fallback {
            (DumpMode::Full, None)
        } else {
            match self.effective_window(table)? {
                Some(window) => (self.plan.mode, Some(window)),
                None => return Ok(Self::skip(SkipReason::EmptyWindow)),
            }
        };
        let filter = window.map_or(RowFilter::All, |w| {
            RowFilter::window(self.plan.timestamp_column.clone(), w)
        });

        let matched_rows =
            self.source
                .count_rows(table, &filter)
                .map_err(|e| ObjectError::DumpFailed {
                    table: table.to_string(),
                    message: format!("counting {filter}: {e}"),
                })?;

        let checkpoint_to = window.map(|w| w.end());
        if matched_rows == 0 {
            return Ok(PlanDecision::Skip(SkipDecision {
                reason: SkipReason::NoMatchingRows,
                window,
                checkpoint_to: checkpoint_to.filter(|_| mode == DumpMode::Incremental),
            }));
        }

        Ok(PlanDecision::Archive(ObjectPlan {
            entry: entry.clone(),
            mode,
            filter,
            window,
            matched_rows,
            checkpoint_to,
        }))
    }

    /// `None` when the incremental window has collapsed.
    fn effective_window(&self, table: &str) -> Result<Option<ArchiveWindow>, ObjectError> {
        if let (DumpMode::Full, Some(window)) = (self.plan.mode, self.plan.full_window) {
            return Ok(Some(window));
        }
        let start = self
            .checkpoints
            .get(CheckpointScope::Table, table)
            .map_err(|e| ObjectError::CheckpointFailed {
                table: table.to_string(),
                message: format!("reading checkpoint: {e}"),
            })?
            .unwrap_or(self.plan.incremental_floor);
        Ok(ArchiveWindow::new(start, self.plan.incremental_end).ok())
    }
}
