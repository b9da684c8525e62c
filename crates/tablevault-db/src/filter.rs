//! Row selection predicates.

use tablevault_types::window::ArchiveWindow;

/// Rows a dump, count or delete applies to.
///
/// Window bounds are always bound as parameters, never interpolated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// Rows whose `column` lies in `[window.start, window.end)`.
    Window {
        column: String,
        window: ArchiveWindow,
    },
    /// Every row of the table.
    All,
}

impl RowFilter {
    #[must_use]
    pub fn window(column: impl Into<String>, window: ArchiveWindow) -> Self {
        Self::Window {
            column: column.into(),
            window,
        }
    }

    /// The window, if this filter is windowed.
    #[must_use]
    pub fn archive_window(&self) -> Option<&ArchiveWindow> {
        match self {
            Self::Window { window, .. } => Some(window),
            Self::All => None,
        }
    }
}

impl std::fmt::Display for RowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Window { column, window } => write!(f, "{column} in {window}"),
            Self::All => f.write_str("all rows"),
        }
    }
}
