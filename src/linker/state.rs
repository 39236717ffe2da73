//! Linker construction states.

use std::fmt;

/// Last completed construction step of a linker.
///
/// Steps strictly follow declaration order. Together with the linker's
/// cursor this is everything needed to resume construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkerState {
    Created,
    LoaderOpened,
    SummaryParsed,
    NameTableParsed,
    ImportTableParsed,
    ImportTableFixedUp,
    ExportTableParsed,
    DependsTableParsed,
    ExportHashBuilt,
    ExistingObjectsMatched,
    Finalized,
}

impl LinkerState {
    pub const ALL: [LinkerState; 11] = [
        Self::Created,
        Self::LoaderOpened,
        Self::SummaryParsed,
        Self::NameTableParsed,
        Self::ImportTableParsed,
        Self::ImportTableFixedUp,
        Self::ExportTableParsed,
        Self::DependsTableParsed,
        Self::ExportHashBuilt,
        Self::ExistingObjectsMatched,
        Self::Finalized,
    ];

    #[inline]
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// State after this one; `Finalized` is terminal.
    pub fn next(self) -> Self {
        Self::ALL.get(self.ordinal() + 1).copied().unwrap_or(Self::Finalized)
    }

    /// Completed share of construction in `[0, 1]`.
    pub fn fraction(self) -> f32 {
        self.ordinal() as f32 / Self::Finalized.ordinal() as f32
    }
}

impl fmt::Display for LinkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a budgeted tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Complete,
    /// Out of time or waiting on I/O; tick again.
    Pending,
}

impl Progress {
    #[inline]
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}
