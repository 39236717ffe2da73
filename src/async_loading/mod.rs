//! Time-sliced package loading.
//!
//! [`AsyncLoader`] keeps a FIFO of [`AsyncPackage`] requests and advances the
//! head under a soft time budget each time [`AsyncLoader::process`] is called.
//! Every package walks the same phases:
//!
//! ```text
//! CreateLoader -> FinishLoader -> CreateImports -> CreateExports
//!      -> PreloadQueuedObjects <-> PostLoadObjects -> FinishObjects
//! ```
//!
//! Preload and post-load alternate until neither finds new work, because a
//! post-load hook may create or load more objects.

mod loader;
mod package;

pub use loader::*;
pub use package::*;

use std::fmt;

use crate::object::ObjectId;
use crate::util::Error;

/// Invoked once when a requested package finishes or fails.
pub type LoadCallback = Box<dyn FnOnce(&str, Result<ObjectId, &Error>)>;

/// Answer of [`AsyncLoader::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing is left in the queue.
    Finished,
    NotFinished,
}

/// Phase an [`AsyncPackage`] is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AsyncPhase {
    CreateLoader,
    FinishLoader,
    CreateImports,
    CreateExports,
    PreloadQueuedObjects,
    PostLoadObjects,
    FinishObjects,
}

impl AsyncPhase {
    pub const ALL: [AsyncPhase; 7] = [
        Self::CreateLoader,
        Self::FinishLoader,
        Self::CreateImports,
        Self::CreateExports,
        Self::PreloadQueuedObjects,
        Self::PostLoadObjects,
        Self::FinishObjects,
    ];

    /// Share of the total load percentage, summing to 100.
    pub const fn weight(self) -> f32 {
        match self {
            Self::CreateLoader => 2.0,
            Self::FinishLoader => 18.0,
            Self::CreateImports => 10.0,
            Self::CreateExports => 50.0,
            Self::PreloadQueuedObjects => 10.0,
            Self::PostLoadObjects => 8.0,
            Self::FinishObjects => 2.0,
        }
    }

    /// Sum of the weights of every phase before this one.
    pub fn completed_weight(self) -> f32 {
        Self::ALL.iter().take_while(|&&p| p != self).map(|p| p.weight()).sum()
    }
}

impl fmt::Display for AsyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        let total: f32 = AsyncPhase::ALL.iter().map(|p| p.weight()).sum();
        assert_eq!(total, 100.0);
        assert_eq!(AsyncPhase::CreateLoader.completed_weight(), 0.0);
        assert_eq!(AsyncPhase::CreateExports.completed_weight(), 30.0);
        assert_eq!(AsyncPhase::FinishObjects.completed_weight(), 98.0);
    }
}
