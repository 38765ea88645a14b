// snapshotinstaller/src/install/chunk.rs
//! Offset-based chunking shared by the file copy and table restore steps.
//!
//! No cursor is persisted between invocations: the window is derived from the chunk index
//! alone, so the item list must come out in the same order every time.

use async_trait::async_trait;
use std::ops::Range;
use tracing::debug;

use super::ProgressReport;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub index: usize,
    pub size: usize,
}

impl ChunkWindow {
    pub fn new(index: usize, size: usize) -> Self {
        ChunkWindow {
            index,
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        self.index.saturating_mul(self.size)
    }

    pub fn range(&self, total: usize) -> Range<usize> {
        let start = self.offset().min(total);
        let end = self.offset().saturating_add(self.size).min(total);
        start..end
    }

    pub fn is_final(&self, total: usize) -> bool {
        self.offset().saturating_add(self.size) >= total
    }
}

/// Work applied to each item of a chunk.
#[async_trait(?Send)]
pub trait ChunkApply<T> {
    async fn apply(&mut self, item: &T) -> Result<()>;
}

#[derive(Debug)]
pub struct ChunkOutcome<T> {
    pub processed: Vec<T>,
    pub status: bool,
    pub is_final: bool,
    /// First failing item's error. `None` with `status == false` means there was nothing to process.
    pub failure: Option<AppError>,
}

impl<T> ChunkOutcome<T> {
    /// Items done so far across all chunks, or 0 when this chunk did nothing.
    pub fn processed_count(&self, window: ChunkWindow) -> usize {
        if self.processed.is_empty() {
            0
        } else {
            window.offset() + self.processed.len()
        }
    }
}

/// Applies `apply` to the items of `window`, stopping at the first failure.
pub async fn run_chunk<T, A>(items: &[T], window: ChunkWindow, apply: &mut A) -> ChunkOutcome<T>
where
    T: Clone,
    A: ChunkApply<T> + ?Sized,
{
    let selected = &items[window.range(items.len())];
    let is_final = window.is_final(items.len());

    if items.is_empty() && selected.is_empty() {
        return ChunkOutcome {
            processed: Vec::new(),
            status: false,
            is_final,
            failure: None,
        };
    }

    let mut processed = Vec::with_capacity(selected.len());
    for item in selected {
        if let Err(e) = apply.apply(item).await {
            return ChunkOutcome {
                processed,
                status: false,
                is_final,
                failure: Some(e),
            };
        }
        processed.push(item.clone());
    }

    debug!(
        "Chunk {} processed {} of {} items (final: {})",
        window.index,
        processed.len(),
        items.len(),
        is_final
    );
    ChunkOutcome {
        processed,
        status: true,
        is_final,
        failure: None,
    }
}

/// Share of the overall progress bar owned by one chunked step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub base: u8,
    pub weight: u8,
}

/// Extraction takes the first 5%.
pub const FILES_BAND: ProgressBand = ProgressBand { base: 5, weight: 45 };
pub const TABLES_BAND: ProgressBand = ProgressBand {
    base: 50,
    weight: 45,
};

impl ProgressBand {
    pub fn percentage(&self, processed_count: usize, total: usize, chunk_index: usize) -> u8 {
        if total == 0 {
            return self.base;
        }
        // A trailing chunk with nothing left to do stays at the ceiling instead of dropping back.
        if processed_count == 0 && chunk_index > 0 {
            return self.base + self.weight;
        }
        let share = processed_count.min(total) * usize::from(self.weight) / total;
        self.base + share as u8
    }

    pub fn report(
        &self,
        processed_count: usize,
        total: usize,
        chunk_index: usize,
        action: &str,
    ) -> ProgressReport {
        ProgressReport::new(self.percentage(processed_count, total, chunk_index), action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct Collect {
        seen: Vec<u32>,
        fail_at: Option<u32>,
    }

    #[async_trait(?Send)]
    impl ChunkApply<u32> for Collect {
        async fn apply(&mut self, item: &u32) -> Result<()> {
            if self.fail_at == Some(*item) {
                return Err(AppError::CopyFailed(item.to_string()));
            }
            self.seen.push(*item);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chunks_cover_list_without_gaps_or_duplicates() {
        for (len, size) in [(0usize, 3usize), (1, 1), (7, 3), (9, 3), (600, 250), (10, 1)] {
            let items: Vec<u32> = (0..len as u32).collect();
            let chunks = len.div_ceil(size);
            let mut union = Vec::new();
            for index in 0..chunks {
                let mut collect = Collect { seen: Vec::new(), fail_at: None };
                let outcome = run_chunk(&items, ChunkWindow::new(index, size), &mut collect).await;
                assert!(outcome.status);
                assert_eq!(outcome.is_final, index == chunks - 1);
                union.extend(outcome.processed);
            }
            assert_eq!(union, items, "len {} size {}", len, size);
            let unique: BTreeSet<_> = union.iter().collect();
            assert_eq!(unique.len(), len);
        }
    }

    #[tokio::test]
    async fn test_first_failure_aborts_rest_of_chunk() {
        let items: Vec<u32> = (0..10).collect();
        let mut collect = Collect { seen: Vec::new(), fail_at: Some(6) };

        let outcome = run_chunk(&items, ChunkWindow::new(1, 5), &mut collect).await;

        assert!(!outcome.status);
        assert_eq!(outcome.processed, vec![5]);
        assert_eq!(collect.seen, vec![5]);
        assert!(matches!(outcome.failure, Some(AppError::CopyFailed(_))));
    }

    #[tokio::test]
    async fn test_empty_list_is_a_failure() {
        let mut collect = Collect { seen: Vec::new(), fail_at: None };
        let outcome = run_chunk::<u32, _>(&[], ChunkWindow::new(0, 250), &mut collect).await;
        assert!(!outcome.status);
        assert!(outcome.failure.is_none());
        assert!(outcome.is_final);
    }

    #[tokio::test]
    async fn test_window_past_the_end_is_final_and_empty() {
        let items: Vec<u32> = (0..4).collect();
        let mut collect = Collect { seen: Vec::new(), fail_at: None };
        let outcome = run_chunk(&items, ChunkWindow::new(3, 2), &mut collect).await;
        assert!(outcome.status);
        assert!(outcome.is_final);
        assert!(outcome.processed.is_empty());
        assert_eq!(outcome.processed_count(ChunkWindow::new(3, 2)), 0);
    }

    #[test]
    fn test_progress_bands() {
        assert_eq!(FILES_BAND.percentage(0, 600, 0), 5);
        assert_eq!(FILES_BAND.percentage(250, 600, 0), 23);
        assert_eq!(FILES_BAND.percentage(600, 600, 2), 50);
        // Nothing processed on a later chunk reports the ceiling.
        assert_eq!(FILES_BAND.percentage(0, 600, 3), 50);
        assert_eq!(TABLES_BAND.percentage(1, 3, 0), 65);
        assert_eq!(TABLES_BAND.percentage(3, 3, 2), 95);
        assert_eq!(TABLES_BAND.percentage(0, 0, 0), 50);
    }
}
