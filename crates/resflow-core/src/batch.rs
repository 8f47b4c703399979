//! Fixed-size batching for optimization phases.
//!
//! A pass walks its nodes, converters and connections in slices of a
//! configured size. Between slices the scheduler calls its boundary hook,
//! which is where a host can yield. Results never depend on the batch size.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Which optimization phase a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Converters,
    Nodes,
    Connections,
}

/// Passed to the boundary hook after each completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBoundary {
    pub phase: Phase,
    /// Zero-based index of the batch that just finished.
    pub batch_index: usize,
    /// Items processed so far in this phase.
    pub processed: usize,
    pub total: usize,
}

pub type BatchHook = Box<dyn FnMut(BatchBoundary) + Send>;

/// Runs work in batches and reports boundaries.
#[derive(Default)]
pub struct BatchScheduler {
    hook: Option<BatchHook>,
    batches_run: u64,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("has_hook", &self.hook.is_some())
            .field("batches_run", &self.batches_run)
            .finish()
    }
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or clear the hook called between batches.
    pub fn set_hook(&mut self, hook: Option<BatchHook>) {
        self.hook = hook;
    }

    /// Total batches run over the scheduler's lifetime.
    pub fn batches_run(&self) -> u64 {
        self.batches_run
    }

    /// Call `f` on every item, `batch_size` items at a time.
    pub fn process_in_batches<T, F>(&mut self, phase: Phase, items: &[T], batch_size: usize, mut f: F)
    where
        F: FnMut(&T),
    {
        let size = batch_size.max(1);
        let mut processed = 0;
        for (batch_index, chunk) in items.chunks(size).enumerate() {
            chunk.iter().for_each(&mut f);
            processed += chunk.len();
            self.boundary(phase, batch_index, processed, items.len());
        }
    }

    /// Map every item through `f` in batches, keeping input order.
    ///
    /// With the `parallel` feature, items inside one batch are mapped on the
    /// rayon pool.
    pub fn map_in_batches<T, R, F>(
        &mut self,
        phase: Phase,
        items: &[T],
        batch_size: usize,
        f: F,
    ) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        let size = batch_size.max(1);
        let mut results = Vec::with_capacity(items.len());
        for (batch_index, chunk) in items.chunks(size).enumerate() {
            #[cfg(feature = "parallel")]
            results.par_extend(chunk.par_iter().map(&f));
            #[cfg(not(feature = "parallel"))]
            results.extend(chunk.iter().map(&f));

            self.boundary(phase, batch_index, results.len(), items.len());
        }
        results
    }

    fn boundary(&mut self, phase: Phase, batch_index: usize, processed: usize, total: usize) {
        self.batches_run += 1;
        tracing::trace!(?phase, batch_index, processed, total, "batch complete");
        if let Some(hook) = self.hook.as_mut() {
            hook(BatchBoundary {
                phase,
                batch_index,
                processed,
                total,
            });
        }
    }
}
