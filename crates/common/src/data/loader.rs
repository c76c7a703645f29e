//! Batched loading over a mapped dataset.
//!
//! [`DataLoader`] draws a fresh seeded permutation of chunk indices per
//! epoch, optionally restricted to one worker's shard, gathers rows from the
//! [`MmapTextDataset`], and hands them to a [`Collate`] implementation.
//! [`spawn_prefetch`] runs a loader epoch on a producer thread behind a
//! bounded channel so the training step is not starved.

use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use candle_core::Device;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::collator::{Collate, MlmBatch};
use super::mmap::MmapTextDataset;

/// This worker's slice of a distributed run.
///
/// Indices are padded to a multiple of `world_size` (cycling from the front)
/// and dealt out round-robin, so every worker sees the same number of chunks
/// per epoch.
#[derive(Debug, Clone, Copy)]
pub struct WorkerShard {
    pub rank: usize,
    pub world_size: usize,
}

/// Batching iterator source over one cache file.
pub struct DataLoader<C: Collate> {
    dataset: MmapTextDataset,
    collator: C,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    shard: Option<WorkerShard>,
    seed: u64,
    epoch: u64,
    device: Device,
}

impl<C: Collate> DataLoader<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataset: MmapTextDataset,
        collator: C,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        shard: Option<WorkerShard>,
        seed: u64,
        device: Device,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        if let Some(shard) = &shard {
            assert!(
                shard.rank < shard.world_size,
                "rank {} outside world of size {}",
                shard.rank,
                shard.world_size
            );
        }
        Self {
            dataset,
            collator,
            batch_size,
            shuffle,
            drop_last,
            shard,
            seed,
            epoch: 0,
            device,
        }
    }

    /// Advance the epoch counter; the next [`batches`](Self::batches) call
    /// reshuffles with `seed + epoch` so every epoch sees a different order
    /// that is still reproducible.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Indices this worker will visit in the current epoch.
    fn epoch_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            indices.shuffle(&mut rng);
        }
        match self.shard {
            None => indices,
            Some(WorkerShard { rank, world_size }) => {
                let remainder = indices.len() % world_size;
                if remainder != 0 && !indices.is_empty() {
                    let pad: Vec<usize> = indices
                        .iter()
                        .copied()
                        .cycle()
                        .take(world_size - remainder)
                        .collect();
                    indices.extend(pad);
                }
                indices.into_iter().skip(rank).step_by(world_size).collect()
            }
        }
    }

    /// Batches in this worker's epoch. With `drop_last`, a trailing batch
    /// smaller than `batch_size` is discarded.
    pub fn num_batches(&self) -> usize {
        let n = self.epoch_indices().len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Iterate one epoch of collated batches.
    pub fn batches(&mut self) -> Batches<'_, C> {
        let indices = self.epoch_indices();
        Batches {
            loader: self,
            indices,
            pos: 0,
        }
    }

    pub fn dataset(&self) -> &MmapTextDataset {
        &self.dataset
    }
}

/// One epoch of batches borrowed out of a [`DataLoader`].
pub struct Batches<'a, C: Collate> {
    loader: &'a mut DataLoader<C>,
    indices: Vec<usize>,
    pos: usize,
}

impl<C: Collate> Iterator for Batches<'_, C> {
    type Item = Result<MlmBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.indices.len() - self.pos;
        if remaining == 0 || (self.loader.drop_last && remaining < self.loader.batch_size) {
            return None;
        }
        let take = remaining.min(self.loader.batch_size);
        let batch_indices = &self.indices[self.pos..self.pos + take];
        self.pos += take;

        let rows: Result<Vec<Vec<i64>>> = batch_indices
            .iter()
            .map(|&i| self.loader.dataset.get(i))
            .collect();
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => return Some(Err(e)),
        };
        Some(self.loader.collator.collate(rows, &self.loader.device))
    }
}

// ── Prefetching ─────────────────────────────────────────────────────────────

/// Receiving end of a prefetched epoch.
pub struct PrefetchHandle {
    rx: mpsc::Receiver<Result<MlmBatch>>,
    join: Option<thread::JoinHandle<()>>,
}

impl Iterator for PrefetchHandle {
    type Item = Result<MlmBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        // Unblock the producer, then reap it.
        let (_tx, rx) = mpsc::channel();
        self.rx = rx;
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Run one loader epoch on a producer thread, buffering up to `buffer`
/// batches. The loader moves into the thread and performs its own lazy
/// dataset initialization there; the handle yields batches in order.
pub fn spawn_prefetch<C>(mut loader: DataLoader<C>, buffer: usize) -> PrefetchHandle
where
    C: Collate + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(buffer.max(1));
    let join = thread::spawn(move || {
        for batch in loader.batches() {
            if tx.send(batch).is_err() {
                return;
            }
        }
    });
    PrefetchHandle {
        rx,
        join: Some(join),
    }
}
