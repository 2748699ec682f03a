//! K-way merge of pre-sorted source streams for sorted-gather.

use super::transport::EnvelopeDecoder;
use crate::dataset::Dataset;
use ferry_common::{FerryError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// One sort key of a sorted-gather exchange. Nulls order first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortingCol {
    pub index: usize,
    #[serde(default)]
    pub descending: bool,
}

impl SortingCol {
    pub fn asc(index: usize) -> Self {
        Self {
            index,
            descending: false,
        }
    }

    pub fn desc(index: usize) -> Self {
        Self {
            index,
            descending: true,
        }
    }
}

/// Order row `ar` of `a` against row `br` of `b` on the sort keys.
pub fn compare_rows(
    sorting: &[SortingCol],
    a: &Dataset,
    ar: usize,
    b: &Dataset,
    br: usize,
) -> Result<Ordering> {
    for key in sorting {
        let (Some(left), Some(right)) = (a.column(key.index), b.column(key.index)) else {
            return Err(FerryError::invalid_data(format!(
                "sort column {} out of range for widths {} and {}",
                key.index,
                a.width(),
                b.width()
            )));
        };

        let ord = if left.less_other(ar, right.as_ref(), br)? {
            Ordering::Less
        } else if right.less_other(br, left.as_ref(), ar)? {
            Ordering::Greater
        } else {
            continue;
        };
        return Ok(if key.descending { ord.reverse() } else { ord });
    }
    Ok(Ordering::Equal)
}

struct Source {
    decoder: Box<dyn EnvelopeDecoder>,
    batch: Dataset,
    cursor: usize,
    done: bool,
}

impl Source {
    fn exhausted(&self) -> bool {
        self.cursor >= self.batch.len()
    }

    /// Pull batches until one has rows or the source ends.
    async fn refill(&mut self) -> Result<()> {
        while !self.done && self.exhausted() {
            match self.decoder.decode().await? {
                Some(batch) => {
                    self.batch = batch;
                    self.cursor = 0;
                }
                None => self.done = true,
            }
        }
        Ok(())
    }
}

pub struct SortedMerge {
    sources: Vec<Source>,
    sorting: Vec<SortingCol>,
    last: usize,
    batch_size: usize,
}

impl SortedMerge {
    pub fn new(
        decoders: Vec<Box<dyn EnvelopeDecoder>>,
        sorting: Vec<SortingCol>,
        batch_size: usize,
    ) -> Self {
        let sources = decoders
            .into_iter()
            .map(|decoder| Source {
                decoder,
                batch: Dataset::default(),
                cursor: 0,
                done: false,
            })
            .collect::<Vec<_>>();
        Self {
            // the first search starts at source 0
            last: sources.len().saturating_sub(1),
            sources,
            sorting,
            batch_size: batch_size.max(1),
        }
    }

    /// The next merged batch, `None` once every source has ended.
    pub async fn next_batch(&mut self) -> Result<Option<Dataset>> {
        let mut picked: Vec<(Dataset, usize)> = Vec::with_capacity(self.batch_size);

        while picked.len() < self.batch_size {
            let Some(i) = self.pick().await? else {
                break;
            };
            let source = &mut self.sources[i];
            picked.push((source.batch.clone(), source.cursor));
            source.cursor += 1;
            self.last = i;
        }

        if picked.is_empty() {
            return Ok(None);
        }
        let rows: Vec<(&Dataset, usize)> = picked.iter().map(|(ds, row)| (ds, *row)).collect();
        Dataset::gather_rows(&rows).map(Some)
    }

    /// Whether every source has ended.
    pub fn is_finished(&self) -> bool {
        self.sources.iter().all(|source| source.done)
    }

    /// Read every source to its end without merging.
    pub async fn drain(&mut self) {
        let drains = self.sources.iter_mut().enumerate().map(|(i, source)| async move {
            while !source.done {
                match source.decoder.decode().await {
                    Ok(Some(_)) => {}
                    Ok(None) => source.done = true,
                    Err(e) => {
                        debug!("Sorted merge source {} failed while draining: {}", i, e);
                        source.done = true;
                    }
                }
            }
        });
        futures::future::join_all(drains).await;
    }

    /// Index of the source holding the smallest current row. The search starts
    /// right after the last served source and only a strictly smaller row
    /// replaces the candidate, so equal keys rotate between sources.
    async fn pick(&mut self) -> Result<Option<usize>> {
        for (i, source) in self.sources.iter_mut().enumerate() {
            let was_done = source.done;
            source.refill().await?;
            if source.done && !was_done {
                debug!("Sorted merge source {} retired", i);
            }
        }

        let n = self.sources.len();
        let mut best: Option<usize> = None;
        for step in 1..=n {
            let i = (self.last + step) % n;
            let candidate = &self.sources[i];
            if candidate.done {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) => {
                    let current = &self.sources[b];
                    let ord = compare_rows(
                        &self.sorting,
                        &candidate.batch,
                        candidate.cursor,
                        &current.batch,
                        current.cursor,
                    )?;
                    if ord == Ordering::Less { Some(i) } else { Some(b) }
                }
            };
        }
        Ok(best)
    }
}
