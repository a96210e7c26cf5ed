//! Global unique ids for flagged cells, numbered in completion order.
//!
//! Every partition first counts its flagged cells. Whichever count becomes
//! known first gets the next contiguous id range, so a slow partition never
//! holds up numbering of the others. The id ranges of all partitions are
//! disjoint and together cover `[1, total]`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use anyhow::{Context, Result};
use futures::future::poll_fn;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use crate::array::{ArrayPartition, Element, PartitionHandle, PartitionId, PartitionedArray};
use crate::placement::Localities;
use crate::promise::{self, Promise};

/// First id handed out.
pub const FIRST_ID: u64 = 1;

/// Id range given to one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAssignment {
    pub partition: PartitionId,
    /// First id of the range (meaningless when `count` is zero)
    pub first: u64,
    pub count: u64,
}

impl IdAssignment {
    /// Last id of the range, `None` for an empty range.
    pub fn last(&self) -> Option<u64> {
        (self.count > 0).then(|| self.first + self.count - 1)
    }
}

/// Unique ids being assigned in the background.
pub struct UniqueIds {
    /// Output raster, resolving per partition as ids are filled in
    pub ids: PartitionedArray<u64>,
    schedule: JoinHandle<Result<Vec<IdAssignment>>>,
}

impl UniqueIds {
    /// Wait for scheduling to finish and return the assignments in the order
    /// they were made.
    pub async fn assignments(self) -> Result<Vec<IdAssignment>> {
        self.schedule.await.context("unique id scheduler failed")?
    }
}

/// Number the non-zero cells of `condition` with globally unique ids.
///
/// No-data stays no-data and zero stays zero. Returns immediately.
pub fn unique_id(condition: &PartitionedArray<u8>) -> PartitionedArray<u64> {
    schedule_unique_ids(condition).ids
}

/// As [`unique_id`], also exposing the order in which ranges were assigned.
pub fn schedule_unique_ids(condition: &PartitionedArray<u8>) -> UniqueIds {
    let mut promises = Vec::with_capacity(condition.nr_partitions());
    let mut handles = Vec::with_capacity(condition.nr_partitions());
    for _ in 0..condition.nr_partitions() {
        let (promise, handle) = promise::channel::<u64>();
        promises.push(Some(promise));
        handles.push(handle);
    }

    let counts: Vec<JoinHandle<Result<CountedPartition>>> = condition
        .partitions()
        .iter()
        .cloned()
        .map(|partition| tokio::spawn(count_flagged(partition)))
        .collect();

    let schedule = tokio::spawn(assign_in_completion_order(counts, promises));

    UniqueIds {
        ids: PartitionedArray::new(
            *condition.partitioning(),
            condition.localities().to_vec(),
            handles,
        ),
        schedule,
    }
}

type CountedPartition = (Arc<ArrayPartition<u8>>, u64);

fn is_flagged(value: u8) -> bool {
    !value.is_no_data() && value != 0
}

async fn count_flagged(partition: PartitionHandle<u8>) -> Result<CountedPartition> {
    let partition = partition.get().await?;
    let count = partition.data().iter().filter(|&&value| is_flagged(value)).count() as u64;
    Ok((partition, count))
}

async fn assign_in_completion_order(
    mut pending: Vec<JoinHandle<Result<CountedPartition>>>,
    mut promises: Vec<Option<Promise<u64>>>,
) -> Result<Vec<IdAssignment>> {
    // Partition of each pending entry, kept in step with `pending`
    let mut partitions: Vec<PartitionId> = (0..pending.len()).map(PartitionId).collect();
    let mut assignments = Vec::with_capacity(pending.len());
    let mut next_id = FIRST_ID;
    let mut nr_pending = pending.len();

    while nr_pending > 0 {
        let (idx, result) = first_ready(&mut pending[..nr_pending]).await;
        let partition_id = partitions[idx];

        let (condition, count) = result
            .with_context(|| format!("counting flagged cells of partition {}", partition_id))??;

        let assignment = IdAssignment {
            partition: partition_id,
            first: next_id,
            count,
        };
        next_id += count;
        assignments.push(assignment);

        debug!(
            partition = %partition_id,
            first = assignment.first,
            count,
            "Assigned id range"
        );

        let promise = promises[partition_id.0]
            .take()
            .expect("id range assigned to a partition twice");
        tokio::spawn(async move {
            promise.fulfil(fill_ids(&condition, assignment.first));
        });

        // Move the handled entry past the pending range
        nr_pending -= 1;
        pending.swap(idx, nr_pending);
        partitions.swap(idx, nr_pending);
    }

    Ok(assignments)
}

/// Resolve with the index and output of the first finished task.
async fn first_ready<T>(pending: &mut [JoinHandle<T>]) -> (usize, Result<T, JoinError>) {
    poll_fn(|cx| {
        for (idx, task) in pending.iter_mut().enumerate() {
            if let Poll::Ready(output) = Pin::new(task).poll(cx) {
                return Poll::Ready((idx, output));
            }
        }
        Poll::Pending
    })
    .await
}

fn fill_ids(condition: &ArrayPartition<u8>, first: u64) -> ArrayPartition<u64> {
    let mut next_id = first;
    let mut output = ArrayPartition::no_data(condition.offset(), condition.shape());

    for (id, &value) in output.data_mut().iter_mut().zip(condition.data()) {
        if value.is_no_data() {
            continue;
        }
        if value == 0 {
            *id = 0;
        } else {
            *id = next_id;
            next_id += 1;
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_numbers_flagged_cells_in_row_major_order() {
        let condition =
            ArrayPartition::new([0, 0], [2, 2], vec![1, 0, u8::NO_DATA, 7]).unwrap();

        let ids = fill_ids(&condition, 40);

        assert_eq!(ids.data(), &[40, 0, u64::NO_DATA, 41]);
    }

    #[test]
    fn test_empty_assignment_has_no_last_id() {
        let empty = IdAssignment {
            partition: PartitionId(0),
            first: 3,
            count: 0,
        };
        assert_eq!(empty.last(), None);

        let range = IdAssignment { count: 2, ..empty };
        assert_eq!(range.last(), Some(4));
    }

    #[tokio::test]
    async fn test_first_ready_skips_unfinished_tasks() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut tasks = vec![
            tokio::spawn(async move {
                let _ = rx.await;
                0
            }),
            tokio::spawn(async { 1 }),
        ];

        let (idx, output) = first_ready(&mut tasks).await;
        assert_eq!(idx, 1);
        assert_eq!(output.unwrap(), 1);

        tx.send(()).unwrap();
        let (idx, output) = first_ready(&mut tasks[..1]).await;
        assert_eq!((idx, output.unwrap()), (0, 0));
    }
}
