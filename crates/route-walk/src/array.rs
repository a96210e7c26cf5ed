//! Partitioned rasters: shapes, partition layout, and partitions that may still be pending.
//!
//! A [`PartitionedArray`] is returned to callers before its contents exist. Each
//! partition is a [`PartitionHandle`]: a cloneable one-shot future that resolves
//! once the actor owning the partition publishes it.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use futures::future::{join_all, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::placement::{Localities, NodeId, Placement};

/// Extent of a raster, in (rows, cols).
pub type Shape = [usize; 2];

/// Position of a partition's first cell within the whole raster.
pub type Offset = [usize; 2];

/// Global (row, col) of a raster cell.
pub type Cell = [usize; 2];

/// Number of cells in a shape.
pub fn nr_elements(shape: &Shape) -> usize {
    shape[0] * shape[1]
}

/// Linear, row-major index of a partition within the partition grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub usize);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Layout of a raster in equally sized partitions.
///
/// Partitions are laid out row-major. Partitions in the last partition row or
/// column are clipped to the raster and may be smaller than `partition_shape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
    array_shape: Shape,
    partition_shape: Shape,
}

impl Partitioning {
    pub fn new(array_shape: Shape, partition_shape: Shape) -> Result<Self> {
        if partition_shape.iter().any(|&extent| extent == 0) {
            bail!("partition shape {:?} has an empty extent", partition_shape);
        }
        Ok(Self {
            array_shape,
            partition_shape,
        })
    }

    pub fn array_shape(&self) -> Shape {
        self.array_shape
    }

    /// Nominal partition shape (before clipping at the raster edge).
    pub fn partition_shape(&self) -> Shape {
        self.partition_shape
    }

    /// Number of partitions along each dimension.
    pub fn shape_in_partitions(&self) -> Shape {
        [
            self.array_shape[0].div_ceil(self.partition_shape[0]),
            self.array_shape[1].div_ceil(self.partition_shape[1]),
        ]
    }

    pub fn nr_partitions(&self) -> usize {
        nr_elements(&self.shape_in_partitions())
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.nr_partitions()).map(PartitionId)
    }

    pub fn partition_offset(&self, partition: PartitionId) -> Offset {
        let grid = self.shape_in_partitions();
        assert!(
            partition.0 < nr_elements(&grid),
            "partition {} outside of a {:?} partition grid",
            partition,
            grid
        );
        [
            (partition.0 / grid[1]) * self.partition_shape[0],
            (partition.0 % grid[1]) * self.partition_shape[1],
        ]
    }

    /// Actual shape of a partition, clipped to the raster.
    pub fn partition_shape_of(&self, partition: PartitionId) -> Shape {
        let offset = self.partition_offset(partition);
        [
            self.partition_shape[0].min(self.array_shape[0] - offset[0]),
            self.partition_shape[1].min(self.array_shape[1] - offset[1]),
        ]
    }

    /// Partition holding `cell` and the cell's linear index inside that partition.
    pub fn locate(&self, cell: Cell) -> Option<(PartitionId, usize)> {
        if cell[0] >= self.array_shape[0] || cell[1] >= self.array_shape[1] {
            return None;
        }
        let grid = self.shape_in_partitions();
        let partition_row = cell[0] / self.partition_shape[0];
        let partition_col = cell[1] / self.partition_shape[1];
        let partition = PartitionId(partition_row * grid[1] + partition_col);

        let offset = self.partition_offset(partition);
        let shape = self.partition_shape_of(partition);
        let local_idx = (cell[0] - offset[0]) * shape[1] + (cell[1] - offset[1]);

        Some((partition, local_idx))
    }

    /// Inverse of [`Partitioning::locate`].
    pub fn cell(&self, partition: PartitionId, local_idx: usize) -> Cell {
        let offset = self.partition_offset(partition);
        let shape = self.partition_shape_of(partition);
        [offset[0] + local_idx / shape[1], offset[1] + local_idx % shape[1]]
    }
}

/// Raster element type with a no-data sentinel.
pub trait Element: Copy + PartialEq + Send + Sync + fmt::Debug + 'static {
    const NO_DATA: Self;

    fn is_no_data(&self) -> bool {
        *self == Self::NO_DATA
    }
}

macro_rules! integral_element {
    ($($element:ty => $no_data:expr),* $(,)?) => {
        $(
            impl Element for $element {
                const NO_DATA: Self = $no_data;
            }
        )*
    };
}

integral_element! {
    u8 => u8::MAX,
    u32 => u32::MAX,
    u64 => u64::MAX,
    i32 => i32::MIN,
    i64 => i64::MIN,
}

impl Element for f32 {
    const NO_DATA: Self = f32::NAN;

    fn is_no_data(&self) -> bool {
        self.is_nan()
    }
}

impl Element for f64 {
    const NO_DATA: Self = f64::NAN;

    fn is_no_data(&self) -> bool {
        self.is_nan()
    }
}

/// One partition's cells, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayPartition<T> {
    offset: Offset,
    shape: Shape,
    data: Vec<T>,
}

impl<T: Element> ArrayPartition<T> {
    pub fn new(offset: Offset, shape: Shape, data: Vec<T>) -> Result<Self> {
        if data.len() != nr_elements(&shape) {
            bail!(
                "partition of shape {:?} needs {} elements, got {}",
                shape,
                nr_elements(&shape),
                data.len()
            );
        }
        Ok(Self {
            offset,
            shape,
            data,
        })
    }

    pub fn filled(offset: Offset, shape: Shape, value: T) -> Self {
        Self {
            offset,
            shape,
            data: vec![value; nr_elements(&shape)],
        }
    }

    pub fn no_data(offset: Offset, shape: Shape) -> Self {
        Self::filled(offset, shape, T::NO_DATA)
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn nr_elements(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

type SharedPartition<T> = Shared<oneshot::Receiver<Arc<ArrayPartition<T>>>>;

/// Cloneable handle to a partition that may not have been published yet.
pub struct PartitionHandle<T> {
    future: SharedPartition<T>,
}

impl<T> Clone for PartitionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T> fmt::Debug for PartitionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.future.peek() {
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "broken",
            None => "pending",
        };
        f.debug_struct("PartitionHandle").field("state", &state).finish()
    }
}

impl<T: Element> PartitionHandle<T> {
    pub(crate) fn from_receiver(receiver: oneshot::Receiver<Arc<ArrayPartition<T>>>) -> Self {
        Self {
            future: receiver.shared(),
        }
    }

    /// Handle to a partition that already exists.
    pub fn ready(partition: ArrayPartition<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is alive, so this cannot fail
        let _ = tx.send(Arc::new(partition));
        Self::from_receiver(rx)
    }

    /// Whether the partition has been published. Never blocks.
    pub fn is_ready(&self) -> bool {
        matches!(self.future.clone().now_or_never(), Some(Ok(_)))
    }

    /// Wait for the partition.
    ///
    /// Fails when the producer went away without publishing, which means a
    /// walk never reached the end of one of its routes.
    pub async fn get(&self) -> Result<Arc<ArrayPartition<T>>> {
        self.future
            .clone()
            .await
            .map_err(|_| anyhow!("partition promise was dropped before it was fulfilled"))
    }
}

/// A raster split into partitions that live on (simulated) nodes.
pub struct PartitionedArray<T> {
    partitioning: Partitioning,
    nodes: Vec<NodeId>,
    partitions: Vec<PartitionHandle<T>>,
}

impl<T> Clone for PartitionedArray<T> {
    fn clone(&self) -> Self {
        Self {
            partitioning: self.partitioning,
            nodes: self.nodes.clone(),
            partitions: self.partitions.clone(),
        }
    }
}

impl<T> fmt::Debug for PartitionedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedArray")
            .field("partitioning", &self.partitioning)
            .field("nodes", &self.nodes)
            .field("partitions", &self.partitions)
            .finish()
    }
}

impl<T: Element> PartitionedArray<T> {
    pub fn new(
        partitioning: Partitioning,
        nodes: Vec<NodeId>,
        partitions: Vec<PartitionHandle<T>>,
    ) -> Self {
        assert_eq!(nodes.len(), partitioning.nr_partitions());
        assert_eq!(partitions.len(), partitioning.nr_partitions());
        Self {
            partitioning,
            nodes,
            partitions,
        }
    }

    /// Array from per-partition row-major data, in partition order.
    pub fn from_partition_data(
        partitioning: Partitioning,
        placement: &impl Placement,
        data: Vec<Vec<T>>,
    ) -> Result<Self> {
        if data.len() != partitioning.nr_partitions() {
            bail!(
                "expected data for {} partitions, got {}",
                partitioning.nr_partitions(),
                data.len()
            );
        }

        let mut nodes = Vec::with_capacity(data.len());
        let mut partitions = Vec::with_capacity(data.len());

        for (idx, partition_data) in data.into_iter().enumerate() {
            let id = PartitionId(idx);
            let partition = ArrayPartition::new(
                partitioning.partition_offset(id),
                partitioning.partition_shape_of(id),
                partition_data,
            )?;
            nodes.push(placement.node_of(id));
            partitions.push(PartitionHandle::ready(partition));
        }

        Ok(Self::new(partitioning, nodes, partitions))
    }

    /// Array whose cells are computed from their global position.
    pub fn from_fn(
        partitioning: Partitioning,
        placement: &impl Placement,
        mut f: impl FnMut(Cell) -> T,
    ) -> Self {
        let mut nodes = Vec::with_capacity(partitioning.nr_partitions());
        let mut partitions = Vec::with_capacity(partitioning.nr_partitions());

        for id in partitioning.partition_ids() {
            let shape = partitioning.partition_shape_of(id);
            let data = (0..nr_elements(&shape))
                .map(|local_idx| f(partitioning.cell(id, local_idx)))
                .collect();
            nodes.push(placement.node_of(id));
            partitions.push(PartitionHandle::ready(ArrayPartition {
                offset: partitioning.partition_offset(id),
                shape,
                data,
            }));
        }

        Self::new(partitioning, nodes, partitions)
    }

    pub fn shape(&self) -> Shape {
        self.partitioning.array_shape()
    }

    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }

    pub fn nr_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[PartitionHandle<T>] {
        &self.partitions
    }

    pub fn partition(&self, partition: PartitionId) -> &PartitionHandle<T> {
        &self.partitions[partition.0]
    }

    /// Wait for every partition.
    pub async fn wait_all(&self) -> Result<Vec<Arc<ArrayPartition<T>>>> {
        join_all(self.partitions.iter().map(PartitionHandle::get))
            .await
            .into_iter()
            .collect()
    }

    /// Gather all partitions into one row-major buffer.
    pub async fn to_dense(&self) -> Result<Vec<T>> {
        let shape = self.shape();
        let mut dense = vec![T::NO_DATA; nr_elements(&shape)];

        for partition in self.wait_all().await? {
            let [offset_row, offset_col] = partition.offset();
            let [rows, cols] = partition.shape();
            for row in 0..rows {
                let src = &partition.data()[row * cols..(row + 1) * cols];
                let start = (offset_row + row) * shape[1] + offset_col;
                dense[start..start + cols].copy_from_slice(src);
            }
        }

        Ok(dense)
    }
}

impl<T> Localities for PartitionedArray<T> {
    fn localities(&self) -> &[NodeId] {
        &self.nodes
    }
}
