//! Serial routes: ordered cell sequences split into per-partition fragments.
//!
//! A route is visited strictly in order. Where it lies in several partitions
//! it is cut into fragments; each partition stores, per route, its fragments
//! in visiting order, and every fragment except the route's final one knows
//! which partition holds the next fragment.
//!
//! Routes are built upstream (ordering cells is not this crate's job) and are
//! immutable once constructed. Any cell is part of at most one route.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::array::{nr_elements, Cell, Offset, PartitionId, Partitioning, Shape};
use crate::placement::{Localities, NodeId, Placement};

/// Key identifying one route, unique within a [`SerialRoute`].
pub trait RouteId: Copy + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> RouteId for T where T: Copy + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

/// The contiguous part of one route lying inside one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFragment {
    /// Linear offsets into the partition's buffer, in visiting order
    cell_idxs: Vec<usize>,
    /// Partition holding the next fragment, `None` for the route's final fragment
    next: Option<PartitionId>,
}

impl RouteFragment {
    pub fn new(cell_idxs: Vec<usize>, next: Option<PartitionId>) -> Self {
        Self { cell_idxs, next }
    }

    pub fn cell_idxs(&self) -> &[usize] {
        &self.cell_idxs
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }

    pub fn next_fragment_location(&self) -> Option<PartitionId> {
        self.next
    }
}

/// One partition's slice of all routes.
#[derive(Debug, Clone)]
pub struct RoutePartition<Id: RouteId> {
    id: PartitionId,
    offset: Offset,
    shape: Shape,
    fragments: BTreeMap<Id, Vec<RouteFragment>>,
}

impl<Id: RouteId> RoutePartition<Id> {
    pub fn new(
        id: PartitionId,
        offset: Offset,
        shape: Shape,
        fragments: BTreeMap<Id, Vec<RouteFragment>>,
    ) -> Self {
        Self {
            id,
            offset,
            shape,
            fragments,
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn route_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.fragments.keys().copied()
    }

    pub fn route_fragments(&self, route_id: Id) -> Option<&[RouteFragment]> {
        self.fragments.get(&route_id).map(Vec::as_slice)
    }

    pub fn nr_routes(&self) -> usize {
        self.fragments.len()
    }

    pub fn nr_route_fragments(&self) -> usize {
        self.fragments.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Partitions that fragments in this partition hand off to.
    pub fn downstream_partitions(&self) -> BTreeSet<PartitionId> {
        self.fragments
            .values()
            .flatten()
            .filter_map(RouteFragment::next_fragment_location)
            .collect()
    }
}

/// Zero or more serial routes over a partitioned raster.
#[derive(Debug, Clone)]
pub struct SerialRoute<Id: RouteId> {
    partitioning: Partitioning,
    nodes: Vec<NodeId>,
    /// For each route the partition holding its first fragment
    starts: BTreeMap<Id, PartitionId>,
    partitions: Vec<Arc<RoutePartition<Id>>>,
}

impl<Id: RouteId> SerialRoute<Id> {
    /// Assemble a route from prebuilt partitions.
    ///
    /// Nothing is checked here. Call [`validate`](Self::validate), or leave
    /// `validate_routes` enabled so the walk driver does it.
    pub fn new(
        partitioning: Partitioning,
        nodes: Vec<NodeId>,
        starts: BTreeMap<Id, PartitionId>,
        partitions: Vec<RoutePartition<Id>>,
    ) -> Self {
        Self {
            partitioning,
            nodes,
            starts,
            partitions: partitions.into_iter().map(Arc::new).collect(),
        }
    }

    /// Split ordered global cell sequences into per-partition fragments.
    ///
    /// Each item is a route id with the cells of that route in visiting order.
    /// Cells outside the raster, empty routes, duplicate route ids and cells
    /// shared by routes are rejected, so the result is valid by construction.
    pub fn from_cell_routes(
        partitioning: Partitioning,
        placement: &impl Placement,
        routes: impl IntoIterator<Item = (Id, Vec<Cell>)>,
    ) -> Result<Self> {
        let nr_partitions = partitioning.nr_partitions();
        let mut fragments: Vec<BTreeMap<Id, Vec<RouteFragment>>> =
            vec![BTreeMap::new(); nr_partitions];
        let mut starts = BTreeMap::new();
        let mut owners: HashMap<Cell, Id> = HashMap::new();

        for (route_id, cells) in routes {
            if cells.is_empty() {
                bail!("route {:?} has no cells", route_id);
            }
            if starts.contains_key(&route_id) {
                bail!("route {:?} is defined more than once", route_id);
            }

            // Runs of consecutive cells within the same partition
            let mut runs: Vec<(PartitionId, Vec<usize>)> = Vec::new();

            for cell in cells {
                let (partition, local_idx) = partitioning.locate(cell).with_context(|| {
                    format!(
                        "route {:?}: cell {:?} lies outside of the {:?} raster",
                        route_id,
                        cell,
                        partitioning.array_shape()
                    )
                })?;

                if let Some(owner) = owners.insert(cell, route_id) {
                    bail!(
                        "cell {:?} is part of route {:?} and route {:?}",
                        cell,
                        owner,
                        route_id
                    );
                }

                match runs.last_mut() {
                    Some((current, cell_idxs)) if *current == partition => cell_idxs.push(local_idx),
                    _ => runs.push((partition, vec![local_idx])),
                }
            }

            starts.insert(route_id, runs[0].0);

            let nexts: Vec<Option<PartitionId>> = runs
                .iter()
                .skip(1)
                .map(|(partition, _)| Some(*partition))
                .chain(std::iter::once(None))
                .collect();

            for ((partition, cell_idxs), next) in runs.into_iter().zip(nexts) {
                fragments[partition.0]
                    .entry(route_id)
                    .or_default()
                    .push(RouteFragment::new(cell_idxs, next));
            }
        }

        let nodes = partitioning
            .partition_ids()
            .map(|id| placement.node_of(id))
            .collect();
        let partitions = fragments
            .into_iter()
            .enumerate()
            .map(|(idx, fragments)| {
                let id = PartitionId(idx);
                RoutePartition::new(
                    id,
                    partitioning.partition_offset(id),
                    partitioning.partition_shape_of(id),
                    fragments,
                )
            })
            .collect();

        Ok(Self::new(partitioning, nodes, starts, partitions))
    }

    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }

    pub fn shape(&self) -> Shape {
        self.partitioning.array_shape()
    }

    pub fn starts(&self) -> &BTreeMap<Id, PartitionId> {
        &self.starts
    }

    pub fn nr_routes(&self) -> usize {
        self.starts.len()
    }

    pub fn partitions(&self) -> &[Arc<RoutePartition<Id>>] {
        &self.partitions
    }

    pub fn partition(&self, partition: PartitionId) -> &Arc<RoutePartition<Id>> {
        &self.partitions[partition.0]
    }

    /// Check the invariants the walk engine relies on.
    ///
    /// - partitions match the partitioning
    /// - fragments are non-empty and their cells are in bounds
    /// - routes are cell-disjoint within every partition
    /// - following the chain from each start visits every fragment of the
    ///   route exactly once and ends at its final fragment
    pub fn validate(&self) -> Result<()> {
        let nr_partitions = self.partitioning.nr_partitions();

        if self.partitions.len() != nr_partitions || self.nodes.len() != nr_partitions {
            bail!(
                "route has {} partitions and {} nodes, partitioning needs {}",
                self.partitions.len(),
                self.nodes.len(),
                nr_partitions
            );
        }

        let mut route_ids = BTreeSet::new();

        for (idx, partition) in self.partitions.iter().enumerate() {
            let id = PartitionId(idx);
            if partition.id() != id
                || partition.offset() != self.partitioning.partition_offset(id)
                || partition.shape() != self.partitioning.partition_shape_of(id)
            {
                bail!("route partition {} does not match the partitioning", id);
            }

            let nr_cells = nr_elements(&partition.shape());
            let mut used = HashSet::new();

            for (route_id, fragments) in &partition.fragments {
                route_ids.insert(*route_id);

                for fragment in fragments {
                    if fragment.cell_idxs().is_empty() {
                        bail!("partition {}: route {:?} has an empty fragment", id, route_id);
                    }
                    if let Some(next) = fragment.next_fragment_location() {
                        if next.0 >= nr_partitions || next == id {
                            bail!(
                                "partition {}: route {:?} hands off to invalid partition {}",
                                id,
                                route_id,
                                next
                            );
                        }
                    }
                    for &cell_idx in fragment.cell_idxs() {
                        if cell_idx >= nr_cells {
                            bail!(
                                "partition {}: route {:?} cell index {} out of bounds",
                                id,
                                route_id,
                                cell_idx
                            );
                        }
                        if !used.insert(cell_idx) {
                            bail!(
                                "partition {}: cell index {} is visited more than once",
                                id,
                                cell_idx
                            );
                        }
                    }
                }
            }
        }

        let start_ids: BTreeSet<Id> = self.starts.keys().copied().collect();
        if start_ids != route_ids {
            bail!("route starts and route partitions disagree about the set of routes");
        }

        for (&route_id, &start) in &self.starts {
            self.validate_chain(route_id, start)?;
        }

        Ok(())
    }

    fn validate_chain(&self, route_id: Id, start: PartitionId) -> Result<()> {
        let mut visited: BTreeMap<PartitionId, usize> = BTreeMap::new();
        let mut current = start;

        loop {
            let Some(fragments) = self.partitions[current.0].route_fragments(route_id) else {
                bail!(
                    "route {:?} is handed to partition {}, which has no fragments for it",
                    route_id,
                    current
                );
            };
            let idx = visited.entry(current).or_default();
            let Some(fragment) = fragments.get(*idx) else {
                bail!(
                    "route {:?} re-enters partition {} more often than it has fragments there",
                    route_id,
                    current
                );
            };
            *idx += 1;

            match fragment.next_fragment_location() {
                Some(next) => current = next,
                None => break,
            }
        }

        for (idx, partition) in self.partitions.iter().enumerate() {
            let nr_fragments = partition
                .route_fragments(route_id)
                .map_or(0, <[RouteFragment]>::len);
            let nr_visited = visited.get(&PartitionId(idx)).copied().unwrap_or(0);
            if nr_fragments != nr_visited {
                bail!(
                    "route {:?}: partition {} holds {} fragments but the chain visits {}",
                    route_id,
                    idx,
                    nr_fragments,
                    nr_visited
                );
            }
        }

        Ok(())
    }
}

impl<Id: RouteId> Localities for SerialRoute<Id> {
    fn localities(&self) -> &[NodeId] {
        &self.nodes
    }
}
