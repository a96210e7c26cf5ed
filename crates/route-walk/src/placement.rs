//! Node placement of partitions.
//!
//! The engine only needs two things from the surrounding runtime: which node a
//! partition lives on, and a way to create a walk actor next to it. Nodes are
//! simulated; an actor's node is part of its name and of the output array.

use serde::{Deserialize, Serialize};

use crate::array::PartitionId;

/// Identity of a compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Decides which node a partition is placed on.
pub trait Placement: Send + Sync {
    fn node_of(&self, partition: PartitionId) -> NodeId;
}

/// Spread partitions over nodes in partition order.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobin {
    nr_nodes: usize,
}

impl RoundRobin {
    pub fn new(nr_nodes: usize) -> Self {
        Self {
            nr_nodes: nr_nodes.max(1),
        }
    }

    pub fn nr_nodes(&self) -> usize {
        self.nr_nodes
    }
}

impl Placement for RoundRobin {
    fn node_of(&self, partition: PartitionId) -> NodeId {
        NodeId(partition.0 % self.nr_nodes)
    }
}

/// Anything that knows where its partitions live.
pub trait Localities {
    fn localities(&self) -> &[NodeId];

    fn locality(&self, partition: PartitionId) -> NodeId {
        self.localities()[partition.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_wraps() {
        let placement = RoundRobin::new(3);
        let nodes: Vec<_> = (0..5).map(|p| placement.node_of(PartitionId(p)).0).collect();
        assert_eq!(nodes, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_zero_nodes_means_one() {
        assert_eq!(RoundRobin::new(0).node_of(PartitionId(7)), NodeId(0));
    }
}
