//! Integration tests for route walks on a real actor runtime.
//!
//! Every wait on an output array is bounded, so a walk that never finishes a
//! partition fails the test instead of hanging it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use acton_reactive::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::{timeout, Duration};

use route_walk::actors::WalkActor;
use route_walk::algorithms::{IdAssignment, MarkCells};
use route_walk::promise;
use route_walk::{
    ArrayPartition, Cell, Element, EngineConfig, Localities, NodeId, PartitionHandle, PartitionId,
    PartitionedArray, Partitioning, RoundRobin, RouteFragment, RoutePartition, SerialRoute,
    WalkEngine,
};

const WAIT: Duration = Duration::from_secs(10);

async fn dense<T: Element>(array: &PartitionedArray<T>) -> Vec<T> {
    timeout(WAIT, array.to_dense())
        .await
        .expect("output array did not resolve in time")
        .unwrap()
}

/// Boustrophedon over the given rows: left to right, then right to left.
fn serpentine(rows: std::ops::Range<usize>, cols: usize) -> Vec<Cell> {
    let mut cells = Vec::new();
    for (i, row) in rows.enumerate() {
        if i % 2 == 0 {
            cells.extend((0..cols).map(|col| [row, col]));
        } else {
            cells.extend((0..cols).rev().map(|col| [row, col]));
        }
    }
    cells
}

fn linear(cell: Cell, cols: usize) -> usize {
    cell[0] * cols + cell[1]
}

fn engine(nr_nodes: usize) -> WalkEngine {
    WalkEngine::new(EngineConfig {
        nr_nodes,
        ..EngineConfig::default()
    })
}

#[tokio::test]
async fn test_single_partition_route_is_marked() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);

    let partitioning = Partitioning::new([2, 2], [2, 2]).unwrap();
    let route = SerialRoute::from_cell_routes(
        partitioning,
        &engine.placement(),
        [(1_u32, vec![[0, 0], [1, 0], [1, 1]])],
    )
    .unwrap();

    let marked = engine
        .first_n(&mut runtime, &route, u64::MAX)
        .await
        .unwrap();

    assert_eq!(dense(&marked).await, vec![1, u8::NO_DATA, 1, 1]);

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_budget_carries_over_to_next_partition() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(2);

    let partitioning = Partitioning::new([1, 4], [1, 2]).unwrap();
    let route = SerialRoute::from_cell_routes(
        partitioning,
        &engine.placement(),
        [(1_u32, vec![[0, 0], [0, 1], [0, 2], [0, 3]])],
    )
    .unwrap();

    let marked = engine.first_n(&mut runtime, &route, 3).await.unwrap();

    let first = timeout(WAIT, marked.partition(PartitionId(0)).get())
        .await
        .unwrap()
        .unwrap();
    let second = timeout(WAIT, marked.partition(PartitionId(1)).get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.data(), &[1, 1]);
    assert_eq!(second.data(), &[1, u8::NO_DATA]);
    assert_eq!(marked.localities(), &[NodeId(0), NodeId(1)]);

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_budget_still_finishes_every_partition() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(3);

    // Three partitions, the budget runs out inside the first one
    let partitioning = Partitioning::new([1, 6], [1, 2]).unwrap();
    let route = SerialRoute::from_cell_routes(
        partitioning,
        &engine.placement(),
        [(1_u32, serpentine(0..1, 6))],
    )
    .unwrap();

    let marked = engine.first_n(&mut runtime, &route, 1).await.unwrap();

    let mut expected = vec![u8::NO_DATA; 6];
    expected[0] = 1;
    assert_eq!(dense(&marked).await, expected);

    let zero_budget = engine.first_n(&mut runtime, &route, 0).await.unwrap();
    assert!(dense(&zero_budget).await.iter().all(Element::is_no_data));

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_partition_without_routes_resolves_immediately() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);

    let partitioning = Partitioning::new([2, 4], [2, 2]).unwrap();
    let route = SerialRoute::from_cell_routes(
        partitioning,
        &engine.placement(),
        [(1_u32, vec![[0, 0], [0, 1]])],
    )
    .unwrap();

    let marked = engine
        .first_n(&mut runtime, &route, u64::MAX)
        .await
        .unwrap();

    let idle = marked.partition(PartitionId(1));
    assert!(idle.is_ready());
    assert!(idle.get().await.unwrap().data().iter().all(Element::is_no_data));

    assert_eq!(
        dense(&marked).await,
        vec![1, 1, 255, 255, 255, 255, 255, 255]
    );

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_integration_accumulates_along_route() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);

    let partitioning = Partitioning::new([1, 3], [1, 3]).unwrap();
    let route = SerialRoute::from_cell_routes(
        partitioning,
        &engine.placement(),
        [(1_u32, vec![[0, 0], [0, 1], [0, 2]])],
    )
    .unwrap();
    let integrand = PartitionedArray::from_partition_data(
        partitioning,
        &engine.placement(),
        vec![vec![10.0_f64, 20.0, 30.0]],
    )
    .unwrap();

    let sums = engine
        .integrate(&mut runtime, &route, &integrand, u64::MAX)
        .await
        .unwrap();

    assert_eq!(dense(&sums).await, vec![10.0, 30.0, 60.0]);

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_integration_follows_route_across_partitions() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(4);

    // Each zone route snakes through its two rows and crosses every
    // partition column twice
    let (rows, cols) = (6, 8);
    let partitioning = Partitioning::new([rows, cols], [2, 3]).unwrap();
    let routes: Vec<(u32, Vec<Cell>)> = (0..3)
        .map(|zone| (zone as u32, serpentine(zone * 2..zone * 2 + 2, cols)))
        .collect();
    let route =
        SerialRoute::from_cell_routes(partitioning, &engine.placement(), routes.clone()).unwrap();
    let integrand =
        PartitionedArray::from_fn(partitioning, &engine.placement(), |[row, col]| {
            (row * cols + col) as f64
        });

    let budget = 12;
    let sums = engine
        .integrate(&mut runtime, &route, &integrand, budget)
        .await
        .unwrap();
    let sums = dense(&sums).await;

    for (_, cells) in &routes {
        let mut running = 0.0;
        for (position, cell) in cells.iter().enumerate() {
            let idx = linear(*cell, cols);
            if position < budget as usize {
                running += idx as f64;
                assert_eq!(sums[idx], running, "cell {:?}", cell);
            } else {
                assert!(sums[idx].is_no_data(), "cell {:?} past the budget", cell);
            }
        }
    }

    runtime.shutdown_all().await.unwrap();
}

/// Route over a 1 x 4 raster of two partitions, crossing from the first into
/// the second.
fn crossing_route(engine: &WalkEngine) -> SerialRoute<u32> {
    SerialRoute::from_cell_routes(
        Partitioning::new([1, 4], [1, 2]).unwrap(),
        &engine.placement(),
        [(1_u32, vec![[0, 0], [0, 1], [0, 2]])],
    )
    .unwrap()
}

#[tokio::test]
async fn test_integrate_does_not_wait_for_the_integrand() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(2);
    let route = crossing_route(&engine);

    let (promise, pending) = promise::channel::<f64>();
    let ready =
        PartitionHandle::ready(ArrayPartition::new([0, 0], [1, 2], vec![1.0, 2.0]).unwrap());
    let integrand = PartitionedArray::new(
        *route.partitioning(),
        route.localities().to_vec(),
        vec![ready, pending],
    );

    let sums = timeout(
        Duration::from_secs(2),
        engine.integrate(&mut runtime, &route, &integrand, u64::MAX),
    )
    .await
    .expect("integrate waited for a pending integrand partition")
    .unwrap();

    let first = timeout(WAIT, sums.partition(PartitionId(0)).get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.data(), &[1.0, 3.0]);
    assert!(!sums.partition(PartitionId(1)).is_ready());

    promise.fulfil(ArrayPartition::new([0, 2], [1, 2], vec![4.0, 5.0]).unwrap());

    let second = timeout(WAIT, sums.partition(PartitionId(1)).get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.data()[0], 7.0);
    assert!(second.data()[1].is_no_data());

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_integrate_fails_when_integrand_is_never_produced() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);
    let route = crossing_route(&engine);

    let (promise, pending) = promise::channel::<f32>();
    let ready = PartitionHandle::ready(ArrayPartition::filled([0, 0], [1, 2], 1.0_f32));
    let integrand = PartitionedArray::new(
        *route.partitioning(),
        route.localities().to_vec(),
        vec![ready, pending],
    );

    let sums = engine
        .integrate(&mut runtime, &route, &integrand, u64::MAX)
        .await
        .unwrap();
    drop(promise);

    let result = timeout(WAIT, sums.to_dense())
        .await
        .expect("output hung after its integrand was dropped");
    assert!(result.is_err());

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_integrand_must_be_co_partitioned() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);

    let route = SerialRoute::from_cell_routes(
        Partitioning::new([2, 2], [1, 2]).unwrap(),
        &engine.placement(),
        [(1_u32, vec![[0, 0], [1, 0]])],
    )
    .unwrap();
    let integrand = PartitionedArray::from_fn(
        Partitioning::new([2, 2], [2, 2]).unwrap(),
        &engine.placement(),
        |_| 1.0_f32,
    );

    let result = engine.integrate(&mut runtime, &route, &integrand, 10).await;
    assert!(result.is_err());

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_highest_n_marks_top_cells_of_sorted_route() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(2);

    // Distinct values 0..8, scattered over both partitions
    let (rows, cols) = (2, 4);
    let value = |cell: Cell| (linear(cell, cols) * 5) % 8;
    let mut cells: Vec<Cell> = (0..rows)
        .flat_map(|row| (0..cols).map(move |col| [row, col]))
        .collect();
    cells.sort_by_key(|&cell| std::cmp::Reverse(value(cell)));

    let route = SerialRoute::from_cell_routes(
        Partitioning::new([rows, cols], [2, 2]).unwrap(),
        &engine.placement(),
        [(1_u32, cells)],
    )
    .unwrap();

    let marked = engine.highest_n(&mut runtime, &route, 3).await.unwrap();
    let marked = dense(&marked).await;

    // Values 7, 6 and 5 sit at linear indices 3, 6 and 1
    for (idx, &cell) in marked.iter().enumerate() {
        if [1, 3, 6].contains(&idx) {
            assert_eq!(cell, 1, "cell {}", idx);
        } else {
            assert!(cell.is_no_data(), "cell {}", idx);
        }
    }

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_walking_a_broken_route_is_refused() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);

    // Partition 1 holds a fragment nothing hands off to
    let partitions = vec![
        RoutePartition::new(
            PartitionId(0),
            [0, 0],
            [1, 2],
            BTreeMap::from([(1_u32, vec![RouteFragment::new(vec![0], None)])]),
        ),
        RoutePartition::new(
            PartitionId(1),
            [0, 2],
            [1, 2],
            BTreeMap::from([(1_u32, vec![RouteFragment::new(vec![1], None)])]),
        ),
    ];
    let route = SerialRoute::new(
        Partitioning::new([1, 4], [1, 2]).unwrap(),
        vec![NodeId(0); 2],
        BTreeMap::from([(1_u32, PartitionId(0))]),
        partitions,
    );

    let result = engine.first_n(&mut runtime, &route, 10).await;
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("refusing to walk an invalid route"), "{message}");

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
#[should_panic(expected = "requested more than once")]
async fn test_result_partition_can_be_taken_once() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(1);
    let route = crossing_route(&engine);

    let mut component = WalkActor::new(
        "Walk:result-once".to_string(),
        NodeId(0),
        Arc::clone(route.partition(PartitionId(1))),
        Some(MarkCells::<u32>::default()),
    )
    .spawn(&mut runtime)
    .await;

    let _first = component.result_partition();
    let _second = component.result_partition();
}

#[tokio::test]
async fn test_unique_ids_follow_completion_order() {
    let partitioning = Partitioning::new([1, 15], [1, 5]).unwrap();
    let (promises, handles): (Vec<_>, Vec<PartitionHandle<u8>>) =
        (0..3).map(|_| promise::channel::<u8>()).unzip();
    let condition = PartitionedArray::new(partitioning, vec![NodeId(0); 3], handles);

    let engine = engine(1);
    let run = engine.schedule_unique_ids(&condition);
    let ids = run.ids.clone();

    let condition_data = [
        vec![1, 1, 0, 0, u8::NO_DATA],
        vec![1, 1, 1, 1, 1],
        vec![0, 1, 1, 1, 0],
    ];
    let partition = |id: usize| {
        route_walk::ArrayPartition::new(
            partitioning.partition_offset(PartitionId(id)),
            partitioning.partition_shape_of(PartitionId(id)),
            condition_data[id].clone(),
        )
        .unwrap()
    };

    // Release the counts out of index order, one at a time
    promises[1].fulfil(partition(1));
    let second = timeout(WAIT, ids.partition(PartitionId(1)).get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.data(), &[1, 2, 3, 4, 5]);

    promises[0].fulfil(partition(0));
    let first = timeout(WAIT, ids.partition(PartitionId(0)).get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.data(), &[6, 7, 0, 0, u64::NO_DATA]);

    promises[2].fulfil(partition(2));
    let third = timeout(WAIT, ids.partition(PartitionId(2)).get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(third.data(), &[0, 8, 9, 10, 0]);

    let assignments = timeout(WAIT, run.assignments()).await.unwrap().unwrap();
    assert_eq!(
        assignments,
        vec![
            IdAssignment {
                partition: PartitionId(1),
                first: 1,
                count: 5
            },
            IdAssignment {
                partition: PartitionId(0),
                first: 6,
                count: 2
            },
            IdAssignment {
                partition: PartitionId(2),
                first: 8,
                count: 3
            },
        ]
    );
}

#[tokio::test]
async fn test_unique_id_fails_when_condition_is_never_produced() {
    let partitioning = Partitioning::new([1, 2], [1, 1]).unwrap();
    let (promise, pending) = promise::channel::<u8>();
    let ready = PartitionHandle::ready(route_walk::ArrayPartition::filled([0, 1], [1, 1], 1));
    let condition = PartitionedArray::new(partitioning, vec![NodeId(0); 2], vec![pending, ready]);

    let run = engine(1).schedule_unique_ids(&condition);
    let ids = run.ids.clone();

    drop(promise);

    assert!(timeout(WAIT, run.assignments()).await.unwrap().is_err());
    assert!(timeout(WAIT, ids.to_dense()).await.unwrap().is_err());
}

#[tokio::test]
async fn test_random_routes_are_walked_completely() {
    let mut runtime = ActonApp::launch_async().await;
    let engine = engine(3);
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    for _ in 0..5 {
        let rows = rng.random_range(1..=9);
        let cols = rng.random_range(1..=9);
        let partitioning =
            Partitioning::new([rows, cols], [rng.random_range(1..=4), rng.random_range(1..=4)]).unwrap();

        // Random cell-disjoint routes covering a random share of the raster
        let mut cells: Vec<Cell> = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| [row, col]))
            .collect();
        cells.shuffle(&mut rng);
        cells.truncate(rng.random_range(0..=cells.len()));

        let mut routes: Vec<(u64, Vec<Cell>)> = Vec::new();
        while !cells.is_empty() {
            let len = rng.random_range(1..=cells.len());
            let route_cells: Vec<Cell> = cells.drain(..len).collect();
            routes.push((routes.len() as u64 * 7 + 3, route_cells));
        }

        let route =
            SerialRoute::from_cell_routes(partitioning, &engine.placement(), routes.clone())
                .unwrap();

        // Routes never share a cell within a partition
        for partition in route.partitions() {
            let mut seen = HashSet::new();
            for route_id in partition.route_ids() {
                for fragment in partition.route_fragments(route_id).unwrap() {
                    for &cell_idx in fragment.cell_idxs() {
                        assert!(seen.insert(cell_idx));
                    }
                }
            }
        }

        let budget = rng.random_range(0..=rows * cols) as u64;
        let marked = engine.first_n(&mut runtime, &route, budget).await.unwrap();
        let integrand = PartitionedArray::from_fn(partitioning, &RoundRobin::new(3), |_| 1_u32);
        let counts = engine
            .integrate(&mut runtime, &route, &integrand, budget)
            .await
            .unwrap();

        let marked = dense(&marked).await;
        let counts = dense(&counts).await;

        let mut on_route: BTreeMap<usize, usize> = BTreeMap::new();
        for (_, cells) in &routes {
            for (position, cell) in cells.iter().enumerate() {
                on_route.insert(linear(*cell, cols), position);
            }
        }

        for idx in 0..rows * cols {
            match on_route.get(&idx) {
                Some(&position) if (position as u64) < budget => {
                    assert_eq!(marked[idx], 1);
                    assert_eq!(counts[idx], position as u32 + 1);
                }
                _ => {
                    assert!(marked[idx].is_no_data());
                    assert!(counts[idx].is_no_data());
                }
            }
        }
    }

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_random_unique_ids_cover_contiguous_range() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let partitioning = Partitioning::new([7, 11], [3, 4]).unwrap();
    let condition = PartitionedArray::from_fn(partitioning, &RoundRobin::new(2), |_| {
        match rng.random_range(0..4) {
            0 => u8::NO_DATA,
            1 => 0,
            _ => rng.random_range(1..=9),
        }
    });
    let flags = dense(&condition).await;
    let nr_flagged = flags
        .iter()
        .filter(|value| !value.is_no_data() && **value != 0)
        .count() as u64;

    let run = engine(2).schedule_unique_ids(&condition);
    let ids = dense(&run.ids).await;

    let mut assigned: Vec<u64> = ids
        .iter()
        .copied()
        .filter(|id| !id.is_no_data() && *id != 0)
        .collect();
    assigned.sort_unstable();
    assert_eq!(assigned, (1..=nr_flagged).collect::<Vec<_>>());

    for (flag, id) in flags.iter().zip(&ids) {
        if flag.is_no_data() {
            assert!(id.is_no_data());
        } else if *flag == 0 {
            assert_eq!(*id, 0);
        }
    }

    let assignments = timeout(WAIT, run.assignments()).await.unwrap().unwrap();
    assert_eq!(assignments.len(), partitioning.nr_partitions());
    assert_eq!(
        assignments.iter().map(|a| a.count).sum::<u64>(),
        nr_flagged
    );
}
