//! Walk driver: spawn, wire and start the actors of one routed operation.
//!
//! The driver returns the output array as soon as every route has been
//! started. Partitions resolve one by one while the actors hand routes to
//! each other in the background.
//!
//! Write rules may depend on inputs that are still being produced. An actor
//! whose rule is not ready yet starts anyway and receives the rule later, so
//! one slow input partition only delays the routes crossing it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use acton_reactive::prelude::*;
use anyhow::{bail, Context, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actors::{WalkActor, WalkComponent, WalkRule};
use crate::array::{PartitionHandle, PartitionId, PartitionedArray};
use crate::config::EngineConfig;
use crate::messages::{AbandonWalk, SetWalkRule};
use crate::payload::Payload;
use crate::placement::Localities;
use crate::route::{RoutePartition, SerialRoute};

/// Walk every route of `route`, starting each with a copy of `initial_payload`.
///
/// `make_rule` is called once per route partition, in partition order. The
/// returned future builds the write rule of the actor owning the partition.
/// Rules that are ready right away are installed before the actor starts.
/// The others are awaited in the background. If one of them fails, every
/// actor of the walk is abandoned and the output partitions that were not
/// published yet resolve to errors.
pub async fn walk<W, F, Fut>(
    runtime: &mut ActorRuntime,
    config: &EngineConfig,
    route: &SerialRoute<W::RouteId>,
    initial_payload: W::Payload,
    mut make_rule: F,
) -> Result<PartitionedArray<W::Output>>
where
    W: WalkRule,
    F: FnMut(&RoutePartition<W::RouteId>) -> Fut,
    Fut: Future<Output = Result<W>> + Send + 'static,
{
    if config.validate_routes {
        route.validate().context("refusing to walk an invalid route")?;
    }

    let run_id = Uuid::new_v4().simple().to_string();
    let run_id = &run_id[..8];

    info!(
        run_id,
        routes = route.nr_routes(),
        partitions = route.partitions().len(),
        fragments = route
            .partitions()
            .iter()
            .map(|partition| partition.nr_route_fragments())
            .sum::<usize>(),
        "Starting route walk"
    );

    let mut components: Vec<WalkComponent<W>> = Vec::with_capacity(route.partitions().len());
    let mut pending_rules: Vec<(PartitionId, BoxFuture<'static, Result<W>>)> = Vec::new();

    for route_partition in route.partitions() {
        let id = route_partition.id();
        let node = route.locality(id);
        let mut rule_future = make_rule(route_partition.as_ref()).boxed();
        let rule = match (&mut rule_future).now_or_never() {
            Some(rule) => {
                Some(rule.with_context(|| format!("building walk rule for partition {}", id))?)
            }
            None => {
                pending_rules.push((id, rule_future));
                None
            }
        };
        let name = format!("{}:{}:{}@{}", config.actor_name_prefix, run_id, id, node);

        let component = WalkActor::new(name, node, Arc::clone(route_partition), rule)
            .spawn(runtime)
            .await;
        components.push(component);
    }

    let results: Vec<PartitionHandle<W::Output>> = components
        .iter_mut()
        .map(WalkComponent::result_partition)
        .collect();

    // Wiring is queued before any walk, so every actor sees it first
    for (component, route_partition) in components.iter().zip(route.partitions()) {
        let downstream: HashMap<_, _> = route_partition
            .downstream_partitions()
            .into_iter()
            .map(|id| (id, components[id.0].handle().clone()))
            .collect();
        component.set_downstream_components(downstream).await;
    }

    for (&route_id, &start) in route.starts() {
        if initial_payload.keep_going() {
            components[start.0]
                .walk(route_id, initial_payload.clone())
                .await;
        } else {
            components[start.0].skip_walking_route_fragments(route_id).await;
        }
    }

    debug!(
        run_id,
        routes = route.nr_routes(),
        pending_rules = pending_rules.len(),
        "All routes started"
    );

    if !pending_rules.is_empty() {
        let handles: Arc<Vec<ActorHandle>> =
            Arc::new(components.iter().map(|c| c.handle().clone()).collect());

        for (id, rule_future) in pending_rules {
            let handles = Arc::clone(&handles);
            let run_id = run_id.to_string();
            tokio::spawn(async move {
                match rule_future.await {
                    Ok(rule) => {
                        handles[id.0]
                            .send(SetWalkRule {
                                rule: Arc::new(rule),
                            })
                            .await;
                    }
                    Err(error) => {
                        warn!(
                            run_id = %run_id,
                            partition = %id,
                            error = %format!("{:#}", error),
                            "Walk rule unavailable, abandoning walk"
                        );
                        for handle in handles.iter() {
                            handle.send(AbandonWalk).await;
                        }
                    }
                }
            });
        }
    }

    // Actors stay referenced until their last output partition resolved
    let pending = results.clone();
    let run_id = run_id.to_string();
    tokio::spawn(async move {
        let resolved = join_all(pending.iter().map(PartitionHandle::get)).await;
        let nr_failed = resolved.iter().filter(|result| result.is_err()).count();
        drop(components);
        debug!(run_id = %run_id, failed = nr_failed, "Route walk finished");
    });

    Ok(PartitionedArray::new(
        *route.partitioning(),
        route.localities().to_vec(),
        results,
    ))
}

/// Check that an input array is partitioned and placed like the route.
pub fn ensure_co_partitioned<Id, T>(route: &SerialRoute<Id>, array: &PartitionedArray<T>) -> Result<()>
where
    Id: crate::route::RouteId,
    T: crate::array::Element,
{
    if route.partitioning() != array.partitioning() {
        bail!(
            "input array partitioning {:?} does not match route partitioning {:?}",
            array.partitioning(),
            route.partitioning()
        );
    }
    if route.localities() != array.localities() {
        bail!("input array partitions live on other nodes than the route partitions");
    }
    Ok(())
}
