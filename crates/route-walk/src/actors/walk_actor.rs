//! WalkActor: owner of one partition's share of a route walk.
//!
//! Each route partition is represented by its own actor, providing:
//! - Exclusive ownership of the output partition and per-route progress
//! - Serialized processing via the actor mailbox (one message at a time)
//! - Fire-and-forget handoff of routes to downstream partitions
//!
//! The transitions themselves live on [`WalkActorState`] as plain methods so
//! they can be exercised without a runtime. The actor handlers only forward
//! whatever [`Handoff`] a transition produces.
//!
//! An actor may start before its write rule exists, for instance while the
//! input partition the rule reads is still being produced. Walks arriving in
//! the meantime are queued and replayed once the rule is set.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use acton_reactive::prelude::*;
use tracing::{debug, trace, warn};

use crate::array::{ArrayPartition, PartitionHandle, PartitionId};
use crate::messages::{
    AbandonWalk, SetDownstreamComponents, SetWalkRule, SkipRouteFragments, WalkRoute,
};
use crate::payload::Payload;
use crate::placement::NodeId;
use crate::promise::{self, Promise};
use crate::route::{RouteFragment, RouteId, RoutePartition};

/// Per-algorithm rule for what a visited cell receives.
///
/// One rule instance exists per partition, so a rule may hold partition-local
/// inputs (e.g. the co-partitioned integrand).
pub trait WalkRule: Send + Sync + 'static {
    type RouteId: RouteId;
    type Payload: Payload;
    type Output: crate::array::Element;

    /// Write the output value for one cell. Called only while
    /// `payload.keep_going()`; the caller advances the payload afterwards.
    fn visit(
        &self,
        route_id: Self::RouteId,
        payload: &mut Self::Payload,
        cell_idx: usize,
        output: &mut [Self::Output],
    );
}

/// What a walk actor forwards after processing a fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Forward<Id, P> {
    /// The budget allows more cells: continue downstream
    Walk { route_id: Id, payload: P },
    /// The budget is exhausted: downstream only does the bookkeeping
    Skip { route_id: Id },
}

/// A message to deliver to the downstream partition of a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Handoff<H, Id, P> {
    pub downstream: PartitionId,
    pub target: H,
    pub forward: Forward<Id, P>,
}

/// Actor state for a single route partition.
///
/// `H` is the address type of downstream actors.
pub struct WalkActorState<W: WalkRule, H = ActorHandle> {
    /// Partition this actor owns
    pub partition_id: PartitionId,
    /// Node the partition lives on
    pub node: NodeId,
    /// Write rule, `None` until its inputs are available
    rule: Option<Arc<W>>,
    /// Walks that arrived before the rule, in arrival order
    queued: Vec<(W::RouteId, W::Payload)>,
    route_partition: Option<Arc<RoutePartition<W::RouteId>>>,
    /// Output being filled in, taken when the partition finishes
    output: Option<ArrayPartition<W::Output>>,
    /// Index of the next fragment to handle, per route still passing through
    fragment_idxs: BTreeMap<W::RouteId, usize>,
    /// Downstream actor per route partition, set once during wiring
    downstream: HashMap<PartitionId, H>,
    wired: bool,
    promise: Option<Promise<W::Output>>,
    finished: bool,
    abandoned: bool,
}

impl<W: WalkRule, H> Default for WalkActorState<W, H> {
    fn default() -> Self {
        Self {
            partition_id: PartitionId(0),
            node: NodeId(0),
            rule: None,
            queued: Vec::new(),
            route_partition: None,
            output: None,
            fragment_idxs: BTreeMap::new(),
            downstream: HashMap::new(),
            wired: false,
            promise: None,
            finished: false,
            abandoned: false,
        }
    }
}

impl<W: WalkRule, H: Clone> Clone for WalkActorState<W, H> {
    fn clone(&self) -> Self {
        Self {
            partition_id: self.partition_id,
            node: self.node,
            rule: self.rule.clone(),
            queued: self.queued.clone(),
            route_partition: self.route_partition.clone(),
            output: self.output.clone(),
            fragment_idxs: self.fragment_idxs.clone(),
            downstream: self.downstream.clone(),
            wired: self.wired,
            promise: self.promise.clone(),
            finished: self.finished,
            abandoned: self.abandoned,
        }
    }
}

impl<W: WalkRule, H: Clone> std::fmt::Debug for WalkActorState<W, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkActorState")
            .field("partition_id", &self.partition_id)
            .field("node", &self.node)
            .field("pending_routes", &self.nr_pending_routes())
            .field("queued_walks", &self.queued.len())
            .field("has_rule", &self.rule.is_some())
            .field("downstream", &self.downstream.keys().collect::<Vec<_>>())
            .field("wired", &self.wired)
            .field("finished", &self.finished)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}

impl<W: WalkRule, H: Clone> WalkActorState<W, H> {
    /// Set up the state for one route partition.
    ///
    /// Every cell of the output starts as no-data. Every route passing through
    /// the partition starts at fragment zero. Without a rule, walks are queued
    /// until [`set_rule`](Self::set_rule) is called.
    pub fn new(
        route_partition: Arc<RoutePartition<W::RouteId>>,
        rule: Option<Arc<W>>,
        node: NodeId,
        promise: Promise<W::Output>,
    ) -> Self {
        let output = ArrayPartition::no_data(route_partition.offset(), route_partition.shape());
        let fragment_idxs = route_partition.route_ids().map(|id| (id, 0)).collect();

        Self {
            partition_id: route_partition.id(),
            node,
            rule,
            queued: Vec::new(),
            route_partition: Some(route_partition),
            output: Some(output),
            fragment_idxs,
            downstream: HashMap::new(),
            wired: false,
            promise: Some(promise),
            finished: false,
            abandoned: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Number of routes with fragments still to handle here.
    pub fn nr_pending_routes(&self) -> usize {
        self.fragment_idxs.len()
    }

    pub fn set_downstream_components(&mut self, components: HashMap<PartitionId, H>) {
        self.downstream = components;
        self.wired = true;
    }

    /// Finish right away when no route passes through this partition.
    pub fn finish_if_idle(&mut self) -> bool {
        if !self.finished && self.fragment_idxs.is_empty() {
            self.finish_partition();
            return true;
        }
        false
    }

    /// Install the write rule and replay the walks queued without it.
    ///
    /// Returns the handoffs of the replayed walks, in order.
    pub fn set_rule(&mut self, rule: Arc<W>) -> Vec<Handoff<H, W::RouteId, W::Payload>> {
        if self.abandoned {
            return Vec::new();
        }
        assert!(
            self.rule.is_none(),
            "partition {}: walk rule set more than once",
            self.partition_id
        );
        self.rule = Some(rule);

        let queued = std::mem::take(&mut self.queued);
        if !queued.is_empty() {
            debug!(
                partition = %self.partition_id,
                walks = queued.len(),
                "Replaying walks queued before the rule"
            );
        }

        queued
            .into_iter()
            .filter_map(|(route_id, payload)| self.walk(route_id, payload))
            .collect()
    }

    /// Give up on this partition without publishing its output.
    ///
    /// Used when the rule can never be built. Waiting consumers see an error
    /// instead of hanging, and later walks or skips are ignored.
    pub fn abandon(&mut self) {
        if self.finished || self.abandoned {
            return;
        }

        self.abandoned = true;
        if let Some(promise) = self.promise.take() {
            promise.abandon();
        }
        self.output = None;
        self.queued.clear();
        self.downstream.clear();

        warn!(partition = %self.partition_id, node = %self.node, "Walk partition abandoned");
    }

    /// Walk the current fragment of `route_id`.
    ///
    /// Cells are visited in order for as long as the payload allows. When the
    /// fragment is not the route's last, the returned handoff continues the
    /// route downstream, as a walk or, with an exhausted budget, as a skip.
    /// Before the rule is set the walk is queued and nothing is handed off.
    pub fn walk(
        &mut self,
        route_id: W::RouteId,
        mut payload: W::Payload,
    ) -> Option<Handoff<H, W::RouteId, W::Payload>> {
        if self.abandoned {
            return None;
        }

        let route_partition = Arc::clone(self.route_partition());
        let (fragment_idx, fragments) = self.current_fragment(&route_partition, route_id);

        let Some(rule) = self.rule.clone() else {
            trace!(
                partition = %self.partition_id,
                route_id = ?route_id,
                "Queued walk until the rule is set"
            );
            self.queued.push((route_id, payload));
            return None;
        };
        let fragment = &fragments[fragment_idx];

        let output = self.output.as_mut().unwrap_or_else(|| {
            panic!(
                "partition {}: walk of route {:?} after the partition finished",
                self.partition_id, route_id
            )
        });

        let mut nr_visited = 0;
        for &cell_idx in fragment.cell_idxs() {
            if !payload.keep_going() {
                break;
            }
            rule.visit(route_id, &mut payload, cell_idx, output.data_mut());
            payload.advance();
            nr_visited += 1;
        }

        trace!(
            partition = %self.partition_id,
            route_id = ?route_id,
            fragment = fragment_idx,
            visited = nr_visited,
            cells = fragment.cell_idxs().len(),
            "Walked route fragment"
        );

        let handoff = match fragment.next_fragment_location() {
            Some(downstream) => {
                let forward = if payload.keep_going() {
                    Forward::Walk { route_id, payload }
                } else {
                    Forward::Skip { route_id }
                };
                Some(self.handoff(downstream, forward))
            }
            None => None,
        };

        self.advance_fragment(route_id, fragments.len());

        handoff
    }

    /// Account for the current fragment of `route_id` without writing cells.
    pub fn skip_walking_route_fragments(
        &mut self,
        route_id: W::RouteId,
    ) -> Option<Handoff<H, W::RouteId, W::Payload>> {
        if self.abandoned {
            return None;
        }

        let route_partition = Arc::clone(self.route_partition());
        let (fragment_idx, fragments) = self.current_fragment(&route_partition, route_id);
        let fragment = &fragments[fragment_idx];

        trace!(
            partition = %self.partition_id,
            route_id = ?route_id,
            fragment = fragment_idx,
            "Skipped route fragment"
        );

        let handoff = fragment
            .next_fragment_location()
            .map(|downstream| self.handoff(downstream, Forward::Skip { route_id }));

        self.advance_fragment(route_id, fragments.len());

        handoff
    }

    fn route_partition(&self) -> &Arc<RoutePartition<W::RouteId>> {
        self.route_partition
            .as_ref()
            .expect("walk actor state without a route partition")
    }

    fn current_fragment<'a>(
        &self,
        route_partition: &'a RoutePartition<W::RouteId>,
        route_id: W::RouteId,
    ) -> (usize, &'a [RouteFragment]) {
        let fragments = route_partition.route_fragments(route_id).unwrap_or_else(|| {
            panic!(
                "partition {}: route {:?} does not pass through this partition",
                self.partition_id, route_id
            )
        });
        let fragment_idx = *self.fragment_idxs.get(&route_id).unwrap_or_else(|| {
            panic!(
                "partition {}: route {:?} has no unprocessed fragments left",
                self.partition_id, route_id
            )
        });
        assert!(fragment_idx < fragments.len());

        (fragment_idx, fragments)
    }

    fn handoff(
        &self,
        downstream: PartitionId,
        forward: Forward<W::RouteId, W::Payload>,
    ) -> Handoff<H, W::RouteId, W::Payload> {
        assert!(
            self.wired,
            "partition {}: handoff to partition {} before downstream components were set",
            self.partition_id, downstream
        );
        let target = self.downstream.get(&downstream).cloned().unwrap_or_else(|| {
            panic!(
                "partition {}: no downstream component for partition {}",
                self.partition_id, downstream
            )
        });

        Handoff {
            downstream,
            target,
            forward,
        }
    }

    fn advance_fragment(&mut self, route_id: W::RouteId, nr_fragments: usize) {
        let Some(fragment_idx) = self.fragment_idxs.get_mut(&route_id) else {
            return;
        };
        *fragment_idx += 1;

        if *fragment_idx == nr_fragments {
            // Last fragment of this route in this partition
            self.fragment_idxs.remove(&route_id);

            if self.fragment_idxs.is_empty() {
                self.finish_partition();
            }
        }
    }

    fn finish_partition(&mut self) {
        assert!(
            !self.finished,
            "partition {} finished more than once",
            self.partition_id
        );
        assert!(self.fragment_idxs.is_empty());

        let output = self.output.take().expect("walk actor state without an output");
        let promise = self.promise.take().expect("walk actor state without a promise");

        promise.fulfil(output);
        self.downstream.clear();
        self.finished = true;

        debug!(partition = %self.partition_id, node = %self.node, "Walk partition finished");
    }
}

/// Actor owning one route partition of a walk.
pub struct WalkActor<W: WalkRule> {
    /// Actor name
    pub name: String,
    /// Node the route partition lives on
    pub node: NodeId,
    /// The partition's slice of all routes
    pub route_partition: Arc<RoutePartition<W::RouteId>>,
    /// Write rule for this partition, if already available
    pub rule: Option<W>,
}

impl<W: WalkRule> WalkActor<W> {
    pub fn new(
        name: String,
        node: NodeId,
        route_partition: Arc<RoutePartition<W::RouteId>>,
        rule: Option<W>,
    ) -> Self {
        Self {
            name,
            node,
            route_partition,
            rule,
        }
    }

    /// Spawn this walk actor in the given runtime.
    ///
    /// A partition without route fragments is finished before the actor starts.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> WalkComponent<W> {
        let partition_id = self.route_partition.id();
        let node = self.node;
        let (promise, result) = promise::channel();

        let mut actor = runtime.new_actor_with_name::<WalkActorState<W>>(self.name);

        actor.model = WalkActorState::new(
            self.route_partition,
            self.rule.map(Arc::new),
            self.node,
            promise,
        );
        actor.model.finish_if_idle();

        configure_walk_actor(&mut actor);

        let handle = actor.start().await;

        WalkComponent {
            partition_id,
            node,
            handle,
            result: Some(result),
        }
    }
}

/// Configure message handlers for the WalkActor.
///
/// `mutate_on` processes one message at a time, so the fragment lookup, the
/// cell loop, the index advance and the completion check are atomic with
/// respect to every other message for this partition.
fn configure_walk_actor<W: WalkRule>(actor: &mut ManagedActor<Idle, WalkActorState<W>>) {
    actor.mutate_on::<SetDownstreamComponents>(|actor, context| {
        let components = context.message().components.clone();
        actor.model.set_downstream_components(components);
        Reply::ready()
    });

    actor.mutate_on::<WalkRoute<W::RouteId, W::Payload>>(|actor, context| {
        let msg = context.message().clone();
        let handoff = actor.model.walk(msg.route_id, msg.payload);
        send_handoff(handoff);
        Reply::ready()
    });

    actor.mutate_on::<SkipRouteFragments<W::RouteId>>(|actor, context| {
        let route_id = context.message().route_id;
        let handoff = actor.model.skip_walking_route_fragments(route_id);
        send_handoff(handoff);
        Reply::ready()
    });

    actor.mutate_on::<SetWalkRule<W>>(|actor, context| {
        let rule = Arc::clone(&context.message().rule);
        for handoff in actor.model.set_rule(rule) {
            send_handoff(Some(handoff));
        }
        Reply::ready()
    });

    actor.mutate_on::<AbandonWalk>(|actor, _context| {
        actor.model.abandon();
        Reply::ready()
    });
}

fn send_handoff<Id: RouteId, P: Payload>(handoff: Option<Handoff<ActorHandle, Id, P>>) {
    let Some(Handoff { target, forward, .. }) = handoff else {
        return;
    };

    // Detached so a full downstream mailbox never stalls this actor
    tokio::spawn(async move {
        match forward {
            Forward::Walk { route_id, payload } => {
                target.send(WalkRoute { route_id, payload }).await;
            }
            Forward::Skip { route_id } => {
                target.send(SkipRouteFragments { route_id }).await;
            }
        }
    });
}

/// Driver-side client of a spawned walk actor.
pub struct WalkComponent<W: WalkRule> {
    partition_id: PartitionId,
    node: NodeId,
    handle: ActorHandle,
    result: Option<PartitionHandle<W::Output>>,
}

impl<W: WalkRule> std::fmt::Debug for WalkComponent<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkComponent")
            .field("partition_id", &self.partition_id)
            .field("node", &self.node)
            .field("result_taken", &self.result.is_none())
            .finish()
    }
}

impl<W: WalkRule> WalkComponent<W> {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    /// Handle to the eventual output partition. May be taken exactly once.
    pub fn result_partition(&mut self) -> PartitionHandle<W::Output> {
        self.result.take().unwrap_or_else(|| {
            panic!(
                "result partition of walk component {} requested more than once",
                self.partition_id
            )
        })
    }

    pub async fn set_downstream_components(&self, components: HashMap<PartitionId, ActorHandle>) {
        self.handle
            .send(SetDownstreamComponents { components })
            .await;
    }

    pub async fn walk(&self, route_id: W::RouteId, payload: W::Payload) {
        self.handle.send(WalkRoute { route_id, payload }).await;
    }

    pub async fn skip_walking_route_fragments(&self, route_id: W::RouteId) {
        self.handle.send(SkipRouteFragments { route_id }).await;
    }
}
