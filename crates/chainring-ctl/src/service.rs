//! The refresh loop.
//!
//! One cycle, in order:
//!
//! 1. rebuild the indices from the controller
//! 2. record which member nodes are online and reconcile admission
//! 3. schedule offline handling for chain nodes that disappeared
//! 4. schedule bootstrap for newly registered nodes
//! 5. run scheduled topology jobs under the retry policy
//! 6. finish pending attachments, close or unwrap the ring, reclaim orphans
//! 7. publish cfg messages for nodes whose networks changed
//!
//! Controller failures end the cycle early and are retried on the next one.
//! Queue failures are fatal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chainring_index::NodeId;
use chainring_queue::{
    boot_list, drain_registered, make_cfg_msg, manage_incoming_nodes, publish_cfg_msg, push_boot,
    retract_node, set_boot_list, set_online_nodes, CfgMsg, QueueStore,
};
use chainring_topology::{
    find_dangling_nets, CloseOutcome, ControllerClient, ControllerState, JobContext, NeighborIds,
    RetryJob, RetryPolicy, Topology, TopologyError, Verdict,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};

/// Period between controller identity probes at startup.
const STARTUP_PROBE: Duration = Duration::from_secs(5);

/// A scheduled topology change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyOp {
    Bootstrap(NodeId),
    Offline(NodeId),
}

impl TopologyOp {
    fn node(&self) -> &NodeId {
        match self {
            TopologyOp::Bootstrap(n) | TopologyOp::Offline(n) => n,
        }
    }

    fn name(&self) -> String {
        match self {
            TopologyOp::Bootstrap(n) => format!("bootstrap:{}", n),
            TopologyOp::Offline(n) => format!("offline:{}", n),
        }
    }
}

/// A scheduled op with its retry state.
#[derive(Debug)]
struct PendingJob {
    op: TopologyOp,
    ctx: JobContext,
    // neighbours of an offline node, fixed by its first attempt
    plan: Option<NeighborIds>,
}

impl PendingJob {
    fn new(op: TopologyOp) -> Self {
        Self {
            op,
            ctx: JobContext::new(),
            plan: None,
        }
    }

    /// Bootstrap of a configured exit node.
    fn is_exit_bootstrap(&self, exit_nodes: &[NodeId]) -> bool {
        matches!(&self.op, TopologyOp::Bootstrap(n) if exit_nodes.contains(n))
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// The controller failed and the cycle stopped early.
    pub skipped: bool,
    pub online: usize,
    pub bootstrapped: Vec<String>,
    pub removed: Vec<String>,
    pub connected: usize,
    pub closed: Option<String>,
    pub unwrapped: bool,
    pub reclaimed: usize,
    pub published: usize,
}

/// Owns the indices and drives the topology engine.
pub struct ControllerService<C> {
    config: ControllerConfig,
    store: Arc<QueueStore>,
    topology: Topology<C>,
    state: ControllerState,
    policy: RetryPolicy,
    ctlr: Option<NodeId>,
    pending: Vec<PendingJob>,
    published: HashMap<NodeId, CfgMsg>,
}

/// Controller faults end the cycle; anything else is fatal.
fn controller_fault(step: &str, err: TopologyError) -> Result<()> {
    match err {
        TopologyError::Client(_) | TopologyError::Decode(_) => {
            warn!("Cycle stopped at {}: {}", step, err);
            Ok(())
        }
        other => Err(Error::Topology(other)),
    }
}

impl<C: ControllerClient> ControllerService<C> {
    pub fn new(config: ControllerConfig, store: Arc<QueueStore>, client: C) -> Self {
        let topology = Topology::new(client, config.topology());
        let policy = RetryPolicy::new(config.max_retry);
        Self {
            config,
            store,
            topology,
            state: ControllerState::new(),
            policy,
            ctlr: None,
            pending: Vec::new(),
            published: HashMap::new(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn topology(&self) -> &Topology<C> {
        &self.topology
    }

    /// Scheduled jobs that have not finished yet.
    pub fn pending(&self) -> Vec<TopologyOp> {
        self.pending.iter().map(|job| job.op.clone()).collect()
    }

    /// Resolve the controller's node ID, probing until it answers or the
    /// retry budget runs out.
    pub async fn start(&mut self) -> Result<NodeId> {
        if let Some(ctlr) = &self.ctlr {
            return Ok(ctlr.clone());
        }
        let client = self.topology.client();
        let job = RetryJob::new("controller-id", self.policy, |_ctx| async move {
            client.controller_id().await.map(|id| ("UP", id))
        });
        let (_, ctlr) = job
            .run_every(STARTUP_PROBE)
            .await
            .ok_or_else(|| Error::Unavailable(format!("no answer from {}", self.config.controller_url)))?;
        info!("Controller node is {}", ctlr);
        self.ctlr = Some(ctlr.clone());
        Ok(ctlr)
    }

    /// Run cycles every refresh interval until a fatal error.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let report = self.run_cycle().await?;
            debug!(
                "Cycle finished: {:?}, state {}",
                report,
                serde_json::to_string(&self.state.snapshot()).unwrap_or_default()
            );
        }
    }

    /// One full refresh cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let ctlr = self.start().await?;
        let mut report = CycleReport::default();
        self.state.wait.purge_expired();

        if let Err(e) = self.topology.refresh_state(&mut self.state).await {
            controller_fault("refresh", e)?;
            report.skipped = true;
            return Ok(report);
        }

        let online = match self.topology.client().get_peer_ids().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Cycle stopped at peer listing: {}", e);
                report.skipped = true;
                return Ok(report);
            }
        };
        report.online = online.len();
        let online_set: HashSet<NodeId> = online.iter().cloned().collect();
        set_online_nodes(&self.store, &online)?;

        let placed: HashSet<NodeId> = self.state.adj.node_ids().into_iter().collect();
        manage_incoming_nodes(&self.store, &placed, self.config.max_wait)?;

        self.schedule(&placed, &online_set)?;
        self.run_pending(&ctlr, &online_set, &mut report).await?;

        if !self.converge(&mut report).await? {
            report.skipped = true;
            return Ok(report);
        }

        report.published = self.publish()?;
        Ok(report)
    }

    fn schedule(&mut self, placed: &HashSet<NodeId>, online: &HashSet<NodeId>) -> Result<()> {
        // a node that came back before its offline job ran stays put
        self.pending
            .retain(|job| !matches!(&job.op, TopologyOp::Offline(n) if online.contains(n)));

        for node in placed {
            if online.contains(node) || self.state.wait.contains(node) {
                continue;
            }
            self.enqueue(TopologyOp::Offline(node.clone()));
        }
        for node in drain_registered(&self.store)? {
            if placed.contains(&node) {
                // its last cfg was consumed or lost: publish it again
                debug!("Node {} registered again while placed", node);
                self.published.remove(&node);
                continue;
            }
            self.enqueue(TopologyOp::Bootstrap(node));
        }
        Ok(())
    }

    fn enqueue(&mut self, op: TopologyOp) {
        if self.pending.iter().any(|job| job.op.node() == op.node()) {
            return;
        }
        debug!("Scheduled {}", op.name());
        self.pending.push(PendingJob::new(op));
    }

    async fn run_pending(
        &mut self,
        ctlr: &NodeId,
        online: &HashSet<NodeId>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let mut jobs = std::mem::take(&mut self.pending);
        // configured exit nodes go first so one of them heads a new chain
        jobs.sort_by_key(|job| !job.is_exit_bootstrap(&self.config.exit_nodes));
        for job in jobs {
            let PendingJob { op, mut ctx, mut plan } = job;
            let outcome = match &op {
                TopologyOp::Bootstrap(node) => {
                    // one dangling network at most: a chain only ever has one tail
                    let is_exit = find_dangling_nets(&self.state.adj, None).is_empty();
                    if !is_exit && self.config.exit_nodes.contains(node) {
                        info!("Exit node {} joins the existing chain", node);
                    }
                    self.topology
                        .bootstrap(&mut self.state, node, ctlr, is_exit)
                        .await
                }
                TopologyOp::Offline(node) => {
                    self.topology
                        .offline(&mut self.state, node, &mut plan)
                        .await
                }
            };
            match self.policy.evaluate(&op.name(), &mut ctx, outcome) {
                Verdict::Done(_) => match &op {
                    TopologyOp::Bootstrap(node) => {
                        push_boot(&self.store, node)?;
                        report.bootstrapped.push(node.to_string());
                    }
                    TopologyOp::Offline(node) => {
                        retract_node(&self.store, node)?;
                        self.published.remove(node);
                        report.removed.push(node.to_string());
                    }
                },
                Verdict::Retry { .. } => {
                    if matches!(&op, TopologyOp::Bootstrap(n) if !online.contains(n)) {
                        warn!("Dropping {}: node went offline", op.name());
                    } else {
                        self.pending.push(PendingJob { op, ctx, plan });
                    }
                }
                Verdict::Exhausted | Verdict::Cancelled => {
                    warn!("Gave up on {}", op.name());
                }
            }
        }
        Ok(())
    }

    /// Finish attachments, close or unwrap, reclaim orphans. False if the
    /// controller failed along the way.
    async fn converge(&mut self, report: &mut CycleReport) -> Result<bool> {
        match self.topology.connect_pending(&mut self.state).await {
            Ok(n) => report.connected = n,
            Err(e) => {
                controller_fault("connect", e)?;
                return Ok(false);
            }
        }

        let nodes = self.state.adj.node_ids();
        let boot = boot_list(&self.store)?;
        match self.topology.close(&mut self.state, &nodes, &boot).await {
            Ok(CloseOutcome::Unchanged) => {}
            Ok(outcome) => {
                set_boot_list(&self.store, &[])?;
                report.closed = Some(format!("{:?}", outcome));
            }
            Err(e) => {
                controller_fault("close", e)?;
                return Ok(false);
            }
        }

        let nodes = self.state.adj.node_ids();
        let boot = boot_list(&self.store)?;
        match self.topology.unwrap_ring(&mut self.state, &nodes, &boot).await {
            Ok(Some(order)) => {
                set_boot_list(&self.store, &order)?;
                report.unwrapped = true;
            }
            Ok(None) => {}
            Err(e) => {
                controller_fault("unwrap", e)?;
                return Ok(false);
            }
        }

        match self.topology.cleanup_orphans(&mut self.state).await {
            Ok(n) => report.reclaimed = n,
            Err(e) => {
                controller_fault("cleanup", e)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Publish a cfg message for every placed node whose networks changed
    /// since the last publication.
    fn publish(&mut self) -> Result<usize> {
        let nodes = self.state.adj.node_ids();
        let placed: HashSet<&NodeId> = nodes.iter().collect();
        self.published.retain(|node, _| placed.contains(node));

        let mut count = 0;
        for node in &nodes {
            let Some(cfg) = make_cfg_msg(&self.state.adj, node) else {
                continue;
            };
            if self.published.get(node) == Some(&cfg) {
                continue;
            }
            if publish_cfg_msg(&self.store, &cfg)? {
                count += 1;
            }
            self.published.insert(node.clone(), cfg);
        }
        Ok(count)
    }
}
