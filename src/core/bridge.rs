//! Bridge orchestrator: one client session end to end
//!
//! provision subscription -> register -> run both flows -> on the first
//! terminal signal stop the other flow -> join both -> close the
//! subscription -> unregister.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::broker::BrokerConnection;
use crate::constants::{DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_MEDIUM_NAME};
use crate::core::broadcast::BroadcastMedium;
use crate::core::relay::{run_inbound, run_outbound, FlowContext, FlowEnd, FlowStats};
use crate::core::session::{SessionHandle, SessionId, SessionRegistry, SharedRegistry};
use crate::core::subscription::SubscriptionLifecycle;
use crate::error::{RelayError, Result};
use crate::transport::{MessageSink, MessageSource};

/// Tunables for every session the bridge runs
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub medium_name: String,
    pub medium_durable: bool,
    pub self_delivery: bool,
    pub idle_timeout: Option<Duration>,
    /// How long the outbound flow may keep delivering after inbound ends
    pub drain_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            medium_name: DEFAULT_MEDIUM_NAME.to_string(),
            medium_durable: true,
            self_delivery: false,
            idle_timeout: None,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

/// Final report of one flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub end: FlowEnd,
    pub forwarded: u64,
    pub dropped: u64,
    pub filtered: u64,
}

impl FlowReport {
    fn new(end: FlowEnd, stats: &FlowStats) -> Self {
        Self {
            end,
            forwarded: stats.forwarded(),
            dropped: stats.dropped(),
            filtered: stats.filtered(),
        }
    }
}

/// Returned once a session is fully torn down
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub label: String,
    pub subscription: String,
    pub inbound: FlowReport,
    pub outbound: FlowReport,
}

// Undoes a registered session if `serve` is dropped before teardown finishes
struct SessionGuard {
    id: SessionId,
    registry: SharedRegistry,
    flows: Vec<AbortHandle>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        for flow in &self.flows {
            flow.abort();
        }
        if let Err(e) = self.registry.unregister(self.id) {
            error!("{} could not be unregistered: {}", self.id, e);
        }
    }
}

enum FirstSignal {
    Inbound(FlowEnd),
    Outbound(FlowEnd),
    Shutdown,
}

/// Maps client streams onto the shared broadcast medium
pub struct ChatBridge {
    connection: Arc<dyn BrokerConnection>,
    medium: Arc<BroadcastMedium>,
    registry: SharedRegistry,
    options: BridgeOptions,
    shutdown: watch::Sender<bool>,
}

impl ChatBridge {
    /// Declare the broadcast medium on `connection` and build the bridge
    pub async fn new(
        connection: Arc<dyn BrokerConnection>,
        options: BridgeOptions,
    ) -> Result<Self> {
        let medium = BroadcastMedium::declare(
            connection.as_ref(),
            &options.medium_name,
            options.medium_durable,
        )
        .await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            connection,
            medium: Arc::new(medium),
            registry: Arc::new(SessionRegistry::new()),
            options,
            shutdown,
        })
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn medium(&self) -> &Arc<BroadcastMedium> {
        &self.medium
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Refuse new sessions and end every live one through normal teardown
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Relay shutting down, closing {} sessions", self.session_count());
        }
    }

    /// Run one client session until both flows have ended and cleanup is done.
    ///
    /// `label` names the sender for every message this session publishes;
    /// without one the session id is used. Fails with
    /// [`RelayError::Connect`] if the subscription cannot be provisioned, in
    /// which case nothing was registered.
    ///
    /// Dropping the returned future aborts both flows and unregisters the
    /// session; the subscription is released when its channel is dropped.
    pub async fn serve<S, K>(
        &self,
        label: Option<String>,
        source: S,
        sink: K,
    ) -> Result<SessionSummary>
    where
        S: MessageSource + 'static,
        K: MessageSink + 'static,
    {
        if self.is_shutting_down() {
            return Err(RelayError::ShuttingDown);
        }

        let id = self.registry.next_id();
        let label = label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| id.to_string());

        let lifecycle = SubscriptionLifecycle::new(id);
        let deliveries = match lifecycle
            .subscribe(self.connection.as_ref(), self.medium.name())
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!("{} ({}) could not subscribe: {}", id, label, e);
                return Err(e);
            }
        };
        let subscription = lifecycle.subscription_name().await.unwrap_or_default();

        let handle = SessionHandle {
            id,
            label: label.clone(),
            subscription: subscription.clone(),
            connected_at: Utc::now(),
        };
        if let Err(e) = self.registry.register(id, handle) {
            error!("{} registration failed: {}", id, e);
            lifecycle.close().await;
            return Err(e);
        }
        let mut guard = SessionGuard {
            id,
            registry: self.registry.clone(),
            flows: Vec::with_capacity(2),
        };
        info!("{} connected as '{}' ({} live)", id, label, self.session_count());

        let ctx = FlowContext {
            session_id: id,
            label: label.clone(),
        };
        let inbound_stats = Arc::new(FlowStats::default());
        let outbound_stats = Arc::new(FlowStats::default());

        let mut inbound = tokio::spawn(run_inbound(
            ctx.clone(),
            source,
            self.medium.clone(),
            self.options.idle_timeout,
            inbound_stats.clone(),
        ));
        let mut outbound = tokio::spawn(run_outbound(
            ctx,
            deliveries,
            sink,
            self.options.self_delivery,
            outbound_stats.clone(),
        ));
        guard.flows.push(inbound.abort_handle());
        guard.flows.push(outbound.abort_handle());

        let mut shutdown = self.shutdown.subscribe();
        let first = tokio::select! {
            result = &mut inbound => FirstSignal::Inbound(flow_result(id, result)),
            result = &mut outbound => FirstSignal::Outbound(flow_result(id, result)),
            _ = wait_for_shutdown(&mut shutdown) => FirstSignal::Shutdown,
        };

        let (inbound_end, outbound_end) = match first {
            FirstSignal::Inbound(end) => {
                debug!("{} inbound ended first: {:?}", id, end);
                lifecycle.begin_draining().await;
                (end, self.drain(id, outbound).await)
            }
            FirstSignal::Outbound(end) => {
                debug!("{} outbound ended first: {:?}", id, end);
                lifecycle.begin_draining().await;
                (stop(id, inbound).await, end)
            }
            FirstSignal::Shutdown => {
                let inbound_end = stop(id, inbound).await;
                lifecycle.begin_draining().await;
                (inbound_end, self.drain(id, outbound).await)
            }
        };

        lifecycle.close().await;
        drop(guard);

        if inbound_end.is_client_failure() || outbound_end.is_client_failure() {
            info!("{} disconnected with a stream error", id);
        } else {
            info!("{} disconnected", id);
        }

        Ok(SessionSummary {
            id,
            label,
            subscription,
            inbound: FlowReport::new(inbound_end, &inbound_stats),
            outbound: FlowReport::new(outbound_end, &outbound_stats),
        })
    }

    // Let the outbound flow deliver what is already queued, bounded by the drain timeout
    async fn drain(&self, id: SessionId, mut outbound: JoinHandle<FlowEnd>) -> FlowEnd {
        match tokio::time::timeout(self.options.drain_timeout, &mut outbound).await {
            Ok(result) => flow_result(id, result),
            Err(_) => {
                warn!(
                    "{} outbound flow still busy after {:?}, stopping it",
                    id, self.options.drain_timeout
                );
                stop(id, outbound).await
            }
        }
    }

    /// Close the shared publish channel
    pub async fn close(&self) -> Result<()> {
        self.shutdown();
        self.medium.close().await
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let sender_gone = shutdown.wait_for(|stopping| *stopping).await.is_err();
    if sender_gone {
        // bridge dropped without shutting down
        std::future::pending::<()>().await;
    }
}

// Abort a flow and wait until it has actually exited
async fn stop(id: SessionId, flow: JoinHandle<FlowEnd>) -> FlowEnd {
    flow.abort();
    match flow.await {
        Ok(end) => end,
        Err(e) if e.is_cancelled() => FlowEnd::Stopped,
        Err(e) => {
            error!("{} flow panicked: {}", id, e);
            FlowEnd::Stopped
        }
    }
}

fn flow_result(id: SessionId, result: std::result::Result<FlowEnd, JoinError>) -> FlowEnd {
    match result {
        Ok(end) => end,
        Err(e) => {
            error!("{} flow failed to complete: {}", id, e);
            FlowEnd::Stopped
        }
    }
}
