//! The two forwarding flows of a session
//!
//! Inbound: client stream -> broadcast medium. Outbound: subscription ->
//! client stream. Single-message failures (publish, decode) are logged and
//! skipped; stream failures end the flow.

use futures_util::StreamExt;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::Deliveries;
use crate::core::broadcast::BroadcastMedium;
use crate::core::codec;
use crate::core::session::SessionId;
use crate::error::RelayError;
use crate::transport::{MessageSink, MessageSource};

/// Why a flow stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEnd {
    /// The client closed its sending side
    StreamClosed,
    /// The client stream failed while receiving
    ReceiveFailed(RelayError),
    /// No client traffic within the idle timeout
    IdleTimeout,
    /// Delivering to the client failed
    SendFailed(RelayError),
    /// The subscription's delivery stream ended
    SubscriptionEnded,
    /// The orchestrator stopped the flow
    Stopped,
}

impl FlowEnd {
    /// Whether the client went away, as opposed to being stopped by the relay
    pub fn is_client_failure(&self) -> bool {
        matches!(self, Self::ReceiveFailed(_) | Self::SendFailed(_))
    }
}

/// Counters for one flow, readable even if the flow was aborted
#[derive(Debug, Default)]
pub struct FlowStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
}

impl FlowStats {
    /// Messages published (inbound) or delivered to the client (outbound)
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Messages lost to publish or decode failures
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages withheld because the session sent them itself
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Identity a flow works on behalf of. Only `session_id` decides what counts
/// as the session's own traffic; labels may repeat across sessions.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub session_id: SessionId,
    pub label: String,
}

/// Forward client messages to the broadcast medium until the stream ends
pub async fn run_inbound<S>(
    ctx: FlowContext,
    mut source: S,
    medium: Arc<BroadcastMedium>,
    idle_timeout: Option<Duration>,
    stats: Arc<FlowStats>,
) -> FlowEnd
where
    S: MessageSource,
{
    loop {
        let received = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, source.receive()).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("{} idle for {:?}, ending inbound flow", ctx.session_id, limit);
                    return FlowEnd::IdleTimeout;
                }
            },
            None => source.receive().await,
        };

        let message = match received {
            Ok(message) => message.stamped(&ctx.label),
            Err(RelayError::StreamClosed) => {
                debug!("{} closed its stream", ctx.session_id);
                return FlowEnd::StreamClosed;
            }
            Err(e) => {
                debug!("{} receive failed: {}", ctx.session_id, e);
                return FlowEnd::ReceiveFailed(e);
            }
        };

        match medium.publish(ctx.session_id, &message).await {
            Ok(()) => {
                trace!("{} published a message", ctx.session_id);
                FlowStats::bump(&stats.forwarded);
            }
            Err(e) => {
                warn!("{} dropped a message: {}", ctx.session_id, e);
                FlowStats::bump(&stats.dropped);
            }
        }
    }
}

/// Deliver broadcast payloads to the client until the subscription ends or a
/// send fails. The sink is closed on the way out.
pub async fn run_outbound<K>(
    ctx: FlowContext,
    mut deliveries: Deliveries,
    mut sink: K,
    self_delivery: bool,
    stats: Arc<FlowStats>,
) -> FlowEnd
where
    K: MessageSink,
{
    let end = loop {
        let Some(payload) = deliveries.next().await else {
            break FlowEnd::SubscriptionEnded;
        };

        let envelope = match codec::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{} dropped an undecodable payload: {}", ctx.session_id, e);
                FlowStats::bump(&stats.dropped);
                continue;
            }
        };

        if !self_delivery && envelope.origin == Some(ctx.session_id) {
            FlowStats::bump(&stats.filtered);
            continue;
        }

        if let Err(e) = sink.send(&envelope.message).await {
            debug!("{} send failed: {}", ctx.session_id, e);
            break FlowEnd::SendFailed(e);
        }
        FlowStats::bump(&stats.forwarded);
    };

    if let Err(e) = sink.close().await {
        trace!("{} sink close failed: {}", ctx.session_id, e);
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerChannel, BrokerConnection, MemoryBroker};
    use crate::core::codec::Envelope;
    use crate::core::message::Message;
    use crate::transport::pair;
    use futures_util::stream;

    fn ctx(id: u64, label: &str) -> FlowContext {
        FlowContext {
            session_id: SessionId(id),
            label: label.to_string(),
        }
    }

    fn payload(origin: u64, sender: &str, body: &str) -> Vec<u8> {
        codec::encode(&Envelope::new(SessionId(origin), Message::new(sender, body))).unwrap()
    }

    fn payloads(items: Vec<Vec<u8>>) -> Deliveries {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_outbound_skips_malformed_payloads() {
        let (mut client, _source, sink) = pair();
        let stats = Arc::new(FlowStats::default());
        let good = payload(1, "A", "hello");

        let end = run_outbound(
            ctx(2, "B"),
            payloads(vec![b"{corrupt".to_vec(), good]),
            sink,
            false,
            stats.clone(),
        )
        .await;

        assert_eq!(end, FlowEnd::SubscriptionEnded);
        assert_eq!(client.recv().await.unwrap().body, "hello");
        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.forwarded(), 1);
    }

    #[tokio::test]
    async fn test_outbound_filters_own_messages() {
        let (mut client, _source, sink) = pair();
        let stats = Arc::new(FlowStats::default());
        let own = payload(1, "A", "mine");
        let other = payload(2, "B", "theirs");

        run_outbound(ctx(1, "A"), payloads(vec![own, other]), sink, false, stats.clone()).await;

        assert_eq!(client.recv().await.unwrap().body, "theirs");
        assert_eq!(stats.filtered(), 1);
    }

    #[tokio::test]
    async fn test_outbound_delivers_same_label_from_other_session() {
        let (mut client, _source, sink) = pair();
        let stats = Arc::new(FlowStats::default());
        let namesake = payload(2, "bob", "hello");

        run_outbound(ctx(1, "bob"), payloads(vec![namesake]), sink, false, stats.clone()).await;

        assert_eq!(client.recv().await.unwrap().body, "hello");
        assert_eq!(stats.filtered(), 0);
    }

    #[tokio::test]
    async fn test_outbound_self_delivery_enabled() {
        let (mut client, _source, sink) = pair();
        let stats = Arc::new(FlowStats::default());
        let own = payload(1, "A", "mine");

        run_outbound(ctx(1, "A"), payloads(vec![own]), sink, true, stats.clone()).await;

        assert_eq!(client.recv().await.unwrap().body, "mine");
        assert_eq!(stats.filtered(), 0);
    }

    #[tokio::test]
    async fn test_outbound_send_failure_is_terminal() {
        let (mut client, _source, sink) = pair();
        client.disconnect();
        let stats = Arc::new(FlowStats::default());
        let msg = payload(1, "A", "hello");

        let end = run_outbound(
            ctx(2, "B"),
            payloads(vec![msg.clone(), msg]),
            sink,
            false,
            stats.clone(),
        )
        .await;

        assert!(matches!(end, FlowEnd::SendFailed(_)));
        assert_eq!(stats.forwarded(), 0);
    }

    async fn medium(broker: &MemoryBroker) -> Arc<BroadcastMedium> {
        let connection = broker.connect("memory://test").await.unwrap();
        Arc::new(BroadcastMedium::declare(&connection, "chat", true).await.unwrap())
    }

    #[tokio::test]
    async fn test_inbound_publishes_stamped_messages() {
        let broker = MemoryBroker::new();
        let medium = medium(&broker).await;
        let connection = broker.connect("memory://test").await.unwrap();
        let observer = connection.open_channel().await.unwrap();
        let name = observer.declare_subscription().await.unwrap();
        observer.bind(&name, "chat").await.unwrap();
        let mut observed = observer.consume(&name).await.unwrap();

        let (mut client, source, _sink) = pair();
        let stats = Arc::new(FlowStats::default());
        client.send(Message::new("spoofed", "hello")).unwrap();
        client.close_send();

        let end = run_inbound(ctx(1, "A"), source, medium, None, stats.clone()).await;
        assert_eq!(end, FlowEnd::StreamClosed);
        assert_eq!(stats.forwarded(), 1);

        let published = codec::decode(&observed.next().await.unwrap()).unwrap();
        assert_eq!(published.origin, Some(SessionId(1)));
        assert_eq!(published.message.sender, "A");
        assert_eq!(published.message.body, "hello");
    }

    #[tokio::test]
    async fn test_inbound_publish_failure_is_not_terminal() {
        let broker = MemoryBroker::new();
        let medium = medium(&broker).await;
        let (mut client, source, _sink) = pair();
        let stats = Arc::new(FlowStats::default());

        broker.faults().set_fail_publish(true);
        client.send(Message::new("A", "lost")).unwrap();
        client.send(Message::new("A", "also lost")).unwrap();
        client.fail("connection reset");

        let end = run_inbound(ctx(1, "A"), source, medium, None, stats.clone()).await;
        assert!(matches!(end, FlowEnd::ReceiveFailed(RelayError::Receive(_))));
        assert_eq!(stats.dropped(), 2);
        assert_eq!(stats.forwarded(), 0);
    }

    #[tokio::test]
    async fn test_inbound_idle_timeout() {
        let broker = MemoryBroker::new();
        let medium = medium(&broker).await;
        let (_client, source, _sink) = pair();
        let stats = Arc::new(FlowStats::default());

        let end = run_inbound(
            ctx(1, "A"),
            source,
            medium,
            Some(Duration::from_millis(20)),
            stats,
        )
        .await;
        assert_eq!(end, FlowEnd::IdleTimeout);
    }
}
