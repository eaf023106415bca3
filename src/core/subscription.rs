//! Per-session subscription lifecycle
//!
//! `Uninitialized -> Subscribed -> Draining -> Closed`. A session owns exactly
//! one exclusive subscription bound to the broadcast medium while it is
//! `Subscribed` or `Draining`, and none once `Closed`. Teardown is
//! best-effort: cleanup failures are logged and the machine still closes.

use log::{debug, warn};
use std::fmt;
use tokio::sync::Mutex;

use crate::broker::{BrokerChannel, BrokerConnection, Deliveries};
use crate::core::session::SessionId;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Uninitialized,
    Subscribed,
    Draining,
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Subscribed => "subscribed",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: SubscriptionState,
    channel: Option<Box<dyn BrokerChannel>>,
    subscription: Option<String>,
}

pub struct SubscriptionLifecycle {
    session_id: SessionId,
    inner: Mutex<Inner>,
}

impl SubscriptionLifecycle {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            inner: Mutex::new(Inner {
                state: SubscriptionState::Uninitialized,
                channel: None,
                subscription: None,
            }),
        }
    }

    pub async fn state(&self) -> SubscriptionState {
        self.inner.lock().await.state
    }

    /// Generated name of the owned subscription, if one is live
    pub async fn subscription_name(&self) -> Option<String> {
        self.inner.lock().await.subscription.clone()
    }

    /// Open a channel, declare an exclusive subscription and bind it to `medium`.
    ///
    /// On failure nothing is left behind on the broker and the lifecycle is
    /// `Closed`; the error is always [`RelayError::Connect`].
    pub async fn subscribe(
        &self,
        connection: &dyn BrokerConnection,
        medium: &str,
    ) -> Result<Deliveries> {
        let mut inner = self.inner.lock().await;
        if inner.state != SubscriptionState::Uninitialized {
            return Err(RelayError::InvalidTransition {
                from: inner.state.to_string(),
                to: SubscriptionState::Subscribed.to_string(),
            });
        }

        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                inner.state = SubscriptionState::Closed;
                return Err(e.into_connect());
            }
        };

        match Self::declare_and_bind(channel.as_ref(), medium).await {
            Ok((name, deliveries)) => {
                debug!("{} subscribed via {}", self.session_id, name);
                inner.state = SubscriptionState::Subscribed;
                inner.subscription = Some(name);
                inner.channel = Some(channel);
                Ok(deliveries)
            }
            Err((name, e)) => {
                if let Some(name) = name {
                    if let Err(cleanup) = channel.delete_subscription(&name).await {
                        debug!("{} could not delete {}: {}", self.session_id, name, cleanup);
                    }
                }
                if let Err(cleanup) = channel.close().await {
                    debug!("{} could not close channel: {}", self.session_id, cleanup);
                }
                inner.state = SubscriptionState::Closed;
                Err(e.into_connect())
            }
        }
    }

    async fn declare_and_bind(
        channel: &dyn BrokerChannel,
        medium: &str,
    ) -> std::result::Result<(String, Deliveries), (Option<String>, RelayError)> {
        let name = channel.declare_subscription().await.map_err(|e| (None, e))?;
        if let Err(e) = channel.bind(&name, medium).await {
            return Err((Some(name), e));
        }
        match channel.consume(&name).await {
            Ok(deliveries) => Ok((name, deliveries)),
            Err(e) => Err((Some(name), e)),
        }
    }

    /// Stop new deliveries; queued ones stay readable by the outbound flow.
    /// Returns whether this call performed the transition.
    pub async fn begin_draining(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != SubscriptionState::Subscribed {
            return false;
        }
        inner.state = SubscriptionState::Draining;
        if let (Some(channel), Some(name)) = (inner.channel.as_ref(), inner.subscription.as_ref()) {
            if let Err(e) = channel.cancel(name).await {
                warn!("{} failed to cancel consumer on {}: {}", self.session_id, name, e);
            }
        }
        debug!("{} draining", self.session_id);
        true
    }

    /// Delete the subscription and release the channel.
    ///
    /// Runs at most once; later calls return `false`. Cleanup failures are
    /// logged as [`RelayError::Cleanup`] and otherwise ignored.
    pub async fn close(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state == SubscriptionState::Closed {
            return false;
        }
        inner.state = SubscriptionState::Closed;
        let channel = inner.channel.take();
        let subscription = inner.subscription.take();
        drop(inner);

        if let Some(channel) = channel {
            if let Some(name) = subscription.as_deref() {
                if let Err(e) = channel.delete_subscription(name).await {
                    warn!("{} {}", self.session_id, cleanup_error(e));
                }
            }
            if let Err(e) = channel.close().await {
                warn!("{} {}", self.session_id, cleanup_error(e));
            }
        }
        debug!("{} subscription closed", self.session_id);
        true
    }
}

fn cleanup_error(e: RelayError) -> RelayError {
    match e {
        RelayError::Cleanup(_) => e,
        other => RelayError::Cleanup(other.to_string()),
    }
}
