use std::sync::Arc;

use alloy::sol_types::SolEvent;
use futures::StreamExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::VaultStateCache;
use crate::contract::IDeFiAgentVault;
use crate::errors::ClientError;
use crate::gateway::{LogStream, RawLog, RemoteCallGateway, VaultEventKind};
use crate::notify::{Notification, NotificationDispatcher};
use crate::types::{display_ether, short_address, ChainContext};

#[derive(Debug, thiserror::Error)]
pub enum EventSubscriptionError {
    #[error("failed to subscribe to {kind}: {source}")]
    Subscribe {
        kind: VaultEventKind,
        #[source]
        source: ClientError,
    },
    #[error("event listener task panicked")]
    Join,
}

/// Keeps one live subscription per tracked event kind for the session.
pub struct EventSubscriptionManager {
    shutdown_tx: watch::Sender<bool>,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
struct Reactor {
    cache: Arc<VaultStateCache>,
    notifier: NotificationDispatcher,
    context: watch::Receiver<ChainContext>,
}

impl EventSubscriptionManager {
    /// Opens every subscription up front; fails if any of them cannot be opened.
    pub async fn start(
        gateway: &RemoteCallGateway,
        cache: Arc<VaultStateCache>,
        notifier: NotificationDispatcher,
        context: watch::Receiver<ChainContext>,
    ) -> Result<Self, EventSubscriptionError> {
        let mut streams = Vec::with_capacity(VaultEventKind::ALL.len());
        for kind in VaultEventKind::ALL {
            let stream = gateway
                .subscribe(kind)
                .await
                .map_err(|source| EventSubscriptionError::Subscribe { kind, source })?;
            streams.push((kind, stream));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reactor = Reactor {
            cache,
            notifier,
            context,
        };
        let tasks = streams
            .into_iter()
            .map(|(kind, stream)| {
                let reactor = reactor.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(listen(kind, stream, reactor, shutdown_rx))
            })
            .collect();
        info!(contract = %gateway.contract(), "vault event subscriptions started");

        Ok(Self {
            shutdown_tx,
            tasks: AsyncMutex::new(tasks),
        })
    }

    pub async fn shutdown(&self) -> Result<(), EventSubscriptionError> {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        let mut result = Ok(());
        for handle in handles {
            if handle.await.is_err() {
                result = Err(EventSubscriptionError::Join);
            }
        }
        result
    }
}

async fn listen(
    kind: VaultEventKind,
    mut stream: LogStream,
    reactor: Reactor,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(log)) => reactor.react(kind, &log).await,
            Some(Err(error)) => warn!(%kind, %error, "vault event stream error"),
            None => {
                warn!(%kind, "vault event stream ended");
                break;
            }
        }
    }
    debug!(%kind, "vault event listener stopped");
}

impl Reactor {
    /// Notifies, then refreshes balances for events that move them. Duplicate
    /// deliveries simply repeat both steps.
    async fn react(&self, kind: VaultEventKind, log: &RawLog) {
        debug!(%kind, block = ?log.block_number, "vault event received");
        self.notifier.dispatch(describe(kind, log));
        if kind.invalidates_balances() {
            let account = self.context.borrow().account;
            self.cache.refresh().await;
            self.cache.refresh_user(account).await;
        }
    }
}

fn describe(kind: VaultEventKind, log: &RawLog) -> Notification {
    let topics = log.topics.iter().copied();
    match kind {
        VaultEventKind::Deposited => {
            let detail = IDeFiAgentVault::Deposited::decode_raw_log(topics, &log.data, true)
                .map(|event| {
                    let amount = if event.token.is_zero() {
                        format!("{} ETH", display_ether(event.amount))
                    } else {
                        format!("{} units of {}", event.amount, short_address(&event.token))
                    };
                    format!("{} deposited {amount} to the vault", short_address(&event.user))
                })
                .unwrap_or_else(|_| "User deposited funds to the vault".to_string());
            Notification::info("New Deposit", detail)
        }
        VaultEventKind::YieldHarvested => {
            let detail = IDeFiAgentVault::YieldHarvested::decode_raw_log(topics, &log.data, true)
                .map(|event| {
                    format!(
                        "{} harvested {} ETH yield (fee {} ETH)",
                        short_address(&event.agent),
                        display_ether(event.yieldAmount),
                        display_ether(event.fee)
                    )
                })
                .unwrap_or_else(|_| "Agent harvested yield from the vault".to_string());
            Notification::info("Yield Harvested", detail)
        }
        VaultEventKind::AgentGranted => {
            let detail = IDeFiAgentVault::AgentGranted::decode_raw_log(topics, &log.data, true)
                .map(|event| format!("{} has been granted agent access", short_address(&event.agent)))
                .unwrap_or_else(|_| "New agent has been granted access".to_string());
            Notification::info("Agent Granted", detail)
        }
        VaultEventKind::AgentRevoked => {
            let detail = IDeFiAgentVault::AgentRevoked::decode_raw_log(topics, &log.data, true)
                .map(|event| format!("{} no longer has agent access", short_address(&event.agent)))
                .unwrap_or_else(|_| "Agent access has been revoked".to_string());
            Notification::info("Agent Revoked", detail)
        }
    }
}
