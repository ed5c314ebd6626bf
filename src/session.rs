use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info};

use crate::cache::VaultStateCache;
use crate::config::VaultSyncConfig;
use crate::errors::ConfigResult;
use crate::events::{EventSubscriptionError, EventSubscriptionManager};
use crate::gateway::{ChainClient, RemoteCallGateway};
use crate::notify::NotificationDispatcher;
use crate::tracker::TransactionTracker;
use crate::types::ChainContext;

/// Components shared by one UI session against one vault deployment.
pub struct VaultSession {
    gateway: RemoteCallGateway,
    notifier: NotificationDispatcher,
    cache: Arc<VaultStateCache>,
    tracker: TransactionTracker,
    context_tx: watch::Sender<ChainContext>,
    events: AsyncMutex<Option<EventSubscriptionManager>>,
}

impl VaultSession {
    pub fn new(client: Arc<dyn ChainClient>, config: &VaultSyncConfig) -> ConfigResult<Self> {
        let contract = config.chain.contract_address()?;
        let tracked_tokens = config.sync.tracked_token_addresses()?;
        let context = ChainContext::new(client.current_address(), client.current_chain());
        let gateway = RemoteCallGateway::new(client, contract);
        let notifier = NotificationDispatcher::new();
        let cache = Arc::new(VaultStateCache::new(gateway.clone(), tracked_tokens));
        let (context_tx, _) = watch::channel(context);
        let tracker = TransactionTracker::new(
            gateway.clone(),
            Arc::clone(&cache),
            notifier.clone(),
            config.sync.refresh_strategy(),
            context_tx.subscribe(),
        );
        debug!(%contract, chain_id = context.chain_id, "vault session created");

        Ok(Self {
            gateway,
            notifier,
            cache,
            tracker,
            context_tx,
            events: AsyncMutex::new(None),
        })
    }

    pub fn gateway(&self) -> &RemoteCallGateway {
        &self.gateway
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    pub fn cache(&self) -> &Arc<VaultStateCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    pub fn context(&self) -> ChainContext {
        *self.context_tx.borrow()
    }

    pub fn watch_context(&self) -> watch::Receiver<ChainContext> {
        self.context_tx.subscribe()
    }

    /// Switches the connected account. The cached position of the previous
    /// account is dropped immediately.
    pub fn set_account(&self, account: Option<Address>) {
        self.context_tx.send_modify(|ctx| ctx.account = account);
        self.cache.on_account_changed(account);
    }

    /// Initial read of vault metrics and the connected account's position.
    pub async fn load(&self) {
        let account = self.context().account;
        tokio::join!(self.cache.refresh(), self.cache.refresh_user(account));
    }

    /// Starts the event subscriptions; a second call is a no-op.
    pub async fn start_events(&self) -> Result<(), EventSubscriptionError> {
        let mut events = self.events.lock().await;
        if events.is_some() {
            return Ok(());
        }
        let manager = EventSubscriptionManager::start(
            &self.gateway,
            Arc::clone(&self.cache),
            self.notifier.clone(),
            self.context_tx.subscribe(),
        )
        .await?;
        *events = Some(manager);
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), EventSubscriptionError> {
        let manager = self.events.lock().await.take();
        if let Some(manager) = manager {
            manager.shutdown().await?;
            info!("vault event subscriptions stopped");
        }
        Ok(())
    }
}
