//! Process-wide handles shared by every command.
//!
//! [`AppState`] is built once at startup from [`ClientConfig`]: it opens the
//! local database, resolves the identity and connects the hosted gateway.
//! Commands then start whichever long-lived component they need.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tracing::{debug, info};

use anonchat_net::{Gateway, HostedGateway};
use anonchat_shared::Identity;
use anonchat_store::{get_or_create_identity, last_submission, record_submission, LocalDatabase};
use anonchat_sync::{Clock, Monitor, MonitorConfig, SyncConfig, SyncHandle, SyncStore, SystemClock};

use crate::config::ClientConfig;

pub struct AppState {
    pub config: ClientConfig,

    /// Identity persisted in the local database.
    pub identity: Identity,

    pub gateway: Arc<dyn Gateway>,

    pub clock: Arc<dyn Clock>,

    /// Local state: identity and the last accepted submission.
    db: Mutex<LocalDatabase>,
}

impl AppState {
    pub fn open(config: ClientConfig) -> anyhow::Result<Self> {
        let db = match &config.data_dir {
            Some(dir) => LocalDatabase::open_in_dir(dir),
            None => LocalDatabase::open_default(),
        }
        .context("Failed to open local database")?;
        info!(path = ?db.path(), "Opened local database");

        let backend = config.backend()?;
        let gateway = HostedGateway::new(backend).context("Failed to build backend client")?;

        Self::new(config, db, Arc::new(gateway), Arc::new(SystemClock))
    }

    /// Assemble the state from already-built parts, resolving the identity
    /// from `db`.
    pub fn new(
        config: ClientConfig,
        db: LocalDatabase,
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let identity = get_or_create_identity(&db).context("Failed to load identity")?;
        info!(%identity, "Loaded identity");

        Ok(Self {
            config,
            identity,
            gateway,
            clock,
            db: Mutex::new(db),
        })
    }

    fn db(&self) -> MutexGuard<'_, LocalDatabase> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe and load the board, carrying over the posting cooldown of
    /// earlier runs. Any failure here is fatal for the command that asked
    /// for it.
    pub async fn start_store(&self) -> anyhow::Result<(Arc<SyncStore>, SyncHandle)> {
        let (store, handle) = SyncStore::start(
            Arc::clone(&self.gateway),
            self.identity.clone(),
            Arc::clone(&self.clock),
            SyncConfig::default(),
        )
        .await
        .context("Failed to load the board")?;

        let last = last_submission(&self.db()).context("Failed to read local state")?;
        if let Some(at) = last {
            debug!(%at, "resuming posting cooldown");
            store.restore_cooldown(at).await;
        }
        Ok((store, handle))
    }

    /// Persist the store's last accepted submission time.
    pub async fn remember_cooldown(&self, store: &SyncStore) -> anyhow::Result<()> {
        if let Some(at) = store.last_accepted().await {
            record_submission(&self.db(), at).context("Failed to write local state")?;
        }
        Ok(())
    }

    pub async fn start_monitor(&self, config: MonitorConfig) -> anyhow::Result<Monitor> {
        Monitor::spawn(Arc::clone(&self.gateway), Arc::clone(&self.clock), config)
            .await
            .context("Failed to start the monitor")
    }
}
