// Persistence for groups, voting sessions and notifications.
//
// `Store::Postgres` is the production backend. `Store::Memory` keeps the same
// semantics behind one `RwLock` and backs local development and tests.

pub mod groups;
pub mod notifications;

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use reelcircle_common::types::{Group, Notification};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::RelayConfig,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    voting::VotingError,
};

pub use groups::{NewGroup, StartedVoting};
pub use notifications::NewNotification;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("group not found")]
    GroupNotFound,
    #[error("notification not found")]
    NotificationNotFound,
    #[error("notification belongs to another user")]
    NotRecipient,
    #[error("already a member of this group")]
    AlreadyMember,
    #[error("group is full")]
    GroupFull,
    #[error(transparent)]
    Voting(#[from] VotingError),
    #[error("unexpected stored value: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: HashMap<Uuid, Group>,
    notifications: HashMap<Uuid, Notification>,
}

#[derive(Debug, Clone)]
pub enum Store {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryStore>>),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryStore::default())))
    }

    /// Picks the backend from configuration. A database URL means Postgres,
    /// with migrations applied before the first request.
    pub async fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        let Some(database_url) = config.database_url.as_deref() else {
            warn!("REELCIRCLE_RELAY_DATABASE_URL is unset; using the in-memory store");
            return Ok(Self::memory());
        };

        let pool = create_pg_pool(database_url, PoolConfig::from_env())
            .await
            .context("failed to initialize relay PostgreSQL pool")?;
        check_pool_health(&pool).await?;
        run_migrations(&pool).await?;
        info!("relay PostgreSQL store ready");

        Ok(Self::Postgres(pool))
    }
}
