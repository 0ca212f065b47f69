//! Lifecycle-aware slot for the process-wide connection pool.
//!
//! Every store operation takes a shared lease for the duration of one
//! operation. Opening and closing take the exclusive side, so a close waits
//! for in-flight leases to drop and no lease can be taken while the pool is
//! draining.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{RwLock, RwLockReadGuard};

use super::StoreError;

/// Observable pool state. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    Absent,
    Active,
    Draining,
}

impl PoolPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PoolPhase::Active,
            2 => PoolPhase::Draining,
            _ => PoolPhase::Absent,
        }
    }
}

/// A pool that can be drained and released.
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    async fn close(&self);
}

#[async_trait]
impl ManagedPool for PgPool {
    async fn close(&self) {
        sqlx::Pool::close(self).await;
    }
}

/// Shared borrow of the active pool, released on drop.
pub type PoolLease<'a, P> = RwLockReadGuard<'a, P>;

pub struct PoolHandle<P> {
    slot: RwLock<Option<P>>,
    phase: AtomicU8,
}

impl<P: ManagedPool> Default for PoolHandle<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ManagedPool> PoolHandle<P> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            phase: AtomicU8::new(PoolPhase::Absent as u8),
        }
    }

    pub fn phase(&self) -> PoolPhase {
        PoolPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: PoolPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Borrow the active pool for one operation.
    pub async fn lease(&self) -> Result<PoolLease<'_, P>, StoreError> {
        let guard = self.slot.read().await;
        RwLockReadGuard::try_map(guard, |slot| slot.as_ref())
            .map_err(|_| StoreError::Unavailable("connection pool is not initialised".to_string()))
    }

    /// Install a pool built by `open` unless one is already active.
    /// Returns `false` when a pool was already present.
    pub async fn open_with<F, Fut>(&self, open: F) -> Result<bool, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P, StoreError>>,
    {
        let mut slot = self.slot.write().await;
        if slot.is_some() {
            return Ok(false);
        }
        let pool = open().await?;
        *slot = Some(pool);
        self.set_phase(PoolPhase::Active);
        Ok(true)
    }

    /// Drain and release the pool. Waits for outstanding leases first.
    /// Returns `false` when there was no pool to close.
    pub async fn close(&self) -> bool {
        let mut slot = self.slot.write().await;
        let Some(pool) = slot.take() else {
            return false;
        };
        self.set_phase(PoolPhase::Draining);
        pool.close().await;
        self.set_phase(PoolPhase::Absent);
        true
    }
}
