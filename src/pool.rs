use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::session::{RenderSession, SessionFactory};
use crate::utils::error::{AppError, Result};

struct PooledSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    lease_count: u32,
    session: Box<dyn RenderSession>,
}

/// A single-holder loan of a render session. Capacity is returned to the
/// pool when the lease is released (or dropped; a dropped lease discards its
/// session, which is then lazily replaced).
pub struct SessionLease {
    pooled: PooledSession,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    pub fn id(&self) -> Uuid {
        self.pooled.id
    }

    pub fn session_mut(&mut self) -> &mut dyn RenderSession {
        self.pooled.session.as_mut()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub leased: usize,
}

/// Bounded pool of rendering sessions.
///
/// Sessions are created on demand up to the configured size, handed out as
/// exclusive leases, and recycled after a fixed number of uses or when a
/// holder reports them unhealthy. Creation failures are retried with
/// exponential backoff; exhausting the retries marks the whole pool degraded,
/// which every later acquire surfaces as a fatal-tier error.
pub struct RenderSessionPool {
    factory: Arc<dyn SessionFactory>,
    config: PoolConfig,
    idle: Mutex<VecDeque<PooledSession>>,
    permits: Arc<Semaphore>,
    degraded: Mutex<Option<String>>,
}

impl RenderSessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.size));
        Self {
            factory,
            config,
            idle: Mutex::new(VecDeque::new()),
            permits,
            degraded: Mutex::new(None),
        }
    }

    /// Waits up to the configured acquire timeout for a session. On timeout
    /// the check should be treated as deferred, not failed.
    pub async fn acquire(&self) -> Result<SessionLease> {
        if let Some(reason) = self.degraded.lock().await.clone() {
            return Err(AppError::PoolDegraded(reason));
        }

        let acquire_timeout = self.config.acquire_timeout();
        let permit = timeout(acquire_timeout, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| AppError::PoolExhausted {
                timeout_ms: acquire_timeout.as_millis() as u64,
            })?
            .map_err(|_| AppError::Internal("session pool semaphore closed".to_string()))?;

        let reused = self.idle.lock().await.pop_front();
        let pooled = match reused {
            Some(pooled) => pooled,
            None => self.create_session().await?,
        };

        debug!(session_id = %pooled.id, lease_count = pooled.lease_count, "Leased render session");
        Ok(SessionLease {
            pooled,
            _permit: permit,
        })
    }

    /// Returns a lease. An unhealthy session, or one past the recycle
    /// threshold, is discarded and lazily replaced on a later acquire.
    pub async fn release(&self, mut lease: SessionLease, healthy: bool) {
        lease.pooled.lease_count += 1;

        if healthy && lease.pooled.lease_count < self.config.recycle_after_leases {
            debug!(session_id = %lease.pooled.id, "Returned render session to pool");
            self.idle.lock().await.push_back(lease.pooled);
        } else if healthy {
            let age_secs = (Utc::now() - lease.pooled.created_at).num_seconds();
            debug!(session_id = %lease.pooled.id, lease_count = lease.pooled.lease_count,
                   age_secs, "Recycling render session after lease threshold");
        } else {
            warn!(session_id = %lease.pooled.id, "Discarding unhealthy render session");
        }
        // Dropping the permit frees the capacity slot either way.
    }

    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().await.len();
        PoolStats {
            capacity: self.config.size,
            idle,
            leased: self.config.size - self.permits.available_permits(),
        }
    }

    async fn create_session(&self) -> Result<PooledSession> {
        let strategy = ExponentialBackoff::from_millis(self.config.create_retry_base_delay_ms)
            .map(jitter)
            .take(self.config.create_retry_attempts);

        let created = Retry::start(strategy, || self.factory.create()).await;

        match created {
            Ok(session) => Ok(PooledSession {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                lease_count: 0,
                session,
            }),
            Err(e) => {
                let reason = format!("session creation failed after retries: {}", e);
                error!("{}", reason);
                *self.degraded.lock().await = Some(reason.clone());
                Err(AppError::PoolDegraded(reason))
            }
        }
    }
}
