//! Fixed-size connection pool.
//!
//! Each borrow gets a connection no other borrower holds. When every
//! connection is out, [`ConnectionPool::acquire`] waits instead of failing.
//! The guard returns its connection exactly once, on drop, whether or not the
//! query that used it succeeded.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{ExpectError, Result};

struct PoolInner<C> {
    connections: Vec<C>,
    free: Mutex<Vec<usize>>,
    permits: Arc<Semaphore>,
}

/// A pool of `C` connections shared between concurrent queries.
pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Send + Sync + 'static> ConnectionPool<C> {
    /// Creates a pool over `connections`; at least one is required.
    pub fn new(connections: Vec<C>) -> Result<Self> {
        if connections.is_empty() {
            return Err(ExpectError::config("connection pool size must be at least 1"));
        }
        let size = connections.len();
        Ok(Self {
            inner: Arc::new(PoolInner {
                connections,
                free: Mutex::new((0..size).rev().collect()),
                permits: Arc::new(Semaphore::new(size)),
            }),
        })
    }

    /// Borrows a connection, waiting while all are in use.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExpectError::engine_execution("connection pool is closed"))?;

        let slot = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| ExpectError::Internal("connection pool has no free slot".into()))?;
        debug!(slot, "acquired pooled connection");

        Ok(PooledConnection {
            slot,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

impl<C> ConnectionPool<C> {
    pub fn size(&self) -> usize {
        self.inner.connections.len()
    }

    /// Connections not currently borrowed.
    pub fn available(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Rejects all current waiters and future borrows. Outstanding guards stay valid.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

/// A borrowed connection, returned to the pool on drop.
pub struct PooledConnection<C> {
    slot: usize,
    pool: Arc<PoolInner<C>>,
    // Released after `drop` has put the slot back.
    _permit: OwnedSemaphorePermit,
}

impl<C> PooledConnection<C> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.pool.connections[self.slot]
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_borrowers_get_distinct_connections() {
        let pool = ConnectionPool::new(vec!["a", "b"]).unwrap();
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();

        assert_ne!(first.slot(), second.slot());
        assert_ne!(*first, *second);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_until_release() {
        let pool = ConnectionPool::new(vec![1u8]).unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.acquire().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let value = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_connection_returned_on_error_path() {
        async fn failing_query(pool: &ConnectionPool<u8>) -> Result<()> {
            let _conn = pool.acquire().await?;
            Err(ExpectError::engine_execution("boom"))
        }

        let pool = ConnectionPool::new(vec![0u8, 1]).unwrap();
        for _ in 0..5 {
            assert!(failing_query(&pool).await.is_err());
        }
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_borrowers() {
        let pool = ConnectionPool::new(vec![0u8]).unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(
            pool.acquire().await,
            Err(ExpectError::EngineExecution { .. })
        ));
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(ConnectionPool::<u8>::new(Vec::new()).is_err());
    }
}
