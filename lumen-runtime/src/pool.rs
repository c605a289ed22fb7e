//! Checkout pool for exclusive use of model replicas.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use lumen_core::{LumenError, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed set of replicas handed out one per session.
///
/// Waiters are served in arrival order. A pool of one replica serializes
/// every session.
pub struct PipelinePool<P> {
    permits: Arc<Semaphore>,
    items: Arc<Mutex<Vec<P>>>,
    size: usize,
}

impl<P> Clone for PipelinePool<P> {
    fn clone(&self) -> Self {
        Self {
            permits: self.permits.clone(),
            items: self.items.clone(),
            size: self.size,
        }
    }
}

impl<P: Send + 'static> PipelinePool<P> {
    pub fn new(items: Vec<P>) -> Self {
        let size = items.len();
        Self {
            permits: Arc::new(Semaphore::new(size)),
            items: Arc::new(Mutex::new(items)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Replicas not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free replica.
    pub async fn acquire(&self) -> Result<PoolGuard<P>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LumenError::Internal("pipeline pool closed".into()))?;
        let item = self
            .items
            .lock()
            .map_err(|_| LumenError::Internal("pipeline pool poisoned".into()))?
            .pop()
            .ok_or_else(|| LumenError::Internal("permit granted with no free replica".into()))?;
        Ok(PoolGuard {
            item: Some(item),
            items: self.items.clone(),
            _permit: permit,
        })
    }

    /// Stop handing out replicas; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Exclusive access to one replica; returns it to the pool on drop.
pub struct PoolGuard<P> {
    item: Option<P>,
    items: Arc<Mutex<Vec<P>>>,
    // Declared last so the replica is back in the pool before the permit
    // wakes the next waiter.
    _permit: OwnedSemaphorePermit,
}

impl<P> Deref for PoolGuard<P> {
    type Target = P;

    fn deref(&self) -> &P {
        match &self.item {
            Some(item) => item,
            None => unreachable!("replica taken before drop"),
        }
    }
}

impl<P> DerefMut for PoolGuard<P> {
    fn deref_mut(&mut self) -> &mut P {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("replica taken before drop"),
        }
    }
}

impl<P> Drop for PoolGuard<P> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            match self.items.lock() {
                Ok(mut items) => items.push(item),
                Err(poisoned) => poisoned.into_inner().push(item),
            }
        }
    }
}
