//! Batch serializer
//!
//! Admits at most `limit` callers at a time and lets exactly one of them hold
//! the gate. Both the admission semaphore and the gate mutex are FIFO, so
//! batches reach the connection in arrival order.

use std::ops::{Deref, DerefMut};
use tokio::sync::{Mutex, MutexGuard, Semaphore, SemaphorePermit, TryAcquireError};
use tracing::trace;

use crate::error::{Error, Result};

/// Exclusive access to `T`, with bounded admission
#[derive(Debug)]
pub struct BatchSerializer<T> {
    admission: Semaphore,
    limit: usize,
    gate: Mutex<T>,
}

/// Held while a caller owns the gate
pub struct GateGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _permit: SemaphorePermit<'a>,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> BatchSerializer<T> {
    /// Create a serializer admitting up to `limit` callers (at least one)
    pub fn new(inner: T, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            admission: Semaphore::new(limit),
            limit,
            gate: Mutex::new(inner),
        }
    }

    /// Admission limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Callers currently admitted (waiting for or holding the gate)
    pub fn admitted(&self) -> usize {
        self.limit - self.admission.available_permits()
    }

    /// Wait for admission, then for the gate
    pub async fn acquire(&self) -> Result<GateGuard<'_, T>> {
        let permit = self.admission.acquire().await.map_err(|_| Error::Closed)?;
        trace!(admitted = self.admitted(), "Admitted, waiting for gate");
        self.enter(permit).await
    }

    /// Like [`acquire`](Self::acquire), but fails with [`Error::Backpressure`]
    /// instead of waiting for admission
    pub async fn try_acquire(&self) -> Result<GateGuard<'_, T>> {
        let permit = self.admission.try_acquire().map_err(|e| match e {
            TryAcquireError::NoPermits => Error::Backpressure { limit: self.limit },
            TryAcquireError::Closed => Error::Closed,
        })?;
        self.enter(permit).await
    }

    async fn enter<'a>(&'a self, permit: SemaphorePermit<'a>) -> Result<GateGuard<'a, T>> {
        let guard = self.gate.lock().await;
        if self.admission.is_closed() {
            return Err(Error::Closed);
        }
        Ok(GateGuard {
            guard,
            _permit: permit,
        })
    }

    /// Refuse new callers. Callers already admitted fail when they reach the gate.
    pub fn close(&self) {
        self.admission.close();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.admission.is_closed()
    }

    /// Take the gate without going through admission (status queries, shutdown)
    pub async fn lock_gate(&self) -> MutexGuard<'_, T> {
        self.gate.lock().await
    }
}
