//! Scoped sessions around each phase invocation.
//!
//! A session is acquired right before the executor runs and released on every
//! exit path: normal return, error, and cancellation (the future being
//! dropped, e.g. by a timeout). Release failures are logged, never raised.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: String,
    pub scope_id: String,
}

pub trait SessionProvider: Send + Sync {
    fn acquire(&self, scope_id: &str) -> Result<SessionHandle>;

    /// Must be idempotent: releasing an unknown or already released handle is `Ok`.
    fn release(&self, handle: &SessionHandle) -> Result<()>;
}

impl<P: SessionProvider + ?Sized> SessionProvider for Arc<P> {
    fn acquire(&self, scope_id: &str) -> Result<SessionHandle> {
        (**self).acquire(scope_id)
    }

    fn release(&self, handle: &SessionHandle) -> Result<()> {
        (**self).release(handle)
    }
}

/// Tracks live sessions in memory.
#[derive(Debug, Default)]
pub struct InMemorySessionProvider {
    next_id: AtomicU64,
    live: Mutex<HashSet<String>>,
}

impl InMemorySessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

impl SessionProvider for InMemorySessionProvider {
    fn acquire(&self, scope_id: &str) -> Result<SessionHandle> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = SessionHandle {
            id: format!("{scope_id}#{n}"),
            scope_id: scope_id.to_string(),
        };
        self.live
            .lock()
            .map_err(|_| Error::Session("session registry poisoned".to_string()))?
            .insert(handle.id.clone());
        debug!(session = handle.id, "session acquired");
        Ok(handle)
    }

    fn release(&self, handle: &SessionHandle) -> Result<()> {
        let removed = self
            .live
            .lock()
            .map_err(|_| Error::Session("session registry poisoned".to_string()))?
            .remove(&handle.id);
        if removed {
            debug!(session = handle.id, "session released");
        }
        Ok(())
    }
}

/// Releases its session exactly once, on [`SessionGuard::release`] or on drop.
pub struct SessionGuard<'a, P: SessionProvider + ?Sized> {
    provider: &'a P,
    handle: Option<SessionHandle>,
}

impl<'a, P: SessionProvider + ?Sized> SessionGuard<'a, P> {
    pub fn acquire(provider: &'a P, scope_id: &str) -> Result<Self> {
        let handle = provider.acquire(scope_id)?;
        Ok(Self {
            provider,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = self.provider.release(&handle)
        {
            warn!(session = handle.id, error = %e, "failed to release session");
        }
    }
}

impl<P: SessionProvider + ?Sized> Drop for SessionGuard<'_, P> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run `f` inside a session scoped to `scope_id`.
///
/// An acquire failure is returned without running `f`.
pub async fn with_session<P, F, Fut, T>(provider: &P, scope_id: &str, f: F) -> Result<T>
where
    P: SessionProvider + ?Sized,
    F: FnOnce(SessionHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut guard = SessionGuard::acquire(provider, scope_id)?;
    let handle = guard
        .handle()
        .cloned()
        .ok_or_else(|| Error::Session("session guard empty after acquire".to_string()))?;
    let result = f(handle).await;
    guard.release();
    result
}
