//! Load objects: the asynchronous contract between loaders and the cache
//!
//! A [`LoadObject`] is handed to the cache by a loader. The cache takes its
//! future to drive admission and keeps the remaining parts in a
//! [`LoadHandle`], which lives in the ledger for as long as the entry does.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::watch;

/// Error produced by a loader or by one of its callbacks
pub type LoadError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed future as accepted and returned by the cache
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Zero-argument collaborator callback (cancel or decache)
pub type Callback = Box<dyn Fn() -> Result<(), LoadError> + Send + Sync + 'static>;

/// An in-flight computation resolving to a sized entity
pub struct LoadObject<T> {
    pub(crate) future: BoxFuture<Result<T, LoadError>>,
    pub(crate) cancel: Option<Callback>,
    pub(crate) decache: Option<Callback>,
}

impl<T: Send + 'static> LoadObject<T> {
    /// Wrap a loader future
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            cancel: None,
            decache: None,
        }
    }

    /// Wrap an already-resolved payload
    pub fn ready(value: T) -> Self {
        Self::new(std::future::ready(Ok(value)))
    }

    /// Attach a cancel callback, invoked when the entry is removed
    pub fn with_cancel<F>(mut self, cancel: F) -> Self
    where
        F: Fn() -> Result<(), LoadError> + Send + Sync + 'static,
    {
        self.cancel = Some(Box::new(cancel));
        self
    }

    /// Attach a decache callback, invoked after cancel when the entry is removed
    pub fn with_decache<F>(mut self, decache: F) -> Self
    where
        F: Fn() -> Result<(), LoadError> + Send + Sync + 'static,
    {
        self.decache = Some(Box::new(decache));
        self
    }

    /// Split into the future the cache awaits and the handle the ledger keeps
    pub(crate) fn into_parts(self) -> (BoxFuture<Result<T, LoadError>>, LoadHandle) {
        let handle = LoadHandle::new(self.cancel, self.decache);
        (self.future, handle)
    }
}

impl<T> fmt::Debug for LoadObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadObject")
            .field("cancel", &self.cancel.is_some())
            .field("decache", &self.decache.is_some())
            .finish_non_exhaustive()
    }
}

/// Progress of a load as observed through its [`LoadHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Future not yet resolved
    Pending,
    /// Payload admitted and attached to the entry
    Loaded,
    /// Future rejected or admission failed
    Failed(String),
    /// Entry removed before the future resolved
    Cancelled,
}

impl LoadStatus {
    /// True while the load is still in flight
    pub fn is_pending(&self) -> bool {
        matches!(self, LoadStatus::Pending)
    }
}

/// The part of a load object that stays with its ledger entry
pub struct LoadHandle {
    cancel: Option<Callback>,
    decache: Option<Callback>,
    status: watch::Sender<LoadStatus>,
}

impl LoadHandle {
    fn new(cancel: Option<Callback>, decache: Option<Callback>) -> Self {
        let (status, _) = watch::channel(LoadStatus::Pending);
        Self {
            cancel,
            decache,
            status,
        }
    }

    /// Handle for a payload that arrived already resolved
    pub(crate) fn detached() -> Self {
        Self::new(None, None)
    }

    /// Current status of the load
    pub fn status(&self) -> LoadStatus {
        self.status.borrow().clone()
    }

    /// Wait until the load leaves [`LoadStatus::Pending`]
    ///
    /// Lets a second caller share an in-flight load instead of starting a
    /// duplicate fetch.
    pub async fn wait(&self) -> LoadStatus {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|status| !status.is_pending()).await {
            Ok(status) => (*status).clone(),
            Err(_) => LoadStatus::Cancelled,
        };
        status
    }

    /// Whether the loader supplied a cancel callback
    pub fn is_cancellable(&self) -> bool {
        self.cancel.is_some()
    }

    pub(crate) fn settle(&self, status: LoadStatus) {
        // Only the first settlement counts; removal may race with resolution.
        self.status.send_if_modified(|current| {
            if current.is_pending() {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    /// Run cancel then decache, logging failures without propagating them
    pub(crate) fn teardown(&self, key: &str) {
        if let Some(cancel) = &self.cancel {
            if let Err(e) = cancel() {
                tracing::warn!(key, error = %e, "cancel callback failed");
            }
        }
        if let Some(decache) = &self.decache {
            if let Err(e) = decache() {
                tracing::warn!(key, error = %e, "decache callback failed");
            }
        }
        self.settle(LoadStatus::Cancelled);
    }

    /// Run only the cancel callback
    pub(crate) fn cancel(&self, key: &str) {
        if let Some(cancel) = &self.cancel {
            if let Err(e) = cancel() {
                tracing::warn!(key, error = %e, "cancel callback failed");
            }
        }
        self.settle(LoadStatus::Cancelled);
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("status", &*self.status.borrow())
            .field("cancel", &self.cancel.is_some())
            .field("decache", &self.decache.is_some())
            .finish()
    }
}
