//! Request-scoped context carried through transactional call chains.
//!
//! A [`Context`] is an immutable value: deriving a child (`with_value`,
//! `with_cancel`, `with_timeout`) never changes the parent. Cloning is cheap:
//! values live in a persistent map and cancellation is a shared token.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::ContextError;

/// Key under which a value is stored in a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey(&'static str);

impl ContextKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Key reserved for the active transaction session.
///
/// Only [`Transacter`](crate::Transacter) writes to this key.
pub const SESSION_CONTEXT_KEY: ContextKey = ContextKey::new("session");

#[derive(Clone)]
struct ContextValue {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

#[derive(Clone)]
pub struct Context {
    values: im::HashMap<ContextKey, ContextValue>,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// An empty context: no values, never canceled, no deadline.
    pub fn background() -> Self {
        Self {
            values: im::HashMap::new(),
            cancel: None,
            deadline: None,
        }
    }

    /// Derives a context that additionally carries `value` under `key`,
    /// shadowing any value the parent holds under the same key.
    pub fn with_value<T>(&self, key: ContextKey, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.with_shared_value(key, Arc::new(value))
    }

    pub fn with_shared_value<T>(&self, key: ContextKey, value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut child = self.clone();
        child.values.insert(
            key,
            ContextValue {
                type_name: type_name::<T>(),
                value,
            },
        );
        child
    }

    /// Returns the value under `key` if it is present and of type `T`.
    pub fn value<T>(&self, key: ContextKey) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.values
            .get(&key)
            .and_then(|entry| Arc::clone(&entry.value).downcast::<T>().ok())
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Type name of the value stored under `key`.
    pub fn value_type_name(&self, key: ContextKey) -> Option<&'static str> {
        self.values.get(&key).map(|entry| entry.type_name)
    }

    /// Derives a cancelable context. Canceling the returned handle cancels the
    /// child and every context derived from it, but not the parent.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = match &self.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let mut child = self.clone();
        child.cancel = Some(token.clone());
        (child, CancelHandle { token })
    }

    /// Derives a context that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context that expires at `deadline`. A child never outlives
    /// its parent's deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once any cancel handle in the chain fires. Pending forever on
    /// a context that cannot be canceled.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        match &self.cancel {
            Some(token) => token.clone().cancelled_owned().boxed(),
            None => future::pending().boxed(),
        }
    }

    /// Resolves with the reason once the context is canceled or expired.
    pub async fn done(&self) -> ContextError {
        let cancelled = self.cancelled();
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => ContextError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                cancelled.await;
                ContextError::Canceled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<_> = self
            .values
            .iter()
            .map(|(key, entry)| (key.name(), entry.type_name))
            .collect();
        f.debug_struct("Context")
            .field("values", &keys)
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Cancels the context it was created with.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}
