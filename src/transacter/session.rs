use std::any::type_name;
use std::sync::Arc;

use crate::context::{Context, SESSION_CONTEXT_KEY};
use crate::core::{Result, TransactError};

/// The in-flight transaction of a call chain.
///
/// Stored in the [`Context`] under [`SESSION_CONTEXT_KEY`] so nested
/// `transact` calls reuse the handle instead of opening a transaction.
#[derive(Debug)]
pub struct Session<R> {
    tx: R,
}

impl<R> Session<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(tx: R) -> Self {
        Self { tx }
    }

    pub fn tx(&self) -> &R {
        &self.tx
    }

    /// Derives a context carrying this session.
    pub fn attach(self, ctx: &Context) -> Context {
        ctx.with_value(SESSION_CONTEXT_KEY, self)
    }

    /// Looks up the session in `ctx`.
    ///
    /// `Ok(None)` means no transaction is in flight. A value of any other type
    /// under the session key is an error: it means two transacters with
    /// different handle types share one context.
    pub fn from_context(ctx: &Context) -> Result<Option<Arc<Self>>> {
        let Some(found) = ctx.value_type_name(SESSION_CONTEXT_KEY) else {
            return Ok(None);
        };

        ctx.value::<Self>(SESSION_CONTEXT_KEY)
            .map(Some)
            .ok_or(TransactError::SessionTypeMismatch {
                found,
                expected: type_name::<Self>(),
            })
    }
}
