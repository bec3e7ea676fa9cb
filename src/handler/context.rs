//! Per-call context handed to handlers.

use crate::{Correlator, CorrelationId};

/// Context passed to every handler invocation.
///
/// Carries the id and method name of the call being served, plus the local
/// [`Correlator`] so a handler can issue calls of its own back to the peer
/// that invoked it.
///
/// # Example
///
/// ```ignore
/// table.register("greet", |ctx: RequestContext, (name,): (String,)| async move {
///     // Ask the caller for its locale before answering.
///     let locale: String = ctx.peer().call("locale", ()).await?;
///     Ok(format!("[{locale}] hello {name}"))
/// });
/// ```
#[derive(Clone)]
pub struct RequestContext {
    // ---
    id: CorrelationId,
    method: String,
    peer: Correlator,
}

impl RequestContext {
    pub(crate) fn new(id: CorrelationId, method: impl Into<String>, peer: Correlator) -> Self {
        Self {
            id,
            method: method.into(),
            peer,
        }
    }

    /// Id of the call being served.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Method name the caller asked for.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The correlator that received the call.
    pub fn peer(&self) -> &Correlator {
        &self.peer
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}
