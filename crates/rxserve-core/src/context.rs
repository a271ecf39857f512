//! Per-request context carrier.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Authenticated caller identity, as established by the API-key check in
/// the HTTP adapter. The core only ever sees the resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque identifier of the key that authenticated the caller.
    pub key_id: String,
}

/// Carrier threaded through every pipeline behavior for one request.
///
/// `cancel` is linked to the route deadline, the client connection, and
/// the forced half of shutdown; read-path code observes it at every
/// suspension point. `write_safe` is linked to forced shutdown only, so a
/// mutation keeps running when its caller disconnects mid-write.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id echoed on every log line and error response.
    pub correlation_id: String,
    /// Caller identity, when authentication succeeded.
    pub identity: Option<Identity>,
    /// Read-path cancellation handle.
    pub cancel: CancellationToken,
    /// Cancellation handle handed to command handlers.
    pub write_safe: CancellationToken,
}

impl RequestContext {
    /// Builds a context from externally owned tokens.
    pub fn new(
        correlation_id: impl Into<String>,
        identity: Option<Identity>,
        cancel: CancellationToken,
        write_safe: CancellationToken,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            identity,
            cancel,
            write_safe,
        }
    }

    /// A context with fresh, unlinked tokens. Used by background work and
    /// tests where no request lifecycle exists.
    pub fn detached(correlation_id: impl Into<String>) -> Self {
        Self::new(
            correlation_id,
            None,
            CancellationToken::new(),
            CancellationToken::new(),
        )
    }

    /// The same request viewed through the write-safe handle: commands
    /// run with `cancel` swapped for `write_safe` so a disconnect cannot
    /// abort a mutation between its side effects.
    pub fn for_write(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            identity: self.identity.clone(),
            cancel: self.write_safe.clone(),
            write_safe: self.write_safe.clone(),
        }
    }

    /// Mints a fresh correlation id for requests that arrive without one.
    pub fn mint_correlation_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_write_detaches_from_read_cancellation() {
        let ctx = RequestContext::detached("cid-1");
        let write_ctx = ctx.for_write();

        ctx.cancel.cancel();
        assert!(ctx.cancel.is_cancelled());
        assert!(!write_ctx.cancel.is_cancelled());
    }

    #[test]
    fn for_write_still_observes_forced_shutdown() {
        let ctx = RequestContext::detached("cid-2");
        let write_ctx = ctx.for_write();

        ctx.write_safe.cancel();
        assert!(write_ctx.cancel.is_cancelled());
    }

    #[test]
    fn minted_correlation_ids_are_unique() {
        assert_ne!(
            RequestContext::mint_correlation_id(),
            RequestContext::mint_correlation_id()
        );
    }
}
