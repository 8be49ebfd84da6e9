//! Per-request context.
//!
//! The tracking middleware materializes one [`RequestContext`] at pipeline
//! entry and stores it in the request extensions. Later stages read it; the
//! few that contribute a value (validation sets the subject, idempotency sets
//! the key) re-insert an updated clone. Downstream adapters only read.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Context threaded through every pipeline stage and into the RPC adapter.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Arc<str>,
    pub correlation_id: Arc<str>,
    /// Authenticated subject, set by the validation stage when present.
    pub subject: Option<Arc<str>>,
    /// Idempotency key, set by the idempotency stage when present.
    pub idempotency_key: Option<Arc<str>>,
    /// Absolute deadline derived from the server write timeout.
    pub deadline: Option<Instant>,
    /// Cancelled when the client goes away or the request future is dropped.
    pub cancellation: CancellationToken,
    /// W3C trace id when an inbound `traceparent` was present.
    pub trace_id: Option<Arc<str>>,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: &str, correlation_id: &str) -> Self {
        Self {
            request_id: Arc::from(request_id),
            correlation_id: Arc::from(correlation_id),
            subject: None,
            idempotency_key: None,
            deadline: None,
            cancellation: CancellationToken::new(),
            trace_id: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(Arc::from(subject));
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(Arc::from(key));
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(Arc::from(trace_id));
        self
    }

    /// Read the context from request extensions.
    pub fn from_extensions(extensions: &http::Extensions) -> Option<&Self> {
        extensions.get::<Self>()
    }
}

/// Client address derived from forwarding headers, falling back to the socket
/// peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl std::fmt::Display for ClientIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(ip) => ip.fmt(f),
            None => f.write_str("unknown"),
        }
    }
}
