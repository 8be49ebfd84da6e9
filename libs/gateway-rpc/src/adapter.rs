//! Unary call pipeline: metadata inject → circuit breaker → retry → timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_http::context::RequestContext;
use gateway_resilience::{BackoffPolicy, CircuitBreaker};
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};
use tracing::Instrument;

use crate::client::GrpcClientConfig;
use crate::error::RpcError;

const MAX_METADATA_LEN: usize = 128;
const CORRELATION_ID_KEY: &str = "correlation-id";
const REQUEST_ID_KEY: &str = "request-id";
const IDEMPOTENCY_KEY_KEY: &str = "idempotency-key";

/// Outbound metadata values never exceed 128 characters.
fn truncated(value: &str) -> &str {
    if value.len() <= MAX_METADATA_LEN {
        return value;
    }
    let mut end = MAX_METADATA_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

pub struct RpcAdapter {
    breaker: Arc<CircuitBreaker>,
    backoff: BackoffPolicy,
    max_retries: u32,
    call_timeout: Option<Duration>,
}

impl RpcAdapter {
    #[must_use]
    pub fn new(service: &str, cfg: &GrpcClientConfig) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(service, &cfg.circuit_breaker)),
            backoff: cfg.backoff.clone(),
            max_retries: cfg.max_retries,
            call_timeout: (!cfg.call_timeout.is_zero()).then_some(cfg.call_timeout),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn outbound_metadata(ctx: &RequestContext) -> Vec<(&'static str, String)> {
        let mut meta = vec![
            (CORRELATION_ID_KEY, truncated(&ctx.correlation_id).to_owned()),
            (REQUEST_ID_KEY, truncated(&ctx.request_id).to_owned()),
        ];
        if let Some(key) = ctx.idempotency_key.as_deref() {
            meta.push((IDEMPOTENCY_KEY_KEY, truncated(key).to_owned()));
        }
        meta
    }

    /// Execute a unary call through the full resilience pipeline.
    ///
    /// `call` receives a clone of the client and a fully prepared
    /// `tonic::Request` for each attempt.
    ///
    /// # Errors
    /// Returns [`RpcError`] on breaker refusal, client cancellation, or the
    /// final non-retryable (or retry-exhausted) status.
    pub async fn call_unary<C, Req, Res, F, Fut>(
        &self,
        ctx: &RequestContext,
        client: &C,
        req: Req,
        call: F,
        op: &'static str,
    ) -> Result<Res, RpcError>
    where
        C: Clone,
        Req: Clone,
        F: Fn(C, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, Status>>,
    {
        let metadata = Self::outbound_metadata(ctx);

        let outcome = self
            .breaker
            .execute(|| async {
                match self.attempts(ctx, client, &req, &call, &metadata, op).await {
                    // The client going away says nothing about downstream
                    // health; keep it out of the breaker's accounting.
                    Err(RpcError::Cancelled) => Ok(Err(RpcError::Cancelled)),
                    Err(other) => Err(other),
                    Ok(res) => Ok(Ok(res)),
                }
            })
            .await;

        match outcome {
            Ok(inner) => inner,
            Err(breaker_err) => Err(RpcError::from(breaker_err)),
        }
    }

    async fn attempts<C, Req, Res, F, Fut>(
        &self,
        ctx: &RequestContext,
        client: &C,
        req: &Req,
        call: &F,
        metadata: &[(&'static str, String)],
        op: &'static str,
    ) -> Result<Res, RpcError>
    where
        C: Clone,
        Req: Clone,
        F: Fn(C, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, Status>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if ctx.cancellation.is_cancelled() {
                return Err(RpcError::Cancelled);
            }

            let mut request = Request::new(req.clone());
            for (key, value) in metadata {
                if let Ok(value) = MetadataValue::try_from(value.as_str()) {
                    request.metadata_mut().insert(*key, value);
                }
            }
            if let Some(timeout) = self.call_timeout {
                request.set_timeout(timeout);
            }

            let span = tracing::debug_span!("grpc_call", op, attempt);
            let invoke = call(client.clone(), request);
            let outcome = async {
                if let Some(timeout) = self.call_timeout {
                    tokio::select! {
                        () = ctx.cancellation.cancelled() => Err(RpcError::Cancelled),
                        res = tokio::time::timeout(timeout, invoke) => match res {
                            Ok(res) => res.map_err(RpcError::Status),
                            Err(_) => Err(RpcError::Status(Status::deadline_exceeded(
                                "per-call timeout elapsed",
                            ))),
                        },
                    }
                } else {
                    tokio::select! {
                        () = ctx.cancellation.cancelled() => Err(RpcError::Cancelled),
                        res = invoke => res.map_err(RpcError::Status),
                    }
                }
            }
            .instrument(span)
            .await;

            let status = match outcome {
                Ok(res) => {
                    if attempt > 1 {
                        tracing::info!(op, attempt, "gRPC call succeeded after retries");
                    }
                    return Ok(res.into_inner());
                }
                Err(RpcError::Status(status)) => status,
                Err(other) => return Err(other),
            };

            tracing::warn!(
                op,
                attempt,
                code = ?status.code(),
                message = %status.message(),
                "gRPC call failed"
            );

            if !RpcError::is_retryable(&status) || attempt > self.max_retries {
                return Err(RpcError::Status(status));
            }

            let delay = self.backoff.delay(attempt);
            if let Some(deadline) = ctx.deadline
                && Instant::now() + delay >= deadline
            {
                // The request deadline would pass before the retry fires.
                return Err(RpcError::Status(status));
            }

            tokio::select! {
                () = ctx.cancellation.cancelled() => return Err(RpcError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use gateway_resilience::CircuitBreakerConfig;
    use parking_lot::Mutex;
    use tonic::Code;

    use super::*;

    fn fast_config(max_retries: u32) -> GrpcClientConfig {
        GrpcClientConfig {
            max_retries,
            call_timeout: Duration::ZERO,
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
                jitter: 0.0,
                max_delay: Duration::from_millis(5),
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                max_requests: 1,
                interval: Duration::ZERO,
                timeout: Duration::from_secs(60),
                failure_threshold: 5,
            },
            ..GrpcClientConfig::default()
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("req-1", "corr-1").with_idempotency_key("k".repeat(200).as_str())
    }

    #[tokio::test]
    async fn propagates_truncated_metadata() {
        let adapter = RpcAdapter::new("devices", &fast_config(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = seen.clone();
        let result = adapter
            .call_unary(
                &ctx(),
                &(),
                "ping".to_owned(),
                move |(), req: Request<String>| {
                    let seen = seen2.clone();
                    async move {
                        for key in ["correlation-id", "request-id", "idempotency-key"] {
                            let value = req
                                .metadata()
                                .get(key)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_owned();
                            seen.lock().push((key, value));
                        }
                        Ok(Response::new(req.into_inner()))
                    }
                },
                "devices.ping",
            )
            .await
            .unwrap();

        assert_eq!(result, "ping");
        let seen = seen.lock();
        assert!(seen.contains(&("correlation-id", "corr-1".to_owned())));
        assert!(seen.contains(&("request-id", "req-1".to_owned())));
        let idem = seen
            .iter()
            .find(|(k, _)| *k == "idempotency-key")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(idem.len(), 128);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let adapter = RpcAdapter::new("devices", &fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let result = adapter
            .call_unary(
                &ctx(),
                &(),
                (),
                move |(), _req: Request<()>| {
                    let n = attempts2.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(Status::new(Code::Unavailable, "warming up"))
                        } else {
                            Ok(Response::new("ok"))
                        }
                    }
                },
                "devices.flaky",
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_statuses_are_not_retried() {
        let adapter = RpcAdapter::new("devices", &fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let err = adapter
            .call_unary(
                &ctx(),
                &(),
                (),
                move |(), _req: Request<()>| {
                    attempts2.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<Response<()>, _>(Status::new(Code::NotFound, "no device")) }
                },
                "devices.get",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Status(ref s) if s.code() == Code::NotFound));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_budget_is_max_retries_plus_one() {
        let adapter = RpcAdapter::new("devices", &fast_config(2));
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let err = adapter
            .call_unary(
                &ctx(),
                &(),
                (),
                move |(), _req: Request<()>| {
                    attempts2.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<Response<()>, _>(Status::new(Code::Unavailable, "down")) }
                },
                "devices.list",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Status(ref s) if s.code() == Code::Unavailable));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn breaker_opens_and_fails_fast() {
        let adapter = RpcAdapter::new("devices", &fast_config(0));
        let attempts = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let attempts2 = attempts.clone();
            let _ = adapter
                .call_unary(
                    &ctx(),
                    &(),
                    (),
                    move |(), _req: Request<()>| {
                        attempts2.fetch_add(1, Ordering::SeqCst);
                        async move {
                            Err::<Response<()>, _>(Status::new(Code::Unavailable, "down"))
                        }
                    },
                    "devices.list",
                )
                .await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 5);

        let attempts2 = attempts.clone();
        let err = adapter
            .call_unary(
                &ctx(),
                &(),
                (),
                move |(), _req: Request<()>| {
                    attempts2.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(Response::new(())) }
                },
                "devices.list",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::CircuitOpen(_)));
        // Fail-fast: the downstream was never invoked.
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn per_call_timeout_maps_to_deadline_exceeded() {
        let mut cfg = fast_config(0);
        cfg.call_timeout = Duration::from_millis(30);
        let adapter = RpcAdapter::new("devices", &cfg);

        let err = adapter
            .call_unary(
                &ctx(),
                &(),
                (),
                |(), _req: Request<()>| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(Response::new(()))
                },
                "devices.slow",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Status(ref s) if s.code() == Code::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_retry_loop() {
        let adapter = RpcAdapter::new("devices", &fast_config(10));
        let context = ctx();
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let cancel = context.cancellation.clone();
        let err = adapter
            .call_unary(
                &context,
                &(),
                (),
                move |(), _req: Request<()>| {
                    attempts2.fetch_add(1, Ordering::SeqCst);
                    let cancel = cancel.clone();
                    async move {
                        // Simulate the client disconnecting mid-call.
                        cancel.cancel();
                        Err::<Response<()>, _>(Status::new(Code::Unavailable, "down"))
                    }
                },
                "devices.list",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Cancelled));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
