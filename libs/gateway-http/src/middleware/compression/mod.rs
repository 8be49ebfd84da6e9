//! Content-negotiated response compression.
//!
//! The stage negotiates `Accept-Encoding` before the handler runs and gates
//! on the response afterwards: the body is buffered until it either reaches
//! `min_size` — at which point an encoder is drawn from the pool and the
//! remainder streams through it — or ends first, in which case the bytes pass
//! through untouched. `Vary: Accept-Encoding` is set whenever the stage is
//! active so caches key correctly even for identity responses.

pub mod negotiate;

mod encoder;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use http::{HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::problem::Problem;
use encoder::{Encoder, EncoderPool};
use negotiate::{Algorithm, Negotiation, negotiate};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Encoder effort, 1 (fastest) to 9 (smallest).
    #[serde(default = "default_level")]
    pub level: u32,

    /// Responses below this many bytes are never compressed.
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Compressible content types; a trailing `/*` matches the major type.
    #[serde(default = "default_content_types")]
    pub content_types: Vec<String>,

    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,

    #[serde(default = "default_enabled")]
    pub graceful_degraded: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> u32 {
    5
}

fn default_min_size() -> usize {
    1024
}

fn default_content_types() -> Vec<String> {
    [
        "application/json",
        "application/problem+json",
        "application/xml",
        "image/svg+xml",
        "text/*",
    ]
    .map(str::to_owned)
    .to_vec()
}

fn default_skip_paths() -> Vec<String> {
    vec!["/healthz".to_owned(), "/readyz".to_owned()]
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_level(),
            min_size: default_min_size(),
            content_types: default_content_types(),
            skip_paths: default_skip_paths(),
            graceful_degraded: true,
        }
    }
}

#[derive(Clone)]
pub struct CompressionState {
    enabled: bool,
    min_size: usize,
    content_types: Arc<Vec<String>>,
    skip_paths: Arc<Vec<String>>,
    graceful_degraded: bool,
    pool: Arc<EncoderPool>,
}

impl CompressionState {
    #[must_use]
    pub fn new(cfg: &CompressionConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            min_size: cfg.min_size,
            content_types: Arc::new(cfg.content_types.clone()),
            skip_paths: Arc::new(cfg.skip_paths.clone()),
            graceful_degraded: cfg.graceful_degraded,
            pool: Arc::new(EncoderPool::new(cfg.level.clamp(1, 9))),
        }
    }

    fn skipped(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| path.starts_with(p))
    }

    fn compressible(&self, essence: &str) -> bool {
        self.content_types.iter().any(|entry| {
            entry
                .strip_suffix("/*")
                .map_or(entry == essence, |major| {
                    essence.strip_prefix(major).is_some_and(|r| r.starts_with('/'))
                })
        })
    }
}

pub async fn compress_response(state: CompressionState, req: Request, next: Next) -> Response {
    if !state.enabled || state.skipped(req.uri().path()) {
        return next.run(req).await;
    }

    let accept_encoding = req
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let decision = negotiate(accept_encoding.as_deref());
    if decision == Negotiation::NotAcceptable {
        let mut res =
            Problem::not_acceptable("no acceptable content encoding available").into_response();
        res.headers_mut().insert(
            header::VARY,
            HeaderValue::from_static("Accept-Encoding"),
        );
        return res;
    }

    let mut res = next.run(req).await;
    res.headers_mut().insert(
        header::VARY,
        HeaderValue::from_static("Accept-Encoding"),
    );

    let algo = match decision {
        Negotiation::Encode(algo) => algo,
        _ => return res,
    };

    if res.status() == StatusCode::NO_CONTENT
        || res.status() == StatusCode::NOT_MODIFIED
        || res.headers().contains_key(header::CONTENT_ENCODING)
    {
        return res;
    }

    let essence = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();
    if !state.compressible(&essence) {
        return res;
    }

    encode_body(&state, algo, res).await
}

/// Buffer up to `min_size`, then either pass through (short body) or switch
/// the remainder of the stream onto a pooled encoder.
async fn encode_body(state: &CompressionState, algo: Algorithm, res: Response) -> Response {
    let (mut parts, body) = res.into_parts();
    let mut stream = body.into_data_stream();

    let mut gate = state.pool.acquire_buffer(algo);
    let mut ended = false;
    while gate.len() < state.min_size {
        match stream.next().await {
            Some(Ok(chunk)) => gate.extend_from_slice(&chunk),
            Some(Err(err)) => {
                warn!(%err, "response body failed during compression gating");
                let lead = Bytes::from(std::mem::take(&mut gate));
                let body = Body::from_stream(futures::stream::iter([
                    Ok::<_, axum::Error>(lead),
                    Err(err),
                ]));
                return Response::from_parts(parts, body);
            }
            None => {
                ended = true;
                break;
            }
        }
    }

    if ended && gate.len() < state.min_size {
        // Under the threshold: stream through uncompressed.
        let body = Body::from(Bytes::from(gate));
        return Response::from_parts(parts, body);
    }

    let mut encoder = state.pool.acquire(algo);
    let primed = match encoder.write(&gate) {
        Ok(bytes) => bytes,
        Err(err) => {
            // Nothing has been flushed yet, identity is still possible.
            warn!(%err, algo = algo.token(), "encoder failed before first flush");
            if state.graceful_degraded {
                let lead = Bytes::from(gate);
                let body = Body::from_stream(
                    futures::stream::iter([Ok::<_, axum::Error>(lead)]).chain(stream),
                );
                return Response::from_parts(parts, body);
            }
            return Problem::internal().into_response();
        }
    };
    state.pool.release(algo, gate);

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(algo.token()),
    );

    let body = Body::from_stream(CompressStream {
        inner: stream,
        encoder: Some(encoder),
        primed: (!primed.is_empty()).then(|| Bytes::from(primed)),
        pool: state.pool.clone(),
        algo,
        done: false,
    });
    Response::from_parts(parts, body)
}

struct CompressStream {
    inner: BodyDataStream,
    encoder: Option<Encoder>,
    primed: Option<Bytes>,
    pool: Arc<EncoderPool>,
    algo: Algorithm,
    done: bool,
}

impl Stream for CompressStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(primed) = this.primed.take() {
            return Poll::Ready(Some(Ok(primed)));
        }
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let Some(encoder) = this.encoder.as_mut() else {
                        this.done = true;
                        return Poll::Ready(None);
                    };
                    match encoder.write(&chunk) {
                        Ok(out) if out.is_empty() => {}
                        Ok(out) => return Poll::Ready(Some(Ok(Bytes::from(out)))),
                        Err(err) => {
                            this.done = true;
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(std::io::Error::other(err))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    let Some(encoder) = this.encoder.take() else {
                        return Poll::Ready(None);
                    };
                    return match encoder.finish() {
                        Ok((out, reclaimed)) => {
                            this.pool.release(this.algo, reclaimed);
                            if out.is_empty() {
                                Poll::Ready(None)
                            } else {
                                Poll::Ready(Some(Ok(Bytes::from(out))))
                            }
                        }
                        Err(err) => Poll::Ready(Some(Err(err))),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
