//! Media segment relay with per-infohash transcode decisions.
//!
//! The first segment of a stream is buffered, probed and served according to
//! the verdict. Later segments are streamed straight through, either byte for
//! byte or into a live encoder, without ever being buffered whole.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{debug, info, warn};

use super::segment_infohash;
use crate::transcode::{DecisionCache, MPEG_TS, StreamProber, TranscodeInput, TranscodingPipe};
use crate::upstream::{InfoHash, UpstreamClient};

const FETCH_FAILED: &str = "Segment fetch failed";

/// Serves segment requests under the playback prefix.
#[derive(Clone)]
pub struct SegmentRelay {
    upstream: UpstreamClient,
    cache: Arc<DecisionCache>,
    prober: Arc<dyn StreamProber>,
    pipe: TranscodingPipe,
}

impl SegmentRelay {
    pub fn new(
        upstream: UpstreamClient,
        cache: Arc<DecisionCache>,
        prober: Arc<dyn StreamProber>,
        pipe: TranscodingPipe,
    ) -> Self {
        Self {
            upstream,
            cache,
            prober,
            pipe,
        }
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn pipe(&self) -> &TranscodingPipe {
        &self.pipe
    }

    /// Relays the segment at `rest_path` below the playback prefix.
    ///
    /// Segments without an infohash in their path are passed through.
    pub async fn relay(&self, rest_path: &str, query: Option<&str>) -> Response {
        let target = self.upstream.playback_target(rest_path, query);

        let Some(infohash) = segment_infohash(rest_path) else {
            debug!(path = rest_path, "Segment without infohash, passing through");
            return self.relay_known(false, &target).await;
        };

        match self.cache.get(&infohash) {
            Some(verdict) => self.relay_known(verdict.needs_transcode, &target).await,
            None => self.relay_unknown(infohash, &target).await,
        }
    }

    /// Buffers, probes and serves the first segment seen for `infohash`.
    ///
    /// Concurrent first requests for the same infohash queue on the probe
    /// lock; whoever acquires it after a verdict was stored relays as known.
    async fn relay_unknown(&self, infohash: InfoHash, target: &str) -> Response {
        let lock = self.cache.probe_lock(&infohash);
        let guard = lock.lock().await;

        if let Some(verdict) = self.cache.get(&infohash) {
            drop(guard);
            return self.relay_known(verdict.needs_transcode, target).await;
        }

        let response = match self.upstream.open_segment(target).await {
            Ok(response) => response,
            Err(e) => {
                warn!(infohash = infohash.short(), "Segment fetch failed: {}", e);
                return (StatusCode::BAD_GATEWAY, FETCH_FAILED).into_response();
            }
        };

        if !response.status().is_success() {
            return upstream_status(response);
        }

        let segment = match response.bytes().await {
            Ok(segment) => segment,
            Err(e) => {
                warn!(infohash = infohash.short(), "Segment body failed: {}", e);
                return (StatusCode::BAD_GATEWAY, FETCH_FAILED).into_response();
            }
        };

        let needs_transcode = self.prober.needs_transcode(&segment).await;
        self.cache.put(infohash.clone(), needs_transcode);
        drop(guard);

        info!(
            infohash = infohash.short(),
            bytes = segment.len(),
            "Probe verdict: {}",
            if needs_transcode {
                "transcode (interlaced or MP2)"
            } else {
                "passthrough (progressive and browser-safe audio)"
            }
        );

        if needs_transcode {
            self.pipe.serve(TranscodeInput::Buffered(segment)).await
        } else {
            raw_segment(segment)
        }
    }

    async fn relay_known(&self, needs_transcode: bool, target: &str) -> Response {
        let response = match self.upstream.open_segment(target).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Segment fetch failed: {}", e);
                return (StatusCode::BAD_GATEWAY, FETCH_FAILED).into_response();
            }
        };

        if !response.status().is_success() {
            return upstream_status(response);
        }

        if needs_transcode {
            self.pipe
                .serve(TranscodeInput::live(response.bytes_stream()))
                .await
        } else {
            passthrough(response)
        }
    }
}

/// Mirrors an upstream error status and body.
fn upstream_status(response: reqwest::Response) -> Response {
    let status = response.status();
    debug!(%status, "Relaying upstream error status");
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    if let Some(content_type) = content_type {
        relayed.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    relayed.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    relayed
}

/// Streams an upstream segment unmodified.
fn passthrough(response: reqwest::Response) -> Response {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(MPEG_TS));
    let content_length = response.headers().get(header::CONTENT_LENGTH).cloned();

    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;

    let headers = relayed.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, length);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    relayed
}

/// Serves an already-buffered segment as MPEG-TS.
fn raw_segment(segment: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, MPEG_TS),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        segment,
    )
        .into_response()
}
