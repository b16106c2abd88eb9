//! Streaming encoder pipe.
//!
//! Bytes flow upstream -> encoder stdin -> encoder stdout -> client. The
//! encoder process lives exactly as long as the response body: dropping the
//! body (client disconnect or normal completion) kills and reaps it.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EncoderProfile, MPEG_TS, TranscodeError};

/// Size of each read from the encoder's stdout.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// How long to wait for the encoder to exit after it closes stdout.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Source of encoder input.
pub enum TranscodeInput {
    /// Segment already held in memory, written in one go.
    Buffered(Bytes),
    /// Upstream body forwarded chunk by chunk as it arrives.
    Live(BoxStream<'static, io::Result<Bytes>>),
}

impl TranscodeInput {
    /// Wraps any fallible byte stream, e.g. `reqwest::Response::bytes_stream`.
    pub fn live<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Live(stream.map_err(io::Error::other).boxed())
    }
}

impl std::fmt::Debug for TranscodeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Live(_) => write!(f, "Live"),
        }
    }
}

/// Spawns one encoder process per request.
#[derive(Debug, Clone)]
pub struct TranscodingPipe {
    profile: Arc<EncoderProfile>,
    active: Arc<AtomicUsize>,
}

impl TranscodingPipe {
    pub fn new(profile: EncoderProfile) -> Self {
        Self {
            profile: Arc::new(profile),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn profile(&self) -> &EncoderProfile {
        &self.profile
    }

    /// Encoder processes spawned and not yet reaped.
    pub fn active_processes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Encodes `input` and streams the result as an HTTP response.
    ///
    /// Headers are committed only after the encoder emits its first bytes.
    /// A spawn failure or an encoder that exits without output yields 502.
    pub async fn serve(&self, input: TranscodeInput) -> Response {
        match self.start(input).await {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, MPEG_TS)
                .header(header::CACHE_CONTROL, "no-cache")
                .header(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                )
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
            Err(e) => {
                warn!("Transcode failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Transcoding failed").into_response()
            }
        }
    }

    /// Spawns the encoder and waits for its first output chunk.
    ///
    /// # Errors
    /// - `TranscodeError::SpawnFailed` - Encoder binary could not be started
    /// - `TranscodeError::PipeUnavailable` - A stdio pipe was not captured
    /// - `TranscodeError::ExitedWithoutOutput` - Encoder failed before writing anything
    /// - `TranscodeError::Output` - Reading encoder stdout failed
    pub async fn start(&self, input: TranscodeInput) -> Result<Body, TranscodeError> {
        let mut child = Command::new(self.profile.program())
            .args(self.profile.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::SpawnFailed {
                program: self.profile.program().display().to_string(),
                source,
            })?;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pid = child.id(), active, "Encoder spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut guard = ProcessGuard {
            child: Some(child),
            pump: None,
            active: self.active.clone(),
        };

        let stdin = stdin.ok_or(TranscodeError::PipeUnavailable { pipe: "stdin" })?;
        let mut stdout = stdout.ok_or(TranscodeError::PipeUnavailable { pipe: "stdout" })?;
        if let Some(stderr) = stderr {
            spawn_stderr_reader(stderr);
        }

        guard.pump = Some(spawn_input_pump(input, stdin));

        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let n = stdout.read(&mut buffer).await?;
        if n == 0 {
            let status = guard.wait_exit().await;
            return match status {
                Some(status) if status.success() => Ok(Body::empty()),
                Some(status) => Err(TranscodeError::ExitedWithoutOutput {
                    status: status.to_string(),
                }),
                None => Err(TranscodeError::ExitedWithoutOutput {
                    status: "unknown".to_string(),
                }),
            };
        }
        buffer.truncate(n);

        let first = stream::once(async move { Ok::<_, io::Error>(Bytes::from(buffer)) });
        let rest = stream::unfold((stdout, guard), |(mut stdout, guard)| async move {
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];
            match stdout.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok::<_, io::Error>(Bytes::from(buffer)), (stdout, guard)))
                }
                Err(e) => {
                    warn!("Encoder stdout read failed: {}", e);
                    None
                }
            }
        });

        Ok(Body::from_stream(first.chain(rest)))
    }
}

/// Owns the encoder process and its input pump.
///
/// Dropping the guard kills the encoder, cancels the pump (releasing the
/// upstream connection) and reaps the process in the background.
struct ProcessGuard {
    child: Option<Child>,
    pump: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl ProcessGuard {
    async fn wait_exit(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Failed to wait for encoder: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        let _ = child.start_kill();

        let active = self.active.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match child.wait().await {
                        Ok(status) => debug!("Encoder reaped: {}", status),
                        Err(e) => warn!("Failed to reap encoder: {}", e),
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(_) => {
                // kill_on_drop still applies to the child
                active.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

fn spawn_input_pump(input: TranscodeInput, mut stdin: ChildStdin) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut fed = 0usize;

        match input {
            TranscodeInput::Buffered(bytes) => match stdin.write_all(&bytes).await {
                Ok(()) => fed = bytes.len(),
                Err(e) => warn!("Failed to write to encoder stdin: {}", e),
            },
            TranscodeInput::Live(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!("Upstream body failed mid-transcode: {}", e);
                            break;
                        }
                    };
                    if let Err(e) = stdin.write_all(&chunk).await {
                        // Encoder likely exited
                        warn!("Failed to write to encoder stdin: {}", e);
                        break;
                    }
                    fed += chunk.len();
                }
            }
        }

        // EOF for the encoder
        drop(stdin);
        info!("Input pump completed, fed {} bytes to encoder", fed);
    })
}

fn spawn_stderr_reader(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                debug!("Encoder stderr: {}", line.trim());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use futures::StreamExt;
    use tokio::sync::mpsc;

    use super::*;

    fn cat_pipe() -> TranscodingPipe {
        TranscodingPipe::new(EncoderProfile::custom("cat", Vec::new()))
    }

    async fn wait_for_idle(pipe: &TranscodingPipe) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipe.active_processes() > 0 {
            assert!(Instant::now() < deadline, "encoder was never reaped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_buffered_input_streams_encoder_output() {
        let pipe = cat_pipe();
        let segment = Bytes::from(vec![0x47u8; 188 * 100]);

        let response = pipe.serve(TranscodeInput::Buffered(segment.clone())).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], MPEG_TS);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, segment);
        wait_for_idle(&pipe).await;
    }

    #[tokio::test]
    async fn test_live_input_streams_encoder_output() {
        let pipe = cat_pipe();
        let chunks = vec![
            Ok::<_, io::Error>(Bytes::from_static(b"first-")),
            Ok(Bytes::from_static(b"second-")),
            Ok(Bytes::from_static(b"third")),
        ];

        let response = pipe
            .serve(TranscodeInput::Live(stream::iter(chunks).boxed()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"first-second-third");
    }

    #[tokio::test]
    async fn test_encoder_failure_before_output_is_bad_gateway() {
        let pipe = TranscodingPipe::new(EncoderProfile::custom("false", Vec::new()));

        let response = pipe
            .serve(TranscodeInput::Buffered(Bytes::from_static(b"segment")))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        wait_for_idle(&pipe).await;
    }

    #[tokio::test]
    async fn test_missing_encoder_is_bad_gateway() {
        let pipe = TranscodingPipe::new(EncoderProfile::custom("/nonexistent/ffmpeg", Vec::new()));

        let err = pipe
            .start(TranscodeInput::Buffered(Bytes::from_static(b"segment")))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::SpawnFailed { .. }));

        let response = pipe
            .serve(TranscodeInput::Buffered(Bytes::from_static(b"segment")))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(pipe.active_processes(), 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_kills_encoder() {
        let pipe = cat_pipe();
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
        let input = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        tx.send(Ok(Bytes::from_static(b"live-chunk"))).await.unwrap();
        let response = pipe.serve(TranscodeInput::Live(input.boxed())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(pipe.active_processes(), 1);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"live-chunk");

        // Upstream is still open; dropping the body is the only way out
        drop(body);
        wait_for_idle(&pipe).await;

        // The aborted pump releases the upstream side
        let deadline = Instant::now() + Duration::from_secs(5);
        while !tx.is_closed() {
            assert!(Instant::now() < deadline, "upstream input was never released");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
