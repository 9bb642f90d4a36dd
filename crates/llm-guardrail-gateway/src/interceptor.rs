//! Streaming interceptor for gateway mode.
//!
//! Each intercepted stream runs as its own task and moves through
//!
//! ```text
//! ACCUMULATING ──(stream_chunk_size chars)──▶ DETECTING ──pass──▶ FORWARDING ──▶ ACCUMULATING
//!                                                 │
//!                                                 └──block──▶ ABORTING ──▶ CLOSED
//! ```
//!
//! Upstream events are held back until the text they carry crosses the next
//! `stream_chunk_size` boundary. Detection then runs on everything received
//! so far. A pass releases the held events verbatim and in order; a block
//! drops them, emits one substitution chunk and `[DONE]`, and closes. Bytes
//! past a detection boundary never reach the client unvetted.
//!
//! Each checkpoint re-screens the whole text, so only the most severe verdict
//! is logged and counted toward a ban, once, when the stream closes.
//!
//! A client disconnect closes the channel and the task stops reading the
//! upstream at its next await. Upstream and detection failures end the
//! stream with a terminal error frame, as does an upstream that goes quiet
//! for longer than the idle timeout.

use crate::error::ApiError;
use crate::models::chat::{new_completion_id, ChatCompletionChunk};
use crate::provider::{ExtractedText, ProviderAdapter};
use crate::sse::{self, SseDecoder, SseEvent};
use crate::telemetry;
use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use llm_guardrail_core::policy::DEFAULT_ANSWER;
use llm_guardrail_core::{
    ChatTurn, DetectionResult, Direction, GuardrailCore, GuardrailError, RequestContext, UpstreamModelConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Accumulating,
    Detecting,
    Forwarding,
    Aborting,
    Closed,
}

/// How an intercepted stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTermination {
    /// Upstream finished and everything was released.
    Completed,
    /// Output was blocked and replaced. Not a failure.
    AbortedByPolicy,
    ClientDisconnected,
    UpstreamFailed,
    DetectionUnavailable,
}

impl StreamTermination {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamTermination::Completed => "completed",
            StreamTermination::AbortedByPolicy => "aborted_by_policy",
            StreamTermination::ClientDisconnected => "client_disconnected",
            StreamTermination::UpstreamFailed => "upstream_failed",
            StreamTermination::DetectionUnavailable => "detection_unavailable",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            StreamTermination::UpstreamFailed | StreamTermination::DetectionUnavailable
        )
    }
}

/// Client side of a running interception.
pub struct InterceptedStream {
    pub rx: mpsc::Receiver<Bytes>,
    pub task: JoinHandle<StreamTermination>,
}

impl InterceptedStream {
    /// Response body fed by the interceptor. Dropping the body cancels the
    /// upstream read.
    pub fn into_body(self) -> Body {
        let mut frames = ReceiverStream::new(self.rx);
        let stream = async_stream::stream! {
            while let Some(bytes) = frames.next().await {
                yield Ok::<_, std::io::Error>(bytes);
            }
        };
        Body::from_stream(stream)
    }
}

pub struct StreamInterceptor {
    core: Arc<GuardrailCore>,
    ctx: RequestContext,
    adapter: ProviderAdapter,
    chunk_size: usize,
    block_on_risk: bool,
    model: String,
    completion_id: String,
    /// Conversation that produced the output.
    context: Vec<ChatTurn>,
    state: StreamState,
    /// Raw events held until the next verdict.
    pending: Vec<Bytes>,
    pending_chars: usize,
    /// All text received so far.
    text: ExtractedText,
    done_frame: Option<Bytes>,
    /// Most severe checkpoint verdict, recorded at close.
    worst: Option<DetectionResult>,
    idle_timeout: Duration,
}

impl StreamInterceptor {
    pub fn new(
        core: Arc<GuardrailCore>,
        ctx: RequestContext,
        upstream: &UpstreamModelConfig,
        model: &str,
        context: Vec<ChatTurn>,
    ) -> Self {
        Self {
            core,
            ctx,
            adapter: ProviderAdapter::new(upstream.provider, upstream.enable_reasoning_detection),
            chunk_size: upstream.stream_chunk_size.max(1),
            block_on_risk: upstream.block_on_output_risk,
            model: model.to_string(),
            completion_id: new_completion_id(),
            context,
            state: StreamState::Accumulating,
            pending: Vec::new(),
            pending_chars: 0,
            text: ExtractedText::default(),
            done_frame: None,
            worst: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Longest wait for the next upstream chunk.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Start intercepting `upstream` on a new task.
    pub fn spawn<S, E>(self, upstream: S) -> InterceptedStream
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let request_id = self.ctx.request_id.clone();
            let termination = self.run(upstream, tx).await;
            telemetry::record_stream_termination(termination);
            if termination.is_failure() {
                warn!(%request_id, termination = termination.as_str(), "Stream terminated");
            } else {
                info!(%request_id, termination = termination.as_str(), "Stream terminated");
            }
            termination
        });
        InterceptedStream { rx, task }
    }

    async fn run<S, E>(mut self, upstream: S, tx: mpsc::Sender<Bytes>) -> StreamTermination
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display,
    {
        let mut upstream = Box::pin(upstream);
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return self.close(StreamTermination::ClientDisconnected).await,
                item = tokio::time::timeout(self.idle_timeout, upstream.next()) => item,
            };
            match next {
                Ok(Some(Ok(bytes))) => {
                    for event in decoder.push(&bytes) {
                        if let Some(end) = self.accept(event, &tx).await {
                            return self.close(end).await;
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(request_id = %self.ctx.request_id, error = %e, "Upstream stream failed");
                    let end = self.fail(&tx, GuardrailError::Upstream(e.to_string())).await;
                    return self.close(end).await;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        request_id = %self.ctx.request_id,
                        idle_secs = self.idle_timeout.as_secs_f64(),
                        "Upstream stream went idle"
                    );
                    let reason = format!(
                        "upstream sent nothing for {:.1}s",
                        self.idle_timeout.as_secs_f64()
                    );
                    let end = self.fail(&tx, GuardrailError::Upstream(reason)).await;
                    return self.close(end).await;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            if let Some(end) = self.accept(event, &tx).await {
                return self.close(end).await;
            }
        }
        // Final verdict on text that never reached a boundary.
        if self.pending_chars > 0 {
            if let Some(end) = self.checkpoint(&tx).await {
                return self.close(end).await;
            }
        } else if let Some(end) = self.release(&tx).await {
            return self.close(end).await;
        }

        let done = self.done_frame.take().unwrap_or_else(sse::done_frame);
        if tx.send(done).await.is_err() {
            return self.close(StreamTermination::ClientDisconnected).await;
        }
        self.close(StreamTermination::Completed).await
    }

    /// Buffer one upstream event, checkpointing at a chunk boundary.
    async fn accept(&mut self, event: SseEvent, tx: &mpsc::Sender<Bytes>) -> Option<StreamTermination> {
        if event.is_done() {
            self.done_frame = Some(event.raw);
            return None;
        }
        if let Some(payload) = event.json_data() {
            let text = self.adapter.chunk_text(payload);
            self.pending_chars += text.content.chars().count();
            if self.adapter.scans_reasoning() {
                self.pending_chars += text.reasoning.chars().count();
            }
            self.text.content.push_str(&text.content);
            self.text.reasoning.push_str(&text.reasoning);
        }
        self.pending.push(event.raw);

        if self.pending_chars >= self.chunk_size {
            return self.checkpoint(tx).await;
        }
        None
    }

    /// Run output detection on all text so far and act on the verdict.
    async fn checkpoint(&mut self, tx: &mpsc::Sender<Bytes>) -> Option<StreamTermination> {
        self.transition(StreamState::Detecting);
        let text = self.adapter.detection_text(&self.text);
        let verdict = tokio::select! {
            _ = tx.closed() => return Some(StreamTermination::ClientDisconnected),
            r = telemetry::observe_detection(
                self.core.screen(&self.ctx, Direction::Output, &text, &self.context),
            ) => r,
        };

        match verdict {
            Ok(result) => {
                let end = if self.block_on_risk && result.is_blocking() {
                    Some(self.abort(tx, &result).await)
                } else {
                    self.release(tx).await
                };
                self.keep_worst(result);
                end
            }
            Err(e) => Some(self.fail(tx, e).await),
        }
    }

    /// Forward held events in arrival order.
    async fn release(&mut self, tx: &mpsc::Sender<Bytes>) -> Option<StreamTermination> {
        self.transition(StreamState::Forwarding);
        for bytes in self.pending.drain(..) {
            if tx.send(bytes).await.is_err() {
                return Some(StreamTermination::ClientDisconnected);
            }
        }
        self.pending_chars = 0;
        self.transition(StreamState::Accumulating);
        None
    }

    /// Drop held events and finish with the substitution answer.
    async fn abort(&mut self, tx: &mpsc::Sender<Bytes>, result: &DetectionResult) -> StreamTermination {
        self.transition(StreamState::Aborting);
        self.pending.clear();
        info!(
            request_id = %self.ctx.request_id,
            detection_id = %result.id,
            risk_level = %result.overall_risk_level,
            "Output blocked mid-stream"
        );
        telemetry::record_substitution("output_stream");

        let answer = result.suggest_answer.as_deref().unwrap_or(DEFAULT_ANSWER);
        let chunk = ChatCompletionChunk::substitution(&self.completion_id, &self.model, answer);
        match serde_json::to_string(&chunk) {
            Ok(json) => {
                if tx.send(sse::data_frame(&json)).await.is_err() {
                    return StreamTermination::ClientDisconnected;
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode substitution chunk"),
        }
        if tx.send(sse::done_frame()).await.is_err() {
            return StreamTermination::ClientDisconnected;
        }
        StreamTermination::AbortedByPolicy
    }

    /// Emit a terminal error frame.
    async fn fail(&mut self, tx: &mpsc::Sender<Bytes>, error: GuardrailError) -> StreamTermination {
        self.pending.clear();
        let end = match error {
            GuardrailError::DetectionUnavailable(_) => StreamTermination::DetectionUnavailable,
            _ => StreamTermination::UpstreamFailed,
        };
        let envelope = ApiError::from(error).body().to_string();
        // Best effort: the client may already be gone.
        let _ = tx.send(sse::data_frame(&envelope)).await;
        let _ = tx.send(sse::done_frame()).await;
        end
    }

    /// Later verdicts cover more text, so they win ties.
    fn keep_worst(&mut self, result: DetectionResult) {
        let replace = self
            .worst
            .as_ref()
            .map_or(true, |w| result.overall_risk_level >= w.overall_risk_level);
        if replace {
            self.worst = Some(result);
        }
    }

    async fn close(&mut self, termination: StreamTermination) -> StreamTermination {
        if let Some(worst) = self.worst.take() {
            self.core.record(&self.ctx, &worst).await;
        }
        self.transition(StreamState::Closed);
        self.pending = Vec::new();
        self.text = ExtractedText::default();
        termination
    }

    fn transition(&mut self, next: StreamState) {
        debug!(request_id = %self.ctx.request_id, from = ?self.state, to = ?next, "Stream state");
        self.state = next;
    }
}
