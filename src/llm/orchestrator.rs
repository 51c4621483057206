//! Answer orchestration: retries, timeouts, and streaming with cancellation

use super::{CancelToken, GenerationParams, LanguageModel, LlmError, LlmRequest};
use crate::backoff;
use crate::config::LlmConfig;
use crate::error::{DocsageError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, warn};

const SEGMENT_CHANNEL_CAPACITY: usize = 16;

/// Drives the language-model collaborator: one blocking call per answer,
/// or a streaming call whose segments are pumped to the consumer. Transient
/// transport failures are retried with bounded backoff; terminal failures
/// surface immediately as `GenerationFailed`.
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    config: LlmConfig,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn LanguageModel>, config: LlmConfig) -> Self {
        Self { model, config }
    }

    pub fn default_params(&self) -> GenerationParams {
        GenerationParams::from(&self.config)
    }

    fn request(&self, prompt: &str, params: &GenerationParams) -> LlmRequest {
        LlmRequest {
            prompt: prompt.to_string(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        }
    }

    /// Single blocking generation
    pub async fn answer(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = self.request(prompt, params);
        let mut attempt: u32 = 0;

        loop {
            let outcome = time::timeout(self.config.timeout(), self.model.generate(&request)).await;

            let error = match outcome {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => e,
                Err(_) => LlmError::TimedOut,
            };

            if !error.is_transient() {
                return Err(DocsageError::GenerationFailed(error.to_string()));
            }

            if attempt >= self.config.max_retries {
                return Err(DocsageError::GenerationFailed(format!(
                    "Transient failure persisted after {} attempts: {}",
                    attempt + 1,
                    error
                )));
            }

            warn!("Generation attempt {} failed: {}", attempt + 1, error);
            time::sleep(backoff::delay(self.config.retry_base(), attempt)).await;
            attempt += 1;
        }
    }

    /// Streaming generation. Segments arrive in order on the returned
    /// stream; the consumer may cancel at any point.
    pub async fn answer_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<AnswerStream> {
        let request = self.request(prompt, params);
        let consumer_cancel = CancelToken::new();

        let (out_tx, out_rx) = mpsc::channel(SEGMENT_CHANNEL_CAPACITY);

        let model = self.model.clone();
        let config = self.config.clone();
        let driver_cancel = consumer_cancel.clone();

        let driver = tokio::spawn(async move {
            drive_stream(model, config, request, out_tx, driver_cancel).await
        });

        Ok(AnswerStream {
            segments: out_rx,
            cancel: consumer_cancel,
            driver,
        })
    }
}

/// Run attempts until one delivers or retries are exhausted. Retrying is
/// only sound before the first segment reaches the consumer; a mid-stream
/// failure surfaces instead of silently restarting the generation.
async fn drive_stream(
    model: Arc<dyn LanguageModel>,
    config: LlmConfig,
    request: LlmRequest,
    out_tx: mpsc::Sender<String>,
    consumer_cancel: CancelToken,
) -> Result<()> {
    let mut attempt: u32 = 0;

    loop {
        if consumer_cancel.is_cancelled() {
            return Ok(());
        }

        let attempt_cancel = CancelToken::new();
        let outcome = run_attempt(
            model.as_ref(),
            &request,
            &out_tx,
            &consumer_cancel,
            &attempt_cancel,
            config.timeout(),
        )
        .await;

        match outcome.result {
            Ok(()) => return Ok(()),
            Err(e) if consumer_cancel.is_cancelled() => {
                debug!("Ignoring failure after cancellation: {}", e);
                return Ok(());
            }
            Err(e) if e.is_transient() && !outcome.delivered && attempt < config.max_retries => {
                warn!("Streaming attempt {} failed: {}", attempt + 1, e);
                time::sleep(backoff::delay(config.retry_base(), attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(DocsageError::GenerationFailed(e.to_string())),
        }
    }
}

struct AttemptOutcome {
    delivered: bool,
    result: std::result::Result<(), LlmError>,
}

async fn run_attempt(
    model: &dyn LanguageModel,
    request: &LlmRequest,
    out_tx: &mpsc::Sender<String>,
    consumer_cancel: &CancelToken,
    attempt_cancel: &CancelToken,
    first_segment_timeout: std::time::Duration,
) -> AttemptOutcome {
    let (seg_tx, mut seg_rx) = mpsc::channel::<String>(SEGMENT_CHANNEL_CAPACITY);

    let call = model.generate_stream(request, seg_tx, attempt_cancel.clone());
    tokio::pin!(call);

    let deadline = time::Instant::now() + first_segment_timeout;
    let mut call_done: Option<std::result::Result<(), LlmError>> = None;
    let mut delivered = false;
    let mut cancel_seen = false;

    loop {
        tokio::select! {
            _ = consumer_cancel.cancelled(), if !cancel_seen => {
                cancel_seen = true;
                attempt_cancel.cancel();
            }

            segment = seg_rx.recv() => match segment {
                Some(text) => {
                    delivered = true;
                    if out_tx.send(text).await.is_err() {
                        // Consumer dropped the stream; stop the transport
                        attempt_cancel.cancel();
                    }
                }
                None => {
                    // Model finished and dropped its sender
                    let result = match call_done.take() {
                        Some(r) => r,
                        None => (&mut call).await,
                    };
                    return AttemptOutcome { delivered, result };
                }
            },

            result = &mut call, if call_done.is_none() => {
                call_done = Some(result);
            }

            _ = time::sleep_until(deadline), if !delivered && !cancel_seen => {
                // No first segment within the timeout: fail this attempt.
                // Dropping the call future closes the transport.
                attempt_cancel.cancel();
                return AttemptOutcome {
                    delivered: false,
                    result: Err(LlmError::TimedOut),
                };
            }
        }
    }
}

/// Streaming answer handle.
///
/// Segments are yielded in arrival order. After `cancel` returns, no
/// further segment is observable: the token is tripped, the channel is
/// closed, and anything already buffered is discarded. Dropping the stream
/// cancels implicitly (cooperatively).
pub struct AnswerStream {
    segments: mpsc::Receiver<String>,
    cancel: CancelToken,
    driver: tokio::task::JoinHandle<Result<()>>,
}

impl AnswerStream {
    /// Next segment, or `None` when the stream has ended or was cancelled
    pub async fn next_segment(&mut self) -> Option<String> {
        self.segments.recv().await
    }

    /// Cancel the stream. Propagates to the collaborator's transport and
    /// guarantees no segment is delivered after this call returns.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.segments.close();
        while self.segments.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await the driver's terminal status. Collects the whole stream's
    /// outcome; cancelled streams finish Ok.
    pub async fn finish(mut self) -> Result<()> {
        self.segments.close();
        match (&mut self.driver).await {
            Ok(result) => result,
            Err(join_err) => Err(DocsageError::GenerationFailed(format!(
                "Stream driver failed: {}",
                join_err
            ))),
        }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
