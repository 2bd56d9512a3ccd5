use crate::client::{ApiClient, ApiError};
use crate::protocol::{ChatRequest, StreamEvent};
use crate::sse::{RecordDecoder, decode_record};
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const STREAM_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

impl ApiClient {
    // Sends one chat request and delivers each decoded event to `on_event`
    // in arrival order, synchronously. Transport failures restart the whole
    // request within a small retry budget; a retry after partial delivery
    // re-delivers the prefix of events the first attempt produced, which is
    // the documented tradeoff of retry-without-resume. Cancellation wins
    // over both reads and retry delays and is reported as ApiError::Cancelled.
    pub async fn stream_chat<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<(), ApiError>
    where
        F: FnMut(StreamEvent),
    {
        let request_id = Uuid::new_v4();
        let mut attempt = 0u32;

        loop {
            match self.stream_attempt(request, cancel, &mut on_event).await {
                Ok(()) => {
                    tracing::debug!(%request_id, "chat stream complete");
                    return Ok(());
                }
                Err(ApiError::Transport(err)) if attempt < STREAM_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        %request_id,
                        attempt,
                        error = %err,
                        "chat stream interrupted, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
                Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                Err(err) => {
                    tracing::warn!(%request_id, error = %err, "chat stream failed");
                    return Err(err);
                }
            }
        }
    }

    async fn stream_attempt<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<(), ApiError>
    where
        F: FnMut(StreamEvent),
    {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let token = self.tokens.bearer().await?;
        let send = self
            .http
            .post(self.url("/agent/chat"))
            .bearer_auth(token)
            .json(request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            response = send => response.map_err(ApiError::Transport)?,
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.clear();
            return Err(ApiError::Unauthorized);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
            return Err(ApiError::NotEventStream);
        }

        let mut stream = response.bytes_stream();
        let mut decoder = RecordDecoder::new();

        loop {
            // Biased so an abort wins over an already-buffered chunk; no
            // event is delivered after cancellation.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                next = stream.next() => next,
            };

            match next {
                // Server closed the connection; no synthetic `done` event.
                None => return Ok(()),
                Some(Err(err)) => return Err(ApiError::Transport(err)),
                Some(Ok(chunk)) => {
                    for record in decoder.feed(&chunk) {
                        // One chunk can carry several records; the token is
                        // re-checked per record so a cancel issued from the
                        // callback stops delivery immediately.
                        if cancel.is_cancelled() {
                            return Err(ApiError::Cancelled);
                        }
                        if let Some(event) = decode_record(&record) {
                            on_event(event);
                        }
                    }
                }
            }
        }
    }
}
