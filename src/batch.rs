//! Batch aggregation: split, extract each chat, normalize, collect in order.

use crate::agent::{Credentials, ExtractError, Extractor};
use crate::config::BatchConfig;
use crate::normalize::normalize;
use crate::record::{BatchResult, RawExtraction, Record, Transcript};
use crate::splitter::split;
use futures::StreamExt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Upper bound on any wait between attempts, including provider `Retry-After` hints.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("{0}")]
    Auth(ExtractError),
    #[error("batch cancelled after {completed} of {total} chats")]
    Cancelled { completed: usize, total: usize },
    #[error("found {found} chats, more than the configured limit of {limit}")]
    TooManyChats { found: usize, limit: usize },
    #[error("no chat text to process")]
    EmptyInput,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub concurrency: usize,
    pub max_chats: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries.min(1),
            backoff: config.backoff(),
            concurrency: config.concurrency.max(1),
            max_chats: config.max_chats,
        }
    }
}

/// Notified as each record is produced, in input order.
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _total: usize) {}

    fn on_record(&self, index: usize, total: usize, record: &Record);

    fn on_finish(&self, _result: &BatchResult) {}
}

enum ItemOutcome {
    Done(Result<RawExtraction, ExtractError>),
    Skipped,
    /// Dropped because another chat hit an authentication failure.
    Aborted,
}

/// Shared by the items of one batch; set by the first auth failure.
#[derive(Default)]
struct AuthAbort {
    token: CancellationToken,
    error: OnceLock<ExtractError>,
}

impl AuthAbort {
    fn trip(&self, err: &ExtractError) {
        let _ = self.error.set(err.clone());
        self.token.cancel();
    }
}

/// Drives an [`Extractor`] over every chat in a paste.
pub struct BatchProcessor<E> {
    extractor: E,
    options: BatchOptions,
}

impl<E: Extractor> BatchProcessor<E> {
    pub fn new(extractor: E, options: BatchOptions) -> Self {
        Self { extractor, options }
    }

    /// Split `raw` on delimiter lines and process every chat.
    ///
    /// Returns one record per chat, in paste order. Only an authentication
    /// failure, a cancellation or an oversized paste fail the whole batch.
    pub async fn process_batch(
        &self,
        raw: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<BatchResult, BatchError> {
        let transcripts = split(raw);
        self.process_transcripts(&transcripts, credentials, cancel, observer)
            .await
    }

    /// Process `text` as one chat without splitting.
    pub async fn process_single(
        &self,
        text: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<BatchResult, BatchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BatchError::EmptyInput);
        }
        let transcripts = [Transcript::new(text)];
        self.process_transcripts(&transcripts, credentials, cancel, observer)
            .await
    }

    pub async fn process_transcripts(
        &self,
        transcripts: &[Transcript],
        credentials: &Credentials,
        cancel: &CancellationToken,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<BatchResult, BatchError> {
        if credentials.is_empty() {
            return Err(BatchError::Auth(ExtractError::Auth(
                "no API key provided".to_string(),
            )));
        }

        let total = transcripts.len();
        if let Some(limit) = self.options.max_chats {
            if total > limit {
                return Err(BatchError::TooManyChats {
                    found: total,
                    limit,
                });
            }
        }

        if let Some(observer) = observer {
            observer.on_start(total);
        }

        let abort = &AuthAbort::default();
        let outcomes = futures::stream::iter(transcripts.iter().enumerate())
            .map(|(index, transcript)| {
                self.process_item(index, transcript, credentials, cancel, abort)
            })
            .buffered(self.options.concurrency.max(1));
        let mut outcomes = std::pin::pin!(outcomes);

        let mut records = Vec::with_capacity(total);
        let mut cancelled = false;

        while let Some((index, outcome)) = outcomes.next().await {
            let result = match outcome {
                ItemOutcome::Skipped => {
                    cancelled = true;
                    continue;
                }
                // An auth failure further down the batch ends it here, without
                // waiting for this chat's call.
                ItemOutcome::Aborted => match abort.error.get() {
                    Some(err) => return Err(auth_failure(err.clone())),
                    None => continue,
                },
                // Items finishing after a cancellation are drained, not recorded.
                ItemOutcome::Done(_) if cancelled => continue,
                ItemOutcome::Done(result) => result,
            };

            let result = match result {
                Err(err @ ExtractError::Auth(_)) => return Err(auth_failure(err)),
                other => other,
            };

            let record = normalize(result.as_ref());
            if let Some(message) = &record.error_message {
                tracing::warn!(index, error = %message, "Chat extraction failed");
            }
            if let Some(observer) = observer {
                observer.on_record(index, total, &record);
            }
            records.push(record);
        }

        if cancelled {
            tracing::info!(completed = records.len(), total, "Batch cancelled");
            return Err(BatchError::Cancelled {
                completed: records.len(),
                total,
            });
        }

        let result = BatchResult::new(records);
        tracing::info!(
            total,
            ok = result.succeeded(),
            failed = result.failed(),
            "Batch complete"
        );
        if let Some(observer) = observer {
            observer.on_finish(&result);
        }
        Ok(result)
    }

    async fn process_item(
        &self,
        index: usize,
        transcript: &Transcript,
        credentials: &Credentials,
        cancel: &CancellationToken,
        abort: &AuthAbort,
    ) -> (usize, ItemOutcome) {
        if cancel.is_cancelled() {
            return (index, ItemOutcome::Skipped);
        }
        if abort.token.is_cancelled() {
            return (index, ItemOutcome::Aborted);
        }

        let result = tokio::select! {
            result = self.extract_with_retry(index, transcript, credentials) => result,
            _ = abort.token.cancelled() => return (index, ItemOutcome::Aborted),
        };
        if let Err(err) = &result {
            if matches!(err, ExtractError::Auth(_)) {
                tracing::debug!(index, "Authentication failed, dropping other chats in flight");
                abort.trip(err);
            }
        }
        (index, ItemOutcome::Done(result))
    }

    async fn extract_with_retry(
        &self,
        index: usize,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError> {
        let mut attempt = 0;
        loop {
            match self.extract_once(transcript, credentials).await {
                Ok(raw) => return Ok(raw),
                Err(err) if err.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let backoff = err
                        .retry_after()
                        .unwrap_or(self.options.backoff)
                        .min(MAX_BACKOFF);
                    tracing::warn!(
                        index,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Extraction failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn extract_once(
        &self,
        transcript: &Transcript,
        credentials: &Credentials,
    ) -> Result<RawExtraction, ExtractError> {
        match tokio::time::timeout(
            self.options.timeout,
            self.extractor.extract(transcript, credentials),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Transient(format!(
                "request timed out after {}s",
                self.options.timeout.as_secs()
            ))),
        }
    }
}

fn auth_failure(err: ExtractError) -> BatchError {
    tracing::error!(error = %err, "Authentication failed, aborting batch");
    BatchError::Auth(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns scripted results in call order and counts calls.
    struct Scripted {
        results: Mutex<VecDeque<Result<RawExtraction, ExtractError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<Result<RawExtraction, ExtractError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn extract(
            &self,
            _transcript: &Transcript,
            _credentials: &Credentials,
        ) -> Result<RawExtraction, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExtractError::Transient("script exhausted".into())))
        }
    }

    fn titled(title: &str) -> Result<RawExtraction, ExtractError> {
        match json!({ "title": title, "summary": "s" }) {
            Value::Object(map) => Ok(RawExtraction::new(map)),
            _ => unreachable!(),
        }
    }

    fn fast_options() -> BatchOptions {
        BatchOptions {
            backoff: Duration::from_millis(1),
            ..BatchOptions::default()
        }
    }

    fn creds() -> Credentials {
        Credentials::new("key")
    }

    #[tokio::test]
    async fn records_follow_input_order() {
        let processor = BatchProcessor::new(
            Scripted::new(vec![titled("one"), titled("two")]),
            fast_options(),
        );
        let result = processor
            .process_batch("a\n-----\nb", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        let titles: Vec<_> = result.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn transient_is_retried_once() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::Transient("reset".into())),
            titled("recovered"),
        ]);
        let processor = BatchProcessor::new(extractor, fast_options());
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(result.records()[0].title, "recovered");
        assert_eq!(processor.extractor.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_is_not_retried() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::MalformedResponse("not json".into())),
            titled("never used"),
        ]);
        let processor = BatchProcessor::new(extractor, fast_options());
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(result.records()[0].status, RecordStatus::Failed);
        assert_eq!(processor.extractor.calls(), 1);
    }

    #[tokio::test]
    async fn zero_retries_disables_retry() {
        let extractor = Scripted::new(vec![Err(ExtractError::rate_limit("slow down"))]);
        let options = BatchOptions {
            max_retries: 0,
            ..fast_options()
        };
        let processor = BatchProcessor::new(extractor, options);
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(
            result.records()[0].error_message.as_deref(),
            Some("rate-limit: slow down")
        );
        assert_eq!(processor.extractor.calls(), 1);
    }

    #[tokio::test]
    async fn auth_error_aborts_remaining_items() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::Auth("invalid key".into())),
            titled("b"),
        ]);
        let processor = BatchProcessor::new(extractor, fast_options());
        let err = processor
            .process_batch("a\n-----\nb", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Auth(_)));
        assert_eq!(processor.extractor.calls(), 1);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_call() {
        let processor = BatchProcessor::new(Scripted::new(vec![titled("a")]), fast_options());
        let err = processor
            .process_batch(
                "a",
                &Credentials::default(),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Auth(_)));
        assert_eq!(processor.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let processor = BatchProcessor::new(Scripted::new(vec![titled("a")]), fast_options());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = processor
            .process_batch("a\n-----\nb", &creds(), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::Cancelled {
                completed: 0,
                total: 2
            }
        ));
        assert_eq!(processor.extractor.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_as_transient() {
        struct Stalled;

        #[async_trait]
        impl Extractor for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn extract(
                &self,
                _transcript: &Transcript,
                _credentials: &Credentials,
            ) -> Result<RawExtraction, ExtractError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RawExtraction::default())
            }
        }

        let options = BatchOptions {
            timeout: Duration::from_secs(5),
            ..fast_options()
        };
        let processor = BatchProcessor::new(Stalled, options);
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        let message = result.records()[0].error_message.clone().unwrap();
        assert!(message.starts_with("transient: request timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_is_capped() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::RateLimit {
                message: "slow down".into(),
                retry_after: Some(Duration::from_secs(3600)),
            }),
            titled("late"),
        ]);
        let processor = BatchProcessor::new(extractor, BatchOptions::default());

        let start = tokio::time::Instant::now();
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        let waited = start.elapsed();

        assert_eq!(result.records()[0].title, "late");
        assert_eq!(processor.extractor.calls(), 2);
        assert!(waited >= MAX_BACKOFF && waited < MAX_BACKOFF + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_replaces_backoff() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::RateLimit {
                message: "slow down".into(),
                retry_after: Some(Duration::from_secs(7)),
            }),
            titled("late"),
        ]);
        let processor = BatchProcessor::new(extractor, BatchOptions::default());

        let start = tokio::time::Instant::now();
        processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        let waited = start.elapsed();

        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_twice_fails_the_record() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::rate_limit("slow down")),
            Err(ExtractError::rate_limit("slow down")),
            titled("never used"),
        ]);
        let processor = BatchProcessor::new(extractor, BatchOptions::default());
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(result.records()[0].status, RecordStatus::Failed);
        assert_eq!(
            result.records()[0].error_message.as_deref(),
            Some("rate-limit: slow down")
        );
        assert_eq!(processor.extractor.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_retry_waits_configured_backoff() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::Transient("reset".into())),
            titled("recovered"),
        ]);
        let options = BatchOptions::default();
        let backoff = options.backoff;
        let processor = BatchProcessor::new(extractor, options);

        let start = tokio::time::Instant::now();
        processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        let waited = start.elapsed();

        assert!(waited >= backoff && waited < backoff + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn rejected_request_is_not_retried() {
        let extractor = Scripted::new(vec![
            Err(ExtractError::Rejected("HTTP 404: model not found".into())),
            titled("never used"),
        ]);
        let processor = BatchProcessor::new(extractor, fast_options());
        let result = processor
            .process_batch("only", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(
            result.records()[0].error_message.as_deref(),
            Some("rejected: HTTP 404: model not found")
        );
        assert_eq!(processor.extractor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_error_does_not_wait_for_earlier_chats() {
        /// Stalls on "slow", rejects the key on anything else.
        struct StallThenDeny;

        #[async_trait]
        impl Extractor for StallThenDeny {
            fn name(&self) -> &str {
                "stall-then-deny"
            }

            async fn extract(
                &self,
                transcript: &Transcript,
                _credentials: &Credentials,
            ) -> Result<RawExtraction, ExtractError> {
                if transcript.as_str() == "slow" {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return titled("slow");
                }
                Err(ExtractError::Auth("invalid key".into()))
            }
        }

        let options = BatchOptions {
            concurrency: 2,
            ..fast_options()
        };
        let processor = BatchProcessor::new(StallThenDeny, options);

        let start = tokio::time::Instant::now();
        let err = processor
            .process_batch(
                "slow\n-----\ndenied",
                &creds(),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Auth(ExtractError::Auth(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn too_many_chats_is_rejected() {
        let options = BatchOptions {
            max_chats: Some(1),
            ..fast_options()
        };
        let processor = BatchProcessor::new(Scripted::new(vec![]), options);
        let err = processor
            .process_batch("a\n-----\nb", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::TooManyChats { found: 2, limit: 1 }
        ));
    }

    #[tokio::test]
    async fn single_mode_does_not_split() {
        let processor = BatchProcessor::new(Scripted::new(vec![titled("whole")]), fast_options());
        let result = processor
            .process_single("a\n-----\nb", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);

        let err = processor
            .process_single("   ", &creds(), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::EmptyInput));
    }
}
