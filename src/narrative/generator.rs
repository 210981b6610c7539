//! Concurrent narrative generation.

use crate::error::RecapError;
use crate::models::{ActivityGroup, NarrativeRequest, NarrativeResult};
use crate::narrative::llm::LanguageModel;
use crate::narrative::parse::parse_narrative;
use crate::retry::{with_retry, RetryPolicy};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one group's generation.
#[derive(Debug, Clone)]
pub struct Generated {
    pub request: NarrativeRequest,
    pub result: Result<NarrativeResult, RecapError>,
}

/// Runs narrative requests against a language model.
pub struct NarrativeGenerator {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    call_timeout: Duration,
    concurrency: usize,
}

impl NarrativeGenerator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        call_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            model,
            retry,
            call_timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn model_name(&self) -> String {
        self.model.name()
    }

    /// Generate every request, at most `concurrency` at a time.
    ///
    /// Results come back ordered by (dimension, key) regardless of
    /// completion order. One failure never affects the other groups.
    /// `progress` is ticked once per finished group.
    pub async fn generate(
        &self,
        jobs: Vec<(ActivityGroup, NarrativeRequest)>,
        progress: Option<&ProgressBar>,
    ) -> Vec<Generated> {
        info!(
            "Generating {} narratives with {} (concurrency {})",
            jobs.len(),
            self.model.name(),
            self.concurrency
        );

        let mut generated: Vec<Generated> = stream::iter(jobs)
            .map(|(group, request)| async move {
                let result = self.generate_one(&group, &request).await;
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                Generated { request, result }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        generated.sort_by(|a, b| {
            (a.request.dimension, &a.request.key).cmp(&(b.request.dimension, &b.request.key))
        });
        generated
    }

    async fn generate_one(
        &self,
        group: &ActivityGroup,
        request: &NarrativeRequest,
    ) -> Result<NarrativeResult, RecapError> {
        debug!("Requesting narrative for {} {}", request.dimension, request.key);

        let raw = with_retry(&self.retry, "llm", || async {
            match tokio::time::timeout(
                self.call_timeout,
                self.model.complete(&request.instruction, &request.context),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RecapError::transient(
                    "llm",
                    format!("timed out after {}s", self.call_timeout.as_secs()),
                )),
            }
        })
        .await;

        let result = raw.and_then(|raw| parse_narrative(request, group, &raw));
        match result {
            Ok(ref narrative) => {
                for warning in &narrative.warnings {
                    warn!("{} {}: {}", request.dimension, request.key, warning);
                }
            }
            Err(ref e) => warn!("{} {}: {}", request.dimension, request.key, e),
        }
        result
    }
}
