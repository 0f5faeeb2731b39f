//! Background explanation jobs.
//!
//! `submit` persists a pending row and returns immediately. The generator runs
//! on its own task; whatever happens there (error or panic) ends as exactly
//! one terminal row plus an `explanation_ready` event.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::metrics::ServerMetrics;
use crate::models::JobSubject;
use crate::repository::PuzzleRepository;
use crate::sync::{Broadcaster, SyncEvent};

use super::explainer::{Explainer, ExplanationInput};

/// Where the completion event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOrigin {
    /// Everyone in a puzzle session, on both transports.
    Session(String),
    /// A socket topic chosen by an out-of-session (admin) client.
    SocketTopic(String),
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub subject: JobSubject,
    pub input: ExplanationInput,
    pub origin: JobOrigin,
}

pub struct JobRunner {
    repository: Arc<PuzzleRepository>,
    explainer: Arc<dyn Explainer>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<ServerMetrics>,
    tracker: TaskTracker,
}

/// What a finished job needs, detached from the runner.
struct Completion {
    repository: Arc<PuzzleRepository>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<ServerMetrics>,
    request_id: String,
    subject: JobSubject,
    origin: JobOrigin,
}

impl JobRunner {
    pub fn new(
        repository: Arc<PuzzleRepository>,
        explainer: Arc<dyn Explainer>,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            repository,
            explainer,
            broadcaster,
            metrics,
            tracker: TaskTracker::new(),
        }
    }

    /// Record a pending job and start it. Returns the request id.
    pub async fn submit(&self, request: JobRequest) -> Result<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.repository
            .create_job(&request_id, &request.subject)
            .await?;
        self.metrics.job_started();
        info!(request_id = %request_id, origin = ?request.origin, "explanation job queued");

        let completion = Completion {
            repository: self.repository.clone(),
            broadcaster: self.broadcaster.clone(),
            metrics: self.metrics.clone(),
            request_id: request_id.clone(),
            subject: request.subject,
            origin: request.origin,
        };
        let explainer = self.explainer.clone();
        let input = request.input;

        self.tracker.spawn(async move {
            // A separate task so a panicking generator surfaces as a JoinError.
            let generation = tokio::spawn(async move { explainer.explain(&input).await });
            let outcome = match generation.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("explanation task aborted: {e}")),
            };
            completion.finish(outcome).await;
        });

        Ok(request_id)
    }

    /// Jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for running jobs, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.tracker.close();
        if self.tracker.is_empty() {
            return;
        }
        info!(jobs = self.tracker.len(), "Waiting for explanation jobs to finish");
        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                jobs = self.tracker.len(),
                "Gave up waiting for explanation jobs"
            );
        }
    }
}

impl Completion {
    async fn finish(self, outcome: Result<Value>) {
        let event = match outcome {
            Ok(payload) => self.succeed(payload).await,
            Err(e) => self.fail(e).await,
        };

        match &self.origin {
            JobOrigin::Session(session_id) => {
                self.broadcaster.broadcast(session_id, &event, None);
            }
            JobOrigin::SocketTopic(topic) => {
                self.broadcaster.publish_to_socket_topic(topic, &event);
            }
        }
    }

    async fn succeed(&self, payload: Value) -> SyncEvent {
        let id = &self.request_id;
        match self.repository.complete_job_success(id, &payload).await {
            Ok(true) => {}
            Ok(false) => warn!(request_id = %id, "job was already terminal"),
            Err(e) => error!(request_id = %id, "Failed to record job success: {:#}", e),
        }

        if let JobSubject::Clue {
            puzzle_id,
            clue_number,
            direction,
        } = self.subject
        {
            if let Err(e) = self
                .repository
                .upsert_explanation(puzzle_id, clue_number, direction, &payload)
                .await
            {
                error!(request_id = %id, "Failed to cache explanation: {:#}", e);
            }
            match self
                .repository
                .resolve_reports(puzzle_id, clue_number, direction)
                .await
            {
                Ok(0) => {}
                Ok(n) => info!(request_id = %id, resolved = n, "reports resolved"),
                Err(e) => warn!(request_id = %id, "Failed to resolve reports: {:#}", e),
            }
        }

        self.metrics.job_succeeded();
        info!(request_id = %id, "explanation job succeeded");
        SyncEvent::ExplanationReady {
            request_id: id.clone(),
            clue_number: self.subject.clue_number(),
            direction: self.subject.direction(),
            explanation: Some(payload),
            error: None,
            success: true,
        }
    }

    async fn fail(&self, e: anyhow::Error) -> SyncEvent {
        let id = &self.request_id;
        let message = format!("{e:#}");
        warn!(request_id = %id, "explanation job failed: {}", message);

        match self.repository.complete_job_error(id, &message).await {
            Ok(true) => {}
            Ok(false) => warn!(request_id = %id, "job was already terminal"),
            Err(e) => error!(request_id = %id, "Failed to record job failure: {:#}", e),
        }

        self.metrics.job_failed();
        SyncEvent::ExplanationReady {
            request_id: id.clone(),
            clue_number: self.subject.clue_number(),
            direction: self.subject.direction(),
            explanation: None,
            error: Some(message),
            success: false,
        }
    }
}
