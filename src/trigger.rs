//! Once-per-session hand-off to the recognition job
//!
//! A session is armed when it is created. The quiescence timeout and a "last photo" signal
//! both funnel into [`CompletionTrigger::fire`], where the `completed` flag flip in the
//! database decides the single winner. Losers return [`FireOutcome::AlreadyCompleted`].

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RecognitionConfig;
use crate::error::{DetectError, Result};
use crate::model::DetectionSession;
use crate::registry::SessionRegistry;
use crate::scheduler::{DeferredTask, Scheduler};

/// Downstream recognition over a session's photo folder
///
/// Invoked at most once per session. A failure is logged and never retried here.
#[async_trait]
pub trait RecognitionJob: Send + Sync {
    async fn run(&self, session: &DetectionSession) -> std::result::Result<(), String>;
}

/// Job that only records the hand-off in the log
pub struct LoggingRecognitionJob;

#[async_trait]
impl RecognitionJob for LoggingRecognitionJob {
    async fn run(&self, session: &DetectionSession) -> std::result::Result<(), String> {
        info!(
            "Recognition requested for detection {} ({})",
            session.id, session.folder_path
        );
        Ok(())
    }
}

/// Job that launches an external program with the session id and folder appended
///
/// The child is not awaited in the trigger path; its exit status is logged when it ends.
pub struct CommandRecognitionJob {
    program: String,
    args: Vec<String>,
}

impl CommandRecognitionJob {
    pub fn new(command: &[String]) -> std::result::Result<Self, String> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| "recognition command is empty".to_string())?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl RecognitionJob for CommandRecognitionJob {
    async fn run(&self, session: &DetectionSession) -> std::result::Result<(), String> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(session.id.to_string())
            .arg(&session.folder_path)
            .spawn()
            .map_err(|e| format!("Failed to launch '{}': {}", self.program, e))?;

        let session_id = session.id;
        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!("Recognition for detection {} finished", session_id)
                }
                Ok(status) => warn!(
                    "Recognition '{}' for detection {} exited with {}",
                    program, session_id, status
                ),
                Err(e) => error!(
                    "Failed to wait for recognition of detection {}: {}",
                    session_id, e
                ),
            }
        });
        Ok(())
    }
}

/// Pick the job described by the `[recognition]` config section
pub fn job_from_config(
    config: Option<&RecognitionConfig>,
) -> std::result::Result<Arc<dyn RecognitionJob>, String> {
    match config {
        Some(recognition) => Ok(Arc::new(CommandRecognitionJob::new(&recognition.command)?)),
        None => Ok(Arc::new(LoggingRecognitionJob)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireCause {
    Timeout,
    LastPhoto,
}

impl fmt::Display for FireCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FireCause::Timeout => f.write_str("quiescence timeout"),
            FireCause::LastPhoto => f.write_str("last photo signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// This call flipped the session to completed and invoked the job
    Dispatched,
    /// Another path already fired the session; nothing was done
    AlreadyCompleted,
}

pub struct CompletionTrigger {
    registry: Arc<SessionRegistry>,
    scheduler: Arc<dyn Scheduler>,
    job: Arc<dyn RecognitionJob>,
    delay: Duration,
}

impl CompletionTrigger {
    pub fn new(
        registry: Arc<SessionRegistry>,
        scheduler: Arc<dyn Scheduler>,
        job: Arc<dyn RecognitionJob>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            scheduler,
            job,
            delay,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Start the quiescence countdown for a freshly created session
    pub fn arm(self: &Arc<Self>, session_id: i64) {
        let trigger = Arc::clone(self);
        let task: DeferredTask = Box::pin(async move {
            if let Err(e) = trigger.fire(session_id, FireCause::Timeout).await {
                error!("Completion of detection {} on timeout failed: {}", session_id, e);
            }
        });
        self.scheduler.schedule(session_id, self.delay, task);
        debug!(
            "Detection {} armed for recognition in {:?}",
            session_id, self.delay
        );
    }

    /// Early-fire path used when an admitted photo carries the "last" flag
    pub async fn signal_last(self: &Arc<Self>, session_id: i64) -> Result<FireOutcome> {
        self.fire(session_id, FireCause::LastPhoto).await
    }

    /// Try to move the session from armed to fired
    ///
    /// The decision runs on its own task, so a caller that gives up waiting (a dropped
    /// request) cannot interrupt a dispatch that already won.
    pub async fn fire(self: &Arc<Self>, session_id: i64, cause: FireCause) -> Result<FireOutcome> {
        let trigger = Arc::clone(self);
        tokio::spawn(async move { trigger.decide(session_id, cause).await })
            .await
            .map_err(|e| DetectError::Internal(format!("completion task failed: {}", e)))?
    }

    async fn decide(&self, session_id: i64, cause: FireCause) -> Result<FireOutcome> {
        if !self.registry.mark_completed(session_id).await? {
            debug!(
                "Detection {} already completed; {} ignored",
                session_id, cause
            );
            return Ok(FireOutcome::AlreadyCompleted);
        }

        // Cleanup only: the flag above is what prevents a second dispatch
        if self.scheduler.cancel(session_id) {
            debug!("Pending timeout for detection {} cancelled", session_id);
        }

        let session = match self.registry.find(session_id).await? {
            Some(session) => session,
            None => return Err(DetectError::SessionNotFound(session_id)),
        };

        info!(
            "Detection {} completed by {}; starting recognition",
            session_id, cause
        );
        if let Err(e) = self.job.run(&session).await {
            error!("Recognition job for detection {} failed: {}", session_id, e);
        }

        Ok(FireOutcome::Dispatched)
    }
}
