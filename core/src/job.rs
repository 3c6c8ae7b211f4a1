//! Asynchronous operations ("jobs") and their status polling.
//!
//! # Design
//! A job is observed only by polling its status URI. `check_for_completion`
//! is a single GET; `wait_for_completion` repeats it with a fixed delay. The
//! timeout is checked after a poll that found the job still running and
//! before sleeping, never during a poll, so a poll that reports completion is
//! always honoured even if it ended past the deadline.
//!
//! A job that completed with a failing status code is reported as the same
//! `HttpError` shape a failing request produces, attributed to the operation
//! that started the job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, HttpError, Result, REASON_UNAVAILABLE};
use crate::http::HttpMethod;
use crate::session::{decode_body, Session};
use crate::types::{JobState, JobStatusRecord};

/// Observed state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    /// Completed with a successful status code. Failed completions are
    /// returned as `Error::Http` instead.
    CompleteSuccess,
}

enum Outcome {
    Running,
    Succeeded(Option<Value>),
    Failed(HttpError),
}

/// Handle to one asynchronous operation, polled through a borrowed session.
pub struct Job<'s> {
    session: &'s Session,
    uri: String,
    op_method: HttpMethod,
    op_uri: String,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Job<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("uri", &self.uri)
            .field("op_method", &self.op_method)
            .field("op_uri", &self.op_uri)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<'s> Job<'s> {
    pub fn new(session: &'s Session, uri: &str) -> Self {
        Self {
            session,
            uri: uri.to_string(),
            op_method: HttpMethod::Get,
            op_uri: uri.to_string(),
            poll_interval: session.config().job_poll_interval(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Attribute job failures to the request that started the job.
    pub fn for_operation(mut self, method: HttpMethod, uri: &str) -> Self {
        self.op_method = method;
        self.op_uri = uri.to_string();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Poll the job status once.
    ///
    /// Returns `(Running, None)` while the job runs and
    /// `(CompleteSuccess, results)` once it succeeded. A failed job yields
    /// `Error::Http` with the job's status and reason code.
    pub fn check_for_completion(&self) -> Result<(JobStatus, Option<Value>)> {
        match self.poll()? {
            Outcome::Running => Ok((JobStatus::Running, None)),
            Outcome::Succeeded(result) => Ok((JobStatus::CompleteSuccess, result)),
            Outcome::Failed(err) => Err(Error::Http(err)),
        }
    }

    /// Poll until the job completes and return its results.
    ///
    /// `timeout` of `None` or zero waits forever. Once the job completed, its
    /// status record is deleted from the appliance.
    #[tracing::instrument(skip(self), fields(job = %self.uri))]
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> Result<Option<Value>> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let start = self.clock.now();

        loop {
            match self.poll()? {
                Outcome::Running => {}
                Outcome::Succeeded(result) => {
                    self.discard_status();
                    return Ok(result);
                }
                Outcome::Failed(err) => {
                    self.discard_status();
                    return Err(Error::Http(err));
                }
            }

            if let Some(timeout) = timeout {
                let elapsed = self.clock.now().duration_since(start);
                if elapsed > timeout {
                    return Err(Error::Timeout {
                        message: format!(
                            "Waiting for completion of job {} timed out (timeout: {} s)",
                            self.uri,
                            timeout.as_secs_f64()
                        ),
                    });
                }
            }

            self.clock.sleep(self.poll_interval);
        }
    }

    /// Delete the job's status record on the appliance.
    pub fn delete(&self) -> Result<()> {
        self.session.delete(&self.uri, true).map(|_| ())
    }

    fn poll(&self) -> Result<Outcome> {
        let value = self.session.get(&self.uri, true)?;
        let record: JobStatusRecord = decode_body(&self.uri, value)?;
        debug!(job = %self.uri, status = ?record.status, code = ?record.job_status_code, "polled job");

        if record.status == JobState::Running {
            return Ok(Outcome::Running);
        }

        let status_code = record.job_status_code.ok_or_else(|| {
            Error::parse(format!("completed job {} has no job-status-code", self.uri))
        })?;
        match status_code {
            200 | 201 => Ok(Outcome::Succeeded(record.job_results)),
            204 => Ok(Outcome::Succeeded(None)),
            _ => {
                let message = record
                    .job_results
                    .as_ref()
                    .and_then(|results| results.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!("job {} failed with status {status_code}", self.uri)
                    });
                Ok(Outcome::Failed(HttpError {
                    http_status: status_code,
                    reason: record.job_reason_code.unwrap_or(REASON_UNAVAILABLE),
                    message,
                    request_uri: self.op_uri.clone(),
                    request_method: self.op_method,
                }))
            }
        }
    }

    fn discard_status(&self) {
        if let Err(err) = self.delete() {
            warn!(job = %self.uri, %err, "could not delete completed job status");
        }
    }
}
