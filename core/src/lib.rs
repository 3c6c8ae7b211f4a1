//! Client core for the HMC Web Services API.
//!
//! # Overview
//! A `Session` logs on to the appliance lazily, issues synchronous requests
//! and renews an expired session token once per request. Every response goes
//! through the classifier, which yields either the decoded JSON body or one
//! typed `Error`. Long-running operations are tracked with a `Job`, which
//! polls the job status URI until the operation completes or a timeout
//! expires.
//!
//! # Design
//! - Network I/O sits behind the `Transport` / `Connector` traits; the
//!   default implementation uses a `ureq` agent.
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`),
//!   so classification is a pure function.
//! - Job polling takes its time source from an injected `Clock`.

pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod session;
pub mod transport;
pub mod types;

pub use classify::classify;
pub use clock::{Clock, SystemClock};
pub use config::SessionConfig;
pub use error::{Error, HttpError, Result, REASON_UNAVAILABLE};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use job::{Job, JobStatus};
pub use session::{Credentials, Secret, Session};
pub use transport::{Connector, Transport, UreqConnector};
pub use types::{ApiVersion, NotificationTopic};
