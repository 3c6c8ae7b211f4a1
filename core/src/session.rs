//! Authenticated session against the appliance's Web Services API.
//!
//! # Design
//! Creating a `Session` performs no I/O; logon happens on first use. The
//! session id, the header set that carries it and the transport handle used
//! with it live together in one `AuthContext`, held as
//! `Mutex<Option<AuthContext>>`. They are therefore installed and cleared in a
//! single step, and a session is logged on exactly when the option is `Some`.
//!
//! Logon and logoff run their request while holding the lock. The verbs only
//! take a snapshot of the context under the lock and send outside it, so jobs
//! on different threads can poll through one session concurrently.
//!
//! A stale session token (HTTP 403, reason 5) is handled by discarding the
//! context, logging on again and repeating the request once. A second expiry
//! is reported as `Error::Auth`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::classify::classify;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpRequest};
use crate::job::Job;
use crate::transport::{Connector, Transport, UreqConnector};
use crate::types::{
    ApiVersion, LogonRequest, LogonResponse, NotificationTopic, NotificationTopics,
};

pub const SESSIONS_URI: &str = "/api/sessions";
pub const THIS_SESSION_URI: &str = "/api/sessions/this-session";
pub const NOTIFICATION_TOPICS_URI: &str = "/api/sessions/operations/get-notification-topics";
pub const VERSION_URI: &str = "/api/version";

/// Request header carrying the session token.
pub const SESSION_HEADER: &str = "X-API-Session";

const BASE_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/json"),
    ("Accept", "application/json"),
];

/// A string that is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// How a session authenticates.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Log on with a user id and password.
    Password { userid: String, password: Secret },
    /// Use a session token issued elsewhere. It cannot be renewed.
    Token(Secret),
}

impl Credentials {
    pub fn password(userid: &str, password: &str) -> Self {
        Credentials::Password {
            userid: userid.to_string(),
            password: Secret::new(password),
        }
    }

    pub fn token(token: &str) -> Self {
        Credentials::Token(Secret::new(token))
    }
}

struct AuthContext {
    session_id: String,
    headers: Vec<(String, String)>,
    transport: Arc<dyn Transport>,
}

impl AuthContext {
    fn new(session_id: String, transport: Arc<dyn Transport>) -> Self {
        let mut headers = base_headers();
        headers.push((SESSION_HEADER.to_string(), session_id.clone()));
        Self {
            session_id,
            headers,
            transport,
        }
    }
}

/// What a single request is sent with.
struct Snapshot {
    session_id: Option<String>,
    headers: Vec<(String, String)>,
    transport: Arc<dyn Transport>,
}

/// A session with one appliance.
pub struct Session {
    host: String,
    credentials: Credentials,
    base_url: String,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    auth: Mutex<Option<AuthContext>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("userid", &self.userid())
            .field("base_url", &self.base_url)
            .field("logged_on", &self.is_logon())
            .finish()
    }
}

impl Session {
    /// Session for `host` with password credentials and default settings.
    pub fn new(host: &str, userid: &str, password: &str) -> Self {
        Self::with_config(
            host,
            Credentials::password(userid, password),
            SessionConfig::default(),
        )
    }

    pub fn with_config(host: &str, credentials: Credentials, config: SessionConfig) -> Self {
        let connector = Arc::new(UreqConnector::new(&config));
        Self::with_connector(host, credentials, config, connector)
    }

    pub fn with_connector(
        host: &str,
        credentials: Credentials,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            host: host.to_string(),
            credentials,
            base_url: config.base_url(host),
            config,
            connector,
            auth: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn userid(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Password { userid, .. } => Some(userid.as_str()),
            Credentials::Token(_) => None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_auth().as_ref().map(|ctx| ctx.session_id.clone())
    }

    pub fn is_logon(&self) -> bool {
        self.lock_auth().is_some()
    }

    /// The headers the next request would be sent with.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self.lock_auth().as_ref() {
            Some(ctx) => ctx.headers.clone(),
            None => base_headers(),
        }
    }

    /// Log on unless already logged on.
    #[tracing::instrument(skip(self), fields(host = %self.host))]
    pub fn logon(&self) -> Result<()> {
        let mut auth = self.lock_auth();
        if auth.is_some() {
            return Ok(());
        }

        let transport = self.connector.connect(&self.base_url);
        let session_id = match &self.credentials {
            Credentials::Token(token) => token.expose().to_string(),
            Credentials::Password { userid, password } => {
                let body = serde_json::to_vec(&LogonRequest {
                    userid: userid.as_str(),
                    password: password.expose(),
                })
                .map_err(|err| Error::Serialization(err.to_string()))?;
                let request = HttpRequest {
                    method: HttpMethod::Post,
                    uri: SESSIONS_URI.to_string(),
                    headers: base_headers(),
                    body: Some(body),
                };
                let value = classify(&request, &transport.execute(&request)?)?;
                logon_session_id(value)?
            }
        };

        *auth = Some(AuthContext::new(session_id, transport));
        info!("logged on");
        Ok(())
    }

    /// Log off if logged on. The local session state is gone afterwards even
    /// when the request fails; 403/404 and connection failures count as
    /// already logged off.
    #[tracing::instrument(skip(self), fields(host = %self.host))]
    pub fn logoff(&self) -> Result<()> {
        let mut auth = self.lock_auth();
        let Some(context) = auth.take() else {
            return Ok(());
        };

        let request = HttpRequest {
            method: HttpMethod::Delete,
            uri: THIS_SESSION_URI.to_string(),
            headers: context.headers.clone(),
            body: None,
        };
        let result = context
            .transport
            .execute(&request)
            .and_then(|response| classify(&request, &response));

        match result {
            Ok(_) => {
                info!("logged off");
                Ok(())
            }
            Err(Error::Http(err)) if matches!(err.http_status, 403 | 404) => {
                warn!(%err, "session was already gone on the appliance");
                Ok(())
            }
            Err(err @ Error::Connection { .. }) => {
                warn!(%err, "logoff request failed, session discarded locally");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn get(&self, uri: &str, logon_required: bool) -> Result<Option<Value>> {
        self.request(HttpMethod::Get, uri, None, logon_required)
    }

    pub fn post(&self, uri: &str, body: Option<&Value>, logon_required: bool) -> Result<Option<Value>> {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| Error::Serialization(err.to_string()))?;
        self.request(HttpMethod::Post, uri, body, logon_required)
    }

    pub fn delete(&self, uri: &str, logon_required: bool) -> Result<Option<Value>> {
        self.request(HttpMethod::Delete, uri, None, logon_required)
    }

    /// Post to `uri`; if the appliance answers with a `job-uri`, wait for that
    /// job and return its result instead.
    pub fn post_and_wait(
        &self,
        uri: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let result = self.post(uri, body, true)?;
        let job_uri = result
            .as_ref()
            .and_then(|value| value.get("job-uri"))
            .and_then(Value::as_str);
        match job_uri {
            Some(job_uri) => Job::new(self, job_uri)
                .for_operation(HttpMethod::Post, uri)
                .wait_for_completion(timeout),
            None => Ok(result),
        }
    }

    pub fn get_notification_topics(&self) -> Result<Vec<NotificationTopic>> {
        let value = self.get(NOTIFICATION_TOPICS_URI, true)?;
        let topics: NotificationTopics = decode_body(NOTIFICATION_TOPICS_URI, value)?;
        Ok(topics.topics)
    }

    /// Query the API version. Needs no logon.
    pub fn query_api_version(&self) -> Result<ApiVersion> {
        let value = self.get(VERSION_URI, false)?;
        decode_body(VERSION_URI, value)
    }

    #[tracing::instrument(skip(self, body), fields(host = %self.host))]
    fn request(
        &self,
        method: HttpMethod,
        uri: &str,
        body: Option<Vec<u8>>,
        logon_required: bool,
    ) -> Result<Option<Value>> {
        if logon_required {
            self.logon()?;
        }

        let snapshot = self.snapshot();
        match self.send(&snapshot, method, uri, body.clone()) {
            Err(Error::Http(err)) if err.is_session_expired() => {
                let Some(stale_id) = snapshot.session_id else {
                    return Err(Error::Http(err));
                };
                if matches!(self.credentials, Credentials::Token(_)) {
                    self.discard(&stale_id);
                    return Err(Error::Auth {
                        message: format!("session token expired and cannot be renewed: {err}"),
                    });
                }

                warn!("session expired, logging on again");
                self.discard(&stale_id);
                self.logon()?;
                match self.send(&self.snapshot(), method, uri, body) {
                    Err(Error::Http(err)) if err.is_session_expired() => Err(Error::Auth {
                        message: format!("session expired again right after logon: {err}"),
                    }),
                    other => other,
                }
            }
            other => other,
        }
    }

    fn send(
        &self,
        snapshot: &Snapshot,
        method: HttpMethod,
        uri: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Option<Value>> {
        let request = HttpRequest {
            method,
            uri: uri.to_string(),
            headers: snapshot.headers.clone(),
            body,
        };
        let response = snapshot.transport.execute(&request)?;
        classify(&request, &response)
    }

    fn snapshot(&self) -> Snapshot {
        if let Some(ctx) = self.lock_auth().as_ref() {
            return Snapshot {
                session_id: Some(ctx.session_id.clone()),
                headers: ctx.headers.clone(),
                transport: Arc::clone(&ctx.transport),
            };
        }
        Snapshot {
            session_id: None,
            headers: base_headers(),
            transport: self.connector.connect(&self.base_url),
        }
    }

    /// Drop the auth context if it still belongs to `stale_id`; another thread
    /// may already have replaced it.
    fn discard(&self, stale_id: &str) {
        let mut auth = self.lock_auth();
        if auth.as_ref().is_some_and(|ctx| ctx.session_id == stale_id) {
            *auth = None;
        }
    }

    fn lock_auth(&self) -> MutexGuard<'_, Option<AuthContext>> {
        self.auth.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn base_headers() -> Vec<(String, String)> {
    BASE_HEADERS
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn logon_session_id(value: Option<Value>) -> Result<String> {
    let value = value.ok_or_else(|| Error::Auth {
        message: "logon response has no body".to_string(),
    })?;
    serde_json::from_value::<LogonResponse>(value)
        .map(|response| response.api_session)
        .map_err(|err| Error::Auth {
            message: format!("logon response has no usable api-session: {err}"),
        })
}

/// Deserialize a response body that `uri` must return.
pub(crate) fn decode_body<T: DeserializeOwned>(uri: &str, value: Option<Value>) -> Result<T> {
    let value = value.ok_or_else(|| Error::parse(format!("empty response body from {uri}")))?;
    serde_json::from_value(value)
        .map_err(|err| Error::parse(format!("unexpected response body from {uri}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_not_logged_on() {
        let session = Session::new("fake-host", "fake-user", "fake-pw");
        assert_eq!(session.host(), "fake-host");
        assert_eq!(session.userid(), Some("fake-user"));
        assert_eq!(session.base_url(), "https://fake-host:6794");
        assert!(session.session_id().is_none());
        assert!(!session.is_logon());

        let headers = session.headers();
        assert_eq!(headers.len(), 2);
        assert!(headers.iter().any(|(k, _)| k == "Content-Type"));
        assert!(headers.iter().any(|(k, _)| k == "Accept"));
        assert!(!headers.iter().any(|(k, _)| k == SESSION_HEADER));
    }

    #[test]
    fn debug_output_hides_password() {
        let credentials = Credentials::password("fake-user", "fake-pw");
        let text = format!("{credentials:?}");
        assert!(!text.contains("fake-pw"));

        let session = Session::new("fake-host", "fake-user", "fake-pw");
        assert!(!format!("{session:?}").contains("fake-pw"));
    }

    #[test]
    fn logon_response_without_session_id_is_auth_error() {
        let err = logon_session_id(Some(serde_json::json!({"foo": "bar"}))).unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
        let err = logon_session_id(None).unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
    }

    #[test]
    fn decode_body_reports_uri() {
        let err = decode_body::<ApiVersion>(VERSION_URI, None).unwrap_err();
        assert!(err.to_string().contains(VERSION_URI));
    }
}
