//! Scripted transport and fake clock shared by the integration tests.
//!
//! # Design
//! `ScriptedServer` answers requests from per-route reply queues. A queue
//! hands out its replies in order and keeps repeating the last one, so a
//! route scripted with a single reply answers the same way forever. Requests
//! to unscripted routes get a JSON 404. Every request is recorded for later
//! inspection.
//!
//! `FakeClock` only moves when the code under test sleeps or when a reply
//! with latency is served, which makes polling deadlines exact.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hmc_core::{
    Clock, Connector, Credentials, Error, HttpMethod, HttpRequest, HttpResponse, Session,
    SessionConfig, Transport,
};
use serde_json::{json, Value};

pub const HOST: &str = "fake-host";
pub const USERID: &str = "fake-user";
pub const PASSWORD: &str = "fake-pw";

pub const SESSIONS_URI: &str = "/api/sessions";
pub const THIS_SESSION_URI: &str = "/api/sessions/this-session";

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeClock {
    start: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    latency: Duration,
    refused: bool,
}

impl Reply {
    pub fn json(status: u16, value: Value) -> Self {
        Self::raw(status, "application/json", value.to_string().as_bytes())
    }

    pub fn raw(status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.to_vec(),
            latency: Duration::ZERO,
            refused: false,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            latency: Duration::ZERO,
            refused: false,
        }
    }

    /// The connection fails instead of answering.
    pub fn refused() -> Self {
        Self {
            refused: true,
            ..Self::empty(0)
        }
    }

    pub fn error(status: u16, reason: u32, message: &str) -> Self {
        Self::json(
            status,
            json!({"http-status": status, "reason": reason, "message": message}),
        )
    }

    pub fn logon(session_id: &str) -> Self {
        Self::json(200, json!({"api-session": session_id}))
    }

    pub fn session_expired() -> Self {
        Self::error(403, 5, "The API session token is not valid")
    }

    pub fn job_running() -> Self {
        Self::json(200, json!({"status": "running"}))
    }

    /// Advance the server's clock by `latency` while this reply is served.
    pub fn after(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

type Route = (&'static str, String);

#[derive(Default)]
struct Inner {
    routes: Mutex<HashMap<Route, VecDeque<Reply>>>,
    requests: Mutex<Vec<HttpRequest>>,
    connects: AtomicUsize,
    clock: Option<Arc<FakeClock>>,
}

/// In-memory appliance; serves as both the `Connector` and its `Transport`.
#[derive(Clone, Default)]
pub struct ScriptedServer {
    inner: Arc<Inner>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<FakeClock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock: Some(clock),
                ..Inner::default()
            }),
        }
    }

    /// Append `replies` to the queue of `method uri`.
    pub fn on(&self, method: HttpMethod, uri: &str, replies: impl IntoIterator<Item = Reply>) -> &Self {
        self.inner
            .routes
            .lock()
            .unwrap()
            .entry((method.as_str(), uri.to_string()))
            .or_default()
            .extend(replies);
        self
    }

    /// Script a logon that hands out `session_ids` in order.
    pub fn accept_logon(&self, session_ids: &[&str]) -> &Self {
        self.on(
            HttpMethod::Post,
            SESSIONS_URI,
            session_ids.iter().map(|id| Reply::logon(id)),
        )
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    /// Recorded requests to `method uri`.
    pub fn requests_to(&self, method: HttpMethod, uri: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|req| req.method == method && req.uri == uri)
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &HttpRequest) -> Reply {
        let mut routes = self.inner.routes.lock().unwrap();
        let key = (request.method.as_str(), request.uri.clone());
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Reply::error(404, 1, &format!("no reply scripted for {} {}", key.0, key.1)),
        }
    }
}

impl Transport for ScriptedServer {
    fn execute(&self, request: &HttpRequest) -> hmc_core::Result<HttpResponse> {
        self.inner.requests.lock().unwrap().push(request.clone());
        let reply = self.next_reply(request);

        if let Some(clock) = &self.inner.clock {
            clock.advance(reply.latency);
        }
        if reply.refused {
            return Err(Error::Connection {
                url: format!("https://{HOST}:6794{}", request.uri),
                message: "connection refused".to_string(),
            });
        }
        Ok(HttpResponse {
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
        })
    }
}

impl Connector for ScriptedServer {
    fn connect(&self, _base_url: &str) -> Arc<dyn Transport> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Arc::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn session(server: &ScriptedServer) -> Session {
    session_with(server, Credentials::password(USERID, PASSWORD))
}

pub fn session_with(server: &ScriptedServer, credentials: Credentials) -> Session {
    Session::with_connector(
        HOST,
        credentials,
        SessionConfig::default(),
        Arc::new(server.clone()),
    )
}

/// Value of `name` in a request's header list.
pub fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn body_json(request: &HttpRequest) -> Value {
    serde_json::from_slice(request.body.as_deref().unwrap()).unwrap()
}
