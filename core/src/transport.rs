//! Network transport behind the session.
//!
//! # Design
//! A `Connector` creates `Transport` handles bound to one base URL. The session
//! keeps a handle only while it is logged on (it is part of the authenticated
//! context) and asks for a one-off handle for unauthenticated calls such as
//! the logon itself. The production connector wraps a `ureq::Agent`, which
//! owns the connection pool; tests swap in a scripted transport.
//!
//! Status codes are never treated as transport errors here: 4xx/5xx responses
//! come back as data so the classifier can decode them.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes one HTTP request.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Creates transports bound to a base URL.
pub trait Connector: Send + Sync {
    fn connect(&self, base_url: &str) -> Arc<dyn Transport>;
}

/// `Connector` producing `ureq`-backed transports.
#[derive(Debug, Clone)]
pub struct UreqConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl UreqConnector {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        }
    }
}

impl Connector for UreqConnector {
    fn connect(&self, base_url: &str) -> Arc<dyn Transport> {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(self.connect_timeout))
            .timeout_recv_response(Some(self.read_timeout))
            .build()
            .new_agent();
        Arc::new(UreqTransport::new(agent, base_url))
    }
}

/// A `ureq::Agent` and the base URL its requests are sent to.
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqTransport {
    pub fn new(agent: ureq::Agent, base_url: &str) -> Self {
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, uri: &str) -> String {
        format!("{}{uri}", self.base_url)
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request.uri);
        debug!(method = %request.method, %url, "sending request");

        let connection_error = |err: ureq::Error| Error::Connection {
            url: url.clone(),
            message: err.to_string(),
        };

        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(&url), &request.headers).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(&url), &request.headers).call(),
            HttpMethod::Post => {
                let builder = with_headers(self.agent.post(&url), &request.headers);
                match &request.body {
                    Some(body) => builder.send(body.as_slice()),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(connection_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(connection_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}
