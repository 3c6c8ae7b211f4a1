use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_HEADER: &str = "x-api-session";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Reason code the real console sends for an unknown or expired session.
pub const REASON_SESSION_INVALID: u32 = 5;
pub const REASON_NO_SESSION: u32 = 4;

#[derive(Deserialize)]
pub struct LogonInput {
    pub userid: String,
    pub password: String,
}

/// Script for a job started through `POST /api/mock/jobs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobScript {
    /// Number of status polls answered with `running` before completion.
    #[serde(default)]
    pub running_polls: u32,
    #[serde(default = "default_job_status_code")]
    pub job_status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_reason_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_results: Option<Value>,
    /// Set once a status poll has returned the `complete` record.
    #[serde(skip)]
    pub reported_complete: bool,
}

fn default_job_status_code() -> u16 {
    200
}

struct HmcState {
    userid: String,
    password: String,
    sessions: HashSet<String>,
    jobs: HashMap<String, JobScript>,
}

type Hmc = Arc<RwLock<HmcState>>;

/// Router of a console that accepts `userid` / `password`.
pub fn app(userid: &str, password: &str) -> Router {
    let hmc: Hmc = Arc::new(RwLock::new(HmcState {
        userid: userid.to_string(),
        password: password.to_string(),
        sessions: HashSet::new(),
        jobs: HashMap::new(),
    }));
    Router::new()
        .route("/api/version", get(api_version))
        .route("/api/sessions", post(logon))
        .route("/api/sessions/this-session", delete(logoff))
        .route(
            "/api/sessions/operations/get-notification-topics",
            get(notification_topics),
        )
        .route("/api/mock/jobs", post(start_job))
        .route("/api/jobs/{id}", get(job_status).delete(delete_job))
        .route("/api/mock/expire-sessions", post(expire_sessions))
        .route("/api/console-error", get(console_error))
        .with_state(hmc)
}

pub async fn run(listener: TcpListener, userid: &str, password: &str) -> Result<(), std::io::Error> {
    axum::serve(listener, app(userid, password)).await
}

fn api_error(status: StatusCode, reason: u32, message: &str) -> Response {
    (
        status,
        Json(json!({
            "http-status": status.as_u16(),
            "reason": reason,
            "message": message,
        })),
    )
        .into_response()
}

fn request_id() -> [(&'static str, String); 1] {
    [(REQUEST_ID_HEADER, Uuid::new_v4().to_string())]
}

/// Resolve the session token of a request, or the 403 the console sends.
async fn authorize(hmc: &Hmc, headers: &HeaderMap) -> Result<String, Response> {
    let Some(token) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            REASON_NO_SESSION,
            "The request does not carry an API session token",
        ));
    };
    if !hmc.read().await.sessions.contains(token) {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            REASON_SESSION_INVALID,
            "The API session token is not valid",
        ));
    }
    Ok(token.to_string())
}

async fn api_version() -> Json<Value> {
    Json(json!({
        "api-major-version": 4,
        "api-minor-version": 10,
        "hmc-version": "2.16.0",
        "hmc-name": "MOCKHMC",
    }))
}

async fn logon(State(hmc): State<Hmc>, Json(input): Json<LogonInput>) -> Response {
    let mut state = hmc.write().await;
    if input.userid != state.userid || input.password != state.password {
        return api_error(StatusCode::FORBIDDEN, 0, "Logon failed: invalid userid or password");
    }
    let session_id = Uuid::new_v4().to_string();
    state.sessions.insert(session_id.clone());
    info!(userid = %input.userid, "session created");
    (request_id(), Json(json!({ "api-session": session_id }))).into_response()
}

async fn logoff(State(hmc): State<Hmc>, headers: HeaderMap) -> Response {
    let token = match authorize(&hmc, &headers).await {
        Ok(token) => token,
        Err(response) => return response,
    };
    hmc.write().await.sessions.remove(&token);
    info!("session deleted");
    (StatusCode::NO_CONTENT, request_id()).into_response()
}

async fn notification_topics(State(hmc): State<Hmc>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&hmc, &headers).await {
        return response;
    }
    let userid = hmc.read().await.userid.clone();
    Json(json!({
        "topics": [
            { "topic-name": format!("{userid}.1"), "topic-type": "object-notification" },
            { "topic-name": format!("{userid}.1job"), "topic-type": "job-notification" },
            { "topic-name": format!("{userid}.1aud"), "topic-type": "audit-notification" },
            { "topic-name": format!("{userid}.1sec"), "topic-type": "security-notification" },
        ]
    }))
    .into_response()
}

async fn start_job(
    State(hmc): State<Hmc>,
    headers: HeaderMap,
    Json(script): Json<JobScript>,
) -> Response {
    if let Err(response) = authorize(&hmc, &headers).await {
        return response;
    }
    let id = Uuid::new_v4().to_string();
    hmc.write().await.jobs.insert(id.clone(), script);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "job-uri": format!("/api/jobs/{id}") })),
    )
        .into_response()
}

async fn job_status(State(hmc): State<Hmc>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&hmc, &headers).await {
        return response;
    }
    let mut state = hmc.write().await;
    let Some(job) = state.jobs.get_mut(&id) else {
        return api_error(StatusCode::NOT_FOUND, 1, "The job does not exist");
    };
    if job.running_polls > 0 {
        job.running_polls -= 1;
        debug!(%id, remaining = job.running_polls, "job still running");
        return Json(json!({ "status": "running" })).into_response();
    }

    job.reported_complete = true;
    let mut record = json!({
        "status": "complete",
        "job-status-code": job.job_status_code,
    });
    if let Some(reason) = job.job_reason_code {
        record["job-reason-code"] = json!(reason);
    }
    if let Some(results) = &job.job_results {
        record["job-results"] = results.clone();
    }
    Json(record).into_response()
}

async fn delete_job(State(hmc): State<Hmc>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&hmc, &headers).await {
        return response;
    }
    let mut state = hmc.write().await;
    let complete = match state.jobs.get(&id) {
        Some(job) => job.reported_complete,
        None => return api_error(StatusCode::NOT_FOUND, 1, "The job does not exist"),
    };
    if !complete {
        return api_error(StatusCode::CONFLICT, 40, "The job has not completed");
    }
    state.jobs.remove(&id);
    StatusCode::NO_CONTENT.into_response()
}

async fn expire_sessions(State(hmc): State<Hmc>) -> StatusCode {
    let mut state = hmc.write().await;
    info!(count = state.sessions.len(), "expiring all sessions");
    state.sessions.clear();
    StatusCode::NO_CONTENT
}

/// The page the console's web container serves when the API is disabled.
pub const CONSOLE_ERROR_PAGE: &str = concat!(
    "<!doctype html public \"-//IETF//DTD HTML 2.0//EN\"> <html>",
    "<head><title>Console Internal Error</title>",
    " <link href=\"/skin/HMCskin.css\" rel=\"stylesheet\" type=\"text/css\"/></head>",
    " <body><h1>Console Internal Error</h1><br><hr size=\"1\" noshade>",
    "<h2>Details:</h2><p><br>HTTP status code: 500",
    "<p><br>The server encountered an internal error that prevented it from",
    " fulfilling this request.<p><br>",
    "<pre>javax.servlet.ServletException: Web Services are not enabled.\n",
    "\tat com.ibm.hwmca.fw.api.ApiServlet.execute(ApiServlet.java:135)\n",
    "\t. . .\n",
    "</pre><hr size=\"1\" noshade></body></html>",
);

async fn console_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/html; charset=ISO-8859-1")],
        CONSOLE_ERROR_PAGE,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_script_defaults_to_immediate_success() {
        let script: JobScript = serde_json::from_str("{}").unwrap();
        assert_eq!(script.running_polls, 0);
        assert_eq!(script.job_status_code, 200);
        assert!(script.job_reason_code.is_none());
        assert!(script.job_results.is_none());
        assert!(!script.reported_complete);
    }

    #[test]
    fn job_script_reads_kebab_case() {
        let script: JobScript = serde_json::from_str(
            r#"{"running-polls":2,"job-status-code":500,"job-reason-code":42,"job-results":{"message":"bla"}}"#,
        )
        .unwrap();
        assert_eq!(script.running_polls, 2);
        assert_eq!(script.job_status_code, 500);
        assert_eq!(script.job_reason_code, Some(42));
        assert_eq!(script.job_results.unwrap()["message"], "bla");
    }

    #[test]
    fn logon_input_requires_password() {
        let result: Result<LogonInput, _> = serde_json::from_str(r#"{"userid":"u"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn error_page_keeps_tabs_and_newlines() {
        assert!(CONSOLE_ERROR_PAGE.contains("enabled.\n\tat com.ibm"));
    }
}
