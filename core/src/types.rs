//! Wire documents exchanged with the appliance.
//!
//! # Design
//! Field names follow the appliance's kebab-case JSON. Optional members are
//! `Option` with `#[serde(default)]` so that older appliances that omit them
//! still deserialize.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /api/sessions`.
#[derive(Clone, Serialize)]
pub struct LogonRequest<'a> {
    pub userid: &'a str,
    pub password: &'a str,
}

/// Response body of a successful logon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogonResponse {
    pub api_session: String,
}

/// One entry of the Get Notification Topics response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationTopic {
    pub topic_name: String,
    pub topic_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationTopics {
    pub topics: Vec<NotificationTopic>,
}

/// Response body of `GET /api/version`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ApiVersion {
    pub api_major_version: u32,
    pub api_minor_version: u32,
    #[serde(default)]
    pub hmc_version: Option<String>,
    #[serde(default)]
    pub hmc_name: Option<String>,
}

/// The `status` member of a job status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Running,
    Complete,
}

/// Response body of `GET <job-uri>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobStatusRecord {
    pub status: JobState,
    #[serde(default)]
    pub job_status_code: Option<u16>,
    #[serde(default)]
    pub job_reason_code: Option<u32>,
    #[serde(default)]
    pub job_results: Option<Value>,
}

/// Structured error document returned with non-success statuses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorBody {
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub reason: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logon_request_uses_plain_field_names() {
        let body = serde_json::to_value(LogonRequest {
            userid: "fake-user",
            password: "fake-pw",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"userid": "fake-user", "password": "fake-pw"}));
    }

    #[test]
    fn job_record_optional_members_default() {
        let record: JobStatusRecord = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert_eq!(record.status, JobState::Running);
        assert!(record.job_status_code.is_none());
        assert!(record.job_results.is_none());
    }

    #[test]
    fn job_record_rejects_unknown_status() {
        let result: Result<JobStatusRecord, _> = serde_json::from_str(r#"{"status":"cancelled"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn notification_topic_reads_kebab_case() {
        let topic: NotificationTopic = serde_json::from_str(
            r#"{"topic-name":"ensadmin.145job","topic-type":"job-notification"}"#,
        )
        .unwrap();
        assert_eq!(topic.topic_name, "ensadmin.145job");
        assert_eq!(topic.topic_type, "job-notification");
        assert!(topic.object_uri.is_none());
    }
}
