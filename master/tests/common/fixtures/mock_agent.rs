//! Mock tablet-server agent for testing
//!
//! Answers the agent endpoints the HTTP executor calls without a real tablet
//! server behind it.

use serde_json::json;
use wiremock::{
    matchers::{header, method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

use super::test_data::TEST_API_KEY;

pub struct MockAgentServer {
    pub server: MockServer,
}

impl MockAgentServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    pub fn host(&self) -> String {
        self.server.address().ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.server.address().port()
    }

    /// Snapshot creation starts `job_id`, which completes on the first poll
    pub async fn mock_snapshot_create_success(&self, job_id: &str) {
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/create"))
            .and(header("Authorization", format!("Bearer {}", TEST_API_KEY).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "job_id": job_id,
            })))
            .mount(&self.server)
            .await;
        self.mock_job_completed(job_id).await;
    }

    /// Restores complete synchronously
    pub async fn mock_snapshot_restore_success(&self) {
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/restore"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
            })))
            .mount(&self.server)
            .await;
    }

    /// Restores fail permanently with `reason`
    pub async fn mock_snapshot_restore_rejected(&self, reason: &str) {
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/restore"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "retryable": false,
                "error": reason,
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_snapshot_status(&self, status: &str) {
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "status": status,
            })))
            .mount(&self.server)
            .await;
    }

    /// Every request answers 503
    pub async fn mock_unavailable(&self) {
        Mock::given(path_regex(r"^/tablet/.*"))
            .respond_with(ResponseTemplate::new(503).set_body_string("tablet server overloaded"))
            .mount(&self.server)
            .await;
    }

    async fn mock_job_completed(&self, job_id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/operation/status/{}", job_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "job_status": "Completed",
                "result": {},
            })))
            .mount(&self.server)
            .await;
    }
}
