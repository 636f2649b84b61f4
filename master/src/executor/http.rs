//! Tablet executor backed by tablet-server agents
//!
//! Each tablet server runs an agent that performs tablet operations locally.
//!
//! ```text
//! Master → POST /tablet/... → Agent
//!    ↓                          ↓
//! poll /operation/status/{job_id} until Completed | Failed
//! ```
//!
//! Transport failures, 5xx responses and agent errors flagged as retryable
//! surface as `Unavailable` so the retry policy can take over; everything else
//! is a permanent rejection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{SnapshotPresence, TabletExecutor, TabletRef};
use crate::clock::to_micros;
use crate::config::{Config, ServerConfig};
use crate::constants::http::MAX_POLL_FAILURES;
use crate::errors::{MasterError, Result, TabletError};
use crate::restoration::BaseSnapshotRef;
use crate::snapshot::TargetObject;

pub struct HttpTabletExecutor {
    config: Arc<Config>,
    client: Client,
}

impl HttpTabletExecutor {
    pub fn new(config: Arc<Config>) -> Self {
        // Per-request timeouts come from each server's config
        let client = Client::new();
        Self { config, client }
    }

    fn server_for<'a>(&'a self, tablet: &'a TabletRef) -> Result<(&'a str, &'a ServerConfig)> {
        let server_name = tablet.server.as_deref().ok_or_else(|| TabletError::Rejected {
            tablet_id: tablet.tablet_id.clone(),
            reason: "tablet has no known server".to_string(),
        })?;
        let server = self
            .config
            .servers
            .get(server_name)
            .ok_or_else(|| TabletError::Rejected {
                tablet_id: tablet.tablet_id.clone(),
                reason: format!("server {} not configured", server_name),
            })?;
        Ok((server_name, server))
    }

    /// POST an operation to the agent hosting `tablet`, following the job if one is started
    async fn execute_operation(&self, tablet: &TabletRef, endpoint: &str, payload: Value) -> Result<Value> {
        let (server_name, server) = self.server_for(tablet)?;
        let agent_url = format!("http://{}:{}{}", server.host, server.agent_port, endpoint);
        let unavailable = |reason: String| -> MasterError {
            TabletError::Unavailable {
                tablet_id: tablet.tablet_id.clone(),
                reason,
            }
            .into()
        };

        debug!("Sending {} for tablet {} to {}", endpoint, tablet.tablet_id, server_name);

        let response = self
            .client
            .post(&agent_url)
            .header("Authorization", format!("Bearer {}", server.api_key))
            .timeout(Duration::from_secs(server.request_timeout_seconds))
            .json(&payload)
            .send()
            .await
            .map_err(|e| unavailable(format!("HTTP request to {} failed: {}", server_name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let reason = format!("{} returned {}: {}", server_name, status, error_text);
            return Err(if is_transient_status(status) {
                unavailable(reason)
            } else {
                TabletError::Rejected {
                    tablet_id: tablet.tablet_id.clone(),
                    reason,
                }
                .into()
            });
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| unavailable(format!("Failed to parse response from {}: {}", server_name, e)))?;

        check_success(tablet, &result)?;

        if let Some(job_id) = result.get("job_id").and_then(|v| v.as_str()) {
            info!(
                "{} started job {} for tablet {} on {}",
                endpoint, job_id, tablet.tablet_id, server_name
            );
            return self.poll_for_completion(tablet, server_name, server, job_id).await;
        }

        Ok(result)
    }

    async fn poll_for_completion(
        &self,
        tablet: &TabletRef,
        server_name: &str,
        server: &ServerConfig,
        job_id: &str,
    ) -> Result<Value> {
        let status_url = format!(
            "http://{}:{}/operation/status/{}",
            server.host, server.agent_port, job_id
        );
        let poll_interval = Duration::from_millis(server.poll_interval_ms);
        let mut consecutive_failures = 0;

        loop {
            sleep(poll_interval).await;

            let poll_response = self
                .client
                .get(&status_url)
                .header("Authorization", format!("Bearer {}", server.api_key))
                .timeout(Duration::from_secs(server.request_timeout_seconds))
                .send()
                .await;

            let failure = match poll_response {
                Ok(response) if response.status().is_success() => match response.json::<Value>().await {
                    Ok(status_result) => {
                        check_success(tablet, &status_result)?;
                        match status_result.get("job_status").and_then(|v| v.as_str()) {
                            Some("Completed") => {
                                debug!("Job {} completed on {}", job_id, server_name);
                                return Ok(status_result.get("result").cloned().unwrap_or(Value::Null));
                            }
                            Some("Failed") => {
                                let reason = format!(
                                    "job {} failed on {}: {}",
                                    job_id,
                                    server_name,
                                    error_message(&status_result, "job failed")
                                );
                                let tablet_id = tablet.tablet_id.clone();
                                return Err(if is_retryable(&status_result) {
                                    TabletError::Unavailable { tablet_id, reason }.into()
                                } else {
                                    TabletError::Rejected { tablet_id, reason }.into()
                                });
                            }
                            Some(other) => {
                                if other != "Running" {
                                    warn!("Unknown job status '{}' for job {}, treating as running", other, job_id);
                                }
                                consecutive_failures = 0;
                                continue;
                            }
                            None => format!("no job_status in response: {}", status_result),
                        }
                    }
                    Err(e) => format!("failed to parse status response: {}", e),
                },
                Ok(response) => format!("status check returned {}", response.status()),
                Err(e) => format!("network error: {}", e),
            };

            consecutive_failures += 1;
            warn!(
                "Polling job {} on {} failed: {} (attempt {}/{})",
                job_id, server_name, failure, consecutive_failures, MAX_POLL_FAILURES
            );
            if consecutive_failures >= MAX_POLL_FAILURES {
                return Err(TabletError::Unavailable {
                    tablet_id: tablet.tablet_id.clone(),
                    reason: format!(
                        "too many consecutive failures polling job {} on {}: {}",
                        job_id, server_name, failure
                    ),
                }
                .into());
            }
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn error_message(body: &Value, fallback: &str) -> String {
    body.get("error")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
        .to_string()
}

/// Agents may mark an error as permanent with `"retryable": false`
fn is_retryable(body: &Value) -> bool {
    body.get("retryable").and_then(|v| v.as_bool()).unwrap_or(true)
}

fn check_success(tablet: &TabletRef, body: &Value) -> Result<()> {
    if body.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
        return Ok(());
    }
    let reason = error_message(body, "Unknown error from agent");
    Err(if is_retryable(body) {
        TabletError::Unavailable {
            tablet_id: tablet.tablet_id.clone(),
            reason,
        }
        .into()
    } else {
        TabletError::Rejected {
            tablet_id: tablet.tablet_id.clone(),
            reason,
        }
        .into()
    })
}

#[async_trait]
impl TabletExecutor for HttpTabletExecutor {
    async fn resolve_tablets(&self, targets: &[TargetObject]) -> Result<Vec<TabletRef>> {
        let mut resolved = Vec::new();

        for target in targets {
            let mut matched = false;
            for (qualified, placements) in &self.config.tables {
                let Some((namespace, table)) = qualified.rsplit_once('.') else {
                    continue;
                };
                if !target.covers(namespace, table) {
                    continue;
                }
                matched = true;
                resolved.extend(placements.iter().map(|p| TabletRef {
                    table: qualified.clone(),
                    tablet_id: p.tablet_id.clone(),
                    server: Some(p.server.clone()),
                }));
            }
            if !matched {
                return Err(TabletError::UnknownTarget {
                    target: target.to_string(),
                }
                .into());
            }
        }

        resolved.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        resolved.dedup();
        Ok(resolved)
    }

    async fn create_snapshot(
        &self,
        tablet: &TabletRef,
        snapshot_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let payload = json!({
            "table": tablet.table,
            "tablet_id": tablet.tablet_id,
            "snapshot_id": snapshot_id,
            "snapshot_time_micros": to_micros(at),
        });
        self.execute_operation(tablet, "/tablet/snapshot/create", payload)
            .await?;
        Ok(())
    }

    async fn restore_to_image(
        &self,
        tablet: &TabletRef,
        base: &BaseSnapshotRef,
        target: DateTime<Utc>,
    ) -> Result<()> {
        let payload = json!({
            "table": tablet.table,
            "tablet_id": tablet.tablet_id,
            "base_snapshot_id": base.snapshot_id,
            "base_snapshot_time_micros": to_micros(base.snapshot_time),
            "target_time_micros": to_micros(target),
        });
        self.execute_operation(tablet, "/tablet/snapshot/restore", payload)
            .await?;
        Ok(())
    }

    async fn snapshot_status(
        &self,
        tablet: &TabletRef,
        snapshot_id: &str,
    ) -> Result<SnapshotPresence> {
        let payload = json!({
            "tablet_id": tablet.tablet_id,
            "snapshot_id": snapshot_id,
        });
        let result = self
            .execute_operation(tablet, "/tablet/snapshot/status", payload)
            .await?;

        match result.get("status").and_then(|v| v.as_str()) {
            Some("complete") => Ok(SnapshotPresence::Complete),
            Some("missing") => Ok(SnapshotPresence::Missing),
            other => Err(TabletError::Unavailable {
                tablet_id: tablet.tablet_id.clone(),
                reason: format!("unexpected snapshot status {:?}", other),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, TabletPlacement};
    use crate::errors::ErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn executor_for(server: &MockServer) -> HttpTabletExecutor {
        let mut config: Config = toml::from_str("host = \"127.0.0.1\"\nport = 8095\n").unwrap();
        config.servers.insert(
            "ts-1".to_string(),
            ServerConfig {
                host: server.address().ip().to_string(),
                agent_port: server.address().port(),
                api_key: "secret".to_string(),
                request_timeout_seconds: 5,
                poll_interval_ms: 10,
            },
        );
        config.tables.insert(
            "ks.test_table".to_string(),
            vec![TabletPlacement {
                server: "ts-1".to_string(),
                tablet_id: "tablet-a".to_string(),
            }],
        );
        HttpTabletExecutor::new(Arc::new(config))
    }

    async fn tablet(executor: &HttpTabletExecutor) -> TabletRef {
        executor
            .resolve_tablets(&[TargetObject::namespace("ks")])
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_create_snapshot_follows_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/create"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_partial_json(json!({"tablet_id": "tablet-a", "snapshot_id": "snap-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "job_id": "job-7"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operation/status/job-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "job_status": "Completed"})))
            .mount(&server)
            .await;

        let executor = executor_for(&server).await;
        let tablet = tablet(&executor).await;
        assert_eq!(tablet.server.as_deref(), Some("ts-1"));

        executor
            .create_snapshot(&tablet, "snap-1", Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/restore"))
            .respond_with(ResponseTemplate::new(503).set_body_string("leader not ready"))
            .mount(&server)
            .await;

        let executor = executor_for(&server).await;
        let tablet = tablet(&executor).await;
        let base = BaseSnapshotRef {
            snapshot_id: "snap-1".to_string(),
            snapshot_time: Utc::now(),
        };

        let err = executor
            .restore_to_image(&tablet, &base, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_permanent_agent_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": false, "retryable": false, "error": "unknown tablet"}),
            ))
            .mount(&server)
            .await;

        let executor = executor_for(&server).await;
        let tablet = tablet(&executor).await;
        let err = executor.snapshot_status(&tablet, "snap-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(err.to_string().contains("unknown tablet"));
    }

    #[tokio::test]
    async fn test_snapshot_status_parses_presence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tablet/snapshot/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "status": "missing"})))
            .mount(&server)
            .await;

        let executor = executor_for(&server).await;
        let tablet = tablet(&executor).await;
        assert_eq!(
            executor.snapshot_status(&tablet, "snap-1").await.unwrap(),
            SnapshotPresence::Missing
        );
    }
}
