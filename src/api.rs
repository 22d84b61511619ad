//! HTTP client for the test-automation service.

use crate::model::{Feature, Report, RunPlan, SessionConfig, Suite};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Body of `POST /api/gherkin/run-autonomous`.
#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    feature_id: &'a str,
    project_id: &'a str,
    headless: bool,
    scenario_filter: &'a [String],
}

/// The server's answer to a launch request: either an accepted run with
/// a report id to poll, or the report of a run that finished on the
/// spot.
#[derive(Debug)]
pub enum LaunchOutcome {
    Accepted { report_id: String },
    Finished(Box<Report>),
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(cfg: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(cfg.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
        })
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(format!("{}/api{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(format!("{}/api{}", self.base_url, path)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List the project's Gherkin features with their scenarios.
    pub async fn fetch_features(&self, project_id: &str) -> Result<Vec<Feature>> {
        let response = self
            .get(&format!("/projects/{project_id}/gherkin-features"))
            .send()
            .await?;
        let body = read_json(response).await?;
        let features = parse_feature_list(&body)?;
        debug!(project = project_id, count = features.len(), "features loaded");
        Ok(features)
    }

    /// List the project's traditional suites. Catalog orientation only.
    pub async fn fetch_suites(&self, project_id: &str) -> Result<Vec<Suite>> {
        let response = self
            .get(&format!("/projects/{project_id}/traditional-suites"))
            .send()
            .await?;
        let body = read_json(response).await?;
        parse_suite_list(&body)
    }

    /// Ask the service to execute the planned scenarios. One attempt,
    /// no retry; the caller decides what a failure means.
    pub async fn launch_run(&self, plan: &RunPlan) -> Result<LaunchOutcome> {
        let request = LaunchRequest {
            feature_id: &plan.feature_id,
            project_id: &plan.project_id,
            headless: plan.headless,
            scenario_filter: &plan.scenario_names,
        };
        debug!(
            feature = %plan.feature_id,
            scenarios = plan.scenario_names.len(),
            "launching run"
        );
        let response = self
            .post("/gherkin/run-autonomous")
            .json(&request)
            .send()
            .await?;
        let body = read_json(response).await?;
        parse_launch_outcome(body)
    }

    /// Fetch a finished run's report. Answers with a non-success status
    /// while the run is still executing.
    pub async fn fetch_report(&self, report_id: &str) -> Result<Report> {
        let response = self.get(&format!("/reports/{report_id}")).send().await?;
        let body = read_json(response).await?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::UnexpectedResponse(format!("report: {e}")))
    }

    /// Request a stop of the active execution. `force` aborts mid
    /// scenario; otherwise the runner winds down after the current one.
    pub async fn stop_execution(&self, force: bool) -> Result<String> {
        let response = self
            .post("/execution/stop")
            .query(&[("force", force)])
            .send()
            .await?;
        let body = read_json(response).await?;
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Stop requested")
            .to_string();
        Ok(message)
    }

    /// Derive the live log endpoint from the HTTP base URL.
    pub fn ws_logs_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidBaseUrl(format!("{}: {e}", self.base_url)))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ApiError::InvalidBaseUrl(format!(
                    "unsupported scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.clone()))?;
        let path = format!("{}/ws/logs", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url.to_string())
    }
}

/// Read the response body as JSON, mapping non-success statuses to
/// `ApiError::Status` with whatever text the server sent.
async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(response.json().await?)
}

/// The catalog endpoints answer either `{"features": [...]}` or a bare
/// array, depending on the service version.
fn parse_feature_list(body: &serde_json::Value) -> Result<Vec<Feature>> {
    let list = body.get("features").unwrap_or(body);
    serde_json::from_value(list.clone())
        .map_err(|e| ApiError::UnexpectedResponse(format!("feature list: {e}")))
}

fn parse_suite_list(body: &serde_json::Value) -> Result<Vec<Suite>> {
    let list = body.get("suites").unwrap_or(body);
    serde_json::from_value(list.clone())
        .map_err(|e| ApiError::UnexpectedResponse(format!("suite list: {e}")))
}

fn parse_launch_outcome(body: serde_json::Value) -> Result<LaunchOutcome> {
    let finished = body
        .get("status")
        .and_then(|v| v.as_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("completed"));
    if finished {
        let report: Report = serde_json::from_value(body)
            .map_err(|e| ApiError::UnexpectedResponse(format!("inline report: {e}")))?;
        return Ok(LaunchOutcome::Finished(Box::new(report)));
    }
    match body.get("report_id").and_then(|v| v.as_str()) {
        Some(report_id) => Ok(LaunchOutcome::Accepted {
            report_id: report_id.to_string(),
        }),
        None => Err(ApiError::UnexpectedResponse(
            "launch response carries neither report_id nor a completed report".to_string(),
        )),
    }
}
