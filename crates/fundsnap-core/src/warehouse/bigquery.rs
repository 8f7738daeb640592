//! BigQuery REST aggregator.
//!
//! Runs the configured [`QueryBundle`] through `jobs.query` with the watermark
//! bound as the named `TIMESTAMP` parameter `@watermark`, then follows
//! `jobs.getQueryResults` until the job is complete and every page is read.
//!
//! HTTP lives behind [`JobsTransport`] so the polling and paging logic can be
//! exercised without a network.

use super::decode::{BatchDecoder, JobReference, QueryResponse};
use super::{Aggregator, WarehouseError};
use arrow::record_batch::RecordBatch;
use fundsnap_common::Watermark;
use fundsnap_config::{QueryBundle, WarehouseConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Public REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Upper bound on `getQueryResults` calls made while a job is still running.
const MAX_POLLS: u32 = 360;

/// Transport-level request timeout; longer than any server-side wait.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// The two BigQuery job endpoints the aggregator needs.
pub trait JobsTransport {
    /// `POST /projects/{project}/queries`
    fn post_query(&self, project: &str, body: &Value) -> Result<QueryResponse, WarehouseError>;

    /// `GET /projects/{project}/queries/{jobId}`
    fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        timeout_ms: u32,
        max_results: u32,
    ) -> Result<QueryResponse, WarehouseError>;
}

/// Blocking HTTPS transport with a static bearer token.
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl UreqTransport {
    pub fn new(access_token: &str) -> Self {
        Self::with_base_url(access_token, DEFAULT_BASE_URL)
    }

    /// Point at a different endpoint (emulators, proxies).
    pub fn with_base_url(access_token: &str, base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: format!("Bearer {access_token}"),
        }
    }
}

impl JobsTransport for UreqTransport {
    fn post_query(&self, project: &str, body: &Value) -> Result<QueryResponse, WarehouseError> {
        let url = format!("{}/projects/{}/queries", self.base_url, project);
        let result = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization)
            .send_json(body);
        read_response(result)
    }

    fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        timeout_ms: u32,
        max_results: u32,
    ) -> Result<QueryResponse, WarehouseError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );
        let mut request = self
            .agent
            .get(&url)
            .set("Authorization", &self.authorization)
            .query("timeoutMs", &timeout_ms.to_string())
            .query("maxResults", &max_results.to_string())
            .query("formatOptions.useInt64Timestamp", "true");
        if let Some(location) = &job.location {
            request = request.query("location", location);
        }
        if let Some(token) = page_token {
            request = request.query("pageToken", token);
        }
        read_response(request.call())
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn read_response(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<QueryResponse, WarehouseError> {
    match result {
        Ok(response) => response
            .into_json::<QueryResponse>()
            .map_err(|e| WarehouseError::Decode(format!("invalid query response: {e}"))),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(WarehouseError::Api {
                status,
                message: api_message(&body),
            })
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(WarehouseError::Transport(transport.to_string()))
        }
    }
}

/// Error message from a Google API error payload, or the raw body.
fn api_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.trim().to_string(),
    }
}

/// Aggregator backed by a BigQuery query job.
pub struct BigQueryAggregator<T = UreqTransport> {
    transport: T,
    bundle: QueryBundle,
    project_id: String,
    location: String,
    page_size: u32,
    poll_timeout_ms: u32,
}

impl BigQueryAggregator<UreqTransport> {
    /// Production client; the bearer token comes from `config.token_env`.
    pub fn from_config(
        config: &WarehouseConfig,
        bundle: QueryBundle,
    ) -> Result<Self, fundsnap_config::ConfigError> {
        config.validate_for_client()?;
        let token = config.access_token()?;
        Ok(Self::with_transport(
            UreqTransport::new(&token),
            config,
            bundle,
        ))
    }
}

impl<T: JobsTransport> BigQueryAggregator<T> {
    pub fn with_transport(transport: T, config: &WarehouseConfig, bundle: QueryBundle) -> Self {
        Self {
            transport,
            bundle,
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            page_size: config.page_size,
            poll_timeout_ms: config.poll_timeout_ms,
        }
    }

    /// The bundle this aggregator runs.
    pub fn bundle(&self) -> &QueryBundle {
        &self.bundle
    }

    /// `jobs.query` request body.
    pub fn request_body(&self, watermark: &Watermark) -> Value {
        json!({
            "query": self.bundle.sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [{
                "name": "watermark",
                "parameterType": {"type": "TIMESTAMP"},
                "parameterValue": {"value": watermark.to_query_param()}
            }],
            "location": self.location,
            "maxResults": self.page_size,
            "timeoutMs": self.poll_timeout_ms,
            "formatOptions": {"useInt64Timestamp": true},
            "labels": {"fundsnap_query": label_value(&self.bundle.name)}
        })
    }

    fn wait_for_completion(
        &self,
        mut response: QueryResponse,
    ) -> Result<(QueryResponse, Option<JobReference>), WarehouseError> {
        let job = response.job_reference.clone();
        let mut polls = 0;
        while !response.job_complete {
            let Some(job) = job.as_ref() else {
                return Err(WarehouseError::Decode(
                    "incomplete job response without jobReference".to_string(),
                ));
            };
            if polls >= MAX_POLLS {
                return Err(WarehouseError::Timeout {
                    job_id: job.job_id.clone(),
                    polls,
                });
            }
            polls += 1;
            debug!(job_id = %job.job_id, polls, "query job still running");
            response =
                self.transport
                    .get_query_results(job, None, self.poll_timeout_ms, self.page_size)?;
            check_job_errors(&response)?;
        }
        Ok((response, job))
    }
}

impl<T: JobsTransport> Aggregator for BigQueryAggregator<T> {
    fn fetch(&self, watermark: &Watermark) -> Result<RecordBatch, WarehouseError> {
        info!(
            query = %self.bundle.label(),
            watermark = %watermark.to_query_param(),
            "submitting aggregation query"
        );
        let first = self
            .transport
            .post_query(&self.project_id, &self.request_body(watermark))?;
        check_job_errors(&first)?;

        let (mut page, job) = self.wait_for_completion(first)?;
        let schema = page.schema.take().ok_or_else(|| {
            WarehouseError::Decode("completed job response has no schema".to_string())
        })?;
        let expected = page.total_rows.as_deref().and_then(|n| n.parse::<usize>().ok());

        let mut decoder = BatchDecoder::new(&schema);
        decoder.push_rows(&page.rows)?;
        let mut pages = 1;

        while let Some(token) = page.page_token.take() {
            let Some(job) = job.as_ref() else {
                return Err(WarehouseError::Decode(
                    "paged response without jobReference".to_string(),
                ));
            };
            page = self.transport.get_query_results(
                job,
                Some(&token),
                self.poll_timeout_ms,
                self.page_size,
            )?;
            check_job_errors(&page)?;
            decoder.push_rows(&page.rows)?;
            pages += 1;
        }

        if let Some(expected) = expected.filter(|n| *n != decoder.rows()) {
            warn!(
                expected,
                decoded = decoder.rows(),
                "row count differs from totalRows"
            );
        }
        debug!(rows = decoder.rows(), pages, "query results read");
        decoder.finish()
    }

    fn describe(&self) -> String {
        format!("bigquery:{}", self.bundle.label())
    }
}

fn check_job_errors(response: &QueryResponse) -> Result<(), WarehouseError> {
    if response.job_complete && !response.errors.is_empty() {
        let messages: Vec<String> = response.errors.iter().map(|e| e.describe()).collect();
        return Err(WarehouseError::Job(messages.join("; ")));
    }
    Ok(())
}

/// Job labels allow lowercase letters, digits, `_` and `-` only.
fn label_value(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect()
}
