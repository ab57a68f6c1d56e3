//! Bulk API 2.0 ingest and query jobs.

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

use super::str_field;
use crate::envelope::ApiResult;
use crate::error::{Error, ErrorKind, Result};
use crate::request::RequestMethod;

/// Bulk ingest operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation {
    Insert,
    Update,
    Upsert { external_id_field: String },
    Delete,
}

impl BulkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperation::Insert => "insert",
            BulkOperation::Update => "update",
            BulkOperation::Upsert { .. } => "upsert",
            BulkOperation::Delete => "delete",
        }
    }

    /// Parse an operation name; upsert keys on `Id` unless told otherwise.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "insert" => Some(BulkOperation::Insert),
            "update" => Some(BulkOperation::Update),
            "upsert" => Some(BulkOperation::Upsert {
                external_id_field: "Id".to_string(),
            }),
            "delete" => Some(BulkOperation::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_terminal(state: &str) -> bool {
    matches!(state, "JobComplete" | "Failed" | "Aborted")
}

impl super::SalesforceApi {
    /// Create an ingest job, upload the CSV, close it and wait for the
    /// server to finish processing.
    ///
    /// The body is the final job info (`state`, `numberRecordsProcessed`,
    /// `numberRecordsFailed`, ...).
    #[instrument(skip(self, csv), fields(bytes = csv.len()))]
    pub async fn bulk_ingest(&self, sobject: &str, operation: &BulkOperation, csv: &str) -> ApiResult {
        ApiResult::from_outcome(self.bulk_ingest_inner(sobject, operation, csv).await)
    }

    async fn bulk_ingest_inner(&self, sobject: &str, operation: &BulkOperation, csv: &str) -> Result<Value> {
        let mut job = json!({
            "object": sobject,
            "operation": operation.as_str(),
            "contentType": "CSV",
            "lineEnding": "LF",
        });
        if let BulkOperation::Upsert { external_id_field } = operation {
            job["externalIdFieldName"] = Value::String(external_id_field.clone());
        }

        let created = self
            .send_json(
                self.request(RequestMethod::Post, self.rest_url("jobs/ingest"))
                    .json_value(job),
            )
            .await?;
        let job_id = str_field(&created, "id")?.to_string();
        debug!(job_id, sobject, operation = %operation, "Ingest job created");

        self.send_raw(
            self.request(
                RequestMethod::Put,
                self.rest_url(&format!("jobs/ingest/{job_id}/batches")),
            )
            .text("text/csv", csv.replace("\r\n", "\n")),
        )
        .await?;

        self.close_job_inner(&job_id).await?;
        self.wait_for_job("ingest", &job_id).await
    }

    /// Mark an ingest job `UploadComplete` so the server starts processing.
    #[instrument(skip(self))]
    pub async fn close_bulk_job(&self, job_id: &str) -> ApiResult {
        ApiResult::from_outcome(self.close_job_inner(job_id).await)
    }

    async fn close_job_inner(&self, job_id: &str) -> Result<Value> {
        self.send_json(
            self.request(
                RequestMethod::Patch,
                self.rest_url(&format!("jobs/ingest/{job_id}")),
            )
            .json_value(json!({ "state": "UploadComplete" })),
        )
        .await
    }

    /// Run a bulk query and collect every result page.
    ///
    /// The body is a JSON string with the CSV, header line once.
    #[instrument(skip(self))]
    pub async fn bulk_query(&self, soql: &str) -> ApiResult {
        ApiResult::from_outcome(self.bulk_query_inner(soql).await.map(Value::String))
    }

    async fn bulk_query_inner(&self, soql: &str) -> Result<String> {
        let created = self
            .send_json(
                self.request(RequestMethod::Post, self.rest_url("jobs/query"))
                    .json_value(json!({ "operation": "query", "query": soql })),
            )
            .await?;
        let job_id = str_field(&created, "id")?.to_string();
        self.wait_for_job("query", &job_id).await?;

        let mut csv = String::new();
        let mut locator: Option<String> = None;
        loop {
            let mut request = self
                .request(
                    RequestMethod::Get,
                    self.rest_url(&format!("jobs/query/{job_id}/results")),
                )
                .header("Accept", "text/csv");
            if let Some(ref locator) = locator {
                request = request.query("locator", locator.clone());
            }
            let page = self.send_raw(request).await?;

            if csv.is_empty() {
                csv = page.text;
            } else {
                // Every page repeats the header line.
                if let Some((_, rows)) = page.text.split_once('\n') {
                    csv.push_str(rows);
                }
            }

            match page.locator {
                Some(next) => locator = Some(next),
                None => break,
            }
        }
        Ok(csv)
    }

    async fn wait_for_job(&self, kind: &str, job_id: &str) -> Result<Value> {
        let started = Instant::now();
        loop {
            let job = self
                .send_json(self.request(
                    RequestMethod::Get,
                    self.rest_url(&format!("jobs/{kind}/{job_id}")),
                ))
                .await?;
            let state = str_field(&job, "state")?;

            if is_terminal(state) {
                if state != "JobComplete" {
                    let message = job
                        .get("errorMessage")
                        .and_then(Value::as_str)
                        .unwrap_or(state);
                    return Err(Error::new(ErrorKind::JobFailed(format!(
                        "bulk job {job_id}: {message}"
                    ))));
                }
                return Ok(job);
            }

            if started.elapsed() > self.job_max_wait() {
                return Err(Error::new(ErrorKind::Timeout));
            }
            sleep(self.job_poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientConfig, OrgIdentity, SalesforceApi, Session};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> SalesforceApi {
        let session = Session::new(OrgIdentity::new("dev@example.com"), server.uri(), "tok")
            .with_api_version("62.0");
        let config = ClientConfig::builder()
            .without_retry()
            .with_job_poll_interval(Duration::from_millis(5))
            .build();
        SalesforceApi::new(session, config).unwrap()
    }

    const JOBS: &str = "/services/data/v62.0/jobs";

    #[test]
    fn test_parse_operation() {
        assert_eq!(BulkOperation::parse("Insert"), Some(BulkOperation::Insert));
        assert_eq!(
            BulkOperation::parse("upsert"),
            Some(BulkOperation::Upsert {
                external_id_field: "Id".into()
            })
        );
        assert_eq!(BulkOperation::parse("merge"), None);
    }

    #[tokio::test]
    async fn test_ingest_creates_uploads_closes_and_waits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{JOBS}/ingest")))
            .and(body_partial_json(json!({"object": "Account", "operation": "insert"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "750A", "state": "Open"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{JOBS}/ingest/750A/batches")))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{JOBS}/ingest/750A")))
            .and(body_partial_json(json!({"state": "UploadComplete"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "750A", "state": "UploadComplete"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS}/ingest/750A")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "750A", "state": "JobComplete",
                "numberRecordsProcessed": 2, "numberRecordsFailed": 0
            })))
            .mount(&server)
            .await;

        let result = api(&server)
            .bulk_ingest("Account", &BulkOperation::Insert, "Name\r\nAcme\r\nGlobex\r\n")
            .await;

        assert!(result.is_success(), "{:?}", result.error_message());
        assert_eq!(result.body["numberRecordsProcessed"], 2);
    }

    #[tokio::test]
    async fn test_query_pages_by_locator() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{JOBS}/query")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "750Q", "state": "UploadComplete"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS}/query/750Q")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "750Q", "state": "JobComplete"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS}/query/750Q/results")))
            .and(query_param("locator", "MTAw"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Sforce-Locator", "null")
                    .set_body_string("\"Id\",\"Name\"\n\"2\",\"Globex\"\n"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS}/query/750Q/results")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Sforce-Locator", "MTAw")
                    .set_body_string("\"Id\",\"Name\"\n\"1\",\"Acme\"\n"),
            )
            .mount(&server)
            .await;

        let result = api(&server).bulk_query("SELECT Id, Name FROM Account").await;

        assert_eq!(
            result.body,
            json!("\"Id\",\"Name\"\n\"1\",\"Acme\"\n\"2\",\"Globex\"\n")
        );
    }

    #[tokio::test]
    async fn test_failed_job_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{JOBS}/query")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "750Q"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS}/query/750Q")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "750Q", "state": "Failed", "errorMessage": "INVALID_FIELD: Nope"
            })))
            .mount(&server)
            .await;

        let result = api(&server).bulk_query("SELECT Nope FROM Account").await;

        assert!(result.is_failure());
        assert!(result.error_message().unwrap().contains("INVALID_FIELD"));
    }
}
