//! Tooling API workflows: anonymous Apex, debug logging, test runs and
//! container-based component saves.

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

use super::str_field;
use crate::envelope::ApiResult;
use crate::error::{Error, ErrorKind, Result};
use crate::request::RequestMethod;
use crate::security::soql;

/// Debug level created for trace flags when the org has none of ours yet.
const DEBUG_LEVEL_NAME: &str = "busbar_workbench";

const TEST_RESULT_FIELDS: &str = "Id, Outcome, MethodName, Message, StackTrace, RunTime, \
     ApexClass.Id, ApexClass.Name, AsyncApexJobId";

impl super::SalesforceApi {
    /// Compile and run anonymous Apex.
    ///
    /// The body carries `compiled`, `success`, `line`, `column`,
    /// `compileProblem`, `exceptionMessage` and `exceptionStackTrace`.
    /// Compile or runtime problems are not transport failures.
    #[instrument(skip(self, apex))]
    pub async fn execute_anonymous(&self, apex: &str) -> ApiResult {
        let request = self
            .request(RequestMethod::Get, self.tooling_url("executeAnonymous/"))
            .query("anonymousBody", apex);
        self.send(request).await
    }

    /// Turn on debug logging for a user for the next 24 hours.
    #[instrument(skip(self))]
    pub async fn create_trace_flag(&self, user_id: &str) -> ApiResult {
        ApiResult::from_outcome(self.create_trace_flag_inner(user_id).await)
    }

    async fn create_trace_flag_inner(&self, user_id: &str) -> Result<Value> {
        let debug_level_id = self.ensure_debug_level().await?;

        let start = chrono::Utc::now();
        let expiration = start + chrono::Duration::hours(24);
        let trace_flag = json!({
            "TracedEntityId": user_id,
            "DebugLevelId": debug_level_id,
            "LogType": "USER_DEBUG",
            "StartDate": start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "ExpirationDate": expiration.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        });

        let created = self
            .send_json(
                self.request(RequestMethod::Post, self.tooling_url("sobjects/TraceFlag"))
                    .json_value(trace_flag),
            )
            .await?;
        debug!(user_id, "Trace flag created");

        Ok(json!({
            "id": str_field(&created, "id")?,
            "userId": user_id,
            "expirationDate": expiration.to_rfc3339(),
        }))
    }

    async fn ensure_debug_level(&self) -> Result<String> {
        let existing = self
            .query_all_records(
                &format!(
                    "SELECT Id FROM DebugLevel WHERE DeveloperName = '{}'",
                    soql::escape_string(DEBUG_LEVEL_NAME)
                ),
                true,
            )
            .await?;
        if let Some(id) = existing
            .get("records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|record| record.get("Id"))
            .and_then(Value::as_str)
        {
            return Ok(id.to_string());
        }

        let level = json!({
            "DeveloperName": DEBUG_LEVEL_NAME,
            "MasterLabel": DEBUG_LEVEL_NAME,
            "ApexCode": "DEBUG",
            "ApexProfiling": "INFO",
            "Callout": "INFO",
            "Database": "INFO",
            "System": "DEBUG",
            "Validation": "INFO",
            "Visualforce": "INFO",
            "Workflow": "INFO",
        });
        let created = self
            .send_json(
                self.request(RequestMethod::Post, self.tooling_url("sobjects/DebugLevel"))
                    .json_value(level),
            )
            .await?;
        Ok(str_field(&created, "id")?.to_string())
    }

    /// Run one test class asynchronously and wait for its method results.
    ///
    /// The body is a query result over `ApexTestResult` for the run.
    #[instrument(skip(self))]
    pub async fn run_test(&self, class_id: &str) -> ApiResult {
        ApiResult::from_outcome(self.run_test_inner(class_id).await)
    }

    async fn run_test_inner(&self, class_id: &str) -> Result<Value> {
        let job_id = self.enqueue_tests(class_id).await?;
        self.wait_for_apex_job(&job_id).await?;
        self.query_all_records(
            &format!(
                "SELECT {TEST_RESULT_FIELDS} FROM ApexTestResult WHERE AsyncApexJobId = '{}'",
                soql::escape_string(&job_id)
            ),
            true,
        )
        .await
    }

    async fn enqueue_tests(&self, class_ids: &str) -> Result<String> {
        let response = self
            .send_json(
                self.request(RequestMethod::Post, self.tooling_url("runTestsAsynchronous/"))
                    .json_value(json!({ "classids": class_ids })),
            )
            .await?;
        match response {
            Value::String(job_id) => Ok(job_id),
            other => Err(Error::new(ErrorKind::InvalidResponse(format!(
                "expected a test job id, got {other}"
            )))),
        }
    }

    async fn wait_for_apex_job(&self, job_id: &str) -> Result<()> {
        let started = Instant::now();
        let soql = format!(
            "SELECT Id, Status, ExtendedStatus FROM AsyncApexJob WHERE Id = '{}'",
            soql::escape_string(job_id)
        );

        loop {
            let page = self.query_all_records(&soql, false).await?;
            let status = page
                .get("records")
                .and_then(Value::as_array)
                .and_then(|records| records.first())
                .and_then(|job| job.get("Status"))
                .and_then(Value::as_str)
                .unwrap_or("Queued");

            match status {
                "Completed" => return Ok(()),
                "Failed" | "Aborted" => {
                    return Err(Error::new(ErrorKind::JobFailed(format!(
                        "test job {job_id} ended as {status}"
                    ))))
                }
                _ => {}
            }

            if started.elapsed() > self.job_max_wait() {
                return Err(Error::new(ErrorKind::Timeout));
            }
            sleep(self.job_poll_interval()).await;
        }
    }

    /// Run test classes synchronously by name; the body carries the run
    /// summary including code coverage.
    #[instrument(skip(self))]
    pub async fn run_tests_synchronous(&self, class_names: &[String]) -> ApiResult {
        let tests: Vec<Value> = class_names
            .iter()
            .map(|name| json!({ "className": name }))
            .collect();
        self.send(
            self.request(RequestMethod::Post, self.tooling_url("runTestsSynchronous/"))
                .json_value(json!({ "tests": tests })),
        )
        .await
    }

    /// Enqueue test classes by id; the body is the job id.
    #[instrument(skip(self))]
    pub async fn run_tests_asynchronous(&self, class_ids: &[String]) -> ApiResult {
        ApiResult::from_outcome(
            self.enqueue_tests(&class_ids.join(","))
                .await
                .map(Value::String),
        )
    }

    /// Save a component body through a metadata container.
    ///
    /// The body reports `success`, and on failure `problem`, `lineNumber`
    /// and `columnNumber`; on success `symbolTable` when the compiler
    /// produced one. A compile failure is a successful call.
    #[instrument(skip(self, body))]
    pub async fn save_component(
        &self,
        component_type: &str,
        component_id: &str,
        body: &str,
        check_only: bool,
    ) -> ApiResult {
        ApiResult::from_outcome(
            self.save_component_inner(component_type, component_id, body, check_only)
                .await,
        )
    }

    async fn save_component_inner(
        &self,
        component_type: &str,
        component_id: &str,
        body: &str,
        check_only: bool,
    ) -> Result<Value> {
        let container_name = format!("Save_{}", chrono::Utc::now().timestamp_millis());
        let container = self
            .send_json(
                self.request(RequestMethod::Post, self.tooling_url("sobjects/MetadataContainer"))
                    .json_value(json!({ "Name": container_name })),
            )
            .await?;
        let container_id = str_field(&container, "id")?.to_string();

        let outcome = self
            .save_in_container(&container_id, component_type, component_id, body, check_only)
            .await;

        // Containers are per-save; a leftover one blocks the next save of the same member.
        let cleanup = self
            .send_raw(self.request(
                RequestMethod::Delete,
                self.tooling_url(&format!("sobjects/MetadataContainer/{container_id}")),
            ))
            .await;
        if let Err(err) = cleanup {
            debug!(container_id, error = %err, "Metadata container cleanup failed");
        }

        outcome
    }

    async fn save_in_container(
        &self,
        container_id: &str,
        component_type: &str,
        component_id: &str,
        body: &str,
        check_only: bool,
    ) -> Result<Value> {
        let member_type = format!("{component_type}Member");
        let member = self
            .send_json(
                self.request(
                    RequestMethod::Post,
                    self.tooling_url(&format!("sobjects/{member_type}")),
                )
                .json_value(json!({
                    "MetadataContainerId": container_id,
                    "ContentEntityId": component_id,
                    "Body": body,
                })),
            )
            .await?;
        let member_id = str_field(&member, "id")?.to_string();

        let request = self
            .send_json(
                self.request(
                    RequestMethod::Post,
                    self.tooling_url("sobjects/ContainerAsyncRequest"),
                )
                .json_value(json!({
                    "MetadataContainerId": container_id,
                    "IsCheckOnly": check_only,
                })),
            )
            .await?;
        let request_id = str_field(&request, "id")?.to_string();

        let started = Instant::now();
        let status = loop {
            let status = self
                .send_json(self.request(
                    RequestMethod::Get,
                    self.tooling_url(&format!("sobjects/ContainerAsyncRequest/{request_id}")),
                ))
                .await?;
            let state = status.get("State").and_then(Value::as_str).unwrap_or("Queued");
            if state != "Queued" {
                break status;
            }
            if started.elapsed() > self.job_max_wait() {
                return Err(Error::new(ErrorKind::Timeout));
            }
            sleep(self.job_poll_interval()).await;
        };

        let state = str_field(&status, "State")?;
        if state == "Completed" {
            let member = self
                .send_json(self.request(
                    RequestMethod::Get,
                    self.tooling_url(&format!("sobjects/{member_type}/{member_id}")),
                ))
                .await?;
            return Ok(json!({
                "success": true,
                "state": state,
                "symbolTable": member.get("SymbolTable").cloned().unwrap_or(Value::Null),
            }));
        }

        let failure = status
            .pointer("/DeployDetails/componentFailures/0")
            .cloned()
            .unwrap_or(Value::Null);
        let problem = failure
            .get("problem")
            .and_then(Value::as_str)
            .or_else(|| status.get("ErrorMsg").and_then(Value::as_str))
            .unwrap_or(state);

        Ok(json!({
            "success": false,
            "state": state,
            "problem": problem,
            "lineNumber": failure.get("lineNumber").cloned().unwrap_or(Value::Null),
            "columnNumber": failure.get("columnNumber").cloned().unwrap_or(Value::Null),
        }))
    }
}
