//! Bulk 2.0 pipelines: ingest, job close, record export.

use std::path::{Path, PathBuf};

use busbar_sf_client::{ApiResult, BulkOperation, SalesforceApi};
use busbar_sf_orchestrator::{FanOutSet, Operation, Outcome};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{write_file, Pipelines};
use crate::error::Result;

/// Rows in a CSV payload, header excluded.
fn count_rows(csv: &str) -> Result<usize> {
    let mut reader = csv::Reader::from_reader(csv.as_bytes());
    let mut rows = 0;
    for record in reader.records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}

fn job_summary(sobject: &str, operation: &BulkOperation, body: &Value) -> String {
    let count = |key: &str| body.get(key).and_then(Value::as_u64).unwrap_or(0);
    format!(
        "{} {sobject}: {}, processed {}, failed {}",
        operation.as_str(),
        body.get("state").and_then(Value::as_str).unwrap_or("Unknown"),
        count("numberRecordsProcessed"),
        count("numberRecordsFailed"),
    )
}

/// Bulk query of `soql`, or of every field of `sobject` when none is given.
async fn export_records(api: SalesforceApi, sobject: String, soql: Option<String>) -> ApiResult {
    let soql = match soql {
        Some(soql) => soql,
        None => {
            let combined = api.combine_soql(&sobject).await;
            if combined.is_failure() {
                return combined;
            }
            combined
                .get("soql")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        }
    };
    api.bulk_query(&soql).await
}

impl Pipelines {
    fn backup_file(&self, sobject: &str) -> PathBuf {
        self.ctx
            .settings()
            .workspace
            .join("backup")
            .join(format!("{sobject}.csv"))
    }

    fn write_backup(&self, file: &Path, result: &ApiResult) {
        let csv = result.body.as_str().unwrap_or_default();
        match write_file(file, csv) {
            Ok(()) => debug!(file = %file.display(), "Records exported"),
            Err(err) => self.ctx.report_error("Export Records", &err),
        }
    }

    /// Load a CSV file into `sobject` with a bulk ingest job.
    #[instrument(skip(self, csv_file), fields(org = %self.org()))]
    pub fn bulk_operation(
        &self,
        sobject: &str,
        csv_file: impl AsRef<Path>,
        operation: BulkOperation,
    ) -> Result<Operation<ApiResult>> {
        let csv = std::fs::read_to_string(csv_file.as_ref())?;
        let rows = count_rows(&csv)?;
        debug!(rows, sobject, operation = operation.as_str(), "Starting ingest");

        let progress = format!("{} {sobject}", operation.as_str());
        let api = self.api.clone();
        let sobject = sobject.to_string();
        let worker_sobject = sobject.clone();
        let worker_operation = operation.clone();
        let this = self.clone();

        Ok(self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            async move { api.bulk_ingest(&worker_sobject, &worker_operation, &csv).await },
            move |result| {
                this.ctx
                    .announce(job_summary(&sobject, &operation, &result.body));
            },
        ))
    }

    /// Close ingest jobs, all at once.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn close_jobs(&self, job_ids: &[String]) -> Vec<Operation<ApiResult>> {
        let set: FanOutSet<ApiResult, String> = job_ids
            .iter()
            .map(|job_id| {
                let api = self.api.clone();
                let id = job_id.clone();
                let op = self
                    .ctx
                    .orchestrator()
                    .launcher()
                    .launch(format!("Close Job {job_id}"), async move { api.close_bulk_job(&id).await });
                (op, job_id.clone())
            })
            .collect();

        let this = self.clone();
        self.ctx.fan_out(
            set,
            "Close Jobs",
            "Close Jobs Succeed",
            |_: &String, _: &Outcome<ApiResult>| {},
            move |gathered| {
                let closed = gathered.len() - gathered.failures().len();
                let mut message = format!("Closed {closed} of {} jobs", gathered.len());
                if let Some(summary) = gathered.failure_summary() {
                    message.push('\n');
                    message.push_str(&summary);
                }
                this.ctx.announce(message);
            },
        )
    }

    /// Export the records of one sobject to `<workspace>/backup/<sobject>.csv`.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn backup_sobject(&self, sobject: &str, soql: Option<String>) -> Operation<ApiResult> {
        let progress = format!("Export Records of {sobject}");
        let file = self.backup_file(sobject);
        let api = self.api.clone();
        let sobject = sobject.to_string();
        let this = self.clone();

        self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            export_records(api, sobject, soql),
            move |result| this.write_backup(&file, &result),
        )
    }

    /// Export every queryable sobject, one bulk query each.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn backup_all_sobjects(&self) -> Operation<ApiResult> {
        let api = self.api.clone();
        let this = self.clone();

        self.ctx.single(
            "Describe Global",
            "Describe Global Succeed",
            async move { api.describe_global().await },
            move |result| {
                let sobjects: Vec<String> = result
                    .get("sobjects")
                    .and_then(Value::as_array)
                    .map(|sobjects| {
                        sobjects
                            .iter()
                            .filter(|s| s.get("queryable").and_then(Value::as_bool) == Some(true))
                            .filter_map(|s| s.get("name").and_then(Value::as_str).map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                this.export_all(sobjects);
            },
        )
    }

    fn export_all(&self, sobjects: Vec<String>) {
        let set: FanOutSet<ApiResult, String> = sobjects
            .into_iter()
            .map(|sobject| {
                let op = self.ctx.orchestrator().launcher().launch(
                    format!("Export Records of {sobject}"),
                    export_records(self.api.clone(), sobject.clone(), None),
                );
                (op, sobject)
            })
            .collect();

        let writer = self.clone();
        let this = self.clone();
        self.ctx.fan_out(
            set,
            "Export All Sobjects Records",
            "Export All Sobjects Records Succeed",
            move |sobject: &String, outcome: &Outcome<ApiResult>| {
                if let Outcome::Completed(result) = outcome {
                    if !result.is_failure() {
                        writer.write_backup(&writer.backup_file(sobject), result);
                    }
                }
            },
            move |gathered| {
                let dir = this.ctx.settings().workspace.join("backup");
                this.ctx.announce(format!(
                    "Exported {} of {} sobjects to {}",
                    gathered.len() - gathered.failures().len(),
                    gathered.len(),
                    dir.display()
                ));
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_rows() {
        assert_eq!(count_rows("Name,Phone\nAcme,1\n\"Big, Co\",2\n").unwrap(), 2);
        assert_eq!(count_rows("Name\n").unwrap(), 0);
    }

    #[test]
    fn test_job_summary() {
        let body = json!({"state": "JobComplete", "numberRecordsProcessed": 10, "numberRecordsFailed": 1});
        assert_eq!(
            job_summary("Account", &BulkOperation::Insert, &body),
            "insert Account: JobComplete, processed 10, failed 1"
        );
    }
}
