//! Describe pipelines and sobject completions.

use std::path::Path;
use std::sync::Arc;

use busbar_sf_client::ApiResult;
use busbar_sf_orchestrator::{FanOutSet, Operation, Outcome, ResourceKind};
use serde_json::Value;
use tracing::{info, instrument};

use super::Pipelines;
use crate::completions::SObjectCompletions;
use crate::error::Result;
use crate::format;
use crate::reference::{index_sobjects, SObjectIndex};

const CUSTOM_FIELD_COLUMNS: [&str; 5] = ["Id", "TableEnumOrId", "DeveloperName", "NamespacePrefix", "FullName"];

/// Write query records as CSV, one column per name; missing values are
/// empty cells.
fn write_records_csv(path: &Path, columns: &[&str], records: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(columns)?;
    for record in records {
        writer.write_record(columns.iter().map(|column| match record.get(*column) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }))?;
    }
    writer.flush()?;
    Ok(())
}

/// Sobjects whose describes feed completions: allowed standard ones and
/// every custom one.
fn completion_sobjects(index: &SObjectIndex, allowed: &[String]) -> Vec<String> {
    index
        .iter()
        .filter(|(name, describe)| {
            allowed.contains(name) || describe.get("custom").and_then(Value::as_bool) == Some(true)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

impl Pipelines {
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn describe_sobject(&self, sobject: &str) -> Operation<ApiResult> {
        let api = self.api.clone();
        let sobject = sobject.to_string();
        let worker_sobject = sobject.clone();
        let this = self.clone();

        self.ctx.single(
            format!("Describe {sobject}"),
            format!("Describe {sobject} Succeed"),
            async move { api.describe_sobject(&worker_sobject).await },
            move |result| {
                let text = format::sobject_fields(&result.body);
                this.ctx
                    .host()
                    .show_view(&format!("{sobject} Describe Result"), &text);
                this.remember("describe", &sobject, &text);
            },
        )
    }

    /// Show a `SELECT` over every field of an sobject.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn generate_sobject_soql(&self, sobject: &str) -> Operation<ApiResult> {
        let api = self.api.clone();
        let sobject = sobject.to_string();
        let worker_sobject = sobject.clone();
        let this = self.clone();

        self.ctx.single(
            format!("Generate SOQL for {sobject}"),
            format!("Generate SOQL for {sobject} Succeed"),
            async move { api.combine_soql(&worker_sobject).await },
            move |result| {
                let soql = result.get("soql").and_then(Value::as_str).unwrap_or_default();
                this.ctx.host().show_view(&format!("{sobject} SOQL"), soql);
                this.remember("soql", &sobject, soql);
            },
        )
    }

    /// Export every custom field to `<workspace>/customfield/customfield.csv`.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn export_customfield(&self) -> Operation<ApiResult> {
        let file = self
            .ctx
            .settings()
            .workspace
            .join("customfield")
            .join("customfield.csv");
        let api = self.api.clone();
        let this = self.clone();
        let soql = format!("SELECT {} FROM CustomField", CUSTOM_FIELD_COLUMNS.join(","));

        self.ctx.single(
            "Describe CustomField",
            format!("Outputdir: {}", file.display()),
            async move { api.query_all(&soql, true).await },
            move |result| {
                let mut records = result.records().to_vec();
                records.sort_by(|a, b| {
                    let table = |r: &Value| r.get("TableEnumOrId").and_then(Value::as_str).unwrap_or("").to_string();
                    table(a).cmp(&table(b))
                });
                match write_records_csv(&file, &CUSTOM_FIELD_COLUMNS, &records) {
                    Ok(()) => this.ctx.announce(file.display()),
                    Err(err) => this.ctx.report_error("Export CustomField", &err),
                }
            },
        )
    }

    /// Describe global, then describe every completion sobject at once and
    /// store the completions. The describe fan-out never starts when the
    /// describe global fails.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn initiate_sobjects_completions(&self) -> Operation<ApiResult> {
        let api = self.api.clone();
        let this = self.clone();

        self.ctx.single(
            "Global Describe",
            "Global Describe Succeed",
            async move { api.describe_global().await },
            move |result| this.describe_completion_sobjects(index_sobjects(&result.body)),
        )
    }

    fn describe_completion_sobjects(&self, index: SObjectIndex) {
        let sobjects = completion_sobjects(&index, &self.ctx.settings().allowed_sobjects);
        let set: FanOutSet<ApiResult, String> = sobjects
            .into_iter()
            .map(|sobject| {
                let api = self.api.clone();
                let name = sobject.clone();
                let op = self
                    .ctx
                    .orchestrator()
                    .launcher()
                    .launch(format!("Describe {sobject}"), async move { api.describe_sobject(&name).await });
                (op, sobject)
            })
            .collect();

        let this = self.clone();
        self.ctx.fan_out(
            set,
            "Download Cache of Sobjects",
            "Download Cache of Sobjects Succeed",
            |_: &String, _: &Outcome<ApiResult>| {},
            move |gathered| {
                let completions = SObjectCompletions::from_describes(
                    gathered.completed().map(|(_, result)| &result.body),
                    this.ctx.settings().display_field_name_and_label,
                );
                if let Err(err) = this.ctx.store().save_completions(this.org(), &completions) {
                    this.ctx.report_error("Saving sobject completions", &err);
                    return;
                }
                this.ctx
                    .cache()
                    .sobjects
                    .insert(this.org(), ResourceKind::SObjectDescribe, Arc::new(index));
                info!(sobjects = completions.sobjects.len(), "Sobject completions stored");
                this.ctx
                    .announce("Sobjects completions local history are initiated.");
            },
        );
    }
}
