//! Data templates and sobject workbooks, written as CSV under the workspace.

use std::path::{Path, PathBuf};

use busbar_sf_client::ApiResult;
use busbar_sf_orchestrator::{FanOutSet, Operation, Outcome};
use serde_json::Value;
use tracing::{instrument, warn};

use super::Pipelines;
use crate::completions::SObjectDescribe;
use crate::error::{Error, ErrorKind, Result};

const WORKBOOK_COLUMNS: [&str; 5] = ["Field Label", "Field API", "Field Type", "Picklist Values", "Reference To"];

/// `(label, api name)` of every field on a layout, in layout order.
pub(crate) fn layout_fields(layout: &Value) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let sections = layout
        .get("editLayoutSections")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for section in sections {
        let items = section
            .get("layoutRows")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get("layoutItems").and_then(Value::as_array))
            .flatten();
        for item in items {
            let label = item.get("label").and_then(Value::as_str).unwrap_or_default();
            let components = item
                .get("layoutComponents")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|component| component.get("type").and_then(Value::as_str) == Some("Field"));
            for component in components {
                let Some(name) = component.get("value").and_then(Value::as_str) else {
                    continue;
                };
                if !fields.iter().any(|(_, existing)| existing == name) {
                    fields.push((label.to_string(), name.to_string()));
                }
            }
        }
    }
    fields
}

/// Header rows of an import template: labels, then API names.
fn write_data_template(path: &Path, fields: &[(String, String)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(fields.iter().map(|(label, _)| label))?;
    writer.write_record(fields.iter().map(|(_, name)| name))?;
    writer.flush()?;
    Ok(())
}

/// One row per field of an sobject describe.
fn write_workbook(path: &Path, describe: &SObjectDescribe) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(WORKBOOK_COLUMNS)?;
    for field in &describe.fields {
        let picklist = field
            .picklist_values
            .iter()
            .map(|value| value.value.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        writer.write_record([
            field.label.as_str(),
            field.name.as_str(),
            &field.type_description(),
            &picklist,
            &field.reference_to.join(", "),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

impl Pipelines {
    fn template_file(&self, sobject: &str, recordtype_name: &str) -> PathBuf {
        self.ctx
            .settings()
            .workspace
            .join("template")
            .join(format!("{sobject}-{recordtype_name}.csv"))
    }

    fn workbook_file(&self, sobject: &str) -> PathBuf {
        self.ctx
            .settings()
            .workspace
            .join("workbooks")
            .join(format!("{sobject}.csv"))
    }

    /// Write the fields of an sobject's layout for one record type to
    /// `<workspace>/template/<sobject>-<recordtype>.csv`.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn export_data_template(
        &self,
        sobject: &str,
        recordtype_name: &str,
        recordtype_id: &str,
    ) -> Operation<ApiResult> {
        let file = self.template_file(sobject, recordtype_name);
        let path = format!("sobjects/{sobject}/describe/layouts/{recordtype_id}");
        let api = self.api.clone();
        let this = self.clone();

        self.ctx.single(
            format!("Export Data Template of {sobject}=>{recordtype_name}"),
            format!("Outputdir: {}", file.display()),
            async move { api.get(&path).await },
            move |result| match write_data_template(&file, &layout_fields(&result.body)) {
                Ok(()) => this
                    .ctx
                    .announce(format!("Data Template outputdir: {}", file.display())),
                Err(err) => this.ctx.report_error("Export Data Template", &err),
            },
        )
    }

    /// Resolve the record type through the record types lookup, then
    /// [`Pipelines::export_data_template`].
    pub fn export_data_template_for(
        &self,
        sobject: &str,
        recordtype_name: &str,
    ) -> Operation<std::result::Result<String, String>> {
        let lookup = self.clone();
        let this = self.clone();
        let key = format!("{sobject}, {recordtype_name}");
        let sobject = sobject.to_string();
        let recordtype_name = recordtype_name.to_string();

        self.after_lookup(
            format!("Find Record Type {key}"),
            async move {
                let recordtypes = lookup.populate_sobject_recordtypes().await?;
                recordtypes.get(&key).cloned().ok_or_else(|| {
                    Error::new(ErrorKind::Registry(format!("no record type {key}")))
                })
            },
            move |recordtype_id| {
                this.export_data_template(&sobject, &recordtype_name, &recordtype_id);
            },
        )
    }

    /// Describe every named sobject at once and write one workbook per
    /// sobject to `<workspace>/workbooks/<sobject>.csv` as each finishes.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn generate_workbooks(&self, sobjects: &[String]) -> Vec<Operation<ApiResult>> {
        let set: FanOutSet<ApiResult, String> = sobjects
            .iter()
            .map(|sobject| {
                let api = self.api.clone();
                let name = sobject.clone();
                let op = self
                    .ctx
                    .orchestrator()
                    .launcher()
                    .launch(format!("Describe {sobject}"), async move { api.describe_sobject(&name).await });
                (op, sobject.clone())
            })
            .collect();

        let writer = self.clone();
        let this = self.clone();
        let outdir = self.ctx.settings().workspace.join("workbooks");
        self.ctx.fan_out(
            set,
            "Generating Sobjects Workbook",
            "Sobjects Workbook are Generated",
            move |sobject: &String, outcome: &Outcome<ApiResult>| {
                let Some(result) = outcome.completed().filter(|result| !result.is_failure()) else {
                    return;
                };
                let written = serde_json::from_value::<SObjectDescribe>(result.body.clone())
                    .map_err(Error::from)
                    .and_then(|describe| write_workbook(&writer.workbook_file(sobject), &describe));
                if let Err(err) = written {
                    warn!(sobject = %sobject, error = %err, "Workbook not written");
                }
            },
            move |gathered| {
                if let Some(summary) = gathered.failure_summary() {
                    this.ctx.announce(format!("Workbooks not generated:\n{summary}"));
                }
                this.ctx.announce(format!("Outputdir: {}", outdir.display()));
            },
        )
    }

    /// Describe global, then [`Pipelines::generate_workbooks`] for every
    /// sobject of the org.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn generate_all_workbooks(&self) -> Operation<ApiResult> {
        let api = self.api.clone();
        let this = self.clone();

        self.ctx.single(
            "Global Describe Common",
            "Global Describe Common Succeed",
            async move { api.describe_global().await },
            move |result| {
                let sobjects: Vec<String> = crate::reference::index_sobjects(&result.body)
                    .into_keys()
                    .collect();
                this.generate_workbooks(&sobjects);
            },
        )
    }
}
