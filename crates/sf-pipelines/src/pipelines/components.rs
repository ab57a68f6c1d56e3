//! Component pipelines: project download, folder refresh, save, create,
//! refresh and delete of single components, code coverage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use busbar_sf_client::{security::soql, ApiResult, SalesforceApi};
use busbar_sf_orchestrator::{Operation, Outcome, RequestKey};
use chrono::Local;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::{write_file, Pipelines};
use crate::error::{Error, ErrorKind, Result};
use crate::format;
use crate::registry::{ComponentAttributes, ComponentMetadata};
use crate::settings::ComponentTypeSettings;

/// Static resource bodies come from the metadata retrieve, not the query.
const STATIC_RESOURCE: &str = "StaticResource";

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Write every queried component of a type into `outdir`. Returns the
/// registry entries of the type.
fn write_components(
    component_type: &str,
    settings: &ComponentTypeSettings,
    records: &[Value],
    outdir: &Path,
) -> Result<BTreeMap<String, ComponentAttributes>> {
    let mut components = BTreeMap::new();
    for record in records {
        let Some((name, attributes)) = ComponentAttributes::from_record(component_type, settings, record) else {
            continue;
        };
        if component_type != STATIC_RESOURCE {
            if let Some(body) = record.get(&settings.body).and_then(Value::as_str) {
                write_file(&outdir.join(attributes.file_name(&name)), body)?;
            }
        }
        debug!(component_type, name = %name, "Component downloaded");
        components.insert(name, attributes);
    }
    Ok(components)
}

/// Query every configured component type in turn. The body maps each type
/// to its query result; the first failing query is returned as is.
async fn download_all(api: SalesforceApi, queries: Vec<(String, String)>) -> ApiResult {
    let mut bodies = Map::new();
    for (component_type, soql) in queries {
        let result = api.query_all(&soql, false).await;
        if result.is_failure() {
            return result;
        }
        bodies.insert(component_type, result.body);
    }
    ApiResult::ok(200, Value::Object(bodies))
}

impl Pipelines {
    fn component_attributes(&self, component_type: &str, name: &str) -> Result<ComponentAttributes> {
        self.registry()?
            .get(component_type, name)
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::Registry(format!(
                    "{component_type} {name} is not in the component cache"
                )))
            })
    }

    /// Download every component of a type into `outdir` and replace the
    /// type's registry entries.
    #[instrument(skip(self, outdir), fields(org = %self.org()))]
    pub fn refresh_folder(
        &self,
        component_type: &str,
        outdir: impl Into<PathBuf>,
    ) -> Result<Operation<ApiResult>> {
        let settings = self.ctx.settings().component(component_type)?.clone();
        let component_type = component_type.to_string();
        let outdir = outdir.into();
        let api = self.api.clone();
        let soql = settings.soql.clone();
        let this = self.clone();

        Ok(self.ctx.single(
            format!("Refreshing {component_type}"),
            format!("Refreshing {component_type} Succeed"),
            async move { api.query_all(&soql, false).await },
            move |result| {
                let refreshed = write_components(&component_type, &settings, result.records(), &outdir)
                    .and_then(|components| {
                        let count = components.len();
                        let mut registry = this.registry()?;
                        registry.set_type(component_type.clone(), components);
                        this.save_registry(&registry)?;
                        Ok(count)
                    });
                match refreshed {
                    Ok(count) => this.ctx.announce(format!("{component_type} Size: {count}")),
                    Err(err) => this.ctx.report_error(&format!("Refreshing {component_type}"), &err),
                }
            },
        ))
    }

    /// Download every configured component type, rebuild the registry, then
    /// chain sobject completions (and static resource bodies when enabled).
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn new_project(&self) -> Result<Operation<ApiResult>> {
        let settings = self.ctx.settings();
        let mut queries = Vec::with_capacity(settings.component_types.len());
        for component_type in &settings.component_types {
            let soql = settings.component(component_type)?.soql.clone();
            queries.push((component_type.clone(), soql));
        }
        let this = self.clone();

        Ok(self.ctx.single(
            "Initiate Project, Please Wait...",
            "New Project Succeed",
            download_all(self.api.clone(), queries),
            move |result| {
                if let Err(err) = this.write_project(&result.body) {
                    this.ctx.report_error("New Project", &err);
                    return;
                }
                this.ctx.announce("All code are Downloaded.");
                this.ctx.host().status("Refresh All Successfully");

                this.initiate_sobjects_completions();
                if this.ctx.settings().get_static_resource_body {
                    let started = this
                        .ctx
                        .settings()
                        .component_dir(STATIC_RESOURCE)
                        .and_then(|dir| this.get_static_resource_body(dir));
                    if let Err(err) = started {
                        this.ctx.report_error("Retrieve StaticResource", &err);
                    }
                }
            },
        ))
    }

    fn write_project(&self, bodies: &Value) -> Result<()> {
        let settings = self.ctx.settings();
        let mut registry = ComponentMetadata::new();
        if let Some(bodies) = bodies.as_object() {
            for (component_type, body) in bodies {
                let type_settings = settings.component(component_type)?;
                let records = body
                    .get("records")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let outdir = settings.component_dir(component_type)?;
                let components = write_components(component_type, type_settings, records, &outdir)?;
                registry.set_type(component_type.clone(), components);
            }
        }
        self.save_registry(&registry)
    }

    /// Save (or only compile, with `check_only`) a component's source.
    ///
    /// Returns `None` without launching anything while a save of the same
    /// component is still running.
    #[instrument(skip(self, body), fields(org = %self.org()))]
    pub fn save_component(
        &self,
        component_type: &str,
        name: &str,
        body: impl Into<String>,
        check_only: bool,
    ) -> Result<Option<Operation<ApiResult>>> {
        let attributes = self.component_attributes(component_type, name)?;
        let Some(guard) = self.ctx.inflight().try_begin(RequestKey::new(self.org(), name)) else {
            self.ctx.host().console(&format!("{name} is in process"));
            return Ok(None);
        };

        let in_progress = format!("{} {name}", if check_only { "Compiling" } else { "Saving" });
        let success = format!("{in_progress} Succeed");
        let api = self.api.clone();
        let body = body.into();
        let worker_attributes = attributes.clone();
        let this = self.clone();
        let name = name.to_string();

        Ok(Some(self.ctx.single_then(
            in_progress,
            success,
            async move {
                api.save_component(
                    &worker_attributes.component_type,
                    &worker_attributes.id,
                    &body,
                    check_only,
                )
                .await
            },
            move |outcome| {
                drop(guard);
                let Outcome::Completed(result) = outcome else {
                    return;
                };
                if !result.is_failure() {
                    this.finish_save(&name, &attributes, &result);
                }
            },
        )))
    }

    fn finish_save(&self, name: &str, attributes: &ComponentAttributes, result: &ApiResult) {
        let file_name = attributes.file_name(name);
        if result.get("success").and_then(Value::as_bool) == Some(true) {
            if let Some(table) = result.get("symbolTable").filter(|table| !table.is_null()) {
                if let Err(err) = self.ctx.store().save_symbol_table(self.org(), name, table) {
                    self.ctx.report_error("Saving symbol table", &err);
                }
            }
            self.ctx
                .announce(format!("{file_name} is saved successfully at {}", timestamp()));
            return;
        }

        let line = result.get("lineNumber").and_then(Value::as_i64).unwrap_or(-1);
        let column = result.get("columnNumber").and_then(Value::as_i64).unwrap_or(-1);
        let problem = result.get("problem").and_then(Value::as_str).unwrap_or("unknown problem");
        self.ctx
            .announce(format!("{file_name} line {line}, column {column}: {problem}"));
    }

    /// Create a component from `data` (its sobject fields). The local file
    /// opens on success and is removed when the create fails.
    #[instrument(skip(self, data, file), fields(org = %self.org()))]
    pub fn create_component(
        &self,
        component_type: &str,
        name: &str,
        data: Value,
        file: impl Into<PathBuf>,
    ) -> Result<Operation<ApiResult>> {
        let settings = self.ctx.settings().component(component_type)?.clone();
        let post_url = format!("sobjects/{component_type}");
        let component_type = component_type.to_string();
        let name = name.to_string();
        let file = file.into();
        let api = self.api.clone();
        let worker_url = post_url.clone();
        let this = self.clone();

        Ok(self.ctx.single_then(
            format!("Creating Component {name}"),
            format!("Creating Component {name} Succeed"),
            async move { api.post(&worker_url, data).await },
            move |outcome| {
                let created = match outcome {
                    Outcome::Completed(result) if !result.is_failure() => result,
                    _ => {
                        if file.exists() {
                            if let Err(err) = std::fs::remove_file(&file) {
                                this.ctx.report_error("Removing component file", &Error::from(err));
                            }
                        }
                        return;
                    }
                };

                let id = created
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let attributes = ComponentAttributes {
                    url: format!("{post_url}/{id}"),
                    id,
                    body: settings.body.clone(),
                    extension: settings.extension.clone(),
                    component_type: component_type.clone(),
                    is_test: false,
                };
                let file_name = attributes.file_name(&name);
                let registered = this.registry().and_then(|mut registry| {
                    registry.insert(name.clone(), attributes);
                    this.save_registry(&registry)
                });
                if let Err(err) = registered {
                    this.ctx.report_error("Registering component", &err);
                }
                this.ctx.host().open_file(&file);
                this.ctx
                    .announce(format!("{file_name} is created successfully at {}", timestamp()));
            },
        ))
    }

    /// Overwrite `file` with the server copy of a component.
    #[instrument(skip(self, file), fields(org = %self.org()))]
    pub fn refresh_component(
        &self,
        component_type: &str,
        name: &str,
        file: impl Into<PathBuf>,
    ) -> Result<Operation<ApiResult>> {
        let attributes = self.component_attributes(component_type, name)?;
        let file = file.into();
        let api = self.api.clone();
        let url = attributes.url.clone();
        let this = self.clone();

        Ok(self.ctx.single(
            format!("Refresh {name}"),
            format!("Refresh {name} Succeed"),
            async move { api.get(&url).await },
            move |result| {
                let Some(body) = result.get(&attributes.body).and_then(Value::as_str) else {
                    this.ctx.report_error(
                        "Refresh Component",
                        &Error::new(ErrorKind::Api(format!("response has no {} field", attributes.body))),
                    );
                    return;
                };
                if let Err(err) = write_file(&file, body) {
                    this.ctx.report_error("Refresh Component", &err);
                }
            },
        ))
    }

    /// Overwrite `file` with a static resource's body.
    #[instrument(skip(self, file), fields(org = %self.org()))]
    pub fn refresh_static_resource(&self, name: &str, file: impl Into<PathBuf>) -> Result<Operation<ApiResult>> {
        let attributes = self.component_attributes(STATIC_RESOURCE, name)?;
        let file = file.into();
        let api = self.api.clone();
        let url = format!("{}/body", attributes.url);
        let this = self.clone();

        Ok(self.ctx.single(
            "Refresh StaticResource",
            "Refresh StaticResource Succeed",
            async move { api.retrieve_body(&url).await },
            move |result| {
                let body = result.body.as_str().unwrap_or_default();
                if let Err(err) = write_file(&file, body) {
                    this.ctx.report_error("Refresh StaticResource", &err);
                }
            },
        ))
    }

    /// Delete a component remotely, then its file and registry entry.
    #[instrument(skip(self, file), fields(org = %self.org()))]
    pub fn delete_component(
        &self,
        component_type: &str,
        name: &str,
        file: impl Into<PathBuf>,
    ) -> Result<Operation<ApiResult>> {
        let attributes = self.component_attributes(component_type, name)?;
        let file = file.into();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| attributes.file_name(name));
        let api = self.api.clone();
        let url = attributes.url.clone();
        let component_type = component_type.to_string();
        let name = name.to_string();
        let this = self.clone();

        Ok(self.ctx.single(
            format!("Deleting {file_name}"),
            format!("Delete {file_name} Succeed"),
            async move { api.delete(&url).await },
            move |_| {
                let cleaned = (|| -> Result<()> {
                    if file.exists() {
                        std::fs::remove_file(&file)?;
                    }
                    let mut registry = this.registry()?;
                    registry.remove(&component_type, &name);
                    this.save_registry(&registry)
                })();
                if let Err(err) = cleaned {
                    this.ctx.report_error(&format!("Deleting {file_name}"), &err);
                    return;
                }
                this.ctx.host().close_active();
                this.ctx
                    .announce(format!("{} is deleted successfully at {}", file.display(), timestamp()));
            },
        ))
    }

    /// Show a class or trigger with its uncovered lines flagged.
    #[instrument(skip(self, body), fields(org = %self.org()))]
    pub fn view_code_coverage(
        &self,
        component_type: &str,
        name: &str,
        body: impl Into<String>,
    ) -> Result<Operation<ApiResult>> {
        let attributes = self.component_attributes(component_type, name)?;
        let soql = format!(
            "SELECT Coverage FROM ApexCodeCoverageAggregate WHERE ApexClassOrTriggerId = '{}'",
            soql::escape_string(&attributes.id)
        );
        let api = self.api.clone();
        let body = body.into();
        let name = name.to_string();
        let this = self.clone();

        Ok(self.ctx.single(
            format!("View Code Coverage of {name}"),
            format!("View Code Coverage of {name} Succeed"),
            async move { api.query(&soql, true).await },
            move |result| {
                let lines = |kind: &str| -> Vec<u64> {
                    result
                        .records()
                        .first()
                        .and_then(|record| record.pointer(&format!("/Coverage/{kind}")))
                        .and_then(Value::as_array)
                        .map(|lines| lines.iter().filter_map(Value::as_u64).collect())
                        .unwrap_or_default()
                };
                let covered = lines("coveredLines");
                let uncovered = lines("uncoveredLines");

                match format::class_coverage(&name, &covered, &uncovered) {
                    Some(summary) if result.total_size() > 0 => {
                        this.ctx.host().show_view(
                            &format!("{name} Code Coverage"),
                            &format::annotate_uncovered(&body, &uncovered),
                        );
                        this.ctx.announce(summary);
                    }
                    _ => this.ctx.announce("You should run test class firstly."),
                }
            },
        ))
    }
}
