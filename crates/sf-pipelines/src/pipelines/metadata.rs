//! Metadata API pipelines: deploy, retrieve, static resource bodies.

use std::path::{Path, PathBuf};

use busbar_sf_client::{ApiResult, DeployOptions, PackageType};
use busbar_sf_orchestrator::Operation;
use serde_json::Value;
use tracing::{info, instrument};

use super::Pipelines;
use crate::archive;
use crate::error::Result;
use crate::format;

/// Types retrieved by a full metadata export.
const RETRIEVE_ALL_TYPES: [&str; 14] = [
    "ApexClass",
    "ApexComponent",
    "ApexPage",
    "ApexTrigger",
    "CustomApplication",
    "CustomLabels",
    "CustomObject",
    "CustomTab",
    "Layout",
    "Profile",
    "RemoteSiteSetting",
    "StaticResource",
    "Workflow",
    "EmailTemplate",
];

/// Types retrieved when only sobjects and their workflows are wanted.
const RETRIEVE_SOBJECT_TYPES: [&str; 2] = ["CustomObject", "Workflow"];

pub const RETRIEVE_VIEW: &str = "Retrieve Metadata";

fn package(types: &[&str]) -> Vec<PackageType> {
    types.iter().map(|name| PackageType::all(*name)).collect()
}

/// One line per failed component of a deploy result.
fn deploy_failures(body: &Value) -> String {
    let mut lines: Vec<String> = body
        .get("componentFailures")
        .and_then(Value::as_array)
        .map(|failures| {
            failures
                .iter()
                .map(|failure| {
                    let text = |key: &str| failure.get(key).and_then(Value::as_str).unwrap_or("");
                    match failure.get("lineNumber").and_then(Value::as_i64) {
                        Some(line) => format!("{}: line {line}: {}", text("fileName"), text("problem")),
                        None => format!("{}: {}", text("fileName"), text("problem")),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if let Some(message) = body.get("errorMessage").and_then(Value::as_str) {
        lines.insert(0, message.to_string());
    }
    lines.join("\n")
}

fn extract_retrieved(result: &ApiResult, outdir: &Path) -> Result<usize> {
    std::fs::create_dir_all(outdir)?;
    let zip = result.get("zipFile").and_then(Value::as_str).unwrap_or_default();
    Ok(archive::extract_base64_zip(zip, outdir)?.len())
}

impl Pipelines {
    /// Deploy a zip file, or a metadata directory zipped on the fly.
    #[instrument(skip(self, path), fields(org = %self.org(), path = %path.as_ref().display()))]
    pub fn deploy_metadata(&self, path: impl AsRef<Path>, options: DeployOptions) -> Result<Operation<ApiResult>> {
        let zip = archive::deployable(path.as_ref())?;
        let api = self.api.clone();
        let this = self.clone();

        Ok(self.ctx.single(
            "Deploy Metadata",
            "Deploy Metadata Succeed",
            async move { api.deploy(&zip, &options).await },
            move |result| {
                if result.get("success").and_then(Value::as_bool) == Some(true) {
                    this.ctx.announce("Deploy Metadata Succeed");
                } else {
                    this.ctx
                        .announce(format!("Deploy Metadata Failed\n{}", deploy_failures(&result.body)));
                }
            },
        ))
    }

    /// Retrieve org metadata into `<workspace>/metadata`; everything, or only
    /// sobjects and workflows.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn retrieve_all(&self, retrieve_all: bool) -> Result<Operation<ApiResult>> {
        let names: &[&str] = if retrieve_all {
            &RETRIEVE_ALL_TYPES
        } else {
            &RETRIEVE_SOBJECT_TYPES
        };
        let types = package(names);
        let outdir = self.ctx.settings().workspace.join("metadata");
        let api = self.api.clone();
        let this = self.clone();

        Ok(self.ctx.single(
            "Retrieve Metadata",
            "Retrieve Metadata Succeed",
            async move { api.retrieve(&types).await },
            move |result| match extract_retrieved(&result, &outdir) {
                Ok(files) => {
                    info!(files, outdir = %outdir.display(), "Metadata retrieved");
                    this.ctx.host().append_view(
                        RETRIEVE_VIEW,
                        &format::banner(&format!("Metadata are exported to: {}", outdir.display())),
                    );
                    this.ctx
                        .host()
                        .status(&format!("Exported Path: {}", outdir.display()));
                }
                Err(err) => this.ctx.report_error("Retrieve Metadata", &err),
            },
        ))
    }

    /// Retrieve every static resource body into `dir`.
    #[instrument(skip(self, dir), fields(org = %self.org()))]
    pub fn get_static_resource_body(&self, dir: impl Into<PathBuf>) -> Result<Operation<ApiResult>> {
        let dir = dir.into();
        let api = self.api.clone();
        let this = self.clone();

        Ok(self.ctx.single(
            "Retrieve StaticResource",
            "Retrieve StaticResource Succeed",
            async move { api.retrieve(&[PackageType::all("StaticResource")]).await },
            move |result| {
                let unpacked = extract_retrieved(&result, &dir)
                    .and_then(|_| archive::flatten_static_resources(&dir));
                match unpacked {
                    Ok(moved) => info!(resources = moved.len(), dir = %dir.display(), "Static resources retrieved"),
                    Err(err) => this.ctx.report_error("Retrieve StaticResource", &err),
                }
            },
        ))
    }
}
