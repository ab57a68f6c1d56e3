//! Command-line host for the workbench pipelines.
//!
//! Every invocation runs one pipeline chain against the org in the settings
//! file and exits once the control loop is idle.
//!
//! ```sh
//! export SF_USERNAME=dev@example.com SF_PASSWORD='...' SF_CLIENT_ID=... SF_CLIENT_SECRET=...
//! sf-workbench --workspace ./project new-project
//! sf-workbench query "SELECT Id, Name FROM Account LIMIT 5"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use busbar_sf_workbench::client::{BulkOperation, DeployOptions};
use busbar_sf_workbench::{
    ClientConfig, ConsoleHost, JsonMetadataStore, Orchestrator, OrchestratorConfig,
    PipelineContext, Pipelines, Settings, SfHttpClient,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sf-workbench")]
#[command(author, version, about = "Salesforce workbench pipelines from the command line", long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults to the user config directory
    #[arg(short, long, global = true, env = "SF_WORKBENCH_SETTINGS")]
    settings: Option<PathBuf>,

    /// Project directory, overriding the settings file
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Connection timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Longest a server-side job (bulk, deploy, test run) may take, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    job_max_wait: Option<u64>,

    /// Cancel any single operation running longer than this, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    operation_timeout: Option<u64>,

    /// Give up on a continuation whose operation has not finished after this, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    poll_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download every configured component type and build completions
    NewProject,

    /// Download one component type into its folder
    RefreshFolder { component_type: String },

    /// Save a component from its local file
    Save {
        component_type: String,
        name: String,
        file: PathBuf,

        /// Compile only, do not persist
        #[arg(long)]
        check_only: bool,
    },

    /// Create a component from a local file
    Create {
        component_type: String,
        name: String,
        file: PathBuf,
    },

    /// Overwrite a local file with the server copy
    Refresh {
        component_type: String,
        name: String,
        file: PathBuf,
    },

    /// Delete a component remotely and locally
    Delete {
        component_type: String,
        name: String,
        file: PathBuf,
    },

    /// Show a class or trigger with uncovered lines flagged
    Coverage {
        component_type: String,
        name: String,
        file: PathBuf,
    },

    /// Run a SOQL query
    Query { soql: String },

    /// Execute anonymous Apex from a file
    Anonymous { file: PathBuf },

    /// Send one REST explorer request ("Get", "Post", "Query", "Tooling Query", ...)
    Rest {
        operation: String,
        url: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },

    /// Describe an sobject's fields
    Describe { sobject: String },

    /// Generate a SELECT over every field of an sobject
    Soql { sobject: String },

    /// Rebuild sobject completions
    Completions,

    /// Export every custom field to CSV
    ExportCustomfield,

    /// Export the layout fields of an sobject record type as a CSV template
    DataTemplate {
        sobject: String,

        #[arg(default_value = "Master")]
        recordtype: String,
    },

    /// Write a field workbook per sobject; every sobject when none is named
    Workbooks { sobjects: Vec<String> },

    /// Run one test class, looked up by name
    RunTest { class_name: String },

    /// Run every test class in the component cache
    RunAllTest,

    /// Run test classes by name, synchronously
    RunSyncTest {
        #[arg(required = true)]
        class_names: Vec<String>,
    },

    /// Enqueue test classes by name or id
    RunAsyncTest {
        #[arg(required = true)]
        classes: Vec<String>,
    },

    /// List a user's debug logs; the user is "LastName FirstName" or a User id
    FetchLogs { user: String },

    /// Turn on debug logging for a user ("LastName FirstName" or a User id)
    DebugLog { user: String },

    /// Show one debug log
    LogDetail { log_id: String },

    /// Deploy a zip or a directory through the Metadata API
    Deploy {
        path: PathBuf,

        #[arg(long)]
        check_only: bool,
    },

    /// Retrieve metadata into <workspace>/metadata
    Retrieve {
        /// Every supported type instead of sobject definitions only
        #[arg(long)]
        all: bool,
    },

    /// Retrieve static resource bodies into their folder
    StaticResources,

    /// Load a CSV file with a Bulk API job
    Bulk {
        sobject: String,
        csv_file: PathBuf,

        /// insert, update, upsert or delete
        operation: String,

        /// External id field for upsert
        #[arg(long)]
        external_id: Option<String>,
    },

    /// Close open bulk jobs
    CloseJobs {
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Export one sobject's records to CSV
    Backup {
        sobject: String,

        #[arg(long)]
        soql: Option<String>,
    },

    /// Export every queryable sobject's records to CSV
    BackupAll,
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    if let Some(path) = path {
        return Settings::load(path).with_context(|| format!("loading {}", path.display()));
    }
    match Settings::default_path().filter(|path| path.exists()) {
        Some(path) => Settings::load(&path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Settings::default().with_env_overrides()),
    }
}

fn parse_bulk_operation(name: &str, external_id: Option<String>) -> Result<BulkOperation> {
    let operation = BulkOperation::parse(name).ok_or_else(|| anyhow!("unknown bulk operation {name}"))?;
    Ok(match (operation, external_id) {
        (BulkOperation::Upsert { .. }, Some(external_id_field)) => BulkOperation::Upsert { external_id_field },
        (operation, _) => operation,
    })
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut builder = ClientConfig::builder().with_tracing(self.debug);
        if let Some(secs) = self.connect_timeout {
            builder = builder.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.job_max_wait {
            builder = builder.with_job_max_wait(Duration::from_secs(secs));
        }
        builder.build()
    }

    fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut builder = OrchestratorConfig::builder();
        if let Some(secs) = self.operation_timeout {
            builder = builder.with_operation_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.poll_timeout {
            builder = builder.with_poll_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }
}

fn dispatch(pipelines: &Pipelines, command: Command) -> Result<()> {
    match command {
        Command::NewProject => {
            pipelines.new_project()?;
        }
        Command::RefreshFolder { component_type } => {
            let outdir = pipelines.context().settings().component_dir(&component_type)?;
            pipelines.refresh_folder(&component_type, outdir)?;
        }
        Command::Save {
            component_type,
            name,
            file,
            check_only,
        } => {
            let body = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            pipelines.save_component(&component_type, &name, body, check_only)?;
        }
        Command::Create {
            component_type,
            name,
            file,
        } => {
            let body = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let body_field = pipelines.context().settings().component(&component_type)?.body.clone();
            let mut data = json!({ "Name": name });
            if component_type == "ApexPage" || component_type == "ApexComponent" {
                data["MasterLabel"] = Value::String(name.clone());
            }
            data[body_field] = Value::String(body);
            pipelines.create_component(&component_type, &name, data, file)?;
        }
        Command::Refresh {
            component_type,
            name,
            file,
        } => {
            if component_type == "StaticResource" {
                pipelines.refresh_static_resource(&name, file)?;
            } else {
                pipelines.refresh_component(&component_type, &name, file)?;
            }
        }
        Command::Delete {
            component_type,
            name,
            file,
        } => {
            pipelines.delete_component(&component_type, &name, file)?;
        }
        Command::Coverage {
            component_type,
            name,
            file,
        } => {
            let body = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            pipelines.view_code_coverage(&component_type, &name, body)?;
        }
        Command::Query { soql } => {
            pipelines.execute_query(&soql);
        }
        Command::Anonymous { file } => {
            let apex = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            pipelines.execute_anonymous(&apex);
        }
        Command::Rest { operation, url, data } => {
            let data = data
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--data is not valid JSON")?;
            pipelines.execute_rest_test(&operation, &url, data)?;
        }
        Command::Describe { sobject } => {
            pipelines.describe_sobject(&sobject);
        }
        Command::Soql { sobject } => {
            pipelines.generate_sobject_soql(&sobject);
        }
        Command::Completions => {
            pipelines.initiate_sobjects_completions();
        }
        Command::ExportCustomfield => {
            pipelines.export_customfield();
        }
        Command::DataTemplate { sobject, recordtype } => {
            pipelines.export_data_template_for(&sobject, &recordtype);
        }
        Command::Workbooks { sobjects } => {
            if sobjects.is_empty() {
                pipelines.generate_all_workbooks();
            } else {
                pipelines.generate_workbooks(&sobjects);
            }
        }
        Command::RunTest { class_name } => {
            pipelines.run_test_by_name(&class_name);
        }
        Command::RunAllTest => {
            pipelines.run_all_test()?;
        }
        Command::RunSyncTest { class_names } => {
            pipelines.run_sync_test_classes(&class_names);
        }
        Command::RunAsyncTest { classes } => {
            pipelines.run_async_test_classes(&pipelines.class_ids(&classes)?);
        }
        Command::FetchLogs { user } => {
            pipelines.fetch_user_logs(&user);
        }
        Command::DebugLog { user } => {
            pipelines.create_user_debug_log(&user);
        }
        Command::LogDetail { log_id } => {
            pipelines.view_debug_log_detail(&log_id);
        }
        Command::Deploy { path, check_only } => {
            let options = DeployOptions {
                check_only,
                ..DeployOptions::default()
            };
            pipelines.deploy_metadata(&path, options)?;
        }
        Command::Retrieve { all } => {
            pipelines.retrieve_all(all)?;
        }
        Command::StaticResources => {
            let dir = pipelines.context().settings().component_dir("StaticResource")?;
            pipelines.get_static_resource_body(dir)?;
        }
        Command::Bulk {
            sobject,
            csv_file,
            operation,
            external_id,
        } => {
            let operation = parse_bulk_operation(&operation, external_id)?;
            pipelines.bulk_operation(&sobject, &csv_file, operation)?;
        }
        Command::CloseJobs { job_ids } => {
            pipelines.close_jobs(&job_ids);
        }
        Command::Backup { sobject, soql } => {
            pipelines.backup_sobject(&sobject, soql);
        }
        Command::BackupAll => {
            pipelines.backup_all_sobjects();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let client_config = cli.client_config();
    let orchestrator_config = cli.orchestrator_config();
    let mut settings = load_settings(cli.settings.as_deref())?;
    if let Some(workspace) = cli.workspace {
        settings.workspace = workspace;
    }
    if settings.username.is_empty() {
        bail!("no org configured: set username in the settings file or SF_USERNAME");
    }

    let store = Arc::new(JsonMetadataStore::with_path(settings.workspace.join(".workbench")));
    let (orchestrator, mut control) = Orchestrator::new(orchestrator_config);
    let ctx = PipelineContext::new(&orchestrator, settings, Arc::new(ConsoleHost), store);
    let http = SfHttpClient::new(client_config).context("building the HTTP client")?;

    let command = cli.command;
    match ctx.resume(http.clone()) {
        Some(pipelines) => dispatch(&pipelines, command)?,
        None => {
            ctx.login(http, move |pipelines| {
                if let Err(err) = dispatch(&pipelines, command) {
                    tracing::error!(error = %format!("{err:#}"), "Command could not start");
                }
            })?;
        }
    }

    control.run_until_idle().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bulk_operation() {
        assert_eq!(
            parse_bulk_operation("Upsert", Some("External_Id__c".into())).unwrap(),
            BulkOperation::Upsert {
                external_id_field: "External_Id__c".into()
            }
        );
        assert_eq!(parse_bulk_operation("delete", Some("x".into())).unwrap(), BulkOperation::Delete);
        assert!(parse_bulk_operation("merge", None).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["sf-workbench", "--workspace", "/tmp/p", "save", "ApexClass", "Foo", "Foo.cls", "--check-only"])
            .unwrap();
        assert_eq!(cli.workspace.as_deref(), Some(Path::new("/tmp/p")));
        assert!(matches!(cli.command, Command::Save { check_only: true, .. }));

        assert!(Cli::try_parse_from(["sf-workbench", "close-jobs"]).is_err());
    }

    #[test]
    fn test_timeouts_reach_the_configs() {
        let cli = Cli::try_parse_from([
            "sf-workbench",
            "query",
            "SELECT Id FROM Account",
            "--operation-timeout",
            "90",
            "--connect-timeout",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.orchestrator_config().operation_timeout, Some(Duration::from_secs(90)));
        assert!(cli.orchestrator_config().poll_timeout.is_none());
        assert_eq!(cli.client_config().connect_timeout, Duration::from_secs(5));
        assert!(!cli.client_config().enable_tracing);
    }

    #[test]
    fn test_data_template_defaults_to_master() {
        let cli = Cli::try_parse_from(["sf-workbench", "data-template", "Account"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::DataTemplate { ref recordtype, .. } if recordtype == "Master"
        ));
    }
}
