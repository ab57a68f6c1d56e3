//! Collaborators the pipelines need from the host editor.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use busbar_sf_client::OrgIdentity;
use busbar_sf_orchestrator::{ProgressEvent, ProgressSink};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::completions::SObjectCompletions;
use crate::error::Result;
use crate::registry::ComponentMetadata;

/// The editor surface pipelines render into.
pub trait Host: Send + Sync {
    /// A line in the console panel.
    fn console(&self, line: &str);

    /// Transient status bar message.
    fn status(&self, message: &str);

    /// Open a new view showing `text`.
    fn show_view(&self, name: &str, text: &str);

    /// Append to the named view, creating it if needed.
    fn append_view(&self, name: &str, text: &str);

    fn open_file(&self, path: &Path);

    /// Close the active view.
    fn close_active(&self);
}

/// Everything a [`MemoryHost`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Console(String),
    Status(String),
    ShowView { name: String, text: String },
    AppendView { name: String, text: String },
    OpenFile(PathBuf),
    CloseActive,
}

/// Records host calls; used headless and in tests.
#[derive(Debug, Default)]
pub struct MemoryHost {
    events: Mutex<Vec<HostEvent>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: HostEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn console_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HostEvent::Console(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HostEvent::Status(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Text of the named view: the last `show_view` plus later appends.
    pub fn view(&self, name: &str) -> Option<String> {
        let mut text: Option<String> = None;
        for event in self.events() {
            match event {
                HostEvent::ShowView { name: n, text: t } if n == name => text = Some(t),
                HostEvent::AppendView { name: n, text: t } if n == name => {
                    text.get_or_insert_with(String::new).push_str(&t)
                }
                _ => {}
            }
        }
        text
    }
}

impl Host for MemoryHost {
    fn console(&self, line: &str) {
        self.record(HostEvent::Console(line.to_string()));
    }

    fn status(&self, message: &str) {
        self.record(HostEvent::Status(message.to_string()));
    }

    fn show_view(&self, name: &str, text: &str) {
        self.record(HostEvent::ShowView {
            name: name.to_string(),
            text: text.to_string(),
        });
    }

    fn append_view(&self, name: &str, text: &str) {
        self.record(HostEvent::AppendView {
            name: name.to_string(),
            text: text.to_string(),
        });
    }

    fn open_file(&self, path: &Path) {
        self.record(HostEvent::OpenFile(path.to_path_buf()));
    }

    fn close_active(&self) {
        self.record(HostEvent::CloseActive);
    }
}

/// Writes everything to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHost;

impl Host for ConsoleHost {
    fn console(&self, line: &str) {
        println!("{line}");
    }

    fn status(&self, message: &str) {
        eprintln!("{message}");
    }

    fn show_view(&self, name: &str, text: &str) {
        println!("==== {name} ====\n{text}");
    }

    fn append_view(&self, _name: &str, text: &str) {
        println!("{text}");
    }

    fn open_file(&self, path: &Path) {
        println!("{}", path.display());
    }

    fn close_active(&self) {}
}

/// Renders progress into the host: frames and outcomes on the status bar,
/// failures also in the console.
pub struct HostSink {
    host: Arc<dyn Host>,
}

impl HostSink {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }
}

impl ProgressSink for HostSink {
    fn render(&self, event: &ProgressEvent) {
        let line = event.to_string();
        self.host.status(&line);
        if let ProgressEvent::Failed { .. } = event {
            warn!(%line, "Pipeline step failed");
            self.host.console(&line);
        }
    }
}

/// Persistence for per-org documents the pipelines produce.
pub trait MetadataStore: Send + Sync {
    fn load_components(&self, org: &OrgIdentity) -> Result<Option<ComponentMetadata>>;

    fn save_components(&self, org: &OrgIdentity, metadata: &ComponentMetadata) -> Result<()>;

    fn load_completions(&self, org: &OrgIdentity) -> Result<Option<SObjectCompletions>>;

    fn save_completions(&self, org: &OrgIdentity, completions: &SObjectCompletions) -> Result<()>;

    /// Record the compiler's symbol table of a saved component.
    fn save_symbol_table(&self, org: &OrgIdentity, component: &str, table: &Value) -> Result<()>;

    fn load_symbol_tables(&self, org: &OrgIdentity) -> Result<Option<serde_json::Map<String, Value>>>;
}

/// JSON files under a base directory, one per org and document.
///
/// ```text
/// <base>/component_metadata/<org>.json
/// <base>/sobjects_completion/<org>.json
/// <base>/symbol_table/<org>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    base_path: PathBuf,
}

impl JsonMetadataStore {
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            base_path: path.as_ref().to_path_buf(),
        }
    }

    fn document_path(&self, document: &str, org: &OrgIdentity) -> PathBuf {
        let safe_key: String = org
            .as_str()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '@' { c } else { '_' })
            .collect();
        self.base_path.join(document).join(format!("{safe_key}.json"))
    }

    fn read<T: DeserializeOwned>(&self, document: &str, org: &OrgIdentity) -> Result<Option<T>> {
        let path = self.document_path(document, org);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn write<T: Serialize>(&self, document: &str, org: &OrgIdentity, value: &T) -> Result<()> {
        let path = self.document_path(document, org);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        debug!(path = %path.display(), "Stored {document}");
        Ok(())
    }
}

impl MetadataStore for JsonMetadataStore {
    fn load_components(&self, org: &OrgIdentity) -> Result<Option<ComponentMetadata>> {
        self.read("component_metadata", org)
    }

    fn save_components(&self, org: &OrgIdentity, metadata: &ComponentMetadata) -> Result<()> {
        self.write("component_metadata", org, metadata)
    }

    fn load_completions(&self, org: &OrgIdentity) -> Result<Option<SObjectCompletions>> {
        self.read("sobjects_completion", org)
    }

    fn save_completions(&self, org: &OrgIdentity, completions: &SObjectCompletions) -> Result<()> {
        self.write("sobjects_completion", org, completions)
    }

    fn save_symbol_table(&self, org: &OrgIdentity, component: &str, table: &Value) -> Result<()> {
        let mut tables = self.load_symbol_tables(org)?.unwrap_or_default();
        tables.insert(component.to_lowercase(), table.clone());
        self.write("symbol_table", org, &tables)
    }

    fn load_symbol_tables(&self, org: &OrgIdentity) -> Result<Option<serde_json::Map<String, Value>>> {
        self.read("symbol_table", org)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentAttributes;
    use serde_json::json;

    #[test]
    fn test_memory_host_views() {
        let host = MemoryHost::new();
        host.show_view("Test Result", "first");
        host.append_view("Test Result", "\nsecond");
        host.append_view("Other", "x");

        assert_eq!(host.view("Test Result").as_deref(), Some("first\nsecond"));
        assert_eq!(host.view("Other").as_deref(), Some("x"));
        assert_eq!(host.view("Missing"), None);
    }

    #[test]
    fn test_host_sink_reports_failures_in_console() {
        let host = Arc::new(MemoryHost::new());
        let sink = HostSink::new(host.clone());
        sink.render(&ProgressEvent::Succeeded { label: "Saved".into() });
        sink.render(&ProgressEvent::Failed {
            label: "Saving Foo".into(),
            summary: "INVALID_SESSION_ID: expired (status 401)".into(),
        });

        assert_eq!(host.statuses().len(), 2);
        assert_eq!(
            host.console_lines(),
            vec!["Saving Foo failed: INVALID_SESSION_ID: expired (status 401)".to_string()]
        );
    }

    #[test]
    fn test_json_store_round_trips_per_org() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetadataStore::with_path(dir.path());
        let a = OrgIdentity::new("a@example.com");
        let b = OrgIdentity::new("b@example.com");

        assert!(store.load_components(&a).unwrap().is_none());

        let mut metadata = ComponentMetadata::new();
        metadata.insert(
            "Foo",
            ComponentAttributes {
                id: "01p1".into(),
                url: "sobjects/ApexClass/01p1".into(),
                body: "Body".into(),
                extension: ".cls".into(),
                component_type: "ApexClass".into(),
                is_test: false,
            },
        );
        store.save_components(&a, &metadata).unwrap();

        assert_eq!(store.load_components(&a).unwrap(), Some(metadata));
        assert!(store.load_components(&b).unwrap().is_none());
    }

    #[test]
    fn test_symbol_tables_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetadataStore::with_path(dir.path());
        let org = OrgIdentity::new("a@example.com");

        store.save_symbol_table(&org, "Foo", &json!({"name": "Foo"})).unwrap();
        store.save_symbol_table(&org, "Bar", &json!({"name": "Bar"})).unwrap();

        let tables = store.load_symbol_tables(&org).unwrap().unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables["foo"]["name"], "Foo");
    }
}
