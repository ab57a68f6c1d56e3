//! Plugin settings.
//!
//! Loaded from a JSON settings file; credentials can be supplied or
//! overridden through the environment:
//!
//! | Variable           | Field           |
//! |--------------------|-----------------|
//! | `SF_USERNAME`      | `username`      |
//! | `SF_PASSWORD`      | `password`      |
//! | `SF_CLIENT_ID`     | `client_id`     |
//! | `SF_CLIENT_SECRET` | `client_secret` |
//! | `SF_LOGIN_URL`     | `login_url`     |
//! | `SF_INSTANCE_URL`  | `instance_url`  |
//! | `SF_ACCESS_TOKEN`  | `access_token`  |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use busbar_sf_client::{LoginRequest, OrgIdentity, Session, DEFAULT_API_VERSION};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

/// How one component type is queried, stored and named locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTypeSettings {
    /// Query listing every component of the type.
    pub soql: String,
    /// Field holding the component source.
    pub body: String,
    /// Local file extension, with the dot.
    pub extension: String,
    /// Workspace folder the components are written to.
    pub folder: String,
}

impl ComponentTypeSettings {
    fn new(soql: &str, body: &str, extension: &str, folder: &str) -> Self {
        Self {
            soql: soql.to_string(),
            body: body.to_string(),
            extension: extension.to_string(),
            folder: folder.to_string(),
        }
    }
}

fn default_component_settings() -> BTreeMap<String, ComponentTypeSettings> {
    BTreeMap::from([
        (
            "ApexClass".to_string(),
            ComponentTypeSettings::new(
                "SELECT Id, Name, Body FROM ApexClass WHERE NamespacePrefix = null",
                "Body",
                ".cls",
                "classes",
            ),
        ),
        (
            "ApexTrigger".to_string(),
            ComponentTypeSettings::new(
                "SELECT Id, Name, Body FROM ApexTrigger WHERE NamespacePrefix = null",
                "Body",
                ".trigger",
                "triggers",
            ),
        ),
        (
            "ApexPage".to_string(),
            ComponentTypeSettings::new(
                "SELECT Id, Name, Markup FROM ApexPage WHERE NamespacePrefix = null",
                "Markup",
                ".page",
                "pages",
            ),
        ),
        (
            "ApexComponent".to_string(),
            ComponentTypeSettings::new(
                "SELECT Id, Name, Markup FROM ApexComponent WHERE NamespacePrefix = null",
                "Markup",
                ".component",
                "components",
            ),
        ),
        (
            "StaticResource".to_string(),
            ComponentTypeSettings::new(
                "SELECT Id, Name, Body, ContentType FROM StaticResource WHERE NamespacePrefix = null",
                "Body",
                ".resource",
                "staticresources",
            ),
        ),
    ])
}

fn default_component_types() -> Vec<String> {
    ["ApexClass", "ApexTrigger", "ApexPage", "ApexComponent", "StaticResource"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_allowed_sobjects() -> Vec<String> {
    [
        "Account",
        "Contact",
        "Lead",
        "Opportunity",
        "Case",
        "Campaign",
        "User",
        "Task",
        "Event",
        "Product2",
        "Pricebook2",
        "PricebookEntry",
        "Quote",
        "Contract",
        "Order",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Settings for one project.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub login_url: String,
    pub api_version: String,
    /// Pre-established session; skips the login pipeline when set with
    /// `access_token`.
    pub instance_url: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Root directory of the local project.
    pub workspace: PathBuf,
    /// Component types downloaded by a new project.
    pub component_types: Vec<String>,
    /// Per-type query and storage settings.
    pub components: BTreeMap<String, ComponentTypeSettings>,
    /// Standard sobjects included in completions; custom ones always are.
    pub allowed_sobjects: Vec<String>,
    /// Also retrieve static resource bodies after a new project.
    pub get_static_resource_body: bool,
    /// Completion entries show `Name(Label)` instead of `Name`.
    pub display_field_name_and_label: bool,
    /// Print the token response after login.
    pub output_session_info: bool,
    /// How many debug logs the log listing shows.
    pub last_n_logs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            instance_url: None,
            access_token: None,
            workspace: PathBuf::from("."),
            component_types: default_component_types(),
            components: default_component_settings(),
            allowed_sobjects: default_allowed_sobjects(),
            get_static_resource_body: false,
            display_field_name_and_label: true,
            output_session_info: false,
            last_n_logs: 20,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("login_url", &self.login_url)
            .field("api_version", &self.api_version)
            .field("instance_url", &self.instance_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("workspace", &self.workspace)
            .field("component_types", &self.component_types)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Read settings from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(
                ErrorKind::Settings(format!("cannot read {}", path.display())),
                e,
            )
        })?;
        let settings: Settings = serde_json::from_str(&text)?;
        Ok(settings.with_env_overrides())
    }

    /// Settings file in the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("busbar-sf-workbench").join("settings.json"))
    }

    /// Apply `SF_*` environment variables on top of these settings.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = var("SF_USERNAME") {
            self.username = value;
        }
        if let Some(value) = var("SF_PASSWORD") {
            self.password = value;
        }
        if let Some(value) = var("SF_CLIENT_ID") {
            self.client_id = value;
        }
        if let Some(value) = var("SF_CLIENT_SECRET") {
            self.client_secret = value;
        }
        if let Some(value) = var("SF_LOGIN_URL") {
            self.login_url = value;
        }
        if let Some(value) = var("SF_INSTANCE_URL") {
            self.instance_url = Some(value);
        }
        if let Some(value) = var("SF_ACCESS_TOKEN") {
            self.access_token = Some(value);
        }
        self
    }

    pub fn org(&self) -> OrgIdentity {
        OrgIdentity::new(self.username.clone())
    }

    /// Query/storage settings of a component type.
    pub fn component(&self, component_type: &str) -> Result<&ComponentTypeSettings> {
        self.components.get(component_type).ok_or_else(|| {
            Error::new(ErrorKind::Settings(format!(
                "no settings for component type {component_type}"
            )))
        })
    }

    /// Component type stored in a workspace folder.
    pub fn type_for_folder(&self, folder: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|(_, settings)| settings.folder == folder)
            .map(|(name, _)| name.as_str())
    }

    /// Local directory of a component type.
    pub fn component_dir(&self, component_type: &str) -> Result<PathBuf> {
        Ok(self.workspace.join(&self.component(component_type)?.folder))
    }

    pub fn login_request(&self) -> Result<LoginRequest> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::new(ErrorKind::Settings(
                "username and password are required to log in".to_string(),
            )));
        }
        Ok(LoginRequest {
            login_url: self.login_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            api_version: self.api_version.clone(),
        })
    }

    /// A session from `instance_url` + `access_token`, when both are set.
    pub fn session(&self) -> Option<Session> {
        match (&self.instance_url, &self.access_token) {
            (Some(instance_url), Some(token)) => Some(
                Session::new(self.org(), instance_url.clone(), token.clone())
                    .with_api_version(self.api_version.clone()),
            ),
            _ => None,
        }
    }
}
