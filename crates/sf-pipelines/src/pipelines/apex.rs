//! Query, anonymous Apex, REST explorer and debug log pipelines.

use busbar_sf_client::{security::soql, ApiResult, RequestMethod};
use busbar_sf_orchestrator::Operation;
use serde_json::Value;
use tracing::instrument;

use super::Pipelines;
use crate::error::{Error, ErrorKind, Result};
use crate::format;

pub const QUERY_VIEW: &str = "Execute Query Result";
pub const ANONYMOUS_VIEW: &str = "Execute Anonymous Result";
pub const DEBUG_LOGS_VIEW: &str = "Debug Logs";
pub const DEBUG_LOG_DETAIL_VIEW: &str = "Debug Log Detail";

/// What the REST explorer can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestOperation {
    Query,
    ToolingQuery,
    QueryAll,
    RetrieveBody,
    Method(RequestMethod),
}

impl RestOperation {
    /// Parse an operation as listed in the explorer ("Get", "Tooling Query", ...).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Query" => Some(RestOperation::Query),
            "Tooling Query" => Some(RestOperation::ToolingQuery),
            "Query All" => Some(RestOperation::QueryAll),
            "Retrieve Body" => Some(RestOperation::RetrieveBody),
            other => RequestMethod::parse(other).map(RestOperation::Method),
        }
    }

    fn name(&self) -> String {
        match self {
            RestOperation::Query => "Query".to_string(),
            RestOperation::ToolingQuery => "Tooling Query".to_string(),
            RestOperation::QueryAll => "Query All".to_string(),
            RestOperation::RetrieveBody => "Retrieve Body".to_string(),
            RestOperation::Method(method) => format!("{method:?}"),
        }
    }
}

impl Pipelines {
    /// Run a SOQL query and show the raw result.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn execute_query(&self, soql: &str) -> Operation<ApiResult> {
        let api = self.api.clone();
        let query = soql.to_string();
        let this = self.clone();
        let soql = soql.to_string();

        self.ctx.single(
            "Execute Query",
            "Execute Query Succeed",
            async move { api.query(&query, false).await },
            move |result| {
                this.ctx.host().show_view(QUERY_VIEW, &format::pretty(&result.body));
                this.remember("query", "execute_query", &soql);
            },
        )
    }

    #[instrument(skip(self, apex), fields(org = %self.org()))]
    pub fn execute_anonymous(&self, apex: &str) -> Operation<ApiResult> {
        let api = self.api.clone();
        let script = apex.to_string();
        let apex = apex.to_string();
        let this = self.clone();

        self.ctx.single(
            "Execute Anonymous",
            "Execute Anonymous Succeed",
            async move { api.execute_anonymous(&script).await },
            move |result| {
                this.ctx
                    .host()
                    .show_view(ANONYMOUS_VIEW, &format::execute_anonymous(&result.body));
                this.remember("anonymous", "execute_anonymous", &apex);
            },
        )
    }

    /// Send one request from the REST explorer and show the response.
    #[instrument(skip(self, data), fields(org = %self.org()))]
    pub fn execute_rest_test(&self, operation: &str, url: &str, data: Option<Value>) -> Result<Operation<ApiResult>> {
        let operation = RestOperation::parse(operation).ok_or_else(|| {
            Error::new(ErrorKind::Api(format!("unsupported REST operation {operation}")))
        })?;
        let progress = format!("Execute Rest {} Test", operation.name());
        let view = format!("Execute Rest {} Result", operation.name());
        let api = self.api.clone();
        let url = url.to_string();
        let this = self.clone();

        Ok(self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            async move {
                match operation {
                    RestOperation::Query => api.query(&url, false).await,
                    RestOperation::ToolingQuery => api.query(&url, true).await,
                    RestOperation::QueryAll => api.query_all(&url, false).await,
                    RestOperation::RetrieveBody => api.retrieve_body(&url).await,
                    RestOperation::Method(method) => api.execute_raw(method, &url, data).await,
                }
            },
            move |result| {
                let text = match &result.body {
                    Value::String(raw) => raw.clone(),
                    body => format::pretty(body),
                };
                this.ctx.host().show_view(&view, &text);
            },
        ))
    }

    /// Resolve a user by name through the users lookup, then
    /// [`Pipelines::fetch_logs`].
    pub fn fetch_user_logs(&self, user: &str) -> Operation<std::result::Result<String, String>> {
        let lookup = self.clone();
        let this = self.clone();
        let name = user.to_string();
        let user = user.to_string();

        self.after_lookup(
            format!("Find User {user}"),
            async move { lookup.resolve_user(&name).await },
            move |user_id| {
                this.fetch_logs(&user, &user_id);
            },
        )
    }

    /// Resolve a user by name through the users lookup, then
    /// [`Pipelines::create_debug_log`].
    pub fn create_user_debug_log(&self, user: &str) -> Operation<std::result::Result<String, String>> {
        let lookup = self.clone();
        let this = self.clone();
        let name = user.to_string();
        let user = user.to_string();

        self.after_lookup(
            format!("Find User {user}"),
            async move { lookup.resolve_user(&name).await },
            move |user_id| {
                this.create_debug_log(&user, &user_id);
            },
        )
    }

    /// List the latest debug logs of a user.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn fetch_logs(&self, user_name: &str, user_id: &str) -> Operation<ApiResult> {
        let query = format!(
            "SELECT Id,LogUserId,LogLength,Request,Operation,Application,Status,\
             DurationMilliseconds,StartTime,Location FROM ApexLog \
             WHERE LogUserId='{}' ORDER BY StartTime LIMIT {}",
            soql::escape_string(user_id),
            self.ctx.settings().last_n_logs
        );
        let progress = format!("List Debug Logs for {user_name}");
        let api = self.api.clone();
        let this = self.clone();

        self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            async move { api.query_all(&query, false).await },
            move |result| {
                this.ctx
                    .host()
                    .show_view(DEBUG_LOGS_VIEW, &format::debug_logs(result.records()));
            },
        )
    }

    /// Turn on debug logging for a user.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn create_debug_log(&self, user_name: &str, user_id: &str) -> Operation<ApiResult> {
        let progress = format!("Create Debug Log for {user_name}");
        let api = self.api.clone();
        let user_id = user_id.to_string();
        let user_name = user_name.to_string();
        let this = self.clone();

        self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            async move { api.create_trace_flag(&user_id).await },
            move |result| {
                let until = result
                    .get("expirationDate")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                this.ctx
                    .announce(format!("{user_name}: debug log enabled until {until}"));
            },
        )
    }

    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn view_debug_log_detail(&self, log_id: &str) -> Operation<ApiResult> {
        let progress = format!("Get Log Detail of {log_id}");
        let url = format!("sobjects/ApexLog/{log_id}/Body");
        let api = self.api.clone();
        let this = self.clone();

        self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            async move { api.retrieve_body(&url).await },
            move |result| {
                let body = result.body.as_str().unwrap_or_default();
                this.ctx.host().show_view(DEBUG_LOG_DETAIL_VIEW, body);
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_operation_parse() {
        assert_eq!(RestOperation::parse("Tooling Query"), Some(RestOperation::ToolingQuery));
        assert_eq!(
            RestOperation::parse("Patch"),
            Some(RestOperation::Method(RequestMethod::Patch))
        );
        assert_eq!(RestOperation::parse("Head"), None);
        assert_eq!(RestOperation::Method(RequestMethod::Get).name(), "Get");
    }
}
