//! REST and Tooling resource calls: queries, describes, CRUD.

use serde_json::Value;
use tracing::instrument;

use crate::envelope::ApiResult;
use crate::error::Result;
use crate::request::RequestMethod;

impl super::SalesforceApi {
    /// Execute a SOQL query, first page only.
    ///
    /// `tooling` selects the Tooling API query endpoint.
    #[instrument(skip(self))]
    pub async fn query(&self, soql: &str, tooling: bool) -> ApiResult {
        let url = self.query_url(tooling);
        self.send(self.request(RequestMethod::Get, url).query("q", soql))
            .await
    }

    /// Execute a SOQL query and follow `nextRecordsUrl` until done.
    ///
    /// The envelope body has the usual query shape with every page's records
    /// merged into `records`.
    #[instrument(skip(self))]
    pub async fn query_all(&self, soql: &str, tooling: bool) -> ApiResult {
        ApiResult::from_outcome(self.query_all_records(soql, tooling).await)
    }

    pub(crate) async fn query_all_records(&self, soql: &str, tooling: bool) -> Result<Value> {
        let url = self.query_url(tooling);
        let mut page = self
            .send_json(self.request(RequestMethod::Get, url).query("q", soql))
            .await?;
        let mut records: Vec<Value> = take_records(&mut page);

        loop {
            let done = page.get("done").and_then(Value::as_bool).unwrap_or(true);
            let next = match page.get("nextRecordsUrl").and_then(Value::as_str) {
                Some(next) if !done => next.to_string(),
                _ => break,
            };
            page = self
                .send_json(self.request(RequestMethod::Get, self.rest_url(&next)))
                .await?;
            records.extend(take_records(&mut page));
        }

        Ok(serde_json::json!({
            "totalSize": records.len(),
            "done": true,
            "records": records,
        }))
    }

    fn query_url(&self, tooling: bool) -> String {
        if tooling {
            self.tooling_url("query")
        } else {
            self.rest_url("query")
        }
    }

    /// Describe global; the body lists every sobject under `sobjects`.
    #[instrument(skip(self))]
    pub async fn describe_global(&self) -> ApiResult {
        self.send(self.request(RequestMethod::Get, self.rest_url("sobjects")))
            .await
    }

    /// Full describe of one sobject.
    #[instrument(skip(self))]
    pub async fn describe_sobject(&self, sobject: &str) -> ApiResult {
        let url = self.rest_url(&format!("sobjects/{}/describe", urlencoding::encode(sobject)));
        self.send(self.request(RequestMethod::Get, url)).await
    }

    /// Build a `SELECT <every field> FROM <sobject>` statement from a describe.
    #[instrument(skip(self))]
    pub async fn combine_soql(&self, sobject: &str) -> ApiResult {
        let describe = self.describe_sobject(sobject).await;
        if describe.is_failure() {
            return describe;
        }
        let fields: Vec<&str> = describe
            .get("fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        let soql = format!("SELECT {} FROM {}", fields.join(", "), sobject);
        ApiResult::ok(200, serde_json::json!({ "sobject": sobject, "soql": soql }))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, path: &str) -> ApiResult {
        self.send(self.request(RequestMethod::Get, self.rest_url(path)))
            .await
    }

    #[instrument(skip(self, body))]
    pub async fn post(&self, path: &str, body: Value) -> ApiResult {
        self.send(
            self.request(RequestMethod::Post, self.rest_url(path))
                .json_value(body),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> ApiResult {
        self.send(self.request(RequestMethod::Delete, self.rest_url(path)))
            .await
    }

    /// Fetch a blob/body resource (log body, static resource body) as text.
    ///
    /// The envelope body is a JSON string holding the raw content.
    #[instrument(skip(self))]
    pub async fn retrieve_body(&self, path: &str) -> ApiResult {
        let request = self
            .request(RequestMethod::Get, self.rest_url(path))
            .header("Accept", "*/*");
        match self.send_raw(request).await {
            Ok(response) => ApiResult::ok(response.status, Value::String(response.text)),
            Err(err) => ApiResult::from_error(&err),
        }
    }

    /// Send an arbitrary REST request, as typed into a REST explorer.
    #[instrument(skip(self, body))]
    pub async fn execute_raw(&self, method: RequestMethod, path: &str, body: Option<Value>) -> ApiResult {
        let mut request = self.request(method, self.rest_url(path));
        if let Some(body) = body {
            request = request.json_value(body);
        }
        self.send(request).await
    }
}

fn take_records(page: &mut Value) -> Vec<Value> {
    match page.get_mut("records").map(Value::take) {
        Some(Value::Array(records)) => records,
        _ => Vec::new(),
    }
}
