//! Metadata API (SOAP) deploy and retrieve.
//!
//! Both are asynchronous on the server: the call returns a process id which
//! is polled with `checkDeployStatus` / `checkRetrieveStatus` until `done`.

use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

use crate::envelope::ApiResult;
use crate::error::{Error, ErrorKind, Result};
use crate::request::RequestMethod;
use crate::security::xml;

const METADATA_NS: &str = "http://soap.sforce.com/2006/04/metadata";

/// Options for a deployment.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub check_only: bool,
    pub rollback_on_error: bool,
    pub single_package: bool,
    pub ignore_warnings: bool,
    pub run_all_tests: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            check_only: false,
            rollback_on_error: true,
            single_package: true,
            ignore_warnings: true,
            run_all_tests: false,
        }
    }
}

/// One `<types>` entry of a retrieve manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageType {
    pub name: String,
    pub members: Vec<String>,
}

impl PackageType {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    /// Every component of a type.
    pub fn all(name: impl Into<String>) -> Self {
        Self::new(name, vec!["*".to_string()])
    }

    fn to_xml(&self) -> String {
        let members: String = self
            .members
            .iter()
            .map(|m| format!("<members>{}</members>", xml::escape(m)))
            .collect();
        format!("<types>{members}<name>{}</name></types>", xml::escape(&self.name))
    }
}

impl super::SalesforceApi {
    fn metadata_url(&self) -> String {
        format!(
            "{}/services/Soap/m/{}",
            self.session().instance_url(),
            self.session().api_version()
        )
    }

    fn envelope(&self, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <soap:Header>
    <SessionHeader xmlns="{METADATA_NS}">
      <sessionId>{session_id}</sessionId>
    </SessionHeader>
  </soap:Header>
  <soap:Body>
    {body}
  </soap:Body>
</soap:Envelope>"#,
            session_id = xml::escape(self.session().access_token()),
        )
    }

    async fn soap_call(&self, action: &str, body: &str) -> Result<String> {
        let request = self
            .request(RequestMethod::Post, self.metadata_url())
            .header("SOAPAction", action)
            .text("text/xml;charset=UTF-8", self.envelope(body));
        let response = self.http().execute(&request).await?;

        if let Some(fault) = parse_soap_fault(&response.text) {
            return Err(Error::new(fault));
        }
        if !response.is_success() {
            return Err(Error::new(ErrorKind::Http {
                status: response.status,
                message: response.text,
            }));
        }
        Ok(response.text)
    }

    /// Deploy a zipped package and wait for the deployment to finish.
    ///
    /// The body reports `id`, `status`, `success`, the component counts and
    /// `componentFailures` (`fileName`, `problem`, `lineNumber`).
    #[instrument(skip(self, zip), fields(bytes = zip.len()))]
    pub async fn deploy(&self, zip: &[u8], options: &DeployOptions) -> ApiResult {
        ApiResult::from_outcome(self.deploy_inner(zip, options).await)
    }

    async fn deploy_inner(&self, zip: &[u8], options: &DeployOptions) -> Result<Value> {
        let body = format!(
            r#"<deploy xmlns="{METADATA_NS}">
      <ZipFile>{zip}</ZipFile>
      <DeployOptions>
        <checkOnly>{check_only}</checkOnly>
        <ignoreWarnings>{ignore_warnings}</ignoreWarnings>
        <rollbackOnError>{rollback}</rollbackOnError>
        <runAllTests>{run_all_tests}</runAllTests>
        <singlePackage>{single_package}</singlePackage>
      </DeployOptions>
    </deploy>"#,
            zip = general_purpose::STANDARD.encode(zip),
            check_only = options.check_only,
            ignore_warnings = options.ignore_warnings,
            rollback = options.rollback_on_error,
            run_all_tests = options.run_all_tests,
            single_package = options.single_package,
        );
        let response = self.soap_call("deploy", &body).await?;
        let id = require_element(&response, "id")?;
        debug!(id, "Deploy started");

        let status_body = format!(
            r#"<checkDeployStatus xmlns="{METADATA_NS}">
      <asyncProcessId>{}</asyncProcessId>
      <includeDetails>true</includeDetails>
    </checkDeployStatus>"#,
            xml::escape(&id)
        );
        let result = self.wait_until_done("checkDeployStatus", &status_body).await?;

        let failures: Vec<Value> = extract_elements(&result, "componentFailures")
            .iter()
            .map(|failure| {
                json!({
                    "fileName": extract_element(failure, "fileName"),
                    "problem": extract_element(failure, "problem").map(|p| xml::unescape(&p)),
                    "problemType": extract_element(failure, "problemType"),
                    "lineNumber": extract_element(failure, "lineNumber")
                        .and_then(|n| n.parse::<i64>().ok()),
                })
            })
            .collect();

        let count = |tag: &str| {
            extract_element(&result, tag)
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Ok(json!({
            "id": id,
            "status": extract_element(&result, "status"),
            "success": extract_element(&result, "success").as_deref() == Some("true"),
            "numberComponentsDeployed": count("numberComponentsDeployed"),
            "numberComponentErrors": count("numberComponentErrors"),
            "numberComponentsTotal": count("numberComponentsTotal"),
            "errorMessage": extract_element(&result, "errorMessage").map(|m| xml::unescape(&m)),
            "componentFailures": failures,
        }))
    }

    /// Retrieve the listed metadata types and wait for the zip.
    ///
    /// The body carries `zipFile` (base64), `status` and `messages`.
    #[instrument(skip(self, types), fields(types = types.len()))]
    pub async fn retrieve(&self, types: &[PackageType]) -> ApiResult {
        ApiResult::from_outcome(self.retrieve_inner(types).await)
    }

    async fn retrieve_inner(&self, types: &[PackageType]) -> Result<Value> {
        let manifest: String = types.iter().map(PackageType::to_xml).collect();
        let body = format!(
            r#"<retrieve xmlns="{METADATA_NS}">
      <retrieveRequest>
        <apiVersion>{api_version}</apiVersion>
        <singlePackage>true</singlePackage>
        <unpackaged>{manifest}<version>{api_version}</version></unpackaged>
      </retrieveRequest>
    </retrieve>"#,
            api_version = self.session().api_version(),
        );
        let response = self.soap_call("retrieve", &body).await?;
        let id = require_element(&response, "id")?;
        debug!(id, "Retrieve started");

        let status_body = format!(
            r#"<checkRetrieveStatus xmlns="{METADATA_NS}">
      <asyncProcessId>{}</asyncProcessId>
      <includeZip>true</includeZip>
    </checkRetrieveStatus>"#,
            xml::escape(&id)
        );
        let result = self.wait_until_done("checkRetrieveStatus", &status_body).await?;

        let status = extract_element(&result, "status");
        if status.as_deref() == Some("Failed") {
            let message = extract_element(&result, "errorMessage")
                .map(|m| xml::unescape(&m))
                .unwrap_or_else(|| "retrieve failed".to_string());
            return Err(Error::new(ErrorKind::JobFailed(message)));
        }

        let messages: Vec<Value> = extract_elements(&result, "messages")
            .iter()
            .map(|m| {
                json!({
                    "fileName": extract_element(m, "fileName"),
                    "problem": extract_element(m, "problem").map(|p| xml::unescape(&p)),
                })
            })
            .collect();

        Ok(json!({
            "id": id,
            "status": status,
            "zipFile": extract_element(&result, "zipFile").unwrap_or_default(),
            "messages": messages,
        }))
    }

    async fn wait_until_done(&self, action: &str, body: &str) -> Result<String> {
        let started = Instant::now();
        loop {
            let response = self.soap_call(action, body).await?;
            if extract_element(&response, "done").as_deref() == Some("true") {
                return Ok(response);
            }
            if started.elapsed() > self.job_max_wait() {
                return Err(Error::new(ErrorKind::Timeout));
            }
            sleep(self.job_poll_interval()).await;
        }
    }
}

fn parse_soap_fault(xml_text: &str) -> Option<ErrorKind> {
    if !xml_text.contains("faultcode") {
        return None;
    }
    let code = extract_element(xml_text, "faultcode")?;
    let message = extract_element(xml_text, "faultstring")
        .map(|m| xml::unescape(&m))
        .unwrap_or_else(|| "Unknown error".to_string());
    Some(ErrorKind::SoapFault { code, message })
}

fn require_element(xml_text: &str, tag: &str) -> Result<String> {
    extract_element(xml_text, tag).ok_or_else(|| {
        Error::new(ErrorKind::InvalidResponse(format!(
            "SOAP response has no <{tag}>"
        )))
    })
}

/// Text of the first `<tag>` element, with or without a namespace prefix.
pub(crate) fn extract_element(xml_text: &str, tag: &str) -> Option<String> {
    for open in [format!("<{tag}>"), format!("<sf:{tag}>"), format!("<met:{tag}>")] {
        let Some(start) = xml_text.find(&open) else {
            continue;
        };
        let content = &xml_text[start + open.len()..];
        let close = open.replacen('<', "</", 1);
        if let Some(end) = content.find(&close) {
            return Some(content[..end].to_string());
        }
    }
    None
}

/// Text of every `<tag>` element, in document order.
pub(crate) fn extract_elements(xml_text: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = xml_text;
    while let Some(start) = rest.find(&open) {
        let content = &rest[start + open.len()..];
        match content.find(&close) {
            Some(end) => {
                found.push(content[..end].to_string());
                rest = &content[end + close.len()..];
            }
            None => break,
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientConfig, OrgIdentity, SalesforceApi, Session};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> SalesforceApi {
        let session = Session::new(OrgIdentity::new("dev@example.com"), server.uri(), "tok")
            .with_api_version("62.0");
        let config = ClientConfig::builder()
            .without_retry()
            .with_job_poll_interval(Duration::from_millis(5))
            .build();
        SalesforceApi::new(session, config).unwrap()
    }

    fn soap(result: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope><soapenv:Body><result>{result}</result></soapenv:Body></soapenv:Envelope>"#
        )
    }

    #[test]
    fn test_extract_helpers() {
        let xml_text = "<a><id>09S1</id><messages><problem>x</problem></messages><messages><problem>y</problem></messages></a>";
        assert_eq!(extract_element(xml_text, "id").as_deref(), Some("09S1"));
        assert_eq!(extract_element(xml_text, "missing"), None);
        let messages = extract_elements(xml_text, "messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(extract_element(&messages[1], "problem").as_deref(), Some("y"));
    }

    #[test]
    fn test_package_type_xml() {
        let t = PackageType::new("ApexClass", vec!["A&B".into()]);
        assert_eq!(
            t.to_xml(),
            "<types><members>A&amp;B</members><name>ApexClass</name></types>"
        );
    }

    #[tokio::test]
    async fn test_retrieve_polls_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/Soap/m/62.0"))
            .and(header("SOAPAction", "retrieve"))
            .and(body_string_contains("<name>StaticResource</name>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(soap("<id>09S1</id><done>false</done>")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/Soap/m/62.0"))
            .and(header("SOAPAction", "checkRetrieveStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_string(soap(
                "<done>true</done><id>09S1</id><status>Succeeded</status><zipFile>UEsDBA==</zipFile>",
            )))
            .mount(&server)
            .await;

        let result = api(&server)
            .retrieve(&[PackageType::all("StaticResource")])
            .await;

        assert!(result.is_success(), "{:?}", result.error_message());
        assert_eq!(result.body["zipFile"], "UEsDBA==");
        assert_eq!(result.body["status"], "Succeeded");
    }

    #[tokio::test]
    async fn test_soap_fault_becomes_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/Soap/m/62.0"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                "<soapenv:Fault><faultcode>sf:INVALID_SESSION_ID</faultcode><faultstring>Invalid Session ID</faultstring></soapenv:Fault>",
            ))
            .mount(&server)
            .await;

        let result = api(&server).deploy(b"PK", &DeployOptions::default()).await;

        assert!(result.is_failure());
        assert_eq!(result.error.unwrap().error_code, "sf:INVALID_SESSION_ID");
    }

    #[tokio::test]
    async fn test_deploy_reports_component_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("SOAPAction", "deploy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(soap("<id>0Af1</id><done>false</done>")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("SOAPAction", "checkDeployStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_string(soap(
                "<done>true</done><id>0Af1</id><status>Failed</status><success>false</success>\
                 <numberComponentErrors>1</numberComponentErrors>\
                 <details><componentFailures><fileName>classes/A.cls</fileName>\
                 <lineNumber>4</lineNumber><problem>Unexpected token &apos;}&apos;</problem></componentFailures></details>",
            )))
            .mount(&server)
            .await;

        let result = api(&server).deploy(b"PK", &DeployOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(result.body["success"], false);
        assert_eq!(result.body["numberComponentErrors"], 1);
        assert_eq!(result.body["componentFailures"][0]["problem"], "Unexpected token '}'");
        assert_eq!(result.body["componentFailures"][0]["lineNumber"], 4);
    }
}
