//! The umbrella crate wired together the way the command-line host does it.

use std::sync::Arc;
use std::time::Duration;

use busbar_sf_workbench::pipelines::{MemoryHost, QUERY_VIEW};
use busbar_sf_workbench::{
    ClientConfig, JsonMetadataStore, Orchestrator, OrchestratorConfig, PipelineContext, Settings,
    SfHttpClient,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_resumed_session_runs_a_query_without_logging_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/query"))
        .and(query_param("q", "SELECT Id, Name FROM Account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "0011", "Name": "Acme"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        username: "dev@example.com".into(),
        login_url: server.uri(),
        api_version: "62.0".into(),
        instance_url: Some(server.uri()),
        access_token: Some("00Dxx!token".into()),
        workspace: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let (orchestrator, mut control) = Orchestrator::new(
        OrchestratorConfig::builder()
            .with_progress_interval(Duration::from_millis(20))
            .build(),
    );
    let host = Arc::new(MemoryHost::new());
    let store = Arc::new(JsonMetadataStore::with_path(dir.path().join(".workbench")));
    let ctx = PipelineContext::new(&orchestrator, settings, host.clone(), store);
    let http = SfHttpClient::new(ClientConfig::builder().without_retry().build()).unwrap();

    let pipelines = ctx.resume(http).expect("session from settings");
    pipelines.execute_query("SELECT Id, Name FROM Account");
    control.run_until_idle().await;

    let view = host.view(QUERY_VIEW).unwrap();
    assert!(view.contains("Acme"));
    assert!(dir.path().join(".history").join("query").exists());
}

#[test]
fn test_resume_needs_a_token() {
    let (orchestrator, _control) = Orchestrator::new(OrchestratorConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        username: "dev@example.com".into(),
        instance_url: Some("https://na1.salesforce.com".into()),
        ..Settings::default()
    };
    let ctx = PipelineContext::new(
        &orchestrator,
        settings,
        Arc::new(MemoryHost::new()),
        Arc::new(JsonMetadataStore::with_path(dir.path())),
    );
    let http = SfHttpClient::new(ClientConfig::default()).unwrap();

    assert!(ctx.resume(http).is_none());
}
