//! Pipelines driven end to end against a mock org.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use busbar_sf_client::{ClientConfig, OrgIdentity, SalesforceApi, Session, SfHttpClient};
use busbar_sf_orchestrator::{ControlLoop, Orchestrator, OrchestratorConfig};
use busbar_sf_pipelines::{
    ComponentAttributes, ComponentMetadata, HostEvent, JsonMetadataStore, MemoryHost, MetadataStore,
    PipelineContext, Pipelines, Settings, DEBUG_LOGS_VIEW, MASTER_RECORD_TYPE_ID, QUERY_VIEW,
    RUN_ALL_TEST_VIEW,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DATA: &str = "/services/data/v62.0";
const USERNAME: &str = "dev@example.com";

struct Fixture {
    _dir: TempDir,
    workspace: PathBuf,
    host: Arc<MemoryHost>,
    store: Arc<JsonMetadataStore>,
    ctx: PipelineContext,
    control: ControlLoop,
    http: SfHttpClient,
}

impl Fixture {
    fn new(server: &MockServer) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("project");
        let settings = Settings {
            username: USERNAME.into(),
            password: "secret".into(),
            login_url: server.uri(),
            api_version: "62.0".into(),
            workspace: workspace.clone(),
            component_types: vec!["ApexClass".into()],
            allowed_sobjects: vec!["Account".into()],
            ..Settings::default()
        };

        let (orchestrator, control) = Orchestrator::new(
            OrchestratorConfig::builder()
                .with_progress_interval(Duration::from_millis(20))
                .build(),
        );
        let host = Arc::new(MemoryHost::new());
        let store = Arc::new(JsonMetadataStore::with_path(dir.path().join(".workbench")));
        let ctx = PipelineContext::new(&orchestrator, settings, host.clone(), store.clone());
        let http = SfHttpClient::new(
            ClientConfig::builder()
                .without_retry()
                .with_job_poll_interval(Duration::from_millis(5))
                .build(),
        )
        .unwrap();

        Self {
            _dir: dir,
            workspace,
            host,
            store,
            ctx,
            control,
            http,
        }
    }

    fn pipelines(&self, server: &MockServer) -> Pipelines {
        let session = Session::new(OrgIdentity::new(USERNAME), server.uri(), "tok").with_api_version("62.0");
        Pipelines::new(
            self.ctx.clone(),
            SalesforceApi::from_parts(self.http.clone(), session),
        )
    }

    fn org(&self) -> OrgIdentity {
        OrgIdentity::new(USERNAME)
    }

    fn register(&self, name: &str, is_test: bool) {
        let mut metadata = self.store.load_components(&self.org()).unwrap().unwrap_or_default();
        metadata.insert(
            name,
            ComponentAttributes {
                id: format!("01p{name}"),
                url: format!("sobjects/ApexClass/01p{name}"),
                body: "Body".into(),
                extension: ".cls".into(),
                component_type: "ApexClass".into(),
                is_test,
            },
        );
        self.store.save_components(&self.org(), &metadata).unwrap();
    }

    fn console_contains(&self, needle: &str) -> bool {
        self.host.console_lines().iter().any(|line| line.contains(needle))
    }
}

async fn mount_describes(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/sobjects")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sobjects": [
                {"name": "Account", "custom": false, "layoutable": true},
                {"name": "Invoice__c", "custom": true, "layoutable": true},
                {"name": "AccountHistory", "custom": false}
            ]
        })))
        .mount(server)
        .await;
    for (name, field) in [("Account", "Industry"), ("Invoice__c", "Amount__c")] {
        Mock::given(method("GET"))
            .and(path(format!("{DATA}/sobjects/{name}/describe")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": name,
                "keyPrefix": "001",
                "fields": [
                    {"name": "Id", "label": "Record ID", "type": "id", "length": 18},
                    {"name": field, "label": field, "type": "string", "length": 40}
                ]
            })))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_login_then_new_project_downloads_components_and_completions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "00Dxx!token",
            "instance_url": server.uri(),
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 2,
            "done": true,
            "records": [
                {"Id": "01p1", "Name": "Invoice", "Body": "public class Invoice {}"},
                {"Id": "01p2", "Name": "InvoiceTest", "Body": "@isTest class InvoiceTest {}"}
            ]
        })))
        .mount(&server)
        .await;
    mount_describes(&server).await;

    let mut fixture = Fixture::new(&server);
    fixture
        .ctx
        .login(fixture.http.clone(), |pipelines| {
            pipelines.new_project().unwrap();
        })
        .unwrap();
    fixture.control.run_until_idle().await;

    let classes = fixture.workspace.join("classes");
    assert_eq!(
        std::fs::read_to_string(classes.join("Invoice.cls")).unwrap(),
        "public class Invoice {}"
    );
    assert!(classes.join("InvoiceTest.cls").exists());

    let registry = fixture.store.load_components(&fixture.org()).unwrap().unwrap();
    assert_eq!(registry.get("ApexClass", "Invoice").unwrap().id, "01p1");
    assert_eq!(registry.test_class_ids(), vec!["01p2".to_string()]);

    let completions = fixture.store.load_completions(&fixture.org()).unwrap().unwrap();
    assert!(completions.get("Account").is_some());
    assert!(completions.get("Invoice__c").is_some());
    assert!(completions.get("AccountHistory").is_none());

    assert!(fixture.console_contains("Login Succeed"));
    assert!(fixture.console_contains("All code are Downloaded."));
    assert!(fixture.console_contains("Sobjects completions local history are initiated."));
}

#[tokio::test]
async fn test_failed_login_stops_the_chain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "authentication failure"
        })))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    let reached = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = reached.clone();
    fixture
        .ctx
        .login(fixture.http.clone(), move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();
    fixture.control.run_until_idle().await;

    assert!(!reached.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!fixture.console_contains("Login Succeed"));
}

#[tokio::test]
async fn test_failed_describe_global_never_starts_describes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/sobjects")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!([{
            "errorCode": "UNKNOWN_EXCEPTION",
            "message": "boom"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/sobjects/Account/describe")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Account"})))
        .expect(0)
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    fixture.pipelines(&server).initiate_sobjects_completions();
    fixture.control.run_until_idle().await;

    assert!(fixture.store.load_completions(&fixture.org()).unwrap().is_none());
    assert!(!fixture.console_contains("Sobjects completions local history are initiated."));
}

#[tokio::test]
async fn test_save_of_a_component_in_flight_is_skipped() {
    let server = MockServer::start().await;
    let mut fixture = Fixture::new(&server);
    fixture.register("Invoice", false);
    let pipelines = fixture.pipelines(&server);

    let first = pipelines
        .save_component("ApexClass", "Invoice", "public class Invoice {}", false)
        .unwrap();
    let second = pipelines
        .save_component("ApexClass", "Invoice", "public class Invoice {}", false)
        .unwrap();
    assert!(first.is_some());
    assert!(second.is_none());
    assert!(fixture.console_contains("Invoice is in process"));

    fixture.control.run_until_idle().await;

    let again = pipelines
        .save_component("ApexClass", "Invoice", "public class Invoice {}", true)
        .unwrap();
    assert!(again.is_some());
    fixture.control.run_until_idle().await;
}

#[tokio::test]
async fn test_save_of_unknown_component_fails_up_front() {
    let server = MockServer::start().await;
    let fixture = Fixture::new(&server);

    let err = fixture
        .pipelines(&server)
        .save_component("ApexClass", "Missing", "", false)
        .unwrap_err();
    assert!(err.to_string().contains("Missing"));
}

#[tokio::test]
async fn test_failed_create_removes_the_local_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{DATA}/sobjects/ApexClass")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!([{
            "errorCode": "DUPLICATE_VALUE",
            "message": "Class name already in use"
        }])))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    let file = fixture.workspace.join("classes").join("Invoice.cls");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "public class Invoice {}").unwrap();

    fixture
        .pipelines(&server)
        .create_component(
            "ApexClass",
            "Invoice",
            json!({"Name": "Invoice", "Body": "public class Invoice {}"}),
            &file,
        )
        .unwrap();
    fixture.control.run_until_idle().await;

    assert!(!file.exists());
    assert!(fixture.store.load_components(&fixture.org()).unwrap().is_none());
}

#[tokio::test]
async fn test_create_registers_and_opens_the_component() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{DATA}/sobjects/ApexClass")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "01pNEW",
            "success": true,
            "errors": []
        })))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    let file = fixture.workspace.join("classes").join("Invoice.cls");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "public class Invoice {}").unwrap();

    fixture
        .pipelines(&server)
        .create_component("ApexClass", "Invoice", json!({"Name": "Invoice"}), &file)
        .unwrap();
    fixture.control.run_until_idle().await;

    assert!(file.exists());
    let registry: ComponentMetadata = fixture.store.load_components(&fixture.org()).unwrap().unwrap();
    let attributes = registry.get("ApexClass", "Invoice").unwrap();
    assert_eq!(attributes.id, "01pNEW");
    assert_eq!(attributes.url, "sobjects/ApexClass/01pNEW");
    assert!(fixture.host.events().contains(&HostEvent::OpenFile(file.clone())));
    assert!(fixture.console_contains("Invoice.cls is created successfully"));
}

#[tokio::test]
async fn test_run_all_test_appends_results_then_coverage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{DATA}/tooling/runTestsAsynchronous/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("707A")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "707A", "Status": "Completed"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/tooling/query")))
        .and(query_param(
            "q",
            "SELECT ApexClassOrTrigger.Name, NumLinesCovered, NumLinesUncovered, Coverage FROM ApexCodeCoverageAggregate",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"ApexClassOrTrigger": {"Name": "Invoice"}, "NumLinesCovered": 3, "NumLinesUncovered": 1}]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/tooling/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{
                "ApexClass": {"Name": "InvoiceTest"},
                "MethodName": "testTotal",
                "Outcome": "Pass",
                "RunTime": 12
            }]
        })))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    fixture.register("Invoice", false);
    fixture.register("InvoiceTest", true);
    fixture.register("ShippingTest", true);

    let ops = fixture.pipelines(&server).run_all_test().unwrap();
    assert_eq!(ops.len(), 2);
    fixture.control.run_until_idle().await;

    let view = fixture.host.view(RUN_ALL_TEST_VIEW).unwrap();
    assert_eq!(view.matches("Test Class: InvoiceTest").count(), 2);
    assert!(view.contains("testTotal"));
    assert!(view.contains("75.00%"));
}

#[tokio::test]
async fn test_run_all_test_without_registry_fails() {
    let server = MockServer::start().await;
    let fixture = Fixture::new(&server);

    let err = fixture.pipelines(&server).run_all_test().unwrap_err();
    assert!(err.to_string().contains("create a new project first"));
}

const USERS_SOQL: &str = "SELECT Id, FirstName, LastName FROM User WHERE LastName != null AND IsActive = true";

#[tokio::test]
async fn test_users_lookup_is_fetched_once_per_org() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .and(query_param("q", USERS_SOQL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "005000000000001", "FirstName": "Ada", "LastName": "Lovelace"}]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "07L1", "LogUserId": "005000000000001", "Operation": "/apex/Invoice", "LogLength": 2048}]
        })))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    let pipelines = fixture.pipelines(&server);

    let first = pipelines.populate_users().await.unwrap();
    let second = pipelines.populate_users().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.get("Lovelace Ada").map(String::as_str), Some("005000000000001"));

    pipelines.fetch_user_logs("Lovelace Ada");
    fixture.control.run_until_idle().await;
    assert!(fixture.host.view(DEBUG_LOGS_VIEW).is_some());

    let err = pipelines.resolve_user("Hopper Grace").await.unwrap_err();
    assert!(err.to_string().contains("no active user named Hopper Grace"));
    assert_eq!(
        pipelines.resolve_user("005000000000002").await.unwrap(),
        "005000000000002"
    );
}

#[tokio::test]
async fn test_class_lookup_reads_the_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fixture = Fixture::new(&server);
    fixture.register("InvoiceTest", true);
    let pipelines = fixture.pipelines(&server);

    assert_eq!(pipelines.resolve_class("InvoiceTest").await.unwrap(), "01pInvoiceTest");
    assert_eq!(pipelines.resolve_class("invoicetest").await.unwrap(), "01pInvoiceTest");
    assert!(pipelines.resolve_class("ShippingTest").await.is_err());
    assert_eq!(
        pipelines
            .class_ids(&["InvoiceTest".to_string(), "01pOTHER".to_string()])
            .unwrap(),
        vec!["01pInvoiceTest".to_string(), "01pOTHER".to_string()]
    );
}

#[tokio::test]
async fn test_data_template_resolves_record_types_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/sobjects")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sobjects": [{"name": "Account", "layoutable": true}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .and(query_param("q", "SELECT Id, Name, SobjectType FROM RecordType"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "0121", "Name": "Partner", "SobjectType": "Account"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    let layout = json!({"editLayoutSections": [{"layoutRows": [{"layoutItems": [
        {"label": "Account Name", "layoutComponents": [{"type": "Field", "value": "Name"}]},
        {"label": "Phone", "layoutComponents": [{"type": "Field", "value": "Phone"}]}
    ]}]}]});
    for recordtype_id in ["0121", MASTER_RECORD_TYPE_ID] {
        Mock::given(method("GET"))
            .and(path(format!("{DATA}/sobjects/Account/describe/layouts/{recordtype_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(layout.clone()))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut fixture = Fixture::new(&server);
    let pipelines = fixture.pipelines(&server);
    pipelines.export_data_template_for("Account", "Partner");
    fixture.control.run_until_idle().await;
    pipelines.export_data_template_for("Account", "Master");
    fixture.control.run_until_idle().await;

    let template = fixture.workspace.join("template").join("Account-Partner.csv");
    let text = std::fs::read_to_string(&template).unwrap();
    assert_eq!(text, "Account Name,Phone\nName,Phone\n");
    assert!(fixture.workspace.join("template").join("Account-Master.csv").exists());
    assert!(fixture.console_contains("Data Template outputdir"));
}

#[tokio::test]
async fn test_data_template_for_unknown_record_type_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/sobjects")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sobjects": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 0,
            "done": true,
            "records": []
        })))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    fixture.pipelines(&server).export_data_template_for("Account", "Partner");
    fixture.control.run_until_idle().await;

    assert!(!fixture.workspace.join("template").exists());
    assert!(fixture.console_contains("no record type Account, Partner"));
}

#[tokio::test]
async fn test_all_workbooks_fan_out_over_describe_global() {
    let server = MockServer::start().await;
    mount_describes(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/sobjects/AccountHistory/describe")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!([
            {"errorCode": "NOT_FOUND", "message": "The requested resource does not exist"}
        ])))
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    fixture.pipelines(&server).generate_all_workbooks();
    fixture.control.run_until_idle().await;

    let workbooks = fixture.workspace.join("workbooks");
    let account = std::fs::read_to_string(workbooks.join("Account.csv")).unwrap();
    assert!(account.starts_with("Field Label,Field API,Field Type"));
    assert!(account.contains("Industry"));
    assert!(workbooks.join("Invoice__c.csv").exists());
    assert!(!workbooks.join("AccountHistory.csv").exists());
    assert!(fixture.console_contains("Workbooks not generated"));
    assert!(fixture.console_contains("AccountHistory"));
}

#[tokio::test]
async fn test_abandoned_pipeline_reports_cancelled_and_stops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DATA}/query")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"totalSize": 0, "done": true, "records": []}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut fixture = Fixture::new(&server);
    fixture.pipelines(&server).execute_query("SELECT Id FROM Account");
    assert!(!fixture.ctx.is_abandoned());
    fixture.ctx.abandon();
    fixture.control.run_until_idle().await;

    assert!(fixture.ctx.is_abandoned());
    assert!(fixture.console_contains("failed: cancelled"));
    assert!(fixture.host.view(QUERY_VIEW).is_none());
    assert!(!fixture.workspace.join(".history").exists());
}
