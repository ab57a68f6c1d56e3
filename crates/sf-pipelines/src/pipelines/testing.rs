//! Apex test pipelines.

use busbar_sf_client::ApiResult;
use busbar_sf_orchestrator::{FanOutSet, Operation, Outcome};
use tracing::{debug, instrument};

use super::Pipelines;
use crate::error::Result;
use crate::format;

pub const TEST_RESULT_VIEW: &str = "Test Result";
pub const RUN_ALL_TEST_VIEW: &str = "Run All Test Result";
const SYNC_TEST_VIEW: &str = "Sync Test Result";

const COVERAGE_SOQL: &str =
    "SELECT ApexClassOrTrigger.Name, NumLinesCovered, NumLinesUncovered, Coverage FROM ApexCodeCoverageAggregate";

impl Pipelines {
    /// Look the class up by name, then [`Pipelines::run_test`] it.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn run_test_by_name(&self, class_name: &str) -> Operation<std::result::Result<String, String>> {
        let lookup = self.clone();
        let this = self.clone();
        let name = class_name.to_string();
        let class_name = class_name.to_string();

        self.after_lookup(
            format!("Find Test Class {class_name}"),
            async move { lookup.resolve_class(&name).await },
            move |class_id| {
                this.run_test(&class_name, &class_id);
            },
        )
    }

    /// Run one test class, show its results, then append org coverage.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn run_test(&self, class_name: &str, class_id: &str) -> Operation<ApiResult> {
        let api = self.api.clone();
        let class_id = class_id.to_string();
        let class_name = class_name.to_string();
        let this = self.clone();

        self.ctx.single(
            format!("Run Test Class {class_name}"),
            format!("Run Test for {class_name} Succeed"),
            async move { api.run_test(&class_id).await },
            move |result| {
                let text = format::test_result(result.records());
                this.ctx.host().show_view(TEST_RESULT_VIEW, &text);
                this.remember("test", &class_name, &text);
                this.append_code_coverage(TEST_RESULT_VIEW, format!("Get Code Coverage of {class_name}"));
            },
        )
    }

    /// Run every registered test class at once. Results are appended as
    /// each class finishes; org coverage follows once all are done.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn run_all_test(&self) -> Result<Vec<Operation<ApiResult>>> {
        let class_ids = self.populate_all_test_classes()?;
        if class_ids.is_empty() {
            self.ctx.announce("No test class found");
            return Ok(Vec::new());
        }

        let set: FanOutSet<ApiResult, String> = class_ids
            .into_iter()
            .map(|class_id| {
                let api = self.api.clone();
                let id = class_id.clone();
                let op = self
                    .ctx
                    .orchestrator()
                    .launcher()
                    .launch(format!("Run Test {class_id}"), async move { api.run_test(&id).await });
                (op, class_id)
            })
            .collect();

        let host = self.ctx.host().clone();
        let mut shown = false;
        let this = self.clone();
        Ok(self.ctx.fan_out(
            set,
            "Run All Test",
            "Run All Test Succeed",
            move |class_id: &String, outcome: &Outcome<ApiResult>| {
                let Outcome::Completed(result) = outcome else {
                    return;
                };
                if result.is_failure() {
                    debug!(class_id = %class_id, "Test run failed");
                    return;
                }
                let text = format!("{}\n\n\n\n{}", format::test_result(result.records()), "*".repeat(100));
                if shown {
                    host.append_view(RUN_ALL_TEST_VIEW, &format!("\n{text}"));
                } else {
                    host.show_view(RUN_ALL_TEST_VIEW, &text);
                    shown = true;
                }
            },
            move |_| {
                this.append_code_coverage(RUN_ALL_TEST_VIEW, "Get Code Coverage of All Class");
            },
        ))
    }

    fn append_code_coverage(&self, view: &'static str, progress: impl Into<String>) -> Operation<ApiResult> {
        let progress = progress.into();
        let api = self.api.clone();
        let host = self.ctx.host().clone();

        self.ctx.single(
            progress.clone(),
            format!("{progress} Succeed"),
            async move { api.query_all(COVERAGE_SOQL, true).await },
            move |result| host.append_view(view, &format::code_coverage(result.records())),
        )
    }

    /// Run test classes by name, synchronously on the server.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn run_sync_test_classes(&self, class_names: &[String]) -> Operation<ApiResult> {
        let api = self.api.clone();
        let class_names = class_names.to_vec();
        let host = self.ctx.host().clone();

        self.ctx.single(
            "Run Sync Test Classes",
            "Run Sync Test Classes Succeed",
            async move { api.run_tests_synchronous(&class_names).await },
            move |result| host.show_view(SYNC_TEST_VIEW, &format::pretty(&result.body)),
        )
    }

    /// Enqueue test classes by id without waiting for them.
    #[instrument(skip(self), fields(org = %self.org()))]
    pub fn run_async_test_classes(&self, class_ids: &[String]) -> Operation<ApiResult> {
        let api = self.api.clone();
        let class_ids = class_ids.to_vec();
        let this = self.clone();

        self.ctx.single(
            "Run Async Test Classes",
            "Run Async Test Classes Succeed",
            async move { api.run_tests_asynchronous(&class_ids).await },
            move |result| {
                let job_id = result.body.as_str().unwrap_or_default();
                this.ctx.announce(format!("Test job {job_id} enqueued"));
            },
        )
    }
}
