//! Login.

use busbar_sf_client::{ApiResult, SalesforceApi, Session, SfHttpClient};
use busbar_sf_orchestrator::Operation;
use tracing::{info, instrument};

use super::Pipelines;
use crate::context::PipelineContext;
use crate::error::Result;
use crate::format;

/// A new session plus the raw token response, or why login failed.
pub type LoginOutcome = std::result::Result<(Session, ApiResult), String>;

impl PipelineContext {
    /// Log in with the username-password flow and hand the resulting
    /// [`Pipelines`] to `on_session` on the control loop.
    ///
    /// Fails up front when the settings lack credentials.
    #[instrument(skip_all, fields(org = %self.settings().username))]
    pub fn login<F>(&self, http: SfHttpClient, on_session: F) -> Result<Operation<LoginOutcome>>
    where
        F: FnOnce(Pipelines) + Send + 'static,
    {
        let request = self.settings().login_request()?;
        let worker_http = http.clone();
        let ctx = self.clone();

        Ok(self.single(
            "Login",
            "Login Succeed",
            async move {
                Session::login(&worker_http, &request)
                    .await
                    .map_err(|err| err.to_string())
            },
            move |outcome| {
                let Ok((session, token)) = outcome else {
                    return;
                };
                if ctx.settings().output_session_info {
                    ctx.host().console(&format::pretty(&token.body));
                }
                info!(org = %session.org(), instance_url = session.instance_url(), "Logged in");
                ctx.announce("Login Succeed");
                on_session(Pipelines::new(ctx, SalesforceApi::from_parts(http, session)));
            },
        ))
    }

    /// Pipelines over a session already present in the settings
    /// (`instance_url` + `access_token`), without logging in.
    pub fn resume(&self, http: SfHttpClient) -> Option<Pipelines> {
        let session = self.settings().session()?;
        Some(Pipelines::new(
            self.clone(),
            SalesforceApi::from_parts(http, session),
        ))
    }
}
