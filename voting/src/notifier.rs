//! Outcome callbacks

use async_trait::async_trait;
use ras_core::{OutcomeNotifier, RasError, RasResult, SessionOutcome};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::debug;

/// Posts the decision to the session's redirect URI as a form
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> RasResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RasError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn request(&self, outcome: &SessionOutcome) -> RequestBuilder {
        let ras_id = outcome.ras_id.to_string();
        self.client.post(&outcome.redirect_uri).form(&[
            ("state", outcome.state.as_str()),
            ("subject", outcome.subject.as_str()),
            ("rasId", ras_id.as_str()),
        ])
    }
}

#[async_trait]
impl OutcomeNotifier for HttpNotifier {
    async fn notify(&self, outcome: &SessionOutcome) -> RasResult<()> {
        let response = self
            .request(outcome)
            .send()
            .await
            .map_err(|e| RasError::Internal(format!("callback request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RasError::Internal(format!("callback answered {status}")));
        }
        debug!("Delivered outcome of session {} to {}", outcome.ras_id, outcome.redirect_uri);
        Ok(())
    }
}

/// Drops every outcome
pub struct NoopNotifier;

#[async_trait]
impl OutcomeNotifier for NoopNotifier {
    async fn notify(&self, _outcome: &SessionOutcome) -> RasResult<()> {
        Ok(())
    }
}
