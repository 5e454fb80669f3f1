use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::{AccountService, IdentificationService};
use crate::access::{Tier, UsageSnapshot};
use crate::error::RemoteError;
use crate::models::IdentificationResult;

/// Statuses worth retrying from the offline queue. Everything else in
/// the 4xx range means the request itself is bad and queuing won't help.
fn transient_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..=599).contains(&code)
}

fn classify(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(code, response) => {
            let detail = format!("{} {}", code, response.status_text());
            if transient_status(code) {
                RemoteError::Transient(detail)
            } else {
                RemoteError::Permanent(detail)
            }
        }
        ureq::Error::Transport(transport) => RemoteError::Transient(transport.to_string()),
    }
}

fn parse_base(base_url: &str) -> Result<Url, RemoteError> {
    let mut normalized = base_url.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized)
        .map_err(|err| RemoteError::Permanent(format!("invalid base url '{base_url}': {err}")))
}

fn join(base: &Url, path: &str) -> Result<Url, RemoteError> {
    base.join(path)
        .map_err(|err| RemoteError::Permanent(format!("invalid endpoint path '{path}': {err}")))
}

/// Blocking HTTP client for the identification service. Each request is
/// bounded by the agent-level timeout; callers in async contexts wrap
/// calls in `spawn_blocking`.
pub struct HttpIdentificationService {
    agent: ureq::Agent,
    base: Url,
}

impl HttpIdentificationService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base: parse_base(base_url)?,
        })
    }
}

impl IdentificationService for HttpIdentificationService {
    fn identify(
        &self,
        image_jpeg: &[u8],
        user_id: &str,
    ) -> Result<IdentificationResult, RemoteError> {
        let endpoint = join(&self.base, "identifications")?;
        let response = self
            .agent
            .post(endpoint.as_str())
            .query("userId", user_id)
            .set("Content-Type", "image/jpeg")
            .send_bytes(image_jpeg)
            .map_err(classify)?;

        response
            .into_json::<IdentificationResult>()
            .map_err(|err| RemoteError::Permanent(format!("malformed identification body: {err}")))
    }
}

#[derive(Deserialize)]
struct SubscriptionBody {
    tier: Option<String>,
}

/// Blocking HTTP client for the usage/subscription service.
pub struct HttpAccountService {
    agent: ureq::Agent,
    base: Url,
}

impl HttpAccountService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base: parse_base(base_url)?,
        })
    }
}

impl AccountService for HttpAccountService {
    fn tier(&self, user_id: &str) -> Result<Option<Tier>, RemoteError> {
        let endpoint = join(&self.base, &format!("users/{user_id}/subscription"))?;
        let body = self
            .agent
            .get(endpoint.as_str())
            .call()
            .map_err(classify)?
            .into_json::<SubscriptionBody>()
            .map_err(|err| RemoteError::Permanent(format!("malformed subscription body: {err}")))?;

        Ok(body.tier.as_deref().and_then(Tier::parse))
    }

    fn usage(&self, user_id: &str) -> Result<UsageSnapshot, RemoteError> {
        let endpoint = join(&self.base, &format!("users/{user_id}/usage"))?;
        self.agent
            .get(endpoint.as_str())
            .call()
            .map_err(classify)?
            .into_json::<UsageSnapshot>()
            .map_err(|err| RemoteError::Permanent(format!("malformed usage body: {err}")))
    }

    fn increment_usage(&self, user_id: &str) -> Result<(), RemoteError> {
        let endpoint = join(&self.base, &format!("users/{user_id}/usage"))?;
        self.agent
            .post(endpoint.as_str())
            .call()
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_side_statuses_are_transient() {
        assert!(transient_status(500));
        assert!(transient_status(503));
        assert!(transient_status(429));
        assert!(transient_status(408));
    }

    #[test]
    fn client_side_statuses_are_permanent() {
        assert!(!transient_status(400));
        assert!(!transient_status(404));
        assert!(!transient_status(422));
    }

    #[test]
    fn base_url_normalization_preserves_paths() {
        let base = parse_base("https://api.example.com/v1").unwrap();
        let endpoint = join(&base, "identifications").unwrap();
        assert_eq!(endpoint.as_str(), "https://api.example.com/v1/identifications");
    }
}
