//! Blocking HTTP client that posts a prepared request and classifies the answer.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use tracing::{debug, info};

use super::request::OutgoingRequest;
use crate::config::ForwardConfig;
use crate::error::{MailpostError, Result};

/// Posts messages to the target. Redirects are never followed.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(MailpostError::ClientBuild)?;
        Ok(Self { client })
    }

    /// POST the request.
    ///
    /// 2xx is success. Any 3xx fails with [`MailpostError::Redirect`]
    /// without contacting the new location, 404 fails with
    /// [`MailpostError::NotFound`], every other status with
    /// [`MailpostError::HttpStatus`].
    pub fn send(&self, request: &OutgoingRequest) -> Result<()> {
        let url = request.url.as_str();
        debug!(url, body_len = request.body.len(), "Posting message");

        let mut builder = self
            .client
            .post(request.url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.body.clone());
        if let Some(auth) = &request.authorization {
            builder = builder.header(AUTHORIZATION, auth.as_str());
        }

        let response = builder.send().map_err(|e| MailpostError::Transport {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();

        if status.is_success() {
            info!(url, status = status.as_u16(), "Message delivered");
            return Ok(());
        }
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            return Err(MailpostError::Redirect {
                url: url.to_string(),
                status: status.as_u16(),
                location,
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MailpostError::NotFound {
                url: url.to_string(),
            });
        }

        Err(MailpostError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}
