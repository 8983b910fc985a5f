//! SMS delivery.
//!
//! The rest of the codebase only knows `send(phone, code)`. Sandbox mode
//! skips the provider entirely (the code is surfaced in the HTTP response
//! instead, which is what integration environments run on).

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::info;

use contest::{config::SmsConfig, error::Error};

const ENDPOINT: &str = "https://api.sms-gateway.example/v1/verify/send";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SmsClient {
    http: Client,
    api_key: String,
    sandbox: bool,
}

impl SmsClient {
    pub fn new(config: &SmsConfig) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("HTTP client construction cannot fail");

        Self {
            http,
            api_key: config.api_key.clone(),
            sandbox: config.sandbox,
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    pub async fn send(&self, phone: &str, code: &str) -> contest::Result<()> {
        if self.sandbox {
            info!(phone, "Sandbox mode, skipping SMS dispatch");
            return Ok(());
        }

        let response = self
            .http
            .post(ENDPOINT)
            .header("x-api-key", &self.api_key)
            .json(&json!({ "mobile": phone, "code": code }))
            .send()
            .await
            .map_err(|e| Error::Sms(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Sms(format!(
                "provider responded with {}",
                response.status()
            )));
        }

        Ok(())
    }
}
