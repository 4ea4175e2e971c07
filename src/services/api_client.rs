//! ReVil platform REST client.
//!
//! Uses reqwest to call the registration-platform endpoints the console
//! depends on: payment status lookup, eligible registrations, and
//! certificate dispatch.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use thiserror::Error;

use crate::models::{CertificateDispatch, PaymentOrder, Registration};
use crate::services::certificate_flow::CertificateApi;
use crate::services::payment_flow::PaymentStatusSource;

/// Platform API client errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// REST client for the ReVil platform API.
#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new platform API client.
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        if base_url.is_empty() {
            return Err(ApiError::Config("base_url is empty".into()));
        }

        let mut headers = HeaderMap::new();
        if !token.is_empty() {
            let token_val = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Config("Invalid token format".into()))?;
            headers.insert(AUTHORIZATION, token_val);
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed and can be ignored.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Check HTTP response status, returning error for non-success codes.
    fn check_status(resp: &reqwest::Response) -> Result<(), ApiError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }

    /// Fetch registrations for an event, including nested team members.
    /// The session check-in filter is applied by the caller so eligibility
    /// does not depend on which side the server filters on.
    pub async fn registrations(&self, event_id: &str) -> Result<Vec<Registration>, ApiError> {
        let url = self.api_url(&format!("/events/{event_id}/registrations"));
        let resp = self.http.get(&url).send().await?;
        Self::check_status(&resp)?;
        Ok(resp.json().await?)
    }
}

impl PaymentStatusSource for ApiClient {
    async fn payment_status(&self, order_id: &str) -> Result<PaymentOrder, ApiError> {
        let url = self.api_url(&format!("/payments/{order_id}"));
        let resp = self.http.get(&url).send().await?;
        Self::check_status(&resp)?;
        Ok(resp.json().await?)
    }
}

impl CertificateApi for ApiClient {
    async fn eligible_registrations(&self, event_id: &str) -> Result<Vec<Registration>, ApiError> {
        let registrations = self.registrations(event_id).await?;
        Ok(crate::services::certificate_flow::eligible_only(
            registrations,
        ))
    }

    async fn dispatch_certificates(&self, payload: &CertificateDispatch) -> Result<(), ApiError> {
        let url = self.api_url("/certificates/send");
        let resp = self.http.post(&url).json(payload).send().await?;
        Self::check_status(&resp)?;
        Ok(())
    }
}
