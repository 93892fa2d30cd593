//! Mutual-TLS SOAP transport to the STS.
//!
//! Request and response bodies may carry patient data and are only logged at
//! debug level. There is no retry; a failed exchange is reported to the caller.
//!
//! Each exchange is bounded by the timeout passed to
//! [`StsTransport::exchange_with_timeout`] (the configured `request_timeout`
//! for [`StsTransport::exchange`]); the HTTP client itself carries no timeout.
//!
//! TLS runs on the platform library through native-tls (OpenSSL on Linux,
//! Secure Transport on macOS, SChannel on Windows) with TLS 1.2 as the minimum
//! version. Whether the STS may trigger a renegotiation to request the client
//! certificate is decided by that library, not by this crate.

use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::tls::Version;
use reqwest::{Client, Identity};
use url::Url;

use crate::StsResult;
use crate::config::StsConfig;
use crate::error::StsError;

/// Content type of SOAP 1.2 requests.
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Posts WS-Trust envelopes to the STS.
#[derive(Debug, Clone)]
pub struct StsTransport {
    client: Client,
    sts_url: Url,
    timeout: Duration,
    max_response_size: usize,
}

impl StsTransport {
    /// Maximum accepted response body (10 MB).
    pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

    /// Creates a transport from configuration.
    ///
    /// For `https` URLs the client certificate and key from `[tls]` are
    /// required; plain `http` is only accepted with `tls.allow_http`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid URLs, missing or unreadable
    /// client credentials, or if the HTTP client cannot be built.
    pub fn from_config(config: &StsConfig) -> StsResult<Self> {
        let sts_url = Url::parse(&config.sts_url).map_err(|e| {
            StsError::configuration(format!("Invalid sts_url '{}': {e}", config.sts_url))
        })?;

        let mut builder = Client::builder()
            .use_native_tls()
            .min_tls_version(Version::TLS_1_2)
            .redirect(reqwest::redirect::Policy::none());

        match sts_url.scheme() {
            "https" => {
                builder = builder.identity(load_identity(config)?);
            }
            "http" if config.tls.allow_http => {
                tracing::warn!(url = %sts_url, "STS transport is not using TLS");
            }
            other => {
                return Err(StsError::configuration(format!(
                    "sts_url scheme '{other}' is not allowed"
                )));
            }
        }

        let client = builder
            .build()
            .map_err(|e| StsError::configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::new(client, sts_url, config.request_timeout))
    }

    /// Creates a transport around an existing client.
    #[must_use]
    pub fn new(client: Client, sts_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            sts_url,
            timeout,
            max_response_size: Self::DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// The STS endpoint.
    #[must_use]
    pub fn sts_url(&self) -> &Url {
        &self.sts_url
    }

    /// Posts `envelope` under the configured timeout and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns a transport error on timeout, connection failure, non-2xx status
    /// (carrying the status code) or an oversized body.
    pub async fn exchange(&self, envelope: &str) -> StsResult<String> {
        self.exchange_with_timeout(envelope, self.timeout).await
    }

    /// Like [`exchange`](Self::exchange) with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`exchange`](Self::exchange).
    pub async fn exchange_with_timeout(
        &self,
        envelope: &str,
        timeout: Duration,
    ) -> StsResult<String> {
        let started = Instant::now();
        tracing::debug!(url = %self.sts_url, body = %envelope, "Sending RST to STS");

        let body = tokio::time::timeout(timeout, self.post(envelope))
            .await
            .map_err(|_| {
                StsError::transport(format!("STS exchange timed out after {timeout:?}"))
            })??;

        tracing::debug!(
            url = %self.sts_url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            body = %body,
            "Received RSTR from STS"
        );
        Ok(body)
    }

    async fn post(&self, envelope: &str) -> StsResult<String> {
        let mut response = self
            .client
            .post(self.sts_url.clone())
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StsError::transport(format!("STS exchange timed out: {e}"))
                } else {
                    StsError::transport(format!("STS request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if tracing::enabled!(tracing::Level::DEBUG)
                && let Ok(body) = response.text().await
            {
                tracing::debug!(status = status.as_u16(), body = %body, "STS error response");
            }
            return Err(StsError::http_status(status.as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_response_size
        {
            return Err(self.too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| StsError::transport(format!("Failed to read STS response: {e}")))?
        {
            if body.len() + chunk.len() > self.max_response_size {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        String::from_utf8(body).map_err(|_| StsError::protocol("STS response is not UTF-8"))
    }

    fn too_large(&self) -> StsError {
        StsError::transport(format!(
            "STS response exceeds maximum size of {} bytes",
            self.max_response_size
        ))
    }
}

fn load_identity(config: &StsConfig) -> StsResult<Identity> {
    let (Some(cert_path), Some(key_path)) = (
        config.tls.client_certificate_path.as_deref(),
        config.tls.client_key_path.as_deref(),
    ) else {
        return Err(StsError::configuration(
            "Mutual TLS requires tls.client_certificate_path and tls.client_key_path",
        ));
    };
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|e| {
            StsError::configuration(format!("Failed to read {}: {e}", path.display()))
        })
    };
    let cert = read(cert_path)?;
    let key = read(key_path)?;
    Identity::from_pkcs8_pem(&cert, &key)
        .map_err(|e| StsError::configuration(format!("Invalid client TLS identity: {e}")))
}
