//! Waiting for backend calls
//!
//! The application talks to `API/v1/{Namespace}.{ext}/{Method}` and wraps
//! every payload as `{ "d": ... }`. [`ResponseWaiter`] blocks until one such
//! call completes and decodes the envelope into the caller's type.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::driver::{NetworkResponse, Page, UrlPattern};
use crate::error::{E2eError, E2eResult};

/// Backend API namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiNamespace {
    Json,
    Dashboards,
    Internal,
}

impl ApiNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiNamespace::Json => "Json",
            ApiNamespace::Dashboards => "Dashboards",
            ApiNamespace::Internal => "Internal",
        }
    }
}

impl fmt::Display for ApiNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ "d": payload }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub d: T,
}

/// Endpoint addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Path prefix before the namespace
    pub base_path: String,

    /// Service extension after the namespace
    pub extension: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: "API/v1".to_string(),
            extension: "asmx".to_string(),
        }
    }
}

impl ApiConfig {
    /// `**/API/v1/Internal.asmx/GetApplication`
    pub fn endpoint_glob(&self, namespace: ApiNamespace, method: &str) -> String {
        format!(
            "**/{}/{}.{}/{}",
            self.base_path.trim_matches('/'),
            namespace,
            self.extension,
            method
        )
    }
}

/// Waits for one backend invocation per call
#[derive(Debug, Clone)]
pub struct ResponseWaiter {
    api: ApiConfig,
    timeout: Duration,
}

impl Default for ResponseWaiter {
    fn default() -> Self {
        Self::new(&HarnessConfig::default())
    }
}

impl ResponseWaiter {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            api: config.api.clone(),
            timeout: config.timeouts.response(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pattern(&self, namespace: ApiNamespace, method: &str) -> E2eResult<UrlPattern> {
        UrlPattern::new(self.api.endpoint_glob(namespace, method))
    }

    /// Wait for `namespace.method` and decode its envelope
    pub async fn wait<T: DeserializeOwned>(
        &self,
        page: &dyn Page,
        namespace: ApiNamespace,
        method: &str,
    ) -> E2eResult<Envelope<T>> {
        self.wait_with_timeout(page, namespace, method, self.timeout)
            .await
    }

    pub async fn wait_with_timeout<T: DeserializeOwned>(
        &self,
        page: &dyn Page,
        namespace: ApiNamespace,
        method: &str,
        timeout: Duration,
    ) -> E2eResult<Envelope<T>> {
        let response = self
            .wait_response_with_timeout(page, namespace, method, timeout)
            .await?;
        Self::decode(&response)
    }

    /// Wait for `namespace.method` without decoding, e.g. to check the status
    pub async fn wait_response(
        &self,
        page: &dyn Page,
        namespace: ApiNamespace,
        method: &str,
    ) -> E2eResult<NetworkResponse> {
        self.wait_response_with_timeout(page, namespace, method, self.timeout)
            .await
    }

    async fn wait_response_with_timeout(
        &self,
        page: &dyn Page,
        namespace: ApiNamespace,
        method: &str,
        timeout: Duration,
    ) -> E2eResult<NetworkResponse> {
        let pattern = self.pattern(namespace, method)?;
        debug!("Waiting up to {} ms for {}", timeout.as_millis(), pattern);

        let pending = page.wait_for_response(pattern.clone(), timeout);
        let response = tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| E2eError::Timeout(format!("response {}", pattern)))??;

        info!("{}.{} responded {}", namespace, method, response.status);
        Ok(response)
    }

    /// Parse a response body as `Envelope<T>`
    pub fn decode<T: DeserializeOwned>(response: &NetworkResponse) -> E2eResult<Envelope<T>> {
        serde_json::from_slice(&response.body).map_err(|source| E2eError::Decode {
            url: response.url.clone(),
            source,
        })
    }
}
