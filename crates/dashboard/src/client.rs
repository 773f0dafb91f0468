//! HTTP access to the device: full data, lightweight status and actions.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::model::{ActionPayload, DeviceSnapshot, StatusSnapshot};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("device answered HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// The three device endpoints the dashboard consumes.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn fetch_data(&self) -> Result<DeviceSnapshot, ClientError>;
    async fn fetch_status(&self) -> Result<StatusSnapshot, ClientError>;
    async fn submit_action(&self, payload: &ActionPayload) -> Result<(), ClientError>;
}

pub struct HttpDeviceClient {
    http: Client,
    base_url: String,
}

impl HttpDeviceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status { url, status });
        }

        resp.json::<T>()
            .await
            .map_err(|source| ClientError::Decode { url, source })
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn fetch_data(&self) -> Result<DeviceSnapshot, ClientError> {
        self.get_json("/data").await
    }

    async fn fetch_status(&self) -> Result<StatusSnapshot, ClientError> {
        self.get_json("/status").await
    }

    async fn submit_action(&self, payload: &ActionPayload) -> Result<(), ClientError> {
        let url = self.url("/action");
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Status { url, status })
        }
    }
}

// ===========================================================================
// Test double
// ===========================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted in-memory device. Each fetch pops the next queued response;
    /// an empty queue answers with HTTP 503.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        pub(crate) data: Mutex<VecDeque<DeviceSnapshot>>,
        pub(crate) status: Mutex<VecDeque<StatusSnapshot>>,
        pub(crate) submitted: Mutex<Vec<ActionPayload>>,
        pub(crate) reject_actions: bool,
    }

    impl ScriptedClient {
        pub(crate) fn push_data(&self, snap: DeviceSnapshot) {
            self.data.lock().unwrap().push_back(snap);
        }

        pub(crate) fn push_status(&self, status: StatusSnapshot) {
            self.status.lock().unwrap().push_back(status);
        }

        pub(crate) fn submitted(&self) -> Vec<ActionPayload> {
            self.submitted.lock().unwrap().clone()
        }

        fn unavailable(path: &str) -> ClientError {
            ClientError::Status {
                url: format!("scripted://{path}"),
                status: StatusCode::SERVICE_UNAVAILABLE,
            }
        }
    }

    #[async_trait]
    impl DeviceClient for ScriptedClient {
        async fn fetch_data(&self) -> Result<DeviceSnapshot, ClientError> {
            self.data
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Self::unavailable("/data"))
        }

        async fn fetch_status(&self) -> Result<StatusSnapshot, ClientError> {
            self.status
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Self::unavailable("/status"))
        }

        async fn submit_action(&self, payload: &ActionPayload) -> Result<(), ClientError> {
            if self.reject_actions {
                return Err(Self::unavailable("/action"));
            }
            self.submitted.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = HttpDeviceClient::new("http://192.168.4.1/", Duration::from_secs(5)).unwrap();
        assert_eq!(c.url("/data"), "http://192.168.4.1/data");
    }

    #[tokio::test]
    async fn unreachable_device_is_transport_error() {
        // Port 9 on localhost is not expected to accept HTTP.
        let c = HttpDeviceClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = c.fetch_status().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }), "got {err}");
    }
}
