// HTTP client for the execution substrate API
//
// Routes:
//   POST {base}/queues/{queue}/consumers   {"concurrency": n}
//   POST {base}/launches                   LaunchSpec
//   POST {base}/queues/{queue}/suspend
//   POST {base}/queues/{queue}/resume
//   GET  {base}/queues/{queue}             {"suspended": bool}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use workload_engine::substrate::{ExecutionSubstrate, LaunchSpec, SubstrateError};

#[derive(Debug, Serialize)]
struct RegisterConsumer {
    concurrency: usize,
}

#[derive(Debug, Deserialize)]
struct QueueState {
    suspended: bool,
}

pub struct HttpSubstrate {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSubstrate {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn queue_url(&self, queue_name: &str, action: &str) -> String {
        format!("{}/queues/{}{}", self.base_url, queue_name, action)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        queue_name: &str,
    ) -> Result<reqwest::Response, SubstrateError> {
        let response = request.send().await.map_err(|e| {
            warn!(queue = %queue_name, "Substrate request failed: {}", e);
            SubstrateError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => SubstrateError::UnknownQueue(queue_name.to_string()),
            s if s.is_client_error() && s != StatusCode::TOO_MANY_REQUESTS => {
                SubstrateError::Rejected(format!("{}: {}", s.as_u16(), message))
            }
            s => SubstrateError::Unavailable(format!("{}: {}", s.as_u16(), message)),
        })
    }
}

#[async_trait]
impl ExecutionSubstrate for HttpSubstrate {
    async fn register_queue_consumer(
        &self,
        queue_name: &str,
        concurrency: usize,
    ) -> Result<(), SubstrateError> {
        let request = self
            .http
            .post(self.queue_url(queue_name, "/consumers"))
            .json(&RegisterConsumer { concurrency });
        self.send(request, queue_name).await?;
        debug!(queue = %queue_name, concurrency, "Registered substrate consumer");
        Ok(())
    }

    async fn execute(&self, spec: &LaunchSpec) -> Result<(), SubstrateError> {
        let request = self
            .http
            .post(format!("{}/launches", self.base_url))
            .json(spec);
        match self.send(request, &spec.queue_name).await {
            Ok(_) => Ok(()),
            // Already accepted under this workload id
            Err(SubstrateError::Rejected(message)) if message.starts_with("409") => {
                debug!(workload_id = %spec.workload_id, "Launch already accepted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn suspend_polling(&self, queue_name: &str) -> Result<(), SubstrateError> {
        let request = self.http.post(self.queue_url(queue_name, "/suspend"));
        self.send(request, queue_name).await.map(|_| ())
    }

    async fn resume_polling(&self, queue_name: &str) -> Result<(), SubstrateError> {
        let request = self.http.post(self.queue_url(queue_name, "/resume"));
        self.send(request, queue_name).await.map(|_| ())
    }

    async fn is_suspended(&self, queue_name: &str) -> Result<bool, SubstrateError> {
        let request = self.http.get(self.queue_url(queue_name, ""));
        let state: QueueState = self
            .send(request, queue_name)
            .await?
            .json()
            .await
            .map_err(|e| SubstrateError::Unavailable(format!("malformed queue state: {e}")))?;
        Ok(state.suspended)
    }
}
