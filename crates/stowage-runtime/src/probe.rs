use std::future::Future;
use std::time::Duration;

/// One liveness check against a running service.
///
/// The future is `Send` so a monitor can run on a spawned task.
pub trait Probe: Send + Sync {
    fn check(&self) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// `GET <url>`; any 2xx within the timeout is a success.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Client { source: e })?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Probe for HttpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::Request {
                url: self.url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to build HTTP client")]
    Client { source: reqwest::Error },

    #[error("probe request to {url} failed")]
    Request { url: String, source: reqwest::Error },

    #[error("probe {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}
