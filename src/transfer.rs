use std::io::Read;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::config::RemoteSettings;
use crate::domain::{DatasetDescriptor, RemoteSource};
use crate::error::InstallerError;

pub const MANIFEST_FILE_NAME: &str = "MANIFEST.txt";

/// Remote location of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub url: String,
}

impl Locator {
    /// Location of `name` within the dataset described by `descriptor`.
    pub fn for_file(descriptor: &DatasetDescriptor, remote: &RemoteSettings, name: &str) -> Self {
        let name = name.trim_start_matches("./");
        let url = match descriptor.dataset.info().source {
            RemoteSource::S3 => format!(
                "{}/{}/{}/{}/{}/{}/{}",
                remote.s3_endpoint_url.trim_end_matches('/'),
                remote.s3_bucket,
                remote.static_infix,
                remote.subset,
                descriptor.category,
                descriptor.dir_name(),
                name
            ),
            RemoteSource::GitHub { repo } => format!(
                "https://github.com/{repo}/releases/download/{}/{}",
                descriptor.dir_name(),
                name
            ),
        };
        Self { url }
    }

    pub fn for_manifest(descriptor: &DatasetDescriptor, remote: &RemoteSettings) -> Self {
        Self::for_file(descriptor, remote, MANIFEST_FILE_NAME)
    }
}

pub trait TransferProvider: Send + Sync {
    fn fetch(&self, locator: &Locator) -> Result<Box<dyn Read + Send>, InstallerError>;
}

#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(remote: &RemoteSettings) -> Result<Self, InstallerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("varfish-installer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| InstallerError::TransferHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .danger_accept_invalid_certs(remote.disable_ssl_verification)
            .build()
            .map_err(|err| InstallerError::TransferHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, InstallerError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        warn!(url, status, attempt, "retrying transfer");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        warn!(url, attempt, error = %err, "retrying transfer");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(InstallerError::TransferHttp(err.to_string()));
                }
            }
        }
    }
}

impl TransferProvider for HttpTransfer {
    fn fetch(&self, locator: &Locator) -> Result<Box<dyn Read + Send>, InstallerError> {
        debug!(url = %locator.url, "fetching");
        let response = self.send_with_retries(&locator.url)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "transfer request failed".to_string());
            return Err(InstallerError::TransferStatus { status, message });
        }
        Ok(Box::new(response))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
