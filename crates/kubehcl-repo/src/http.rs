//! HTTP repository implementation
//!
//! Modules are located through `<protocol>://<url>/index.yaml` and
//! downloaded as gzipped tarballs.

use kubehcl_engine::config::RepoRecord;
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{RepoError, Result};
use crate::index::{INDEX_YAML, RepositoryIndex};

const USER_AGENT: &str = "kubehcl";

/// HTTP repository client
pub struct HttpRepository {
    record: RepoRecord,
    client: reqwest::Client,
}

impl HttpRepository {
    pub fn new(record: RepoRecord) -> Result<Self> {
        let client = build_client(&record)?;
        Ok(Self { record, client })
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// `<protocol>://<url>`
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}",
            self.record.protocol,
            self.record.url.trim_end_matches('/')
        )
    }

    pub fn index_url(&self) -> String {
        format!("{}/{}", self.base_url(), INDEX_YAML)
    }

    pub async fn fetch_index(&self) -> Result<RepositoryIndex> {
        let data = self.get_bytes(&self.index_url()).await?;
        RepositoryIndex::from_bytes(&data)
    }

    /// Download URL of `name` at `version`
    ///
    /// Absolute index URLs are used as they are, anything else is relative
    /// to the repository.
    pub async fn resolve(&self, name: &str, version: &str) -> Result<String> {
        let index = self.fetch_index().await?;
        let url = index.find(name, version)?;
        if url.contains("://") {
            Ok(url.to_string())
        } else {
            Ok(format!("{}/{}", self.base_url(), url.trim_start_matches('/')))
        }
    }

    /// Download the archive of `name` at `version`
    pub async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>> {
        let url = self.resolve(name, version).await?;
        tracing::debug!(repo = %self.record.name, %url, "downloading module");
        self.get_bytes(&url).await
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some((username, password)) = self.record.credentials()
            && self.same_origin(url)
        {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await.map_err(|e| self.request_error(e))?;
        if response.status() != StatusCode::OK {
            return Err(RepoError::HttpError {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        Ok(body.to_vec())
    }

    /// Credentials never leave the repository host
    fn same_origin(&self, target: &str) -> bool {
        let (Ok(base), Ok(target)) = (url::Url::parse(&self.base_url()), url::Url::parse(target))
        else {
            return false;
        };
        base.origin() == target.origin()
    }

    fn request_error(&self, e: reqwest::Error) -> RepoError {
        if e.is_timeout() {
            RepoError::Timeout {
                seconds: self.record.timeout,
            }
        } else {
            e.into()
        }
    }
}

fn build_client(record: &RepoRecord) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(record.insecure_skip_tls_verify);
    if record.timeout > 0 {
        builder = builder.timeout(Duration::from_secs(record.timeout));
    }

    if let (Some(cert_file), Some(key_file)) = (&record.cert_file, &record.key_file) {
        let certificate = |e: std::io::Error| RepoError::Certificate {
            message: e.to_string(),
        };
        let mut pem = std::fs::read(cert_file).map_err(certificate)?;
        pem.push(b'\n');
        pem.extend(std::fs::read(key_file).map_err(certificate)?);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| RepoError::Certificate {
            message: e.to_string(),
        })?;
        builder = builder.identity(identity);
    }

    if let Some(ca_file) = &record.ca_file {
        let pem = std::fs::read(ca_file).map_err(|e| RepoError::CaCertificate {
            message: e.to_string(),
        })?;
        let ca = reqwest::Certificate::from_pem(&pem).map_err(|e| RepoError::CaCertificate {
            message: e.to_string(),
        })?;
        builder = builder.add_root_certificate(ca);
    }

    builder.build().map_err(|e| RepoError::NetworkError {
        message: e.to_string(),
    })
}
