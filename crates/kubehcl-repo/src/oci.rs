//! OCI registry client
//!
//! A module is published as an artifact with a single uncompressed tar
//! layer. Plain HTTP is used only when the repository opts in.

use kubehcl_engine::config::RepoRecord;
use oci_distribution::Reference;
use oci_distribution::client::{
    Certificate, CertificateEncoding, Client, ClientConfig, ClientProtocol, Config, ImageLayer,
};
use oci_distribution::manifest::OciImageManifest;
use oci_distribution::secrets::RegistryAuth;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Media type of the module layer
pub const LAYER_MEDIA_TYPE: &str = "application/kubehcl.tar";
/// Artifact type of the manifest
pub const ARTIFACT_TYPE: &str = "application/kubehcl+type";
/// Config blob of artifact manifests
const EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";

/// OCI registry client
pub struct OciRegistry {
    record: RepoRecord,
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistry {
    pub fn new(record: RepoRecord) -> Result<Self> {
        let auth = match record.credentials() {
            Some((username, password)) => {
                RegistryAuth::Basic(username.to_string(), password.to_string())
            }
            None => RegistryAuth::Anonymous,
        };
        let client = create_client(&record)?;
        Ok(Self {
            record,
            client,
            auth,
        })
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// `<url>:<tag>`
    pub fn reference(&self, tag: &str) -> Result<Reference> {
        let full = format!("{}:{}", self.record.url.trim_end_matches('/'), tag);
        Reference::try_from(full.as_str()).map_err(|e| RepoError::InvalidOciReference {
            reference: format!("{}: {}", full, e),
        })
    }

    /// Fetch the module layer tagged `tag`
    pub async fn pull(&self, tag: &str) -> Result<Vec<u8>> {
        let reference = self.reference(tag)?;
        let pull_failed = |message: String| RepoError::OciPullFailed {
            tag: tag.to_string(),
            message,
        };

        let (manifest, digest) = self
            .bounded(self.client.pull_image_manifest(&reference, &self.auth))
            .await?
            .map_err(|e| pull_failed(e.to_string()))?;
        tracing::debug!(repo = %self.record.name, %tag, %digest, "fetched manifest");

        let [layer] = manifest.layers.as_slice() else {
            return Err(RepoError::LayerCount {
                count: manifest.layers.len(),
            });
        };
        if layer.media_type != LAYER_MEDIA_TYPE {
            return Err(RepoError::UnexpectedMediaType {
                media_type: layer.media_type.clone(),
            });
        }

        let mut data = Vec::new();
        self.bounded(self.client.pull_blob(&reference, layer, &mut data))
            .await?
            .map_err(|e| RepoError::LayerFetchFailed {
                message: format!("Wasn't able to retrieve layer {}, error: {}", layer.digest, e),
            })?;
        Ok(data)
    }

    /// Push `archive` as a single layer and tag the manifest `tag`
    ///
    /// Returns the manifest URL.
    pub async fn push(
        &self,
        tag: &str,
        archive: Vec<u8>,
        annotations: BTreeMap<String, String>,
    ) -> Result<String> {
        let reference = self.reference(tag)?;
        let layers = vec![ImageLayer {
            data: archive,
            media_type: LAYER_MEDIA_TYPE.to_string(),
            annotations: None,
        }];
        let config = Config {
            data: b"{}".to_vec(),
            media_type: EMPTY_CONFIG_MEDIA_TYPE.to_string(),
            annotations: None,
        };
        let annotations = (!annotations.is_empty()).then(|| annotations.into_iter().collect());
        let mut manifest = OciImageManifest::build(&layers, &config, annotations);
        manifest.artifact_type = Some(ARTIFACT_TYPE.to_string());

        let response = self
            .bounded(
                self.client
                    .push(&reference, &layers, config, &self.auth, Some(manifest)),
            )
            .await?
            .map_err(|e| RepoError::OciPushFailed {
                message: e.to_string(),
            })?;
        tracing::info!(repo = %self.record.name, %tag, manifest = %response.manifest_url, "module pushed");
        Ok(response.manifest_url)
    }

    /// Check that the registry answers and accepts the credentials
    pub async fn check(&self) -> Result<()> {
        let reference = self.reference("latest")?;
        self.bounded(self.client.list_tags(&reference, &self.auth, Some(1), None))
            .await?
            .map_err(|e| RepoError::AuthFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn bounded<T>(&self, operation: impl Future<Output = T>) -> Result<T> {
        if self.record.timeout == 0 {
            return Ok(operation.await);
        }
        tokio::time::timeout(Duration::from_secs(self.record.timeout), operation)
            .await
            .map_err(|_| RepoError::Timeout {
                seconds: self.record.timeout,
            })
    }
}

fn create_client(record: &RepoRecord) -> Result<Client> {
    let protocol = if record.plain_http {
        ClientProtocol::Http
    } else {
        ClientProtocol::Https
    };
    let mut extra_root_certificates = Vec::new();
    if let Some(ca_file) = &record.ca_file {
        let data = std::fs::read(ca_file).map_err(|e| RepoError::CaCertificate {
            message: e.to_string(),
        })?;
        extra_root_certificates.push(Certificate {
            encoding: CertificateEncoding::Pem,
            data,
        });
    }
    let config = ClientConfig {
        protocol,
        accept_invalid_certificates: record.insecure_skip_tls_verify,
        extra_root_certificates,
        ..Default::default()
    };
    Ok(Client::new(config))
}
