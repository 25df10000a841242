//! Kubernetes Secrets storage driver
//!
//! Each release lives in a Secret named `kubehcl.<release>` in the release
//! namespace, of type `kubehcl.sh/module.v1` and labelled `owner=kubehcl`.
//! Replacing an existing Secret sends the resource version read earlier, so
//! a concurrent apply fails instead of being silently overwritten.

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{SECRET_TYPE, StorageDriver};
use crate::error::{KubeError, Result};
use crate::release::{ReleaseState, STATE_NAME_PREFIX, state_name};

pub struct SecretsDriver {
    client: Client,
}

impl SecretsDriver {
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build_secret(&self, state: &ReleaseState) -> Result<Secret> {
        let data = state
            .to_data()?
            .into_iter()
            .map(|(k, v)| (k, ByteString(v)))
            .collect();
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(state.state_name()),
                namespace: Some(state.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "owner".to_string(),
                    "kubehcl".to_string(),
                )])),
                resource_version: state.resource_version.clone(),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }
}

fn parse_secret(secret: &Secret) -> Result<ReleaseState> {
    let secret_name = secret.metadata.name.as_deref().unwrap_or_default();
    let name = secret_name
        .strip_prefix(STATE_NAME_PREFIX)
        .ok_or_else(|| KubeError::Storage(format!("unexpected state secret {secret_name}")))?;
    let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
    let data: BTreeMap<String, Vec<u8>> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), v.0.clone()))
        .collect();
    let mut state = ReleaseState::from_data(name, namespace, &data)?;
    state.resource_version = secret.metadata.resource_version.clone();
    Ok(state)
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ReleaseState>> {
        match self.secrets_api(namespace).get_opt(&state_name(name)).await? {
            Some(secret) => Ok(Some(parse_secret(&secret)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, state: &ReleaseState) -> Result<()> {
        let api = self.secrets_api(&state.namespace);
        let key = state.state_name();
        let secret = self.build_secret(state)?;

        if state.resource_version.is_some() {
            return match api.replace(&key, &PostParams::default(), &secret).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::Storage(format!(
                    "release '{}' was modified by another operation",
                    state.name
                ))),
                Err(e) => Err(e.into()),
            };
        }

        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                let existing = api.get(&key).await?;
                let mut secret = secret;
                secret.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&key, &PostParams::default(), &secret).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .secrets_api(namespace)
            .delete(&state_name(name), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<ReleaseState>> {
        let params = ListParams::default().fields(&format!("type={SECRET_TYPE}"));
        let secrets = self.secrets_api(namespace).list(&params).await?;
        let mut releases = Vec::new();
        for secret in &secrets.items {
            match parse_secret(secret) {
                Ok(state) => releases.push(state),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable release secret"),
            }
        }
        releases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_core::BackendStorageKind;

    #[test]
    fn test_parse_secret() {
        let mut state = ReleaseState::new("alpha", "prod", BackendStorageKind::KubeSecret);
        state.release = [("kube_resource.a".to_string(), b"{}".to_vec())]
            .into_iter()
            .collect();
        let data = state
            .to_data()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k, ByteString(v)))
            .collect();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("kubehcl.alpha".to_string()),
                namespace: Some("prod".to_string()),
                resource_version: Some("12".to_string()),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        };

        let parsed = parse_secret(&secret).unwrap();
        assert_eq!(parsed.name, "alpha");
        assert_eq!(parsed.namespace, "prod");
        assert_eq!(parsed.resource_version.as_deref(), Some("12"));
        assert_eq!(parsed.release, state.release);
    }

    #[test]
    fn test_foreign_secret_is_rejected() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("other".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(parse_secret(&secret).is_err());
    }
}
