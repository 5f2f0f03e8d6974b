//! S3 (and S3-compatible) object store.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use nimbus_core::{DistributorConfig, Error, ObjectStore, PutObject, Result, Visibility};
use tracing::debug;

pub struct S3ObjectStore {
    client: Client,
    region: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    /// Build a client from the distributor config.
    ///
    /// Static credentials are used when configured; otherwise the default
    /// AWS chain applies (environment, shared profile, web identity, IMDS).
    pub async fn from_config(config: &DistributorConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region().to_string()));

        if let Some(creds) = config.credentials() {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                creds.session_token.clone(),
                None,
                "nimbus-config",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = config.endpoint() {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region().to_string(),
            endpoint: config.endpoint().map(str::to_string),
        }
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, config: &DistributorConfig) -> Self {
        Self {
            client,
            region: config.region().to_string(),
            endpoint: config.endpoint().map(str::to_string),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, object: PutObject) -> Result<()> {
        let size = object.body.len();
        let mut request = self
            .client
            .put_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .content_type(&object.content_type)
            .body(ByteStream::from(object.body));

        if object.visibility == Visibility::PublicRead {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        if let Some(cache_control) = &object.cache_control {
            request = request.cache_control(cache_control);
        }

        request.send().await.map_err(|e| Error::UploadFailed {
            key: object.key.clone(),
            reason: DisplayErrorContext(&e).to_string(),
        })?;

        debug!(bucket = %object.bucket, key = %object.key, size, "PutObject succeeded");
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }

    fn name(&self) -> &str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::DistributorSettings;

    #[tokio::test]
    async fn test_public_url_virtual_hosted() {
        let config =
            DistributorConfig::from_settings(DistributorSettings::new("assets", "eu-west-1"))
                .unwrap();
        let store = S3ObjectStore::from_config(&config).await;
        assert_eq!(
            store.public_url("assets", "js/compiled.a.js"),
            "https://assets.s3.eu-west-1.amazonaws.com/js/compiled.a.js"
        );
    }

    #[tokio::test]
    async fn test_public_url_custom_endpoint() {
        let settings = DistributorSettings {
            endpoint: Some("http://localhost:9000/".into()),
            access_key_id: Some("minio".into()),
            secret_access_key: Some("minio123".into()),
            ..DistributorSettings::new("assets", "us-east-1")
        };
        let config = DistributorConfig::from_settings(settings).unwrap();
        let store = S3ObjectStore::from_config(&config).await;
        assert_eq!(
            store.public_url("assets", "img/a.png"),
            "http://localhost:9000/assets/img/a.png"
        );
        assert_eq!(store.name(), "s3");
    }

    #[tokio::test]
    async fn test_default_credential_chain_without_static_keys() {
        let config =
            DistributorConfig::from_settings(DistributorSettings::new("assets", "us-east-1"))
                .unwrap();
        assert!(config.credentials().is_none());

        let store = S3ObjectStore::from_config(&config).await;
        let client_config = store.client.config();
        assert!(client_config.credentials_provider().is_some());
        assert_eq!(
            client_config.region().map(|r| r.as_ref()),
            Some("us-east-1")
        );
    }
}
