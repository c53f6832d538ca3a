//! S3 object store
//!
//! Uses the AWS SDK directly. Listing pages through ListObjectsV2 with
//! continuation tokens as the stream is polled; streamed reads hand out the
//! GetObject body in 1 MiB chunks.

use super::error::{BackendError, BackendResult};
use super::{chunked, ListStream, ObjectEntry, ObjectStore, ReadStream, CHUNK_SIZE};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::time::Duration;

use crate::config::S3SourceConfig;

const BACKEND: &str = "s3";

/// Object store backed by an S3 bucket
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    endpoint: String,
    timeout_secs: u64,
}

impl S3ObjectStore {
    /// Build a client from configuration. No request is sent here.
    pub async fn connect(config: &S3SourceConfig) -> BackendResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(BackendError::InvalidConfig {
                backend: BACKEND.to_string(),
                message: "bucket name is empty".to_string(),
            });
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = if let Some(region) = &config.region {
            RegionProviderChain::first_try(Region::new(region.clone()))
        } else {
            RegionProviderChain::default_provider()
        };
        loader = loader.region(region_provider);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials =
                Credentials::new(access_key, secret_key, None, None, "orbit-ingest-explicit");
            loader = loader.credentials_provider(credentials);
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        // Required for MinIO, LocalStack
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build();
        builder = builder.timeout_config(timeout_config);

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "s3.amazonaws.com".to_string()),
            timeout_secs: config.timeout_seconds,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn classify(&self, key: &str, operation: &str, message: String) -> BackendError {
        classify(key, operation, message, self.timeout_secs)
    }

    async fn get_body(
        &self,
        key: &str,
    ) -> BackendResult<aws_sdk_s3::operation::get_object::GetObjectOutput> {
        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.classify(key, "GetObject", format!("{:?}", e)))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn test_connection(&self) -> BackendResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                let message = format!("{:?}", e);
                if is_timeout(&message) {
                    BackendError::Timeout {
                        operation: "HeadBucket".to_string(),
                        duration_secs: self.timeout_secs,
                    }
                } else if message.contains("404") || message.contains("NoSuchBucket") {
                    BackendError::NotFound {
                        key: self.bucket.clone(),
                        backend: BACKEND.to_string(),
                    }
                } else if message.contains("403") || message.contains("AccessDenied") {
                    BackendError::AuthenticationFailed {
                        backend: BACKEND.to_string(),
                        message: format!("Cannot access bucket: {}", self.bucket),
                    }
                } else {
                    BackendError::ConnectionFailed {
                        backend: BACKEND.to_string(),
                        endpoint: self.endpoint.clone(),
                        source: Some(Box::new(e)),
                    }
                }
            })?;
        Ok(())
    }

    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<ListStream> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let prefix = prefix.trim_start_matches('/').to_string();
        let timeout_secs = self.timeout_secs;

        // State: Some(token) while pages remain, None once the last page is out
        let stream = stream::unfold(Some(None::<String>), move |token_state| {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();

            async move {
                let token = token_state?;

                let mut request = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if let Some(ref t) = token {
                    request = request.continuation_token(t);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        let message = format!("{:?}", e);
                        let err = if is_timeout(&message) {
                            BackendError::Timeout {
                                operation: "ListObjectsV2".to_string(),
                                duration_secs: timeout_secs,
                            }
                        } else {
                            BackendError::Other {
                                backend: BACKEND.to_string(),
                                message: format!("Failed to list objects: {}", e),
                            }
                        };
                        return Some((stream::once(async move { Err(err) }).boxed(), None));
                    }
                };

                let page: Vec<BackendResult<ObjectEntry>> = response
                    .contents()
                    .iter()
                    .filter_map(|object| {
                        let key = object.key()?;
                        // Folder placeholders
                        if key.ends_with('/') {
                            return None;
                        }
                        let size = object.size().unwrap_or(0).max(0) as u64;
                        Some(Ok(ObjectEntry::new(key, size)))
                    })
                    .collect();

                let next = if response.is_truncated().unwrap_or(false) {
                    response
                        .next_continuation_token()
                        .map(|t| Some(t.to_string()))
                } else {
                    None
                };

                Some((stream::iter(page).boxed(), next))
            }
        })
        .flatten()
        .boxed();

        Ok(stream)
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        let output = self.get_body(key).await?;
        let collected = output.body.collect().await.map_err(|e| BackendError::Network {
            message: format!("Failed to read body of {}", key),
            source: Some(Box::new(e)),
        })?;
        Ok(collected.into_bytes())
    }

    async fn open_stream(&self, key: &str) -> BackendResult<ReadStream> {
        let output = self.get_body(key).await?;
        Ok(chunked(output.body.into_async_read(), CHUNK_SIZE))
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        match self.size(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self, key: &str) -> BackendResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.classify(key, "HeadObject", format!("{:?}", e)))?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }
}

/// SDK timeouts surface either as `TimeoutError` or as a connector error of kind `Timeout`
fn is_timeout(message: &str) -> bool {
    message.contains("TimeoutError") || message.contains("kind: Timeout")
}

fn classify(key: &str, operation: &str, message: String, timeout_secs: u64) -> BackendError {
    if is_timeout(&message) {
        BackendError::Timeout {
            operation: operation.to_string(),
            duration_secs: timeout_secs,
        }
    } else if message.contains("NoSuchKey")
        || message.contains("404")
        || message.contains("NotFound")
    {
        BackendError::NotFound {
            key: key.to_string(),
            backend: BACKEND.to_string(),
        }
    } else if message.contains("403") || message.contains("AccessDenied") {
        BackendError::PermissionDenied {
            key: key.to_string(),
            message,
        }
    } else {
        BackendError::Other {
            backend: BACKEND.to_string(),
            message: format!("{} failed: {}", operation, message),
        }
    }
}
