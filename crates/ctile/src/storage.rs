// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Object-store access for cached tiles.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;

/// A non-miss object-store failure: transport, authentication, throttling.
/// A missing key is not an error; [`ObjectBackend::fetch`] reports it as
/// `Ok(None)`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Storage backend for tiles.
///
/// Implementations must normalize the vendor's "no such key" signal into
/// `Ok(None)`; everything else surfaces as a [`StoreError`]. The resolver
/// treats only `Ok(None)` as a cache miss, so misclassifying an outage as a
/// miss would turn it into a stampede on the backing log.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Fetch the object at `key`, or `None` if the key does not exist.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store an object at `key`, overwriting any existing object.
    async fn upload(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;
}

/// [`ObjectBackend`] over an S3-compatible bucket.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ObjectBackend for S3Store {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_no_such_key())
                {
                    return Ok(None);
                }
                return Err(StoreError::new(format!(
                    "getting from bucket {:?} with key {key:?}: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                )));
            }
        };

        let body = output.body.collect().await.map_err(|err| {
            StoreError::new(format!(
                "reading body from bucket {:?} with key {key:?}: {err}",
                self.bucket
            ))
        })?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn upload(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|err| {
                StoreError::new(format!(
                    "putting in bucket {:?} with key {key:?}: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}
