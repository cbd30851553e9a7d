// src/object/s3.rs

//! S3 object store client.
//!
//! Implements [`ObjectStoreClient`] on top of `aws-sdk-s3`. Works against
//! AWS S3 and S3-compatible services (MinIO, LocalStack) via a custom
//! endpoint and path-style addressing.

use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, Delete, ObjectIdentifier,
};
use bytes::Bytes;

use super::client::{ByteStream, CompletedPart, ObjectBody, ObjectStoreClient};
use crate::config::ObjectStoreConfig;
use crate::error::{Result, StoreError};

/// [`ObjectStoreClient`] backed by an S3-compatible service.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Wraps an already-configured SDK client.
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Builds a client from the object store configuration, resolving
    /// credentials from the environment.
    pub async fn from_config(config: &ObjectStoreConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }

    fn request_error<E>(
        bucket: &str,
        key: &str,
        action: &str,
        err: &SdkError<E>,
    ) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        StoreError::object_store(
            bucket,
            key,
            format!("{} failed: {}", action, DisplayErrorContext(err)),
        )
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::request_error(bucket, key, "initiate multipart upload", &e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::object_store(bucket, key, "store returned no upload id")
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(SdkByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                Self::request_error(bucket, key, &format!("upload part {}", part_number), &e)
            })?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            StoreError::object_store(
                bucket,
                key,
                format!("store returned no tag for part {}", part_number),
            )
        })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let sdk_parts: Vec<SdkCompletedPart> = parts
            .iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(sdk_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| Self::request_error(bucket, key, "complete multipart upload", &e))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            StoreError::object_store(bucket, key, "store returned no object tag")
        })
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| Self::request_error(bucket, key, "abort multipart upload", &e))?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
        if_match: Option<&str>,
    ) -> Result<ObjectBody> {
        let is_ranged = range.is_some();
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(|r| format!("bytes={}-{}", r.start, r.end.saturating_sub(1))))
            .set_if_match(if_match.map(String::from))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if let SdkError::ServiceError(ref service_err) = err {
                    if matches!(service_err.err(), GetObjectError::NoSuchKey(_)) {
                        return Err(StoreError::not_found(bucket, key));
                    }
                    if service_err.err().code() == Some("PreconditionFailed") {
                        return Err(StoreError::object_store(
                            bucket,
                            key,
                            "precondition failed: object tag changed since it was pinned",
                        ));
                    }
                }
                return Err(Self::request_error(bucket, key, "get object", &err));
            }
        };

        // Ranged responses carry the range length in content-length; the
        // full object size is the trailer of content-range.
        let content_length = if is_ranged {
            output
                .content_range()
                .and_then(|cr| cr.rsplit('/').next())
                .and_then(|total| total.parse::<u64>().ok())
                .or_else(|| output.content_length().map(|l| l as u64))
                .unwrap_or(0)
        } else {
            output.content_length().unwrap_or(0) as u64
        };
        let etag = output.e_tag().unwrap_or_default().to_string();

        let owner_bucket = bucket.to_string();
        let owner_key = key.to_string();
        let stream: ByteStream = Box::pin(futures::stream::try_unfold(
            output.body,
            move |mut body| {
                let bucket = owner_bucket.clone();
                let key = owner_key.clone();
                async move {
                    match body.try_next().await {
                        Ok(Some(chunk)) => Ok(Some((chunk, body))),
                        Ok(None) => Ok(None),
                        Err(err) => Err(StoreError::object_store(
                            bucket,
                            key,
                            format!("body stream failed: {}", err),
                        )),
                    }
                }
            },
        ));

        Ok(ObjectBody {
            content_length,
            etag,
            stream,
        })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let identifiers: Vec<ObjectIdentifier> = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder().key(key).build().map_err(|e| {
                    StoreError::object_store(bucket, key, format!("invalid delete key: {}", e))
                })
            })
            .collect::<Result<_>>()?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .map_err(|e| {
                StoreError::object_store(bucket, "", format!("invalid delete request: {}", e))
            })?;

        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| Self::request_error(bucket, "", "delete objects", &e))?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let result = self.client.create_bucket().bucket(bucket).send().await;
        match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_err)) => match service_err.err() {
                CreateBucketError::BucketAlreadyExists(_)
                | CreateBucketError::BucketAlreadyOwnedByYou(_) => Err(
                    StoreError::object_store(bucket, "", "bucket already exists"),
                ),
                other => Err(StoreError::object_store(
                    bucket,
                    "",
                    format!("create bucket failed: {}", other),
                )),
            },
            Err(err) => Err(Self::request_error(bucket, "", "create bucket", &err)),
        }
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let result = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.clone())
                .send()
                .await;

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    if let SdkError::ServiceError(ref service_err) = err {
                        if matches!(service_err.err(), ListObjectsV2Error::NoSuchBucket(_)) {
                            return Err(StoreError::not_found(bucket, ""));
                        }
                    }
                    return Err(Self::request_error(bucket, "", "list objects", &err));
                }
            };

            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }
}
