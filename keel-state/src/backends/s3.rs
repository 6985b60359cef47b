//! S3 object store

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketVersioningStatus, PublicAccessBlockConfiguration, ServerSideEncryption,
    VersioningConfiguration,
};
use log::info;

use keel_core::config::BackendConfig;

use crate::store::{ObjectStore, StoreError, StoreResult, WriteMode};

/// S3-based object store
pub struct S3Store {
    /// S3 client
    client: Client,
    /// Bucket name
    bucket: String,
    /// Key prefix prepended to every path
    prefix: String,
    /// AWS region
    region: String,
    /// Whether to encrypt objects (default: true)
    encrypt: bool,
    /// Whether to auto-create the bucket if it doesn't exist (default: true)
    auto_create: bool,
}

impl S3Store {
    /// Create a new S3Store from configuration
    pub async fn from_config(config: &BackendConfig) -> StoreResult<Self> {
        let bucket = config
            .get_string("bucket")
            .ok_or_else(|| StoreError::configuration("Missing required attribute: bucket"))?
            .to_string();

        let region = config
            .get_string("region")
            .ok_or_else(|| StoreError::configuration("Missing required attribute: region"))?
            .to_string();

        let prefix = config
            .get_string("prefix")
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();

        let encrypt = config.get_bool_or("encrypt", true);
        let auto_create = config.get_bool_or("auto_create", true);

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.clone()))
            .load()
            .await;

        let client = Client::new(&aws_config);

        Ok(Self {
            client,
            bucket,
            prefix,
            region,
            encrypt,
            auto_create,
        })
    }

    fn key(&self, path: &str) -> String {
        object_key(&self.prefix, path)
    }

    async fn object_exists(&self, key: &str) -> StoreResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(http_status(&err)) => Ok(false),
            Err(err) => Err(StoreError::Aws(err.to_string())),
        }
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        let result = self.client.head_bucket().bucket(&self.bucket).send().await;

        match result {
            Ok(_) => Ok(true),
            // 403 is a bucket we cannot see, not a missing one
            Err(err) if is_not_found(http_status(&err)) => Ok(false),
            Err(err) => Err(StoreError::Aws(err.to_string())),
        }
    }

    /// Create the bucket with versioning enabled and public access blocked
    async fn create_bucket(&self) -> StoreResult<()> {
        let mut create_request = self.client.create_bucket().bucket(&self.bucket);

        if self.region != "us-east-1" {
            use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            create_request = create_request.create_bucket_configuration(config);
        }

        create_request
            .send()
            .await
            .map_err(|e| StoreError::BucketCreationFailed(e.to_string()))?;

        let versioning_config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();

        self.client
            .put_bucket_versioning()
            .bucket(&self.bucket)
            .versioning_configuration(versioning_config)
            .send()
            .await
            .map_err(|e| StoreError::Aws(format!("Failed to enable versioning: {}", e)))?;

        let public_access_block = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .block_public_policy(true)
            .ignore_public_acls(true)
            .restrict_public_buckets(true)
            .build();

        self.client
            .put_public_access_block()
            .bucket(&self.bucket)
            .public_access_block_configuration(public_access_block)
            .send()
            .await
            .map_err(|e| StoreError::Aws(format!("Failed to block public access: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Io(e.to_string()))?;
                Ok(body.into_bytes().to_vec())
            }
            Err(err) if is_not_found(http_status(&err)) => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(err) => Err(StoreError::Aws(err.to_string())),
        }
    }

    async fn write(&self, path: &str, data: &[u8], mode: WriteMode) -> StoreResult<()> {
        // S3 has no directories, so create_parents needs no work
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(data.to_vec()))
            .content_type("application/json");

        if !mode.overwrite {
            request = request.if_none_match("*");
        }

        if self.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) if is_create_conflict(http_status(&err)) => {
                Err(StoreError::AlreadyExists(path.to_string()))
            }
            Err(err) => Err(StoreError::Aws(err.to_string())),
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let key = self.key(path);

        // DeleteObject succeeds for missing keys, so check first
        if !self.object_exists(&key).await? {
            return Err(StoreError::NotFound(path.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Aws(e.to_string()))?;

        Ok(())
    }

    async fn init(&self) -> StoreResult<()> {
        if self.bucket_exists().await? {
            return Ok(());
        }

        if !self.auto_create {
            return Err(StoreError::BucketNotFound(self.bucket.clone()));
        }

        info!("Creating state bucket {}", self.bucket);
        self.create_bucket().await
    }
}

/// Build the object key for a path under an optional prefix
fn object_key(prefix: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// Raw HTTP status of an S3 error, if a response was received
fn http_status<E>(err: &aws_sdk_s3::error::SdkError<E>) -> Option<u16> {
    err.raw_response().map(|raw| raw.status().as_u16())
}

fn is_not_found(status: Option<u16>) -> bool {
    status == Some(404)
}

/// A conditional create lost to an existing object.
///
/// 412 Precondition Failed is the usual answer to `If-None-Match: *`;
/// 409 Conflict is returned when a concurrent conditional write is in flight.
fn is_create_conflict(status: Option<u16>) -> bool {
    matches!(status, Some(409) | Some(412))
}
