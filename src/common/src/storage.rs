use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use url::Url;

use crate::config::StorageConfig;

/// Region used when neither the DSN nor the environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection details extracted from a storage DSN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Location {
    /// Custom endpoint for S3-compatible stores, `None` for AWS itself
    pub endpoint: Option<String>,
    pub bucket: String,
    /// Explicit `region` query parameter
    pub region: Option<String>,
    /// Static access key and secret embedded in the DSN
    pub credentials: Option<(String, String)>,
    /// S3-compatible stores such as MinIO need path-style URLs
    pub force_path_style: bool,
}

impl S3Location {
    /// Parse a DSN of the form `s3://[access_key:secret_key@]host[:port]/bucket[?region=...]`
    ///
    /// # Examples
    /// ```
    /// use common::storage::S3Location;
    ///
    /// let location = S3Location::from_dsn("s3://key:secret@localhost:9000/uploads").unwrap();
    /// assert_eq!(location.bucket, "uploads");
    /// assert_eq!(location.endpoint.as_deref(), Some("http://localhost:9000"));
    /// assert!(location.force_path_style);
    /// ```
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let url =
            Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

        if url.scheme() != "s3" {
            return Err(anyhow::anyhow!(
                "Unsupported storage scheme: {}. Supported: s3",
                url.scheme()
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
        let port = url.port();
        let bucket = url.path().trim_matches('/');

        if bucket.is_empty() {
            return Err(anyhow::anyhow!(
                "S3 DSN must specify a bucket: s3://host/bucket"
            ));
        }

        let access_key = url.username();
        let credentials = if access_key.is_empty() {
            None
        } else {
            Some((
                access_key.to_string(),
                url.password().unwrap_or("").to_string(),
            ))
        };

        let region = url
            .query_pairs()
            .find(|(name, _)| name == "region")
            .map(|(_, value)| value.into_owned());

        // Real S3 needs no custom endpoint; everything else is S3-compatible
        let endpoint = if host.contains("amazonaws.com") {
            None
        } else {
            let scheme = if port == Some(443) { "https" } else { "http" };
            Some(match port {
                Some(p) => format!("{scheme}://{host}:{p}"),
                None => format!("{scheme}://{host}"),
            })
        };

        Ok(Self {
            force_path_style: endpoint.is_some(),
            endpoint,
            bucket: bucket.to_string(),
            region,
            credentials,
        })
    }
}

/// Build an S3 client from storage configuration.
///
/// Returns the client together with the location parsed from the DSN so the
/// caller knows which bucket the DSN names.
pub async fn create_s3_client(storage: &StorageConfig) -> Result<(Client, S3Location)> {
    let location = S3Location::from_dsn(&storage.dsn).context("Failed to parse storage DSN")?;

    let region = RegionProviderChain::first_try(location.region.clone().map(Region::new))
        .or_default_provider()
        .or_else(Region::new(DEFAULT_REGION));

    let timeouts = TimeoutConfig::builder()
        .connect_timeout(storage.connect_timeout)
        .operation_timeout(storage.operation_timeout)
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .timeout_config(timeouts)
        .retry_config(RetryConfig::standard().with_max_attempts(storage.max_attempts));

    if let Some(endpoint) = &location.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    if let Some((access_key, secret_key)) = &location.credentials {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "janitor-dsn",
        ));
    }

    let shared_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
        .force_path_style(location.force_path_style)
        .build();

    tracing::debug!(
        bucket = %location.bucket,
        endpoint = location.endpoint.as_deref().unwrap_or("aws"),
        "Created S3 client"
    );

    Ok((Client::from_conf(s3_config), location))
}
