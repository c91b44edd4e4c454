//! Amazon S3 endpoints: `https://{bucket}.s3.{region}.amazonaws.com[/prefix...]`.

use super::{join_prefix, split_endpoint, ENGINE_SCHEME};
use crate::utils::errors::{OrchestratorError, Result};

pub const CLOUD_NAME: &str = "aws";
pub const DOMAIN: &str = "amazonaws.com";
pub const SERVICE: &str = "s3";

/// Decomposed virtual-hosted-style endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Endpoint {
    pub bucket: String,
    pub region: String,
    pub prefix_segments: Vec<String>,
}

impl S3Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self> {
        let parts = split_endpoint(endpoint)?;

        let labels: Vec<&str> = parts.host.splitn(3, '.').collect();
        let [bucket, service, rest] = labels.as_slice() else {
            return Err(OrchestratorError::invalid_endpoint(
                endpoint,
                "expected {bucket}.s3.{region}.amazonaws.com",
            ));
        };
        if bucket.is_empty() || *service != SERVICE {
            return Err(OrchestratorError::invalid_endpoint(
                endpoint,
                "expected {bucket}.s3.{region}.amazonaws.com",
            ));
        }

        let region = rest
            .strip_suffix(DOMAIN)
            .and_then(|r| r.strip_suffix('.'))
            .filter(|r| !r.is_empty() && !r.contains('.'))
            .ok_or_else(|| {
                OrchestratorError::invalid_endpoint(endpoint, format!("domain must be {}", DOMAIN))
            })?;

        Ok(Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            prefix_segments: parts.segments,
        })
    }

    pub fn repository_url(&self, repo_name: &str, prefix_hint: &str) -> String {
        url(
            &self.region,
            &self.bucket,
            &join_prefix(&self.prefix_segments, prefix_hint),
            repo_name,
        )
    }
}

/// `s3:s3.{region}.amazonaws.com/{bucket}/{prefix}{repo}`. `prefix` is empty
/// or ends with `/`.
pub fn url(region: &str, bucket: &str, prefix: &str, repo_name: &str) -> String {
    format!(
        "{}:{}.{}.{}/{}/{}{}",
        ENGINE_SCHEME, SERVICE, region, DOMAIN, bucket, prefix, repo_name
    )
}

pub fn format(endpoint: &str, repo_name: &str, prefix_hint: &str) -> Result<String> {
    Ok(S3Endpoint::parse(endpoint)?.repository_url(repo_name, prefix_hint))
}
