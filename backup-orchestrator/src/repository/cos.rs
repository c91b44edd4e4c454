//! Tencent Cloud COS endpoints.
//!
//! Two host shapes are accepted and told apart by label count:
//! `{bucket}.cos.{region}.myqcloud.com[/prefix...]` (bucket-first) and
//! `cos.{region}.myqcloud.com/{bucket}[/prefix...]` (service-first).

use super::{join_prefix, split_endpoint, ENGINE_SCHEME};
use crate::utils::errors::{OrchestratorError, Result};

pub const CLOUD_NAME: &str = "tencentcloud";
pub const DOMAIN: &str = "myqcloud.com";
pub const SERVICE: &str = "cos";

const BUCKET_FIRST_LABELS: usize = 5;
const SERVICE_FIRST_LABELS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosEndpoint {
    pub bucket: String,
    pub region: String,
    pub prefix_segments: Vec<String>,
}

impl CosEndpoint {
    pub fn parse(endpoint: &str) -> Result<Self> {
        let parts = split_endpoint(endpoint)?;
        let labels: Vec<&str> = parts.host.split('.').collect();

        let (bucket, service_labels, segments) = match labels.len() {
            BUCKET_FIRST_LABELS => (labels[0].to_string(), &labels[1..], parts.segments),
            SERVICE_FIRST_LABELS => {
                let mut segments = parts.segments.into_iter();
                let bucket = segments.next().ok_or_else(|| {
                    OrchestratorError::invalid_endpoint(endpoint, "missing bucket path segment")
                })?;
                (bucket, &labels[..], segments.collect())
            }
            _ => {
                return Err(OrchestratorError::invalid_endpoint(
                    endpoint,
                    "expected {bucket}.cos.{region}.myqcloud.com or cos.{region}.myqcloud.com/{bucket}",
                ))
            }
        };

        let [service, region, domain @ ..] = service_labels else {
            return Err(OrchestratorError::invalid_endpoint(endpoint, "malformed host"));
        };
        if *service != SERVICE {
            return Err(OrchestratorError::invalid_endpoint(
                endpoint,
                format!("service must be {}", SERVICE),
            ));
        }
        if domain.join(".") != DOMAIN {
            return Err(OrchestratorError::invalid_endpoint(
                endpoint,
                format!("domain must be {}", DOMAIN),
            ));
        }
        if bucket.is_empty() || region.is_empty() {
            return Err(OrchestratorError::invalid_endpoint(endpoint, "empty bucket or region"));
        }

        Ok(Self {
            bucket,
            region: region.to_string(),
            prefix_segments: segments,
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

/// `s3:https://cos.{region}.myqcloud.com/{bucket}/{prefix}{repo}`. `prefix`
/// is empty or ends with `/`.
pub fn url(region: &str, bucket: &str, prefix: &str, repo_name: &str) -> String {
    format!(
        "{}:https://{}.{}.{}/{}/{}{}",
        ENGINE_SCHEME, SERVICE, region, DOMAIN, bucket, prefix, repo_name
    )
}

/// COS needs DNS-style bucket lookup and an explicit region.
pub fn engine_options(region: &str) -> Vec<String> {
    vec![
        "-o".to_string(),
        "s3.bucket-lookup=dns".to_string(),
        "-o".to_string(),
        format!("s3.region={}", region),
    ]
}

pub fn format(endpoint: &str, repo_name: &str, prefix_hint: &str) -> Result<String> {
    Ok(CosEndpoint::parse(endpoint)?.repository_url(repo_name, prefix_hint))
}
