//! Managed storage addresses, derived from an issued token rather than from
//! user input.

use super::{aws, cos, ENGINE_SCHEME};

/// Directory under the token prefix that holds engine repositories.
pub const REPOSITORY_DIR: &str = "restic";

/// Repository URL for a managed bucket on `cloud`. Anything other than
/// Tencent Cloud is addressed as S3.
pub fn format_url(cloud: &str, region: &str, bucket: &str, prefix: &str, repo_name: &str) -> String {
    let mut path = String::new();
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        path.push_str(prefix);
        path.push('/');
    }
    path.push_str(REPOSITORY_DIR);
    path.push('/');

    if cloud == cos::CLOUD_NAME {
        cos::url(region, bucket, &path, repo_name)
    } else {
        format!(
            "{}:{}.{}.{}/{}/{}{}",
            ENGINE_SCHEME, aws::SERVICE, region, aws::DOMAIN, bucket, path, repo_name
        )
    }
}
