//! Storage locations and how they resolve to engine-ready repositories.

use crate::config::Config;
use crate::repository::{
    self, aws, cos, Credentials, ProviderKind, RepositoryTarget, ResolvedRepository,
};
use crate::space::{SpaceClient, TokenManager};
use crate::utils::errors::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a repository lives, as configured by the user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageLocation {
    Space {
        cloud_name: String,
        region: String,
    },
    Aws {
        endpoint: String,
        access_key: String,
        secret_key: String,
    },
    TencentCloud {
        endpoint: String,
        access_key: String,
        secret_key: String,
    },
    Filesystem {
        base_dir: PathBuf,
    },
}

impl StorageLocation {
    pub fn kind(&self) -> ProviderKind {
        match self {
            StorageLocation::Space { .. } => ProviderKind::Space,
            StorageLocation::Aws { .. } => ProviderKind::Aws,
            StorageLocation::TencentCloud { .. } => ProviderKind::TencentCloud,
            StorageLocation::Filesystem { .. } => ProviderKind::Filesystem,
        }
    }
}

impl fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Space { cloud_name, region } => f
                .debug_struct("Space")
                .field("cloud_name", cloud_name)
                .field("region", region)
                .finish(),
            StorageLocation::Aws { endpoint, .. } | StorageLocation::TencentCloud { endpoint, .. } => f
                .debug_struct(self.kind().as_str())
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
            StorageLocation::Filesystem { base_dir } => f
                .debug_struct("Filesystem")
                .field("base_dir", base_dir)
                .finish(),
        }
    }
}

/// Supplies repositories and, where the provider allows it, fresh
/// credentials after the engine reports expiry.
pub trait RepositoryResolver: Send {
    fn resolve(
        &mut self,
        repo_name: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ResolvedRepository>> + Send;

    fn refresh(
        &mut self,
        repo_name: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ResolvedRepository>> + Send;
}

/// Repositories addressed by user endpoints with long-lived keys.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    location: StorageLocation,
    password: String,
    prefix_hint: String,
}

impl StaticResolver {
    pub fn new(location: StorageLocation, password: impl Into<String>, prefix_hint: impl Into<String>) -> Result<Self> {
        if location.kind() == ProviderKind::Space {
            return Err(OrchestratorError::Config(
                "managed locations need a token-backed resolver".to_string(),
            ));
        }
        Ok(Self {
            location,
            password: password.into(),
            prefix_hint: prefix_hint.into(),
        })
    }

    fn build(&self, repo_name: &str) -> Result<ResolvedRepository> {
        let (endpoint, region, credentials) = match &self.location {
            StorageLocation::Aws {
                endpoint,
                access_key,
                secret_key,
            } => (
                endpoint.clone(),
                aws::S3Endpoint::parse(endpoint)?.region,
                Credentials::static_keys(access_key, secret_key, &self.password),
            ),
            StorageLocation::TencentCloud {
                endpoint,
                access_key,
                secret_key,
            } => (
                endpoint.clone(),
                cos::CosEndpoint::parse(endpoint)?.region,
                Credentials::static_keys(access_key, secret_key, &self.password),
            ),
            StorageLocation::Filesystem { base_dir } => (
                base_dir.display().to_string(),
                String::new(),
                Credentials::password_only(&self.password),
            ),
            StorageLocation::Space { .. } => {
                return Err(OrchestratorError::NotRefreshable("space".to_string()))
            }
        };

        let kind = self.location.kind();
        let url = repository::format(kind, &endpoint, repo_name, &self.prefix_hint)?;
        debug!("Resolved {} repository {}", kind, url);

        Ok(ResolvedRepository {
            target: RepositoryTarget {
                kind,
                repo_name: repo_name.to_string(),
                url,
                region,
                cloud_name: match kind {
                    ProviderKind::Aws => aws::CLOUD_NAME.to_string(),
                    ProviderKind::TencentCloud => cos::CLOUD_NAME.to_string(),
                    _ => String::new(),
                },
            },
            credentials,
        })
    }
}

impl RepositoryResolver for StaticResolver {
    async fn resolve(&mut self, repo_name: &str, _cancel: &CancellationToken) -> Result<ResolvedRepository> {
        self.build(repo_name)
    }

    async fn refresh(&mut self, _repo_name: &str, _cancel: &CancellationToken) -> Result<ResolvedRepository> {
        Err(OrchestratorError::NotRefreshable(
            self.location.kind().to_string(),
        ))
    }
}

/// Managed repositories backed by short-lived issued credentials.
pub struct SpaceResolver {
    tokens: TokenManager,
    cloud_name: String,
    region: String,
    password: String,
}

impl SpaceResolver {
    pub fn new(tokens: TokenManager, cloud_name: impl Into<String>, region: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            tokens,
            cloud_name: cloud_name.into(),
            region: region.into(),
            password: password.into(),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}

impl RepositoryResolver for SpaceResolver {
    async fn resolve(&mut self, repo_name: &str, cancel: &CancellationToken) -> Result<ResolvedRepository> {
        let token = self
            .tokens
            .ensure(repo_name, &self.cloud_name, &self.region, cancel)
            .await?;
        Ok(ResolvedRepository {
            target: token.target(repo_name),
            credentials: token.credentials(&self.password),
        })
    }

    async fn refresh(&mut self, repo_name: &str, cancel: &CancellationToken) -> Result<ResolvedRepository> {
        let token = if self.tokens.current().is_some() {
            self.tokens.refresh(cancel).await?
        } else {
            self.tokens
                .acquire(repo_name, &self.cloud_name, &self.region, cancel)
                .await?
        };
        Ok(ResolvedRepository {
            target: token.target(repo_name),
            credentials: token.credentials(&self.password),
        })
    }
}

/// Resolver chosen from configuration.
pub enum LocationResolver {
    Static(StaticResolver),
    Space(SpaceResolver),
}

impl LocationResolver {
    pub fn from_config(location: &StorageLocation, config: &Config) -> Result<Self> {
        match location {
            StorageLocation::Space { cloud_name, region } => {
                let client = SpaceClient::new(config.space.clone())?;
                let tokens = TokenManager::new(client, config.space.retry.clone());
                Ok(LocationResolver::Space(SpaceResolver::new(
                    tokens,
                    cloud_name.clone(),
                    region.clone(),
                    config.repository.password.clone(),
                )))
            }
            other => Ok(LocationResolver::Static(StaticResolver::new(
                other.clone(),
                config.repository.password.clone(),
                config.storage.default_prefix.clone(),
            )?)),
        }
    }
}

impl RepositoryResolver for LocationResolver {
    async fn resolve(&mut self, repo_name: &str, cancel: &CancellationToken) -> Result<ResolvedRepository> {
        match self {
            LocationResolver::Static(inner) => inner.resolve(repo_name, cancel).await,
            LocationResolver::Space(inner) => inner.resolve(repo_name, cancel).await,
        }
    }

    async fn refresh(&mut self, repo_name: &str, cancel: &CancellationToken) -> Result<ResolvedRepository> {
        match self {
            LocationResolver::Static(inner) => inner.refresh(repo_name, cancel).await,
            LocationResolver::Space(inner) => inner.refresh(repo_name, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_cos_resolution() {
        let location = StorageLocation::TencentCloud {
            endpoint: "https://mytest-bucket.cos.ap-tokyo.myqcloud.com/folder1".to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
        };
        let mut resolver = StaticResolver::new(location, "pw", "olares-backups").unwrap();

        let repo = resolver.resolve("repo", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            repo.target.url,
            "s3:https://cos.ap-tokyo.myqcloud.com/mytest-bucket/folder1/olares-backups/repo"
        );
        assert_eq!(repo.target.region, "ap-tokyo");
        assert_eq!(repo.target.engine_options().len(), 4);
        assert_eq!(repo.credentials.access_key, "AK");
    }

    #[tokio::test]
    async fn test_static_refresh_is_not_supported() {
        let temp = TempDir::new().unwrap();
        let location = StorageLocation::Filesystem {
            base_dir: temp.path().to_path_buf(),
        };
        let mut resolver = StaticResolver::new(location, "pw", "").unwrap();

        let repo = resolver.resolve("repo", &CancellationToken::new()).await.unwrap();
        assert_eq!(repo.target.kind, ProviderKind::Filesystem);

        let err = resolver.refresh("repo", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRefreshable(_)));
    }

    #[test]
    fn test_static_rejects_space() {
        let location = StorageLocation::Space {
            cloud_name: "aws".to_string(),
            region: "us-east-1".to_string(),
        };
        assert!(StaticResolver::new(location, "pw", "").is_err());
    }

    #[test]
    fn test_location_debug_hides_keys() {
        let location = StorageLocation::Aws {
            endpoint: "b.s3.us-east-1.amazonaws.com".to_string(),
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "very-secret".to_string(),
        };
        let printed = format!("{:?}", location);
        assert!(printed.contains("b.s3.us-east-1.amazonaws.com"));
        assert!(!printed.contains("very-secret"));
        assert!(!printed.contains("AKIDEXAMPLE"));
    }

    #[test]
    fn test_location_kind_tag() {
        let location: StorageLocation = serde_json::from_value(serde_json::json!({
            "kind": "space",
            "cloud_name": "aws",
            "region": "us-east-1"
        }))
        .unwrap();
        assert_eq!(location.kind(), ProviderKind::Space);
    }
}
