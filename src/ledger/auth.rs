use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to serialize token cache for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Client secret file has neither an \"installed\" nor a \"web\" section")]
    MissingClientSecret,
    #[error("Failed to set up the OAuth authenticator: {0}")]
    Authenticator(std::io::Error),
    #[error("Token request failed: {0}")]
    Token(#[from] yup_oauth2::Error),
    #[error("Token endpoint returned no access token")]
    MissingAccessToken,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A bearer token valid for at least the next minute.
    async fn access_token(&self) -> Result<String, AuthError>;
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "ClientSecret::default_auth_uri")]
    pub auth_uri: Url,
    #[serde(default = "ClientSecret::default_token_uri")]
    pub token_uri: Url,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    fn default_auth_uri() -> Url {
        Url::parse("https://accounts.google.com/o/oauth2/auth").expect("static url")
    }

    fn default_token_uri() -> Url {
        Url::parse("https://oauth2.googleapis.com/token").expect("static url")
    }

    #[tracing::instrument]
    pub fn load(path: impl AsRef<Path> + Debug) -> Result<Self, AuthError> {
        let contents = read_file(path.as_ref())?;
        let file: ClientSecretFile =
            serde_json::from_str(&contents).map_err(|source| AuthError::Parse {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        file.installed
            .or(file.web)
            .ok_or(AuthError::MissingClientSecret)
    }
}

impl From<ClientSecret> for ApplicationSecret {
    fn from(secret: ClientSecret) -> Self {
        ApplicationSecret {
            client_id: secret.client_id,
            client_secret: secret.client_secret,
            auth_uri: secret.auth_uri.to_string(),
            token_uri: secret.token_uri.to_string(),
            ..Default::default()
        }
    }
}

/// The cached credential, in the same shape Google's client libraries write
/// for authorized users.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StoredToken {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// Returns `Ok(None)` when no credential has been cached yet.
    #[tracing::instrument]
    pub fn load(path: impl AsRef<Path> + Debug) -> Result<Option<Self>, AuthError> {
        if !path.as_ref().exists() {
            return Ok(None);
        }
        let contents = read_file(path.as_ref())?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| AuthError::Parse {
                path: path.as_ref().to_path_buf(),
                source,
            })
    }

    #[tracing::instrument(skip(self))]
    pub fn save(&self, path: impl AsRef<Path> + Debug) -> Result<(), AuthError> {
        let io_error = |source| AuthError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        };
        let contents = serde_json::to_string(&self).map_err(|source| AuthError::Serialize {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let mut file = std::fs::File::create(path.as_ref()).map_err(io_error)?;
        file.write_all(contents.as_bytes()).map_err(io_error)
    }

    fn token_info(&self) -> Option<TokenInfo> {
        Some(TokenInfo {
            access_token: Some(self.token.clone()?),
            refresh_token: self.refresh_token.clone(),
            expires_at: self
                .expiry
                .and_then(|expiry| OffsetDateTime::from_unix_timestamp(expiry.timestamp()).ok()),
            id_token: None,
        })
    }
}

fn read_file(path: &Path) -> Result<String, AuthError> {
    let io_error = |source| AuthError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(io_error)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(io_error)?;
    Ok(contents)
}

/// Token storage behind the authenticator. Holds one credential and writes
/// it to the cache file on every change.
#[derive(Clone)]
pub struct TokenCache {
    path: Arc<PathBuf>,
    token: Arc<Mutex<StoredToken>>,
}

impl TokenCache {
    pub fn open(path: impl AsRef<Path> + Debug) -> Result<Self, AuthError> {
        let token = StoredToken::load(&path)?.unwrap_or_default();
        Ok(Self {
            path: Arc::new(path.as_ref().to_path_buf()),
            token: Arc::new(Mutex::new(token)),
        })
    }

    pub async fn current(&self) -> StoredToken {
        self.token.lock().await.clone()
    }
}

#[async_trait]
impl TokenStorage for TokenCache {
    async fn set(&self, scopes: &[&str], info: TokenInfo) -> anyhow::Result<()> {
        let mut token = self.token.lock().await;
        let updated = StoredToken {
            token: info.access_token,
            // refresh responses usually omit it
            refresh_token: info.refresh_token.or_else(|| token.refresh_token.clone()),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            expiry: info
                .expires_at
                .and_then(|at| DateTime::from_timestamp(at.unix_timestamp(), 0)),
        };
        updated.save(self.path.as_path())?;
        info!("Sheets credential cached, expiry is {:?}", updated.expiry);
        *token = updated;
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.token.lock().await.token_info()
    }
}

/// Prints the consent URL while the loopback listener waits for Google's
/// redirect.
pub struct ConsentPrompt;

impl InstalledFlowDelegate for ConsentPrompt {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            warn!("Sheets access needs consent, waiting for the browser redirect");
            println!("Please go to: {url}");
            Ok(String::new())
        })
    }
}

/// OAuth credential for the Sheets API, backed by the installed-app flow.
pub struct GoogleCredentials {
    authenticator: DefaultAuthenticator,
    cache: TokenCache,
    scopes: Vec<String>,
    requests: Mutex<()>,
}

impl GoogleCredentials {
    /// Startup authorization. Uses the cached token, refreshes it, or falls
    /// back to the consent flow, and makes sure a refresh token is cached.
    #[tracing::instrument]
    pub async fn authorize(
        secret_path: impl AsRef<Path> + Debug,
        cache_path: impl AsRef<Path> + Debug,
        scopes: Vec<String>,
    ) -> Result<Self, AuthError> {
        let secret = ClientSecret::load(secret_path)?;
        let credentials = Self::build(secret, cache_path, scopes, Box::new(ConsentPrompt)).await?;
        credentials.ensure_refreshable().await?;
        Ok(credentials)
    }

    async fn build(
        secret: ClientSecret,
        cache_path: impl AsRef<Path> + Debug,
        scopes: Vec<String>,
        prompt: Box<dyn InstalledFlowDelegate>,
    ) -> Result<Self, AuthError> {
        let cache = TokenCache::open(cache_path)?;
        let authenticator = InstalledFlowAuthenticator::builder(
            secret.into(),
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .flow_delegate(prompt)
        .with_storage(Box::new(cache.clone()))
        .build()
        .await
        .map_err(AuthError::Authenticator)?;
        Ok(Self {
            authenticator,
            cache,
            scopes,
            requests: Mutex::new(()),
        })
    }

    async fn ensure_refreshable(&self) -> Result<(), AuthError> {
        let _guard = self.requests.lock().await;
        let token = if self.cache.current().await.refresh_token.is_some() {
            self.authenticator.token(&self.scopes).await?
        } else {
            info!("No refresh token cached, asking for consent");
            self.authenticator.force_refreshed_token(&self.scopes).await?
        };
        token.token().ok_or(AuthError::MissingAccessToken)?;
        info!("Sheets credential ready");
        Ok(())
    }
}

#[async_trait]
impl TokenProvider for GoogleCredentials {
    async fn access_token(&self) -> Result<String, AuthError> {
        let _guard = self.requests.lock().await;
        let token = self.authenticator.token(&self.scopes).await?;
        token
            .token()
            .map(str::to_string)
            .ok_or(AuthError::MissingAccessToken)
    }
}
