use eyre::{Context, Report};
use rust_decimal::Decimal;
use sentry::types::Dsn;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sentry: SentryConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Cached OAuth credential, written back after every refresh.
    pub token: String,
    pub client_secret: String,
    /// JSON-lines file receiving events that failed processing.
    pub dead_letter: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl ServerConfig {
    pub fn to_socket_addrs(&self) -> SocketAddr {
        SocketAddr::new(self.host.into(), self.port)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LedgerConfig {
    pub spreadsheet_id: String,
    #[serde(default = "LedgerConfig::default_range")]
    pub range: String,
    #[serde(default = "LedgerConfig::default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "LedgerConfig::default_endpoint")]
    pub endpoint: Url,
}

impl LedgerConfig {
    fn default_range() -> String {
        "Donation List!A2:C2".to_string()
    }

    fn default_scopes() -> Vec<String> {
        vec!["https://www.googleapis.com/auth/spreadsheets".to_string()]
    }

    fn default_endpoint() -> Url {
        Url::parse("https://sheets.googleapis.com").expect("static url")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CurrencyConfig {
    pub reference: String,
    pub provider: RatesProvider,
    /// Frankfurter-compatible rates service, used by the `http` provider.
    pub endpoint: Url,
    /// Units of the reference currency per unit of each listed currency,
    /// used by the `fixed` provider.
    pub rates: HashMap<String, Decimal>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            reference: "GBP".to_string(),
            provider: RatesProvider::Http,
            endpoint: Url::parse("https://api.frankfurter.app").expect("static url"),
            rates: HashMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RatesProvider {
    Http,
    Fixed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SentryConfig {
    pub dsn: Option<String>,
}

impl SentryConfig {
    /// The parsed DSN; an absent or empty one disables Sentry.
    pub fn dsn(&self) -> Result<Option<Dsn>, Report> {
        self.dsn
            .as_deref()
            .filter(|dsn| !dsn.is_empty())
            .map(|dsn| dsn.parse::<Dsn>().wrap_err("Invalid sentry.dsn"))
            .transpose()
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Report> {
        let path = path.as_ref();
        let config = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&config)
    }

    pub fn parse(config: &str) -> Result<Self, Report> {
        let config: Config = toml::from_str(config).wrap_err("Failed to parse config")?;
        if config.dispatcher.workers == 0 {
            eyre::bail!("dispatcher.workers must be at least 1");
        }
        if config.dispatcher.queue_capacity == 0 {
            eyre::bail!("dispatcher.queue_capacity must be at least 1");
        }
        config.sentry.dsn()?;
        Ok(config)
    }
}
