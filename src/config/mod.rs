use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Top-level application configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub metrics_port: u16,
    /// When set, orders go to the paper exchange instead of the venue.
    pub dry_run: bool,
    pub engine: EngineConfig,
    pub exchange: ExchangeConfig,
    pub risk: RiskConfig,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fan-out semaphore size.
    pub max_concurrency: usize,
    /// Ingress channel capacity.
    pub ingress_capacity: usize,
    pub execution_interval_secs: u64,
    pub alignment_threshold: Decimal,
    pub retry_attempts: u32,
    pub retry_backoff_base_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
            ingress_capacity: 1000,
            execution_interval_secs: 1,
            alignment_threshold: Decimal::new(2, 2), // 0.02
            retry_attempts: 3,
            retry_backoff_base_secs: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Empty means the default endpoint for the selected network.
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub testnet: bool,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_leverage: Decimal,
    pub max_position_size: Decimal,
    /// Basis points.
    pub max_slippage_bps: Decimal,
    pub min_order_size: Decimal,
    pub max_daily_loss: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: Decimal::from(5),
            max_position_size: Decimal::from(100_000),
            max_slippage_bps: Decimal::from(10),
            min_order_size: Decimal::from(5),
            max_daily_loss: Decimal::from(1_000),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            metrics_port: env_parse_or("METRICS_PORT", 9090),
            dry_run: env_parse_or("DRY_RUN", true),
            engine: EngineConfig {
                max_concurrency: env_parse_or("MAX_CONCURRENCY", 100),
                ingress_capacity: env_parse_or("INGRESS_CAPACITY", 1000),
                execution_interval_secs: env_parse_or("EXECUTION_INTERVAL", 1),
                alignment_threshold: env_parse_or("ALIGNMENT_THRESHOLD", Decimal::new(2, 2)),
                retry_attempts: env_parse_or("RETRY_ATTEMPTS", 3),
                retry_backoff_base_secs: env_parse_or("RETRY_BACKOFF_BASE", 1),
            },
            exchange: ExchangeConfig {
                base_url: env::var("HYPERLIQUID_BASE_URL").unwrap_or_default(),
                api_key: env::var("HYPERLIQUID_API_KEY").unwrap_or_default(),
                secret_key: env::var("HYPERLIQUID_SECRET_KEY").unwrap_or_default(),
                testnet: env_parse_or("HYPERLIQUID_TESTNET", false),
            },
            risk: RiskConfig {
                max_leverage: env_parse_or("MAX_LEVERAGE", Decimal::from(5)),
                max_position_size: env_parse_or("MAX_POSITION_SIZE", Decimal::from(100_000)),
                max_slippage_bps: env_parse_or("MAX_SLIPPAGE", Decimal::from(10)),
                min_order_size: env_parse_or("MIN_ORDER_SIZE", Decimal::from(5)),
                max_daily_loss: env_parse_or("MAX_DAILY_LOSS", Decimal::from(1_000)),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.exchange.api_key.is_empty() {
            anyhow::bail!("HYPERLIQUID_API_KEY is required");
        }
        if self.exchange.secret_key.is_empty() {
            anyhow::bail!("HYPERLIQUID_SECRET_KEY is required");
        }
        if self.engine.max_concurrency == 0 {
            anyhow::bail!("MAX_CONCURRENCY must be positive");
        }
        if self.risk.max_leverage <= Decimal::ZERO
            || self.risk.max_leverage > Decimal::ONE_HUNDRED
        {
            anyhow::bail!("MAX_LEVERAGE must be between 0 and 100");
        }
        Ok(())
    }
}

fn env_parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
