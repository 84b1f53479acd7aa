use std::{env, fmt::Display, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use delivery_common::helpers::{parse_boolean_flag, parse_env_var};
use delivery_engine::{helpers::PricingPolicy, queue::QueueConfig, OrderFlowConfig, PaymentFlowConfig};
use log::*;
use stripe_tools::StripeConfig;

const DEFAULT_FDS_HOST: &str = "127.0.0.1";
const DEFAULT_FDS_PORT: u16 = 8470;
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_TAX_RATE_BPS: i64 = 800;
const DEFAULT_UNPAID_ORDER_TIMEOUT_MINS: i64 = 15;
const DEFAULT_PAYMENT_GRACE_PERIOD_MINS: i64 = 5;
const DEFAULT_AUTO_CANCEL_INTERVAL_SECS: u64 = 60;
const DEFAULT_PAYMENT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_JOB_WORKERS: usize = 8;
const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_JOB_BACKOFF_MS: u64 = 500;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_JOB_SOFT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// If true, the `X-User-Id` and `X-User-Role` headers set by the upstream authentication gateway are trusted.
    /// If false, every request that needs a caller identity is refused.
    pub trust_identity_headers: bool,
    pub orders: OrderFlowConfig,
    pub payments: PaymentFlowConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    /// Payment provider credentials and webhook settings.
    pub stripe: StripeConfig,
}

/// How often the periodic jobs are enqueued.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub payment_poll_interval: StdDuration,
    pub auto_cancel_interval: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            payment_poll_interval: StdDuration::from_secs(DEFAULT_PAYMENT_POLL_INTERVAL_SECS),
            auto_cancel_interval: StdDuration::from_secs(DEFAULT_AUTO_CANCEL_INTERVAL_SECS),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_FDS_HOST.to_string(),
            port: DEFAULT_FDS_PORT,
            database_url: String::default(),
            trust_identity_headers: true,
            orders: OrderFlowConfig::default(),
            payments: PaymentFlowConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            stripe: StripeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("FDS_HOST").ok().unwrap_or_else(|| DEFAULT_FDS_HOST.into());
        let port = configured("FDS_PORT", DEFAULT_FDS_PORT, "");
        let database_url = env::var("FDS_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ FDS_DATABASE_URL is not set. Please set it to the URL for the delivery database.");
            String::default()
        });
        let trust_identity_headers = parse_boolean_flag(env::var("FDS_TRUST_IDENTITY_HEADERS").ok(), true);
        if !trust_identity_headers {
            warn!("🪛️ Identity headers are not trusted. Every authenticated endpoint will refuse requests.");
        }
        Self {
            host,
            port,
            database_url,
            trust_identity_headers,
            orders: configure_orders(),
            payments: configure_payments(),
            queue: configure_queue(),
            scheduler: configure_scheduler(),
            stripe: StripeConfig::new_from_env_or_default(),
        }
    }
}

/// Reads `name` from the environment, falling back to `default` (and saying so) if it is missing or unparseable.
fn configured<T>(name: &str, default: T, unit: &str) -> T
where T: FromStr + Display + Clone {
    parse_env_var(name, default).unwrap_or_else(|(default, msg)| {
        if env::var(name).is_ok() {
            warn!("🪛️ {msg}. Using the default, {default}{unit}, instead.");
        } else {
            info!("🪛️ {msg}. Using the default value of {default}{unit}.");
        }
        default
    })
}

fn configure_orders() -> OrderFlowConfig {
    let tax_rate_bps = configured("FDS_TAX_RATE_BPS", DEFAULT_TAX_RATE_BPS, " bps");
    let timeout = configured("FDS_UNPAID_ORDER_TIMEOUT", DEFAULT_UNPAID_ORDER_TIMEOUT_MINS, " min");
    OrderFlowConfig {
        pricing: PricingPolicy { tax_rate_bps, ..Default::default() },
        unpaid_order_timeout: Duration::minutes(timeout),
    }
}

fn configure_payments() -> PaymentFlowConfig {
    let currency = env::var("FDS_CURRENCY").map(|s| s.trim().to_ascii_lowercase()).unwrap_or_else(|_| {
        info!("🪛️ FDS_CURRENCY is not set. Using {DEFAULT_CURRENCY}.");
        DEFAULT_CURRENCY.to_string()
    });
    let grace = configured("FDS_PAYMENT_GRACE_PERIOD", DEFAULT_PAYMENT_GRACE_PERIOD_MINS, " min");
    PaymentFlowConfig { currency, grace_period: Duration::minutes(grace), ..Default::default() }
}

fn configure_queue() -> QueueConfig {
    let workers = configured("FDS_JOB_WORKERS", DEFAULT_JOB_WORKERS, "");
    let max_attempts = configured("FDS_JOB_MAX_ATTEMPTS", DEFAULT_JOB_MAX_ATTEMPTS, "");
    let backoff = configured("FDS_JOB_BACKOFF_MS", DEFAULT_JOB_BACKOFF_MS, " ms");
    let hard = configured("FDS_JOB_TIMEOUT", DEFAULT_JOB_TIMEOUT_SECS, " s");
    let soft = configured("FDS_JOB_SOFT_TIMEOUT", DEFAULT_JOB_SOFT_TIMEOUT_SECS, " s");
    QueueConfig {
        workers,
        max_attempts,
        base_backoff: StdDuration::from_millis(backoff),
        hard_timeout: StdDuration::from_secs(hard),
        soft_timeout: StdDuration::from_secs(soft),
        ..Default::default()
    }
}

fn configure_scheduler() -> SchedulerConfig {
    let poll = configured("FDS_PAYMENT_POLL_INTERVAL", DEFAULT_PAYMENT_POLL_INTERVAL_SECS, " s");
    let sweep = configured("FDS_AUTO_CANCEL_INTERVAL", DEFAULT_AUTO_CANCEL_INTERVAL_SECS, " s");
    SchedulerConfig {
        payment_poll_interval: StdDuration::from_secs(poll.max(1)),
        auto_cancel_interval: StdDuration::from_secs(sweep.max(1)),
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// The part of the configuration that request handlers need. Keep secrets out of here.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub trust_identity_headers: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { trust_identity_headers: true }
    }
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self { trust_identity_headers: config.trust_identity_headers }
    }
}
