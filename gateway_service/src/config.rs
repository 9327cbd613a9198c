use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use anyhow::{bail, Context};
use common::{Chain, MemoPolicy, TokenSymbol};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Token aceptado en una cadena: símbolo, mint/contrato y decimales.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub symbol: String,
    pub contract: String,
    pub decimals: u8,
}

/// Configuración por cadena monitoreada.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub wallet_address: String,
    pub network: String,
    pub finality_threshold: u32,
    pub poll_interval_secs: u64,
    pub tokens: Vec<TokenConfig>,
    /// Umbrales del monitor de saldo nativo, en unidades base.
    pub min_native_balance: Decimal,
    pub max_native_balance: Decimal,
}

/// Configuración del proceso, cargada una sola vez desde el entorno.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: String,

    pub payment_expiry_minutes: i64,
    pub fee_bps: u32,
    pub overpayment_tolerance_bps: u32,
    pub credit_pending_first: bool,
    pub webhook_max_attempts: i32,

    pub rate_limit_per_minute: u32,
    pub ip_rate_limit_per_minute: u32,

    pub invoice_chain: Chain,
    pub invoice_token: String,

    pub memo_policy: MemoPolicy,
    pub solana_wallet_is_token_account: bool,
    pub tron_api_key: Option<String>,

    pub compliance_api_url: Option<String>,
    pub compliance_api_key: Option<String>,

    /// VND por unidad de token, por símbolo.
    pub fixed_rates: HashMap<TokenSymbol, Decimal>,

    pub chains: Vec<ChainConfig>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let mut chains = Vec::new();
        for chain in Chain::ALL {
            if let Some(config) = chain_from_env(chain)? {
                chains.push(config);
            }
        }
        if chains.is_empty() {
            bail!("No chain configured: set <CHAIN>_RPC_URL and MONITORED_WALLET_ADDRESS_<CHAIN>");
        }

        let invoice_chain = env_parse("INVOICE_CHAIN", chains[0].chain, |raw| {
            Chain::from_str(raw).ok()
        })?;
        let invoice_token =
            env::var("INVOICE_TOKEN").unwrap_or_else(|_| "USDT".to_string());

        // FEE_PERCENTAGE is human-facing percent ("1" = 1% = 100 bps)
        let fee_percentage = env_parse("FEE_PERCENTAGE", Decimal::ONE, |raw| {
            Decimal::from_str(raw).ok()
        })?;
        let fee_bps = (fee_percentage * Decimal::from(100))
            .to_u32()
            .filter(|bps| *bps <= 10_000)
            .context("FEE_PERCENTAGE out of range")?;

        let memo_policy = if env_flag("MEMO_STRICT_PREFIX", false)? {
            MemoPolicy::StrictPrefix
        } else {
            MemoPolicy::Permissive
        };

        Ok(Self {
            database_url,
            redis_url,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT").unwrap_or_else(|_| "3000".to_string()),
            payment_expiry_minutes: env_parse("PAYMENT_EXPIRY_MINUTES", 30, |raw| {
                raw.parse().ok()
            })?,
            fee_bps,
            overpayment_tolerance_bps: env_parse("OVERPAYMENT_TOLERANCE_BPS", 0, |raw| {
                raw.parse().ok()
            })?,
            credit_pending_first: env_flag("CREDIT_PENDING_FIRST", false)?,
            webhook_max_attempts: env_parse("WEBHOOK_MAX_ATTEMPTS", 6, |raw| raw.parse().ok())?,
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 100, |raw| {
                raw.parse().ok()
            })?,
            ip_rate_limit_per_minute: env_parse("IP_RATE_LIMIT_PER_MINUTE", 1000, |raw| {
                raw.parse().ok()
            })?,
            invoice_chain,
            invoice_token,
            memo_policy,
            solana_wallet_is_token_account: env_flag("SOLANA_WALLET_IS_TOKEN_ACCOUNT", false)?,
            tron_api_key: env::var("TRON_API_KEY").ok(),
            compliance_api_url: env::var("COMPLIANCE_API_URL").ok(),
            compliance_api_key: env::var("COMPLIANCE_API_KEY").ok(),
            fixed_rates: parse_rates(&env::var("RATES_VND").unwrap_or_default())?,
            chains,
        })
    }

    pub fn chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain == chain)
    }
}

fn chain_from_env(chain: Chain) -> anyhow::Result<Option<ChainConfig>> {
    let suffix = chain.env_suffix();
    let Ok(rpc_url) = env::var(format!("{}_RPC_URL", suffix)) else {
        return Ok(None);
    };
    let wallet_address = env::var(format!("MONITORED_WALLET_ADDRESS_{}", suffix))
        .with_context(|| format!("MONITORED_WALLET_ADDRESS_{} must be set", suffix))?;

    let finality_threshold = env_parse(
        &format!("FINALITY_{}", suffix),
        chain.default_finality_threshold(),
        |raw| raw.parse().ok(),
    )?;

    Ok(Some(ChainConfig {
        chain,
        rpc_url,
        ws_url: env::var(format!("{}_WS_URL", suffix)).ok(),
        wallet_address,
        network: env::var(format!("{}_NETWORK", suffix))
            .unwrap_or_else(|_| "mainnet".to_string()),
        finality_threshold,
        poll_interval_secs: env_parse(&format!("POLL_INTERVAL_{}", suffix), 5, |raw| {
            raw.parse().ok()
        })?,
        tokens: parse_tokens(&env::var(format!("TOKENS_{}", suffix)).unwrap_or_default())?,
        min_native_balance: env_parse(
            &format!("MIN_NATIVE_BALANCE_{}", suffix),
            Decimal::ZERO,
            |raw| Decimal::from_str(raw).ok(),
        )?,
        max_native_balance: env_parse(
            &format!("MAX_NATIVE_BALANCE_{}", suffix),
            Decimal::MAX,
            |raw| Decimal::from_str(raw).ok(),
        )?,
    }))
}

/// `TOKENS_<CHAIN>` = `SYMBOL:contract:decimals` separados por coma.
fn parse_tokens(raw: &str) -> anyhow::Result<Vec<TokenConfig>> {
    let mut tokens = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(symbol), Some(contract), Some(decimals)) => tokens.push(TokenConfig {
                symbol: symbol.to_uppercase(),
                contract: contract.to_string(),
                decimals: decimals
                    .parse()
                    .with_context(|| format!("Invalid token decimals in entry: {}", entry))?,
            }),
            _ => bail!("Invalid token entry (want SYMBOL:contract:decimals): {}", entry),
        }
    }
    Ok(tokens)
}

/// `RATES_VND` = `SYMBOL=vnd_per_token` separados por coma.
fn parse_rates(raw: &str) -> anyhow::Result<HashMap<TokenSymbol, Decimal>> {
    let mut rates = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (symbol, rate) = entry
            .split_once('=')
            .with_context(|| format!("Invalid rate entry (want SYMBOL=rate): {}", entry))?;
        let symbol = TokenSymbol::new(symbol)
            .map_err(|e| anyhow::anyhow!("Invalid rate symbol {}: {}", entry, e))?;
        let rate = Decimal::from_str(rate.trim())
            .with_context(|| format!("Invalid rate value in entry: {}", entry))?;
        rates.insert(symbol, rate);
    }
    Ok(rates)
}

fn env_parse<T>(name: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> anyhow::Result<T> {
    match env::var(name) {
        Ok(raw) => parse(raw.trim()).with_context(|| format!("Invalid value for {}: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> anyhow::Result<bool> {
    env_parse(name, default, |raw| match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    })
}
