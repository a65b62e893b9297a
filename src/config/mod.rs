use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Parser, ValueEnum};

use crate::cashback::{CashbackMode, CashbackRule, DEFAULT_RATE, DEFAULT_THRESHOLD};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("cashback threshold must be finite, got {0}")]
    InvalidThreshold(f64),
    #[error("cashback rate must be within [0, 1], got {0}")]
    InvalidRate(f64),
}

/// What to do with a numeric form field that does not parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FormPolicy {
    /// Reject the request with 400.
    #[default]
    Strict,
    /// Treat the field as zero.
    Lenient,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "cashback-ledger",
    version,
    about = "In-memory user ledger with threshold cashback, served over HTML forms"
)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "CASHBACK_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    #[arg(long, env = "CASHBACK_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory served under /static
    #[arg(long, env = "CASHBACK_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Transactions strictly above this amount earn cashback
    #[arg(long, env = "CASHBACK_THRESHOLD", default_value_t = DEFAULT_THRESHOLD, allow_negative_numbers = true)]
    pub threshold: f64,

    /// Fraction of a qualifying amount credited as cashback
    #[arg(long, env = "CASHBACK_RATE", default_value_t = DEFAULT_RATE)]
    pub rate: f64,

    #[arg(long, env = "CASHBACK_MODE", value_enum, default_value_t = CashbackMode::Once)]
    pub cashback_mode: CashbackMode,

    #[arg(long, env = "CASHBACK_FORM_POLICY", value_enum, default_value_t = FormPolicy::Strict)]
    pub form_policy: FormPolicy,
}

impl Config {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn cashback_rule(&self) -> Result<CashbackRule, ConfigError> {
        if !self.threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if !(0.0..=1.0).contains(&self.rate) {
            return Err(ConfigError::InvalidRate(self.rate));
        }
        Ok(CashbackRule {
            threshold: self.threshold,
            rate: self.rate,
        })
    }
}
