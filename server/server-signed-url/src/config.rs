use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{ensure, Result};
use server_common::env::optional_env;
use tokio::sync::Semaphore;

use crate::service::issuer::IssuerLimits;

const ENV_BIND_ADDR: &str = "SIGNED_URL_BIND_ADDR";
const ENV_MAX_CONCURRENCY: &str = "SIGNED_URL_MAX_CONCURRENCY";
const ENV_BATCH_TIMEOUT_SECS: &str = "SIGNED_URL_BATCH_TIMEOUT_SECS";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONCURRENCY: usize = 64;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub limits: IssuerLimits,
}

impl ServiceConfig {
    /// `0` for either limit turns it off.
    pub fn from_env() -> Result<Self> {
        let bind_addr = optional_env(ENV_BIND_ADDR)?
            .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT));
        let max_concurrency =
            optional_env(ENV_MAX_CONCURRENCY)?.unwrap_or(DEFAULT_MAX_CONCURRENCY);
        ensure!(
            max_concurrency <= Semaphore::MAX_PERMITS,
            "{ENV_MAX_CONCURRENCY} must not exceed {}",
            Semaphore::MAX_PERMITS
        );
        let batch_timeout_secs =
            optional_env(ENV_BATCH_TIMEOUT_SECS)?.unwrap_or(DEFAULT_BATCH_TIMEOUT_SECS);

        Ok(Self {
            bind_addr,
            limits: issuer_limits(max_concurrency, batch_timeout_secs),
        })
    }
}

fn issuer_limits(max_concurrency: usize, batch_timeout_secs: u64) -> IssuerLimits {
    IssuerLimits {
        max_concurrency: (max_concurrency > 0).then_some(max_concurrency),
        batch_timeout: (batch_timeout_secs > 0).then(|| Duration::from_secs(batch_timeout_secs)),
    }
}
