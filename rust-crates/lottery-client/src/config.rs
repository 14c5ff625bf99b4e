use crate::{
    contracts::LotteryContracts,
    metadata::DEFAULT_METADATA_BASE_URL,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
};
use std::time::Duration;

/// Delays and polling cadence of the service's background work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceTimings {
    /// Wait before reloading when confirmations cannot be observed.
    pub settle_delay: Duration,
    /// Same, for close-and-draw.
    pub draw_settle_delay: Duration,
    pub receipt_poll_interval: Duration,
    pub confirmation_timeout: Duration,
    /// Periodic full reload; off when `None`.
    pub refresh_interval: Option<Duration>,
}

impl Default for ServiceTimings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            draw_settle_delay: Duration::from_secs(3),
            receipt_poll_interval: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(60),
            refresh_interval: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub wallet_url: String,
    pub chain_id: u64,
    pub contracts: LotteryContracts,
    pub metadata_base_url: String,
    pub timings: ServiceTimings,
}

impl ClientConfig {
    /// Fills endpoints from the deployment record, falling back to the
    /// network defaults. The wallet endpoint defaults to the RPC endpoint.
    pub fn from_deployment(env: DeploymentEnv, record: &DeploymentRecord) -> Self {
        let rpc_url = if record.network_url.is_empty() {
            env.default_rpc_url().to_string()
        } else {
            record.network_url.clone()
        };
        Self {
            wallet_url: record.wallet_url.clone().unwrap_or_else(|| rpc_url.clone()),
            rpc_url,
            chain_id: record.chain_id,
            contracts: LotteryContracts::from(record),
            metadata_base_url: record
                .metadata_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_METADATA_BASE_URL.to_string()),
            timings: ServiceTimings::default(),
        }
    }

    pub fn with_rpc_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.rpc_url = url;
        }
        self
    }

    pub fn with_wallet_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.wallet_url = url;
        }
        self
    }

    pub fn with_metadata_base_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.metadata_base_url = url;
        }
        self
    }

    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.timings.refresh_interval = interval;
        self
    }
}
