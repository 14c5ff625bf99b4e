//! Client-side aggregation layer for the chain lottery: batched contract
//! reads, ticket ownership resolution and transaction submission for one
//! connected wallet.

pub mod aggregator;
pub mod chain;
pub mod config;
pub mod contracts;
mod error;
pub mod metadata;
pub mod notify;
pub mod resolver;
pub mod rpc;
pub mod service;
pub mod session;
pub mod submitter;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{
    ClientConfig,
    ServiceTimings,
};
pub use contracts::LotteryContracts;
pub use error::{
    Error,
    Result,
};
pub use service::{
    LotteryService,
    LotteryState,
    ReloadScope,
};
