//! Seams between the aggregation layer and the chain.
//!
//! Reads go through a [`ContractReader`] (a provider endpoint answering
//! batched `eth_call`s), writes and the session identity through a
//! [`Wallet`] (an endpoint that holds the account and signs).

use crate::{
    Error,
    Result,
};
use lottery_abi::{
    Address,
    Bytes,
    SolCall,
    TxHash,
};
use std::future::Future;
use tracing::debug;

/// Largest number of calls sent in one JSON-RPC batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// A function call addressed to a contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    /// Solidity signature, for logs.
    pub function: &'static str,
    pub calldata: Bytes,
}

impl ContractCall {
    pub fn new<C: SolCall>(to: Address, call: C) -> Self {
        Self {
            to,
            function: C::SIGNATURE,
            calldata: call.abi_encode().into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.function
            .split_once('(')
            .map_or(self.function, |(name, _)| name)
    }
}

/// Result of one call inside a batch. Failures are per call and do not
/// fail the batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Bytes),
    Failure(String),
}

impl CallOutcome {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            CallOutcome::Success(data) => Some(data),
            CallOutcome::Failure(_) => None,
        }
    }

    /// Decodes successful return data as the returns of `C`, treating
    /// decode errors as failures.
    pub fn decode<C: SolCall>(&self) -> Option<C::Return> {
        self.data()
            .and_then(|data| C::abi_decode_returns(data).ok())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
}

pub trait ContractReader: Send + Sync {
    /// Executes every call against the latest block. The returned vector
    /// has one outcome per call, in call order.
    fn batch_call(
        &self,
        calls: &[ContractCall],
    ) -> impl Future<Output = Result<Vec<CallOutcome>>> + Send;
}

pub trait Wallet: Send + Sync {
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// `Ok(None)` while the transaction is pending. Wallets that cannot
    /// report receipts return an error.
    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Option<TxReceipt>>> + Send;
}

/// Runs `calls` in sequential chunks of at most [`MAX_BATCH_SIZE`]. Any
/// chunk failing fails the whole read.
pub async fn read_batch<R: ContractReader>(
    reader: &R,
    calls: &[ContractCall],
) -> Result<Vec<CallOutcome>> {
    let mut outcomes = Vec::with_capacity(calls.len());
    for chunk in calls.chunks(MAX_BATCH_SIZE) {
        debug!(size = chunk.len(), "sending read batch");
        let results = reader.batch_call(chunk).await?;
        if results.len() != chunk.len() {
            return Err(Error::InvalidResponse(format!(
                "batch of {} calls returned {} results",
                chunk.len(),
                results.len()
            )));
        }
        outcomes.extend(results);
    }
    Ok(outcomes)
}
