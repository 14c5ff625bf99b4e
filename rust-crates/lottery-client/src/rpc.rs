//! Chain access over JSON-RPC/HTTP.
//!
//! One [`JsonRpcClient`] serves both roles: pointed at a provider it is the
//! [`ContractReader`], pointed at a wallet endpoint (a node with unlocked
//! accounts or a signing proxy) it is the [`Wallet`].

use crate::{
    Error,
    Result,
    chain::{
        CallOutcome,
        ContractCall,
        ContractReader,
        TransactionRequest,
        TxReceipt,
        Wallet,
    },
};
use alloy::{
    network::{
        ReceiptResponse,
        TransactionBuilder,
    },
    providers::{
        Provider,
        RootProvider,
    },
    rpc::{
        client::RpcClient,
        types::TransactionRequest as EthTransactionRequest,
    },
    transports::http::Http,
};
use lottery_abi::{
    Address,
    Bytes,
    TxHash,
};
use std::time::Duration;
use tracing::debug;

const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct JsonRpcClient {
    url: String,
    client: RpcClient,
    provider: RootProvider,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let endpoint: reqwest::Url = url
            .parse()
            .map_err(|e| Error::InvalidResponse(format!("bad endpoint `{url}`: {e}")))?;
        let http = reqwest::Client::builder().timeout(TIMEOUT).build()?;
        let client = RpcClient::new(Http::with_client(http, endpoint), false);
        Ok(Self {
            url,
            provider: RootProvider::new(client.clone()),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ContractReader for JsonRpcClient {
    /// Sends every call as one JSON-RPC batch. Responses are matched to
    /// calls by request id, so server ordering does not matter.
    async fn batch_call(&self, calls: &[ContractCall]) -> Result<Vec<CallOutcome>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        debug!(size = calls.len(), url = %self.url, "eth_call batch");
        let mut batch = self.client.new_batch();
        let mut waiters = Vec::with_capacity(calls.len());
        for call in calls {
            let tx = EthTransactionRequest::default()
                .with_to(call.to)
                .with_input(call.calldata.clone());
            waiters.push(batch.add_call::<_, Bytes>("eth_call", &(tx, "latest"))?);
        }
        batch.send().await?;

        let mut outcomes = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            outcomes.push(match waiter.await {
                Ok(data) => CallOutcome::Success(data),
                Err(e) => CallOutcome::Failure(e.to_string()),
            });
        }
        Ok(outcomes)
    }
}

impl Wallet for JsonRpcClient {
    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.provider.get_accounts().await?)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let request = EthTransactionRequest::default()
            .with_from(tx.from)
            .with_to(tx.to)
            .with_input(tx.data);
        let pending = self.provider.send_transaction(request).await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|receipt| TxReceipt {
            hash,
            success: receipt.status(),
            block_number: receipt.block_number(),
        }))
    }
}
