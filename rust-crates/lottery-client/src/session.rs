//! Wallet session: who is connected, on which chain, and whether they own
//! the lottery.

use crate::{
    Error,
    Result,
    chain::Wallet,
};
use lottery_abi::Address;
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub address: Option<Address>,
    pub connected: bool,
    pub owner: bool,
    pub loading: bool,
    pub chain_id: Option<u64>,
    pub correct_network: bool,
}

impl Session {
    /// Reads the wallet's first account and chain id.
    pub async fn open<W: Wallet>(wallet: &W, expected_chain_id: u64) -> Result<Self> {
        let accounts = wallet.accounts().await?;
        let address = accounts.first().copied().ok_or(Error::NotConnected)?;
        let chain_id = wallet.chain_id().await?;
        let correct_network = chain_id == expected_chain_id;
        if correct_network {
            info!(%address, chain_id, "wallet connected");
        } else {
            warn!(
                %address,
                chain_id,
                expected_chain_id,
                "wallet connected to the wrong network"
            );
        }
        Ok(Self {
            address: Some(address),
            connected: true,
            owner: false,
            loading: false,
            chain_id: Some(chain_id),
            correct_network,
        })
    }

    pub fn connected_address(&self) -> Option<Address> {
        if self.connected { self.address } else { None }
    }

    /// Address allowed to send transactions right now.
    pub fn require_signer(&self, expected_chain_id: u64) -> Result<Address> {
        let address = self.connected_address().ok_or(Error::NotConnected)?;
        if !self.correct_network {
            return Err(Error::WrongNetwork {
                expected: expected_chain_id,
                actual: self.chain_id.unwrap_or_default(),
            });
        }
        Ok(address)
    }

    pub fn require_owner(
        &self,
        expected_chain_id: u64,
        action: &'static str,
    ) -> Result<Address> {
        let address = self.require_signer(expected_chain_id)?;
        if !self.owner {
            return Err(Error::NotOwner { action });
        }
        Ok(address)
    }

    /// Owner comparison is on parsed bytes, so hex case never matters.
    pub fn is_owner(&self, contract_owner: Address) -> bool {
        self.connected_address() == Some(contract_owner)
    }
}
