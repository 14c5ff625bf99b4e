use crate::chain::ContractCall;
use lottery_abi::{
    Address,
    SolCall,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Addresses of the three deployed lottery contracts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryContracts {
    /// ERC-20 payment token (`MockUSDT`).
    pub token: Address,
    pub manager: Address,
    pub nft: Address,
}

impl LotteryContracts {
    pub fn new(token: Address, manager: Address, nft: Address) -> Self {
        Self {
            token,
            manager,
            nft,
        }
    }

    pub fn token_call<C: SolCall>(&self, call: C) -> ContractCall {
        ContractCall::new(self.token, call)
    }

    pub fn manager_call<C: SolCall>(&self, call: C) -> ContractCall {
        ContractCall::new(self.manager, call)
    }

    pub fn nft_call<C: SolCall>(&self, call: C) -> ContractCall {
        ContractCall::new(self.nft, call)
    }
}

impl From<&deployments::DeploymentRecord> for LotteryContracts {
    fn from(record: &deployments::DeploymentRecord) -> Self {
        Self::new(
            record.token_address,
            record.manager_address,
            record.nft_address,
        )
    }
}
