//! Solidity bindings for the lottery contracts.
//!
//! Each contract module declares its interface with [`sol!`], which
//! generates one call type per function, the decoders for its return data
//! and a `…Calls` enum that decodes arbitrary calldata back into a call.
//!
//! [`sol!`]: alloy_sol_types::sol

pub mod lottery_manager;
pub mod lottery_nft;
pub mod mock_usdt;

pub use alloy_primitives::{
    Address,
    Bytes,
    TxHash,
    U256,
    keccak256,
};
pub use alloy_sol_types::{
    SolCall,
    SolInterface,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("abi decoding failed: {0}")]
    Decode(String),
    #[error("{field} does not fit in 64 bits")]
    Overflow { field: &'static str },
}

impl From<alloy_sol_types::Error> for Error {
    fn from(err: alloy_sol_types::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Narrows an id or counter word to `u64`.
pub fn to_u64(value: U256, field: &'static str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Overflow { field })
}
