//! ERC-20 token the tickets are paid in.

use alloy_sol_types::sol;

sol! {
    #[sol(all_derives)]
    interface IMockUSDT {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

pub use IMockUSDT::*;
