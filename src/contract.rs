//! ABI bindings for the DeFiAgent yield vault.
//!
//! Only the functions and events the synchronization layer touches are
//! declared; fee computation and access control live on-chain.

use alloy::sol;

sol! {
    interface IDeFiAgentVault {
        event Deposited(address indexed user, address token, uint256 amount);
        event YieldHarvested(address indexed agent, uint256 yieldAmount, uint256 fee);
        event AgentGranted(address indexed agent);
        event AgentRevoked(address indexed agent);
        event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);

        function totalDeposited() external view returns (uint256);
        function totalYieldHarvested() external view returns (uint256);
        function totalFeesCollected() external view returns (uint256);
        function estimatedAPY() external pure returns (uint256);
        function owner() external view returns (address);
        function isAgent(address account) external view returns (bool);
        function userDepositETH(address user) external view returns (uint256);
        function userDepositERC20(address user, address token) external view returns (uint256);

        function depositETH() external payable;
        function depositERC20(address token, uint256 amount) external;
        function withdrawETH(uint256 amount) external;
        function grantAgent(address agent) external;
        function revokeAgent(address agent) external;
        function agentHarvest(uint256 yieldAmount) external;
        function agentRebalance() external;
    }
}

/// Address of the vault deployment on Base Sepolia.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x409E9222f69B11F84bC9e54794061315E27f5F64";

/// Chain id of Base Sepolia.
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84_532;
