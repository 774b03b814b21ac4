//! Solidity bindings for the escrow and its token.

use alloy::sol;

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract MultiPartyEscrow {
        event ChannelOpen(
            uint256 channelId,
            uint256 nonce,
            address indexed sender,
            address signer,
            address indexed recipient,
            bytes32 indexed groupId,
            uint256 amount,
            uint256 expiration
        );
        event ChannelExtend(uint256 indexed channelId, uint256 newExpiration);
        event ChannelAddFunds(uint256 indexed channelId, uint256 additionalFunds);
        event DepositFunds(address indexed sender, uint256 amount);

        function token() external view returns (address);
        function balances(address owner) external view returns (uint256);
        function channels(uint256 channelId) external view returns (
            uint256 nonce,
            address sender,
            address signer,
            address recipient,
            bytes32 groupId,
            uint256 value,
            uint256 expiration
        );

        function deposit(uint256 value) external returns (bool);
        function openChannel(
            address signer,
            address recipient,
            bytes32 groupId,
            uint256 value,
            uint256 expiration
        ) external returns (bool);
        function depositAndOpenChannel(
            address signer,
            address recipient,
            bytes32 groupId,
            uint256 value,
            uint256 expiration
        ) external returns (bool);
        function channelAddFunds(uint256 channelId, uint256 amount) external returns (bool);
        function channelExtend(uint256 channelId, uint256 newExpiration) external returns (bool);
        function channelExtendAndAddFunds(
            uint256 channelId,
            uint256 newExpiration,
            uint256 amount
        ) external returns (bool);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface EscrowToken {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
    }
}
