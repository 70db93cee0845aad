//! ABI of the two bridge contracts, as far as the relayer uses them.

use alloy::sol;

sol! {
    /// Emitted by the source bridge when a user deposits tokens for another chain.
    #[derive(Debug, PartialEq, Eq)]
    event BridgeRequest(
        address indexed from,
        address indexed to,
        address indexed token,
        uint256 amount,
        uint256 srcChainId,
        uint256 dstChainId,
        uint256 nonce,
        uint256 timestamp
    );
}

sol! {
    #[sol(rpc)]
    interface IDestinationBridge {
        function executeMint(
            uint256 srcChainId,
            address srcBridgeAddress,
            uint256 nonce,
            address token,
            address from,
            address to,
            uint256 amount
        ) external;

        function processed(bytes32 messageId) external view returns (bool);

        function sourceBridgeForChain(uint256 chainId) external view returns (address);
    }
}
