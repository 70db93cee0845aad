use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use alloy::primitives::{Address, B256, U256, keccak256};
use serde::{Deserialize, Serialize};

/// Identifies one deposit on the source chain and the one mint it may cause on the destination
/// chain.
///
/// The destination bridge derives the same value as
/// `keccak256(abi.encodePacked(srcChainId, srcBridgeAddress, token, nonce))` and keys its
/// `processed` mapping on it, so the layout below must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub B256);

impl MessageId {
    const PACKED_LEN: usize = 32 + 20 + 20 + 32;

    pub fn compute(
        src_chain_id: U256,
        source_bridge: Address,
        token: Address,
        nonce: U256,
    ) -> Self {
        let mut buf = Vec::with_capacity(Self::PACKED_LEN);
        buf.extend_from_slice(&src_chain_id.to_be_bytes::<32>());
        buf.extend_from_slice(source_bridge.as_slice());
        buf.extend_from_slice(token.as_slice());
        buf.extend_from_slice(&nonce.to_be_bytes::<32>());
        MessageId(keccak256(&buf))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = <B256 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s).map(MessageId)
    }
}

impl From<MessageId> for B256 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{address, b256},
        sol_types::SolValue,
    };

    use super::*;

    const BRIDGE: Address = address!("1111111111111111111111111111111111111111");
    const TOKEN: Address = address!("2222222222222222222222222222222222222222");

    #[test]
    fn matches_known_vector() {
        let id = MessageId::compute(U256::from(11155111), BRIDGE, TOKEN, U256::from(7));
        assert_eq!(
            id.0,
            b256!("4a2b399394872ec32706f906eb65363a73bdb60464988580ad736a88de730c90")
        );
    }

    #[test]
    fn matches_solidity_encode_packed() {
        let chain_id = U256::from(421614);
        let nonce = U256::MAX - U256::from(3);
        let packed = (chain_id, BRIDGE, TOKEN, nonce).abi_encode_packed();
        assert_eq!(packed.len(), 104);

        assert_eq!(
            MessageId::compute(chain_id, BRIDGE, TOKEN, nonce).0,
            keccak256(packed)
        );
    }

    #[test]
    fn every_field_changes_the_id() {
        let base = MessageId::compute(U256::from(1), BRIDGE, TOKEN, U256::from(1));
        assert_eq!(
            base,
            MessageId::compute(U256::from(1), BRIDGE, TOKEN, U256::from(1))
        );

        let variants = [
            MessageId::compute(U256::from(2), BRIDGE, TOKEN, U256::from(1)),
            MessageId::compute(U256::from(1), TOKEN, TOKEN, U256::from(1)),
            MessageId::compute(U256::from(1), BRIDGE, BRIDGE, U256::from(1)),
            MessageId::compute(U256::from(1), BRIDGE, TOKEN, U256::from(2)),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn display_and_parse_agree() {
        let id = MessageId::compute(U256::from(5), BRIDGE, TOKEN, U256::from(9));
        let text = id.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text.parse::<MessageId>().unwrap(), id);
    }
}
