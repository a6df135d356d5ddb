//! ENS name resolution (EIP-137): registry → resolver → `addr(node)`.

use alloy_primitives::{keccak256, B256};

use chainingest_core::{FetchContext, ProcessorError};

use crate::codec;
use crate::rpc::eth_call;

/// ENS registry on Ethereum mainnet.
pub const MAINNET_REGISTRY: &str = "0x00000000000c2e074ec69a0dfb2997ba6c7d2e1e";

const RESOLVER: [u8; 4] = [0x01, 0x78, 0xb8, 0xbf];
const ADDR: [u8; 4] = [0x3b, 0x3b, 0x57, 0xde];

pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(keccak256(label.as_bytes()).as_slice());
        node = keccak256(buf);
    }
    node
}

/// Address `name` points to, or `None` if it has no resolver or no address.
pub async fn resolve(
    ctx: &FetchContext,
    registry: &str,
    name: &str,
) -> Result<Option<String>, ProcessorError> {
    let name = name.trim().to_lowercase();
    if name.is_empty() || name.split('.').any(str::is_empty) {
        return Ok(None);
    }
    let node: [u8; 32] = namehash(&name).0;

    let Some(ret) = eth_call(ctx, registry, codec::call_data(RESOLVER, &[node])).await? else {
        return Ok(None);
    };
    let resolver = codec::word_address(&ret)?;
    if codec::is_zero_address(&resolver) {
        return Ok(None);
    }

    let Some(ret) = eth_call(ctx, &resolver, codec::call_data(ADDR, &[node])).await? else {
        return Ok(None);
    };
    let address = codec::word_address(&ret)?;
    tracing::debug!(%name, %address, "resolved ENS name");
    Ok((!codec::is_zero_address(&address)).then_some(address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namehash_vectors() {
        assert_eq!(namehash(""), B256::ZERO);
        assert_eq!(
            hex::encode(namehash("eth")),
            "93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            hex::encode(namehash("foo.eth")),
            "de9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f"
        );
    }
}
