//! Hex quantities, addresses and ABI words as they appear on the EVM JSON-RPC wire.

use alloy_core::dyn_abi::DynSolType;
use alloy_primitives::U256;

use chainingest_core::ProcessorError;

fn bad(what: &str, value: &str) -> ProcessorError {
    ProcessorError::Decode(format!("invalid {what}: '{value}'"))
}

/// Parse a `0x`-prefixed quantity into u64.
pub fn quantity(s: &str) -> Result<u64, ProcessorError> {
    let digits = s.strip_prefix("0x").ok_or_else(|| bad("quantity", s))?;
    u64::from_str_radix(digits, 16).map_err(|_| bad("quantity", s))
}

/// Parse a `0x`-prefixed quantity into U256.
pub fn quantity_u256(s: &str) -> Result<U256, ProcessorError> {
    let digits = s.strip_prefix("0x").ok_or_else(|| bad("quantity", s))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|_| bad("quantity", s))
}

pub fn to_quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Decode `0x`-prefixed hex data.
pub fn data(s: &str) -> Result<Vec<u8>, ProcessorError> {
    let digits = s.strip_prefix("0x").ok_or_else(|| bad("hex data", s))?;
    hex::decode(digits).map_err(|_| bad("hex data", s))
}

/// Canonical lowercase `0x` form of a 20-byte address.
pub fn address(s: &str) -> Result<String, ProcessorError> {
    let bytes = data(s)?;
    if bytes.len() != 20 {
        return Err(bad("address", s));
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Address held in the low 20 bytes of a 32-byte word (indexed topics, return values).
pub fn word_address(word: &[u8]) -> Result<String, ProcessorError> {
    if word.len() != 32 || word[..12].iter().any(|b| *b != 0) {
        return Err(ProcessorError::Decode(format!(
            "not an address word: 0x{}",
            hex::encode(word)
        )));
    }
    Ok(format!("0x{}", hex::encode(&word[12..])))
}

pub fn word_u256(word: &[u8]) -> Result<U256, ProcessorError> {
    if word.len() != 32 {
        return Err(ProcessorError::Decode(format!(
            "expected a 32-byte word, got {} bytes",
            word.len()
        )));
    }
    Ok(U256::from_be_slice(word))
}

pub fn is_zero_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|h| h.bytes().all(|b| b == b'0'))
}

/// Calldata for `selector(args...)` where each argument is one 32-byte word.
pub fn call_data(selector: [u8; 4], words: &[[u8; 32]]) -> String {
    let mut out = String::with_capacity(10 + words.len() * 64);
    out.push_str("0x");
    out.push_str(&hex::encode(selector));
    for word in words {
        out.push_str(&hex::encode(word));
    }
    out
}

/// Left-pad an address into an ABI word.
pub fn address_word(address: &str) -> Result<[u8; 32], ProcessorError> {
    let bytes = data(address)?;
    if bytes.len() != 20 {
        return Err(bad("address", address));
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

/// ABI `string` return value. Some early tokens return `bytes32` instead;
/// those are read up to the first NUL.
pub fn abi_string(ret: &[u8]) -> Option<String> {
    if let Ok(value) = DynSolType::String.abi_decode(ret) {
        return value.as_str().map(str::to_string);
    }
    if ret.len() == 32 {
        let end = ret.iter().position(|b| *b == 0).unwrap_or(32);
        return std::str::from_utf8(&ret[..end]).ok().map(str::to_string);
    }
    None
}
