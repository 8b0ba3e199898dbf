//! EVM ABI helpers on top of `ethers::abi`.
//!
//! Covers what the sync pipeline reads from hub and vault contracts: event
//! topics, call data, and narrowing of decoded tokens into Rust integers
//! and addresses.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};

use crate::error::RpcError;

/// ABI decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// Data does not match the expected parameter types.
    #[error("ABI decode failed: {0}")]
    Decode(String),

    /// Decoded token has another type than expected.
    #[error("expected {expected} token, got {found}")]
    UnexpectedToken {
        /// Expected token type.
        expected: &'static str,
        /// Token actually decoded.
        found: String,
    },

    /// Integer does not fit the requested width.
    #[error("integer overflow decoding {0}")]
    Overflow(&'static str),

    /// Address is not 20 bytes of hex.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Hash is not 32 bytes of hex.
    #[error("invalid hash: {0}")]
    InvalidHash(String),
}

impl From<abi::Error> for AbiError {
    fn from(err: abi::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<AbiError> for RpcError {
    fn from(err: AbiError) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Returns the topic0 of an event signature.
#[must_use]
pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

/// Builds call data: the 4-byte selector of `signature` followed by the
/// encoded arguments.
#[must_use]
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    Bytes::from(data)
}

/// Decodes `data` as a tuple of `types`.
///
/// # Errors
///
/// Returns an error if the data does not match the types.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    Ok(abi::decode(types, data)?)
}

/// Decodes a single return value.
///
/// # Errors
///
/// Returns an error if the data does not hold a value of `kind`.
pub fn decode_single(kind: ParamType, data: &[u8]) -> Result<Token, AbiError> {
    decode(&[kind], data)?
        .into_iter()
        .next()
        .ok_or_else(|| AbiError::Decode("empty return data".to_string()))
}

/// Decodes a single `uint256` return value.
///
/// # Errors
///
/// Returns an error if the data does not hold a `uint256`.
pub fn decode_uint(data: &[u8]) -> Result<U256, AbiError> {
    into_uint(decode_single(ParamType::Uint(256), data)?)
}

/// Formats an address as lowercase `0x`-prefixed hex.
#[must_use]
pub fn format_address(address: &Address) -> String {
    format!("{address:?}")
}

/// Formats a hash as lowercase `0x`-prefixed hex.
#[must_use]
pub fn format_hash(hash: &H256) -> String {
    format!("{hash:?}")
}

/// Parses a `0x`-prefixed address.
///
/// # Errors
///
/// Returns an error if `address` is not 20 bytes of hex.
pub fn parse_address(address: &str) -> Result<Address, AbiError> {
    address
        .parse()
        .map_err(|_| AbiError::InvalidAddress(address.to_string()))
}

/// Parses a `0x`-prefixed transaction hash.
///
/// # Errors
///
/// Returns an error if `hash` is not 32 bytes of hex.
pub fn parse_hash(hash: &str) -> Result<H256, AbiError> {
    hash.parse().map_err(|_| AbiError::InvalidHash(hash.to_string()))
}

/// Reads an indexed `address` topic.
#[must_use]
pub fn topic_to_address(topic: &H256) -> Address {
    Address::from(*topic)
}

/// Reads an indexed `uint` topic that must fit in 64 bits.
///
/// # Errors
///
/// Returns [`AbiError::Overflow`] if the value does not fit.
pub fn topic_to_u64(topic: &H256) -> Result<u64, AbiError> {
    uint_to_u64(U256::from_big_endian(topic.as_bytes()))
}

/// Narrows a `uint256` to `u64`.
///
/// # Errors
///
/// Returns [`AbiError::Overflow`] if the value does not fit.
pub fn uint_to_u64(value: U256) -> Result<u64, AbiError> {
    if value.bits() > 64 {
        return Err(AbiError::Overflow("uint64"));
    }
    Ok(value.low_u64())
}

/// Narrows a `uint256` to `u128`.
///
/// # Errors
///
/// Returns [`AbiError::Overflow`] if the value does not fit.
pub fn uint_to_u128(value: U256) -> Result<u128, AbiError> {
    if value.bits() > 128 {
        return Err(AbiError::Overflow("uint128"));
    }
    Ok(value.low_u128())
}

fn unexpected(expected: &'static str, token: &Token) -> AbiError {
    AbiError::UnexpectedToken {
        expected,
        found: format!("{token:?}"),
    }
}

/// Unwraps a `uint` token.
///
/// # Errors
///
/// Returns [`AbiError::UnexpectedToken`] for any other token.
pub fn into_uint(token: Token) -> Result<U256, AbiError> {
    match token {
        Token::Uint(value) => Ok(value),
        other => Err(unexpected("uint", &other)),
    }
}

/// Unwraps an `address` token.
///
/// # Errors
///
/// Returns [`AbiError::UnexpectedToken`] for any other token.
pub fn into_address(token: Token) -> Result<Address, AbiError> {
    match token {
        Token::Address(address) => Ok(address),
        other => Err(unexpected("address", &other)),
    }
}

/// Unwraps a `string` token.
///
/// # Errors
///
/// Returns [`AbiError::UnexpectedToken`] for any other token.
pub fn into_string(token: Token) -> Result<String, AbiError> {
    match token {
        Token::String(value) => Ok(value),
        other => Err(unexpected("string", &other)),
    }
}

/// Unwraps a dynamic or fixed array token.
///
/// # Errors
///
/// Returns [`AbiError::UnexpectedToken`] for any other token.
pub fn into_array(token: Token) -> Result<Vec<Token>, AbiError> {
    match token {
        Token::Array(items) | Token::FixedArray(items) => Ok(items),
        other => Err(unexpected("array", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topic() {
        let topic = event_topic("Transfer(address,address,uint256)");
        assert_eq!(
            format_hash(&topic),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_encode_call() {
        let to = parse_address("0x00000000000000000000000000000000000000c3").expect("address");
        let data = encode_call("balanceOf(address)", &[Token::Address(to)]);

        assert_eq!(data.len(), 36);
        assert_eq!(data.get(..4), Some(&[0x70, 0xa0, 0x82, 0x31][..]));
        assert_eq!(data.get(35), Some(&0xc3));

        assert_eq!(encode_call("totalSupply()", &[]).len(), 4);
    }

    #[test]
    fn test_decode_uint_full_width() {
        let data = abi::encode(&[Token::Uint(U256::MAX)]);
        let value = decode_uint(&data).expect("uint256");

        assert_eq!(value, U256::MAX);
        assert_eq!(uint_to_u128(value), Err(AbiError::Overflow("uint128")));
        assert_eq!(uint_to_u64(U256::from(42u64)), Ok(42));
        assert_eq!(uint_to_u128(U256::from(u128::MAX)), Ok(u128::MAX));
    }

    #[test]
    fn test_decode_dynamic_types() {
        let a = parse_address("0x00000000000000000000000000000000000000a1").expect("address");
        let b = parse_address("0x00000000000000000000000000000000000000b2").expect("address");
        let data = abi::encode(&[
            Token::Array(vec![Token::Address(a), Token::Address(b)]),
            Token::String("Alpha".to_string()),
        ]);

        let mut tokens = decode(
            &[
                ParamType::Array(Box::new(ParamType::Address)),
                ParamType::String,
            ],
            &data,
        )
        .expect("decode")
        .into_iter();

        let items = into_array(tokens.next().expect("array")).expect("array");
        let addresses: Vec<_> = items
            .into_iter()
            .map(into_address)
            .collect::<Result<_, _>>()
            .expect("addresses");
        assert_eq!(addresses, vec![a, b]);
        assert_eq!(into_string(tokens.next().expect("string")).expect("string"), "Alpha");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_uint(&[0u8; 8]), Err(AbiError::Decode(_))));
        assert!(matches!(
            into_uint(Token::Bool(true)),
            Err(AbiError::UnexpectedToken { expected: "uint", .. })
        ));
    }

    #[test]
    fn test_address_formatting() {
        let address = parse_address("0x00000000000000000000000000000000000000AA").expect("address");
        assert_eq!(format_address(&address), "0x00000000000000000000000000000000000000aa");
        assert!(parse_address("0xhub").is_err());
        assert!(parse_hash("0xtx").is_err());
    }

    #[test]
    fn test_topic_readers() {
        let address = parse_address("0x00000000000000000000000000000000000000c3").expect("address");
        let topic = H256::from(address);
        assert_eq!(topic_to_address(&topic), address);

        let mut nonce = [0u8; 32];
        nonce[31] = 51;
        assert_eq!(topic_to_u64(&H256::from(nonce)), Ok(51));
        assert_eq!(
            topic_to_u64(&H256::repeat_byte(0xff)),
            Err(AbiError::Overflow("uint64"))
        );
    }
}
