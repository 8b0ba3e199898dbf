//! Log decoding.
//!
//! Every hub event carries the nonce as the first indexed topic and the
//! vault as the second.

use ethers::abi::{ParamType, Token};
use ethers::types::{Log, H256, U256};
use rust_decimal::Decimal;
use vaultsync_rpc::{abi, ChainId};

use super::types::{ChainEvent, EventKind, MalformedLog, VaultEvent};
use crate::error::IndexerError;

/// Decodes a log returned for `kind`'s topic.
///
/// # Errors
///
/// Returns [`IndexerError::Decode`] if the topic does not match or the
/// payload is malformed.
pub fn decode_log(chain_id: ChainId, kind: EventKind, log: &Log) -> Result<ChainEvent, IndexerError> {
    if *topic(log, 0)? != kind.topic() {
        return Err(IndexerError::Decode(format!(
            "log {} is not a {kind} event",
            describe(log)
        )));
    }

    let nonce = abi::topic_to_u64(topic(log, 1)?)?;
    let vault = address_topic(log, 2)?;

    let event = match kind {
        EventKind::Deposit => {
            let mut data = Fields::decode(&[ParamType::Uint(256), ParamType::Uint(256)], log)?;
            VaultEvent::Deposit {
                vault,
                user: address_topic(log, 3)?,
                shares: data.amount()?,
                deposit_amount: data.amount()?,
            }
        }
        EventKind::Redeem => {
            let mut data = Fields::decode(&[ParamType::Uint(256), ParamType::Uint(256)], log)?;
            VaultEvent::Redeem {
                vault,
                user: address_topic(log, 3)?,
                shares: data.amount()?,
                deposit_out: data.amount()?,
            }
        }
        EventKind::VaultCreated => {
            let mut data = Fields::decode(
                &[ParamType::Address, ParamType::String, ParamType::String],
                log,
            )?;
            VaultEvent::VaultCreated {
                vault,
                share_token: address_topic(log, 3)?,
                deposit_token: data.address()?,
                name: data.string()?,
                symbol: data.string()?,
            }
        }
        EventKind::Rebalance => {
            let mut data = Fields::decode(&[ParamType::Uint(256)], log)?;
            VaultEvent::Rebalance {
                vault,
                rebalance_id: data.small_uint()?,
            }
        }
        EventKind::ParamsUpdated => {
            let mut data = Fields::decode(&[ParamType::Uint(256), ParamType::Uint(256)], log)?;
            VaultEvent::ParamsUpdated {
                vault,
                management_fee_bps: data.small_uint()?,
                deposit_cap: u256_to_decimal(data.uint()?).ok(),
            }
        }
    };

    let (block_number, transaction_hash, log_index) = position(log)?;
    Ok(ChainEvent {
        chain_id,
        nonce,
        block_number,
        transaction_hash,
        log_index,
        event,
    })
}

/// Describes a log of `kind` that failed to decode.
///
/// Returns `None` when not even the topic, nonce and block can be read, in
/// which case the log cannot be placed in the nonce sequence.
#[must_use]
pub fn malformed_log(
    chain_id: ChainId,
    kind: EventKind,
    log: &Log,
    reason: String,
) -> Option<MalformedLog> {
    if log.topics.first() != Some(&kind.topic()) {
        return None;
    }
    let nonce = log.topics.get(1).and_then(|t| abi::topic_to_u64(t).ok())?;
    let block_number = log.block_number?.as_u64();

    Some(MalformedLog {
        chain_id,
        kind,
        nonce,
        block_number,
        transaction_hash: log
            .transaction_hash
            .as_ref()
            .map(abi::format_hash)
            .unwrap_or_default(),
        log_index: log
            .log_index
            .and_then(|i| abi::uint_to_u64(i).ok())
            .unwrap_or_default(),
        reason,
    })
}

/// Decoded non-indexed fields, consumed in declaration order.
struct Fields(std::vec::IntoIter<Token>);

impl Fields {
    fn decode(types: &[ParamType], log: &Log) -> Result<Self, IndexerError> {
        Ok(Self(abi::decode(types, &log.data)?.into_iter()))
    }

    fn next(&mut self) -> Result<Token, IndexerError> {
        self.0
            .next()
            .ok_or_else(|| IndexerError::Decode("missing log field".to_string()))
    }

    fn uint(&mut self) -> Result<U256, IndexerError> {
        Ok(abi::into_uint(self.next()?)?)
    }

    fn small_uint(&mut self) -> Result<u64, IndexerError> {
        Ok(abi::uint_to_u64(self.uint()?)?)
    }

    fn amount(&mut self) -> Result<Decimal, IndexerError> {
        u256_to_decimal(self.uint()?)
    }

    fn address(&mut self) -> Result<String, IndexerError> {
        Ok(abi::format_address(&abi::into_address(self.next()?)?))
    }

    fn string(&mut self) -> Result<String, IndexerError> {
        Ok(abi::into_string(self.next()?)?)
    }
}

fn describe(log: &Log) -> String {
    format!(
        "{}:{}",
        log.transaction_hash
            .as_ref()
            .map(abi::format_hash)
            .unwrap_or_default(),
        log.log_index.unwrap_or_default()
    )
}

fn topic(log: &Log, index: usize) -> Result<&H256, IndexerError> {
    log.topics.get(index).ok_or_else(|| {
        IndexerError::Decode(format!("log {} has no topic {index}", describe(log)))
    })
}

fn address_topic(log: &Log, index: usize) -> Result<String, IndexerError> {
    Ok(abi::format_address(&abi::topic_to_address(topic(log, index)?)))
}

fn position(log: &Log) -> Result<(u64, String, u64), IndexerError> {
    let missing = |field: &str| IndexerError::Decode(format!("log {} has no {field}", describe(log)));

    let block_number = log.block_number.ok_or_else(|| missing("block number"))?.as_u64();
    let transaction_hash = log
        .transaction_hash
        .as_ref()
        .map(abi::format_hash)
        .ok_or_else(|| missing("transaction hash"))?;
    let log_index = abi::uint_to_u64(log.log_index.ok_or_else(|| missing("log index"))?)?;
    Ok((block_number, transaction_hash, log_index))
}

/// Converts a raw on-chain integer into a [`Decimal`].
///
/// # Errors
///
/// Returns [`IndexerError::Decode`] if the value exceeds the decimal range.
pub fn u256_to_decimal(value: U256) -> Result<Decimal, IndexerError> {
    abi::uint_to_u128(value)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 0).ok())
        .ok_or_else(|| IndexerError::Decode(format!("amount {value} out of range")))
}

/// Scales a raw integer amount down by `decimals`.
#[must_use]
pub fn scale_down(raw: Decimal, decimals: u32) -> Decimal {
    let mut value = raw;
    let mut remaining = decimals;
    while remaining > 0 {
        let step = remaining.min(18);
        value = value
            .checked_mul(Decimal::new(1, step))
            .unwrap_or(Decimal::ZERO);
        remaining -= step;
    }
    value.normalize()
}

#[cfg(test)]
pub(crate) mod tests {
    use ethers::abi;
    use ethers::types::{Address, Bytes, U64};

    use super::*;

    const VAULT: &str = "0x00000000000000000000000000000000000000a1";
    const USER: &str = "0x00000000000000000000000000000000000000b2";

    fn address(value: &str) -> Address {
        value.parse().expect("address")
    }

    /// Builds a hub log of `kind` at block 992.
    pub(crate) fn hub_log(kind: EventKind, nonce: u64, extra_topic: Option<&str>, data: Vec<Token>) -> Log {
        let mut topics = vec![kind.topic(), H256::from_low_u64_be(nonce), H256::from(address(VAULT))];
        if let Some(t) = extra_topic {
            topics.push(H256::from(address(t)));
        }
        Log {
            address: address("0x00000000000000000000000000000000000000aa"),
            topics,
            data: Bytes::from(abi::encode(&data)),
            block_number: Some(U64::from(992)),
            transaction_hash: Some(H256::repeat_byte(0x11)),
            log_index: Some(U256::from(3)),
            removed: Some(false),
            ..Default::default()
        }
    }

    fn uint(value: u64) -> Token {
        Token::Uint(U256::from(value))
    }

    #[test]
    fn test_decode_deposit() {
        let raw = hub_log(
            EventKind::Deposit,
            51,
            Some(USER),
            vec![uint(5_000_000), uint(5_000_000_000)],
        );
        let event = decode_log(1, EventKind::Deposit, &raw).expect("decode");

        assert_eq!(event.nonce, 51);
        assert_eq!(event.block_number, 992);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.transaction_hash, format!("0x{}", "11".repeat(32)));
        assert_eq!(
            event.event,
            VaultEvent::Deposit {
                vault: VAULT.to_string(),
                user: USER.to_string(),
                shares: Decimal::from(5_000_000),
                deposit_amount: Decimal::from(5_000_000_000u64),
            }
        );
    }

    #[test]
    fn test_decode_vault_created() {
        let deposit_token = "0x00000000000000000000000000000000000000c3";
        let raw = hub_log(
            EventKind::VaultCreated,
            1,
            Some(USER),
            vec![
                Token::Address(address(deposit_token)),
                Token::String("Alpha".to_string()),
                Token::String("ALP".to_string()),
            ],
        );

        let event = decode_log(1, EventKind::VaultCreated, &raw).expect("decode");

        match event.event {
            VaultEvent::VaultCreated {
                share_token,
                deposit_token: token,
                name,
                symbol,
                ..
            } => {
                assert_eq!(share_token, USER);
                assert_eq!(token, deposit_token);
                assert_eq!(name, "Alpha");
                assert_eq!(symbol, "ALP");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_params_updated() {
        let raw = hub_log(EventKind::ParamsUpdated, 9, None, vec![uint(150), uint(1_000_000)]);
        let event = decode_log(1, EventKind::ParamsUpdated, &raw).expect("decode");

        assert_eq!(
            event.event,
            VaultEvent::ParamsUpdated {
                vault: VAULT.to_string(),
                management_fee_bps: 150,
                deposit_cap: Some(Decimal::from(1_000_000)),
            }
        );
    }

    #[test]
    fn test_decode_params_updated_uncapped() {
        let raw = hub_log(
            EventKind::ParamsUpdated,
            9,
            None,
            vec![uint(100), Token::Uint(U256::MAX)],
        );
        let event = decode_log(1, EventKind::ParamsUpdated, &raw).expect("decode");

        assert_eq!(
            event.event,
            VaultEvent::ParamsUpdated {
                vault: VAULT.to_string(),
                management_fee_bps: 100,
                deposit_cap: None,
            }
        );
    }

    #[test]
    fn test_decode_wrong_topic() {
        let raw = hub_log(EventKind::Rebalance, 1, None, vec![uint(1)]);
        assert!(matches!(
            decode_log(1, EventKind::Deposit, &raw),
            Err(IndexerError::Decode(_))
        ));
        assert!(malformed_log(1, EventKind::Deposit, &raw, String::new()).is_none());
    }

    #[test]
    fn test_decode_missing_topic() {
        let raw = hub_log(EventKind::Deposit, 1, None, vec![uint(1), uint(1)]);
        assert!(matches!(
            decode_log(1, EventKind::Deposit, &raw),
            Err(IndexerError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_truncated_data() {
        let raw = hub_log(EventKind::Deposit, 7, Some(USER), vec![uint(1)]);
        let err = decode_log(1, EventKind::Deposit, &raw).expect_err("truncated");

        let malformed =
            malformed_log(1, EventKind::Deposit, &raw, err.to_string()).expect("placed");
        assert_eq!((malformed.nonce, malformed.block_number), (7, 992));
        assert_eq!(malformed.log_index, 3);
    }

    #[test]
    fn test_decode_amount_overflow() {
        let raw = hub_log(
            EventKind::Deposit,
            8,
            Some(USER),
            vec![Token::Uint(U256::MAX), uint(1)],
        );
        assert!(decode_log(1, EventKind::Deposit, &raw).is_err());
    }

    #[test]
    fn test_decode_pending_log() {
        let mut raw = hub_log(EventKind::Rebalance, 4, None, vec![uint(2)]);
        raw.block_number = None;

        assert!(decode_log(1, EventKind::Rebalance, &raw).is_err());
        assert!(malformed_log(1, EventKind::Rebalance, &raw, String::new()).is_none());
    }

    #[test]
    fn test_scale_down() {
        assert_eq!(scale_down(Decimal::from(5_000_000), 6), Decimal::from(5));
        assert_eq!(
            scale_down(Decimal::from(1_500_000_000_000_000_000u64), 18),
            Decimal::new(15, 1)
        );
        assert_eq!(scale_down(Decimal::from(7), 0), Decimal::from(7));
    }

    #[test]
    fn test_u256_to_decimal_range() {
        assert_eq!(u256_to_decimal(U256::from(42)).expect("decimal"), Decimal::from(42));
        assert!(u256_to_decimal(U256::from(u128::MAX)).is_err());
        assert!(u256_to_decimal(U256::MAX).is_err());
    }
}
