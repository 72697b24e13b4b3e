//! Translation of raw node data into [`ChainEvent`]s.
//!
//! Pure functions: no I/O, no hidden state. A malformed field fails the
//! single event, never the session.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use thiserror::Error;

use crate::utils::parse_quantity;

use super::chain_events::{Address, BalanceSample, ChainEvent, RawHeader};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("header field `{0}` is missing")]
    MissingField(&'static str),

    #[error("header field `{field}` is malformed: {value:?}")]
    MalformedQuantity { field: &'static str, value: String },

    #[error("timestamp {0} is outside the representable range")]
    TimestampOutOfRange(String),
}

/// Translates a raw header into a `NewBlock` event.
pub fn translate_header(raw: &RawHeader) -> Result<ChainEvent, TranslationError> {
    let height = quantity("number", raw.number.as_deref())?;
    let difficulty = quantity("difficulty", raw.difficulty.as_deref())?;
    let miner = identifier("miner", raw.miner.as_deref())?;
    let parent_hash = identifier("parentHash", raw.parent_hash.as_deref())?;
    let timestamp = timestamp(&quantity("timestamp", raw.timestamp.as_deref())?)?;
    let nonce = raw
        .nonce
        .as_deref()
        .map(|n| quantity("nonce", Some(n)))
        .transpose()?;

    Ok(ChainEvent::NewBlock {
        height,
        difficulty,
        miner,
        parent_hash,
        timestamp,
        nonce,
    })
}

/// Translates a balance observation into a `BalanceIncreased` event.
pub fn translate_balance(address: &Address, sample: &BalanceSample) -> ChainEvent {
    ChainEvent::BalanceIncreased {
        address: *address,
        new_balance: sample.balance.clone(),
    }
}

fn required<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, TranslationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TranslationError::MissingField(field)),
    }
}

fn quantity(field: &'static str, value: Option<&str>) -> Result<BigUint, TranslationError> {
    let value = required(field, value)?;
    parse_quantity(value).map_err(|_| TranslationError::MalformedQuantity {
        field,
        value: value.to_string(),
    })
}

fn identifier(field: &'static str, value: Option<&str>) -> Result<String, TranslationError> {
    required(field, value).map(str::to_string)
}

fn timestamp(secs: &BigUint) -> Result<DateTime<Utc>, TranslationError> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| TranslationError::TimestampOutOfRange(secs.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(number: &str, difficulty: &str, timestamp: &str) -> RawHeader {
        RawHeader {
            number: Some(number.to_string()),
            difficulty: Some(difficulty.to_string()),
            miner: Some("0xA".to_string()),
            parent_hash: Some("0xP".to_string()),
            timestamp: Some(timestamp.to_string()),
            nonce: None,
        }
    }

    #[test]
    fn test_header_scenario_translates_to_new_block() {
        let event = translate_header(&raw("100", "500", "1700000000")).unwrap();
        let record = event.to_record("eth");
        assert_eq!(record.get("number"), Some("100"));
        assert_eq!(record.get("difficulty"), Some("500"));
        assert_eq!(record.get("miner"), Some("0xA"));
        assert_eq!(record.get("parentHash"), Some("0xP"));
        assert_eq!(record.get("timestamp"), Some("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_hex_header_matches_decimal_header() {
        let hex = translate_header(&raw("0x64", "0x1f4", "0x6553f100")).unwrap();
        let dec = translate_header(&raw("100", "500", "1700000000")).unwrap();
        assert_eq!(hex, dec);
    }

    #[test]
    fn test_translation_is_idempotent() {
        let header = raw("0x64", "0x1f4", "0x6553f100");
        assert_eq!(translate_header(&header), translate_header(&header));
    }

    #[test]
    fn test_large_difficulty_is_preserved() {
        let event = translate_header(&raw("1", "0xffffffffffffffffffffffffffffffffff", "0")).unwrap();
        assert_eq!(
            event.to_record("eth").get("difficulty"),
            Some("87112285931760246646623899502532662132735")
        );
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = translate_header(&raw("0xnope", "1", "1")).unwrap_err();
        assert_eq!(
            err,
            TranslationError::MalformedQuantity {
                field: "number",
                value: "0xnope".to_string()
            }
        );
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let mut header = raw("1", "1", "1");
        header.parent_hash = None;
        assert_eq!(
            translate_header(&header).unwrap_err(),
            TranslationError::MissingField("parentHash")
        );
    }

    #[test]
    fn test_out_of_range_timestamp_is_an_error() {
        let header = raw("1", "1", "0xffffffffffffffffff");
        assert!(matches!(
            translate_header(&header),
            Err(TranslationError::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn test_malformed_nonce_fails_the_event() {
        let mut header = raw("1", "1", "1");
        header.nonce = Some("0xq".to_string());
        assert!(matches!(
            translate_header(&header),
            Err(TranslationError::MalformedQuantity { field: "nonce", .. })
        ));
    }

    #[test]
    fn test_balance_translation() {
        let address: Address = "0x00000000000000000000000000000000deadbeef".parse().unwrap();
        let sample = BalanceSample {
            height: BigUint::from(6u32),
            balance: BigUint::from(15u32),
        };
        let record = translate_balance(&address, &sample).to_record("eth");
        assert_eq!(record.name, "balance_increased");
        assert_eq!(record.get("balance"), Some("15"));
        assert_eq!(record.get("address"), Some("0x00000000000000000000000000000000deadbeef"));
    }
}
