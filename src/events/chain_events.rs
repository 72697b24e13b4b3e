//! Chain events and the records handed to the host sink.
//!
//! Raw node data ([`RawHeader`], [`BalanceSample`]) never reaches the sink
//! directly: it is translated into a [`ChainEvent`] first, and only the
//! encoded [`EventRecord`] leaves the crate.

use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A 20-byte account address. Records and RPC params use the lowercase
/// `0x` form (`{:#x}`).
pub use alloy_primitives::Address;

pub const NEW_BLOCK: &str = "new_block";
pub const BALANCE_INCREASED: &str = "balance_increased";
pub const NEW_TRANSACTION: &str = "new_transaction";

/// A block header exactly as the node sent it.
///
/// Every field is optional on the wire; missing or malformed values are
/// reported by the translator instead of being defaulted. A field of the
/// wrong JSON type keeps its JSON text, so decoding a header object never
/// fails on field contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHeader {
    #[serde(default, deserialize_with = "lenient_field")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_field")]
    pub difficulty: Option<String>,
    #[serde(default, deserialize_with = "lenient_field")]
    pub miner: Option<String>,
    #[serde(default, deserialize_with = "lenient_field")]
    pub parent_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_field")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_field")]
    pub nonce: Option<String>,
}

fn lenient_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// One successful balance observation for the watched address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSample {
    pub height: BigUint,
    pub balance: BigUint,
}

/// Normalized chain event. The sink only ever sees these, encoded as records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A new block header arrived on the subscription.
    NewBlock {
        height: BigUint,
        difficulty: BigUint,
        miner: String,
        parent_hash: String,
        timestamp: DateTime<Utc>,
        nonce: Option<BigUint>,
    },

    /// The watched address holds more than at the previous observation.
    BalanceIncreased { address: Address, new_balance: BigUint },

    /// Reserved: declared to hosts, never produced by the watcher.
    NewTransaction { txid: String },
}

impl ChainEvent {
    /// Event name as declared in the vocabulary.
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::NewBlock { .. } => NEW_BLOCK,
            ChainEvent::BalanceIncreased { .. } => BALANCE_INCREASED,
            ChainEvent::NewTransaction { .. } => NEW_TRANSACTION,
        }
    }

    /// Block height for `NewBlock` events.
    pub fn height(&self) -> Option<&BigUint> {
        match self {
            ChainEvent::NewBlock { height, .. } => Some(height),
            _ => None,
        }
    }

    /// Encodes the event into the host's name/field record shape.
    pub fn to_record(&self, namespace: &str) -> EventRecord {
        let fields = match self {
            ChainEvent::NewBlock {
                height,
                difficulty,
                miner,
                parent_hash,
                timestamp,
                nonce,
            } => {
                let mut fields = vec![
                    EventField::new("number", height.to_string()),
                    EventField::new("difficulty", difficulty.to_string()),
                    EventField::new("miner", miner.clone()),
                    EventField::new("parentHash", parent_hash.clone()),
                    EventField::new(
                        "timestamp",
                        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                ];
                if let Some(nonce) = nonce {
                    fields.push(EventField::new("nonce", nonce.to_string()));
                }
                fields
            }
            ChainEvent::BalanceIncreased {
                address,
                new_balance,
            } => vec![
                EventField::new("address", format!("{address:#x}")),
                EventField::new("balance", new_balance.to_string()),
            ],
            ChainEvent::NewTransaction { txid } => vec![EventField::new("txid", txid.clone())],
        };

        EventRecord {
            namespace: namespace.to_string(),
            name: self.name(),
            fields,
        }
    }
}

/// One event as delivered to the host sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub namespace: String,
    pub name: &'static str,
    pub fields: Vec<EventField>,
}

impl EventRecord {
    /// Looks up a field value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventField {
    pub name: &'static str,
    pub value: String,
}

impl EventField {
    fn new(name: &'static str, value: String) -> Self {
        Self { name, value }
    }
}

/// Declared shape of one event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldDescriptor],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

const fn field(name: &'static str, description: &'static str) -> FieldDescriptor {
    FieldDescriptor {
        name,
        description,
        kind: "string",
    }
}

const VOCABULARY: &[EventDescriptor] = &[
    EventDescriptor {
        name: NEW_BLOCK,
        description: "A new block was mined",
        fields: &[
            field("number", "The block number"),
            field("difficulty", "The block difficulty"),
            field("miner", "The address of the miner of the block"),
            field("parentHash", "The block's parent hash"),
            field("timestamp", "The block timestamp"),
            field("nonce", "The block nonce"),
        ],
    },
    EventDescriptor {
        name: BALANCE_INCREASED,
        description: "The balance of the watched address increased",
        fields: &[
            field("address", "The watched address"),
            field("balance", "The new balance"),
        ],
    },
    EventDescriptor {
        name: NEW_TRANSACTION,
        description: "A transaction involving the address was mined",
        fields: &[field("txid", "The transaction ID")],
    },
];

/// Every event kind a watcher can declare to its host.
pub fn vocabulary() -> &'static [EventDescriptor] {
    VOCABULARY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(nonce: Option<BigUint>) -> ChainEvent {
        ChainEvent::NewBlock {
            height: BigUint::from(100u32),
            difficulty: BigUint::from(500u32),
            miner: "0xA".to_string(),
            parent_hash: "0xP".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            nonce,
        }
    }

    #[test]
    fn test_new_block_record_fields() {
        let record = sample_block(None).to_record("eth");
        assert_eq!(record.namespace, "eth");
        assert_eq!(record.name, "new_block");
        assert_eq!(record.get("number"), Some("100"));
        assert_eq!(record.get("difficulty"), Some("500"));
        assert_eq!(record.get("miner"), Some("0xA"));
        assert_eq!(record.get("parentHash"), Some("0xP"));
        assert_eq!(record.get("timestamp"), Some("2023-11-14T22:13:20Z"));
        assert_eq!(record.get("nonce"), None);
    }

    #[test]
    fn test_nonce_is_encoded_when_present() {
        let record = sample_block(Some(BigUint::from(42u32))).to_record("eth");
        assert_eq!(record.get("nonce"), Some("42"));
    }

    #[test]
    fn test_balance_record_uses_lowercase_address() {
        let address: Address = "0x00000000000000000000000000000000DEADBEEF".parse().unwrap();
        let record = ChainEvent::BalanceIncreased {
            address,
            new_balance: BigUint::from(15u32),
        }
        .to_record("eth");

        assert_eq!(record.name, "balance_increased");
        assert_eq!(
            record.get("address"),
            Some("0x00000000000000000000000000000000deadbeef")
        );
        assert_eq!(record.get("balance"), Some("15"));
    }

    #[test]
    fn test_address_rejects_malformed() {
        for raw in ["", "0x", "0x1234", "0xzz000000000000000000000000000000deadbeef"] {
            assert!(raw.parse::<Address>().is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_vocabulary_declares_reserved_transaction_event() {
        let names: Vec<_> = vocabulary().iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["new_block", "balance_increased", "new_transaction"]);

        let tx = ChainEvent::NewTransaction {
            txid: "0xabc".to_string(),
        };
        assert_eq!(tx.to_record("eth").get("txid"), Some("0xabc"));
    }

    #[test]
    fn test_raw_header_deserializes_node_json() {
        let raw: RawHeader = serde_json::from_value(serde_json::json!({
            "number": "0x64",
            "difficulty": "0x1f4",
            "miner": "0xa",
            "parentHash": "0xp",
            "timestamp": "0x6553f100",
            "hash": "0xignored"
        }))
        .unwrap();

        assert_eq!(raw.number.as_deref(), Some("0x64"));
        assert_eq!(raw.parent_hash.as_deref(), Some("0xp"));
        assert_eq!(raw.nonce, None);
    }

    #[test]
    fn test_wrongly_typed_fields_reach_the_translator() {
        let raw: RawHeader = serde_json::from_value(serde_json::json!({
            "number": 436,
            "miner": null,
            "timestamp": { "seconds": 1 },
        }))
        .unwrap();

        assert_eq!(raw.number.as_deref(), Some("436"));
        assert_eq!(raw.miner, None);
        assert_eq!(raw.timestamp.as_deref(), Some(r#"{"seconds":1}"#));
    }
}
