//! Core types for the sequencer
//!
//! All types are designed for:
//! - Canonical ordering (addresses order by their raw bytes)
//! - Transparent wire encoding (hex strings, JSON payloads)
//! - Exact arithmetic (unsigned integer balances)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Account balance in the ledger's unit
pub type Balance = u128;

/// 32-byte Keccak-256 digest
pub type Hash32 = [u8; 32];

/// 20-byte account identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// Zero address
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Left-pad to a 32-byte ABI word
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl FromStr for Address {
    type Err = crate::Error;

    /// Parse `0x`-prefixed or bare hex, any letter case
    fn from_str(s: &str) -> crate::Result<Self> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let raw = hex::decode(digits)
            .map_err(|e| crate::Error::InvalidTransfer(format!("Invalid address {}: {}", s, e)))?;
        let bytes: [u8; 20] = raw.try_into().map_err(|_| {
            crate::Error::InvalidTransfer(format!("Invalid address {}: expected 20 bytes", s))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Recoverable secp256k1 signature (`r || s || v`)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 65]);

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// Recovery byte, normalized to 0 or 1
    ///
    /// Wallets emit either the raw id (0/1) or the legacy 27/28 form.
    pub fn recovery_id(&self) -> Option<u8> {
        match self.0[64] {
            0 | 1 => Some(self.0[64]),
            27 | 28 => Some(self.0[64] - 27),
            _ => None,
        }
    }
}

impl FromStr for Signature {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits)
            .map_err(|e| crate::Error::Authorization(format!("Malformed signature: {}", e)))?;
        let bytes: [u8; 65] = raw.try_into().map_err(|_| {
            crate::Error::Authorization("Malformed signature: expected 65 bytes".to_string())
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inbound transfer submission
///
/// Field names follow the wallet's submission body (`account` is the sender).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Claimed signer and debited account
    #[serde(rename = "account")]
    pub sender: Address,

    /// Credited account
    pub recipient: Address,

    /// Amount to move, in base units
    #[serde(with = "decimal")]
    pub amount: Balance,

    /// Typed-data signature over the transfer payload
    pub signature: Signature,
}

/// Verified transfer waiting to be anchored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Debited account
    pub from: Address,
    /// Credited account
    pub to: Address,
    /// Amount moved
    pub amount: Balance,
    /// Signature that authorized the transfer
    pub signature: Signature,
}

impl Transaction {
    /// Build from an authorized request
    pub fn from_request(request: &TransferRequest) -> Self {
        Self {
            from: request.sender,
            to: request.recipient,
            amount: request.amount,
            signature: request.signature,
        }
    }
}

/// Anchored block header plus its transaction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the anchored chain (0-based)
    pub index: u64,

    /// Hash of the preceding block's full header
    #[serde(with = "hex_hash")]
    pub previous_block_hash: Hash32,

    /// Commitment over all balances after this block
    #[serde(with = "hex_hash")]
    pub state_root: Hash32,

    /// JSON-encoded transactions, in anchoring order
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,

    /// Commit time (unix seconds)
    pub timestamp: u64,
}

impl Block {
    /// Decode the transaction payload
    pub fn transactions(&self) -> crate::Result<Vec<Transaction>> {
        if self.payload.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Balance record in the anchor's parallel-array shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Accounts, in address order
    pub addresses: Vec<Address>,
    /// Balance of `addresses[i]`
    #[serde(with = "decimal::list")]
    pub balances: Vec<Balance>,
}

impl BalanceUpdate {
    /// Build from a sorted snapshot
    pub fn from_snapshot(snapshot: &[(Address, Balance)]) -> Self {
        let (addresses, balances) = snapshot.iter().copied().unzip();
        Self { addresses, balances }
    }

    /// Pair addresses with balances
    pub fn entries(&self) -> crate::Result<Vec<(Address, Balance)>> {
        if self.addresses.len() != self.balances.len() {
            return Err(crate::Error::InvariantViolation(format!(
                "Balance record has {} addresses but {} balances",
                self.addresses.len(),
                self.balances.len()
            )));
        }
        Ok(self
            .addresses
            .iter()
            .copied()
            .zip(self.balances.iter().copied())
            .collect())
    }

    /// Whether the record holds no accounts
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Serde helper: `[u8; 32]` as `0x`-hex
pub mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize
    pub fn serialize<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(hash)))
    }

    /// Deserialize
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hash"))
    }
}

/// Serde helper: byte strings as `0x`-hex
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    /// Deserialize
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

/// Serde helper: balances as decimal strings
///
/// Base-unit token amounts routinely exceed `u64`, which neither JSON
/// number handling on the gateway side nor `serde_json::Value` can hold.
/// Plain integers are still accepted on input.
pub mod decimal {
    use super::Balance;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Serialize
    pub fn serialize<S: Serializer>(value: &Balance, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Deserialize
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Balance, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Balance;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or decimal string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Balance, E> {
            Ok(Balance::from(value))
        }

        fn visit_u128<E: de::Error>(self, value: u128) -> Result<Balance, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Balance, E> {
            Balance::try_from(value).map_err(|_| E::custom(format!("negative amount {}", value)))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Balance, E> {
            value
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid amount {:?}", value)))
        }
    }

    /// Same encoding for a list of balances
    pub mod list {
        use super::Balance;
        use serde::{Deserialize, Deserializer, Serializer};

        #[derive(Deserialize)]
        struct Amount(#[serde(with = "crate::types::decimal")] Balance);

        /// Serialize
        pub fn serialize<S: Serializer>(values: &[Balance], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|value| value.to_string()))
        }

        /// Deserialize
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Balance>, D::Error> {
            let amounts = Vec::<Amount>::deserialize(deserializer)?;
            Ok(amounts.into_iter().map(|Amount(value)| value).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_is_case_insensitive() {
        let lower: Address = "0x5065fd0b55a7ef076306b25ef4ac7e34efdbbc2c".parse().unwrap();
        let mixed: Address = "0x5065Fd0b55a7eF076306b25Ef4aC7E34efDBBC2C".parse().unwrap();
        let bare: Address = "5065FD0B55A7EF076306B25EF4AC7E34EFDBBC2C".parse().unwrap();

        assert_eq!(lower, mixed);
        assert_eq!(lower, bare);
        assert_eq!(mixed.to_string(), "0x5065fd0b55a7ef076306b25ef4ac7e34efdbbc2c");
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz65fd0b55a7ef076306b25ef4ac7e34efdbbc2c".parse::<Address>().is_err());
    }

    #[test]
    fn test_signature_recovery_id_forms() {
        let mut raw = [0u8; 65];
        raw[64] = 28;
        assert_eq!(Signature::from_bytes(raw).recovery_id(), Some(1));
        raw[64] = 0;
        assert_eq!(Signature::from_bytes(raw).recovery_id(), Some(0));
        raw[64] = 5;
        assert_eq!(Signature::from_bytes(raw).recovery_id(), None);
    }

    #[test]
    fn test_transfer_request_wire_names() {
        let body = serde_json::json!({
            "account": "0x5065fd0b55a7ef076306b25ef4ac7e34efdbbc2c",
            "recipient": "0x2d0701aa56458beca4f04f7b6af2325b6a437fb7",
            "amount": 30,
            "signature": format!("0x{}", "11".repeat(65)),
        });

        let request: TransferRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.amount, 30);
        assert_eq!(
            request.sender.to_string(),
            "0x5065fd0b55a7ef076306b25ef4ac7e34efdbbc2c"
        );
    }

    #[test]
    fn test_block_json_shape() {
        let block = Block {
            index: 2,
            previous_block_hash: [0xab; 32],
            state_root: [0xcd; 32],
            payload: b"[]".to_vec(),
            timestamp: 1_700_000_000,
        };

        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["index"], 2);
        assert!(json["previousBlockHash"].as_str().unwrap().starts_with("0xabab"));
        assert_eq!(json["payload"], "0x5b5d");

        let decoded: Block = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.transactions().unwrap().is_empty());
    }

    #[test]
    fn test_balance_update_carries_large_balances() {
        let whole_tokens: Balance = 100 * 10u128.pow(18);
        let update = BalanceUpdate {
            addresses: vec![Address::ZERO],
            balances: vec![whole_tokens],
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["balances"][0], "100000000000000000000");

        let decoded: BalanceUpdate = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, update);

        // Gateways that send small balances as numbers still decode
        let numeric: BalanceUpdate = serde_json::from_value(serde_json::json!({
            "addresses": [Address::ZERO],
            "balances": [70],
        }))
        .unwrap();
        assert_eq!(numeric.balances, vec![70]);
    }

    #[test]
    fn test_balance_update_length_mismatch() {
        let update = BalanceUpdate {
            addresses: vec![Address::ZERO],
            balances: vec![],
        };
        assert!(update.entries().is_err());
    }
}
