//! Cryptographic operations for the sequencer
//!
//! This module provides:
//! - Keccak-256 hashing and packed ABI words
//! - Typed-data (EIP-712) digests for transfer authorizations
//! - secp256k1 signer recovery and a signing key pair

use crate::types::{Address, Balance, Hash32, Signature};
use crate::{Error, Result};
use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey};
use sha3::{Digest, Keccak256};

/// Hash arbitrary bytes using Keccak-256
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode an unsigned integer as a big-endian 32-byte word (`uint256`)
pub fn u256_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Call data for `transfer(address,uint256)`
pub fn encode_transfer_call(recipient: &Address, amount: Balance) -> Vec<u8> {
    let selector = keccak256(b"transfer(address,uint256)");
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&selector[..4]);
    data.extend_from_slice(&recipient.to_word());
    data.extend_from_slice(&u256_word(amount));
    data
}

/// Typed-data signing domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedDataDomain {
    /// Domain name
    pub name: String,
    /// Domain version
    pub version: String,
    /// Chain id
    pub chain_id: u64,
    /// Verifying contract
    pub verifying_contract: Address,
}

impl TypedDataDomain {
    /// Domain separator
    pub fn separator(&self) -> Hash32 {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let mut encoded = Vec::with_capacity(32 * 5);
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&keccak256(self.name.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.version.as_bytes()));
        encoded.extend_from_slice(&u256_word(self.chain_id as u128));
        encoded.extend_from_slice(&self.verifying_contract.to_word());
        keccak256(&encoded)
    }
}

impl From<&crate::config::DomainConfig> for TypedDataDomain {
    fn from(config: &crate::config::DomainConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            chain_id: config.chain_id,
            verifying_contract: config.verifying_contract,
        }
    }
}

/// `Transaction(address to, bytes data)` typed-data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedTransaction {
    /// Contract the call targets
    pub to: Address,
    /// ABI-encoded call data
    pub data: Vec<u8>,
}

impl TypedTransaction {
    /// Struct hash
    pub fn struct_hash(&self) -> Hash32 {
        let type_hash = keccak256(b"Transaction(address to,bytes data)");
        let mut encoded = Vec::with_capacity(32 * 3);
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&self.to.to_word());
        encoded.extend_from_slice(&keccak256(&self.data));
        keccak256(&encoded)
    }

    /// Final digest that gets signed
    pub fn signing_digest(&self, domain: &TypedDataDomain) -> Hash32 {
        let mut encoded = Vec::with_capacity(2 + 64);
        encoded.extend_from_slice(&[0x19, 0x01]);
        encoded.extend_from_slice(&domain.separator());
        encoded.extend_from_slice(&self.struct_hash());
        keccak256(&encoded)
    }
}

/// Address controlled by an uncompressed secp256k1 public key
pub fn address_of(public_key: &PublicKey) -> Address {
    let serialized = public_key.serialize();
    let hash = keccak256(&serialized[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}

/// Recover the signing address of a 32-byte digest
pub fn recover_signer(digest: &Hash32, signature: &Signature) -> Result<Address> {
    let raw = signature.as_bytes();
    let recovery_byte = signature
        .recovery_id()
        .ok_or_else(|| Error::Authorization(format!("Invalid recovery byte {}", raw[64])))?;
    let recovery_id = RecoveryId::parse(recovery_byte)
        .map_err(|e| Error::Authorization(format!("Invalid recovery id: {:?}", e)))?;
    let rs = libsecp256k1::Signature::parse_standard_slice(&raw[..64])
        .map_err(|e| Error::Authorization(format!("Malformed signature: {:?}", e)))?;

    let public_key = libsecp256k1::recover(&Message::parse(digest), &rs, &recovery_id)
        .map_err(|e| Error::Authorization(format!("Signer recovery failed: {:?}", e)))?;

    Ok(address_of(&public_key))
}

/// secp256k1 key pair for signing
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        loop {
            // Out-of-range scalars are astronomically rare; draw again
            if let Ok(pair) = Self::from_seed(&rand::random::<[u8; 32]>()) {
                return pair;
            }
        }
    }

    /// Create from a 32-byte secret - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let secret_key = SecretKey::parse(seed)
            .map_err(|e| Error::Config(format!("Invalid secret key: {:?}", e)))?;
        let public_key = PublicKey::from_secret_key(&secret_key);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Address controlled by this key
    pub fn address(&self) -> Address {
        address_of(&self.public_key)
    }

    /// Sign a 32-byte digest, `v` in the 27/28 form wallets emit
    pub fn sign_digest(&self, digest: &Hash32) -> Signature {
        let (rs, recovery_id) = libsecp256k1::sign(&Message::parse(digest), &self.secret_key);
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&rs.serialize());
        bytes[64] = recovery_id.serialize() + 27;
        Signature::from_bytes(bytes)
    }

    /// Sign a transfer authorization the way a wallet does
    pub fn sign_transfer(
        &self,
        domain: &TypedDataDomain,
        recipient: &Address,
        amount: Balance,
    ) -> Signature {
        let message = TypedTransaction {
            to: domain.verifying_contract,
            data: encode_transfer_call(recipient, amount),
        };
        self.sign_digest(&message.signing_digest(domain))
    }
}
