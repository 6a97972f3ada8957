//! Transfer authorization
//!
//! A transfer is authorized when its typed-data signature recovers to the
//! account it debits. The payload is rebuilt from the request fields under a
//! fixed domain, so a caller cannot point the signature at another contract.

use crate::crypto::{encode_transfer_call, recover_signer, TypedDataDomain, TypedTransaction};
use crate::types::{Address, TransferRequest};
use crate::{Error, Result};

/// Recovers and checks transfer signers
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    domain: TypedDataDomain,
}

impl SignatureVerifier {
    /// Create verifier for a signing domain
    pub fn new(domain: TypedDataDomain) -> Self {
        Self { domain }
    }

    /// Signing domain
    pub fn domain(&self) -> &TypedDataDomain {
        &self.domain
    }

    /// Typed-data message a wallet signs for this request
    pub fn authorization_payload(&self, request: &TransferRequest) -> TypedTransaction {
        TypedTransaction {
            to: self.domain.verifying_contract,
            data: encode_transfer_call(&request.recipient, request.amount),
        }
    }

    /// Recover the address that signed the request
    pub fn verify(&self, request: &TransferRequest) -> Result<Address> {
        let digest = self.authorization_payload(request).signing_digest(&self.domain);
        recover_signer(&digest, &request.signature)
    }

    /// Recover the signer and require it to be the claimed sender
    ///
    /// The signed payload carries no nonce, so a captured request authorizes
    /// the same transfer again every time it is resubmitted.
    pub fn authorize(&self, request: &TransferRequest) -> Result<Address> {
        let recovered = self.verify(request)?;
        if recovered != request.sender {
            return Err(Error::Authorization(format!(
                "signature recovers to {}, not claimed sender {}",
                recovered, request.sender
            )));
        }
        Ok(recovered)
    }
}
