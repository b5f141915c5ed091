//! Transaction envelope assembly and signing
//!
//! An envelope binds an ordered list of operations, a payer and an [`Anchor`] into
//! one atomic message, in either legacy or v0 encoding. Signatures accumulate until
//! every declared signer has signed; only then does the envelope get a stable
//! [`EnvelopeId`] and become submittable. Submission seals it.

use sha2::{Digest, Sha256};
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, Message, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::Signature,
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::errors::EnvelopeError;
use crate::types::{Anchor, Encoding, EnvelopeId};

/// Maximum serialized transaction size accepted by the wire protocol
pub const MAX_WIRE_SIZE: usize = PACKET_DATA_SIZE;

/// Atomic unit of operations signed against one anchor
#[derive(Debug)]
pub struct TransactionEnvelope {
    operations: Vec<Instruction>,
    payer: Pubkey,
    anchor: Anchor,
    encoding: Encoding,
    message: VersionedMessage,
    message_bytes: Vec<u8>,
    required_signers: Vec<Pubkey>,
    signatures: HashMap<Pubkey, Signature>,
    sealed: AtomicBool,
}

impl TransactionEnvelope {
    /// Compile operations into a message anchored at `anchor`.
    ///
    /// The size check runs against the full wire form with placeholder signatures,
    /// so an envelope that builds will also fit once signed.
    pub fn build(
        operations: Vec<Instruction>,
        payer: Pubkey,
        anchor: Anchor,
        encoding: Encoding,
    ) -> Result<Self, EnvelopeError> {
        if operations.is_empty() {
            return Err(EnvelopeError::Empty);
        }

        let message = match encoding {
            Encoding::Legacy => VersionedMessage::Legacy(Message::new_with_blockhash(
                &operations,
                Some(&payer),
                &anchor.value,
            )),
            Encoding::Versioned => VersionedMessage::V0(
                v0::Message::try_compile(&payer, &operations, &[], anchor.value)
                    .map_err(|e| EnvelopeError::Compile(e.to_string()))?,
            ),
        };

        let signer_count = message.header().num_required_signatures as usize;
        let required_signers: Vec<Pubkey> = message
            .static_account_keys()
            .iter()
            .take(signer_count)
            .copied()
            .collect();

        let placeholder = VersionedTransaction {
            signatures: vec![Signature::default(); signer_count],
            message: message.clone(),
        };
        let size = bincode::serialize(&placeholder)
            .map_err(|e| EnvelopeError::Encode(e.to_string()))?
            .len();
        if size > MAX_WIRE_SIZE {
            return Err(EnvelopeError::TooManyOperations {
                size,
                max: MAX_WIRE_SIZE,
            });
        }

        let message_bytes = message.serialize();

        debug!(
            payer = %payer,
            operations = operations.len(),
            signers = signer_count,
            size = size,
            encoding = ?encoding,
            "Envelope built"
        );

        Ok(Self {
            operations,
            payer,
            anchor,
            encoding,
            message,
            message_bytes,
            required_signers,
            signatures: HashMap::with_capacity(signer_count),
            sealed: AtomicBool::new(false),
        })
    }

    /// Add a signature from a declared signer
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<(), EnvelopeError> {
        if self.is_sealed() {
            return Err(EnvelopeError::AlreadyFinalized);
        }

        let pubkey = signer.pubkey();
        if !self.required_signers.contains(&pubkey) {
            return Err(EnvelopeError::UnknownSigner(pubkey));
        }

        let signature = signer
            .try_sign_message(&self.message_bytes)
            .map_err(|e| EnvelopeError::Signing(e.to_string()))?;
        self.signatures.insert(pubkey, signature);
        Ok(())
    }

    /// Sign with several signers in order, stopping at the first failure
    pub fn sign_all(&mut self, signers: &[&dyn Signer]) -> Result<(), EnvelopeError> {
        for signer in signers {
            self.sign(*signer)?;
        }
        Ok(())
    }

    /// Stable identifier, available once every declared signer has signed
    pub fn id(&self) -> Result<EnvelopeId, EnvelopeError> {
        let missing = self.missing_signers();
        if !missing.is_empty() {
            return Err(EnvelopeError::Incomplete { missing });
        }

        let signatures = self.ordered_signatures();
        let primary = signatures[0];

        match self.encoding {
            Encoding::Legacy => Ok(EnvelopeId::Signature(primary)),
            Encoding::Versioned => {
                let mut hasher = Sha256::new();
                hasher.update(&self.message_bytes);
                for signature in &signatures {
                    hasher.update(signature.as_ref());
                }
                let digest: [u8; 32] = hasher.finalize().into();
                Ok(EnvelopeId::Digest {
                    digest: Hash::new_from_array(digest),
                    signature: primary,
                })
            }
        }
    }

    pub fn is_fully_signed(&self) -> bool {
        self.required_signers
            .iter()
            .all(|key| self.signatures.contains_key(key))
    }

    pub fn missing_signers(&self) -> Vec<Pubkey> {
        self.required_signers
            .iter()
            .filter(|key| !self.signatures.contains_key(key))
            .copied()
            .collect()
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        &self.required_signers
    }

    pub fn operations(&self) -> &[Instruction] {
        &self.operations
    }

    pub fn payer(&self) -> &Pubkey {
        &self.payer
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn message(&self) -> &VersionedMessage {
        &self.message
    }

    pub fn signatures(&self) -> &HashMap<Pubkey, Signature> {
        &self.signatures
    }

    /// Wire transaction; unsigned slots carry the default signature
    pub fn to_transaction(&self) -> VersionedTransaction {
        VersionedTransaction {
            signatures: self.ordered_signatures(),
            message: self.message.clone(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Mark the envelope as submitted. Returns whether it was already sealed.
    pub(crate) fn seal(&self) -> bool {
        self.sealed.swap(true, Ordering::AcqRel)
    }

    fn ordered_signatures(&self) -> Vec<Signature> {
        self.required_signers
            .iter()
            .map(|key| self.signatures.get(key).copied().unwrap_or_default())
            .collect()
    }
}

/// Serializes an envelope into wire bytes.
///
/// Implementations must be deterministic for identical operations, anchor
/// and signatures.
pub trait Encoder: Send + Sync + std::fmt::Debug {
    fn encode(&self, envelope: &TransactionEnvelope) -> Result<Vec<u8>, EnvelopeError>;
}

/// Standard wire format: bincode of the `VersionedTransaction`
#[derive(Debug, Clone, Copy, Default)]
pub struct WireEncoder;

impl Encoder for WireEncoder {
    fn encode(&self, envelope: &TransactionEnvelope) -> Result<Vec<u8>, EnvelopeError> {
        bincode::serialize(&envelope.to_transaction())
            .map_err(|e| EnvelopeError::Encode(e.to_string()))
    }
}
