//! Signed payment requests
//!
//! A payment request lists the outputs a merchant wants paid, an expiry, and
//! optionally a certificate chain with a signature over the request. The wire
//! format is a fixed binary layout:
//!
//! ```text
//! "SPR1" | version u8 | network u8
//! | count | { amount u64 LE | script var_bytes } ...
//! | memo var_bytes | created u64 LE | expires u64 LE (0 = never)
//! | count | { certificate } ... | signature var_bytes
//! ```
//!
//! The signed payload is the same encoding with an empty signature field.
//! Certificates bind a subject name to a secp256k1 key and are signed by
//! their issuer; the chain runs from the signing (leaf) certificate up to one
//! issued by a trust anchor. A request without certificates is only ever
//! reported as [`RecipientIdentity::Unverified`].

use crate::builder::PaymentOutput;
use crate::encoding::{write_compact_size, write_var_bytes, Reader};
use crate::hash::sha256d;
use crate::script::Script;
use crate::{Error, Result};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, VerifyOnly};
use spv_params::NetworkType;
use std::collections::HashSet;

/// Wire magic
pub const REQUEST_MAGIC: &[u8; 4] = b"SPR1";

/// Current wire version
pub const REQUEST_VERSION: u8 = 1;

/// Longest certificate chain accepted
pub const MAX_CHAIN_LENGTH: usize = 8;

/// Domain separator for certificate signatures
const CERT_DOMAIN: &[u8] = b"SPR1 certificate";

/// Why a payment request was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    /// Expiry time has passed
    #[error("request expired")]
    Expired,
    /// Wire data does not start with the request magic
    #[error("not a payment request")]
    BadMagic,
    /// Unknown wire version
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    /// Request is for another network
    #[error("request is for network {found}, wallet is on {expected}")]
    WrongNetwork {
        /// Wallet network
        expected: NetworkType,
        /// Network named in the request
        found: String,
    },
    /// Wire data could not be decoded
    #[error("malformed request: {0}")]
    Malformed(String),
    /// No outputs to pay
    #[error("request has no outputs")]
    NoOutputs,
    /// Output amount is zero or the total overflows
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    /// Signature present without a certificate to check it against
    #[error("signature without certificate")]
    MissingCertificate,
    /// Certificates present but the request is not signed
    #[error("certificate without signature")]
    MissingSignature,
    /// Request signature does not verify against the leaf certificate
    #[error("request signature does not verify")]
    BadSignature,
    /// A certificate's issuer signature does not verify
    #[error("certificate for {0} has an invalid signature")]
    BadCertificateSignature(String),
    /// A certificate is outside its validity window
    #[error("certificate for {0} is not valid at this time")]
    CertificateNotValid(String),
    /// Issuer of one certificate is not the key of the next
    #[error("certificate chain is broken at {0}")]
    BrokenChain(String),
    /// Chain is longer than accepted
    #[error("certificate chain longer than {}", MAX_CHAIN_LENGTH)]
    ChainTooLong,
    /// Chain does not end at a trust anchor
    #[error("certificate chain does not end at a trusted issuer")]
    UntrustedRoot,
}

impl From<InvalidReason> for Error {
    fn from(reason: InvalidReason) -> Self {
        Error::RequestInvalid(reason)
    }
}

fn network_tag(network: NetworkType) -> u8 {
    match network {
        NetworkType::Mainnet => 0,
        NetworkType::Testnet => 1,
        NetworkType::Regtest => 2,
    }
}

fn network_from_tag(tag: u8) -> std::result::Result<NetworkType, InvalidReason> {
    match tag {
        0 => Ok(NetworkType::Mainnet),
        1 => Ok(NetworkType::Testnet),
        2 => Ok(NetworkType::Regtest),
        other => Err(InvalidReason::Malformed(format!("unknown network tag {other}"))),
    }
}

fn sign_digest(secret: &SecretKey, digest: &[u8; 32]) -> Result<Vec<u8>> {
    let secp = Secp256k1::signing_only();
    let mut sig = secp.sign_ecdsa(&Message::from_slice(digest)?, secret);
    sig.normalize_s();
    Ok(sig.serialize_der().to_vec())
}

fn read_public_key(reader: &mut Reader<'_>) -> Result<PublicKey> {
    let bytes: [u8; 33] = reader.read_array()?;
    Ok(PublicKey::from_slice(&bytes)?)
}

/// Certificate binding a subject to a key, signed by an issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Subject name shown to the payer
    pub subject: String,
    /// Subject key
    pub public_key: PublicKey,
    /// Start of validity (unix seconds)
    pub not_before: u64,
    /// End of validity (unix seconds)
    pub not_after: u64,
    /// Key of the issuer
    pub issuer_key: PublicKey,
    /// Issuer's DER signature over the certificate body
    pub signature: Vec<u8>,
}

impl Certificate {
    /// Issue a certificate for `subject` signed by `issuer`
    pub fn issue(
        subject: impl Into<String>,
        public_key: PublicKey,
        not_before: u64,
        not_after: u64,
        issuer: &SecretKey,
    ) -> Result<Self> {
        let issuer_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), issuer);
        let mut cert = Self {
            subject: subject.into(),
            public_key,
            not_before,
            not_after,
            issuer_key,
            signature: Vec::new(),
        };
        cert.signature = sign_digest(issuer, &cert.body_digest())?;
        Ok(cert)
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        write_var_bytes(out, self.subject.as_bytes());
        out.extend_from_slice(&self.public_key.serialize());
        out.extend_from_slice(&self.not_before.to_le_bytes());
        out.extend_from_slice(&self.not_after.to_le_bytes());
        out.extend_from_slice(&self.issuer_key.serialize());
    }

    fn body_digest(&self) -> [u8; 32] {
        let mut data = CERT_DOMAIN.to_vec();
        self.write_body(&mut data);
        sha256d(&data)
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.write_body(out);
        write_var_bytes(out, &self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let subject = String::from_utf8(reader.read_var_bytes()?.to_vec())
            .map_err(|_| Error::Decode("certificate subject is not UTF-8".to_string()))?;
        let public_key = read_public_key(reader)?;
        let not_before = reader.read_u64()?;
        let not_after = reader.read_u64()?;
        let issuer_key = read_public_key(reader)?;
        let signature = reader.read_var_bytes()?.to_vec();
        Ok(Self {
            subject,
            public_key,
            not_before,
            not_after,
            issuer_key,
            signature,
        })
    }

    fn is_valid_at(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// One requested output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutput {
    /// Amount in base units
    pub amount: u64,
    /// Locking script to pay
    pub script: Script,
}

/// A payment request as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Network the request is for
    pub network: NetworkType,
    /// Outputs to pay
    pub outputs: Vec<RequestOutput>,
    /// Free-form memo
    pub memo: String,
    /// Creation time (unix seconds)
    pub created: u64,
    /// Expiry time (unix seconds), 0 for none
    pub expires: u64,
    /// Leaf first
    pub certificates: Vec<Certificate>,
    /// DER signature by the leaf key over the signed payload
    pub signature: Vec<u8>,
}

impl PaymentRequest {
    /// Unsigned request
    pub fn new(network: NetworkType, outputs: Vec<RequestOutput>, created: u64, expires: u64) -> Self {
        Self {
            network,
            outputs,
            memo: String::new(),
            created,
            expires,
            certificates: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// Attach a memo
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    /// Sign with the leaf key of `chain` (leaf first)
    pub fn sign(mut self, leaf: &SecretKey, chain: Vec<Certificate>) -> Result<Self> {
        self.certificates = chain;
        self.signature = Vec::new();
        self.signature = sign_digest(leaf, &self.signing_digest())?;
        Ok(self)
    }

    /// Whether a certificate chain is attached
    pub fn is_signed(&self) -> bool {
        !self.certificates.is_empty()
    }

    fn write(&self, out: &mut Vec<u8>, with_signature: bool) {
        out.extend_from_slice(REQUEST_MAGIC);
        out.push(REQUEST_VERSION);
        out.push(network_tag(self.network));
        write_compact_size(out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.amount.to_le_bytes());
            write_var_bytes(out, output.script.as_bytes());
        }
        write_var_bytes(out, self.memo.as_bytes());
        out.extend_from_slice(&self.created.to_le_bytes());
        out.extend_from_slice(&self.expires.to_le_bytes());
        write_compact_size(out, self.certificates.len() as u64);
        for cert in &self.certificates {
            cert.write(out);
        }
        if with_signature {
            write_var_bytes(out, &self.signature);
        } else {
            write_var_bytes(out, &[]);
        }
    }

    /// Wire encoding
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out, true);
        out
    }

    /// Bytes covered by the signature
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out, false);
        out
    }

    fn signing_digest(&self) -> [u8; 32] {
        sha256d(&self.signing_payload())
    }

    /// Decode from the wire format
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, InvalidReason> {
        if bytes.len() < 6 || &bytes[..4] != REQUEST_MAGIC {
            return Err(InvalidReason::BadMagic);
        }
        if bytes[4] != REQUEST_VERSION {
            return Err(InvalidReason::UnsupportedVersion(bytes[4]));
        }
        let network = network_from_tag(bytes[5])?;
        Self::read_body(network, &bytes[6..]).map_err(|e| InvalidReason::Malformed(e.to_string()))
    }

    fn read_body(network: NetworkType, body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);

        let count = reader.read_compact_size()?;
        if count > (reader.remaining() / 9) as u64 {
            return Err(Error::Decode(format!("output count {count} exceeds data")));
        }
        let mut outputs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let amount = reader.read_u64()?;
            let script = Script::from_bytes(reader.read_var_bytes()?.to_vec());
            outputs.push(RequestOutput { amount, script });
        }

        let memo = String::from_utf8(reader.read_var_bytes()?.to_vec())
            .map_err(|_| Error::Decode("memo is not UTF-8".to_string()))?;
        let created = reader.read_u64()?;
        let expires = reader.read_u64()?;

        let cert_count = reader.read_compact_size()?;
        if cert_count > MAX_CHAIN_LENGTH as u64 {
            return Err(Error::Decode(format!("{cert_count} certificates")));
        }
        let mut certificates = Vec::with_capacity(cert_count as usize);
        for _ in 0..cert_count {
            certificates.push(Certificate::read(&mut reader)?);
        }

        let signature = reader.read_var_bytes()?.to_vec();
        reader.finish()?;

        Ok(Self {
            network,
            outputs,
            memo,
            created,
            expires,
            certificates,
            signature,
        })
    }
}

/// Who the payer is paying, as far as the request proves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientIdentity {
    /// Chain verified to a trust anchor; `subject` is the leaf subject
    Verified {
        /// Leaf certificate subject
        subject: String,
    },
    /// No certificate attached
    Unverified,
}

impl RecipientIdentity {
    /// Whether the recipient was authenticated
    pub fn is_verified(&self) -> bool {
        matches!(self, RecipientIdentity::Verified { .. })
    }
}

/// A request that passed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    outputs: Vec<PaymentOutput>,
    total: u64,
    memo: String,
    expires: u64,
    recipient: RecipientIdentity,
}

impl VerifiedRequest {
    /// Outputs to hand to the transaction builder
    pub fn outputs(&self) -> &[PaymentOutput] {
        &self.outputs
    }

    /// Sum of requested amounts
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Memo
    pub fn memo(&self) -> &str {
        &self.memo
    }

    /// Expiry (unix seconds), 0 for none
    pub fn expires(&self) -> u64 {
        self.expires
    }

    /// Recipient identity
    pub fn recipient(&self) -> &RecipientIdentity {
        &self.recipient
    }
}

/// Set of trusted issuer keys
#[derive(Debug, Clone, Default)]
pub struct TrustAnchors {
    keys: HashSet<PublicKey>,
}

impl TrustAnchors {
    /// Empty set: every signed request fails with an untrusted root
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key` as a root issuer
    pub fn add(&mut self, key: PublicKey) {
        self.keys.insert(key);
    }

    /// Parse hex-encoded compressed keys
    pub fn from_hex<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        let mut anchors = Self::new();
        for key in keys {
            let bytes = hex::decode(key.as_ref())
                .map_err(|e| Error::InvalidKey(format!("trust anchor hex: {e}")))?;
            anchors.add(PublicKey::from_slice(&bytes)?);
        }
        Ok(anchors)
    }

    /// Whether `key` is trusted
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains(key)
    }

    /// Number of anchors
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no anchors are configured
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Validates payment requests against a network and trust anchors
pub struct PaymentRequestVerifier {
    network: NetworkType,
    anchors: TrustAnchors,
    secp: Secp256k1<VerifyOnly>,
}

impl PaymentRequestVerifier {
    /// Verifier for `network` trusting `anchors`
    pub fn new(network: NetworkType, anchors: TrustAnchors) -> Self {
        Self {
            network,
            anchors,
            secp: Secp256k1::verification_only(),
        }
    }

    /// Decode and verify wire bytes at the current time
    pub fn verify_bytes(&self, bytes: &[u8]) -> Result<VerifiedRequest> {
        let request = PaymentRequest::decode(bytes)?;
        self.verify(&request, chrono::Utc::now().timestamp().max(0) as u64)
    }

    /// Verify `request` as of `now` (unix seconds)
    pub fn verify(&self, request: &PaymentRequest, now: u64) -> Result<VerifiedRequest> {
        let result = self.check(request, now);
        match &result {
            Ok(verified) => tracing::info!(
                "Payment request accepted: total={}, recipient={:?}",
                verified.total,
                verified.recipient
            ),
            Err(reason) => tracing::warn!("Payment request rejected: {}", reason),
        }
        result.map_err(Error::RequestInvalid)
    }

    fn check(&self, request: &PaymentRequest, now: u64) -> std::result::Result<VerifiedRequest, InvalidReason> {
        if request.network != self.network {
            return Err(InvalidReason::WrongNetwork {
                expected: self.network,
                found: request.network.to_string(),
            });
        }
        if request.expires != 0 && now >= request.expires {
            return Err(InvalidReason::Expired);
        }
        if request.outputs.is_empty() {
            return Err(InvalidReason::NoOutputs);
        }

        let mut total = 0u64;
        let mut outputs = Vec::with_capacity(request.outputs.len());
        for output in &request.outputs {
            if output.amount == 0 {
                return Err(InvalidReason::InvalidAmount("zero amount".to_string()));
            }
            total = total
                .checked_add(output.amount)
                .ok_or_else(|| InvalidReason::InvalidAmount("total overflows".to_string()))?;
            outputs.push(PaymentOutput {
                script_pubkey: output.script.clone(),
                amount: output.amount,
            });
        }

        let recipient = if request.certificates.is_empty() {
            if !request.signature.is_empty() {
                return Err(InvalidReason::MissingCertificate);
            }
            RecipientIdentity::Unverified
        } else {
            self.check_signature(request)?;
            self.check_chain(&request.certificates, now)?;
            RecipientIdentity::Verified {
                subject: request.certificates[0].subject.clone(),
            }
        };

        Ok(VerifiedRequest {
            outputs,
            total,
            memo: request.memo.clone(),
            expires: request.expires,
            recipient,
        })
    }

    fn verify_der(&self, digest: &[u8; 32], der: &[u8], key: &PublicKey) -> bool {
        match (Message::from_slice(digest), Signature::from_der(der)) {
            (Ok(msg), Ok(sig)) => self.secp.verify_ecdsa(&msg, &sig, key).is_ok(),
            _ => false,
        }
    }

    fn check_signature(&self, request: &PaymentRequest) -> std::result::Result<(), InvalidReason> {
        if request.signature.is_empty() {
            return Err(InvalidReason::MissingSignature);
        }
        let leaf = &request.certificates[0];
        if self.verify_der(&request.signing_digest(), &request.signature, &leaf.public_key) {
            Ok(())
        } else {
            Err(InvalidReason::BadSignature)
        }
    }

    fn check_chain(&self, chain: &[Certificate], now: u64) -> std::result::Result<(), InvalidReason> {
        if chain.len() > MAX_CHAIN_LENGTH {
            return Err(InvalidReason::ChainTooLong);
        }
        for (i, cert) in chain.iter().enumerate() {
            if !cert.is_valid_at(now) {
                return Err(InvalidReason::CertificateNotValid(cert.subject.clone()));
            }
            if !self.verify_der(&cert.body_digest(), &cert.signature, &cert.issuer_key) {
                return Err(InvalidReason::BadCertificateSignature(cert.subject.clone()));
            }
            if let Some(parent) = chain.get(i + 1) {
                if parent.public_key != cert.issuer_key {
                    return Err(InvalidReason::BrokenChain(cert.subject.clone()));
                }
            }
        }
        match chain.last() {
            Some(root) if self.anchors.contains(&root.issuer_key) => Ok(()),
            _ => Err(InvalidReason::UntrustedRoot),
        }
    }
}
