//! SPV wallet core
//!
//! This crate implements the wallet engine's key derivation, address and
//! script types, the transaction wire format, coin selection, transaction
//! building and signing, and payment request verification.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod address_book;
pub mod builder;
pub mod encoding;
pub mod error;
pub mod fees;
pub mod hash;
pub mod keys;
pub mod multisig;
pub mod payment_request;
pub mod script;
pub mod selection;
pub mod transaction;
pub mod utxo;

pub use address::{Address, AddressRole};
pub use address_book::{
    AddressBook, AddressBookState, AddressEntry, AddressId, DEFAULT_CHANGE_GAP_LIMIT,
    DEFAULT_GAP_LIMIT,
};
pub use builder::{
    ChangeOutput, ChangeTarget, PaymentOutput, SignedTransaction, TransactionBuilder,
    UnsignedTransaction,
};
pub use error::{Error, ErrorCategory, Result};
pub use fees::{FeeCalculator, FeePolicy, DEFAULT_FEE_RATE, DUST_THRESHOLD, MAX_FEE, MIN_FEE_RATE};
pub use hash::Hash256;
pub use keys::{DerivationScheme, KeyChain, KeyPair, KeyPath, PathStep};
pub use multisig::{MultisigAccount, PartialTransaction, MAX_COSIGNERS};
pub use payment_request::{
    Certificate, InvalidReason, PaymentRequest, PaymentRequestVerifier, RecipientIdentity,
    RequestOutput, TrustAnchors, VerifiedRequest,
};
pub use script::Script;
pub use selection::{CoinSelector, SelectionResult};
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};
pub use utxo::{Utxo, UtxoStatus};
