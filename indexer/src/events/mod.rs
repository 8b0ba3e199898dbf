//! Vault event model.
//!
//! This module defines the typed events emitted by the hub contract and
//! decodes them from raw logs.
//!
//! # Components
//!
//! - [`types`]: EventKind, VaultEvent, ChainEvent, FetchedLog, EventRecord
//! - [`decode`]: Raw log decoding and amount helpers

pub mod decode;
pub mod types;

pub use decode::{decode_log, malformed_log, scale_down, u256_to_decimal};
pub use types::{ChainEvent, EventKind, EventRecord, FetchedLog, MalformedLog, VaultEvent};
