//! # ledger-tests
//!
//! Integration tests for the ledger P2P peer.
//!
//! This crate provides:
//! - An in-memory transport and recording reactors
//! - Message fixtures with distinct encodings and an envelope family
//! - Suites for peer lifecycle, inbound dispatch, sending and metrics

pub mod fixtures;
pub mod harness;


#[cfg(test)]
mod dispatch_tests;



pub use fixtures::*;
pub use harness::*;
