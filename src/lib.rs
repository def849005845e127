// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Aquila
//! Official implementation of the Aquila cryptocurrency node.
//!
//! The heart of this crate is the ACCT engine: Automated Cross-Chain Trading
//! Contracts let two parties swap the host asset against a foreign coin
//! (Bitcoin-family chains) without a trusted third party. The engine:
//!
//! * compiles deterministic escrow programs for the on-chain stack machine
//!   ([`acct::EscrowProgramBuilder`]),
//! * encodes and decodes the four fixed-length protocol payloads exchanged
//!   between counterparties and the escrow ([`acct::messages`]),
//! * reconstructs a structured trade snapshot from an escrow program's raw
//!   data segment ([`acct::read_trade_data`]),
//! * recognises deployed swap contracts by exact code hash
//!   ([`acct::AcctRegistry`]),
//! * and drives each local trade to completion through timeouts, reorgs and
//!   counterparty failure ([`bot::TradeBot`]).
//!
//! The generic ledger, the stack-machine interpreter that executes deployed
//! programs, p2p transport and foreign-chain wallets are external
//! collaborators accessed through narrow traits ([`bot::LedgerView`],
//! [`foreign::ForeignBlockchainAdapter`]).

#![allow(dead_code, unused)]

pub mod acct;
pub mod bot;
pub mod codec;
pub mod foreign;
pub mod node;
pub mod primitives;
pub mod settings;
