// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::acct::AcctRegistry;
use crate::bot::{LedgerView, TradeBot, TradeBotStore};
use crate::foreign::{ForeignBlockchainAdapter, ForeignChain};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::Arc;

pub use rpc::*;

lazy_static! {
    /// Flipped by signal handlers and the rpc `stop` call.
    pub static ref EXIT_SIGNAL: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// Epoch seconds the node came up, for `uptime`.
pub static STARTUP_TIME: AtomicI64 = AtomicI64::new(0);

/// Shared handles the rpc surface dispatches into. Constructed once at
/// startup and injected; no component reaches for a global.
pub struct NodeCtx {
    pub registry: Arc<AcctRegistry>,
    pub ledger: Arc<dyn LedgerView>,
    pub store: Arc<dyn TradeBotStore>,
    pub adapters: HashMap<ForeignChain, Arc<dyn ForeignBlockchainAdapter>>,
    pub trade_bot: Arc<TradeBot>,
}

mod rpc;
