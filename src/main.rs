// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use aquila::acct::AcctRegistry;
use aquila::bot::{
    DiskTradeBotStore, MemoryLedger, MemoryTradeBotStore, TradeBot, TradeBotStore,
};
use aquila::foreign::electrum::ElectrumClient;
use aquila::foreign::{
    BitcoinAdapter, ForeignBlockchainAdapter, ForeignChain, LitecoinAdapter,
};
use aquila::node::*;
use aquila::settings::SETTINGS;

use chrono::prelude::*;
use log::*;
use mimalloc::MiMalloc;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tarpc::server::{self, Channel};
use tokio::runtime::Builder;
use tokio::time::sleep;

#[cfg(not(windows))]
use signal_hook::consts::TERM_SIGNALS;
#[cfg(not(windows))]
use signal_hook::flag;

use warp::Filter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    STARTUP_TIME.store(Utc::now().timestamp(), Ordering::Relaxed);

    #[cfg(not(windows))]
    for sig in TERM_SIGNALS {
        // When terminated by a second term signal, exit with exit code 1.
        // This will do nothing the first time (because term_now is false).
        flag::register_conditional_shutdown(*sig, 1, EXIT_SIGNAL.clone())?;
        // But this will "arm" the above for the second time, by setting it to true.
        // The order of registering these is important, if you put this one first, it will
        // first arm and then terminate ‒ all in the first round.
        flag::register(*sig, EXIT_SIGNAL.clone())?;
    }

    run_init()
}

fn run_init() -> anyhow::Result<()> {
    thread::spawn(start_runtime);

    // This loop runs forever, and blocks until the exit signal is received
    loop {
        if EXIT_SIGNAL.load(Ordering::Relaxed) {
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    info!("Aquila Core shut down");
    Ok(())
}

fn start_runtime() -> anyhow::Result<()> {
    let worker_threads = if SETTINGS.node.network_threads == 0 {
        num_cpus::get()
    } else {
        SETTINGS.node.network_threads as usize
    };

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_io()
        .enable_time()
        .build()
        .unwrap();

    runtime.block_on(async {
        info!(
            "Running Aquila Core v{} on {}",
            env!("CARGO_PKG_VERSION"),
            SETTINGS.node.network_name
        );

        let foreign_timeout = Duration::from_secs(SETTINGS.tradebot.foreign_timeout_secs as u64);
        let mut adapters: HashMap<ForeignChain, Arc<dyn ForeignBlockchainAdapter>> =
            HashMap::new();

        if let Some(server) = SETTINGS.tradebot.electrum_servers_bitcoin.first() {
            let client = Arc::new(ElectrumClient::new(server.clone(), foreign_timeout));
            adapters.insert(
                ForeignChain::Bitcoin,
                Arc::new(BitcoinAdapter::new(client, foreign_timeout)),
            );
        }

        if let Some(server) = SETTINGS.tradebot.electrum_servers_litecoin.first() {
            let client = Arc::new(ElectrumClient::new(server.clone(), foreign_timeout));
            adapters.insert(
                ForeignChain::Litecoin,
                Arc::new(LitecoinAdapter::new(client, foreign_timeout)),
            );
        }

        let store: Arc<dyn TradeBotStore> = if SETTINGS.node.memory_only {
            Arc::new(MemoryTradeBotStore::new())
        } else {
            let mut path = std::path::PathBuf::from(&SETTINGS.node.data_dir);
            path.push(&SETTINGS.node.network_name);
            path.push("tradebot");
            match DiskTradeBotStore::open(&path) {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    error!("could not open the trade bot store: {err:?}");
                    EXIT_SIGNAL.store(true, Ordering::Relaxed);
                    return;
                }
            }
        };

        // The chain subsystem serves the ledger view in a full deployment;
        // devnet runs against an in-process one.
        let ledger = Arc::new(MemoryLedger::new());
        let registry = Arc::new(AcctRegistry::new());

        for (hash, acct) in registry.iter() {
            debug!(
                "registered ACCT {:?} v{} with code hash {}",
                acct.foreign_chain(),
                acct.version(),
                hex::encode(hash.as_bytes())
            );
        }

        let trade_bot = Arc::new(TradeBot::new(
            registry.clone(),
            ledger.clone(),
            store.clone(),
            adapters.clone(),
            Duration::from_secs(SETTINGS.tradebot.poll_interval_secs as u64),
            SETTINGS.tradebot.foreign_fee_rate as u64,
        ));
        tokio::spawn(trade_bot.clone().run(EXIT_SIGNAL.clone()));

        #[cfg(feature = "rpc")]
        {
            if SETTINGS.network.rpc_enabled {
                let ctx = Arc::new(NodeCtx {
                    registry,
                    ledger,
                    store,
                    adapters,
                    trade_bot,
                });

                // Create transports
                let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
                let server = server::BaseChannel::with_defaults(server_transport);
                let client = RpcServerDefinitionClient::new(
                    tarpc::client::Config::default(),
                    client_transport,
                )
                .spawn();

                // Schedule rpc server
                tokio::spawn(server.execute(RpcServer { ctx }.serve()));

                // Set up http route
                let client_filter = warp::any().map(move || client.clone());
                let rpc_path = warp::post()
                    .and(warp::path::end())
                    .and(json_body())
                    .and(client_filter.clone())
                    .and(warp::header("authorization"))
                    .and_then(handle_rpc_request);

                let port = match SETTINGS.node.network_name.as_str() {
                    "mainnet" => SETTINGS.network.rpc_listen_port_mainnet,
                    "testnet" => SETTINGS.network.rpc_listen_port_testnet,
                    "devnet" => SETTINGS.network.rpc_listen_port_devnet,
                    other => panic!("Invalid network name: {other}"),
                };

                info!(
                    "Aquila Core v{} RPC Listening on port {}",
                    env!("CARGO_PKG_VERSION"),
                    port
                );

                warp::serve(rpc_path).run(([127, 0, 0, 1], port)).await;
            } else {
                loop {
                    sleep(Duration::from_secs(1)).await;

                    if EXIT_SIGNAL.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }

        #[cfg(not(feature = "rpc"))]
        loop {
            sleep(Duration::from_secs(1)).await;

            if EXIT_SIGNAL.load(Ordering::Relaxed) {
                break;
            }
        }
    });

    Ok(())
}
