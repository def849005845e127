// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use config::{Config, ConfigError, File};
use lazy_static::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{metadata, File as FsFile};
use std::io::Write;
use struct_field_names_as_array::FieldNamesAsArray;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap();
}

#[derive(Debug, Serialize, Deserialize, Default, FieldNamesAsArray)]
pub struct Settings {
    /// Network settings.
    pub network: Network,

    /// Node settings.
    pub node: Node,

    /// Trade bot settings.
    pub tradebot: TradeBot,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut config_path = dirs::config_dir().unwrap();
        config_path.push("Aquila");
        config_path.push("config.toml");
        let default_settings = Settings::default();
        if metadata(config_path.clone()).is_err() {
            // Create default configuration
            let settings_str = toml::ser::to_string_pretty(&default_settings).unwrap();

            match FsFile::create(config_path.clone()) {
                Ok(mut file) => {
                    file.write_all(settings_str.as_bytes()).unwrap_or(());
                }
                Err(err) => {
                    // If this fails, do nothing and fall back to environment variables
                    error!("Failed to create configuration! Reason: {:#?}", err);
                }
            }
        }

        let prefix = "aquila";
        let env_source: Vec<_> = std::env::vars().collect();
        let mut s = Config::builder().add_source(
            File::with_name(&config_path.into_os_string().into_string().unwrap()).required(false),
        );

        // Set defaults
        let defaults: HashMap<String, HashMap<String, DynamicConfVal>> =
            serde_yaml::from_value(serde_yaml::to_value(&default_settings).unwrap()).unwrap();
        for (k1, inner) in &defaults {
            for (k2, v) in inner {
                match v {
                    DynamicConfVal::String(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.as_str())?;
                    }

                    DynamicConfVal::Bool(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::U16(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::Sequence(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.clone())?;
                    }

                    DynamicConfVal::Option(v) => {
                        if let Some(v) = v {
                            s = s.set_default(format!("{k1}.{k2}"), v.as_str())?;
                        }
                    }
                }
            }
        }

        // Make sure to list these in order
        let settings_modules: Vec<_> = vec![
            Network::FIELD_NAMES_AS_ARRAY,
            Node::FIELD_NAMES_AS_ARRAY,
            TradeBot::FIELD_NAMES_AS_ARRAY,
        ];

        // Gather all possible settings keys
        let possible_keys: HashMap<String, &str> = Settings::FIELD_NAMES_AS_ARRAY
            .iter()
            .enumerate()
            .flat_map(|(i, field)| {
                settings_modules[i].iter().map(|nested| {
                    (
                        format!(
                            "{}_{}_{}",
                            prefix,
                            field.to_owned(),
                            nested.split('_').collect::<Vec<_>>().join("")
                        ),
                        *nested,
                    )
                })
            })
            .collect();

        // Parse env vars manually and set overrides if they exist as the
        // config package `Environment` module seems to behave poorly.
        for (k, v) in env_source.iter() {
            let k = k.to_lowercase();

            if let Some(k_postfix) = possible_keys.get(&k) {
                let mut k: Vec<_> = k.split('_').filter(|x| x != &prefix).collect();
                *k.last_mut().unwrap() = k_postfix;
                let k = k.join(".");

                // Filter empty values
                if v.as_str() == "" {
                    continue;
                }

                s = s.set_override(k, v.as_str())?;
            }
        }

        s.build()?.try_deserialize()
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Network {
    /// Node listen address.
    #[serde(alias = "listenaddr")]
    pub listen_addr: String,

    /// Enable RPC.
    #[serde(alias = "rpcenabled")]
    pub rpc_enabled: bool,

    /// RPC listen port on mainnet.
    #[serde(alias = "rpclistenportmainnet")]
    pub rpc_listen_port_mainnet: u16,

    /// RPC listen port on testnet.
    #[serde(alias = "rpclistenporttestnet")]
    pub rpc_listen_port_testnet: u16,

    /// RPC listen port on devnet.
    #[serde(alias = "rpclistenportdevnet")]
    pub rpc_listen_port_devnet: u16,

    /// RPC username.
    #[serde(alias = "rpcusername")]
    pub rpc_username: String,

    /// RPC password.
    #[serde(alias = "rpcpassword")]
    pub rpc_password: String,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            listen_addr: "*".to_owned(),
            rpc_enabled: true,
            rpc_listen_port_mainnet: 9067,
            rpc_listen_port_testnet: 9037,
            rpc_listen_port_devnet: 9007,
            rpc_username: "aquila".to_owned(),
            rpc_password: "aquila".to_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Node {
    /// The network name the node is listening on.
    #[serde(alias = "networkname")]
    pub network_name: String,

    /// Node data directory
    #[serde(alias = "datadir")]
    pub data_dir: String,

    /// Number of threads used for network communication and the RPC interface.
    ///
    /// Default is 0 which means the number of cores of the system
    #[serde(alias = "networkthreads")]
    pub network_threads: u16,

    /// If specified, we won't be storing anything to disk.
    #[serde(alias = "memoryonly")]
    pub memory_only: bool,
}

impl Default for Node {
    fn default() -> Self {
        let mut path = dirs::config_dir().unwrap();
        path.push("Aquila");

        Self {
            network_name: "testnet".to_owned(), // Use testnet as default for now
            data_dir: path.into_os_string().into_string().unwrap(),
            network_threads: 0,
            memory_only: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct TradeBot {
    /// Seconds between trade bot polls.
    #[serde(alias = "pollintervalsecs")]
    pub poll_interval_secs: u16,

    /// Deadline for a single foreign chain call, in seconds. Expiry is a
    /// retryable network error, not a permanent failure.
    #[serde(alias = "foreigntimeoutsecs")]
    pub foreign_timeout_secs: u16,

    /// Fee rate used for foreign chain spends, in the chain's smallest unit
    /// per virtual byte.
    #[serde(alias = "foreignfeerate")]
    pub foreign_fee_rate: u16,

    /// Electrum servers for the Bitcoin adapter, tried in order.
    #[serde(alias = "electrumserversbitcoin")]
    pub electrum_servers_bitcoin: Vec<String>,

    /// Electrum servers for the Litecoin adapter, tried in order.
    #[serde(alias = "electrumserverslitecoin")]
    pub electrum_servers_litecoin: Vec<String>,
}

impl Default for TradeBot {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            foreign_timeout_secs: 20,
            foreign_fee_rate: 10,
            electrum_servers_bitcoin: vec!["electrum.blockstream.info:50001".to_owned()],
            electrum_servers_litecoin: vec!["backup.electrum-ltc.org:50001".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DynamicConfVal {
    String(String),
    Sequence(Vec<String>),
    Option(Option<String>),
    Bool(bool),
    U16(u16),
}
