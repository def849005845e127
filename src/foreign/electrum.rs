// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Minimal electrum protocol transport.
//!
//! One JSON-RPC request per connection over newline delimited TCP. Wallet
//! logic (input selection, signing) does not live here; this is plumbing for
//! the three queries the adapters need. Every socket operation carries an
//! explicit timeout so a wedged server surfaces as a retryable error.

use super::{ForeignChainErr, ForeignRpcClient};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub struct ElectrumClient {
    server: String,
    timeout: Duration,
}

impl ElectrumClient {
    #[must_use]
    pub fn new(server: String, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    fn request(&self, method: &str, params: Value) -> Result<Value, ForeignChainErr> {
        let addr = self
            .server
            .to_socket_addrs()
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?
            .next()
            .ok_or_else(|| ForeignChainErr::Network("server did not resolve".to_owned()))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?;

        let request = json!({
            "id": 0,
            "method": method,
            "params": params,
        });

        let mut writer = &stream;
        writer
            .write_all(format!("{request}\n").as_bytes())
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?;

        let mut line = String::new();
        BufReader::new(&stream)
            .read_line(&mut line)
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?;

        let response: Value = serde_json::from_str(&line)
            .map_err(|err| ForeignChainErr::Network(err.to_string()))?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(ForeignChainErr::Network(error.to_string()));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| ForeignChainErr::Network("response carried no result".to_owned()))
    }
}

impl ForeignRpcClient for ElectrumClient {
    fn script_hash_balance(&self, script_hash: &[u8; 32]) -> Result<u64, ForeignChainErr> {
        let result = self.request(
            "blockchain.scripthash.get_balance",
            json!([hex::encode(script_hash)]),
        )?;

        result
            .get("confirmed")
            .and_then(Value::as_u64)
            .ok_or_else(|| ForeignChainErr::Network("malformed balance response".to_owned()))
    }

    fn broadcast_raw(&self, tx: &[u8]) -> Result<String, ForeignChainErr> {
        let result = self.request(
            "blockchain.transaction.broadcast",
            json!([hex::encode(tx)]),
        )?;

        result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ForeignChainErr::Network("malformed broadcast response".to_owned()))
    }

    fn tip_height(&self) -> Result<u64, ForeignChainErr> {
        let result = self.request("blockchain.headers.subscribe", json!([]))?;

        result
            .get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| ForeignChainErr::Network("malformed tip response".to_owned()))
    }
}
