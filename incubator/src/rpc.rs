//UTXO Incubator
//Copyright (C) 2018  The UTXO Incubator Developers

//This program is free software: you can redistribute it and/or modify
//it under the terms of the GNU Affero General Public License as published by
//the Free Software Foundation, either version 3 of the License, or
//(at your option) any later version.

//This program is distributed in the hope that it will be useful,
//but WITHOUT ANY WARRANTY; without even the implied warranty of
//MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//GNU Affero General Public License for more details.

//You should have received a copy of the GNU Affero General Public License
//along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! # RPC
//! Support for interacting with the bitcoind RPC interface, and the
//! implementations of the chain-facing traits on top of it
//!

use std::str::FromStr;
use std::time::Duration;

use bitcoin;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Amount;
use jsonrpc;
use serde;
use serde_json;
use serde_json::value::RawValue;

use chain::{self, BroadcastError, Broadcaster, ChainIo, FeeEstimator, SweepScriptSource};
use common::{constants, BlockHeight};
use wallet::FeeRate;

/// RPC error code from Core: transaction already in chain.
pub const RPC_VERIFY_ALREADY_IN_CHAIN: i32 = -27;
/// RPC error code from Core: transaction rejected by network rules.
pub const RPC_VERIFY_REJECTED: i32 = -26;
/// RPC error code from Core: transaction or block was rejected (missing
/// inputs, already spent).
pub const RPC_VERIFY_ERROR: i32 = -25;

const RPC_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Get information on a Bitcoin tx.
///
/// This is mapped with the getrawtransaction response.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct BitcoinTxInfo {
    /// The full transaction in hex
    pub hex: String,
    /// The txid in hex
    pub txid: bitcoin::Txid,
    /// The hash of the block this transaction appeared in, if any
    #[serde(default)]
    pub blockhash: Option<bitcoin::BlockHash>,
}

/// Header information of a block, mapped with the verbose getblockheader
/// response.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct BlockHeaderInfo {
    /// Height of the block
    pub height: BlockHeight,
    /// Confirmations of the block; -1 when forked off
    pub confirmations: i64,
}

/// Response to `estimatesmartfee`
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct EstimateSmartFeeResponse {
    /// The feerate in BTC per kilo-vbyte.
    #[serde(default, with = "bitcoin::util::amount::serde::as_btc::opt")]
    pub feerate: Option<Amount>,
    /// Errors encountered during processing
    #[serde(default)]
    pub errors: Vec<String>,
    /// The number of blocks which this feerate is targeting
    pub blocks: BlockHeight,
}

/// Bitcoin Core RPC methods used by the incubator.
pub trait BitcoinRpc: Send + Sync {
    /// Convenience method to do a JSONRPC query and deserialize the result
    fn jsonrpc_query<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        args: &[serde_json::Value],
    ) -> Result<T, jsonrpc::Error>;

    /// Get the number of blocks in the best chain.
    fn block_count(&self) -> Result<BlockHeight, jsonrpc::Error> {
        self.jsonrpc_query("getblockcount", &[])
    }

    /// Get the hash of the chain tip.
    fn tip(&self) -> Result<bitcoin::BlockHash, jsonrpc::Error> {
        self.jsonrpc_query("getbestblockhash", &[])
    }

    /// Get the block hash at the given height.
    fn block_at(&self, height: BlockHeight) -> Result<bitcoin::BlockHash, jsonrpc::Error> {
        self.jsonrpc_query("getblockhash", &[height.into()])
    }

    /// Get verbose information on a transaction the node knows about.
    fn tx_info(&self, txid: bitcoin::Txid) -> Result<BitcoinTxInfo, jsonrpc::Error> {
        self.jsonrpc_query("getrawtransaction", &[txid.to_string().into(), true.into()])
    }

    /// Get verbose header information for a block.
    fn block_header_info(&self, hash: bitcoin::BlockHash) -> Result<BlockHeaderInfo, jsonrpc::Error> {
        self.jsonrpc_query("getblockheader", &[hash.to_string().into(), true.into()])
    }

    /// Send a tx to the network.
    fn send_tx(&self, tx: &bitcoin::Transaction) -> Result<bitcoin::Txid, jsonrpc::Error> {
        self.jsonrpc_query("sendrawtransaction", &[serialize_hex(tx).into()])
    }

    /// Ask the node's fee estimator for a rate targeting `confirm_target`
    /// blocks.
    fn estimate_smart_fee(&self, confirm_target: u32) -> Result<EstimateSmartFeeResponse, jsonrpc::Error> {
        self.jsonrpc_query("estimatesmartfee", &[confirm_target.into()])
    }

    /// Get a fresh bech32 receive script from the node's wallet.
    fn new_address_script(&self) -> Result<bitcoin::Script, jsonrpc::Error> {
        let addr: String = self.jsonrpc_query("getnewaddress", &["".into(), "bech32".into()])?;
        let addr = bitcoin::Address::from_str(&addr).map_err(|e| {
            jsonrpc::Error::Json(serde::de::Error::custom(format!("bad address from jsonrpc: {}", e)))
        })?;
        Ok(addr.script_pubkey())
    }
}

/// A Bitcoin Core client.
pub struct Bitcoin {
    /// The underlying jsonrpc client.
    client: jsonrpc::client::Client,
    /// Params to make this type cloneable (url, user, pass);
    params: (String, Option<String>, Option<String>),
}

impl Bitcoin {
    /// Create a client for the bitcoind named in the configuration file.
    pub fn from_config(config: &::config::Configuration) -> Bitcoin {
        Bitcoin::new(
            config.local.bitcoind_rpc_url.clone(),
            Some(config.local.bitcoind_rpc_user.clone()),
            Some(config.local.bitcoind_rpc_pass.clone()),
        )
    }

    /// Create a new Bitcoin Core client.
    pub fn new(url: String, user: Option<String>, pass: Option<String>) -> Bitcoin {
        let mut client_builder = jsonrpc::simple_http::Builder::new()
            .timeout(RPC_TIMEOUT)
            .url(url.as_str())
            .expect("simple_http builder");
        if let Some(u) = user.clone() {
            client_builder = client_builder.auth(u, pass.clone());
        }
        let client = client_builder.build();
        Bitcoin {
            params: (url.clone(), user.clone(), pass.clone()),
            client: jsonrpc::Client::with_transport(client),
        }
    }
}

impl Clone for Bitcoin {
    fn clone(&self) -> Bitcoin {
        Bitcoin::new(self.params.0.clone(), self.params.1.clone(), self.params.2.clone())
    }
}

impl BitcoinRpc for Bitcoin {
    /// Convenience method to do a JSONRPC query and deserialize the result
    fn jsonrpc_query<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        args: &[serde_json::Value],
    ) -> Result<T, jsonrpc::Error> {
        let args_raw: Vec<Box<RawValue>> = args.iter().map(|a| jsonrpc::arg(a)).collect();
        slog!(RpcRequest, daemon: "bitcoin", method: query);
        let request = self.client.build_request(query, &args_raw);
        let response = self.client.send_request(request)?;
        if let Some(ref error) = response.error {
            slog!(RpcResponse, daemon: "bitcoin", method: query,
                result: format!("error: {:?}", error).as_str(),
            );
        } else if let Some(ref result) = response.result {
            slog!(RpcResponse, daemon: "bitcoin", method: query,
                result: format!("{} bytes", result.get().len()).as_str(),
            );
        } else {
            slog!(RpcResponse, daemon: "bitcoin", method: query, result: "null");
        }
        response.result::<T>()
    }
}

impl ChainIo for Bitcoin {
    fn get_best_block(&self) -> Result<(bitcoin::BlockHash, BlockHeight), chain::Error> {
        let height = self.block_count()?;
        let hash = self.block_at(height)?;
        Ok((hash, height))
    }
}

impl Broadcaster for Bitcoin {
    fn publish_transaction(&self, tx: &bitcoin::Transaction) -> Result<(), BroadcastError> {
        match self.send_tx(tx) {
            Ok(_) => Ok(()),
            Err(jsonrpc::Error::Rpc(e)) => {
                if is_double_spend_rpc_error(e.code, &e.message) {
                    Err(BroadcastError::DoubleSpend)
                } else {
                    Err(BroadcastError::Rejected(e.message))
                }
            }
            Err(e) => Err(BroadcastError::Rpc(e)),
        }
    }
}

impl SweepScriptSource for Bitcoin {
    fn gen_sweep_script(&self) -> Result<bitcoin::Script, chain::Error> {
        Ok(self.new_address_script()?)
    }
}

/// Whether a sendrawtransaction error means the transaction (or a conflict
/// of it) is already known to the network.
fn is_double_spend_rpc_error(code: i32, message: &str) -> bool {
    match code {
        RPC_VERIFY_ALREADY_IN_CHAIN => true,
        RPC_VERIFY_ERROR => {
            message.contains("Missing inputs") || message.contains("missingorspent")
        }
        RPC_VERIFY_REJECTED => {
            message.contains("txn-mempool-conflict") || message.contains("already in block chain")
        }
        _ => false,
    }
}

/// Fee estimator over a bitcoind RPC handle, falling back to a fixed rate
/// when the node cannot provide a usable estimate.
pub struct RpcFeeEstimator<R: BitcoinRpc> {
    /// RPC handle estimates come from
    bitcoind: R,
    /// Rate used when estimation fails
    fallback: FeeRate,
}

impl<R: BitcoinRpc> RpcFeeEstimator<R> {
    /// Create a new fee estimator with the given fallback rate.
    pub fn new(bitcoind: R, fallback: FeeRate) -> RpcFeeEstimator<R> {
        RpcFeeEstimator {
            bitcoind: bitcoind,
            fallback: fallback,
        }
    }
}

impl<R: BitcoinRpc> FeeEstimator for RpcFeeEstimator<R> {
    fn estimate_fee_per_kw(&self, conf_target: u32) -> Result<FeeRate, chain::Error> {
        let estimate = self.bitcoind.estimate_smart_fee(conf_target)?;

        let fee_per_kvb = match estimate.feerate {
            Some(feerate) if estimate.blocks <= constants::MAXIMUM_ESTIMATE_BLOCKS => feerate,
            _ => {
                slog!(FeeEstimateUnavailable,
                    fallback_rate: self.fallback.to_sat_per_kw(),
                    errors: estimate.errors,
                );
                return Ok(self.fallback);
            }
        };

        // One virtual kilobyte is four kiloweight.
        let fee_per_kw = FeeRate::from_sat_per_kw(fee_per_kvb.as_sat() / 4);
        slog!(NewFeeEstimate,
            fee_rate_per_kw: fee_per_kw.to_sat_per_kw(),
            blocks: estimate.blocks,
        );
        Ok(fee_per_kw)
    }
}
