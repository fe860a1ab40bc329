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


//! # Configuration
//!
//! Configuration file for the incubator
//!

use bitcoin;
use bitcoin::Amount;

use common::constants;
use logs;

/// Local configuration (RPC connection, storage, logging)
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct Local {
    /// Verbosity level of the logging system
    pub log_level: logs::Severity,

    /// http://url:port of the bitcoind RPC
    pub bitcoind_rpc_url: String,
    /// RPC username for bitcoind
    pub bitcoind_rpc_user: String,
    /// RPC password for bitcoind
    pub bitcoind_rpc_pass: String,

    /// Path to the incubator database
    pub db_path: String,

    /// How often (in ms) the notifier polls bitcoind for the chain tip
    pub poll_interval_ms: Option<u64>,
}

/// Nursery configuration (confirmation and fee policy)
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct Nursery {
    /// Number of confirmations before a watched transaction is considered
    /// final
    pub conf_depth: u32,
    /// Confirmation target, in blocks, for sweep fee estimates
    pub sweep_conf_target: Option<u32>,
    /// Fee rate (sat per kiloweight) to use when bitcoind cannot provide one
    #[serde(with = "bitcoin::util::amount::serde::as_sat")]
    pub fallback_fee_rate: Amount,
}

/// Global incubator settings structure
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct Configuration {
    /// Local settings
    pub local: Local,
    /// Nursery settings
    pub nursery: Nursery,
}

impl Configuration {
    /// Check the sanity of the config.
    pub fn sanity_check(&self) -> Result<(), String> {
        if self.nursery.conf_depth == 0 {
            return Err("conf_depth must be at least 1".into());
        }
        if self.nursery.fallback_fee_rate == Amount::ZERO {
            return Err("fallback_fee_rate must be nonzero".into());
        }
        if let Some(0) = self.nursery.sweep_conf_target {
            return Err("sweep_conf_target must be at least 1".into());
        }
        Ok(())
    }

    /// The confirmation target for sweep fee estimates.
    pub fn sweep_conf_target(&self) -> u32 {
        self.nursery.sweep_conf_target.unwrap_or(constants::SWEEP_CONF_TARGET)
    }

    /// The tip poll interval for the notifier, in milliseconds.
    pub fn poll_interval_ms(&self) -> u64 {
        self.local.poll_interval_ms.unwrap_or(constants::DEFAULT_POLL_INTERVAL_MS)
    }
}
