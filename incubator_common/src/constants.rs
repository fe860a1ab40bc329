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


//! # Constants
//!
//! Tunable parameters. These are compile-time defaults; the ones that make
//! sense to override at runtime are mirrored in the configuration file.
//!

/// Confirmation target, in blocks, used when asking the fee estimator for a
/// sweep fee rate.
pub const SWEEP_CONF_TARGET: u32 = 6;

/// Default number of confirmations before the incubator considers a watched
/// transaction final.
pub const DEFAULT_CONF_DEPTH: u32 = 3;

/// Hard ceiling on the weight of an assembled sweep transaction.
pub const MAXIMUM_SWEEP_TX_WEIGHT: usize = 400_000;

/// Fee rate, in satoshi per kiloweight, used when the estimator cannot
/// provide one.
pub const FALLBACK_FEE_RATE: u64 = 12_500;

/// Fee estimates targeting more blocks than this are treated as unavailable.
pub const MAXIMUM_ESTIMATE_BLOCKS: u32 = 25;

/// How often the polling notifier asks bitcoind for the chain tip.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// How long a waiter sleeps between checks of the shutdown flag while its
/// notification channel is quiet.
pub const WAITER_POLL_INTERVAL_MS: u64 = 250;
