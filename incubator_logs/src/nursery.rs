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


//! # Nursery Logs
//!
//! Log codes for the incubator core, the stray output pool and the chain
//! adapters.
//!

use bitcoin::{OutPoint, Txid};

use common::BlockHeight;

/// The incubator finished its startup recovery and entered its main loop.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IncubatorStarted {
    /// Height of the last fully graduated class found on disk
    pub last_graduated_height: BlockHeight,
}

/// The incubator was asked to shut down.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IncubatorShutdown {}

/// A force-closed channel handed its outputs to the incubator.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IncubatingChannel {
    /// Funding outpoint of the force-closed channel
    pub channel: OutPoint,
    /// Whether the commitment to-self output needs incubation
    pub has_commit: bool,
    /// Number of HTLC outputs handed over
    pub num_htlcs: usize,
}

/// A two-stage HTLC had already expired when it was handed over, so its
/// timeout transaction is broadcast immediately.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ImmediateCribSweep {
    /// Outpoint of the stage-one HTLC output
    pub outpoint: OutPoint,
    /// CLTV expiry of the output
    pub expiry: BlockHeight,
}

/// A new class of outputs is being processed at a block height.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GraduatingClass {
    /// The class height
    pub height: BlockHeight,
    /// Number of kindergarten outputs maturing at this height
    pub num_kids: usize,
    /// Number of crib outputs expiring at this height
    pub num_babies: usize,
}

/// A sweep transaction (possibly empty) was finalized for a height.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FinalizedKindergarten {
    /// The class height
    pub height: BlockHeight,
    /// Txid of the finalized sweep, absent when the class had no
    /// sweepable outputs
    pub txid: Option<Txid>,
}

/// Processing a class at some height failed; the incubator stays alive and
/// will retry on restart.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ClassGraduationFailed {
    /// The class height
    pub height: BlockHeight,
    /// Error that was encountered
    pub error: String,
}

/// A finalized sweep transaction was handed to the broadcast endpoint.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SweepBroadcast {
    /// Txid of the sweep transaction
    pub txid: Txid,
    /// Number of kindergarten outputs it spends
    pub num_outputs: usize,
    /// The class height it sweeps
    pub height: BlockHeight,
}

/// A pre-signed HTLC timeout transaction was handed to the broadcast
/// endpoint.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TimeoutTxBroadcast {
    /// Txid of the timeout transaction
    pub txid: Txid,
    /// The stage-one output it spends
    pub outpoint: OutPoint,
}

/// The broadcast endpoint reported the transaction as a double spend,
/// meaning a previous broadcast already made it out.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DoubleSpendIgnored {
    /// Txid of the transaction
    pub txid: Txid,
}

/// A confirmation watch was registered with the chain notifier.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RegisteredConfWatch {
    /// Watched txid
    pub txid: Txid,
    /// Height hint given to the notifier
    pub height_hint: BlockHeight,
}

/// An output moved from preschool or crib into kindergarten.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct OutputPromoted {
    /// The promoted output
    pub outpoint: OutPoint,
    /// Height at which it will be swept
    pub maturity_height: BlockHeight,
}

/// The sweep for a class confirmed and its outputs graduated.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct KindergartenGraduated {
    /// The class height
    pub height: BlockHeight,
    /// Number of outputs that graduated
    pub num_outputs: usize,
}

/// Every output of a channel graduated; its nursery records were removed.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChannelRemoved {
    /// Funding outpoint of the channel
    pub channel: OutPoint,
}

/// A preschool output's channel has no close summary on disk, so no height
/// hint is available for its confirmation watch.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChannelCloseSummaryMissing {
    /// Funding outpoint of the channel
    pub channel: OutPoint,
}

/// Startup found block heights that were mined while the incubator was
/// offline and replays them in order.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReplayingMissedBlocks {
    /// First height to replay
    pub from: BlockHeight,
    /// Chain tip at startup
    pub to: BlockHeight,
}

/// Startup found an already-graduated height with outputs still awaiting
/// confirmation and re-registers their watches.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RegraduatingHeight {
    /// The class height
    pub height: BlockHeight,
}

/// A notification channel closed unexpectedly; the waiter that owned it
/// exits without advancing its output.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NotifierChannelClosed {
    /// Which waiter observed the closure
    pub waiter: &'static str,
}

/// A kindergarten output was uneconomical at the current fee rate and was
/// diverted to the stray output pool.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StrayInputCut {
    /// The diverted output
    pub outpoint: OutPoint,
    /// Its value in satoshi
    pub amount: u64,
}

/// The stray output pool broadcast a sweep of its buffered outputs.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StraySweepBroadcast {
    /// Txid of the stray sweep
    pub txid: Txid,
    /// Total input value in satoshi
    pub total_amount: u64,
    /// Number of stray outputs spent
    pub num_inputs: usize,
}

/// A fresh fee estimate was obtained.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NewFeeEstimate {
    /// Estimated rate in satoshi per kiloweight
    pub fee_rate_per_kw: u64,
    /// The number of blocks the estimate targets
    pub blocks: BlockHeight,
}

/// The fee estimator could not provide a usable estimate and the fallback
/// rate is used instead.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FeeEstimateUnavailable {
    /// The fallback rate in satoshi per kiloweight
    pub fallback_rate: u64,
    /// Errors reported by the estimator
    pub errors: Vec<String>,
}

/// An RPC request is being sent.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RpcRequest<'a> {
    /// Name of the daemon the request goes to
    pub daemon: &'a str,
    /// RPC method
    pub method: &'a str,
}

/// An RPC response was received.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RpcResponse<'a> {
    /// Name of the daemon the response came from
    pub daemon: &'a str,
    /// RPC method
    pub method: &'a str,
    /// Summary of the result
    pub result: &'a str,
}
