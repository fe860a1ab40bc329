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


//! # Chain Interface
//!
//! The traits through which the incubator observes and acts on the chain:
//! the best-block view, the block-epoch and confirmation notification
//! streams, the fee estimator and the broadcast endpoint. Notification
//! streams are plain `mpsc` receivers; each stream is owned by exactly one
//! waiter and is closed by dropping its sender.
//!

use std::{error, fmt};
use std::sync::mpsc;

use bitcoin::{BlockHash, Script, Transaction, Txid};
use jsonrpc;

use common::BlockHeight;
use wallet::FeeRate;

/// A newly connected block.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BlockEpoch {
    /// Hash of the connected block
    pub hash: BlockHash,
    /// Height of the connected block
    pub height: BlockHeight,
}

/// Delivered once a watched transaction has reached its requested
/// confirmation depth.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TxConfirmation {
    /// Hash of the block the transaction confirmed in
    pub block_hash: BlockHash,
    /// Height of the block the transaction confirmed in
    pub block_height: BlockHeight,
}

/// Chain interface error
#[derive(Debug)]
pub enum Error {
    /// JSONRPC communication
    Rpc(jsonrpc::Error),
    /// The backing notifier has shut down
    NotifierShutdown,
    /// We did not receive a fee estimate but instead a vector of errors.
    NoFeeEstimate(Vec<String>),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::Rpc(ref x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Rpc(ref x) => write!(f, "rpc: {}", x),
            Error::NotifierShutdown => f.write_str("chain notifier has shut down"),
            Error::NoFeeEstimate(ref errors) => {
                write!(f, "no fee estimate available: {}", errors.join(". "))
            }
        }
    }
}

impl From<jsonrpc::Error> for Error {
    fn from(e: jsonrpc::Error) -> Error {
        Error::Rpc(e)
    }
}

/// Broadcast error
#[derive(Debug)]
pub enum BroadcastError {
    /// The transaction spends an input that another confirmed or mempool
    /// transaction already spends. Non-fatal: an earlier broadcast (ours or
    /// someone else's) already made it out.
    DoubleSpend,
    /// JSONRPC communication
    Rpc(jsonrpc::Error),
    /// The endpoint rejected the transaction
    Rejected(String),
}

impl error::Error for BroadcastError {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            BroadcastError::Rpc(ref x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BroadcastError::DoubleSpend => f.write_str("transaction double-spends a watched input"),
            BroadcastError::Rpc(ref x) => write!(f, "rpc: {}", x),
            BroadcastError::Rejected(ref msg) => write!(f, "broadcast rejected: {}", msg),
        }
    }
}

/// Read access to the current chain tip.
pub trait ChainIo: Send + Sync {
    /// The hash and height of the best block.
    fn get_best_block(&self) -> Result<(BlockHash, BlockHeight), Error>;
}

/// Subscription source for block epochs and transaction confirmations.
pub trait ChainNotifier: Send + Sync {
    /// Subscribe to newly connected blocks, delivered in chain order. The
    /// stream is closed when the notifier shuts down.
    fn register_block_epoch_ntfn(&self) -> Result<mpsc::Receiver<BlockEpoch>, Error>;

    /// Ask to be told once `txid` (paying to `pk_script`) has accumulated
    /// `conf_depth` confirmations. `height_hint` bounds how far back the
    /// notifier must scan for the transaction; it should sit below the
    /// earliest height the transaction could have confirmed at, with a
    /// reorg buffer.
    fn register_confirmations_ntfn(
        &self,
        txid: &Txid,
        pk_script: &Script,
        conf_depth: u32,
        height_hint: BlockHeight,
    ) -> Result<mpsc::Receiver<TxConfirmation>, Error>;
}

/// Hands signed transactions to the network.
pub trait Broadcaster: Send + Sync {
    /// Broadcast the transaction. [BroadcastError::DoubleSpend] is returned
    /// when the network already knows a conflicting spend and is treated as
    /// success by callers.
    fn publish_transaction(&self, tx: &Transaction) -> Result<(), BroadcastError>;
}

/// Produces fee-rate estimates.
pub trait FeeEstimator: Send + Sync {
    /// Estimate the fee rate required to confirm within `conf_target`
    /// blocks.
    fn estimate_fee_per_kw(&self, conf_target: u32) -> Result<FeeRate, Error>;
}

/// Generates fresh P2WKH scripts owned by the wallet, used as sweep
/// destinations. Every call returns a previously unused script, which is
/// what makes re-building a sweep for the same class yield a different txid.
pub trait SweepScriptSource: Send + Sync {
    /// A fresh P2WKH script the wallet can spend.
    fn gen_sweep_script(&self) -> Result<Script, Error>;
}
