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


//! # Channel Database Interface
//!
//! The slice of the node's channel database the incubator consumes: close
//! summaries of force-closed channels, and the ability to mark a channel
//! fully closed once every one of its outputs has been swept.
//!

use std::{error, fmt};

use bitcoin::{Amount, OutPoint};

use common::BlockHeight;

/// Summary of a closed channel.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelCloseSummary {
    /// Funding outpoint of the channel
    pub chan_point: OutPoint,
    /// Height at which the closing transaction confirmed
    pub close_height: BlockHeight,
    /// Our settled balance at close
    pub settled_balance: Amount,
    /// Whether funds of this channel are still being swept
    pub is_pending: bool,
}

/// Channel database error
#[derive(Debug)]
pub enum Error {
    /// No close summary is recorded for the queried channel
    ClosedChannelNotFound,
    /// Backing storage failed
    Storage(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ClosedChannelNotFound => f.write_str("closed channel not found"),
            Error::Storage(ref msg) => write!(f, "channel db storage: {}", msg),
        }
    }
}

/// Access to closed-channel records.
pub trait ChannelDb: Send + Sync {
    /// All closed channels; with `pending_only` set, only those whose funds
    /// are still being swept.
    fn fetch_closed_channels(&self, pending_only: bool)
        -> Result<Vec<ChannelCloseSummary>, Error>;

    /// The close summary for one channel.
    fn fetch_closed_channel(&self, chan_point: &OutPoint)
        -> Result<ChannelCloseSummary, Error>;

    /// Record that every output of the channel has been swept. Calling this
    /// twice for the same channel is a no-op.
    fn mark_chan_fully_closed(&self, chan_point: &OutPoint) -> Result<(), Error>;
}
