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


//! # UTXO Incubator
//!
//! Takes the time-locked outputs left behind by a force-closed payment
//! channel and shepherds each one through a durable state machine until its
//! funds are swept back into the operator's wallet. Outputs that would cost
//! more to sweep than they are worth are diverted to a stray output pool so
//! they can be batched once the fee environment improves.
//!

// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

extern crate bitcoin;
extern crate byteorder;
extern crate jsonrpc;
extern crate serde;
#[macro_use] extern crate serde_derive;
extern crate serde_json;
extern crate sled;

#[cfg(test)] extern crate tempfile;
#[cfg(test)] extern crate toml;
#[cfg(test)] #[macro_use] extern crate hex_literal;

#[macro_use] pub extern crate incubator_logs as logs;
pub extern crate incubator_common as common;

pub mod chain;
pub mod channeldb;
pub mod config;
pub mod notifier;
pub mod nursery;
pub mod rpc;
pub mod straypool;
pub mod wallet;

pub use common::BlockHeight;
