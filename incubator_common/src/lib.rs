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


//! # Incubator Common
//!
//! Primitive types and tunable constants shared by the incubator crates
//!

// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

extern crate serde;
#[macro_use] extern crate serde_derive;

pub mod constants;

/// A block height on the chain the incubator is watching
pub type BlockHeight = u32;

/// Ambient chain information attached to every log line. Updated by the
/// incubator loop whenever it observes a new block epoch.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct ChainContext {
    /// The incubator's current view of the best block height
    pub best_height: BlockHeight,
}
