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


//! # Nursery Store
//!
//! Durable index over incubating outputs, keyed by
//! `(state, height, channel, outpoint)`. One sled tree holds the whole
//! nursery; the bucket hierarchy is flattened into key prefixes:
//!
//! ```text
//! chan/<chan-point><state><outpoint>              -> serialized Kid or Baby
//! hght/<height BE><chan-point><state><outpoint>   -> ()
//! ftxn/<height BE>                                -> serialized sweep tx
//! meta/last-graduated-height                      -> u32 BE
//! meta/last-finalized-height                      -> u32 BE
//! ```
//!
//! Every output of a channel, in whatever state, lives under a single
//! `chan/<chan-point>` range. The height index carries pointers only; the
//! record itself always sits in the channel range.
//!
//! Each mutator runs inside one sled transaction, so partial transitions
//! are never observable. Range scans feeding a transaction are collected
//! beforehand; the incubator's single-writer mutex keeps them consistent.
//!

use std::{error, fmt};
use std::io::Cursor;

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::{OutPoint, Transaction};
use sled;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use common::BlockHeight;
use nursery::output::{BabyOutput, KidOutput};
use wallet::{self, SpendableOutput};

/// Name of the tree holding the nursery.
const NURSERY_TREE: &[u8] = b"utxo-nursery";

const CHAN_PREFIX: &[u8; 5] = b"chan/";
const HEIGHT_PREFIX: &[u8; 5] = b"hght/";
const FINAL_TX_PREFIX: &[u8; 5] = b"ftxn/";

const LAST_GRADUATED_KEY: &[u8] = b"meta/last-graduated-height";
const LAST_FINALIZED_KEY: &[u8] = b"meta/last-finalized-height";

/// The state an output is in. Every persisted output is in exactly one
/// state at any time.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum StateBucket {
    /// Two-stage outputs awaiting their CLTV expiry
    Crib,
    /// Outputs awaiting confirmation of their parent transaction
    Pscl,
    /// Outputs with a known maturity height, awaiting their sweep
    Kndr,
    /// Outputs swept into the wallet
    Grad,
}

impl StateBucket {
    fn tag(self) -> &'static [u8; 4] {
        match self {
            StateBucket::Crib => b"crib",
            StateBucket::Pscl => b"pscl",
            StateBucket::Kndr => b"kndr",
            StateBucket::Grad => b"grad",
        }
    }

    fn from_tag(tag: &[u8]) -> Result<StateBucket, Error> {
        match tag {
            b"crib" => Ok(StateBucket::Crib),
            b"pscl" => Ok(StateBucket::Pscl),
            b"kndr" => Ok(StateBucket::Kndr),
            b"grad" => Ok(StateBucket::Grad),
            x => Err(Error::Corrupt(format!("unknown state tag {:?}", x))),
        }
    }
}

impl fmt::Display for StateBucket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Nursery store error
#[derive(Debug)]
pub enum Error {
    /// The queried contract has no records in the nursery
    ContractNotFound,
    /// A height was already finalized with a different transaction
    AlreadyFinalized(BlockHeight),
    /// A CSV output cannot enter kindergarten before its parent confirms
    NotConfirmed(OutPoint),
    /// Underlying database failure
    Database(sled::Error),
    /// A stored record failed to decode
    Codec(wallet::Error),
    /// The key space does not look like a nursery
    Corrupt(String),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::Database(ref x) => Some(x),
            Error::Codec(ref x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ContractNotFound => f.write_str("unable to locate contract"),
            Error::AlreadyFinalized(height) => {
                write!(f, "height {} already has a finalized sweep", height)
            }
            Error::NotConfirmed(ref outpoint) => {
                write!(f, "output {} has no confirmation height", outpoint)
            }
            Error::Database(ref x) => write!(f, "database: {}", x),
            Error::Codec(ref x) => write!(f, "codec: {}", x),
            Error::Corrupt(ref msg) => write!(f, "corrupt nursery: {}", msg),
        }
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Error { Error::Database(e) }
}

impl From<wallet::Error> for Error {
    fn from(e: wallet::Error) -> Error { Error::Codec(e) }
}

impl From<TransactionError<Error>> for Error {
    fn from(e: TransactionError<Error>) -> Error {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Error::Database(e),
        }
    }
}

fn abort(e: Error) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(e)
}

/// Serialize an outpoint into the fixed 36 bytes used inside keys.
fn outpoint_bytes(o: &OutPoint) -> [u8; 36] {
    let mut buf = [0u8; 36];
    {
        let mut cursor = Cursor::new(&mut buf[..]);
        wallet::write_outpoint(&mut cursor, o).expect("outpoint into fixed buffer");
    }
    buf
}

fn chan_key(chan_point: &OutPoint, state: StateBucket, outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + 36 + 4 + 36);
    key.extend_from_slice(CHAN_PREFIX);
    key.extend_from_slice(&outpoint_bytes(chan_point));
    key.extend_from_slice(state.tag());
    key.extend_from_slice(&outpoint_bytes(outpoint));
    key
}

fn chan_range_prefix(chan_point: &OutPoint) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(5 + 36);
    prefix.extend_from_slice(CHAN_PREFIX);
    prefix.extend_from_slice(&outpoint_bytes(chan_point));
    prefix
}

fn height_key(
    height: BlockHeight,
    chan_point: &OutPoint,
    state: StateBucket,
    outpoint: &OutPoint,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + 4 + 36 + 4 + 36);
    key.extend_from_slice(HEIGHT_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(&outpoint_bytes(chan_point));
    key.extend_from_slice(state.tag());
    key.extend_from_slice(&outpoint_bytes(outpoint));
    key
}

fn height_range_prefix(height: BlockHeight) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(5 + 4);
    prefix.extend_from_slice(HEIGHT_PREFIX);
    prefix.extend_from_slice(&height.to_be_bytes());
    prefix
}

fn final_tx_key(height: BlockHeight) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + 4);
    key.extend_from_slice(FINAL_TX_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// A parsed height-index key.
struct HeightEntry {
    height: BlockHeight,
    chan_point: OutPoint,
    state: StateBucket,
    outpoint: OutPoint,
}

impl HeightEntry {
    fn parse(key: &[u8]) -> Result<HeightEntry, Error> {
        if key.len() != 5 + 4 + 36 + 4 + 36 || &key[..5] != HEIGHT_PREFIX {
            return Err(Error::Corrupt(format!("bad height-index key of len {}", key.len())));
        }
        let mut height_be = [0u8; 4];
        height_be.copy_from_slice(&key[5..9]);

        let mut reader = Cursor::new(&key[9..45]);
        let chan_point = wallet::read_outpoint(&mut reader)?;
        let state = StateBucket::from_tag(&key[45..49])?;
        let mut reader = Cursor::new(&key[49..85]);
        let outpoint = wallet::read_outpoint(&mut reader)?;

        Ok(HeightEntry {
            height: u32::from_be_bytes(height_be),
            chan_point: chan_point,
            state: state,
            outpoint: outpoint,
        })
    }

    fn chan_key(&self) -> Vec<u8> {
        chan_key(&self.chan_point, self.state, &self.outpoint)
    }
}

/// Parse the state tag out of a `chan/` key.
fn parse_chan_key_state(key: &[u8]) -> Result<StateBucket, Error> {
    if key.len() != 5 + 36 + 4 + 36 || &key[..5] != CHAN_PREFIX {
        return Err(Error::Corrupt(format!("bad channel key of len {}", key.len())));
    }
    StateBucket::from_tag(&key[41..45])
}

fn encode_kid(kid: &KidOutput) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    kid.encode(&mut buf)?;
    Ok(buf)
}

fn encode_baby(baby: &BabyOutput) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    baby.encode(&mut buf)?;
    Ok(buf)
}

/// The durable nursery index. Cheap to clone; all clones share the same
/// tree. Callers serialize mutations behind the incubator's mutex.
#[derive(Clone)]
pub struct NurseryStore {
    tree: sled::Tree,
}

impl NurseryStore {
    /// Open (or create) the nursery inside the given database.
    pub fn open(db: &sled::Db) -> Result<NurseryStore, Error> {
        Ok(NurseryStore {
            tree: db.open_tree(NURSERY_TREE)?,
        })
    }

    /// Atomically insert babies into the crib (indexed at their expiry)
    /// and kids into preschool.
    pub fn incubate(&self, kids: &[KidOutput], babies: &[BabyOutput]) -> Result<(), Error> {
        let mut inserts: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for kid in kids {
            let key = chan_key(kid.origin_chan_point(), StateBucket::Pscl, kid.outpoint());
            inserts.push((key, encode_kid(kid)?));
        }
        for baby in babies {
            let chan_point = baby.kid().origin_chan_point();
            let key = chan_key(chan_point, StateBucket::Crib, baby.outpoint());
            inserts.push((key, encode_baby(baby)?));
            let index = height_key(baby.expiry(), chan_point, StateBucket::Crib, baby.outpoint());
            inserts.push((index, Vec::new()));
        }

        self.tree.transaction(|tx| {
            for &(ref key, ref value) in &inserts {
                tx.insert(key.as_slice(), value.as_slice())?;
            }
            Ok(())
        }).map_err(|e: TransactionError<Error>| Error::from(e))?;
        self.tree.flush()?;
        Ok(())
    }

    /// Move an output from preschool to kindergarten, indexing it at its
    /// maturity height. The kid must carry its confirmation height.
    pub fn preschool_to_kinder(&self, kid: &KidOutput) -> Result<(), Error> {
        if kid.conf_height() == 0 {
            return Err(Error::NotConfirmed(*kid.outpoint()));
        }
        let maturity = kid.maturity_height();
        let chan_point = kid.origin_chan_point();

        let old_key = chan_key(chan_point, StateBucket::Pscl, kid.outpoint());
        let new_key = chan_key(chan_point, StateBucket::Kndr, kid.outpoint());
        let index_key = height_key(maturity, chan_point, StateBucket::Kndr, kid.outpoint());
        let value = encode_kid(kid)?;

        self.tree.transaction(|tx| {
            if tx.remove(old_key.as_slice())?.is_none() {
                return Err(abort(Error::ContractNotFound));
            }
            tx.insert(new_key.as_slice(), value.as_slice())?;
            tx.insert(index_key.as_slice(), &[][..])?;
            Ok(())
        }).map_err(Error::from)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Move a two-stage output from the crib to kindergarten as its
    /// embedded kid, indexed at confirmation height plus CSV delay.
    pub fn crib_to_kinder(&self, baby: &BabyOutput) -> Result<(), Error> {
        let kid = baby.kid();
        if kid.conf_height() == 0 {
            return Err(Error::NotConfirmed(*kid.outpoint()));
        }
        let chan_point = kid.origin_chan_point();

        let crib_key = chan_key(chan_point, StateBucket::Crib, baby.outpoint());
        let crib_index = height_key(baby.expiry(), chan_point, StateBucket::Crib, baby.outpoint());
        let kndr_key = chan_key(chan_point, StateBucket::Kndr, kid.outpoint());
        let kndr_index =
            height_key(kid.maturity_height(), chan_point, StateBucket::Kndr, kid.outpoint());
        let value = encode_kid(kid)?;

        self.tree.transaction(|tx| {
            if tx.remove(crib_key.as_slice())?.is_none() {
                return Err(abort(Error::ContractNotFound));
            }
            tx.remove(crib_index.as_slice())?;
            tx.insert(kndr_key.as_slice(), value.as_slice())?;
            tx.insert(kndr_index.as_slice(), &[][..])?;
            Ok(())
        }).map_err(Error::from)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Everything maturing at the given height: the finalized sweep
    /// transaction (if one was ever written), the kindergarten outputs and
    /// the crib outputs.
    pub fn fetch_class(&self, height: BlockHeight)
        -> Result<(Option<Transaction>, Vec<KidOutput>, Vec<BabyOutput>), Error>
    {
        let final_tx = match self.tree.get(final_tx_key(height))? {
            Some(raw) => Some(deserialize(&raw).map_err(|e| {
                Error::Corrupt(format!("finalized tx at height {}: {}", height, e))
            })?),
            None => None,
        };

        let mut kids = Vec::new();
        let mut babies = Vec::new();
        for item in self.tree.scan_prefix(height_range_prefix(height)) {
            let (key, _) = item?;
            let entry = HeightEntry::parse(&key)?;
            let record = self.tree.get(entry.chan_key())?.ok_or_else(|| {
                Error::Corrupt(format!(
                    "height index at {} points at missing {} record", height, entry.state,
                ))
            })?;
            match entry.state {
                StateBucket::Kndr => {
                    kids.push(KidOutput::decode(&mut Cursor::new(&record))?);
                }
                StateBucket::Crib => {
                    babies.push(BabyOutput::decode(&mut Cursor::new(&record))?);
                }
                state => {
                    return Err(Error::Corrupt(format!(
                        "height index at {} points into {}", height, state,
                    )));
                }
            }
        }

        Ok((final_tx, kids, babies))
    }

    /// Persist the finalized sweep transaction for a height and advance
    /// `LastFinalizedHeight`. A `None` transaction marks a height with
    /// nothing to sweep. Once a height at or below `LastFinalizedHeight`
    /// holds a transaction, it can never be replaced.
    pub fn finalize_kinder(&self, height: BlockHeight, tx: Option<&Transaction>)
        -> Result<(), Error>
    {
        let last_finalized = self.last_finalized_height()?;
        let key = final_tx_key(height);
        let raw_tx = tx.map(|tx| serialize(tx));
        let new_last = ::std::cmp::max(last_finalized, height).to_be_bytes();

        self.tree.transaction(|txn| {
            if height <= last_finalized && txn.get(key.as_slice())?.is_some() {
                return Err(abort(Error::AlreadyFinalized(height)));
            }
            if let Some(ref raw) = raw_tx {
                txn.insert(key.as_slice(), raw.as_slice())?;
            }
            txn.insert(LAST_FINALIZED_KEY, &new_last[..])?;
            Ok(())
        }).map_err(Error::from)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Rename every kindergarten entry indexed at the given height to
    /// graduated, dropping their height-index pointers.
    pub fn graduate_kinder(&self, height: BlockHeight) -> Result<(), Error> {
        let mut moves: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)> = Vec::new();
        for item in self.tree.scan_prefix(height_range_prefix(height)) {
            let (key, _) = item?;
            let entry = HeightEntry::parse(&key)?;
            if entry.state != StateBucket::Kndr {
                continue;
            }
            let old_key = entry.chan_key();
            let new_key = chan_key(&entry.chan_point, StateBucket::Grad, &entry.outpoint);
            moves.push((key.to_vec(), old_key, new_key));
        }

        self.tree.transaction(|tx| {
            for &(ref index_key, ref old_key, ref new_key) in &moves {
                let record = match tx.remove(old_key.as_slice())? {
                    Some(record) => record,
                    None => return Err(abort(Error::Corrupt(format!(
                        "kindergarten record missing at height {}", height,
                    )))),
                };
                tx.insert(new_key.as_slice(), record)?;
                tx.remove(index_key.as_slice())?;
            }
            Ok(())
        }).map_err(Error::from)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Record that the class at `height` has been processed and drop any
    /// height-index pointers whose output has already left the indexed
    /// bucket. Pointers for outputs still awaiting confirmation survive, so
    /// restart recovery can find them.
    pub fn graduate_height(&self, height: BlockHeight) -> Result<(), Error> {
        let mut dead: Vec<Vec<u8>> = Vec::new();
        for item in self.tree.scan_prefix(height_range_prefix(height)) {
            let (key, _) = item?;
            let entry = HeightEntry::parse(&key)?;
            if self.tree.get(entry.chan_key())?.is_none() {
                dead.push(key.to_vec());
            }
        }

        let last_graduated = self.last_graduated_height()?;
        let new_last = ::std::cmp::max(last_graduated, height).to_be_bytes();

        self.tree.transaction(|tx| {
            tx.insert(LAST_GRADUATED_KEY, &new_last[..])?;
            for key in &dead {
                tx.remove(key.as_slice())?;
            }
            Ok(())
        }).map_err(|e: TransactionError<Error>| Error::from(e))?;
        self.tree.flush()?;
        Ok(())
    }

    /// Ordered list of heights at or below `height` that still carry
    /// height-index entries.
    pub fn heights_below_or_equal(&self, height: BlockHeight)
        -> Result<Vec<BlockHeight>, Error>
    {
        let mut heights = Vec::new();
        for item in self.tree.scan_prefix(&HEIGHT_PREFIX[..]) {
            let (key, _) = item?;
            let entry = HeightEntry::parse(&key)?;
            if entry.height > height {
                break;
            }
            if heights.last() != Some(&entry.height) {
                heights.push(entry.height);
            }
        }
        Ok(heights)
    }

    /// The last height recorded by [graduate_height], zero if none.
    pub fn last_graduated_height(&self) -> Result<BlockHeight, Error> {
        self.read_meta_height(LAST_GRADUATED_KEY)
    }

    /// The last height recorded by [finalize_kinder], zero if none.
    pub fn last_finalized_height(&self) -> Result<BlockHeight, Error> {
        self.read_meta_height(LAST_FINALIZED_KEY)
    }

    fn read_meta_height(&self, key: &[u8]) -> Result<BlockHeight, Error> {
        match self.tree.get(key)? {
            None => Ok(0),
            Some(raw) => {
                if raw.len() != 4 {
                    return Err(Error::Corrupt(format!(
                        "meta height of {} bytes", raw.len(),
                    )));
                }
                let mut be = [0u8; 4];
                be.copy_from_slice(&raw);
                Ok(u32::from_be_bytes(be))
            }
        }
    }

    /// Every preschool output in the nursery.
    pub fn fetch_preschools(&self) -> Result<Vec<KidOutput>, Error> {
        let mut kids = Vec::new();
        for item in self.tree.scan_prefix(&CHAN_PREFIX[..]) {
            let (key, value) = item?;
            if parse_chan_key_state(&key)? == StateBucket::Pscl {
                kids.push(KidOutput::decode(&mut Cursor::new(&value))?);
            }
        }
        Ok(kids)
    }

    /// Whether every output of the channel has graduated. Fails with
    /// [Error::ContractNotFound] when the channel has no records at all.
    pub fn is_mature_channel(&self, chan_point: &OutPoint) -> Result<bool, Error> {
        let mut seen_any = false;
        for item in self.tree.scan_prefix(chan_range_prefix(chan_point)) {
            let (key, _) = item?;
            seen_any = true;
            if parse_chan_key_state(&key)? != StateBucket::Grad {
                return Ok(false);
            }
        }
        if !seen_any {
            return Err(Error::ContractNotFound);
        }
        Ok(true)
    }

    /// Delete every record of the channel. Callers only invoke this once
    /// [is_mature_channel] reports true.
    pub fn remove_channel(&self, chan_point: &OutPoint) -> Result<(), Error> {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for item in self.tree.scan_prefix(chan_range_prefix(chan_point)) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }
        // Sweep out any height pointers of this channel as well.
        for item in self.tree.scan_prefix(&HEIGHT_PREFIX[..]) {
            let (key, _) = item?;
            let entry = HeightEntry::parse(&key)?;
            if entry.chan_point == *chan_point {
                keys.push(key.to_vec());
            }
        }

        self.tree.transaction(|tx| {
            for key in &keys {
                tx.remove(key.as_slice())?;
            }
            Ok(())
        }).map_err(|e: TransactionError<Error>| Error::from(e))?;
        self.tree.flush()?;
        Ok(())
    }

    /// Ordered traversal over every output of a channel, in whatever
    /// state. Fails with [Error::ContractNotFound] when the channel has no
    /// records.
    pub fn for_chan_outputs<F>(&self, chan_point: &OutPoint, mut visitor: F) -> Result<(), Error>
        where F: FnMut(StateBucket, &[u8]) -> Result<(), Error>,
    {
        let mut seen_any = false;
        for item in self.tree.scan_prefix(chan_range_prefix(chan_point)) {
            let (key, value) = item?;
            seen_any = true;
            visitor(parse_chan_key_state(&key)?, &value)?;
        }
        if !seen_any {
            return Err(Error::ContractNotFound);
        }
        Ok(())
    }

    /// Remove a kindergarten output that has been diverted to the stray
    /// output pool, along with its height-index pointer.
    pub fn divert_kinder(&self, kid: &KidOutput) -> Result<(), Error> {
        let chan_point = kid.origin_chan_point();
        let record_key = chan_key(chan_point, StateBucket::Kndr, kid.outpoint());
        let index_key =
            height_key(kid.maturity_height(), chan_point, StateBucket::Kndr, kid.outpoint());

        self.tree.transaction(|tx| {
            if tx.remove(record_key.as_slice())?.is_none() {
                return Err(abort(Error::ContractNotFound));
            }
            tx.remove(index_key.as_slice())?;
            Ok(())
        }).map_err(Error::from)?;
        self.tree.flush()?;
        Ok(())
    }
}
