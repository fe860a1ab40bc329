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


//! # Stray Output Storage
//!
//! Append-only buffer of outputs that were too small to sweep when their
//! class matured. Entries are keyed by a monotonically assigned u64 so a
//! later sweep claims them in insertion order.
//!

use std::{error, fmt, io};
use std::io::Cursor;

use bitcoin::{Amount, OutPoint, Transaction, Witness};
use bitcoin::util::sighash::SighashCache;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sled;

use wallet::{self, BaseOutput, PreimageOutput, SignDescriptor, Signer, SpendableOutput,
             WitnessType};

/// Name of the tree holding stray outputs.
const STRAY_OUTPUT_TREE: &[u8] = b"stray-output";

/// Stray store error
#[derive(Debug)]
pub enum Error {
    /// Underlying database failure
    Database(sled::Error),
    /// A stored record failed to decode
    Codec(wallet::Error),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::Database(ref x) => Some(x),
            Error::Codec(ref x) => Some(x),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Database(ref x) => write!(f, "database: {}", x),
            Error::Codec(ref x) => write!(f, "codec: {}", x),
        }
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Error { Error::Database(e) }
}

impl From<wallet::Error> for Error {
    fn from(e: wallet::Error) -> Error { Error::Codec(e) }
}

/// An output buffered in the pool. The preimage-carrying variant covers
/// HTLCs that are settled by revealing their payment preimage.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PoolOutput {
    /// An output spendable with key material alone
    Base(BaseOutput),
    /// An output whose witness reveals a payment preimage
    Preimage(PreimageOutput),
}

impl PoolOutput {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), wallet::Error> {
        match *self {
            PoolOutput::Base(ref output) => output.encode(w),
            PoolOutput::Preimage(ref output) => output.encode(w),
        }
    }

    /// Decode one output; the witness type decides whether a preimage
    /// follows the base fields.
    fn decode<R: io::Read>(r: &mut R) -> Result<PoolOutput, wallet::Error> {
        let base = BaseOutput::decode(r)?;
        if base.witness_type() == WitnessType::HtlcAcceptedRemoteSuccess {
            let mut preimage = [0u8; 32];
            r.read_exact(&mut preimage)?;
            Ok(PoolOutput::Preimage(PreimageOutput::new(base, preimage)))
        } else {
            Ok(PoolOutput::Base(base))
        }
    }
}

impl SpendableOutput for PoolOutput {
    fn amount(&self) -> Amount {
        match *self {
            PoolOutput::Base(ref output) => output.amount(),
            PoolOutput::Preimage(ref output) => output.amount(),
        }
    }

    fn outpoint(&self) -> &OutPoint {
        match *self {
            PoolOutput::Base(ref output) => output.outpoint(),
            PoolOutput::Preimage(ref output) => output.outpoint(),
        }
    }

    fn witness_type(&self) -> WitnessType {
        match *self {
            PoolOutput::Base(ref output) => output.witness_type(),
            PoolOutput::Preimage(ref output) => output.witness_type(),
        }
    }

    fn sign_desc(&self) -> &SignDescriptor {
        match *self {
            PoolOutput::Base(ref output) => output.sign_desc(),
            PoolOutput::Preimage(ref output) => output.sign_desc(),
        }
    }

    fn build_witness(
        &self,
        signer: &dyn Signer,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        input_index: usize,
    ) -> Result<Witness, wallet::Error> {
        match *self {
            PoolOutput::Base(ref output) => {
                output.build_witness(signer, tx, sighashes, input_index)
            }
            PoolOutput::Preimage(ref output) => {
                output.build_witness(signer, tx, sighashes, input_index)
            }
        }
    }
}

/// One buffered pool entry: sizing hints plus the outputs themselves. The
/// serialized form carries an explicit output count, so concatenated
/// entries stay distinguishable.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StrayOutput {
    /// Estimated virtual size the outputs add to a sweep
    tx_vsize: u64,
    /// Total value of the outputs
    total_amount: Amount,
    /// The buffered outputs
    outputs: Vec<PoolOutput>,
}

impl StrayOutput {
    /// Wrap a single spendable output into a pool entry.
    pub fn new(output: PoolOutput) -> StrayOutput {
        let input_weight = wallet::INPUT_SIZE * 4 + output.witness_type().witness_size();
        StrayOutput {
            tx_vsize: ((input_weight + 3) / 4) as u64,
            total_amount: output.amount(),
            outputs: vec![output],
        }
    }

    /// Estimated virtual size hint.
    pub fn tx_vsize(&self) -> u64 {
        self.tx_vsize
    }

    /// Total value of the entry's outputs.
    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    /// The buffered outputs.
    pub fn outputs(&self) -> &[PoolOutput] {
        &self.outputs
    }

    /// Serialize for storage.
    pub fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), wallet::Error> {
        w.write_u64::<BigEndian>(self.tx_vsize)?;
        w.write_u64::<BigEndian>(self.total_amount.as_sat())?;
        w.write_u32::<BigEndian>(self.outputs.len() as u32)?;
        for output in &self.outputs {
            output.encode(w)?;
        }
        Ok(())
    }

    /// Deserialize an entry previously written with [encode].
    pub fn decode<R: io::Read>(r: &mut R) -> Result<StrayOutput, wallet::Error> {
        let tx_vsize = r.read_u64::<BigEndian>()?;
        let total_amount = Amount::from_sat(r.read_u64::<BigEndian>()?);
        let count = r.read_u32::<BigEndian>()?;
        let mut outputs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            outputs.push(PoolOutput::decode(r)?);
        }
        Ok(StrayOutput {
            tx_vsize: tx_vsize,
            total_amount: total_amount,
            outputs: outputs,
        })
    }
}

/// The durable stray-output buffer.
#[derive(Clone)]
pub struct StrayOutputStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl StrayOutputStore {
    /// Open (or create) the buffer inside the given database.
    pub fn open(db: &sled::Db) -> Result<StrayOutputStore, Error> {
        Ok(StrayOutputStore {
            db: db.clone(),
            tree: db.open_tree(STRAY_OUTPUT_TREE)?,
        })
    }

    /// Append an entry under a fresh monotonic id, which is returned.
    pub fn add_stray_output(&self, entry: &StrayOutput) -> Result<u64, Error> {
        let mut value = Vec::new();
        entry.encode(&mut value)?;

        let id = self.db.generate_id()?;
        self.tree.insert(&id.to_be_bytes(), value)?;
        self.tree.flush()?;
        Ok(id)
    }

    /// All buffered entries, in insertion order.
    pub fn fetch_all_stray_outputs(&self) -> Result<Vec<StrayOutput>, Error> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            entries.push(StrayOutput::decode(&mut Cursor::new(&value))?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use wallet::tests::{dummy_outpoint, dummy_sign_desc, TestSigner};

    pub fn base_pool_output(tag: u8, value: u64) -> PoolOutput {
        let signer = TestSigner::new();
        PoolOutput::Base(BaseOutput::new(
            Amount::from_sat(value),
            dummy_outpoint(tag, 0),
            WitnessType::CommitmentTimeLock,
            dummy_sign_desc(&signer.pubkey(), value, 1),
        ))
    }

    pub fn preimage_pool_output(tag: u8, value: u64) -> PoolOutput {
        let signer = TestSigner::new();
        let preimage: [u8; 32] =
            hex!("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f");
        PoolOutput::Preimage(PreimageOutput::new(
            BaseOutput::new(
                Amount::from_sat(value),
                dummy_outpoint(tag, 1),
                WitnessType::HtlcAcceptedRemoteSuccess,
                dummy_sign_desc(&signer.pubkey(), value, 0),
            ),
            preimage,
        ))
    }

    #[test]
    fn entry_roundtrip_with_preimage_output() {
        let entry = StrayOutput {
            tx_vsize: 180,
            total_amount: Amount::from_sat(1_500),
            outputs: vec![base_pool_output(1, 1_000), preimage_pool_output(2, 500)],
        };

        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        let decoded = StrayOutput::decode(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn concatenated_entries_stay_framed() {
        let first = StrayOutput::new(base_pool_output(3, 700));
        let second = StrayOutput::new(preimage_pool_output(4, 900));

        let mut buf = Vec::new();
        first.encode(&mut buf).unwrap();
        second.encode(&mut buf).unwrap();

        // The count prefix lets a reader pull one entry and leave the
        // next untouched.
        let mut cursor = Cursor::new(&buf);
        assert_eq!(StrayOutput::decode(&mut cursor).unwrap(), first);
        assert_eq!(StrayOutput::decode(&mut cursor).unwrap(), second);
        assert_eq!(cursor.position() as usize, buf.len());
    }

    #[test]
    fn entries_come_back_in_insertion_order() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = StrayOutputStore::open(&db).unwrap();

        let first = StrayOutput::new(base_pool_output(5, 100));
        let second = StrayOutput::new(base_pool_output(6, 200));
        let third = StrayOutput::new(base_pool_output(7, 300));

        let id1 = store.add_stray_output(&first).unwrap();
        let id2 = store.add_stray_output(&second).unwrap();
        let id3 = store.add_stray_output(&third).unwrap();
        assert!(id1 < id2 && id2 < id3);

        let entries = store.fetch_all_stray_outputs().unwrap();
        assert_eq!(entries, vec![first, second, third]);
    }
}
