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


//! # Nursery Outputs
//!
//! The two persisted output shapes. A [KidOutput] needs a single on-chain
//! spend to reach the wallet once its parent transaction confirms. A
//! [BabyOutput] is a two-stage outgoing HTLC: a pre-signed timeout
//! transaction must confirm after the CLTV expiry, after which the embedded
//! kid sweeps the second-level output.
//!

use std::io;

use bitcoin::{Amount, OutPoint, Transaction, Witness};
use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::util::sighash::SighashCache;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use common::BlockHeight;
use wallet::{self, BaseOutput, OutgoingHtlcResolution, SignDescriptor, Signer, SpendableOutput,
             WitnessType};

/// An output waiting for a required block height before its funds can be
/// moved into the wallet.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct KidOutput {
    output: BaseOutput,

    origin_chan_point: OutPoint,

    /// Whether this output stems from an HTLC rather than the commitment
    /// to-self output. Only used to label the output in reports and logs.
    is_htlc: bool,

    /// Relative delay, in blocks, after confirmation of the parent
    /// transaction. Zero for outputs gated on an absolute timelock only.
    blocks_to_maturity: u32,

    /// Absolute height the output matures at. Only set for offered HTLCs on
    /// the remote party's commitment transaction, zero otherwise.
    absolute_maturity: BlockHeight,

    /// Height the parent transaction confirmed at, zero until known.
    conf_height: BlockHeight,
}

impl KidOutput {
    /// Build a kid for an output of the given witness kind. The amount is
    /// taken from the sign descriptor.
    pub fn new(
        outpoint: OutPoint,
        origin_chan_point: OutPoint,
        blocks_to_maturity: u32,
        witness_type: WitnessType,
        sign_desc: SignDescriptor,
        absolute_maturity: BlockHeight,
    ) -> KidOutput {
        // An HTLC either incoming on our commitment, or outgoing on the
        // commitment of the remote peer.
        let is_htlc = witness_type == WitnessType::HtlcAcceptedSuccessSecondLevel
            || witness_type == WitnessType::HtlcOfferedRemoteTimeout;

        let amount = Amount::from_sat(sign_desc.output.value);
        KidOutput {
            output: BaseOutput::new(amount, outpoint, witness_type, sign_desc),
            is_htlc: is_htlc,
            origin_chan_point: origin_chan_point,
            blocks_to_maturity: blocks_to_maturity,
            absolute_maturity: absolute_maturity,
            conf_height: 0,
        }
    }

    /// The channel this output came from.
    pub fn origin_chan_point(&self) -> &OutPoint {
        &self.origin_chan_point
    }

    /// Whether the output stems from an HTLC.
    pub fn is_htlc(&self) -> bool {
        self.is_htlc
    }

    /// Relative delay after parent confirmation, in blocks.
    pub fn blocks_to_maturity(&self) -> u32 {
        self.blocks_to_maturity
    }

    /// Absolute maturity height, zero unless the output is CLTV-gated.
    pub fn absolute_maturity(&self) -> BlockHeight {
        self.absolute_maturity
    }

    /// Height the parent confirmed at, zero until known.
    pub fn conf_height(&self) -> BlockHeight {
        self.conf_height
    }

    /// Record the parent confirmation height.
    pub fn set_conf_height(&mut self, height: BlockHeight) {
        self.conf_height = height;
    }

    /// The height this output can be swept at. For CLTV outputs this is the
    /// absolute maturity; for CSV outputs it is only defined once the
    /// parent has confirmed.
    pub fn maturity_height(&self) -> BlockHeight {
        if self.witness_type() == WitnessType::HtlcOfferedRemoteTimeout {
            self.absolute_maturity
        } else {
            self.conf_height + self.blocks_to_maturity
        }
    }

    /// Serialize for storage.
    pub fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), wallet::Error> {
        w.write_u64::<BigEndian>(self.amount().as_sat())?;
        wallet::write_outpoint(w, self.outpoint())?;
        wallet::write_outpoint(w, &self.origin_chan_point)?;
        w.write_u8(self.is_htlc as u8)?;
        w.write_u32::<BigEndian>(self.blocks_to_maturity)?;
        w.write_u32::<BigEndian>(self.absolute_maturity)?;
        w.write_u32::<BigEndian>(self.conf_height)?;
        w.write_u16::<BigEndian>(self.witness_type().to_wire())?;
        wallet::write_sign_descriptor(w, self.sign_desc())
    }

    /// Deserialize an output previously written with [encode]. Short reads
    /// and unknown witness types fail the record.
    pub fn decode<R: io::Read>(r: &mut R) -> Result<KidOutput, wallet::Error> {
        let amount = Amount::from_sat(r.read_u64::<BigEndian>()?);
        let outpoint = wallet::read_outpoint(r)?;
        let origin_chan_point = wallet::read_outpoint(r)?;
        let is_htlc = r.read_u8()? != 0;
        let blocks_to_maturity = r.read_u32::<BigEndian>()?;
        let absolute_maturity = r.read_u32::<BigEndian>()?;
        let conf_height = r.read_u32::<BigEndian>()?;
        let witness_type = WitnessType::from_wire(r.read_u16::<BigEndian>()?)?;
        let sign_desc = wallet::read_sign_descriptor(r)?;

        Ok(KidOutput {
            output: BaseOutput::new(amount, outpoint, witness_type, sign_desc),
            is_htlc: is_htlc,
            origin_chan_point: origin_chan_point,
            blocks_to_maturity: blocks_to_maturity,
            absolute_maturity: absolute_maturity,
            conf_height: conf_height,
        })
    }
}

impl SpendableOutput for KidOutput {
    fn amount(&self) -> Amount {
        self.output.amount()
    }

    fn outpoint(&self) -> &OutPoint {
        self.output.outpoint()
    }

    fn witness_type(&self) -> WitnessType {
        self.output.witness_type()
    }

    fn sign_desc(&self) -> &SignDescriptor {
        self.output.sign_desc()
    }

    fn build_witness(
        &self,
        signer: &dyn Signer,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        input_index: usize,
    ) -> Result<Witness, wallet::Error> {
        self.output.build_witness(signer, tx, sighashes, input_index)
    }
}

/// A two-stage output: broadcasting the pre-signed timeout transaction
/// after `expiry` is stage one, sweeping its CSV-delayed output via the
/// embedded kid is stage two.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BabyOutput {
    /// Absolute height at which the timeout transaction becomes valid.
    expiry: BlockHeight,

    /// Fully-signed transaction that, upon confirmation, transitions the
    /// htlc into the delay-and-claim stage.
    timeout_tx: Transaction,

    /// The output of `timeout_tx` to be swept once the timeout transaction
    /// has confirmed.
    kid: KidOutput,
}

impl BabyOutput {
    /// Build a baby from an outgoing-HTLC resolution that carries a
    /// pre-signed timeout transaction.
    pub fn new(chan_point: &OutPoint, res: &OutgoingHtlcResolution) -> BabyOutput {
        let kid = KidOutput::new(
            res.claim_outpoint,
            *chan_point,
            res.csv_delay,
            WitnessType::HtlcOfferedTimeoutSecondLevel,
            res.sweep_sign_desc.clone(),
            0,
        );

        BabyOutput {
            expiry: res.expiry,
            timeout_tx: res.signed_timeout_tx.clone()
                .expect("baby outputs carry a signed timeout tx"),
            kid: kid,
        }
    }

    /// Absolute height the timeout transaction becomes valid at.
    pub fn expiry(&self) -> BlockHeight {
        self.expiry
    }

    /// The pre-signed stage-one transaction.
    pub fn timeout_tx(&self) -> &Transaction {
        &self.timeout_tx
    }

    /// The embedded stage-two kid.
    pub fn kid(&self) -> &KidOutput {
        &self.kid
    }

    /// Record the confirmation height of the timeout transaction on the
    /// embedded kid.
    pub fn set_conf_height(&mut self, height: BlockHeight) {
        self.kid.set_conf_height(height);
    }

    /// Serialize for storage: expiry and timeout transaction, then the
    /// embedded kid.
    pub fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), wallet::Error> {
        w.write_u32::<BigEndian>(self.expiry)?;
        self.timeout_tx.consensus_encode(&mut *w)?;
        self.kid.encode(w)
    }

    /// Deserialize an output previously written with [encode].
    pub fn decode<R: io::Read>(r: &mut R) -> Result<BabyOutput, wallet::Error> {
        let expiry = r.read_u32::<BigEndian>()?;
        let timeout_tx = Transaction::consensus_decode(&mut *r)?;
        let kid = KidOutput::decode(r)?;
        Ok(BabyOutput {
            expiry: expiry,
            timeout_tx: timeout_tx,
            kid: kid,
        })
    }
}

impl SpendableOutput for BabyOutput {
    fn amount(&self) -> Amount {
        self.kid.amount()
    }

    fn outpoint(&self) -> &OutPoint {
        self.kid.outpoint()
    }

    fn witness_type(&self) -> WitnessType {
        self.kid.witness_type()
    }

    fn sign_desc(&self) -> &SignDescriptor {
        self.kid.sign_desc()
    }

    fn build_witness(
        &self,
        signer: &dyn Signer,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        input_index: usize,
    ) -> Result<Witness, wallet::Error> {
        self.kid.build_witness(signer, tx, sighashes, input_index)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use std::io::Cursor;

    use bitcoin::{Script, TxIn, TxOut};
    use wallet::tests::{dummy_outpoint, dummy_sign_desc, TestSigner};

    pub fn dummy_kid(tag: u8, csv: u32, witness_type: WitnessType, absolute: BlockHeight)
        -> KidOutput
    {
        let signer = TestSigner::new();
        KidOutput::new(
            dummy_outpoint(tag, 0),
            dummy_outpoint(0xcc, 1),
            csv,
            witness_type,
            dummy_sign_desc(&signer.pubkey(), 100_000, csv),
            absolute,
        )
    }

    pub fn dummy_timeout_tx(prev: OutPoint) -> Transaction {
        Transaction {
            version: 2,
            lock_time: 200,
            input: vec![TxIn {
                previous_output: prev,
                script_sig: Script::new(),
                sequence: 0xffff_ffff,
                witness: Default::default(),
            }],
            output: vec![TxOut {
                value: 90_000,
                script_pubkey: Script::new(),
            }],
        }
    }

    #[test]
    fn kid_roundtrip() {
        let mut kid = dummy_kid(7, 144, WitnessType::CommitmentTimeLock, 0);
        kid.set_conf_height(1_000);

        let mut buf = Vec::new();
        kid.encode(&mut buf).unwrap();
        let decoded = KidOutput::decode(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, kid);
        assert_eq!(decoded.maturity_height(), 1_144);
    }

    #[test]
    fn cltv_kid_matures_at_absolute_height() {
        let kid = dummy_kid(8, 0, WitnessType::HtlcOfferedRemoteTimeout, 777);
        assert!(kid.is_htlc());
        assert_eq!(kid.maturity_height(), 777);
    }

    #[test]
    fn kid_decode_rejects_unknown_witness_type() {
        let kid = dummy_kid(9, 10, WitnessType::CommitmentTimeLock, 0);
        let mut buf = Vec::new();
        kid.encode(&mut buf).unwrap();

        // The witness type sits after amount (8), two outpoints (2 * 36),
        // the htlc flag (1) and three heights (3 * 4).
        let offset = 8 + 36 + 36 + 1 + 12;
        buf[offset] = 0xff;
        buf[offset + 1] = 0xff;
        match KidOutput::decode(&mut Cursor::new(&buf)) {
            Err(wallet::Error::UnknownWitnessType(0xffff)) => {}
            x => panic!("expected UnknownWitnessType, got {:?}", x),
        }
    }

    #[test]
    fn kid_decode_rejects_short_read() {
        let kid = dummy_kid(10, 10, WitnessType::CommitmentTimeLock, 0);
        let mut buf = Vec::new();
        kid.encode(&mut buf).unwrap();
        buf.truncate(40);
        assert!(KidOutput::decode(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn baby_roundtrip() {
        let signer = TestSigner::new();
        let chan_point = dummy_outpoint(0xcc, 1);
        let claim = dummy_outpoint(11, 0);
        let res = OutgoingHtlcResolution {
            expiry: 200,
            signed_timeout_tx: Some(dummy_timeout_tx(dummy_outpoint(12, 0))),
            csv_delay: 40,
            claim_outpoint: claim,
            sweep_sign_desc: dummy_sign_desc(&signer.pubkey(), 90_000, 40),
        };
        let baby = BabyOutput::new(&chan_point, &res);
        assert_eq!(baby.expiry(), 200);
        assert_eq!(baby.kid().blocks_to_maturity(), 40);
        assert!(!baby.kid().is_htlc());

        let mut buf = Vec::new();
        baby.encode(&mut buf).unwrap();
        let decoded = BabyOutput::decode(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, baby);
    }
}
