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


//! # Wallet Interface
//!
//! The capability layer shared by the nursery and the stray output pool: a
//! description of an output we are able to spend (outpoint, value, witness
//! kind and signing material), witness construction for each supported
//! witness kind, fee rates and transaction weight estimation.
//!
//! Witness construction is a dispatch table keyed on [WitnessType] rather
//! than a method on each output kind, so that the set of supported spends is
//! visible in one place.
//!

use std::{error, fmt, io};

use bitcoin;
use bitcoin::{Amount, OutPoint, Transaction, TxOut, Witness};
use bitcoin::blockdata::constants::WITNESS_SCALE_FACTOR;
use bitcoin::consensus::encode as consensus;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, PublicKey, SecretKey};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::util::sighash::SighashCache;
use bitcoin::EcdsaSighashType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use common::BlockHeight;

/// Non-witness size of a transaction input: 36-byte outpoint, 4-byte
/// sequence and one byte for the empty scriptSig length.
pub const INPUT_SIZE: usize = 36 + 4 + 1;

/// Size of a P2WKH output: 8-byte value, one byte script length and the
/// 22-byte `OP_0 <20-byte keyhash>` script.
pub const P2WKH_OUTPUT_SIZE: usize = 8 + 1 + 22;

/// Non-witness overhead of a transaction: 4-byte version and 4-byte locktime.
pub const BASE_TX_SIZE: usize = 4 + 4;

/// Segwit marker and flag bytes.
pub const WITNESS_HEADER_SIZE: usize = 2;

/// A maximally-sized DER signature with its sighash-type byte.
pub const SIGNATURE_SIZE: usize = 73;

/// The delay script guarding a commitment to-self output or the output of a
/// second-level HTLC transaction:
///
///   OP_IF <33-byte revocation key> OP_ELSE <up to 4-byte csv>
///   OP_CHECKSEQUENCEVERIFY OP_DROP <33-byte delay key> OP_ENDIF OP_CHECKSIG
pub const TO_LOCAL_SCRIPT_SIZE: usize = 1 + 34 + 1 + 5 + 1 + 1 + 34 + 1 + 1;

/// Witness claiming a to-local or second-level output through its delay
/// branch: item count, signature, empty selector and the witness script.
pub const TO_LOCAL_TIMEOUT_WITNESS_SIZE: usize =
    1 + 1 + SIGNATURE_SIZE + 1 + 1 + TO_LOCAL_SCRIPT_SIZE;

/// An HTLC we offered on the remote party's commitment transaction.
pub const OFFERED_HTLC_SCRIPT_SIZE: usize = 133;

/// An HTLC the remote party offered to us on their commitment transaction.
pub const ACCEPTED_HTLC_SCRIPT_SIZE: usize = 140;

/// Witness timing out an offered HTLC on the remote commitment: item count,
/// signature, empty preimage slot and the witness script.
pub const OFFERED_HTLC_TIMEOUT_WITNESS_SIZE: usize =
    1 + 1 + SIGNATURE_SIZE + 1 + 1 + OFFERED_HTLC_SCRIPT_SIZE;

/// Witness redeeming an accepted HTLC on the remote commitment with its
/// payment preimage: item count, signature, 32-byte preimage and the
/// witness script.
pub const ACCEPTED_HTLC_SUCCESS_WITNESS_SIZE: usize =
    1 + 1 + SIGNATURE_SIZE + 1 + 32 + 1 + ACCEPTED_HTLC_SCRIPT_SIZE;

/// Wallet error
#[derive(Debug)]
pub enum Error {
    /// Codec I/O problem
    Io(io::Error),
    /// Consensus (de)serialization of an embedded transaction failed
    Consensus(consensus::Error),
    /// secp256k1 rejected key material or a signature request
    Secp(secp256k1::Error),
    /// A persisted witness-type code was not understood
    UnknownWitnessType(u16),
    /// A persisted sighash-type code was not understood
    BadSighashType(u32),
    /// The witness kind needs a payment preimage the caller did not have
    PreimageRequired(WitnessType),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::Io(ref x) => Some(x),
            Error::Consensus(ref x) => Some(x),
            Error::Secp(ref x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref x) => write!(f, "io: {}", x),
            Error::Consensus(ref x) => write!(f, "consensus encoding: {}", x),
            Error::Secp(ref x) => write!(f, "secp256k1: {}", x),
            Error::UnknownWitnessType(code) => write!(f, "unknown witness type {}", code),
            Error::BadSighashType(code) => write!(f, "unknown sighash type {}", code),
            Error::PreimageRequired(wt) => write!(f, "witness type {:?} requires a preimage", wt),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error { Error::Io(e) }
}

impl From<consensus::Error> for Error {
    fn from(e: consensus::Error) -> Error { Error::Consensus(e) }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Error { Error::Secp(e) }
}

/// A fee rate in satoshi per kiloweight.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct FeeRate(u64);

impl FeeRate {
    /// Create a fee rate from a satoshi-per-kiloweight figure.
    pub fn from_sat_per_kw(rate: u64) -> FeeRate {
        FeeRate(rate)
    }

    /// Accessor for the raw satoshi-per-kiloweight figure.
    pub fn to_sat_per_kw(self) -> u64 {
        self.0
    }

    /// The fee required to pay for the given amount of transaction weight,
    /// rounded up.
    pub fn fee_for_weight(self, weight: usize) -> Amount {
        Amount::from_sat((self.0 * weight as u64 + 999) / 1000)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} sat/kw", self.0)
    }
}

/// The kind of spend an incubated output requires. Determines both the
/// witness constructed when the output is swept and the weight the input
/// contributes to a sweep transaction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum WitnessType {
    /// The CSV-delayed to-self output on a commitment transaction.
    CommitmentTimeLock,
    /// The CSV-delayed output of a second-level HTLC success transaction.
    HtlcAcceptedSuccessSecondLevel,
    /// The CSV-delayed output of a second-level HTLC timeout transaction.
    HtlcOfferedTimeoutSecondLevel,
    /// An HTLC we offered on the remote commitment, spendable by us after
    /// its absolute timeout.
    HtlcOfferedRemoteTimeout,
    /// An HTLC the remote party offered on their commitment, spendable by
    /// us with the payment preimage.
    HtlcAcceptedRemoteSuccess,
}

impl WitnessType {
    /// The stable wire code this witness type is persisted under.
    pub fn to_wire(self) -> u16 {
        match self {
            WitnessType::CommitmentTimeLock => 0,
            WitnessType::HtlcAcceptedSuccessSecondLevel => 1,
            WitnessType::HtlcOfferedTimeoutSecondLevel => 2,
            WitnessType::HtlcOfferedRemoteTimeout => 3,
            WitnessType::HtlcAcceptedRemoteSuccess => 4,
        }
    }

    /// Decode a persisted wire code.
    pub fn from_wire(code: u16) -> Result<WitnessType, Error> {
        match code {
            0 => Ok(WitnessType::CommitmentTimeLock),
            1 => Ok(WitnessType::HtlcAcceptedSuccessSecondLevel),
            2 => Ok(WitnessType::HtlcOfferedTimeoutSecondLevel),
            3 => Ok(WitnessType::HtlcOfferedRemoteTimeout),
            4 => Ok(WitnessType::HtlcAcceptedRemoteSuccess),
            x => Err(Error::UnknownWitnessType(x)),
        }
    }

    /// Estimated serialized size of the witness this spend will carry.
    pub fn witness_size(self) -> usize {
        match self {
            WitnessType::CommitmentTimeLock => TO_LOCAL_TIMEOUT_WITNESS_SIZE,
            WitnessType::HtlcAcceptedSuccessSecondLevel => TO_LOCAL_TIMEOUT_WITNESS_SIZE,
            WitnessType::HtlcOfferedTimeoutSecondLevel => TO_LOCAL_TIMEOUT_WITNESS_SIZE,
            WitnessType::HtlcOfferedRemoteTimeout => OFFERED_HTLC_TIMEOUT_WITNESS_SIZE,
            WitnessType::HtlcAcceptedRemoteSuccess => ACCEPTED_HTLC_SUCCESS_WITNESS_SIZE,
        }
    }

    /// Whether the spend is gated on a relative (CSV) rather than an
    /// absolute (CLTV) timelock.
    pub fn is_csv_spend(self) -> bool {
        match self {
            WitnessType::CommitmentTimeLock => true,
            WitnessType::HtlcAcceptedSuccessSecondLevel => true,
            WitnessType::HtlcOfferedTimeoutSecondLevel => true,
            WitnessType::HtlcOfferedRemoteTimeout => false,
            WitnessType::HtlcAcceptedRemoteSuccess => false,
        }
    }
}

/// Everything a [Signer] needs to produce a signature for one input: the key
/// to sign with, optional tweaks to apply to it, the witness script being
/// satisfied and the output being spent.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SignDescriptor {
    /// The public key whose secret counterpart signs
    pub pubkey: PublicKey,
    /// Commitment-point tweak added to the key, if any
    pub single_tweak: Option<Vec<u8>>,
    /// Revocation secret used to derive the signing key, if any
    pub double_tweak: Option<SecretKey>,
    /// The script whose conditions the witness satisfies
    pub witness_script: bitcoin::Script,
    /// The output being spent
    pub output: TxOut,
    /// Sighash flag to sign under
    pub hash_type: EcdsaSighashType,
}

/// Write a length-prefixed byte string.
pub fn write_varbytes<W: io::Write>(w: &mut W, bytes: &[u8]) -> Result<(), Error> {
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Read a length-prefixed byte string.
pub fn read_varbytes<R: io::Read>(r: &mut R) -> Result<Vec<u8>, Error> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Write an outpoint as its raw 32-byte txid followed by the index.
pub fn write_outpoint<W: io::Write>(w: &mut W, o: &OutPoint) -> Result<(), Error> {
    w.write_all(&o.txid.into_inner())?;
    w.write_u32::<BigEndian>(o.vout)?;
    Ok(())
}

/// Read an outpoint previously written with [write_outpoint].
pub fn read_outpoint<R: io::Read>(r: &mut R) -> Result<OutPoint, Error> {
    let mut hash = [0u8; 32];
    r.read_exact(&mut hash)?;
    let vout = r.read_u32::<BigEndian>()?;
    Ok(OutPoint {
        txid: bitcoin::Txid::from_inner(hash),
        vout: vout,
    })
}

/// Serialize a sign descriptor for storage.
pub fn write_sign_descriptor<W: io::Write>(w: &mut W, sd: &SignDescriptor) -> Result<(), Error> {
    w.write_all(&sd.pubkey.serialize())?;
    match sd.single_tweak {
        Some(ref tweak) => write_varbytes(w, tweak)?,
        None => write_varbytes(w, &[])?,
    }
    match sd.double_tweak {
        Some(ref secret) => write_varbytes(w, &secret[..])?,
        None => write_varbytes(w, &[])?,
    }
    write_varbytes(w, sd.witness_script.as_bytes())?;
    w.write_u64::<BigEndian>(sd.output.value)?;
    write_varbytes(w, sd.output.script_pubkey.as_bytes())?;
    w.write_u32::<BigEndian>(sd.hash_type.to_u32())?;
    Ok(())
}

/// Deserialize a sign descriptor previously written with
/// [write_sign_descriptor].
pub fn read_sign_descriptor<R: io::Read>(r: &mut R) -> Result<SignDescriptor, Error> {
    let mut pubkey_bytes = [0u8; 33];
    r.read_exact(&mut pubkey_bytes)?;
    let pubkey = PublicKey::from_slice(&pubkey_bytes)?;

    let single_tweak = match read_varbytes(r)? {
        ref b if b.is_empty() => None,
        b => Some(b),
    };
    let double_tweak = match read_varbytes(r)? {
        ref b if b.is_empty() => None,
        b => Some(SecretKey::from_slice(&b)?),
    };

    let witness_script = bitcoin::Script::from(read_varbytes(r)?);
    let value = r.read_u64::<BigEndian>()?;
    let script_pubkey = bitcoin::Script::from(read_varbytes(r)?);
    let hash_type = match r.read_u32::<BigEndian>()? {
        0x01 => EcdsaSighashType::All,
        0x02 => EcdsaSighashType::None,
        0x03 => EcdsaSighashType::Single,
        0x81 => EcdsaSighashType::AllPlusAnyoneCanPay,
        0x82 => EcdsaSighashType::NonePlusAnyoneCanPay,
        0x83 => EcdsaSighashType::SinglePlusAnyoneCanPay,
        x => return Err(Error::BadSighashType(x)),
    };

    Ok(SignDescriptor {
        pubkey: pubkey,
        single_tweak: single_tweak,
        double_tweak: double_tweak,
        witness_script: witness_script,
        output: TxOut {
            value: value,
            script_pubkey: script_pubkey,
        },
        hash_type: hash_type,
    })
}

/// Produces signatures over the segwit sighash of an input. Implementations
/// are expected to be safe for concurrent use.
pub trait Signer: Send + Sync {
    /// Sign the given input of `tx` with the key material referenced by the
    /// sign descriptor. Returns a raw ECDSA signature without the sighash
    /// flag appended.
    fn sign_output_raw(
        &self,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        sign_desc: &SignDescriptor,
        input_index: usize,
    ) -> Result<Signature, Error>;
}

/// DER-serialize a signature and append the sighash flag.
fn serialize_sig(sig: &Signature, hash_type: EcdsaSighashType) -> Vec<u8> {
    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(hash_type.to_u32() as u8);
    bytes
}

/// Witness for the delay branch of a to-local script: the empty middle item
/// steers script execution into the OP_ELSE arm.
fn commit_spend_timeout(
    signer: &dyn Signer,
    sign_desc: &SignDescriptor,
    tx: &Transaction,
    sighashes: &mut SighashCache<&Transaction>,
    input_index: usize,
) -> Result<Witness, Error> {
    let sig = signer.sign_output_raw(tx, sighashes, sign_desc, input_index)?;
    Ok(Witness::from_vec(vec![
        serialize_sig(&sig, sign_desc.hash_type),
        vec![],
        sign_desc.witness_script.to_bytes(),
    ]))
}

/// Witness timing out an HTLC we offered on the remote commitment. The
/// empty middle item fills the preimage slot, selecting the timeout branch.
fn remote_htlc_spend_timeout(
    signer: &dyn Signer,
    sign_desc: &SignDescriptor,
    tx: &Transaction,
    sighashes: &mut SighashCache<&Transaction>,
    input_index: usize,
) -> Result<Witness, Error> {
    let sig = signer.sign_output_raw(tx, sighashes, sign_desc, input_index)?;
    Ok(Witness::from_vec(vec![
        serialize_sig(&sig, sign_desc.hash_type),
        vec![],
        sign_desc.witness_script.to_bytes(),
    ]))
}

/// Witness redeeming an HTLC the remote party offered, by revealing the
/// payment preimage.
pub fn sender_htlc_spend_redeem(
    signer: &dyn Signer,
    sign_desc: &SignDescriptor,
    tx: &Transaction,
    sighashes: &mut SighashCache<&Transaction>,
    input_index: usize,
    preimage: &[u8; 32],
) -> Result<Witness, Error> {
    let sig = signer.sign_output_raw(tx, sighashes, sign_desc, input_index)?;
    Ok(Witness::from_vec(vec![
        serialize_sig(&sig, sign_desc.hash_type),
        preimage.to_vec(),
        sign_desc.witness_script.to_bytes(),
    ]))
}

/// Construct the witness for a spend of the given kind. This is the dispatch
/// table behind [SpendableOutput::build_witness]; preimage-carrying kinds
/// are handled by [PreimageOutput] and rejected here.
pub fn build_witness(
    witness_type: WitnessType,
    signer: &dyn Signer,
    sign_desc: &SignDescriptor,
    tx: &Transaction,
    sighashes: &mut SighashCache<&Transaction>,
    input_index: usize,
) -> Result<Witness, Error> {
    match witness_type {
        WitnessType::CommitmentTimeLock => {
            commit_spend_timeout(signer, sign_desc, tx, sighashes, input_index)
        }
        // Second-level outputs are guarded by a to-local style delay script,
        // so their sweep witness has the same shape.
        WitnessType::HtlcAcceptedSuccessSecondLevel
        | WitnessType::HtlcOfferedTimeoutSecondLevel => {
            commit_spend_timeout(signer, sign_desc, tx, sighashes, input_index)
        }
        WitnessType::HtlcOfferedRemoteTimeout => {
            remote_htlc_spend_timeout(signer, sign_desc, tx, sighashes, input_index)
        }
        WitnessType::HtlcAcceptedRemoteSuccess => {
            Err(Error::PreimageRequired(witness_type))
        }
    }
}

/// An output the wallet knows how to spend once its timelocks permit.
pub trait SpendableOutput: Send + Sync {
    /// Value of the output.
    fn amount(&self) -> Amount;
    /// The outpoint to spend.
    fn outpoint(&self) -> &OutPoint;
    /// The kind of spend required.
    fn witness_type(&self) -> WitnessType;
    /// Signing material for the spend.
    fn sign_desc(&self) -> &SignDescriptor;
    /// Construct the witness for input `input_index` of `tx`.
    fn build_witness(
        &self,
        signer: &dyn Signer,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        input_index: usize,
    ) -> Result<Witness, Error>;
}

/// Plain value implementation of [SpendableOutput].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BaseOutput {
    amount: Amount,
    outpoint: OutPoint,
    witness_type: WitnessType,
    sign_desc: SignDescriptor,
}

impl BaseOutput {
    /// Create a new [BaseOutput].
    pub fn new(
        amount: Amount,
        outpoint: OutPoint,
        witness_type: WitnessType,
        sign_desc: SignDescriptor,
    ) -> BaseOutput {
        BaseOutput {
            amount: amount,
            outpoint: outpoint,
            witness_type: witness_type,
            sign_desc: sign_desc,
        }
    }

    /// Serialize for storage: amount, outpoint, witness type, sign
    /// descriptor, all big-endian.
    pub fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_u64::<BigEndian>(self.amount.as_sat())?;
        write_outpoint(w, &self.outpoint)?;
        w.write_u16::<BigEndian>(self.witness_type.to_wire())?;
        write_sign_descriptor(w, &self.sign_desc)
    }

    /// Deserialize an output previously written with [encode].
    pub fn decode<R: io::Read>(r: &mut R) -> Result<BaseOutput, Error> {
        let amount = Amount::from_sat(r.read_u64::<BigEndian>()?);
        let outpoint = read_outpoint(r)?;
        let witness_type = WitnessType::from_wire(r.read_u16::<BigEndian>()?)?;
        let sign_desc = read_sign_descriptor(r)?;
        Ok(BaseOutput::new(amount, outpoint, witness_type, sign_desc))
    }
}

impl SpendableOutput for BaseOutput {
    fn amount(&self) -> Amount {
        self.amount
    }

    fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    fn witness_type(&self) -> WitnessType {
        self.witness_type
    }

    fn sign_desc(&self) -> &SignDescriptor {
        &self.sign_desc
    }

    fn build_witness(
        &self,
        signer: &dyn Signer,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        input_index: usize,
    ) -> Result<Witness, Error> {
        build_witness(self.witness_type, signer, &self.sign_desc, tx, sighashes, input_index)
    }
}

/// A spendable output whose witness reveals a payment preimage. Used on the
/// stray/contract path for HTLCs settled with the preimage rather than a
/// timeout.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PreimageOutput {
    preimage: [u8; 32],
    base: BaseOutput,
}

impl PreimageOutput {
    /// Create a new [PreimageOutput].
    pub fn new(base: BaseOutput, preimage: [u8; 32]) -> PreimageOutput {
        PreimageOutput {
            preimage: preimage,
            base: base,
        }
    }

    /// Serialize for storage: the base output followed by the preimage.
    pub fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        self.base.encode(w)?;
        w.write_all(&self.preimage)?;
        Ok(())
    }

    /// Deserialize an output previously written with [encode].
    pub fn decode<R: io::Read>(r: &mut R) -> Result<PreimageOutput, Error> {
        let base = BaseOutput::decode(r)?;
        let mut preimage = [0u8; 32];
        r.read_exact(&mut preimage)?;
        Ok(PreimageOutput::new(base, preimage))
    }
}

impl SpendableOutput for PreimageOutput {
    fn amount(&self) -> Amount {
        self.base.amount()
    }

    fn outpoint(&self) -> &OutPoint {
        self.base.outpoint()
    }

    fn witness_type(&self) -> WitnessType {
        self.base.witness_type()
    }

    fn sign_desc(&self) -> &SignDescriptor {
        self.base.sign_desc()
    }

    fn build_witness(
        &self,
        signer: &dyn Signer,
        tx: &Transaction,
        sighashes: &mut SighashCache<&Transaction>,
        input_index: usize,
    ) -> Result<Witness, Error> {
        match self.base.witness_type() {
            WitnessType::HtlcAcceptedRemoteSuccess => sender_htlc_spend_redeem(
                signer, self.base.sign_desc(), tx, sighashes, input_index, &self.preimage,
            ),
            wt => build_witness(wt, signer, self.base.sign_desc(), tx, sighashes, input_index),
        }
    }
}

/// Running weight estimate for a transaction under construction.
#[derive(Clone, Debug, Default)]
pub struct TxWeightEstimator {
    has_witness: bool,
    input_count: usize,
    output_count: usize,
    input_size: usize,
    output_size: usize,
    witness_size: usize,
}

impl TxWeightEstimator {
    /// Create an empty estimate.
    pub fn new() -> TxWeightEstimator {
        Default::default()
    }

    /// Account for a P2WKH output.
    pub fn add_p2wkh_output(&mut self) -> &mut TxWeightEstimator {
        self.output_count += 1;
        self.output_size += P2WKH_OUTPUT_SIZE;
        self
    }

    /// Account for a witness input of the given estimated witness size.
    pub fn add_witness_input(&mut self, witness_size: usize) -> &mut TxWeightEstimator {
        self.input_count += 1;
        self.input_size += INPUT_SIZE;
        self.witness_size += witness_size;
        self.has_witness = true;
        self
    }

    /// Account for a witness input spending an output of the given kind.
    pub fn add_witness_input_by_type(&mut self, witness_type: WitnessType) -> &mut TxWeightEstimator {
        self.add_witness_input(witness_type.witness_size())
    }

    /// The estimated weight of the signed transaction.
    pub fn weight(&self) -> usize {
        let base = BASE_TX_SIZE
            + compact_size_len(self.input_count as u64)
            + self.input_size
            + compact_size_len(self.output_count as u64)
            + self.output_size;
        let mut weight = base * WITNESS_SCALE_FACTOR;
        if self.has_witness {
            weight += WITNESS_HEADER_SIZE + self.witness_size;
        }
        weight
    }

    /// The estimated virtual size of the signed transaction, rounded up.
    pub fn vsize(&self) -> usize {
        (self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }
}

/// Serialized size of a Bitcoin CompactSize integer.
fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// How the to-self output of a force-closed commitment transaction can be
/// claimed once the commitment confirms.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitOutputResolution {
    /// The to-self output on the commitment transaction
    pub self_outpoint: OutPoint,
    /// Signing material for the delayed claim
    pub self_output_sign_desc: SignDescriptor,
    /// CSV delay imposed on the claim, in blocks
    pub maturity_delay: u32,
}

/// How an outgoing HTLC can be resolved after a force close. When the HTLC
/// sits on our own commitment a pre-signed timeout transaction must confirm
/// first; on the remote commitment the output is claimed directly once the
/// absolute timeout passes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OutgoingHtlcResolution {
    /// Absolute expiry height of the HTLC
    pub expiry: BlockHeight,
    /// Pre-signed timeout transaction, present iff the HTLC is on our
    /// commitment
    pub signed_timeout_tx: Option<Transaction>,
    /// CSV delay on the second-level claim, in blocks
    pub csv_delay: u32,
    /// The output that ultimately pays us
    pub claim_outpoint: OutPoint,
    /// Signing material for the sweep
    pub sweep_sign_desc: SignDescriptor,
}

/// How an incoming HTLC can be resolved after a force close: the
/// second-level success transaction's output is swept after its CSV delay.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IncomingHtlcResolution {
    /// The output that ultimately pays us
    pub claim_outpoint: OutPoint,
    /// CSV delay on the claim, in blocks
    pub csv_delay: u32,
    /// Signing material for the sweep
    pub sweep_sign_desc: SignDescriptor,
}
