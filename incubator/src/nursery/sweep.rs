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


//! # Sweep Transactions
//!
//! Turns a class of mature kindergarten outputs into one signed transaction
//! paying a fresh wallet script. Outputs whose value would not cover their
//! share of the fee are diverted to the stray output pool before the
//! transaction is assembled.
//!
//! The destination script is freshly generated on every build, so two
//! builds for the same class produce different txids. The incubator guards
//! against that by persisting the first successful build per height and
//! never building again for a finalized height.
//!

use std::{error, fmt};

use bitcoin::util::sighash::SighashCache;
use bitcoin::{Amount, Script, Transaction, TxIn, TxOut, Witness};

use chain::{self, FeeEstimator, SweepScriptSource};
use common::{constants, BlockHeight};
use nursery::output::KidOutput;
use wallet::{self, FeeRate, Signer, SpendableOutput, TxWeightEstimator, WitnessType};

/// Largest output value consensus will accept, in satoshi.
const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Decides whether an output is worth sweeping at the given fee rate. A
/// `true` return means the policy has taken ownership of the output (it
/// was handed to the stray pool) and the sweep must skip it.
pub type CutStrayInput = Box<dyn Fn(FeeRate, &dyn SpendableOutput) -> bool + Send + Sync>;

/// Sweep build error
#[derive(Debug)]
pub enum Error {
    /// Fee estimation failed
    FeeEstimate(chain::Error),
    /// Fresh script generation failed
    ScriptGen(chain::Error),
    /// Witness construction or signing failed
    Witness(wallet::Error),
    /// The inputs cannot pay the required fee
    Unbalanced {
        /// Total value of the inputs, in satoshi
        input_value: u64,
        /// Fee the transaction would owe, in satoshi
        fee: u64,
    },
    /// The assembled transaction violates a basic validity rule
    Sanity(String),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::FeeEstimate(ref x) => Some(x),
            Error::ScriptGen(ref x) => Some(x),
            Error::Witness(ref x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::FeeEstimate(ref x) => write!(f, "fee estimate: {}", x),
            Error::ScriptGen(ref x) => write!(f, "sweep script generation: {}", x),
            Error::Witness(ref x) => write!(f, "witness construction: {}", x),
            Error::Unbalanced { input_value, fee } => {
                write!(f, "inputs worth {} sat cannot pay {} sat fee", input_value, fee)
            }
            Error::Sanity(ref msg) => write!(f, "sanity check: {}", msg),
        }
    }
}

impl From<wallet::Error> for Error {
    fn from(e: wallet::Error) -> Error { Error::Witness(e) }
}

/// Everything the builder needs from the outside world.
pub struct SweepContext<'a> {
    /// Produces witnesses for the swept inputs
    pub signer: &'a dyn Signer,
    /// Source of the fee rate
    pub estimator: &'a dyn FeeEstimator,
    /// Source of the fresh destination script
    pub sweep_script: &'a dyn SweepScriptSource,
    /// Economic cut for stray inputs
    pub cut_stray_input: &'a CutStrayInput,
    /// Confirmation target for the fee estimate, in blocks
    pub conf_target: u32,
}

/// Sign and assemble the sweep transaction for a class of kindergarten
/// outputs. Returns the transaction (or `None` when every output was
/// diverted) together with the outputs the stray policy took.
pub fn create_sweep_tx(
    ctx: &SweepContext,
    kgtn_outputs: &[KidOutput],
    class_height: BlockHeight,
) -> Result<(Option<Transaction>, Vec<KidOutput>), Error> {
    let mut weight_estimate = TxWeightEstimator::new();

    // Our sweep transaction will pay to a single segwit p2wkh address,
    // ensure it contributes to our weight estimate.
    weight_estimate.add_p2wkh_output();

    let fee_per_kw = ctx.estimator
        .estimate_fee_per_kw(ctx.conf_target)
        .map_err(Error::FeeEstimate)?;

    // Partition the class into CSV and CLTV spends, diverting any input
    // that is not worth its weight at the current fee rate.
    let mut csv_inputs: Vec<KidOutput> = Vec::with_capacity(kgtn_outputs.len());
    let mut cltv_inputs: Vec<KidOutput> = Vec::with_capacity(kgtn_outputs.len());
    let mut diverted: Vec<KidOutput> = Vec::new();

    for input in kgtn_outputs {
        if (ctx.cut_stray_input)(fee_per_kw, input) {
            slog!(StrayInputCut,
                outpoint: *input.outpoint(),
                amount: input.amount().as_sat(),
            );
            diverted.push(input.clone());
            continue;
        }

        weight_estimate.add_witness_input_by_type(input.witness_type());

        match input.witness_type() {
            WitnessType::CommitmentTimeLock
            | WitnessType::HtlcOfferedTimeoutSecondLevel
            | WitnessType::HtlcAcceptedSuccessSecondLevel => {
                csv_inputs.push(input.clone());
            }
            WitnessType::HtlcOfferedRemoteTimeout => {
                cltv_inputs.push(input.clone());
            }
            wt => {
                log!(Warn, "kindergarten output {} has unexpected witness type {:?}",
                    input.outpoint(), wt);
                continue;
            }
        }
    }

    if csv_inputs.is_empty() && cltv_inputs.is_empty() {
        return Ok((None, diverted));
    }

    log!(Debug, "creating sweep transaction for {} CSV inputs, {} CLTV inputs",
        csv_inputs.len(), cltv_inputs.len());

    let tx_fee = fee_per_kw.fee_for_weight(weight_estimate.vsize());

    let tx = populate_sweep_tx(ctx, tx_fee, class_height, &csv_inputs, &cltv_inputs)?;
    Ok((Some(tx), diverted))
}

/// Build the final sweep transaction with all witnesses in place, paying
/// everything above the fee to a fresh wallet script.
pub fn populate_sweep_tx(
    ctx: &SweepContext,
    tx_fee: Amount,
    class_height: BlockHeight,
    csv_inputs: &[KidOutput],
    cltv_inputs: &[KidOutput],
) -> Result<Transaction, Error> {
    let pk_script = ctx.sweep_script.gen_sweep_script().map_err(Error::ScriptGen)?;

    let total: u64 = csv_inputs.iter().map(|o| o.amount().as_sat()).sum::<u64>()
        + cltv_inputs.iter().map(|o| o.amount().as_sat()).sum::<u64>();

    let sweep_amt = match total.checked_sub(tx_fee.as_sat()) {
        Some(amt) if amt > 0 => amt,
        _ => {
            return Err(Error::Unbalanced {
                input_value: total,
                fee: tx_fee.as_sat(),
            });
        }
    };

    // Version 2 is required for BIP-68 relative locktimes. The CSV delay
    // of each input rides in its sequence; CLTV inputs instead require the
    // transaction locktime to match the class height.
    let mut sweep_tx = Transaction {
        version: 2,
        lock_time: if cltv_inputs.is_empty() { 0 } else { class_height },
        input: Vec::with_capacity(csv_inputs.len() + cltv_inputs.len()),
        output: vec![TxOut {
            value: sweep_amt,
            script_pubkey: pk_script,
        }],
    };

    for input in csv_inputs {
        sweep_tx.input.push(TxIn {
            previous_output: *input.outpoint(),
            script_sig: Script::new(),
            sequence: input.blocks_to_maturity(),
            witness: Witness::default(),
        });
    }
    // A final sequence would disable the locktime check entirely, so cltv
    // inputs keep the zero sequence.
    for input in cltv_inputs {
        sweep_tx.input.push(TxIn {
            previous_output: *input.outpoint(),
            script_sig: Script::new(),
            sequence: 0,
            witness: Witness::default(),
        });
    }

    check_transaction_sanity(&sweep_tx)?;

    // The sighash covers outputs and locktime, so freeze the transaction
    // before any witness is produced.
    let unsigned_tx = sweep_tx.clone();
    let mut hash_cache = SighashCache::new(&unsigned_tx);

    for (idx, input) in csv_inputs.iter().enumerate() {
        let witness =
            input.build_witness(ctx.signer, &unsigned_tx, &mut hash_cache, idx)?;
        sweep_tx.input[idx].witness = witness;
    }

    // Offset so cltv witnesses don't land on csv inputs.
    let offset = csv_inputs.len();
    for (idx, input) in cltv_inputs.iter().enumerate() {
        let witness =
            input.build_witness(ctx.signer, &unsigned_tx, &mut hash_cache, offset + idx)?;
        sweep_tx.input[offset + idx].witness = witness;
    }

    Ok(sweep_tx)
}

/// Basic validity rules every transaction we hand to the broadcaster must
/// satisfy.
pub fn check_transaction_sanity(tx: &Transaction) -> Result<(), Error> {
    if tx.input.is_empty() {
        return Err(Error::Sanity("transaction has no inputs".into()));
    }
    if tx.output.is_empty() {
        return Err(Error::Sanity("transaction has no outputs".into()));
    }

    let mut total_out: u64 = 0;
    for output in &tx.output {
        if output.value == 0 {
            return Err(Error::Sanity("zero-value output".into()));
        }
        if output.value > MAX_MONEY {
            return Err(Error::Sanity("output above maximum money".into()));
        }
        total_out += output.value;
        if total_out > MAX_MONEY {
            return Err(Error::Sanity("outputs above maximum money".into()));
        }
    }

    for (i, input) in tx.input.iter().enumerate() {
        for other in &tx.input[i + 1..] {
            if input.previous_output == other.previous_output {
                return Err(Error::Sanity(format!(
                    "duplicate input {}", input.previous_output,
                )));
            }
        }
    }

    if tx.weight() > constants::MAXIMUM_SWEEP_TX_WEIGHT {
        return Err(Error::Sanity(format!(
            "weight {} above maximum {}", tx.weight(), constants::MAXIMUM_SWEEP_TX_WEIGHT,
        )));
    }

    Ok(())
}

/// The default stray policy: an input is uneconomical when the fee for the
/// weight it adds to a sweep meets or exceeds its value.
pub fn is_uneconomical(fee_rate: FeeRate, output: &dyn SpendableOutput) -> bool {
    let input_weight = wallet::INPUT_SIZE * ::bitcoin::blockdata::constants::WITNESS_SCALE_FACTOR
        + output.witness_type().witness_size();
    fee_rate.fee_for_weight(input_weight) >= output.amount()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use std::sync::Mutex;

    use bitcoin::hashes::Hash;
    use nursery::output::tests::dummy_kid;
    use wallet::tests::TestSigner;

    pub struct FixedEstimator(pub u64);

    impl FeeEstimator for FixedEstimator {
        fn estimate_fee_per_kw(&self, _conf_target: u32) -> Result<FeeRate, chain::Error> {
            Ok(FeeRate::from_sat_per_kw(self.0))
        }
    }

    /// Script source yielding a fresh-looking p2wkh script per call, so
    /// txid freshness is observable in tests.
    pub struct CountingScriptSource(pub Mutex<u32>);

    impl CountingScriptSource {
        pub fn new() -> CountingScriptSource {
            CountingScriptSource(Mutex::new(0))
        }
    }

    impl SweepScriptSource for CountingScriptSource {
        fn gen_sweep_script(&self) -> Result<Script, chain::Error> {
            let mut counter = self.0.lock().unwrap();
            *counter += 1;
            let hash = bitcoin::hashes::hash160::Hash::hash(&counter.to_be_bytes());
            Ok(Script::new_v0_p2wpkh(&bitcoin::WPubkeyHash::from_hash(hash)))
        }
    }

    fn no_cut() -> CutStrayInput {
        Box::new(|_, _| false)
    }

    fn economic_cut() -> CutStrayInput {
        Box::new(|rate, output| is_uneconomical(rate, output))
    }

    #[test]
    fn mixed_class_layout() {
        let signer = TestSigner::new();
        let scripts = CountingScriptSource::new();
        let estimator = FixedEstimator(2_500); // 10 sat/vB
        let cut = no_cut();
        let ctx = SweepContext {
            signer: &signer,
            estimator: &estimator,
            sweep_script: &scripts,
            cut_stray_input: &cut,
            conf_target: 6,
        };

        let commit = dummy_kid(1, 144, WitnessType::CommitmentTimeLock, 0);
        let mut remote = dummy_kid(2, 0, WitnessType::HtlcOfferedRemoteTimeout, 600);
        remote.set_conf_height(590);

        let (tx, diverted) =
            create_sweep_tx(&ctx, &[commit.clone(), remote.clone()], 600).unwrap();
        let tx = tx.expect("sweep built");
        assert!(diverted.is_empty());

        // CLTV input present: locktime pinned to the class height.
        assert_eq!(tx.lock_time, 600);
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.input[0].previous_output, *commit.outpoint());
        assert_eq!(tx.input[0].sequence, 144);
        assert_eq!(tx.input[1].previous_output, *remote.outpoint());
        assert_eq!(tx.input[1].sequence, 0);

        // One p2wkh output worth the inputs minus the fee.
        assert_eq!(tx.output.len(), 1);
        assert!(tx.output[0].script_pubkey.is_v0_p2wpkh());
        let mut estimate = TxWeightEstimator::new();
        estimate.add_p2wkh_output();
        estimate.add_witness_input_by_type(WitnessType::CommitmentTimeLock);
        estimate.add_witness_input_by_type(WitnessType::HtlcOfferedRemoteTimeout);
        let fee = FeeRate::from_sat_per_kw(2_500).fee_for_weight(estimate.vsize());
        assert_eq!(tx.output[0].value, 200_000 - fee.as_sat());

        // Every input carries a three-item witness ending in its script.
        for (i, input) in tx.input.iter().enumerate() {
            let items = input.witness.to_vec();
            assert_eq!(items.len(), 3, "input {}", i);
        }
    }

    #[test]
    fn csv_only_class_has_no_locktime() {
        let signer = TestSigner::new();
        let scripts = CountingScriptSource::new();
        let estimator = FixedEstimator(2_500);
        let cut = no_cut();
        let ctx = SweepContext {
            signer: &signer,
            estimator: &estimator,
            sweep_script: &scripts,
            cut_stray_input: &cut,
            conf_target: 6,
        };

        let commit = dummy_kid(3, 144, WitnessType::CommitmentTimeLock, 0);
        let (tx, _) = create_sweep_tx(&ctx, &[commit], 700).unwrap();
        assert_eq!(tx.unwrap().lock_time, 0);
    }

    #[test]
    fn uneconomical_inputs_are_diverted() {
        let signer = TestSigner::new();
        let scripts = CountingScriptSource::new();
        // At 250 sat/kw a commitment input costs ~90 sat to sweep.
        let estimator = FixedEstimator(250);
        let cut = economic_cut();
        let ctx = SweepContext {
            signer: &signer,
            estimator: &estimator,
            sweep_script: &scripts,
            cut_stray_input: &cut,
            conf_target: 6,
        };

        // 100_000 sat is comfortably economical, 50 sat is not.
        let healthy = dummy_kid(4, 144, WitnessType::CommitmentTimeLock, 0);
        let mut dust = dummy_kid(5, 1, WitnessType::CommitmentTimeLock, 0);
        // Rebuild the dust kid with a 50 sat descriptor.
        dust = {
            use wallet::tests::dummy_sign_desc;
            let sd = dummy_sign_desc(&signer.pubkey(), 50, 1);
            KidOutput::new(
                *dust.outpoint(), *dust.origin_chan_point(), 1,
                WitnessType::CommitmentTimeLock, sd, 0,
            )
        };

        let (tx, diverted) = create_sweep_tx(&ctx, &[healthy, dust.clone()], 800).unwrap();
        assert!(tx.is_some());
        assert_eq!(diverted, vec![dust]);
    }

    #[test]
    fn all_dust_class_builds_nothing() {
        let signer = TestSigner::new();
        let scripts = CountingScriptSource::new();
        let estimator = FixedEstimator(250);
        let cut = economic_cut();
        let ctx = SweepContext {
            signer: &signer,
            estimator: &estimator,
            sweep_script: &scripts,
            cut_stray_input: &cut,
            conf_target: 6,
        };

        let dust = {
            use wallet::tests::{dummy_outpoint, dummy_sign_desc};
            let sd = dummy_sign_desc(&signer.pubkey(), 50, 1);
            KidOutput::new(
                dummy_outpoint(6, 0), dummy_outpoint(0xcc, 1), 1,
                WitnessType::CommitmentTimeLock, sd, 0,
            )
        };

        let (tx, diverted) = create_sweep_tx(&ctx, &[dust.clone()], 900).unwrap();
        assert!(tx.is_none());
        assert_eq!(diverted, vec![dust]);
    }

    #[test]
    fn fee_above_input_value_fails() {
        let signer = TestSigner::new();
        let scripts = CountingScriptSource::new();
        // An absurd rate the inputs cannot pay, with diversion disabled.
        let estimator = FixedEstimator(100_000_000);
        let cut = no_cut();
        let ctx = SweepContext {
            signer: &signer,
            estimator: &estimator,
            sweep_script: &scripts,
            cut_stray_input: &cut,
            conf_target: 6,
        };

        let commit = dummy_kid(7, 144, WitnessType::CommitmentTimeLock, 0);
        match create_sweep_tx(&ctx, &[commit], 1_000) {
            Err(Error::Unbalanced { .. }) => {}
            x => panic!("expected Unbalanced, got {:?}", x),
        }
    }

    #[test]
    fn successive_builds_change_txid() {
        let signer = TestSigner::new();
        let scripts = CountingScriptSource::new();
        let estimator = FixedEstimator(2_500);
        let cut = no_cut();
        let ctx = SweepContext {
            signer: &signer,
            estimator: &estimator,
            sweep_script: &scripts,
            cut_stray_input: &cut,
            conf_target: 6,
        };

        let commit = dummy_kid(8, 144, WitnessType::CommitmentTimeLock, 0);
        let (a, _) = create_sweep_tx(&ctx, &[commit.clone()], 1_100).unwrap();
        let (b, _) = create_sweep_tx(&ctx, &[commit], 1_100).unwrap();
        assert_ne!(a.unwrap().txid(), b.unwrap().txid());
    }

    #[test]
    fn sanity_rejects_duplicates_and_empties() {
        use nursery::output::tests::dummy_timeout_tx;
        use wallet::tests::dummy_outpoint;

        let tx = dummy_timeout_tx(dummy_outpoint(9, 0));
        check_transaction_sanity(&tx).unwrap();

        let mut no_inputs = tx.clone();
        no_inputs.input.clear();
        assert!(check_transaction_sanity(&no_inputs).is_err());

        let mut dup = tx.clone();
        let copy = dup.input[0].clone();
        dup.input.push(copy);
        assert!(check_transaction_sanity(&dup).is_err());

        let mut zero_out = tx.clone();
        zero_out.output[0].value = 0;
        assert!(check_transaction_sanity(&zero_out).is_err());
    }
}
