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


//! # Stray Output Pool
//!
//! Buffers outputs whose sweep would currently cost more than they yield,
//! so they can be claimed in one batch once the fee environment improves.
//! Sweeping is on demand: a successful broadcast leaves the buffer
//! untouched, so the pool behaves as a retained ledger of small outputs
//! and a repeat sweep simply builds a conflicting claim of the same
//! outpoints.
//!

pub mod store;

pub use self::store::{PoolOutput, StrayOutput, StrayOutputStore};

use std::{error, fmt};
use std::sync::Arc;

use bitcoin::util::sighash::SighashCache;
use bitcoin::{Script, Transaction, TxIn, TxOut, Witness};
use sled;

use chain::{self, BroadcastError, Broadcaster, FeeEstimator, SweepScriptSource};
use nursery::sweep;
use wallet::{self, BaseOutput, FeeRate, Signer, SpendableOutput};

/// Stray pool error
#[derive(Debug)]
pub enum Error {
    /// The pool has nothing to sweep
    NoOutputs,
    /// Backing storage failure
    Store(store::Error),
    /// Fee estimation failure
    Chain(chain::Error),
    /// Witness construction failure
    Wallet(wallet::Error),
    /// The buffered outputs cannot pay the sweep fee
    Uneconomic {
        /// Total value of the buffered outputs, in satoshi
        total: u64,
        /// Fee the sweep would owe, in satoshi
        fee: u64,
    },
    /// The assembled sweep violates a basic validity rule
    Sweep(sweep::Error),
    /// Broadcast failure that was not a double spend
    Broadcast(BroadcastError),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::Store(ref x) => Some(x),
            Error::Chain(ref x) => Some(x),
            Error::Wallet(ref x) => Some(x),
            Error::Sweep(ref x) => Some(x),
            Error::Broadcast(ref x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NoOutputs => f.write_str("no stray outputs to sweep"),
            Error::Store(ref x) => write!(f, "stray store: {}", x),
            Error::Chain(ref x) => write!(f, "chain: {}", x),
            Error::Wallet(ref x) => write!(f, "wallet: {}", x),
            Error::Uneconomic { total, fee } => {
                write!(f, "stray outputs worth {} sat cannot pay {} sat fee", total, fee)
            }
            Error::Sweep(ref x) => write!(f, "sweep: {}", x),
            Error::Broadcast(ref x) => write!(f, "broadcast: {}", x),
        }
    }
}

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Error { Error::Store(e) }
}

impl From<chain::Error> for Error {
    fn from(e: chain::Error) -> Error { Error::Chain(e) }
}

impl From<wallet::Error> for Error {
    fn from(e: wallet::Error) -> Error { Error::Wallet(e) }
}

/// Collaborators of the stray output pool.
pub struct PoolConfig {
    /// Fee source for batch sweeps and the economic cut
    pub estimator: Arc<dyn FeeEstimator>,
    /// Witness signer
    pub signer: Arc<dyn Signer>,
    /// Broadcast endpoint
    pub broadcaster: Arc<dyn Broadcaster>,
    /// Fresh sweep destination scripts
    pub sweep_script: Arc<dyn SweepScriptSource>,
    /// Confirmation target, in blocks, for sweep fee estimates
    pub sweep_conf_target: u32,
}

/// The stray output pool server.
pub struct PoolServer {
    cfg: PoolConfig,
    store: StrayOutputStore,
}

impl PoolServer {
    /// Create a pool server over the given database.
    pub fn new(db: &sled::Db, cfg: PoolConfig) -> Result<PoolServer, Error> {
        Ok(PoolServer {
            cfg: cfg,
            store: StrayOutputStore::open(db)?,
        })
    }

    /// Reserved for future periodic auto-sweeping; the pool currently has
    /// no background behavior.
    pub fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Counterpart of [start]; nothing to wind down.
    pub fn stop(&self) {}

    /// The sweep-builder's economic cut: when the output is not worth
    /// sweeping at the given rate, take ownership of it and report the
    /// cut. On a storage failure the output is left to the sweep rather
    /// than risk losing track of it.
    pub fn cut_stray_input(&self, fee_rate: FeeRate, output: &dyn SpendableOutput) -> bool {
        if !sweep::is_uneconomical(fee_rate, output) {
            return false;
        }
        match self.add_spendable_output(output) {
            Ok(()) => true,
            Err(e) => {
                log!(Error, "unable to buffer stray output {}: {}", output.outpoint(), e);
                false
            }
        }
    }

    /// Append a spendable output to the durable buffer.
    pub fn add_spendable_output(&self, output: &dyn SpendableOutput) -> Result<(), Error> {
        let entry = StrayOutput::new(PoolOutput::Base(BaseOutput::new(
            output.amount(),
            *output.outpoint(),
            output.witness_type(),
            output.sign_desc().clone(),
        )));
        self.store.add_stray_output(&entry)?;
        Ok(())
    }

    /// Append an output whose witness must reveal a payment preimage.
    pub fn add_preimage_output(&self, output: wallet::PreimageOutput) -> Result<(), Error> {
        let entry = StrayOutput::new(PoolOutput::Preimage(output));
        self.store.add_stray_output(&entry)?;
        Ok(())
    }

    /// Build and broadcast one transaction claiming every buffered
    /// output. Entries stay in the buffer after a successful broadcast.
    pub fn sweep(&self) -> Result<(), Error> {
        let btx = self.gen_sweep_tx()?;

        let total: u64 = btx.output.iter().map(|out| out.value).sum();
        slog!(StraySweepBroadcast, txid: btx.txid(), total_amount: total,
            num_inputs: btx.input.len());

        match self.cfg.broadcaster.publish_transaction(&btx) {
            Ok(()) => Ok(()),
            Err(BroadcastError::DoubleSpend) => {
                slog!(DoubleSpendIgnored, txid: btx.txid());
                Ok(())
            }
            Err(e) => Err(Error::Broadcast(e)),
        }
    }

    /// Build the batch sweep without broadcasting it.
    pub fn gen_sweep_tx(&self) -> Result<Transaction, Error> {
        let entries = self.store.fetch_all_stray_outputs()?;
        let outputs: Vec<PoolOutput> = entries
            .into_iter()
            .flat_map(|entry| entry.outputs().to_vec())
            .collect();
        if outputs.is_empty() {
            return Err(Error::NoOutputs);
        }

        let pk_script = self.cfg.sweep_script.gen_sweep_script()?;
        self.gen_sweep_tx_for(pk_script, &outputs)
    }

    fn gen_sweep_tx_for(&self, pk_script: Script, outputs: &[PoolOutput])
        -> Result<Transaction, Error>
    {
        let fee_per_kw = self.cfg.estimator.estimate_fee_per_kw(self.cfg.sweep_conf_target)?;

        let mut weight_estimate = wallet::TxWeightEstimator::new();
        weight_estimate.add_p2wkh_output();

        let mut total: u64 = 0;
        for output in outputs {
            weight_estimate.add_witness_input_by_type(output.witness_type());
            total += output.amount().as_sat();
        }

        let tx_fee = fee_per_kw.fee_for_weight(weight_estimate.weight());
        let sweep_amt = match total.checked_sub(tx_fee.as_sat()) {
            Some(amt) if amt > 0 => amt,
            _ => {
                return Err(Error::Uneconomic {
                    total: total,
                    fee: tx_fee.as_sat(),
                });
            }
        };

        let mut txn = Transaction {
            version: 2,
            lock_time: 0,
            // A final sequence would disable both absolute and relative
            // locktime checks in the buffered witness scripts, so every
            // input keeps the zero sequence.
            input: outputs
                .iter()
                .map(|output| TxIn {
                    previous_output: *output.outpoint(),
                    script_sig: Script::new(),
                    sequence: 0,
                    witness: Witness::default(),
                })
                .collect(),
            output: vec![TxOut {
                value: sweep_amt,
                script_pubkey: pk_script,
            }],
        };

        // The sighash covers the output, so it must be in place before
        // witnesses are generated.
        let unsigned = txn.clone();
        let mut hash_cache = SighashCache::new(&unsigned);
        for (idx, output) in outputs.iter().enumerate() {
            let witness = output
                .build_witness(&*self.cfg.signer, &unsigned, &mut hash_cache, idx)?;
            txn.input[idx].witness = witness;
        }

        sweep::check_transaction_sanity(&txn).map_err(Error::Sweep)?;

        Ok(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use straypool::store::tests::{base_pool_output, preimage_pool_output};
    use nursery::sweep::tests::{CountingScriptSource, FixedEstimator};
    use wallet::tests::TestSigner;
    use wallet::WitnessType;

    use std::sync::Mutex;

    struct RecordingBroadcaster {
        published: Mutex<Vec<Transaction>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn publish_transaction(&self, tx: &Transaction) -> Result<(), BroadcastError> {
            self.published.lock().unwrap().push(tx.clone());
            Ok(())
        }
    }

    fn pool(fee_rate: u64) -> (sled::Db, PoolServer, Arc<RecordingBroadcaster>) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster {
            published: Mutex::new(Vec::new()),
        });
        let server = PoolServer::new(&db, PoolConfig {
            estimator: Arc::new(FixedEstimator(fee_rate)),
            signer: Arc::new(TestSigner::new()),
            broadcaster: broadcaster.clone(),
            sweep_script: Arc::new(CountingScriptSource::new()),
            sweep_conf_target: 6,
        }).unwrap();
        (db, server, broadcaster)
    }

    #[test]
    fn sweep_claims_every_buffered_output() {
        let (_db, server, broadcaster) = pool(500);

        let small = base_pool_output(1, 2_000);
        let htlc = preimage_pool_output(2, 3_000);
        server.add_spendable_output(&small).unwrap();
        match htlc {
            PoolOutput::Preimage(output) => server.add_preimage_output(output).unwrap(),
            _ => unreachable!(),
        }

        server.sweep().unwrap();
        let published = broadcaster.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let tx = &published[0];

        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.output.len(), 1);
        assert!(tx.output[0].value < 5_000);

        // The preimage-carrying input has a three-item witness whose
        // middle item is the 32-byte preimage.
        let witness = tx.input[1].witness.to_vec();
        assert_eq!(witness.len(), 3);
        assert_eq!(witness[1].len(), 32);
    }

    #[test]
    fn sweep_leaves_the_buffer_in_place() {
        let (_db, server, _broadcaster) = pool(500);
        server.add_spendable_output(&base_pool_output(3, 10_000)).unwrap();

        server.sweep().unwrap();

        // A second sweep still sees the entry and builds a conflicting
        // claim of the same outpoint.
        let again = server.gen_sweep_tx().unwrap();
        assert_eq!(
            again.input[0].previous_output,
            *base_pool_output(3, 10_000).outpoint(),
        );
    }

    #[test]
    fn empty_pool_has_nothing_to_sweep() {
        let (_db, server, _broadcaster) = pool(500);
        match server.gen_sweep_tx() {
            Err(Error::NoOutputs) => {}
            x => panic!("expected NoOutputs, got {:?}", x),
        }
    }

    #[test]
    fn uneconomic_batch_is_rejected() {
        let (_db, server, _broadcaster) = pool(1_000_000);
        server.add_spendable_output(&base_pool_output(4, 1_000)).unwrap();
        match server.gen_sweep_tx() {
            Err(Error::Uneconomic { .. }) => {}
            x => panic!("expected Uneconomic, got {:?}", x),
        }
    }

    #[test]
    fn cut_stray_input_buffers_only_dust() {
        let (_db, server, _broadcaster) = pool(500);

        let dust = base_pool_output(5, 50);
        let healthy = base_pool_output(6, 1_000_000);

        assert!(server.cut_stray_input(FeeRate::from_sat_per_kw(500), &dust));
        assert!(!server.cut_stray_input(FeeRate::from_sat_per_kw(500), &healthy));

        let entries = server.store.fetch_all_stray_outputs().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outputs()[0].outpoint(), dust.outpoint());
    }

    #[test]
    fn pool_output_kinds_report_their_weight() {
        let base = base_pool_output(7, 1_000);
        let pre = preimage_pool_output(8, 1_000);
        assert_eq!(
            base.witness_type().witness_size(),
            WitnessType::CommitmentTimeLock.witness_size(),
        );
        assert_eq!(
            pre.witness_type().witness_size(),
            WitnessType::HtlcAcceptedRemoteSuccess.witness_size(),
        );
    }
}
