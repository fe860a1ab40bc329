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


//! # UTXO Incubator Core
//!
//! The long-lived actor that drives incubating outputs through their state
//! machine. Outputs enter via [UtxoIncubator::incubate_outputs] when a
//! channel force-closes:
//!
//!  - commitment to-self outputs and incoming HTLCs wait in preschool
//!    until their parent transaction confirms, then move to kindergarten
//!    indexed at confirmation height plus CSV delay;
//!  - two-stage outgoing HTLCs wait in the crib until their CLTV expiry,
//!    at which point their pre-signed timeout transaction is broadcast;
//!    once it confirms they continue as kindergarten outputs;
//!  - outgoing HTLCs on the remote commitment wait in kindergarten for
//!    their absolute maturity height.
//!
//! Each new block graduates the class at that height: all kindergarten
//! outputs maturing there are swept in a single transaction, which is
//! signed once, persisted, and re-broadcast verbatim after a restart so
//! the txid for a class never changes. When the sweep confirms the
//! outputs graduate, and once every output of a channel has graduated the
//! channel's records are removed and the channel is marked fully closed.
//!
//! One mutex serializes every store mutation; block epochs are consumed
//! by a single loop and confirmation events by short-lived waiter
//! threads, all of which take the mutex before touching the store.
//!

pub mod output;
pub mod report;
pub mod store;
pub mod sweep;

pub use self::output::{BabyOutput, KidOutput};
pub use self::report::{ContractMaturityReport, HtlcMaturityReport};
pub use self::store::{NurseryStore, StateBucket};

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use std::{error, fmt, thread};

use bitcoin::{OutPoint, Transaction};
use logs;

use chain::{self, Broadcaster, BroadcastError, ChainIo, ChainNotifier, FeeEstimator,
            SweepScriptSource};
use channeldb::{self, ChannelDb};
use common::{constants, BlockHeight, ChainContext};
use self::sweep::{CutStrayInput, SweepContext};
use wallet::{CommitOutputResolution, IncomingHtlcResolution, OutgoingHtlcResolution, Signer,
             SpendableOutput, WitnessType};

/// Incubator error
#[derive(Debug)]
pub enum Error {
    /// Nursery store failure
    Store(store::Error),
    /// Chain interface failure
    Chain(chain::Error),
    /// Channel database failure
    ChannelDb(channeldb::Error),
    /// Sweep construction failure
    Sweep(sweep::Error),
    /// Broadcast failure that was not a double spend
    Broadcast(BroadcastError),
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match *self {
            Error::Store(ref x) => Some(x),
            Error::Chain(ref x) => Some(x),
            Error::ChannelDb(ref x) => Some(x),
            Error::Sweep(ref x) => Some(x),
            Error::Broadcast(ref x) => Some(x),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Store(ref x) => write!(f, "nursery store: {}", x),
            Error::Chain(ref x) => write!(f, "chain: {}", x),
            Error::ChannelDb(ref x) => write!(f, "channel db: {}", x),
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

impl From<channeldb::Error> for Error {
    fn from(e: channeldb::Error) -> Error { Error::ChannelDb(e) }
}

impl From<sweep::Error> for Error {
    fn from(e: sweep::Error) -> Error { Error::Sweep(e) }
}

/// The collaborators the incubator is instantiated with.
pub struct Config {
    /// Current-chain view, used to pick up blocks mined while a request
    /// was in flight and to replay missed heights at startup
    pub chain_io: Arc<dyn ChainIo>,
    /// Confirmations required before a watched transaction is considered
    /// final
    pub conf_depth: u32,
    /// Closed-channel summaries, and the place channels are marked fully
    /// closed once swept
    pub channel_db: Arc<dyn ChannelDb>,
    /// Fee source for sweep construction
    pub estimator: Arc<dyn FeeEstimator>,
    /// Fresh sweep destination scripts
    pub sweep_script: Arc<dyn SweepScriptSource>,
    /// Block-epoch and confirmation subscriptions
    pub notifier: Arc<dyn ChainNotifier>,
    /// Broadcast endpoint
    pub broadcaster: Arc<dyn Broadcaster>,
    /// Witness signer
    pub signer: Arc<dyn Signer>,
    /// The durable nursery index
    pub store: NurseryStore,
    /// Confirmation target, in blocks, for sweep fee estimates
    pub sweep_conf_target: u32,
    /// Diverts uneconomical inputs to the stray output pool. A `true`
    /// return means the pool took the output.
    pub cut_stray_input: CutStrayInput,
}

/// Height view shared between the incubator loop and the waiters. Guarded
/// by the same mutex that serializes store mutations.
struct State {
    best_height: BlockHeight,
}

struct Shared {
    started: AtomicBool,
    stopped: AtomicBool,
    cfg: Config,
    mutex: Mutex<State>,
    quit: Arc<AtomicBool>,
    waiters: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// What a waiter observed on its notification channel.
enum WaiterEvent<T> {
    /// The notification arrived
    Received(T),
    /// The channel closed without delivering
    Closed,
    /// The incubator is shutting down
    Quit,
}

/// Block on a notification channel until it delivers, it closes, or the
/// shutdown flag is raised.
fn wait_recv<T>(rx: &mpsc::Receiver<T>, quit: &AtomicBool) -> WaiterEvent<T> {
    loop {
        if quit.load(Ordering::SeqCst) {
            return WaiterEvent::Quit;
        }
        let interval = Duration::from_millis(constants::WAITER_POLL_INTERVAL_MS);
        match rx.recv_timeout(interval) {
            Ok(value) => return WaiterEvent::Received(value),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return WaiterEvent::Closed,
        }
    }
}

/// The incubator. Cheap to clone; every clone drives the same instance.
#[derive(Clone)]
pub struct UtxoIncubator {
    shared: Arc<Shared>,
}

impl UtxoIncubator {
    /// Create an incubator around its collaborators. Nothing runs until
    /// [start] is called.
    pub fn new(cfg: Config) -> UtxoIncubator {
        UtxoIncubator {
            shared: Arc::new(Shared {
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                cfg: cfg,
                mutex: Mutex::new(State { best_height: 0 }),
                quit: Arc::new(AtomicBool::new(false)),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run startup recovery and spawn the incubator loop. Calling start a
    /// second time is a no-op.
    pub fn start(&self) -> Result<(), Error> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Subscribe before any recovery work so no block connected during
        // recovery is missed.
        let epoch_rx = self.shared.cfg.notifier.register_block_epoch_ntfn()?;

        // Flush channels that finished incubating while we were offline.
        let pending_closes = self.shared.cfg.channel_db.fetch_closed_channels(true)?;
        for pending in &pending_closes {
            self.close_and_remove_if_mature(&pending.chan_point)?;
        }

        let last_graduated = self.shared.cfg.store.last_graduated_height()?;
        slog!(IncubatorStarted, last_graduated_height: last_graduated);

        self.reload_preschool()?;
        self.reload_classes(last_graduated)?;

        let incubator = self.clone();
        self.spawn_waiter(move || incubator.incubator_loop(epoch_rx));

        Ok(())
    }

    /// Signal shutdown and wait for the loop and every outstanding waiter
    /// to finish. Calling stop a second time is a no-op.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        slog!(IncubatorShutdown);
        self.shared.quit.store(true, Ordering::SeqCst);

        loop {
            let handle = self.shared.waiters.lock().unwrap().pop();
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }

    /// Hand the outputs of a freshly force-closed channel to the
    /// incubator.
    pub fn incubate_outputs(
        &self,
        chan_point: OutPoint,
        commit_res: Option<&CommitOutputResolution>,
        outgoing_htlcs: &[OutgoingHtlcResolution],
        incoming_htlcs: &[IncomingHtlcResolution],
    ) -> Result<(), Error> {
        let num_htlcs = outgoing_htlcs.len() + incoming_htlcs.len();
        let mut kid_outputs: Vec<KidOutput> = Vec::with_capacity(1 + incoming_htlcs.len());
        let mut baby_outputs: Vec<BabyOutput> = Vec::with_capacity(outgoing_htlcs.len());

        // The commit resolution is absent when our to-self output was dust;
        // a zero-valued output likewise has nothing to incubate.
        let mut has_commit = false;
        if let Some(res) = commit_res {
            has_commit = true;
            let self_output = KidOutput::new(
                res.self_outpoint,
                chan_point,
                res.maturity_delay,
                WitnessType::CommitmentTimeLock,
                res.self_output_sign_desc.clone(),
                0,
            );
            if self_output.amount().as_sat() > 0 {
                kid_outputs.push(self_output);
            }
        }

        // Incoming HTLCs enter as second-level success outputs; their
        // timelock starts once the success transaction confirms.
        for htlc_res in incoming_htlcs {
            let htlc_output = KidOutput::new(
                htlc_res.claim_outpoint,
                chan_point,
                htlc_res.csv_delay,
                WitnessType::HtlcAcceptedSuccessSecondLevel,
                htlc_res.sweep_sign_desc.clone(),
                0,
            );
            if htlc_output.amount().as_sat() > 0 {
                kid_outputs.push(htlc_output);
            }
        }

        for htlc_res in outgoing_htlcs {
            // On our own commitment the HTLC needs its second-level
            // timeout transaction, so it starts in the crib.
            if htlc_res.signed_timeout_tx.is_some() {
                let htlc_output = BabyOutput::new(&chan_point, htlc_res);
                if htlc_output.amount().as_sat() > 0 {
                    baby_outputs.push(htlc_output);
                }
                continue;
            }

            // On the remote commitment the output is claimable directly
            // once the absolute timelock expires.
            let htlc_output = KidOutput::new(
                htlc_res.claim_outpoint,
                chan_point,
                0,
                WitnessType::HtlcOfferedRemoteTimeout,
                htlc_res.sweep_sign_desc.clone(),
                htlc_res.expiry,
            );
            kid_outputs.push(htlc_output);
        }

        slog!(IncubatingChannel, channel: chan_point, has_commit: has_commit,
            num_htlcs: num_htlcs);

        let state = self.shared.mutex.lock().unwrap();

        self.shared.cfg.store.incubate(&kid_outputs, &baby_outputs)?;

        // Blocks may have been mined while this request was in flight;
        // babies that are already expired sweep immediately.
        let (_, best_height) = self.shared.cfg.chain_io.get_best_block()?;
        for baby in &baby_outputs {
            if best_height >= baby.expiry() {
                slog!(ImmediateCribSweep, outpoint: *baby.outpoint(),
                    expiry: baby.expiry());
                self.sweep_crib_output(best_height, baby)?;
            }
        }

        for kid in &kid_outputs {
            self.register_preschool_conf(kid, state.best_height)?;
        }

        Ok(())
    }

    /// Build the maturity report for a channel previously handed to the
    /// incubator.
    pub fn nursery_report(&self, chan_point: &OutPoint)
        -> Result<ContractMaturityReport, Error>
    {
        let _state = self.shared.mutex.lock().unwrap();

        let mut report = ContractMaturityReport::new(*chan_point);
        self.shared.cfg.store.for_chan_outputs(chan_point, |bucket, raw| {
            match bucket {
                StateBucket::Crib => {
                    // Cribs are the only records stored as babies.
                    let baby = BabyOutput::decode(&mut Cursor::new(raw))?;
                    report.add_limbo_stage1_timeout_htlc(&baby);
                }
                StateBucket::Pscl => {
                    let kid = KidOutput::decode(&mut Cursor::new(raw))?;
                    match kid.witness_type() {
                        WitnessType::CommitmentTimeLock => {
                            report.add_limbo_commitment(&kid);
                        }
                        // A second-level success transaction that has not
                        // confirmed yet.
                        WitnessType::HtlcAcceptedSuccessSecondLevel => {
                            report.add_limbo_stage1_success_htlc(&kid);
                        }
                        _ => {}
                    }
                }
                StateBucket::Kndr => {
                    let kid = KidOutput::decode(&mut Cursor::new(raw))?;
                    match kid.witness_type() {
                        WitnessType::CommitmentTimeLock => {
                            report.add_limbo_commitment(&kid);
                        }
                        WitnessType::HtlcOfferedRemoteTimeout => {
                            report.add_limbo_direct_htlc(&kid);
                        }
                        WitnessType::HtlcAcceptedSuccessSecondLevel
                        | WitnessType::HtlcOfferedTimeoutSecondLevel => {
                            report.add_limbo_stage2_htlc(&kid);
                        }
                        _ => {}
                    }
                }
                StateBucket::Grad => {
                    let kid = KidOutput::decode(&mut Cursor::new(raw))?;
                    match kid.witness_type() {
                        WitnessType::CommitmentTimeLock => {
                            report.add_recovered_commitment(&kid);
                        }
                        WitnessType::HtlcAcceptedSuccessSecondLevel
                        | WitnessType::HtlcOfferedTimeoutSecondLevel
                        | WitnessType::HtlcOfferedRemoteTimeout => {
                            report.add_recovered_htlc(&kid);
                        }
                        _ => {}
                    }
                }
            }
            Ok(())
        })?;

        Ok(report)
    }

    /// Re-register confirmation watches for every preschool output, using
    /// the channel close height (with a reorg buffer) as the scan hint.
    fn reload_preschool(&self) -> Result<(), Error> {
        let preschools = self.shared.cfg.store.fetch_preschools()?;

        for kid in &preschools {
            let chan_point = kid.origin_chan_point();
            let summary = match self.shared.cfg.channel_db.fetch_closed_channel(chan_point) {
                Ok(summary) => summary,
                Err(channeldb::Error::ClosedChannelNotFound) => {
                    // The close summary is only removed after a channel is
                    // swept completely, so this should not happen.
                    slog!(ChannelCloseSummaryMissing, channel: *chan_point);
                    continue;
                }
                Err(e) => return Err(Error::ChannelDb(e)),
            };

            let height_hint = summary.close_height.saturating_sub(self.shared.cfg.conf_depth);
            self.register_preschool_conf(kid, height_hint)?;
        }

        Ok(())
    }

    /// Replay height-dependent state transitions: re-register watches for
    /// already-graduated heights that still have outputs in flight, then
    /// graduate every class mined while the incubator was offline.
    fn reload_classes(&self, last_graduated: BlockHeight) -> Result<(), Error> {
        let active_heights = self.shared.cfg.store.heights_below_or_equal(last_graduated)?;

        for class_height in active_heights {
            slog!(RegraduatingHeight, height: class_height);
            self.regraduate_class(class_height)?;
        }

        let (_, best_height) = self.shared.cfg.chain_io.get_best_block()?;

        // Nothing has ever graduated, or we are already caught up.
        if last_graduated == 0 || best_height == last_graduated {
            return Ok(());
        }

        slog!(ReplayingMissedBlocks, from: last_graduated + 1, to: best_height);
        for class_height in last_graduated + 1..=best_height {
            self.graduate_class(class_height)?;
        }

        Ok(())
    }

    /// Re-register confirmations for all still-active outputs at a height
    /// processed before a restart. No signing happens here: the finalized
    /// transaction is re-broadcast byte-for-byte, and crib timeout
    /// transactions were pre-signed by the wallet.
    fn regraduate_class(&self, class_height: BlockHeight) -> Result<(), Error> {
        let _state = self.shared.mutex.lock().unwrap();

        let (final_tx, kgtn_outputs, crib_outputs) =
            self.shared.cfg.store.fetch_class(class_height)?;

        if let Some(ref final_tx) = final_tx {
            self.sweep_mature_outputs(class_height, final_tx, &kgtn_outputs)?;
        }

        for baby in &crib_outputs {
            self.sweep_crib_output(class_height, baby)?;
        }

        Ok(())
    }

    /// Single consumer of the block-epoch stream.
    fn incubator_loop(&self, epoch_rx: mpsc::Receiver<chain::BlockEpoch>) {
        loop {
            match wait_recv(&epoch_rx, &self.shared.quit) {
                WaiterEvent::Received(epoch) => {
                    logs::set_chain_context(ChainContext {
                        best_height: epoch.height,
                    });
                    if let Err(e) = self.graduate_class(epoch.height) {
                        slog!(ClassGraduationFailed, height: epoch.height,
                            error: e.to_string());
                    }
                }
                WaiterEvent::Closed => {
                    // The notifier is exiting, so the daemon is as well.
                    slog!(NotifierChannelClosed, waiter: "incubator");
                    return;
                }
                WaiterEvent::Quit => return,
            }
        }
    }

    /// Process the class at a height: finalize (signing at most once per
    /// height), broadcast, and register graduation on confirmation.
    fn graduate_class(&self, class_height: BlockHeight) -> Result<(), Error> {
        let mut state = self.shared.mutex.lock().unwrap();
        state.best_height = class_height;

        let (mut final_tx, mut kgtn_outputs, crib_outputs) =
            self.shared.cfg.store.fetch_class(class_height)?;

        slog!(GraduatingClass, height: class_height, num_kids: kgtn_outputs.len(),
            num_babies: crib_outputs.len());

        let last_finalized = self.shared.cfg.store.last_finalized_height()?;

        // First visit to this height: craft the sweep, divert what is not
        // worth sweeping, and persist the result so a restart never signs
        // a different transaction for this class.
        if class_height > last_finalized {
            let mut diverted = Vec::new();
            if !kgtn_outputs.is_empty() {
                let ctx = SweepContext {
                    signer: &*self.shared.cfg.signer,
                    estimator: &*self.shared.cfg.estimator,
                    sweep_script: &*self.shared.cfg.sweep_script,
                    cut_stray_input: &self.shared.cfg.cut_stray_input,
                    conf_target: self.shared.cfg.sweep_conf_target,
                };
                let (tx, strays) = sweep::create_sweep_tx(&ctx, &kgtn_outputs, class_height)?;
                final_tx = tx;
                diverted = strays;
            }

            // The stray pool owns the diverted outputs now.
            for stray in &diverted {
                self.shared.cfg.store.divert_kinder(stray)?;
            }
            if !diverted.is_empty() {
                let gone: HashSet<OutPoint> =
                    diverted.iter().map(|kid| *kid.outpoint()).collect();
                kgtn_outputs.retain(|kid| !gone.contains(kid.outpoint()));
            }

            // A nil transaction still finalizes the height, marking it
            // processed.
            self.shared.cfg.store.finalize_kinder(class_height, final_tx.as_ref())?;
            slog!(FinalizedKindergarten, height: class_height,
                txid: final_tx.as_ref().map(|tx| tx.txid()));
        }

        if let Some(ref final_tx) = final_tx {
            self.sweep_mature_outputs(class_height, final_tx, &kgtn_outputs)?;
        }

        // Crib timeout transactions are pre-signed, so their txids are
        // fixed and need no finalization.
        for baby in &crib_outputs {
            self.sweep_crib_output(class_height, baby)?;
        }

        self.shared.cfg.store.graduate_height(class_height)?;
        Ok(())
    }

    /// Broadcast a finalized sweep and watch for its confirmation.
    fn sweep_mature_outputs(
        &self,
        class_height: BlockHeight,
        final_tx: &Transaction,
        kgtn_outputs: &[KidOutput],
    ) -> Result<(), Error> {
        slog!(SweepBroadcast, txid: final_tx.txid(), num_outputs: kgtn_outputs.len(),
            height: class_height);

        match self.shared.cfg.broadcaster.publish_transaction(final_tx) {
            Ok(()) => {}
            Err(BroadcastError::DoubleSpend) => {
                slog!(DoubleSpendIgnored, txid: final_tx.txid());
            }
            Err(e) => {
                log!(Error, "unable to broadcast sweep tx {}: {}", final_tx.txid(), e);
                return Err(Error::Broadcast(e));
            }
        }

        self.register_sweep_conf(final_tx, kgtn_outputs, class_height)
    }

    /// Register the sweep for confirmation and spawn the waiter that
    /// graduates the class.
    fn register_sweep_conf(
        &self,
        final_tx: &Transaction,
        kgtn_outputs: &[KidOutput],
        height_hint: BlockHeight,
    ) -> Result<(), Error> {
        let txid = final_tx.txid();
        let conf_rx = self.shared.cfg.notifier.register_confirmations_ntfn(
            &txid,
            &final_tx.output[0].script_pubkey,
            self.shared.cfg.conf_depth,
            height_hint,
        )?;
        slog!(RegisteredConfWatch, txid: txid, height_hint: height_hint);

        let incubator = self.clone();
        let outputs = kgtn_outputs.to_vec();
        self.spawn_waiter(move || {
            incubator.wait_for_sweep_conf(height_hint, outputs, conf_rx);
        });

        Ok(())
    }

    /// Waiter: once the class sweep confirms, graduate its outputs and
    /// retire any channel that has nothing left in the nursery.
    fn wait_for_sweep_conf(
        &self,
        class_height: BlockHeight,
        kgtn_outputs: Vec<KidOutput>,
        conf_rx: mpsc::Receiver<chain::TxConfirmation>,
    ) {
        match wait_recv(&conf_rx, &self.shared.quit) {
            WaiterEvent::Received(_) => {}
            WaiterEvent::Closed => {
                slog!(NotifierChannelClosed, waiter: "sweep-conf");
                return;
            }
            WaiterEvent::Quit => return,
        }

        let _state = self.shared.mutex.lock().unwrap();

        if let Err(e) = self.shared.cfg.store.graduate_kinder(class_height) {
            log!(Error, "unable to graduate {} kindergarten outputs: {}",
                kgtn_outputs.len(), e);
            return;
        }
        slog!(KindergartenGraduated, height: class_height,
            num_outputs: kgtn_outputs.len());

        let possible_closes: HashSet<OutPoint> = kgtn_outputs
            .iter()
            .map(|kid| *kid.origin_chan_point())
            .collect();

        for chan_point in &possible_closes {
            if let Err(e) = self.close_and_remove_if_mature(chan_point) {
                log!(Error, "failed to close and remove channel {}: {}", chan_point, e);
                return;
            }
        }
    }

    /// Broadcast a crib output's pre-signed timeout transaction and watch
    /// for its confirmation.
    fn sweep_crib_output(&self, _class_height: BlockHeight, baby: &BabyOutput)
        -> Result<(), Error>
    {
        let timeout_txid = baby.timeout_tx().txid();
        slog!(TimeoutTxBroadcast, txid: timeout_txid, outpoint: *baby.outpoint());

        match self.shared.cfg.broadcaster.publish_transaction(baby.timeout_tx()) {
            Ok(()) => {}
            Err(BroadcastError::DoubleSpend) => {
                slog!(DoubleSpendIgnored, txid: timeout_txid);
            }
            Err(e) => {
                log!(Error, "unable to broadcast timeout tx {}: {}", timeout_txid, e);
                return Err(Error::Broadcast(e));
            }
        }

        self.register_timeout_conf(baby)
    }

    /// Register a timeout transaction for confirmation and spawn the
    /// waiter that promotes the baby to kindergarten.
    fn register_timeout_conf(&self, baby: &BabyOutput) -> Result<(), Error> {
        let timeout_txid = baby.timeout_tx().txid();
        // The timeout transaction becomes valid at the baby's expiry, so
        // that is the tightest scan hint.
        let height_hint = baby.expiry();
        let conf_rx = self.shared.cfg.notifier.register_confirmations_ntfn(
            &timeout_txid,
            &baby.timeout_tx().output[0].script_pubkey,
            self.shared.cfg.conf_depth,
            height_hint,
        )?;
        slog!(RegisteredConfWatch, txid: timeout_txid, height_hint: height_hint);

        let incubator = self.clone();
        let baby = baby.clone();
        self.spawn_waiter(move || incubator.wait_for_timeout_conf(baby, conf_rx));

        Ok(())
    }

    /// Waiter: once the timeout transaction confirms, move the baby into
    /// kindergarten with its now-known maturity height.
    fn wait_for_timeout_conf(
        &self,
        mut baby: BabyOutput,
        conf_rx: mpsc::Receiver<chain::TxConfirmation>,
    ) {
        match wait_recv(&conf_rx, &self.shared.quit) {
            WaiterEvent::Received(conf) => {
                baby.set_conf_height(conf.block_height);
            }
            WaiterEvent::Closed => {
                slog!(NotifierChannelClosed, waiter: "timeout-conf");
                return;
            }
            WaiterEvent::Quit => return,
        }

        let _state = self.shared.mutex.lock().unwrap();

        if let Err(e) = self.shared.cfg.store.crib_to_kinder(&baby) {
            log!(Error, "unable to move htlc output {} from crib to kindergarten: {}",
                baby.outpoint(), e);
            return;
        }
        slog!(OutputPromoted, outpoint: *baby.outpoint(),
            maturity_height: baby.kid().maturity_height());
    }

    /// Register a preschool output's parent transaction for confirmation
    /// and spawn the waiter that promotes the kid.
    fn register_preschool_conf(&self, kid: &KidOutput, height_hint: BlockHeight)
        -> Result<(), Error>
    {
        let txid = kid.outpoint().txid;
        let pk_script = kid.sign_desc().output.script_pubkey.clone();

        let conf_rx = self.shared.cfg.notifier.register_confirmations_ntfn(
            &txid,
            &pk_script,
            self.shared.cfg.conf_depth,
            height_hint,
        )?;
        slog!(RegisteredConfWatch, txid: txid, height_hint: height_hint);

        let incubator = self.clone();
        let kid = kid.clone();
        self.spawn_waiter(move || incubator.wait_for_preschool_conf(kid, conf_rx));

        Ok(())
    }

    /// Waiter: once the parent transaction confirms, the kid's maturity
    /// height is known and it moves to kindergarten.
    fn wait_for_preschool_conf(
        &self,
        mut kid: KidOutput,
        conf_rx: mpsc::Receiver<chain::TxConfirmation>,
    ) {
        match wait_recv(&conf_rx, &self.shared.quit) {
            WaiterEvent::Received(conf) => {
                kid.set_conf_height(conf.block_height);
            }
            WaiterEvent::Closed => {
                slog!(NotifierChannelClosed, waiter: "preschool-conf");
                return;
            }
            WaiterEvent::Quit => return,
        }

        let _state = self.shared.mutex.lock().unwrap();

        if let Err(e) = self.shared.cfg.store.preschool_to_kinder(&kid) {
            log!(Error, "unable to move output {} from preschool to kindergarten: {}",
                kid.outpoint(), e);
            return;
        }
        slog!(OutputPromoted, outpoint: *kid.outpoint(),
            maturity_height: kid.maturity_height());
    }

    /// Remove a channel from the nursery iff every one of its outputs has
    /// graduated, then mark it fully closed in the channel database.
    fn close_and_remove_if_mature(&self, chan_point: &OutPoint) -> Result<(), Error> {
        let is_mature = match self.shared.cfg.store.is_mature_channel(chan_point) {
            Err(store::Error::ContractNotFound) => return Ok(()),
            Err(e) => {
                log!(Error, "unable to determine maturity of channel {}", chan_point);
                return Err(Error::Store(e));
            }
            Ok(is_mature) => is_mature,
        };

        // Nothing to do while the channel is still incubating.
        if !is_mature {
            return Ok(());
        }

        // This is the only place the incubator removes a channel, which
        // preserves the invariant that removal implies maturity.
        self.shared.cfg.store.remove_channel(chan_point)?;
        self.shared.cfg.channel_db.mark_chan_fully_closed(chan_point)?;
        slog!(ChannelRemoved, channel: *chan_point);

        Ok(())
    }

    fn spawn_waiter<F: FnOnce() + Send + 'static>(&self, body: F) {
        let handle = thread::spawn(body);
        self.shared.waiters.lock().unwrap().push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    use bitcoin::consensus::serialize;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, BlockHash, Script, Txid};

    use channeldb::ChannelCloseSummary;
    use nursery::output::tests::dummy_timeout_tx;
    use nursery::store::tests::temp_store;
    use nursery::sweep::tests::{CountingScriptSource, FixedEstimator};
    use sled;
    use wallet::tests::{dummy_outpoint, dummy_sign_desc, TestSigner};

    /// Notifier double: registrations are recorded, confirmations are
    /// injected by the test.
    struct MockNotifier {
        epoch_subs: StdMutex<Vec<mpsc::Sender<chain::BlockEpoch>>>,
        conf_watches: StdMutex<Vec<(Txid, u32, BlockHeight, mpsc::Sender<chain::TxConfirmation>)>>,
    }

    impl MockNotifier {
        fn new() -> MockNotifier {
            MockNotifier {
                epoch_subs: StdMutex::new(Vec::new()),
                conf_watches: StdMutex::new(Vec::new()),
            }
        }

        /// Deliver a confirmation for every watch on the txid.
        fn confirm(&self, txid: &Txid, block_height: BlockHeight) {
            let mut watches = self.conf_watches.lock().unwrap();
            watches.retain(|&(watch_txid, _, _, ref sender)| {
                if watch_txid == *txid {
                    let _ = sender.send(chain::TxConfirmation {
                        block_hash: BlockHash::hash(&block_height.to_be_bytes()),
                        block_height: block_height,
                    });
                    false
                } else {
                    true
                }
            });
        }

        fn watched_txids(&self) -> Vec<Txid> {
            self.conf_watches.lock().unwrap().iter().map(|w| w.0).collect()
        }
    }

    impl ChainNotifier for MockNotifier {
        fn register_block_epoch_ntfn(&self)
            -> Result<mpsc::Receiver<chain::BlockEpoch>, chain::Error>
        {
            let (sender, receiver) = mpsc::channel();
            self.epoch_subs.lock().unwrap().push(sender);
            Ok(receiver)
        }

        fn register_confirmations_ntfn(
            &self,
            txid: &Txid,
            _pk_script: &Script,
            conf_depth: u32,
            height_hint: BlockHeight,
        ) -> Result<mpsc::Receiver<chain::TxConfirmation>, chain::Error> {
            let (sender, receiver) = mpsc::channel();
            self.conf_watches.lock().unwrap().push((*txid, conf_depth, height_hint, sender));
            Ok(receiver)
        }
    }

    struct MockChainIo {
        height: StdMutex<BlockHeight>,
    }

    impl ChainIo for MockChainIo {
        fn get_best_block(&self) -> Result<(BlockHash, BlockHeight), chain::Error> {
            let height = *self.height.lock().unwrap();
            Ok((BlockHash::hash(&height.to_be_bytes()), height))
        }
    }

    struct MockBroadcaster {
        published: StdMutex<Vec<Transaction>>,
    }

    impl MockBroadcaster {
        fn published(&self) -> Vec<Transaction> {
            self.published.lock().unwrap().clone()
        }
    }

    impl Broadcaster for MockBroadcaster {
        fn publish_transaction(&self, tx: &Transaction) -> Result<(), BroadcastError> {
            self.published.lock().unwrap().push(tx.clone());
            Ok(())
        }
    }

    struct MemChannelDb {
        channels: StdMutex<HashMap<OutPoint, ChannelCloseSummary>>,
        fully_closed: StdMutex<Vec<OutPoint>>,
    }

    impl MemChannelDb {
        fn new() -> MemChannelDb {
            MemChannelDb {
                channels: StdMutex::new(HashMap::new()),
                fully_closed: StdMutex::new(Vec::new()),
            }
        }

        fn insert(&self, summary: ChannelCloseSummary) {
            self.channels.lock().unwrap().insert(summary.chan_point, summary);
        }

        fn fully_closed(&self) -> Vec<OutPoint> {
            self.fully_closed.lock().unwrap().clone()
        }
    }

    impl ChannelDb for MemChannelDb {
        fn fetch_closed_channels(&self, pending_only: bool)
            -> Result<Vec<ChannelCloseSummary>, channeldb::Error>
        {
            let channels = self.channels.lock().unwrap();
            Ok(channels
                .values()
                .filter(|summary| !pending_only || summary.is_pending)
                .cloned()
                .collect())
        }

        fn fetch_closed_channel(&self, chan_point: &OutPoint)
            -> Result<ChannelCloseSummary, channeldb::Error>
        {
            self.channels
                .lock()
                .unwrap()
                .get(chan_point)
                .cloned()
                .ok_or(channeldb::Error::ClosedChannelNotFound)
        }

        fn mark_chan_fully_closed(&self, chan_point: &OutPoint)
            -> Result<(), channeldb::Error>
        {
            let mut closed = self.fully_closed.lock().unwrap();
            if !closed.contains(chan_point) {
                closed.push(*chan_point);
            }
            let mut channels = self.channels.lock().unwrap();
            if let Some(summary) = channels.get_mut(chan_point) {
                summary.is_pending = false;
            }
            Ok(())
        }
    }

    struct Harness {
        incubator: UtxoIncubator,
        notifier: Arc<MockNotifier>,
        chain: Arc<MockChainIo>,
        broadcaster: Arc<MockBroadcaster>,
        channel_db: Arc<MemChannelDb>,
        store: NurseryStore,
        strays: Arc<StdMutex<Vec<OutPoint>>>,
        _db: sled::Db,
    }

    fn harness(best_height: BlockHeight, cut_dust: bool) -> Harness {
        let (db, store) = temp_store();
        let notifier = Arc::new(MockNotifier::new());
        let chain = Arc::new(MockChainIo {
            height: StdMutex::new(best_height),
        });
        let broadcaster = Arc::new(MockBroadcaster {
            published: StdMutex::new(Vec::new()),
        });
        let channel_db = Arc::new(MemChannelDb::new());
        let strays = Arc::new(StdMutex::new(Vec::new()));

        let cut_strays = strays.clone();
        let cut_stray_input: CutStrayInput = if cut_dust {
            Box::new(move |fee_rate, output| {
                if sweep::is_uneconomical(fee_rate, output) {
                    cut_strays.lock().unwrap().push(*output.outpoint());
                    true
                } else {
                    false
                }
            })
        } else {
            Box::new(|_, _| false)
        };

        let cfg = Config {
            chain_io: chain.clone(),
            conf_depth: 3,
            channel_db: channel_db.clone(),
            estimator: Arc::new(FixedEstimator(2_500)),
            sweep_script: Arc::new(CountingScriptSource::new()),
            notifier: notifier.clone(),
            broadcaster: broadcaster.clone(),
            signer: Arc::new(TestSigner::new()),
            store: store.clone(),
            sweep_conf_target: 6,
            cut_stray_input: cut_stray_input,
        };

        Harness {
            incubator: UtxoIncubator::new(cfg),
            notifier: notifier,
            chain: chain,
            broadcaster: broadcaster,
            channel_db: channel_db,
            store: store,
            strays: strays,
            _db: db,
        }
    }

    fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {}", what);
    }

    fn commit_resolution(value: u64, csv: u32, tag: u8) -> CommitOutputResolution {
        let signer = TestSigner::new();
        CommitOutputResolution {
            self_outpoint: dummy_outpoint(tag, 0),
            self_output_sign_desc: dummy_sign_desc(&signer.pubkey(), value, csv),
            maturity_delay: csv,
        }
    }

    fn close_summary(chan_point: OutPoint, close_height: BlockHeight) -> ChannelCloseSummary {
        ChannelCloseSummary {
            chan_point: chan_point,
            close_height: close_height,
            settled_balance: Amount::from_sat(500_000),
            is_pending: true,
        }
    }

    /// Commitment-only channel, happy path: preschool, kindergarten at
    /// conf + csv, sweep at maturity, graduation and removal once the
    /// sweep confirms.
    #[test]
    fn commitment_only_happy_path() {
        let b0 = 1_000;
        let h = harness(b0, false);
        let chan_point = dummy_outpoint(0xaa, 0);
        h.channel_db.insert(close_summary(chan_point, b0));

        let res = commit_resolution(500_000, 144, 1);
        let commit_outpoint = res.self_outpoint;
        h.incubator
            .incubate_outputs(chan_point, Some(&res), &[], &[])
            .unwrap();

        // In preschool, with a watch on the commitment txid.
        assert_eq!(h.store.fetch_preschools().unwrap().len(), 1);
        assert_eq!(h.notifier.watched_txids(), vec![commit_outpoint.txid]);

        // Commitment confirms at depth 3.
        h.notifier.confirm(&commit_outpoint.txid, b0 + 3);
        wait_until("kid in kindergarten", || {
            h.store.fetch_preschools().unwrap().is_empty()
        });
        let maturity = b0 + 3 + 144;
        let (_, kids, _) = h.store.fetch_class(maturity).unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].conf_height(), b0 + 3);

        // The maturity height arrives: a sweep is finalized & broadcast.
        h.incubator.graduate_class(maturity).unwrap();
        let (final_tx, _, _) = h.store.fetch_class(maturity).unwrap();
        let final_tx = final_tx.expect("finalized sweep");
        assert_eq!(h.broadcaster.published().last().unwrap().txid(), final_tx.txid());
        assert_eq!(h.store.last_finalized_height().unwrap(), maturity);
        assert_eq!(h.store.last_graduated_height().unwrap(), maturity);

        // Sweep confirms: outputs graduate and the channel is retired.
        h.notifier.confirm(&final_tx.txid(), maturity + 3);
        wait_until("channel removed", || {
            h.channel_db.fully_closed() == vec![chan_point]
        });
        match h.store.is_mature_channel(&chan_point) {
            Err(store::Error::ContractNotFound) => {}
            x => panic!("expected removed channel, got {:?}", x),
        }

        h.incubator.stop();
    }

    /// Txid stability: a height finalized before a crash re-broadcasts
    /// the identical transaction after restart, with no second finalize.
    #[test]
    fn finalized_sweep_is_stable_across_restart() {
        let b0 = 2_000;
        let h = harness(b0, false);
        let chan_point = dummy_outpoint(0xab, 0);
        h.channel_db.insert(close_summary(chan_point, b0));

        let res = commit_resolution(400_000, 10, 2);
        let commit_outpoint = res.self_outpoint;
        h.incubator
            .incubate_outputs(chan_point, Some(&res), &[], &[])
            .unwrap();
        h.notifier.confirm(&commit_outpoint.txid, b0 + 3);
        let maturity = b0 + 13;
        wait_until("kid in kindergarten", || {
            !h.store.fetch_class(maturity).unwrap().1.is_empty()
        });

        // Graduate the class; the sweep is finalized and broadcast once.
        h.incubator.graduate_class(maturity).unwrap();
        let (final_tx, _, _) = h.store.fetch_class(maturity).unwrap();
        let final_bytes = serialize(&final_tx.unwrap());
        assert_eq!(h.broadcaster.published().len(), 1);

        // "Restart": a fresh incubator over the same store. The chain did
        // not move, so startup only re-registers the finalized height.
        *h.chain.height.lock().unwrap() = maturity;
        let cfg = Config {
            chain_io: h.chain.clone(),
            conf_depth: 3,
            channel_db: h.channel_db.clone(),
            estimator: Arc::new(FixedEstimator(2_500)),
            sweep_script: Arc::new(CountingScriptSource::new()),
            notifier: h.notifier.clone(),
            broadcaster: h.broadcaster.clone(),
            signer: Arc::new(TestSigner::new()),
            store: h.store.clone(),
            sweep_conf_target: 6,
            cut_stray_input: Box::new(|_, _| false),
        };
        let restarted = UtxoIncubator::new(cfg);
        restarted.start().unwrap();

        let published = h.broadcaster.published();
        assert_eq!(published.len(), 2);
        assert_eq!(serialize(&published[1]), final_bytes);

        // The stored transaction is untouched.
        let (stored, _, _) = h.store.fetch_class(maturity).unwrap();
        assert_eq!(serialize(&stored.unwrap()), final_bytes);

        restarted.stop();
        h.incubator.stop();
    }

    /// Two-stage outgoing HTLC: nothing before expiry, timeout broadcast
    /// at expiry, kindergarten once the timeout confirms, swept at
    /// conf + csv.
    #[test]
    fn two_stage_htlc_lifecycle() {
        let h = harness(150, false);
        let chan_point = dummy_outpoint(0xac, 0);
        h.channel_db.insert(close_summary(chan_point, 150));

        let signer = TestSigner::new();
        let res = OutgoingHtlcResolution {
            expiry: 200,
            signed_timeout_tx: Some(dummy_timeout_tx(dummy_outpoint(3, 0))),
            csv_delay: 40,
            claim_outpoint: dummy_outpoint(4, 0),
            sweep_sign_desc: dummy_sign_desc(&signer.pubkey(), 80_000, 40),
        };
        let timeout_txid = res.signed_timeout_tx.as_ref().unwrap().txid();
        h.incubator
            .incubate_outputs(chan_point, None, &[res], &[])
            .unwrap();

        // Still in the crib the block before expiry.
        h.incubator.graduate_class(199).unwrap();
        assert!(h.broadcaster.published().is_empty());

        // At expiry the pre-signed timeout tx goes out and is watched.
        h.incubator.graduate_class(200).unwrap();
        assert_eq!(h.broadcaster.published().len(), 1);
        assert_eq!(h.broadcaster.published()[0].txid(), timeout_txid);
        assert_eq!(h.notifier.watched_txids(), vec![timeout_txid]);

        // Timeout confirms at 201: stage two matures at 241.
        h.notifier.confirm(&timeout_txid, 201);
        wait_until("baby promoted", || {
            !h.store.fetch_class(241).unwrap().1.is_empty()
        });
        let (_, kids, _) = h.store.fetch_class(241).unwrap();
        assert_eq!(kids[0].blocks_to_maturity(), 40);
        assert_eq!(kids[0].conf_height(), 201);

        // The second stage is swept with the class at 241.
        h.incubator.graduate_class(241).unwrap();
        let (final_tx, _, _) = h.store.fetch_class(241).unwrap();
        let final_tx = final_tx.expect("sweep for stage two");
        assert_eq!(final_tx.input[0].previous_output, dummy_outpoint(4, 0));
        assert_eq!(final_tx.input[0].sequence, 40);

        h.incubator.stop();
    }

    /// Stray diversion: a dust commitment output is handed to the stray
    /// pool, no sweep is built, and the height still finalizes (empty)
    /// and graduates.
    #[test]
    fn dust_output_is_diverted_to_stray_pool() {
        let b0 = 3_000;
        let h = harness(b0, true);
        let chan_point = dummy_outpoint(0xad, 0);
        h.channel_db.insert(close_summary(chan_point, b0));

        let res = commit_resolution(500, 1, 5);
        let commit_outpoint = res.self_outpoint;
        h.incubator
            .incubate_outputs(chan_point, Some(&res), &[], &[])
            .unwrap();
        h.notifier.confirm(&commit_outpoint.txid, b0 + 3);
        let maturity = b0 + 4;
        wait_until("kid in kindergarten", || {
            !h.store.fetch_class(maturity).unwrap().1.is_empty()
        });

        // At 2500 sat/kw the 320 weight units of a commitment input cost
        // 800 sat, more than the output is worth.
        h.incubator.graduate_class(maturity).unwrap();

        assert_eq!(h.strays.lock().unwrap().clone(), vec![dummy_outpoint(5, 0)]);
        assert!(h.broadcaster.published().is_empty());

        // The height is finalized empty and fully processed.
        let (final_tx, kids, _) = h.store.fetch_class(maturity).unwrap();
        assert!(final_tx.is_none());
        assert!(kids.is_empty());
        assert_eq!(h.store.last_finalized_height().unwrap(), maturity);
        assert_eq!(h.store.last_graduated_height().unwrap(), maturity);

        h.incubator.stop();
    }

    /// Restart with missed blocks: graduateClass replays every height in
    /// (last graduated, best], and pending preschool kids re-register
    /// their confirmation watches with a close-height hint.
    #[test]
    fn restart_replays_missed_heights() {
        let b0 = 4_000;
        let h = harness(b0, false);

        // Channel A: a kid that will mature at b0 + 13.
        let chan_a = dummy_outpoint(0xae, 0);
        h.channel_db.insert(close_summary(chan_a, b0));
        let res_a = commit_resolution(300_000, 10, 6);
        let outpoint_a = res_a.self_outpoint;
        h.incubator
            .incubate_outputs(chan_a, Some(&res_a), &[], &[])
            .unwrap();
        h.notifier.confirm(&outpoint_a.txid, b0 + 3);
        let maturity = b0 + 13;
        wait_until("kid in kindergarten", || {
            !h.store.fetch_class(maturity).unwrap().1.is_empty()
        });

        // Channel B: still waiting for its commitment to confirm.
        let chan_b = dummy_outpoint(0xaf, 0);
        h.channel_db.insert(close_summary(chan_b, b0 + 5));
        let res_b = commit_resolution(200_000, 20, 7);
        let outpoint_b = res_b.self_outpoint;
        h.incubator
            .incubate_outputs(chan_b, Some(&res_b), &[], &[])
            .unwrap();

        // Graduate up to just before the maturity height, then "crash".
        h.incubator.graduate_class(maturity - 1).unwrap();
        assert_eq!(h.store.last_graduated_height().unwrap(), maturity - 1);
        assert!(h.broadcaster.published().is_empty());

        // Forget the watches the first life registered.
        h.notifier.conf_watches.lock().unwrap().clear();

        // Restart five blocks later.
        *h.chain.height.lock().unwrap() = maturity + 4;
        let cfg = Config {
            chain_io: h.chain.clone(),
            conf_depth: 3,
            channel_db: h.channel_db.clone(),
            estimator: Arc::new(FixedEstimator(2_500)),
            sweep_script: Arc::new(CountingScriptSource::new()),
            notifier: h.notifier.clone(),
            broadcaster: h.broadcaster.clone(),
            signer: Arc::new(TestSigner::new()),
            store: h.store.clone(),
            sweep_conf_target: 6,
            cut_stray_input: Box::new(|_, _| false),
        };
        let restarted = UtxoIncubator::new(cfg);
        restarted.start().unwrap();

        // The missed heights were replayed: the class swept and every
        // height up to the tip graduated.
        assert_eq!(h.store.last_graduated_height().unwrap(), maturity + 4);
        assert_eq!(h.store.last_finalized_height().unwrap(), maturity + 4);
        let (final_tx, _, _) = h.store.fetch_class(maturity).unwrap();
        assert!(final_tx.is_some());
        assert_eq!(h.broadcaster.published().len(), 1);

        // Channel B's preschool kid re-registered, with the sweep watch
        // alongside it.
        let watched = h.notifier.watched_txids();
        assert!(watched.contains(&outpoint_b.txid));

        restarted.stop();
        h.incubator.stop();
    }

    /// The maturity report splits limbo and recovered balances as outputs
    /// advance.
    #[test]
    fn nursery_report_tracks_progress() {
        let b0 = 5_000;
        let h = harness(b0, false);
        let chan_point = dummy_outpoint(0xb0, 0);
        h.channel_db.insert(close_summary(chan_point, b0));

        let res = commit_resolution(500_000, 144, 8);
        let commit_outpoint = res.self_outpoint;
        h.incubator
            .incubate_outputs(chan_point, Some(&res), &[], &[])
            .unwrap();

        let report = h.incubator.nursery_report(&chan_point).unwrap();
        assert_eq!(report.limbo_balance, Amount::from_sat(500_000));
        assert_eq!(report.recovered_balance, Amount::ZERO);
        assert_eq!(report.maturity_height, 0);

        h.notifier.confirm(&commit_outpoint.txid, b0 + 3);
        wait_until("kid in kindergarten", || {
            h.store.fetch_preschools().unwrap().is_empty()
        });
        let report = h.incubator.nursery_report(&chan_point).unwrap();
        assert_eq!(report.limbo_balance, Amount::from_sat(500_000));
        assert_eq!(report.maturity_height, b0 + 3 + 144);

        // An unknown channel has no report.
        match h.incubator.nursery_report(&dummy_outpoint(0xff, 0)) {
            Err(Error::Store(store::Error::ContractNotFound)) => {}
            x => panic!("expected ContractNotFound, got {:?}", x),
        }

        h.incubator.stop();
    }

    /// The incubator loop graduates classes as epochs arrive.
    #[test]
    fn epochs_drive_graduation() {
        let b0 = 6_000;
        let h = harness(b0, false);
        h.incubator.start().unwrap();

        let epoch_subs = h.notifier.epoch_subs.lock().unwrap();
        epoch_subs[0]
            .send(chain::BlockEpoch {
                hash: BlockHash::hash(b"epoch"),
                height: b0 + 1,
            })
            .unwrap();
        drop(epoch_subs);

        wait_until("epoch processed", || {
            h.store.last_graduated_height().unwrap() == b0 + 1
        });

        h.incubator.stop();
    }
}
