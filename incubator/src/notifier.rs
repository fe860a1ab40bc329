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


//! # Chain Notifier
//!
//! A polling implementation of [chain::ChainNotifier] over the bitcoind
//! RPC. One thread polls the chain tip at a fixed interval; every new block
//! is delivered, in chain order, to all epoch subscribers, and registered
//! confirmation watches are resolved once their transaction has buried
//! itself under the requested number of confirmations.
//!

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use std::thread;

use bitcoin::{BlockHash, Script, Txid};
use jsonrpc;

use chain::{self, BlockEpoch, ChainNotifier, TxConfirmation};
use common::BlockHeight;
use rpc::BitcoinRpc;

/// RPC error code from Core: no such mempool or blockchain transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

/// An outstanding confirmation watch.
struct ConfWatch {
    /// The watched transaction
    txid: Txid,
    /// Script of the watched output, kept for log context
    pk_script: Script,
    /// Confirmations required before the watch resolves
    conf_depth: u32,
    /// Lower bound on where the transaction can have confirmed
    height_hint: BlockHeight,
    /// Where the confirmation is delivered
    sender: mpsc::Sender<TxConfirmation>,
}

/// Subscriber and watch state shared with the poll thread.
struct State {
    /// The last height dispatched to epoch subscribers
    dispatched_height: BlockHeight,
    /// Epoch subscribers
    epoch_subs: Vec<mpsc::Sender<BlockEpoch>>,
    /// Outstanding confirmation watches
    conf_watches: Vec<ConfWatch>,
}

/// A polling chain notifier over a bitcoind RPC handle.
pub struct RpcNotifier<R: BitcoinRpc> {
    bitcoind: Arc<R>,
    poll_interval: Duration,
    quit: Arc<AtomicBool>,
    state: Arc<Mutex<State>>,
    poll_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<R: BitcoinRpc + 'static> RpcNotifier<R> {
    /// Create a notifier polling the given RPC handle. The notifier is
    /// inert until [start] is called.
    pub fn new(bitcoind: R, poll_interval: Duration) -> RpcNotifier<R> {
        RpcNotifier {
            bitcoind: Arc::new(bitcoind),
            poll_interval: poll_interval,
            quit: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(State {
                dispatched_height: 0,
                epoch_subs: Vec::new(),
                conf_watches: Vec::new(),
            })),
            poll_thread: Mutex::new(None),
        }
    }

    /// Record the current tip and spawn the poll thread. Epochs are
    /// delivered for blocks connected after this call.
    pub fn start(&self) -> Result<(), chain::Error> {
        let tip = self.bitcoind.block_count()?;
        self.state.lock().unwrap().dispatched_height = tip;

        let bitcoind = self.bitcoind.clone();
        let state = self.state.clone();
        let quit = self.quit.clone();
        let interval = self.poll_interval;

        let handle = thread::spawn(move || {
            while !quit.load(Ordering::SeqCst) {
                if let Err(e) = poll_once(&*bitcoind, &state) {
                    log!(Warn, "chain poll failed: {}", e);
                }

                // Sleep in small slices so shutdown stays prompt.
                let mut remaining = interval;
                while remaining > Duration::from_millis(0) {
                    if quit.load(Ordering::SeqCst) {
                        return;
                    }
                    let slice = ::std::cmp::min(remaining, Duration::from_millis(100));
                    thread::sleep(slice);
                    remaining -= slice;
                }
            }
        });
        *self.poll_thread.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Stop the poll thread and close all subscriber channels.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.poll_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        // Dropping the senders closes every subscriber stream.
        let mut state = self.state.lock().unwrap();
        state.epoch_subs.clear();
        state.conf_watches.clear();
    }

    /// Drive one poll cycle. The poll thread calls this on its interval;
    /// tests call it directly.
    pub fn poll_once(&self) -> Result<(), jsonrpc::Error> {
        poll_once(&*self.bitcoind, &self.state)
    }
}

impl<R: BitcoinRpc + 'static> ChainNotifier for RpcNotifier<R> {
    fn register_block_epoch_ntfn(&self) -> Result<mpsc::Receiver<BlockEpoch>, chain::Error> {
        if self.quit.load(Ordering::SeqCst) {
            return Err(chain::Error::NotifierShutdown);
        }
        let (sender, receiver) = mpsc::channel();
        self.state.lock().unwrap().epoch_subs.push(sender);
        Ok(receiver)
    }

    fn register_confirmations_ntfn(
        &self,
        txid: &Txid,
        pk_script: &Script,
        conf_depth: u32,
        height_hint: BlockHeight,
    ) -> Result<mpsc::Receiver<TxConfirmation>, chain::Error> {
        if self.quit.load(Ordering::SeqCst) {
            return Err(chain::Error::NotifierShutdown);
        }
        let (sender, receiver) = mpsc::channel();
        self.state.lock().unwrap().conf_watches.push(ConfWatch {
            txid: *txid,
            pk_script: pk_script.clone(),
            conf_depth: conf_depth,
            height_hint: height_hint,
            sender: sender,
        });
        Ok(receiver)
    }
}

/// Look a transaction up, treating "not found" as an empty result rather
/// than an error.
fn maybe_confirmed_in(bitcoind: &impl BitcoinRpc, txid: Txid)
    -> Result<Option<BlockHash>, jsonrpc::Error>
{
    match bitcoind.tx_info(txid) {
        Ok(info) => Ok(info.blockhash),
        Err(jsonrpc::Error::Rpc(ref e)) if e.code == RPC_INVALID_ADDRESS_OR_KEY => Ok(None),
        Err(e) => Err(e),
    }
}

fn poll_once(bitcoind: &impl BitcoinRpc, state: &Mutex<State>) -> Result<(), jsonrpc::Error> {
    let tip = bitcoind.block_count()?;

    // Dispatch every block between the last dispatched height and the tip,
    // in chain order. The lock is held across the RPC lookups; registration
    // is quick and nothing else contends.
    let mut state = state.lock().unwrap();
    while state.dispatched_height < tip {
        let next = state.dispatched_height + 1;
        let hash = bitcoind.block_at(next)?;
        let epoch = BlockEpoch {
            hash: hash,
            height: next,
        };
        state.epoch_subs.retain(|sub| sub.send(epoch).is_ok());
        state.dispatched_height = next;
    }

    // Resolve confirmation watches whose transaction is buried deeply
    // enough. Watches whose receiver has gone away are dropped.
    let mut resolved = Vec::new();
    for (idx, watch) in state.conf_watches.iter().enumerate() {
        let block_hash = match maybe_confirmed_in(bitcoind, watch.txid)? {
            Some(hash) => hash,
            None => continue,
        };
        let header = bitcoind.block_header_info(block_hash)?;
        if header.confirmations < 0 {
            // Confirming block forked off; wait for re-confirmation.
            continue;
        }
        if (header.confirmations as u32) >= watch.conf_depth {
            log!(Trace, "conf watch resolved: txid={} script={:?} hint={}",
                watch.txid, watch.pk_script, watch.height_hint);
            let _ = watch.sender.send(TxConfirmation {
                block_hash: block_hash,
                block_height: header.height,
            });
            resolved.push(idx);
        }
    }
    for idx in resolved.into_iter().rev() {
        state.conf_watches.swap_remove(idx);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use bitcoin::hashes::Hash;
    use rpc::{BitcoinTxInfo, BlockHeaderInfo, EstimateSmartFeeResponse};

    /// RPC double backed by a hash-indexed fake chain.
    struct FakeChain {
        inner: StdMutex<FakeChainInner>,
    }

    struct FakeChainInner {
        height: BlockHeight,
        // txid -> (block hash, block height)
        confirmed: HashMap<Txid, (BlockHash, BlockHeight)>,
    }

    impl FakeChain {
        fn new(height: BlockHeight) -> FakeChain {
            FakeChain {
                inner: StdMutex::new(FakeChainInner {
                    height: height,
                    confirmed: HashMap::new(),
                }),
            }
        }

        fn extend_to(&self, height: BlockHeight) {
            self.inner.lock().unwrap().height = height;
        }

        fn confirm(&self, txid: Txid, height: BlockHeight) {
            let hash = block_hash_at(height);
            self.inner.lock().unwrap().confirmed.insert(txid, (hash, height));
        }
    }

    fn block_hash_at(height: BlockHeight) -> BlockHash {
        BlockHash::hash(&height.to_be_bytes())
    }

    fn not_found() -> jsonrpc::Error {
        jsonrpc::Error::Rpc(jsonrpc::error::RpcError {
            code: RPC_INVALID_ADDRESS_OR_KEY,
            message: "No such mempool or blockchain transaction".into(),
            data: None,
        })
    }

    impl BitcoinRpc for FakeChain {
        fn jsonrpc_query<T: ::serde::de::DeserializeOwned>(
            &self,
            query: &str,
            _args: &[::serde_json::Value],
        ) -> Result<T, jsonrpc::Error> {
            panic!("unexpected raw query {}", query);
        }

        fn block_count(&self) -> Result<BlockHeight, jsonrpc::Error> {
            Ok(self.inner.lock().unwrap().height)
        }

        fn block_at(&self, height: BlockHeight) -> Result<BlockHash, jsonrpc::Error> {
            Ok(block_hash_at(height))
        }

        fn tx_info(&self, txid: Txid) -> Result<BitcoinTxInfo, jsonrpc::Error> {
            let inner = self.inner.lock().unwrap();
            match inner.confirmed.get(&txid) {
                Some(&(hash, _)) => Ok(BitcoinTxInfo {
                    hex: String::new(),
                    txid: txid,
                    blockhash: Some(hash),
                }),
                None => Err(not_found()),
            }
        }

        fn block_header_info(&self, hash: BlockHash) -> Result<BlockHeaderInfo, jsonrpc::Error> {
            let inner = self.inner.lock().unwrap();
            for (_, &(confirmed_hash, height)) in inner.confirmed.iter() {
                if confirmed_hash == hash {
                    return Ok(BlockHeaderInfo {
                        height: height,
                        confirmations: (inner.height - height) as i64 + 1,
                    });
                }
            }
            Err(not_found())
        }

        fn estimate_smart_fee(&self, _target: u32) -> Result<EstimateSmartFeeResponse, jsonrpc::Error> {
            panic!("not a fee source");
        }
    }

    #[test]
    fn epochs_delivered_in_order() {
        let notifier = RpcNotifier::new(FakeChain::new(100), Duration::from_millis(10));
        notifier.state.lock().unwrap().dispatched_height = 100;

        let epochs = notifier.register_block_epoch_ntfn().unwrap();
        notifier.bitcoind.extend_to(103);
        notifier.poll_once().unwrap();

        for expect in 101..=103 {
            let epoch = epochs.try_recv().expect("epoch");
            assert_eq!(epoch.height, expect);
            assert_eq!(epoch.hash, block_hash_at(expect));
        }
        assert!(epochs.try_recv().is_err());
    }

    #[test]
    fn confirmation_watch_resolves_at_depth() {
        let notifier = RpcNotifier::new(FakeChain::new(100), Duration::from_millis(10));
        notifier.state.lock().unwrap().dispatched_height = 100;

        let txid = Txid::hash(b"watched");
        let confs = notifier
            .register_confirmations_ntfn(&txid, &Script::new(), 3, 98)
            .unwrap();

        // Confirmed at 101 with depth 1: not yet.
        notifier.bitcoind.confirm(txid, 101);
        notifier.bitcoind.extend_to(101);
        notifier.poll_once().unwrap();
        assert!(confs.try_recv().is_err());

        // Two more blocks bring it to depth 3.
        notifier.bitcoind.extend_to(103);
        notifier.poll_once().unwrap();
        let conf = confs.try_recv().expect("confirmation");
        assert_eq!(conf.block_height, 101);
    }
}
