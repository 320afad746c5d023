//! Chain Observer
//!
//! Consumes chain notifications and classifies them against two filter sets:
//! scriptPubKeys awaiting funding and outpoints awaiting spend detection.
//! Matches surface as `ChainEvent`s on a single channel the nursery drains
//! in arrival order.
//!
//! Ordering guarantee: events for one transaction are delivered mempool
//! before confirmed, never the reverse. Duplicate deliveries are possible
//! (the pub/sub channel is at-least-once) and consumers must tolerate them.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use bitcoin::consensus::encode::deserialize;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::client::{ChainClient, ChainError, ChainNotification};

/// Event produced by the observer
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A relevant transaction was seen; emitted once unconfirmed and again
    /// once included in a block
    Transaction { tx: Transaction, confirmed: bool },
    /// A new block extended the chain
    Block { height: u64 },
}

#[derive(Default)]
struct Filters {
    /// Hex-encoded scriptPubKeys currently awaiting funding
    relevant_outputs: HashSet<String>,
    /// Outpoints currently awaiting spend detection
    relevant_inputs: HashSet<OutPoint>,
}

/// Classifies chain notifications against the swap-relevance filters
pub struct ChainObserver {
    filters: RwLock<Filters>,
    /// Relevant transactions seen in the mempool, awaiting confirmation
    unconfirmed: Mutex<HashMap<Txid, Transaction>>,
    events: mpsc::UnboundedSender<ChainEvent>,
}

impl ChainObserver {
    /// Create an observer and the receiving end of its event channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChainEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                filters: RwLock::new(Filters::default()),
                unconfirmed: Mutex::new(HashMap::new()),
                events,
            },
            receiver,
        )
    }

    pub fn register_output(&self, script_pubkey: &ScriptBuf) {
        self.filters
            .write()
            .unwrap()
            .relevant_outputs
            .insert(script_pubkey.to_hex_string());
    }

    pub fn unregister_output(&self, script_pubkey: &ScriptBuf) {
        self.filters
            .write()
            .unwrap()
            .relevant_outputs
            .remove(&script_pubkey.to_hex_string());
    }

    pub fn register_input(&self, outpoint: OutPoint) {
        self.filters
            .write()
            .unwrap()
            .relevant_inputs
            .insert(outpoint);
    }

    pub fn unregister_input(&self, outpoint: &OutPoint) {
        self.filters.write().unwrap().relevant_inputs.remove(outpoint);
    }

    /// Whether the transaction touches any registered filter
    fn is_relevant(&self, tx: &Transaction) -> bool {
        let filters = self.filters.read().unwrap();
        tx.output
            .iter()
            .any(|out| filters.relevant_outputs.contains(&out.script_pubkey.to_hex_string()))
            || tx
                .input
                .iter()
                .any(|input| filters.relevant_inputs.contains(&input.previous_output))
    }

    /// Feed one notification from the daemon's pub/sub channel
    pub fn process_notification(&self, notification: ChainNotification) {
        match notification {
            ChainNotification::Transaction(tx) => self.process_transaction(tx),
            ChainNotification::Block { height, txids } => self.process_block(height, &txids),
        }
    }

    fn process_transaction(&self, tx: Transaction) {
        if !self.is_relevant(&tx) {
            return;
        }

        let txid = tx.compute_txid();
        debug!(%txid, "relevant transaction in mempool");

        self.unconfirmed.lock().unwrap().insert(txid, tx.clone());
        self.emit(ChainEvent::Transaction {
            tx,
            confirmed: false,
        });
    }

    fn process_block(&self, height: u64, txids: &[Txid]) {
        {
            let mut unconfirmed = self.unconfirmed.lock().unwrap();
            for txid in txids {
                if let Some(tx) = unconfirmed.remove(txid) {
                    debug!(%txid, height, "relevant transaction confirmed");
                    self.emit(ChainEvent::Transaction {
                        tx,
                        confirmed: true,
                    });
                }
            }
        }

        self.emit(ChainEvent::Block { height });
    }

    /// Replay blocks from `start_height` through the filters, emitting
    /// confirmed events for every relevant transaction found.
    ///
    /// Used after reconnects and on restart; duplicates are fine because
    /// consumers are idempotent.
    pub async fn rescan(
        &self,
        client: &dyn ChainClient,
        start_height: u64,
    ) -> Result<(), ChainError> {
        let tip = client.get_blockchain_info().await?.blocks;
        if start_height > tip {
            return Ok(());
        }

        debug!(start_height, tip, "rescanning chain");

        for height in start_height..=tip {
            let hash = client.get_block_hash(height).await?;
            let block = client.get_block(&hash).await?;

            for tx_hex in &block.tx {
                let raw = match hex::decode(tx_hex) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(height, %e, "skipping undecodable transaction in rescan");
                        continue;
                    }
                };
                let tx: Transaction = match deserialize(&raw) {
                    Ok(tx) => tx,
                    Err(e) => {
                        warn!(height, %e, "skipping unparsable transaction in rescan");
                        continue;
                    }
                };

                if self.is_relevant(&tx) {
                    self.emit(ChainEvent::Transaction {
                        tx,
                        confirmed: true,
                    });
                }
            }

            self.emit(ChainEvent::Block {
                height: block.height,
            });
        }

        Ok(())
    }

    fn emit(&self, event: ChainEvent) {
        // The nursery owns the receiver for the process lifetime; a closed
        // channel means shutdown is underway.
        let _ = self.events.send(event);
    }
}
