//! Deterministic collaborators for tests and development.
//!
//! - [`MockUtxoSupply`]: an in-memory UTXO set per owner
//! - [`MockThresholdSigner`]: signs with a single local key, standing in for
//!   a signing quorum; failures, hangs and bad signatures can be injected
//! - [`MockChain`]: a toy chain with a mempool, block production, reorgs and
//!   node-style rejection messages

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::key::TweakedPublicKey;
use bitcoin::secp256k1::{schnorr, All, KeyPair, Message, Secp256k1, XOnlyPublicKey};
use bitcoin::{BlockHash, OutPoint, ScriptBuf, Transaction, Txid};
use parking_lot::{Mutex, RwLock};

use crate::provider::{
    ChainClient, ProviderError, SignatureKey, SignatureRequest, ThresholdSigner, TxStatus,
    UtxoSupply,
};
use crate::types::FeePriority;
use crate::utxo_selection::UtxoRecord;

/// In-memory UTXO supply.
pub struct MockUtxoSupply {
    utxos: RwLock<HashMap<String, Vec<UtxoRecord>>>,
    fee_rate: RwLock<Option<u64>>,
    available: AtomicBool,
}

impl Default for MockUtxoSupply {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUtxoSupply {
    pub fn new() -> Self {
        Self {
            utxos: RwLock::new(HashMap::new()),
            fee_rate: RwLock::new(None),
            available: AtomicBool::new(true),
        }
    }

    pub fn add_utxo(&self, owner: &str, utxo: UtxoRecord) {
        self.utxos
            .write()
            .entry(owner.to_string())
            .or_default()
            .push(utxo);
    }

    pub fn remove_utxo(&self, owner: &str, outpoint: &OutPoint) {
        if let Some(utxos) = self.utxos.write().get_mut(owner) {
            utxos.retain(|utxo| utxo.outpoint != *outpoint);
        }
    }

    /// Fee estimate returned for every priority; None makes estimation fail.
    pub fn set_fee_rate(&self, fee_rate: Option<u64>) {
        *self.fee_rate.write() = fee_rate;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl UtxoSupply for MockUtxoSupply {
    async fn list_utxos(&self, owner: &str) -> Result<Vec<UtxoRecord>, ProviderError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("utxo supply offline".to_string()));
        }
        Ok(self.utxos.read().get(owner).cloned().unwrap_or_default())
    }

    async fn estimate_fee_rate(&self, _priority: FeePriority) -> Result<u64, ProviderError> {
        self.fee_rate
            .read()
            .ok_or_else(|| ProviderError::Unavailable("no fee estimate".to_string()))
    }
}

/// Single-key stand-in for a threshold signer.
pub struct MockThresholdSigner {
    secp: Secp256k1<All>,
    keypair: KeyPair,
    failures_remaining: AtomicU32,
    always_fail: AtomicBool,
    corrupt: AtomicBool,
    hang: Mutex<Option<Duration>>,
    requests: Mutex<Vec<SignatureKey>>,
    answered: Mutex<HashMap<SignatureKey, schnorr::Signature>>,
}

impl MockThresholdSigner {
    /// Signer over the key with the given secret bytes.
    pub fn new(secret: [u8; 32]) -> Result<Self, bitcoin::secp256k1::Error> {
        let secp = Secp256k1::new();
        let keypair = KeyPair::from_seckey_slice(&secp, &secret)?;
        Ok(Self {
            secp,
            keypair,
            failures_remaining: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            corrupt: AtomicBool::new(false),
            hang: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            answered: Mutex::new(HashMap::new()),
        })
    }

    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    /// P2TR script whose output key is this signer's key.
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_v1_p2tr_tweaked(TweakedPublicKey::dangerous_assume_tweaked(
            self.x_only_public_key(),
        ))
    }

    /// Fail the next `count` requests.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Sign a different message than requested.
    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    /// Delay every answer by `delay`.
    pub fn set_hang(&self, delay: Option<Duration>) {
        *self.hang.lock() = delay;
    }

    /// Keys of every request received, in arrival order.
    pub fn requests(&self) -> Vec<SignatureKey> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ThresholdSigner for MockThresholdSigner {
    async fn request_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<schnorr::Signature, ProviderError> {
        let key = request.key();
        self.requests.lock().push(key.clone());

        let hang = *self.hang.lock();
        if let Some(delay) = hang {
            tokio::time::sleep(delay).await;
        }

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("signing quorum unreachable".to_string()));
        }

        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ProviderError::Unavailable("signing quorum unreachable".to_string()));
        }

        // Repeated keys get the answer already given, like a quorum that
        // deduplicates sessions.
        if let Some(signature) = self.answered.lock().get(&key) {
            return Ok(*signature);
        }

        let corrupt = self.corrupt.load(Ordering::SeqCst);
        let mut digest = request.sighash;
        if corrupt {
            digest[0] ^= 0xff;
        }

        let message = Message::from_slice(&digest)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;
        let signature = self.secp.sign_schnorr_no_aux_rand(&message, &self.keypair);
        if !corrupt {
            self.answered.lock().insert(key, signature);
        }
        Ok(signature)
    }
}

#[derive(Debug, Default)]
struct ChainState {
    height: u64,
    fork: u64,
    mempool: HashMap<Txid, Transaction>,
    confirmed: HashMap<Txid, (u64, BlockHash, Transaction)>,
    spent: HashMap<OutPoint, Txid>,
    rejections: VecDeque<String>,
    unavailable: bool,
    broadcasts: u32,
}

impl ChainState {
    fn block_hash(&self, height: u64) -> BlockHash {
        let mut data = height.to_le_bytes().to_vec();
        data.extend_from_slice(&self.fork.to_le_bytes());
        BlockHash::hash(&data)
    }
}

/// Toy chain with a mempool and manual block production.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                height,
                ..Default::default()
            }),
        }
    }

    /// Mine `count` blocks; the first one includes the whole mempool.
    pub fn advance_blocks(&self, count: u64) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.height += 1;
            let height = state.height;
            let hash = state.block_hash(height);
            let mempool: Vec<(Txid, Transaction)> = state.mempool.drain().collect();
            for (txid, tx) in mempool {
                state.confirmed.insert(txid, (height, hash, tx));
            }
        }
    }

    /// Replace the last `depth` blocks with empty ones: their transactions
    /// return to the mempool and the tip height is unchanged.
    pub fn reorg(&self, depth: u64) {
        let mut state = self.state.lock();
        let fork_point = state.height.saturating_sub(depth);
        state.fork += 1;

        let orphaned: Vec<Txid> = state
            .confirmed
            .iter()
            .filter(|(_, (height, _, _))| *height > fork_point)
            .map(|(txid, _)| *txid)
            .collect();

        for txid in orphaned {
            if let Some((_, _, tx)) = state.confirmed.remove(&txid) {
                state.mempool.insert(txid, tx);
            }
        }
    }

    /// Drop `txid` from the mempool and spend its first input elsewhere.
    pub fn double_spend(&self, txid: &Txid) {
        let mut state = self.state.lock();
        let tx = state
            .mempool
            .remove(txid)
            .or_else(|| state.confirmed.remove(txid).map(|(_, _, tx)| tx));

        if let Some(tx) = tx {
            for input in &tx.input {
                state.spent.remove(&input.previous_output);
            }
            if let Some(input) = tx.input.first() {
                let conflicting = Txid::hash(&encode::serialize(&input.previous_output));
                state.spent.insert(input.previous_output, conflicting);
            }
        }
    }

    /// Forget `txid` entirely, as when a transaction expires from every
    /// mempool; its inputs become spendable again.
    pub fn evict(&self, txid: &Txid) {
        let mut state = self.state.lock();
        state.mempool.remove(txid);
        state.confirmed.remove(txid);
        state.spent.retain(|_, spender| spender != txid);
    }

    /// Reject the next broadcast with a node-style message.
    pub fn reject_next(&self, message: &str) {
        self.state.lock().rejections.push_back(message.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn broadcast_count(&self) -> u32 {
        self.state.lock().broadcasts
    }

    pub fn in_mempool(&self, txid: &Txid) -> bool {
        self.state.lock().mempool.contains_key(txid)
    }

    pub fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        let state = self.state.lock();
        state
            .mempool
            .get(txid)
            .cloned()
            .or_else(|| state.confirmed.get(txid).map(|(_, _, tx)| tx.clone()))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<Txid, ProviderError> {
        let mut state = self.state.lock();
        state.broadcasts += 1;

        if state.unavailable {
            return Err(ProviderError::Unavailable("node unreachable".to_string()));
        }

        if let Some(message) = state.rejections.pop_front() {
            return Err(ProviderError::Rejected(message));
        }

        let tx: Transaction = encode::deserialize(tx_bytes)
            .map_err(|e| ProviderError::Rejected(format!("TX decode failed: {}", e)))?;
        let txid = tx.txid();

        if state.confirmed.contains_key(&txid) {
            return Err(ProviderError::Rejected("transaction already in block chain".to_string()));
        }
        if state.mempool.contains_key(&txid) {
            return Err(ProviderError::Rejected("txn-already-in-mempool".to_string()));
        }

        for input in &tx.input {
            if let Some(spender) = state.spent.get(&input.previous_output) {
                if *spender != txid {
                    return Err(ProviderError::Rejected("txn-mempool-conflict".to_string()));
                }
            }
        }

        for input in &tx.input {
            state.spent.insert(input.previous_output, txid);
        }
        state.mempool.insert(txid, tx);
        Ok(txid)
    }

    async fn get_confirmations(&self, txid: &Txid) -> Result<Option<u32>, ProviderError> {
        Ok(self.get_tx_status(txid).await?.confirmations)
    }

    async fn get_block_height(&self) -> Result<u64, ProviderError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(ProviderError::Unavailable("node unreachable".to_string()));
        }
        Ok(state.height)
    }

    async fn get_tx_status(&self, txid: &Txid) -> Result<TxStatus, ProviderError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(ProviderError::Unavailable("node unreachable".to_string()));
        }

        if let Some((height, hash, _)) = state.confirmed.get(txid) {
            let confirmations = state.height.saturating_sub(*height) + 1;
            return Ok(TxStatus {
                confirmations: Some(u32::try_from(confirmations).unwrap_or(u32::MAX)),
                block_hash: Some(*hash),
            });
        }

        Ok(TxStatus {
            confirmations: state.mempool.contains_key(txid).then_some(0),
            block_hash: None,
        })
    }
}
