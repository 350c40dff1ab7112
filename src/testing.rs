//! In-crate fakes for the external collaborators.

use async_trait::async_trait;
use base64::Engine as _;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::chain::{is_native, ChainRpc, ObservedSwap, WalletActivity, LAMPORTS_PER_SOL};
use crate::error::TradeError;
use crate::jupiter::{
    PriceFeed, QuoteRequest, QuoteResponse, SwapAggregator, SwapRequest, SwapResponse,
};

/// Outcome of one quote+swap round trip.
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    QuoteErr(String),
    SwapErr(String),
}

#[derive(Default)]
pub struct FakeAggregator {
    script: Mutex<VecDeque<Step>>,
    pending: Mutex<Option<Step>>,
    always_fail: Mutex<Option<String>>,
    quotes: Mutex<Vec<QuoteRequest>>,
    swaps: Mutex<Vec<SwapRequest>>,
}

impl FakeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, steps: Vec<Step>) {
        self.script.lock().await.extend(steps);
    }

    pub async fn fail_every_quote(&self, message: &str) {
        *self.always_fail.lock().await = Some(message.to_string());
    }

    pub async fn quotes(&self) -> Vec<QuoteRequest> {
        self.quotes.lock().await.clone()
    }

    pub async fn swaps(&self) -> Vec<SwapRequest> {
        self.swaps.lock().await.clone()
    }
}

/// Unsigned legacy transaction paying from `payer`, as the aggregator would return it.
pub fn unsigned_swap_tx(payer: &Pubkey) -> String {
    let tx = VersionedTransaction::from(Transaction::new_with_payer(&[], Some(payer)));
    base64::engine::general_purpose::STANDARD.encode(bincode::serialize(&tx).unwrap())
}

#[async_trait]
impl SwapAggregator for FakeAggregator {
    async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, TradeError> {
        self.quotes.lock().await.push(req.clone());
        if let Some(msg) = self.always_fail.lock().await.clone() {
            return Err(TradeError::classify(msg));
        }
        let step = self.script.lock().await.pop_front().unwrap_or(Step::Ok);
        if let Step::QuoteErr(msg) = step {
            return Err(TradeError::classify(msg));
        }
        *self.pending.lock().await = Some(step);
        Ok(QuoteResponse {
            in_amount: req.amount.clone(),
            out_amount: req.amount.clone(),
            price_impact_pct: Some("0".into()),
            route_plan: vec![],
            rest: serde_json::Map::new(),
        })
    }

    async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse, TradeError> {
        self.swaps.lock().await.push(req.clone());
        if let Some(Step::SwapErr(msg)) = self.pending.lock().await.take() {
            return Err(TradeError::classify(msg));
        }
        let payer = Pubkey::from_str(&req.user_public_key).unwrap();
        Ok(SwapResponse {
            swap_transaction: unsigned_swap_tx(&payer),
            last_valid_block_height: 1,
        })
    }
}

#[derive(Default)]
pub struct FakeChain {
    lamports: u64,
    token_balances: Mutex<HashMap<String, f64>>,
    simulation_script: Mutex<VecDeque<Option<String>>>,
    ensured: Mutex<Vec<String>>,
    missing: Mutex<Vec<String>>,
    checked: Mutex<Vec<String>>,
    simulated: Mutex<usize>,
    sent: Mutex<usize>,
}

impl FakeChain {
    pub fn with_balance(lamports: u64) -> Self {
        Self {
            lamports,
            ..Self::default()
        }
    }

    /// `Some(err)` fails the n-th simulation with that text.
    pub async fn script_simulation(&self, outcomes: Vec<Option<String>>) {
        self.simulation_script.lock().await.extend(outcomes);
    }

    pub async fn set_token_balance(&self, mint: &str, amount: f64) {
        self.token_balances.lock().await.insert(mint.to_string(), amount);
    }

    pub async fn ensured(&self) -> Vec<String> {
        self.ensured.lock().await.clone()
    }

    /// The owner has no token account for `mint`.
    pub async fn mark_missing(&self, mint: &str) {
        self.missing.lock().await.push(mint.to_string());
    }

    /// Mints whose token account was looked up without being created.
    pub async fn checked(&self) -> Vec<String> {
        self.checked.lock().await.clone()
    }

    pub async fn simulated(&self) -> usize {
        *self.simulated.lock().await
    }

    pub async fn sent(&self) -> usize {
        *self.sent.lock().await
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn native_balance(&self, _owner: &Pubkey) -> Result<u64, TradeError> {
        Ok(self.lamports)
    }

    async fn token_balance(&self, _owner: &Pubkey, mint: &Pubkey) -> Result<f64, TradeError> {
        if let Some(b) = self.token_balances.lock().await.get(&mint.to_string()) {
            return Ok(*b);
        }
        if is_native(mint) {
            return Ok(self.lamports as f64 / LAMPORTS_PER_SOL);
        }
        Ok(0.0)
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, TradeError> {
        Ok(if is_native(mint) { 9 } else { 6 })
    }

    async fn token_account_exists(
        &self,
        _owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<bool, TradeError> {
        let mint = mint.to_string();
        self.checked.lock().await.push(mint.clone());
        Ok(!self.missing.lock().await.contains(&mint))
    }

    async fn ensure_token_account(
        &self,
        _payer: &Keypair,
        mint: &Pubkey,
    ) -> Result<Pubkey, TradeError> {
        self.ensured.lock().await.push(mint.to_string());
        Ok(Pubkey::new_unique())
    }

    async fn priority_fee_micro_lamports(&self) -> Result<u64, TradeError> {
        Ok(1_000)
    }

    async fn simulate(&self, _tx: &VersionedTransaction) -> Result<(), TradeError> {
        *self.simulated.lock().await += 1;
        match self.simulation_script.lock().await.pop_front().flatten() {
            Some(err) => Err(TradeError::classify(err)),
            None => Ok(()),
        }
    }

    async fn send(&self, _tx: &VersionedTransaction) -> Result<Signature, TradeError> {
        let mut sent = self.sent.lock().await;
        *sent += 1;
        Ok(Signature::from([*sent as u8; 64]))
    }

    async fn confirm(&self, _signature: &Signature) -> Result<(), TradeError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePrices {
    prices: Mutex<HashMap<String, f64>>,
}

impl FakePrices {
    pub async fn set(&self, mint: &str, price: f64) {
        self.prices.lock().await.insert(mint.to_string(), price);
    }
}

#[async_trait]
impl PriceFeed for FakePrices {
    async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>, TradeError> {
        let prices = self.prices.lock().await;
        Ok(mints
            .iter()
            .filter_map(|m| prices.get(m).map(|p| (m.clone(), *p)))
            .collect())
    }
}

#[derive(Default)]
pub struct FakeActivity {
    swaps: Mutex<Vec<ObservedSwap>>,
}

impl FakeActivity {
    /// Newest first, like the RPC.
    pub async fn set(&self, swaps: Vec<ObservedSwap>) {
        *self.swaps.lock().await = swaps;
    }
}

#[async_trait]
impl WalletActivity for FakeActivity {
    async fn recent_swaps(
        &self,
        _wallet: &Pubkey,
        limit: usize,
    ) -> Result<Vec<ObservedSwap>, TradeError> {
        Ok(self.swaps.lock().await.iter().take(limit).cloned().collect())
    }
}
