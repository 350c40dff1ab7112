//! Progressive-slippage swap execution.
//!
//! Outer loop: tolerance ladder `[requested, 150, 300, 500, 1000]` bps, stopping
//! at the first landed swap. Inner loop, per tolerance: with platform fee,
//! then without it, then with the amount trimmed by 0.1%. Only routing
//! failures walk the inner chain; a slippage failure moves straight to the
//! next tolerance and anything else aborts the whole call.

use base64::Engine as _;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::{is_native, parse_pubkey, ChainRpc};
use crate::config::{Config, SLIPPAGE_CAP_BPS};
use crate::domain::NATIVE_MINT;
use crate::error::TradeError;
use crate::jupiter::{ensure_slippage_bounds, QuoteRequest, SwapAggregator, SwapRequest};

const ESCALATION_BPS: [u16; 4] = [150, 300, 500, 1000];

pub const DRY_RUN_SIGNATURE: &str = "DRY_RUN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformFee {
    pub account: String,
    pub bps: u16,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub dry_run: bool,
    pub default_slippage_bps: u16,
    pub max_slippage_bps: u16,
    pub min_fee_reserve_lamports: u64,
    pub platform_fee: Option<PlatformFee>,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let platform_fee = match (&cfg.fee_account, cfg.platform_fee_bps) {
            (Some(account), Some(bps)) => Some(PlatformFee { account: account.clone(), bps }),
            _ => None,
        };
        Self {
            dry_run: cfg.dry_run,
            default_slippage_bps: cfg.default_slippage_bps,
            max_slippage_bps: cfg.max_slippage_bps,
            min_fee_reserve_lamports: cfg.min_fee_reserve_lamports,
            platform_fee,
        }
    }
}

/// One trade, amounts in human units of the input mint.
pub struct TradeRequest<'a> {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: f64,
    pub slippage_bps: Option<u16>,
    pub signer: &'a Keypair,
    /// Overrides the executor-wide platform fee.
    pub platform_fee: Option<PlatformFee>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    WithFee,
    NoFee,
    AdjustedAmount,
}

impl fmt::Display for FeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeeMode::WithFee => "with-fee",
            FeeMode::NoFee => "no-fee",
            FeeMode::AdjustedAmount => "adjusted-amount",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Landed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapAttempt {
    pub slippage_bps: u16,
    pub fee_mode: FeeMode,
    pub amount: u64,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub struct SwapResult {
    pub signature: String,
    pub input_mint: String,
    pub output_mint: String,
    /// Base units, as quoted.
    pub input_amount: u64,
    pub output_amount: u64,
    pub input_amount_ui: f64,
    pub output_amount_ui: f64,
    pub slippage_bps: u16,
    pub fee_applied: bool,
    pub attempts: Vec<SwapAttempt>,
    /// Set only when more than one attempt was needed.
    pub message: Option<String>,
}

/// Tolerances to try, in order. Never decreasing, never above `cap`.
pub fn slippage_ladder(requested: u16, cap: u16) -> Vec<u16> {
    let cap = cap.min(SLIPPAGE_CAP_BPS);
    let start = requested.clamp(1, cap);
    std::iter::once(start)
        .chain(ESCALATION_BPS.into_iter().filter(|&l| l > start && l <= cap))
        .collect()
}

pub fn to_base_units(amount: f64, decimals: u8) -> Result<u64, TradeError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(TradeError::Validation(format!("amount must be positive, got {amount}")));
    }
    let exact = amount * 10f64.powi(decimals as i32);
    // float noise, e.g. 0.29 * 1e2 = 28.999999999999996
    let scaled = if (exact - exact.round()).abs() < 1e-6 { exact.round() } else { exact.floor() };
    if scaled < 1.0 || scaled > u64::MAX as f64 {
        return Err(TradeError::Validation(format!(
            "amount {amount} is out of range for {decimals} decimals"
        )));
    }
    Ok(scaled as u64)
}

/// 0.1% less, and at least one base unit less whenever that leaves something to trade.
fn trimmed_amount(amount: u64) -> u64 {
    amount.saturating_sub((amount / 1000).max(1)).max(1)
}

fn from_base_units(amount: u64, decimals: u8) -> f64 {
    amount as f64 / 10f64.powi(decimals as i32)
}

/// Everything fixed for the duration of one `execute_swap` call.
struct Plan<'a> {
    signer: &'a Keypair,
    input_mint: Pubkey,
    output_mint: Pubkey,
    input_decimals: u8,
    output_decimals: u8,
    amount: u64,
    fee: Option<PlatformFee>,
    priority_fee: Option<u64>,
}

struct Landed {
    signature: String,
    in_amount: u64,
    out_amount: u64,
    fee_applied: bool,
}

pub struct SwapExecutor {
    aggregator: Arc<dyn SwapAggregator>,
    chain: Arc<dyn ChainRpc>,
    settings: ExecutorSettings,
}

impl SwapExecutor {
    pub fn new(
        aggregator: Arc<dyn SwapAggregator>,
        chain: Arc<dyn ChainRpc>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            aggregator,
            chain,
            settings,
        }
    }

    pub async fn execute_swap(&self, req: TradeRequest<'_>) -> Result<SwapResult, TradeError> {
        if req.input_mint == req.output_mint {
            return Err(TradeError::Validation("input and output mint are the same".into()));
        }
        let input_mint = parse_pubkey(&req.input_mint)?;
        let output_mint = parse_pubkey(&req.output_mint)?;
        if !req.amount.is_finite() || req.amount <= 0.0 {
            return Err(TradeError::Validation(format!(
                "amount must be positive, got {}",
                req.amount
            )));
        }

        let owner = req.signer.pubkey();
        let input_decimals = self.chain.mint_decimals(&input_mint).await?;
        let output_decimals = self.chain.mint_decimals(&output_mint).await?;
        let amount = to_base_units(req.amount, input_decimals)?;

        self.preflight_balance(&owner, &input_mint, amount).await?;
        self.ensure_accounts(req.signer, &input_mint, &output_mint).await?;

        let ladder = slippage_ladder(
            req.slippage_bps.unwrap_or(self.settings.default_slippage_bps),
            self.settings.max_slippage_bps,
        );
        let plan = Plan {
            signer: req.signer,
            input_mint,
            output_mint,
            input_decimals,
            output_decimals,
            amount,
            fee: req.platform_fee.or_else(|| self.settings.platform_fee.clone()),
            priority_fee: self.chain.priority_fee_micro_lamports().await.ok(),
        };

        info!(
            input = %plan.input_mint,
            output = %plan.output_mint,
            amount,
            ladder = ?ladder,
            dry_run = self.settings.dry_run,
            "executor.execute_swap"
        );

        let mut attempts = Vec::new();
        let mut last_error: Option<TradeError> = None;
        for &bps in &ladder {
            ensure_slippage_bounds(bps, SLIPPAGE_CAP_BPS)?;
            match self.attempt_level(&plan, bps, &mut attempts).await {
                Ok(landed) => return Ok(self.finish(&plan, bps, landed, attempts)),
                Err(e) if e.is_retryable() => {
                    warn!(slippage_bps = bps, error = %e, "executor.level_failed");
                    last_error = Some(e);
                }
                Err(e) => {
                    warn!(slippage_bps = bps, error = %e, "executor.aborted");
                    return Err(e);
                }
            }
        }

        let final_slippage_bps = ladder.last().copied().unwrap_or(SLIPPAGE_CAP_BPS);
        Err(TradeError::Exhausted {
            final_slippage_bps,
            attempts: attempts.len(),
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Native balance must cover the fee reserve, or the trade itself when selling SOL.
    async fn preflight_balance(
        &self,
        owner: &Pubkey,
        input_mint: &Pubkey,
        amount: u64,
    ) -> Result<(), TradeError> {
        let trade_lamports = if is_native(input_mint) { amount } else { 0 };
        let required = self.settings.min_fee_reserve_lamports.max(trade_lamports);
        let available = self.chain.native_balance(owner).await?;
        if available < required {
            return Err(TradeError::Validation(format!(
                "insufficient balance: required {required} lamports, available {available}"
            )));
        }
        Ok(())
    }

    async fn ensure_accounts(
        &self,
        signer: &Keypair,
        input: &Pubkey,
        output: &Pubkey,
    ) -> Result<(), TradeError> {
        let native = parse_pubkey(NATIVE_MINT)?;
        let mut mints: Vec<Pubkey> = Vec::with_capacity(3);
        for mint in [*input, *output, native] {
            if !mints.contains(&mint) {
                mints.push(mint);
            }
        }
        for mint in &mints {
            if !self.settings.dry_run {
                self.chain.ensure_token_account(signer, mint).await?;
            } else if !self.chain.token_account_exists(&signer.pubkey(), mint).await? {
                info!(%mint, "executor.dry_run_skipped_account_creation");
            }
        }
        Ok(())
    }

    /// Fallback chain at one tolerance.
    async fn attempt_level(
        &self,
        plan: &Plan<'_>,
        bps: u16,
        attempts: &mut Vec<SwapAttempt>,
    ) -> Result<Landed, TradeError> {
        let first = match &plan.fee {
            Some(fee) => {
                self.try_once(plan, bps, FeeMode::WithFee, plan.amount, Some(fee), attempts)
                    .await
            }
            None => {
                self.try_once(plan, bps, FeeMode::NoFee, plan.amount, None, attempts)
                    .await
            }
        };
        match first {
            Ok(landed) => return Ok(landed),
            Err(e) if e.is_routing() => {}
            Err(e) => return Err(e),
        }

        if plan.fee.is_some() {
            match self.try_once(plan, bps, FeeMode::NoFee, plan.amount, None, attempts).await {
                Ok(landed) => return Ok(landed),
                Err(e) if e.is_routing() => {}
                Err(e) => return Err(e),
            }
        }

        let trimmed = trimmed_amount(plan.amount);
        self.try_once(plan, bps, FeeMode::AdjustedAmount, trimmed, None, attempts)
            .await
    }

    async fn try_once(
        &self,
        plan: &Plan<'_>,
        bps: u16,
        mode: FeeMode,
        amount: u64,
        fee: Option<&PlatformFee>,
        attempts: &mut Vec<SwapAttempt>,
    ) -> Result<Landed, TradeError> {
        let res = self.submit(plan, bps, amount, fee).await;
        let outcome = match &res {
            Ok(_) => AttemptOutcome::Landed,
            Err(e) => AttemptOutcome::Failed(e.to_string()),
        };
        info!(
            attempt = attempts.len() + 1,
            slippage_bps = bps,
            fee_mode = %mode,
            amount,
            ok = res.is_ok(),
            "executor.attempt"
        );
        attempts.push(SwapAttempt {
            slippage_bps: bps,
            fee_mode: mode,
            amount,
            outcome,
        });
        res
    }

    /// Quote -> build swap -> sign -> simulate (mandatory) -> send -> confirm.
    async fn submit(
        &self,
        plan: &Plan<'_>,
        bps: u16,
        amount: u64,
        fee: Option<&PlatformFee>,
    ) -> Result<Landed, TradeError> {
        let quote = self
            .aggregator
            .quote(&QuoteRequest {
                input_mint: plan.input_mint.to_string(),
                output_mint: plan.output_mint.to_string(),
                amount: amount.to_string(),
                slippage_bps: bps,
                platform_fee_bps: fee.map(|f| f.bps),
            })
            .await?;
        let in_amount = quote.in_amount.parse::<u64>().unwrap_or(amount);
        let out_amount = quote.out_amount.parse::<u64>().unwrap_or(0);

        let swap = self
            .aggregator
            .swap(&SwapRequest {
                quote_response: quote,
                user_public_key: plan.signer.pubkey().to_string(),
                wrap_and_unwrap_sol: true,
                fee_account: fee.map(|f| f.account.clone()),
                compute_unit_price_micro_lamports: plan.priority_fee,
            })
            .await?;

        let tx_bytes = base64::engine::general_purpose::STANDARD
            .decode(&swap.swap_transaction)
            .map_err(|e| TradeError::Swap(format!("swap transaction is not base64: {e}")))?;
        let unsigned: VersionedTransaction = bincode::deserialize(&tx_bytes)
            .map_err(|e| TradeError::Swap(format!("swap transaction does not decode: {e}")))?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[plan.signer])
            .map_err(|e| TradeError::Swap(format!("signing failed: {e}")))?;

        self.chain.simulate(&signed).await?;

        if self.settings.dry_run {
            info!("dry_run: simulation ok, skipping send");
            return Ok(Landed {
                signature: DRY_RUN_SIGNATURE.into(),
                in_amount,
                out_amount,
                fee_applied: fee.is_some(),
            });
        }

        let signature = self.chain.send(&signed).await?;
        self.chain.confirm(&signature).await?;
        Ok(Landed {
            signature: signature.to_string(),
            in_amount,
            out_amount,
            fee_applied: fee.is_some(),
        })
    }

    fn finish(
        &self,
        plan: &Plan<'_>,
        bps: u16,
        landed: Landed,
        attempts: Vec<SwapAttempt>,
    ) -> SwapResult {
        let message = (attempts.len() > 1).then(|| {
            format!(
                "swap succeeded after {} attempts at {} bps slippage",
                attempts.len(),
                bps
            )
        });
        info!(
            signature = %landed.signature,
            slippage_bps = bps,
            attempts = attempts.len(),
            "executor.landed"
        );
        SwapResult {
            signature: landed.signature,
            input_mint: plan.input_mint.to_string(),
            output_mint: plan.output_mint.to_string(),
            input_amount: landed.in_amount,
            output_amount: landed.out_amount,
            input_amount_ui: from_base_units(landed.in_amount, plan.input_decimals),
            output_amount_ui: from_base_units(landed.out_amount, plan.output_decimals),
            slippage_bps: bps,
            fee_applied: landed.fee_applied,
            attempts,
            message,
        }
    }
}
