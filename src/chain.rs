use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use solana_sdk::{pubkey, pubkey::Pubkey, system_program};
use solana_transaction_status::{
    UiTransactionEncoding, UiTransactionStatusMeta, UiTransactionTokenBalance,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::domain::NATIVE_MINT;
use crate::error::TradeError;

pub const TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const TOKEN_2022_PROGRAM_ID: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
const NATIVE_DECIMALS: u8 = 9;
/// Byte offset of `decimals` in the SPL mint layout.
const MINT_DECIMALS_OFFSET: usize = 44;
/// Lamport deltas below this are rent/fee noise, not a trade leg.
/// One token account costs 0.00203928 SOL in rent, plus fees.
const NATIVE_DUST_SOL: f64 = 0.003;

/// Everything the executor and handlers need from the chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn native_balance(&self, owner: &Pubkey) -> Result<u64, TradeError>;

    /// Human-unit balance of `mint` held by `owner` (SOL for the native mint).
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<f64, TradeError>;

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, TradeError>;

    /// Whether the owner's associated token account for `mint` exists.
    async fn token_account_exists(&self, owner: &Pubkey, mint: &Pubkey) -> Result<bool, TradeError>;

    /// Creates the owner's associated token account for `mint` if it is missing.
    async fn ensure_token_account(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
    ) -> Result<Pubkey, TradeError>;

    /// Micro-lamports per CU; callers treat failure as "no priority fee".
    async fn priority_fee_micro_lamports(&self) -> Result<u64, TradeError>;

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), TradeError>;

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, TradeError>;

    async fn confirm(&self, signature: &Signature) -> Result<(), TradeError>;
}

/// A swap observed on someone else's wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSwap {
    pub signature: String,
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount: f64,
    pub output_amount: f64,
}

#[async_trait]
pub trait WalletActivity: Send + Sync {
    /// Most recent successful swaps by `wallet`, newest first.
    async fn recent_swaps(
        &self,
        wallet: &Pubkey,
        limit: usize,
    ) -> Result<Vec<ObservedSwap>, TradeError>;
}

pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

/// `CreateIdempotent` on the associated token account program.
pub fn create_ata_idempotent_ix(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Instruction {
    let ata = associated_token_address(owner, mint, token_program);
    Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        data: vec![1],
    }
}

pub fn parse_pubkey(raw: &str) -> Result<Pubkey, TradeError> {
    Pubkey::from_str(raw).map_err(|_| TradeError::Validation(format!("invalid address: {raw}")))
}

pub fn is_native(mint: &Pubkey) -> bool {
    mint.to_string() == NATIVE_MINT
}

pub struct SolanaRpc {
    rpc: RpcClient,
    confirm_timeout: Duration,
}

impl SolanaRpc {
    pub fn new(url: String, confirm_timeout: Duration) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(url, CommitmentConfig::confirmed()),
            confirm_timeout,
        }
    }

    async fn token_program(&self, mint: &Pubkey) -> Result<Pubkey, TradeError> {
        let account = self
            .rpc
            .get_account_with_commitment(mint, CommitmentConfig::confirmed())
            .await?
            .value
            .ok_or_else(|| TradeError::NotFound(format!("mint {mint}")))?;
        if account.owner == TOKEN_PROGRAM_ID || account.owner == TOKEN_2022_PROGRAM_ID {
            Ok(account.owner)
        } else {
            Err(TradeError::Validation(format!("{mint} is not a token mint")))
        }
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, TradeError> {
        Ok(self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await?
            .value
            .is_some())
    }
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    async fn native_balance(&self, owner: &Pubkey) -> Result<u64, TradeError> {
        Ok(self.rpc.get_balance(owner).await?)
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<f64, TradeError> {
        if is_native(mint) {
            return Ok(self.native_balance(owner).await? as f64 / LAMPORTS_PER_SOL);
        }
        let program = self.token_program(mint).await?;
        let ata = associated_token_address(owner, mint, &program);
        if !self.account_exists(&ata).await? {
            return Ok(0.0);
        }
        let amount = self.rpc.get_token_account_balance(&ata).await?;
        Ok(amount
            .ui_amount
            .or_else(|| amount.ui_amount_string.parse().ok())
            .unwrap_or(0.0))
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, TradeError> {
        if is_native(mint) {
            return Ok(NATIVE_DECIMALS);
        }
        let account = self
            .rpc
            .get_account_with_commitment(mint, CommitmentConfig::confirmed())
            .await?
            .value
            .ok_or_else(|| TradeError::NotFound(format!("mint {mint}")))?;
        account
            .data
            .get(MINT_DECIMALS_OFFSET)
            .copied()
            .ok_or_else(|| TradeError::Validation(format!("{mint} is not a token mint")))
    }

    async fn token_account_exists(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<bool, TradeError> {
        let program = self.token_program(mint).await?;
        self.account_exists(&associated_token_address(owner, mint, &program)).await
    }

    async fn ensure_token_account(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
    ) -> Result<Pubkey, TradeError> {
        let owner = payer.pubkey();
        let program = self.token_program(mint).await?;
        let ata = associated_token_address(&owner, mint, &program);
        if self.account_exists(&ata).await? {
            return Ok(ata);
        }

        let ix = create_ata_idempotent_ix(&owner, &owner, mint, &program);
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(&[ix], Some(&owner), &[payer], blockhash);
        let sig = self
            .rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| TradeError::classify(format!("create token account for {mint}: {e}")))?;
        info!(%mint, %ata, %sig, "chain.token_account_created");
        Ok(ata)
    }

    async fn priority_fee_micro_lamports(&self) -> Result<u64, TradeError> {
        // Not all RPCs support getRecentPrioritizationFees. We keep it best-effort.
        let fees = self.rpc.get_recent_prioritization_fees(&[]).await?;
        let Some(p) = fees.iter().map(|f| f.prioritization_fee).max() else {
            return Ok(0);
        };
        Ok(p.clamp(1, 50_000))
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), TradeError> {
        let sim = self
            .rpc
            .simulate_transaction_with_config(
                tx,
                RpcSimulateTransactionConfig {
                    sig_verify: false,
                    replace_recent_blockhash: true,
                    commitment: Some(CommitmentConfig::processed()),
                    ..RpcSimulateTransactionConfig::default()
                },
            )
            .await?;

        if let Some(err) = sim.value.err {
            let logs = sim.value.logs.unwrap_or_default().join(" | ");
            return Err(TradeError::classify(format!(
                "simulateTransaction failed: {err}; logs: {logs}"
            )));
        }
        Ok(())
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, TradeError> {
        self.rpc
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: true, // simulated already
                    preflight_commitment: Some(CommitmentConfig::processed().commitment),
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
            .map_err(|e| TradeError::classify(format!("sendTransaction failed: {e}")))
    }

    async fn confirm(&self, signature: &Signature) -> Result<(), TradeError> {
        let started = Instant::now();
        while started.elapsed() < self.confirm_timeout {
            match self.rpc.get_signature_status(signature).await? {
                Some(Ok(())) => return Ok(()),
                Some(Err(err)) => {
                    return Err(TradeError::classify(format!(
                        "transaction {signature} failed: {err}"
                    )))
                }
                None => tokio::time::sleep(Duration::from_secs(2)).await,
            }
        }
        Err(TradeError::TransientRpc(format!(
            "transaction {signature} not confirmed within {}s",
            self.confirm_timeout.as_secs()
        )))
    }
}

#[async_trait]
impl WalletActivity for SolanaRpc {
    async fn recent_swaps(
        &self,
        wallet: &Pubkey,
        limit: usize,
    ) -> Result<Vec<ObservedSwap>, TradeError> {
        let statuses = self
            .rpc
            .get_signatures_for_address_with_config(
                wallet,
                GetConfirmedSignaturesForAddress2Config {
                    limit: Some(limit),
                    commitment: Some(CommitmentConfig::confirmed()),
                    ..Default::default()
                },
            )
            .await?;

        let owner = wallet.to_string();
        let mut swaps = Vec::new();
        for status in statuses.into_iter().filter(|s| s.err.is_none()) {
            let Ok(sig) = Signature::from_str(&status.signature) else {
                continue;
            };
            let tx = match self
                .rpc
                .get_transaction_with_config(
                    &sig,
                    RpcTransactionConfig {
                        encoding: Some(UiTransactionEncoding::Json),
                        commitment: Some(CommitmentConfig::confirmed()),
                        max_supported_transaction_version: Some(0),
                    },
                )
                .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    debug!(
                        signature = %status.signature,
                        error = %e,
                        "chain.get_transaction_failed"
                    );
                    continue;
                }
            };
            let Some(meta) = tx.transaction.meta else {
                continue;
            };
            if let Some(swap) = infer_swap(&status.signature, balance_deltas(&owner, &meta)) {
                swaps.push(swap);
            }
        }
        Ok(swaps)
    }
}

/// Net per-mint change for `owner` across one transaction. Assumes `owner` paid the fee.
pub fn balance_deltas(owner: &str, meta: &UiTransactionStatusMeta) -> HashMap<String, f64> {
    let mut deltas: HashMap<String, f64> = HashMap::new();

    let pre: Option<Vec<UiTransactionTokenBalance>> = meta.pre_token_balances.clone().into();
    let post: Option<Vec<UiTransactionTokenBalance>> = meta.post_token_balances.clone().into();
    let owned = |b: &UiTransactionTokenBalance| {
        let o: Option<String> = b.owner.clone().into();
        o.as_deref() == Some(owner)
    };
    for b in post.unwrap_or_default().iter().filter(|b| owned(b)) {
        *deltas.entry(b.mint.clone()).or_default() += b.ui_token_amount.ui_amount.unwrap_or(0.0);
    }
    for b in pre.unwrap_or_default().iter().filter(|b| owned(b)) {
        *deltas.entry(b.mint.clone()).or_default() -= b.ui_token_amount.ui_amount.unwrap_or(0.0);
    }

    if let (Some(pre), Some(post)) = (meta.pre_balances.first(), meta.post_balances.first()) {
        let native = (*post as f64 - *pre as f64 + meta.fee as f64) / LAMPORTS_PER_SOL;
        *deltas.entry(NATIVE_MINT.to_string()).or_default() += native;
    }
    deltas
}

/// Reads one sold leg and one bought leg out of the balance deltas.
pub fn infer_swap(signature: &str, deltas: HashMap<String, f64>) -> Option<ObservedSwap> {
    let significant = |mint: &str, d: f64| {
        if mint == NATIVE_MINT {
            d.abs() > NATIVE_DUST_SOL
        } else {
            d != 0.0
        }
    };
    let mut sold: Option<(String, f64)> = None;
    let mut bought: Option<(String, f64)> = None;
    for (mint, d) in deltas {
        if !significant(&mint, d) {
            continue;
        }
        if d < 0.0 && sold.as_ref().map_or(true, |(_, s)| d < *s) {
            sold = Some((mint, d));
        } else if d > 0.0 && bought.as_ref().map_or(true, |(_, b)| d > *b) {
            bought = Some((mint, d));
        }
    }
    let (input_mint, input) = sold?;
    let (output_mint, output) = bought?;
    Some(ObservedSwap {
        signature: signature.to_string(),
        input_mint,
        output_mint,
        input_amount: -input,
        output_amount: output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::USDC_MINT;

    #[test]
    fn infers_sol_to_usdc_swap() {
        let deltas = HashMap::from([
            (NATIVE_MINT.to_string(), -1.5),
            (USDC_MINT.to_string(), 210.0),
        ]);
        let swap = infer_swap("sig", deltas).unwrap();
        assert_eq!(swap.input_mint, NATIVE_MINT);
        assert_eq!(swap.output_mint, USDC_MINT);
        assert_eq!(swap.input_amount, 1.5);
        assert_eq!(swap.output_amount, 210.0);
    }

    #[test]
    fn native_dust_is_not_a_leg() {
        let deltas = HashMap::from([
            (NATIVE_MINT.to_string(), -0.00204),
            (USDC_MINT.to_string(), 5.0),
        ]);
        assert!(infer_swap("sig", deltas).is_none());

        let small_trade = HashMap::from([
            (NATIVE_MINT.to_string(), -0.01),
            (USDC_MINT.to_string(), 1.4),
        ]);
        let swap = infer_swap("sig", small_trade).unwrap();
        assert_eq!(swap.input_amount, 0.01);
    }

    #[test]
    fn ata_derivation_is_deterministic() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let a = associated_token_address(&owner, &mint, &TOKEN_PROGRAM_ID);
        assert_eq!(a, associated_token_address(&owner, &mint, &TOKEN_PROGRAM_ID));
        assert_ne!(a, associated_token_address(&owner, &mint, &TOKEN_2022_PROGRAM_ID));

        let ix = create_ata_idempotent_ix(&owner, &owner, &mint, &TOKEN_PROGRAM_ID);
        assert_eq!(ix.data, vec![1]);
        assert_eq!(ix.accounts[1].pubkey, a);
        assert!(ix.accounts[0].is_signer);
    }
}
