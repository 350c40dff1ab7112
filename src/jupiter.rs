use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TradeError;

/// Quote + swap-transaction builder, i.e. the external liquidity router.
#[async_trait]
pub trait SwapAggregator: Send + Sync {
    async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, TradeError>;
    async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse, TradeError>;
}

/// USD spot prices keyed by mint.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>, TradeError>;

    async fn price(&self, mint: &str) -> Result<f64, TradeError> {
        let prices = self.prices(&[mint.to_string()]).await?;
        prices
            .get(mint)
            .copied()
            .ok_or_else(|| TradeError::NotFound(format!("no price for {mint}")))
    }
}

#[derive(Clone)]
pub struct JupiterClient {
    base_url: String,
    price_url: String,
    http: Client,
}

impl JupiterClient {
    pub fn new(base_url: String, price_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            price_url: price_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Non-2xx bodies carry Jupiter's `errorCode`, so they are classified rather than dropped.
    async fn read<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        resp: reqwest::Response,
    ) -> Result<T, TradeError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TradeError::classify(format!("jupiter {what} {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| TradeError::Swap(format!("jupiter {what}: undecodable response: {e}")))
    }
}

#[async_trait]
impl SwapAggregator for JupiterClient {
    async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, TradeError> {
        let url = format!("{}/quote", self.base_url);
        let resp = self.http.get(url).query(req).send().await?;
        self.read("quote", resp).await
    }

    async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse, TradeError> {
        let url = format!("{}/swap", self.base_url);
        let resp = self.http.post(url).json(req).send().await?;
        self.read("swap", resp).await
    }
}

#[derive(Debug, Deserialize)]
struct PriceEnvelope {
    data: HashMap<String, Option<PriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: String,
}

#[async_trait]
impl PriceFeed for JupiterClient {
    async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>, TradeError> {
        if mints.is_empty() {
            return Ok(HashMap::new());
        }
        let resp = self
            .http
            .get(&self.price_url)
            .query(&[("ids", mints.join(","))])
            .send()
            .await?;
        let envelope: PriceEnvelope = self.read("price", resp).await?;
        Ok(envelope
            .data
            .into_iter()
            .filter_map(|(mint, entry)| Some((mint, entry?.price.parse::<f64>().ok()?)))
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    /// Amount in the input mint's base units (e.g. USDC has 6 decimals)
    pub amount: String,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: u16,
    #[serde(rename = "platformFeeBps", skip_serializing_if = "Option::is_none")]
    pub platform_fee_bps: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outAmount")]
    pub out_amount: String,
    #[serde(rename = "priceImpactPct", default)]
    pub price_impact_pct: Option<String>,
    #[serde(rename = "routePlan", default)]
    pub route_plan: Vec<serde_json::Value>,

    /// Remaining quote fields, echoed back verbatim to `/swap`.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapRequest {
    #[serde(rename = "quoteResponse")]
    pub quote_response: QuoteResponse,

    #[serde(rename = "userPublicKey")]
    pub user_public_key: String,

    #[serde(rename = "wrapAndUnwrapSol")]
    pub wrap_and_unwrap_sol: bool,

    #[serde(rename = "feeAccount", skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<String>,

    #[serde(rename = "computeUnitPriceMicroLamports", skip_serializing_if = "Option::is_none")]
    pub compute_unit_price_micro_lamports: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    /// base64 encoded VersionedTransaction
    #[serde(rename = "swapTransaction")]
    pub swap_transaction: String,

    #[serde(rename = "lastValidBlockHeight", default)]
    pub last_valid_block_height: u64,
}

pub fn ensure_slippage_bounds(slippage_bps: u16, max_slippage_bps: u16) -> Result<(), TradeError> {
    if slippage_bps == 0 {
        return Err(TradeError::Validation("slippage_bps cannot be 0".into()));
    }
    if slippage_bps > max_slippage_bps {
        return Err(TradeError::Validation(format!(
            "slippage_bps ({slippage_bps}) exceeds max_slippage_bps ({max_slippage_bps})"
        )));
    }
    Ok(())
}
