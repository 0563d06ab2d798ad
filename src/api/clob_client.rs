//! Polymarket CLOB (Central Limit Order Book) client for order execution.
//!
//! The CLOB is Polymarket's off-chain order matching engine that settles on Polygon.
//! This client handles:
//! - L2 request authentication (HMAC over the API secret)
//! - Order signing using EIP-712 typed data
//! - Market lookup, order book snapshots and order submission
//! - Collateral (USDC) balance queries

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ExchangeError, NetworkError};
use crate::models::TradeSide;

use super::auth::ApiCredentials;
use super::types::{BalanceAllowance, MarketInfo, OrderBook};
use super::Exchange;

/// CLOB API base URL
pub const CLOB_URL: &str = "https://clob.polymarket.com";

/// Polymarket CTF Exchange contract on Polygon
pub const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
const ORDER_TTL_SECS: u64 = 3600;

/// CLOB API client for executing trades on Polymarket.
pub struct ClobClient {
    http: Client,
    base_url: String,
    signer: PrivateKeySigner,
    credentials: ApiCredentials,
    chain_id: u64,
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Good-til-cancelled limit order
    Gtc,
    /// Fill-or-kill: fills completely at the limit price or not at all
    Fok,
    /// Good-til-date limit order
    Gtd,
}

/// Signature type for CLOB orders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// EOA signature
    Eoa = 0,
}

/// Signed order ready for submission
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub side: TradeSide,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Order submission request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload<'a> {
    order: &'a SignedOrder,
    owner: &'a str,
    order_type: OrderType,
}

/// Response from order placement
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default, rename = "orderID", alias = "orderId")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default, rename = "transactionsHashes", alias = "transactionHash")]
    pub transaction_hashes: Option<TxHashes>,
}

/// The CLOB reports settlement hashes as a list; older responses sent one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TxHashes {
    Many(Vec<String>),
    One(String),
}

impl OrderResponse {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error_msg: reason.into(),
            ..Self::default()
        }
    }

    pub fn transaction_hash(&self) -> Option<&str> {
        match self.transaction_hashes.as_ref()? {
            TxHashes::Many(all) => all.first().map(String::as_str),
            TxHashes::One(one) => Some(one.as_str()),
        }
    }
}

impl ClobClient {
    /// Create a new CLOB client.
    ///
    /// # Arguments
    /// * `private_key` - Ethereum private key (hex string, with or without 0x prefix)
    /// * `credentials` - L2 API key, secret and passphrase
    /// * `chain_id` - Polygon chain ID (137 for mainnet, 80002 for Amoy testnet)
    pub fn new(private_key: &str, credentials: ApiCredentials, chain_id: u64) -> Result<Self> {
        let pk = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer = PrivateKeySigner::from_str(pk).context("Invalid private key")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: CLOB_URL.to_string(),
            signer,
            credentials,
            chain_id,
        })
    }

    /// Read-only client for dry runs: public market and book endpoints work,
    /// authenticated calls are rejected by the exchange.
    pub fn public(chain_id: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: CLOB_URL.to_string(),
            signer: PrivateKeySigner::random(),
            credentials: ApiCredentials::new(String::new(), String::new(), String::new()),
            chain_id,
        })
    }

    /// Get the wallet address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn address_hex(&self) -> String {
        format!("{:?}", self.address())
    }

    /// Get market information by condition ID.
    pub async fn get_market(&self, condition_id: &str) -> Result<MarketInfo, ExchangeError> {
        let path = format!("/markets/{condition_id}");
        Ok(self.public_get(&path, &[]).await?)
    }

    /// Get the order book for a token, both sides ordered best price first.
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ExchangeError> {
        let book: OrderBook = self.public_get("/book", &[("token_id", token_id)]).await?;
        Ok(book.best_first())
    }

    /// USDC available to the signing wallet.
    pub async fn get_collateral_balance(&self) -> Result<Decimal, ExchangeError> {
        let path = "/balance-allowance";
        let headers = self
            .credentials
            .headers(&self.address_hex(), "GET", path, "")
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;

        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .headers(headers)
            .query(&[("asset_type", "COLLATERAL"), ("signature_type", "0")])
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(path, e))?;

        let allowance: BalanceAllowance = read_json(path, response).await?;
        Ok(allowance.usdc())
    }

    /// Build and sign an order for `size` shares at `price`.
    pub async fn create_order(
        &self,
        side: TradeSide,
        token_id: &str,
        size: Decimal,
        price: Decimal,
    ) -> Result<SignedOrder, ExchangeError> {
        let maker = self.address_hex();
        let signer = maker.clone();
        let taker = ZERO_ADDRESS.to_string();

        // BUY: maker pays USDC and receives shares. SELL: the reverse.
        let shares = Self::to_base_units(size);
        let usdc = Self::to_base_units(size * price);
        let (maker_amount, taker_amount) = match side {
            TradeSide::Buy => (usdc, shares),
            TradeSide::Sell => (shares, usdc),
        };

        let expiration = (SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?
            .as_secs()
            + ORDER_TTL_SECS)
            .to_string();

        let mut order = SignedOrder {
            salt: Self::generate_salt(),
            maker,
            signer,
            taker,
            token_id: token_id.to_string(),
            maker_amount,
            taker_amount,
            side,
            expiration,
            nonce: "0".to_string(),
            fee_rate_bps: "0".to_string(),
            signature_type: SignatureType::Eoa as u8,
            signature: String::new(),
        };

        order.signature = self
            .sign_order(&order)
            .await
            .map_err(|e| ExchangeError::Signing(format!("{e:#}")))?;

        Ok(order)
    }

    /// Submit a signed order. A fill-or-kill order the book cannot absorb
    /// comes back as an unsuccessful response, not an error.
    pub async fn submit_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
    ) -> Result<OrderResponse, ExchangeError> {
        let path = "/order";
        let payload = OrderPayload {
            order,
            owner: &self.credentials.api_key,
            order_type,
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        let headers = self
            .credentials
            .headers(&self.address_hex(), "POST", path, &body)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;

        debug!(token_id = %order.token_id, side = %order.side, ?order_type, "Submitting order");

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(path, e))?;

        let status = response.status();
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            let rejection = match serde_json::from_str::<OrderResponse>(&text) {
                Ok(parsed) if !parsed.error_msg.is_empty() => OrderResponse {
                    success: false,
                    ..parsed
                },
                _ => OrderResponse::rejected(format!("{status}: {text}")),
            };
            return Ok(rejection);
        }

        Ok(read_json(path, response).await?)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, NetworkError> {
        let response = self
            .http
            .request(Method::GET, format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(path, e))?;

        read_json(path, response).await
    }

    /// Sign an order using EIP-712 typed data.
    async fn sign_order(&self, order: &SignedOrder) -> Result<String> {
        let order_hash = Self::compute_order_hash(order)?;
        let domain_hash = self.compute_domain_separator()?;

        // keccak256("\x19\x01" ‖ domainSeparator ‖ orderHash)
        let mut message = vec![0x19, 0x01];
        message.extend_from_slice(&domain_hash);
        message.extend_from_slice(&order_hash);

        let final_hash = alloy_primitives::keccak256(&message);

        let signature = self
            .signer
            .sign_hash(&final_hash)
            .await
            .context("Failed to sign order")?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Compute the EIP-712 order struct hash.
    fn compute_order_hash(order: &SignedOrder) -> Result<[u8; 32]> {
        let type_hash = alloy_primitives::keccak256(
            b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)"
        );

        let side = match order.side {
            TradeSide::Buy => 0u8,
            TradeSide::Sell => 1u8,
        };

        let mut encoded = Vec::with_capacity(13 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(&Self::encode_uint256(&order.salt)?);
        encoded.extend_from_slice(&Self::encode_address(&order.maker)?);
        encoded.extend_from_slice(&Self::encode_address(&order.signer)?);
        encoded.extend_from_slice(&Self::encode_address(&order.taker)?);
        encoded.extend_from_slice(&Self::encode_uint256(&order.token_id)?);
        encoded.extend_from_slice(&Self::encode_uint256(&order.maker_amount)?);
        encoded.extend_from_slice(&Self::encode_uint256(&order.taker_amount)?);
        encoded.extend_from_slice(&Self::encode_uint256(&order.expiration)?);
        encoded.extend_from_slice(&Self::encode_uint256(&order.nonce)?);
        encoded.extend_from_slice(&Self::encode_uint256(&order.fee_rate_bps)?);
        encoded.extend_from_slice(&Self::encode_uint8(side));
        encoded.extend_from_slice(&Self::encode_uint8(order.signature_type));

        Ok(alloy_primitives::keccak256(&encoded).0)
    }

    /// Compute the EIP-712 domain separator.
    fn compute_domain_separator(&self) -> Result<[u8; 32]> {
        let type_hash = alloy_primitives::keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let name_hash = alloy_primitives::keccak256(b"Polymarket CTF Exchange");
        let version_hash = alloy_primitives::keccak256(b"1");

        let mut encoded = Vec::with_capacity(5 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(name_hash.as_slice());
        encoded.extend_from_slice(version_hash.as_slice());
        encoded.extend_from_slice(&Self::encode_uint256(&self.chain_id.to_string())?);
        encoded.extend_from_slice(&Self::encode_address(CTF_EXCHANGE)?);

        Ok(alloy_primitives::keccak256(&encoded).0)
    }

    /// Convert a USDC or share amount to 6-decimal base units.
    fn to_base_units(amount: Decimal) -> String {
        (amount * Decimal::from(1_000_000u64)).trunc().to_string()
    }

    /// Encode address to 32-byte padded format.
    fn encode_address(addr: &str) -> Result<[u8; 32]> {
        let addr = Address::from_str(addr).with_context(|| format!("Invalid address {addr}"))?;
        let mut buf = [0u8; 32];
        buf[12..].copy_from_slice(addr.as_slice());
        Ok(buf)
    }

    /// Encode uint256 from a decimal string.
    fn encode_uint256(value: &str) -> Result<[u8; 32]> {
        let n = U256::from_str_radix(value, 10)
            .with_context(|| format!("Invalid uint256 {value}"))?;
        Ok(n.to_be_bytes())
    }

    /// Encode uint8 to 32-byte padded format.
    fn encode_uint8(value: u8) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[31] = value;
        buf
    }

    fn generate_salt() -> String {
        (uuid::Uuid::new_v4().as_u128() >> 64).to_string()
    }
}

/// Helper to create a client from environment variables.
impl ClobClient {
    /// Create from environment variables:
    /// - POLYMARKET_PRIVATE_KEY
    /// - POLYMARKET_API_KEY
    /// - POLYMARKET_API_SECRET
    /// - POLYMARKET_API_PASSPHRASE
    /// - POLYMARKET_CHAIN_ID (defaults to 137)
    pub fn from_env() -> Result<Self> {
        let private_key =
            std::env::var("POLYMARKET_PRIVATE_KEY").context("POLYMARKET_PRIVATE_KEY not set")?;
        let api_key = std::env::var("POLYMARKET_API_KEY").context("POLYMARKET_API_KEY not set")?;
        let api_secret =
            std::env::var("POLYMARKET_API_SECRET").context("POLYMARKET_API_SECRET not set")?;
        let api_passphrase = std::env::var("POLYMARKET_API_PASSPHRASE")
            .context("POLYMARKET_API_PASSPHRASE not set")?;
        let chain_id: u64 = std::env::var("POLYMARKET_CHAIN_ID")
            .unwrap_or_else(|_| "137".to_string())
            .parse()
            .context("Invalid POLYMARKET_CHAIN_ID")?;

        let credentials = ApiCredentials::new(api_key, api_secret, api_passphrase);
        Self::new(&private_key, credentials, chain_id)
    }
}

async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, NetworkError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NetworkError::Status {
            endpoint: endpoint.to_string(),
            status,
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| NetworkError::from_reqwest(endpoint, e))
}

#[async_trait]
impl Exchange for ClobClient {
    async fn get_market(&self, market_id: &str) -> Result<MarketInfo, ExchangeError> {
        ClobClient::get_market(self, market_id).await
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ExchangeError> {
        ClobClient::get_order_book(self, token_id).await
    }

    async fn create_order(
        &self,
        side: TradeSide,
        token_id: &str,
        size: Decimal,
        price: Decimal,
    ) -> Result<SignedOrder, ExchangeError> {
        ClobClient::create_order(self, side, token_id, size, price).await
    }

    async fn submit_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
    ) -> Result<OrderResponse, ExchangeError> {
        ClobClient::submit_order(self, order, order_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Well-known anvil development key.
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn client() -> ClobClient {
        let credentials = ApiCredentials::new("key".into(), "c2VjcmV0".into(), "pass".into());
        ClobClient::new(TEST_KEY, credentials, 137).unwrap()
    }

    #[test]
    fn test_to_base_units() {
        assert_eq!(ClobClient::to_base_units(dec!(100.5)), "100500000");
        assert_eq!(ClobClient::to_base_units(dec!(0.0000009)), "0");
    }

    #[test]
    fn test_encode_uint8() {
        let encoded = ClobClient::encode_uint8(1);
        assert_eq!(encoded[31], 1);
        assert!(encoded[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_uint256_rejects_garbage() {
        assert!(ClobClient::encode_uint256("12345").is_ok());
        assert!(ClobClient::encode_uint256("not-a-number").is_err());
    }

    #[tokio::test]
    async fn test_create_order_amounts_follow_side() {
        let client = client();

        let buy = client
            .create_order(TradeSide::Buy, "123", dec!(10), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(buy.maker_amount, "5000000");
        assert_eq!(buy.taker_amount, "10000000");
        assert!(buy.signature.starts_with("0x"));
        assert_eq!(buy.signature.len(), 2 + 65 * 2);

        let sell = client
            .create_order(TradeSide::Sell, "123", dec!(10), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(sell.maker_amount, "10000000");
        assert_eq!(sell.taker_amount, "5000000");
    }

    #[test]
    fn test_order_response_shapes() {
        let ok: OrderResponse = serde_json::from_str(
            r#"{"success": true, "orderID": "0x1", "status": "matched", "transactionsHashes": ["0xabc"]}"#,
        )
        .unwrap();
        assert!(ok.success);
        assert_eq!(ok.transaction_hash(), Some("0xabc"));

        let rejected: OrderResponse =
            serde_json::from_str(r#"{"success": false, "errorMsg": "FOK not filled"}"#).unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.error_msg, "FOK not filled");
        assert_eq!(rejected.transaction_hash(), None);
    }
}
