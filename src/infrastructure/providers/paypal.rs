//! PayPal REST (v1 payments API) provider.
//!
//! Flow: an OAuth2 client-credentials token is fetched and cached, `create`
//! posts a `sale` payment and returns its approval URL, `confirm` executes the
//! approved payment with the payer id, `refund` refunds the sale behind the
//! payment. Every transport or API fault is turned into a failed
//! [`PaymentResult`]; nothing escapes as an error.

use crate::domain::money::Money;
use crate::domain::payment_result::PaymentResult;
use crate::domain::ports::{PaymentProvider, REQUEST_ID};
use crate::domain::transaction::{Details, PaymentStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};

pub const PAYPAL_PROVIDER: &str = "paypal";
pub const SANDBOX_BASE_URL: &str = "https://api.sandbox.paypal.com";
pub const LIVE_BASE_URL: &str = "https://api.paypal.com";
const REQUEST_ID_HEADER: &str = "PayPal-Request-Id";

/// Keys `from_config` cannot do without.
pub const REQUIRED_CONFIG_KEYS: [&str; 2] = ["client_id", "client_secret"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl PayPalConfig {
    /// Reads `client_id`, `client_secret` and optionally `mode`
    /// (`sandbox` | `live`), `base_url` and `timeout_ms`.
    pub fn from_details(config: &Details) -> Result<Self> {
        let value = |key: &str| config.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let missing: Vec<String> = REQUIRED_CONFIG_KEYS
            .iter()
            .filter(|key| value(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PaymentError::InvalidProviderConfig {
                provider: PAYPAL_PROVIDER.to_string(),
                missing,
            });
        }

        let base_url = match (value("base_url"), value("mode")) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, None | Some("sandbox")) => SANDBOX_BASE_URL.to_string(),
            (None, Some("live")) => LIVE_BASE_URL.to_string(),
            (None, Some(other)) => {
                return Err(PaymentError::Validation(format!(
                    "Unknown PayPal mode '{}' (expected sandbox or live)",
                    other
                )));
            }
        };

        let timeout = match value("timeout_ms") {
            Some(ms) => Duration::from_millis(ms.parse().map_err(|_| {
                PaymentError::Validation(format!("Invalid PayPal timeout_ms '{}'", ms))
            })?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            client_id: value("client_id").unwrap_or_default().to_string(),
            client_secret: value("client_secret").unwrap_or_default().to_string(),
            base_url,
            timeout,
        })
    }
}

#[derive(Debug, Error)]
enum PayPalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("PayPal API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Malformed PayPal response: {0}")]
    Malformed(String),
}

impl PayPalError {
    /// Only transport-level timeouts and connection failures are retryable.
    fn is_transient(&self) -> bool {
        matches!(self, PayPalError::Http(e) if e.is_timeout() || e.is_connect())
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PayPalProvider {
    http: Client,
    config: PayPalConfig,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalProvider {
    pub fn new(config: PayPalConfig) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn from_config(config: &Details) -> Result<Self> {
        Self::new(PayPalConfig::from_details(config)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> std::result::Result<String, PayPalError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        debug!("Requesting PayPal access token");
        let response: TokenResponse = send(
            self.http
                .post(self.url("/v1/oauth2/token"))
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .form(&[("grant_type", "client_credentials")]),
        )
        .await?;

        let lifetime =
            Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    async fn fetch_payment(
        &self,
        payment_id: &str,
    ) -> std::result::Result<PaymentResource, PayPalError> {
        let token = self.access_token().await?;
        send(
            self.http
                .get(self.url(&format!("/v1/payments/payment/{}", payment_id)))
                .bearer_auth(token),
        )
        .await
    }

    /// The create call. Carries `PayPal-Request-Id` when the engine passed a
    /// request id, so PayPal answers a repeat with the payment it already
    /// created.
    fn create_request(
        &self,
        token: &str,
        money: &Money,
        method_data: &Details,
        metadata: &Details,
    ) -> RequestBuilder {
        let body = json!({
            "intent": "sale",
            "payer": { "payment_method": "paypal" },
            "transactions": [{
                "amount": {
                    "total": money.amount.value().to_string(),
                    "currency": money.currency.as_str(),
                },
                "description": metadata.get("description"),
            }],
            "redirect_urls": {
                "return_url": method_data.get("return_url"),
                "cancel_url": method_data.get("cancel_url"),
            },
        });

        let request = self
            .http
            .post(self.url("/v1/payments/payment"))
            .bearer_auth(token)
            .json(&body);
        match metadata.get(REQUEST_ID) {
            Some(request_id) => request.header(REQUEST_ID_HEADER, request_id),
            None => request,
        }
    }

    async fn try_create(
        &self,
        money: &Money,
        method_data: &Details,
        metadata: &Details,
    ) -> std::result::Result<PaymentResult, PayPalError> {
        let token = self.access_token().await?;
        let payment: PaymentResource =
            send(self.create_request(&token, money, method_data, metadata)).await?;
        created_result(payment)
    }

    async fn try_confirm(
        &self,
        payment_id: &str,
        payer_id: &str,
    ) -> std::result::Result<PaymentResult, PayPalError> {
        let token = self.access_token().await?;
        let payment: PaymentResource = send(
            self.http
                .post(self.url(&format!("/v1/payments/payment/{}/execute", payment_id)))
                .bearer_auth(token)
                .json(&json!({ "payer_id": payer_id })),
        )
        .await?;
        executed_result(payment, payer_id)
    }

    async fn try_refund(
        &self,
        payment_id: &str,
        amount: Option<&Money>,
        reason: Option<&str>,
    ) -> std::result::Result<PaymentResult, PayPalError> {
        let payment = self.fetch_payment(payment_id).await?;
        let sale = payment
            .sale()
            .ok_or_else(|| PayPalError::Malformed(format!("payment {} has no sale", payment_id)))?;

        let mut body = serde_json::Map::new();
        if let Some(money) = amount {
            body.insert(
                "amount".to_string(),
                json!({
                    "total": money.amount.value().to_string(),
                    "currency": sale.amount.currency,
                }),
            );
        }
        if let Some(reason) = reason {
            body.insert("description".to_string(), json!(reason));
        }

        let token = self.access_token().await?;
        let refund: RefundResource = send(
            self.http
                .post(self.url(&format!("/v1/payments/sale/{}/refund", sale.id)))
                .bearer_auth(token)
                .json(&body),
        )
        .await?;
        refund_result(refund, &sale.id)
    }

    async fn try_status(
        &self,
        payment_id: &str,
    ) -> std::result::Result<PaymentResult, PayPalError> {
        let payment = self.fetch_payment(payment_id).await?;
        status_result(payment)
    }

    fn failure(&self, operation: &str, err: PayPalError) -> PaymentResult {
        error!(provider = PAYPAL_PROVIDER, operation, error = %err, "PayPal call failed");
        if err.is_transient() {
            PaymentResult::transient(err.to_string())
        } else {
            PaymentResult::declined(err.to_string())
        }
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn name(&self) -> &str {
        PAYPAL_PROVIDER
    }

    async fn create_payment_intent(
        &self,
        money: &Money,
        method_data: &Details,
        metadata: &Details,
    ) -> PaymentResult {
        self.try_create(money, method_data, metadata)
            .await
            .unwrap_or_else(|e| self.failure("create_payment_intent", e))
    }

    async fn confirm_payment(
        &self,
        provider_reference: &str,
        method_data: &Details,
    ) -> PaymentResult {
        let Some(payer_id) = method_data.get("payer_id").filter(|p| !p.is_empty()) else {
            return PaymentResult::declined("Missing payer_id")
                .with_provider_reference(provider_reference);
        };
        self.try_confirm(provider_reference, payer_id)
            .await
            .unwrap_or_else(|e| {
                self.failure("confirm_payment", e)
                    .with_provider_reference(provider_reference)
            })
    }

    async fn refund_payment(
        &self,
        provider_reference: &str,
        amount: Option<&Money>,
        reason: Option<&str>,
    ) -> PaymentResult {
        self.try_refund(provider_reference, amount, reason)
            .await
            .unwrap_or_else(|e| self.failure("refund_payment", e))
    }

    async fn get_payment_status(&self, provider_reference: &str) -> PaymentResult {
        self.try_status(provider_reference)
            .await
            .unwrap_or_else(|e| self.failure("get_payment_status", e))
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> std::result::Result<T, PayPalError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body: ApiErrorBody = response.json().await.unwrap_or_default();
        return Err(PayPalError::Api {
            status: status.as_u16(),
            message: body.describe(),
        });
    }
    Ok(response.json().await?)
}

fn built(result: Result<PaymentResult>) -> std::result::Result<PaymentResult, PayPalError> {
    result.map_err(|e| PayPalError::Malformed(e.to_string()))
}

fn parse_decimal(value: &str) -> std::result::Result<Decimal, PayPalError> {
    value
        .parse()
        .map_err(|_| PayPalError::Malformed(format!("'{}' is not a decimal amount", value)))
}

fn created_result(payment: PaymentResource) -> std::result::Result<PaymentResult, PayPalError> {
    let approval_url = payment
        .links
        .iter()
        .find(|link| link.rel == "approval_url")
        .map(|link| link.href.clone())
        .ok_or_else(|| PayPalError::Malformed("missing approval_url link".to_string()))?;

    built(
        PaymentResult::succeeded(payment.id, PaymentStatus::Pending)
            .detail("approval_url", approval_url)
            .detail("state", payment.state)
            .build(),
    )
}

fn executed_result(
    payment: PaymentResource,
    payer_id: &str,
) -> std::result::Result<PaymentResult, PayPalError> {
    if payment.state == "failed" {
        return Ok(PaymentResult::declined(format!("Payment {} failed", payment.id))
            .with_provider_reference(payment.id));
    }
    let total = payment
        .transactions
        .first()
        .map(|tx| parse_decimal(&tx.amount.total))
        .transpose()?
        .ok_or_else(|| PayPalError::Malformed("executed payment has no transaction".to_string()))?;
    let fee = payment
        .sale()
        .and_then(|sale| sale.transaction_fee.as_ref())
        .map(|fee| parse_decimal(&fee.value))
        .transpose()?
        .unwrap_or(Decimal::ZERO);

    let mut builder = PaymentResult::succeeded(payment.id.clone(), PaymentStatus::Completed)
        .amount_processed(total)
        .fee_amount(fee)
        .detail("payer_id", payer_id);
    if let Some(sale) = payment.sale() {
        builder = builder.detail("sale_id", sale.id.clone());
    }
    built(builder.build())
}

fn refund_result(
    refund: RefundResource,
    sale_id: &str,
) -> std::result::Result<PaymentResult, PayPalError> {
    if refund.state == "failed" {
        return Ok(PaymentResult::declined(format!("Refund {} failed", refund.id)));
    }
    built(
        PaymentResult::succeeded(refund.id, PaymentStatus::Refunded)
            .amount_processed(parse_decimal(&refund.amount.total)?)
            .detail("sale_id", sale_id)
            .detail("state", refund.state)
            .build(),
    )
}

fn status_result(payment: PaymentResource) -> std::result::Result<PaymentResult, PayPalError> {
    let status = match payment.sale().map(|sale| sale.state.as_str()) {
        Some("completed") => PaymentStatus::Completed,
        Some("refunded") => PaymentStatus::Refunded,
        Some("partially_refunded") => PaymentStatus::PartiallyRefunded,
        _ => match payment.state.as_str() {
            "created" => PaymentStatus::Pending,
            "approved" => PaymentStatus::Processing,
            "canceled" | "expired" => PaymentStatus::Cancelled,
            "failed" => PaymentStatus::Failed,
            other => {
                return Err(PayPalError::Malformed(format!("unknown payment state '{}'", other)));
            }
        },
    };
    built(
        PaymentResult::succeeded(payment.id, status)
            .detail("state", payment.state)
            .build(),
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    name: Option<String>,
    message: Option<String>,
}

impl ApiErrorBody {
    fn describe(&self) -> String {
        match (&self.name, &self.message) {
            (Some(name), Some(message)) => format!("{}: {}", name, message),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "no error body".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentResource {
    id: String,
    state: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    transactions: Vec<TransactionResource>,
}

impl PaymentResource {
    fn sale(&self) -> Option<&Sale> {
        self.transactions
            .iter()
            .flat_map(|tx| tx.related_resources.iter())
            .find_map(|resource| resource.sale.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResource {
    amount: AmountResource,
    #[serde(default)]
    related_resources: Vec<RelatedResource>,
}

#[derive(Debug, Deserialize)]
struct AmountResource {
    total: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RelatedResource {
    sale: Option<Sale>,
}

#[derive(Debug, Deserialize)]
struct Sale {
    id: String,
    state: String,
    amount: AmountResource,
    transaction_fee: Option<FeeResource>,
}

#[derive(Debug, Deserialize)]
struct FeeResource {
    value: String,
}

#[derive(Debug, Deserialize)]
struct RefundResource {
    id: String,
    state: String,
    amount: AmountResource,
}
