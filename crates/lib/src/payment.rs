//! PayPal Adaptive Payments client: create a pay key, hand back the approval URL.

use crate::ticket::Currency;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const LIVE_API_BASE: &str = "https://svcs.paypal.com";
const SANDBOX_API_BASE: &str = "https://svcs.sandbox.paypal.com";

/// One payment from a buyer to a single receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub receiver_email: String,
    pub amount: f64,
    pub currency: Currency,
    pub memo: String,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment credentials not configured: {0}")]
    NotConfigured(&'static str),
    #[error("payment request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("payment api error: {0}")]
    Api(String),
    /// The provider answered but refused the payment.
    #[error("payment rejected ({}): {message}", error_id.as_deref().unwrap_or("no error id"))]
    Rejected {
        error_id: Option<String>,
        message: String,
    },
}

const ACCOUNT_NOT_FOUND: &str = "520009";
const CURRENCY_NOT_ACCEPTED: &str = "559044";

/// Why the provider refused a payee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// No account is registered for the receiver email.
    UnknownAccount,
    /// The receiver's account does not take the requested currency.
    CurrencyNotAccepted,
    Other,
}

impl PaymentError {
    /// Classified reason for a `Rejected` answer; `None` for every other error.
    pub fn refusal(&self) -> Option<Refusal> {
        let PaymentError::Rejected { error_id, .. } = self else {
            return None;
        };
        Some(match error_id.as_deref() {
            Some(ACCOUNT_NOT_FOUND) => Refusal::UnknownAccount,
            Some(CURRENCY_NOT_ACCEPTED) => Refusal::CurrencyNotAccepted,
            _ => Refusal::Other,
        })
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// URL the buyer opens to approve the payment.
    async fn approval_url(&self, request: &PaymentRequest) -> Result<String, PaymentError>;
}

#[derive(Debug, Clone, Default)]
pub struct PaypalCredentials {
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub signature: Option<String>,
    pub app_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayRequest<'a> {
    action_type: &'static str,
    currency_code: &'static str,
    fees_payer: &'static str,
    memo: &'a str,
    cancel_url: &'a str,
    return_url: &'a str,
    receiver_list: ReceiverList,
    request_envelope: RequestEnvelope,
}

#[derive(Debug, Serialize)]
struct ReceiverList {
    receiver: Vec<Receiver>,
}

#[derive(Debug, Serialize)]
struct Receiver {
    email: String,
    amount: String,
    primary: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestEnvelope {
    error_language: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponse {
    #[serde(default)]
    pay_key: Option<String>,
    #[serde(default)]
    error: Vec<PayError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayError {
    #[serde(default)]
    error_id: Option<String>,
    #[serde(default)]
    message: String,
}

impl<'a> PayRequest<'a> {
    fn new(request: &'a PaymentRequest) -> Self {
        Self {
            action_type: "PAY",
            currency_code: request.currency.code(),
            fees_payer: "PRIMARYRECEIVER",
            memo: &request.memo,
            cancel_url: &request.cancel_url,
            return_url: &request.return_url,
            receiver_list: ReceiverList {
                receiver: vec![Receiver {
                    email: request.receiver_email.clone(),
                    amount: format!("{:.2}", request.amount),
                    primary: true,
                }],
            },
            request_envelope: RequestEnvelope {
                error_language: "en_US",
            },
        }
    }
}

/// Adaptive Payments `Pay` against the live or sandbox endpoints.
#[derive(Clone)]
pub struct PaypalAdaptive {
    api_base: String,
    sandbox: bool,
    credentials: PaypalCredentials,
    client: reqwest::Client,
}

impl PaypalAdaptive {
    pub fn new(
        credentials: PaypalCredentials,
        sandbox: bool,
        api_base: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| {
                if sandbox { SANDBOX_API_BASE } else { LIVE_API_BASE }.to_string()
            });
        Self {
            api_base,
            sandbox,
            credentials,
            client,
        }
    }

    fn approval_url_for(&self, pay_key: &str) -> String {
        let host = if self.sandbox {
            "www.sandbox.paypal.com"
        } else {
            "www.paypal.com"
        };
        format!(
            "https://{}/cgi-bin/webscr?cmd=_ap-payment&paykey={}",
            host, pay_key
        )
    }

    fn interpret(&self, response: PayResponse) -> Result<String, PaymentError> {
        if let Some(first) = response.error.into_iter().next() {
            return Err(PaymentError::Rejected {
                error_id: first.error_id,
                message: first.message,
            });
        }
        let pay_key = response
            .pay_key
            .ok_or_else(|| PaymentError::Api("response carried no payKey".to_string()))?;
        Ok(self.approval_url_for(&pay_key))
    }
}

#[async_trait]
impl PaymentProvider for PaypalAdaptive {
    async fn approval_url(&self, request: &PaymentRequest) -> Result<String, PaymentError> {
        let c = &self.credentials;
        let user_id = c.user_id.as_deref().ok_or(PaymentError::NotConfigured("userId"))?;
        let password = c.password.as_deref().ok_or(PaymentError::NotConfigured("password"))?;
        let signature = c.signature.as_deref().ok_or(PaymentError::NotConfigured("signature"))?;
        let app_id = c.app_id.as_deref().ok_or(PaymentError::NotConfigured("appId"))?;

        let url = format!("{}/AdaptivePayments/Pay", self.api_base);
        let res = self
            .client
            .post(&url)
            .header("X-PAYPAL-SECURITY-USERID", user_id)
            .header("X-PAYPAL-SECURITY-PASSWORD", password)
            .header("X-PAYPAL-SECURITY-SIGNATURE", signature)
            .header("X-PAYPAL-APPLICATION-ID", app_id)
            .header("X-PAYPAL-REQUEST-DATA-FORMAT", "JSON")
            .header("X-PAYPAL-RESPONSE-DATA-FORMAT", "JSON")
            .json(&PayRequest::new(request))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PaymentError::Api(format!("{} {}", status, body)));
        }
        let data: PayResponse = res.json().await?;
        let approval = self.interpret(data)?;
        log::info!("paypal: payment of {} {} prepared", request.amount, request.currency.code());
        Ok(approval)
    }
}
