// services/mpesa_service.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Local;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[allow(dead_code)]
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode", default)]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "ResultCode", default)]
    pub result_code: String,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
}

impl StkQueryResponse {
    /// The provider reports "not found" for transactions it has not settled
    /// yet; callers see that as a still-processing result, not an error.
    pub fn still_processing() -> Self {
        StkQueryResponse {
            response_code: "1".to_string(),
            response_description: "Transaction still processing or not found".to_string(),
            result_code: "1".to_string(),
            result_desc: "Transaction still processing".to_string(),
        }
    }
}

/// Seam between the coordinator and the Daraja HTTP API.
#[async_trait]
pub trait StkGateway: Send + Sync {
    async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: f64,
        description: &str,
    ) -> Result<StkPushResponse>;

    async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse>;
}

/// Formats a phone number for the gateway: leading local-format "0" becomes
/// the country code, a "+" prefix is stripped, canonical input is unchanged.
pub fn format_phone_number(phone: &str) -> String {
    let phone = phone.trim();
    if let Some(rest) = phone.strip_prefix('0') {
        return format!("254{rest}");
    }
    if let Some(rest) = phone.strip_prefix('+') {
        return rest.to_string();
    }
    phone.to_string()
}

/// The gateway only accepts whole-unit amounts.
pub fn round_amount(amount: f64) -> u64 {
    amount.round() as u64
}

#[derive(Debug, Clone)]
pub struct MpesaService {
    config: MpesaConfig,
    client: Client,
}

impl MpesaService {
    pub fn new(config: MpesaConfig) -> Self {
        let client = Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        MpesaService { config, client }
    }

    fn timestamp() -> String {
        Local::now().format("%Y%m%d%H%M%S").to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string =
            format!("{}{}{}", self.config.short_code, self.config.passkey, timestamp);
        base64.encode(password_string)
    }

    /// Exchanges the configured consumer key/secret for a short-lived bearer
    /// token. No caching: every initiation and status call re-authenticates.
    pub async fn get_access_token(&self) -> Result<String> {
        let auth_string =
            format!("{}:{}", self.config.consumer_key, self.config.consumer_secret);
        let encoded_auth = base64.encode(auth_string);

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .timeout(self.config.auth_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Failed to get access token: {}", status);
            return Err(AppError::mpesa_auth(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;
        Ok(auth_response.access_token)
    }
}

#[async_trait]
impl StkGateway for MpesaService {
    async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: f64,
        description: &str,
    ) -> Result<StkPushResponse> {
        if !(amount > 0.0) {
            return Err(AppError::validation("Amount must be greater than 0"));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = format_phone_number(phone_number);
        let timestamp = Self::timestamp();
        let password = self.generate_password(&timestamp);

        info!("STK push for {} - KSh {}", formatted_phone, amount);

        let stk_request = StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: round_amount(amount),
            party_a: formatted_phone.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.callback_url.clone(),
            account_reference: "NexaChat".to_string(),
            transaction_desc: description.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_push_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.config.stk_timeout)
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::MpesaApi { status, body });
        }

        let stk_response: StkPushResponse = response.json().await?;
        info!("STK push initiated: {}", stk_response.merchant_request_id);
        Ok(stk_response)
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = Self::timestamp();
        let password = self.generate_password(&timestamp);

        let query_request = StkQueryRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_query_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.config.stk_timeout)
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();

            // 404 or errorCode 500.001.1001 means the provider has nothing
            // settled for this id yet; not a genuine failure.
            let error_code = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("errorCode").and_then(|c| c.as_str().map(String::from)));

            if status == 404 || error_code.as_deref() == Some("500.001.1001") {
                info!("Status query for {} still processing", checkout_request_id);
                return Ok(StkQueryResponse::still_processing());
            }

            error!("Status query failed: {} - {}", status, body);
            return Err(AppError::MpesaApi { status, body });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_local_phone_numbers() {
        assert_eq!(format_phone_number("0712345678"), "254712345678");
        assert_eq!(format_phone_number("+254712345678"), "254712345678");
        assert_eq!(format_phone_number("254712345678"), "254712345678");
        assert_eq!(format_phone_number(" 0712345678 "), "254712345678");
    }

    #[test]
    fn rounds_amounts_to_whole_units() {
        assert_eq!(round_amount(100.6), 101);
        assert_eq!(round_amount(100.4), 100);
        assert_eq!(round_amount(50.0), 50);
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let config = MpesaConfig::from_lookup(|name| {
            Some(
                match name {
                    "MPESA_SHORTCODE" => "174379",
                    "MPESA_PASSKEY" => "passkey",
                    _ => "x",
                }
                .to_string(),
            )
        })
        .unwrap();
        let service = MpesaService::new(config);

        let password = service.generate_password("20240101120000");
        let decoded = base64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }

    #[test]
    fn timestamp_is_fourteen_digits() {
        let ts = MpesaService::timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }
}
