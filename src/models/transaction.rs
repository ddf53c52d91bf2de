use std::collections::HashMap;

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Completed and failed are terminal: no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One STK push attempt, keyed by the provider-issued CheckoutRequestID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "checkoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "merchantRequestID")]
    pub merchant_request_id: String,
    pub amount: f64,
    pub phone_number: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub description: String,
    pub status: TransactionStatus,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(
        checkout_request_id: impl Into<String>,
        merchant_request_id: impl Into<String>,
        amount: f64,
        phone_number: impl Into<String>,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: None,
            checkout_request_id: checkout_request_id.into(),
            merchant_request_id: merchant_request_id.into(),
            amount,
            phone_number: phone_number.into(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            description: description.into(),
            status: TransactionStatus::Pending,
            mpesa_receipt_number: None,
            transaction_date: None,
            result_code: None,
            result_description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The terminal fields committed by reconciliation, derived from a callback.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: TransactionStatus,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub result_code: String,
    pub result_description: String,
}

// Daraja callback wire format
#[derive(Debug, Deserialize)]
pub struct CallbackData {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl CallbackMetadata {
    /// Folds the Item name/value list into a lookup map. Values arrive as
    /// mixed JSON types (receipt strings, numeric dates and amounts).
    pub fn into_map(self) -> HashMap<String, serde_json::Value> {
        self.items
            .into_iter()
            .filter_map(|item| item.value.map(|value| (item.name, value)))
            .collect()
    }
}

/// Renders a metadata value the way it should be stored: strings unquoted,
/// numbers as their literal digits.
pub fn metadata_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
