use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRequestStatus {
    Pending,
    Paid,
    Rejected,
}

/// A money-ask between two users. Created by the requester, resolved only by
/// the counterparty (pay or reject).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub amount: f64,
    pub reason: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: PaymentRequestStatus,
    /// CheckoutRequestID of the transaction that settled this request.
    pub transaction_id: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn pending(
        amount: f64,
        reason: impl Into<String>,
        requester_id: impl Into<String>,
        recipient_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        PaymentRequest {
            id: None,
            amount,
            reason: reason.into(),
            requester_id: requester_id.into(),
            recipient_id: recipient_id.into(),
            status: PaymentRequestStatus::Pending,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub amount: Option<f64>,
    pub reason: Option<String>,
    pub requester_id: Option<String>,
    pub recipient_id: Option<String>,
}
