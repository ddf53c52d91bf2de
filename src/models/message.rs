// src/models/message.rs
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::transaction::TransactionStatus;

/// Embedded payment summary carried by payment chat messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub amount: f64,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

/// A chat message document. The chat CRUD surface lives elsewhere; this core
/// only inserts payment-flagged messages into the shared collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub is_payment_message: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_details: Option<PaymentDetails>,
    #[serde(default)]
    pub is_payment_request: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_request_id: Option<ObjectId>,
    #[serde(default)]
    pub is_payment_update: bool,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    fn base(sender_id: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        Message {
            id: None,
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            text: None,
            image: None,
            is_payment_message: false,
            payment_details: None,
            is_payment_request: false,
            payment_request_id: None,
            is_payment_update: false,
            created_at: chrono::Utc::now(),
        }
    }

    /// The message recorded in the chat when a payment settles.
    pub fn payment(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        amount: f64,
        receipt: Option<String>,
    ) -> Self {
        let mut message = Self::base(sender_id, receiver_id);
        message.text = Some(format!("Payment of KES {amount} sent successfully."));
        message.is_payment_message = true;
        message.payment_details = Some(PaymentDetails {
            amount,
            status: TransactionStatus::Completed,
            receipt,
        });
        message
    }

    /// The money-ask message sent to the counterparty.
    pub fn payment_request(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        request_id: ObjectId,
        amount: f64,
        reason: &str,
    ) -> Self {
        let mut message = Self::base(sender_id, receiver_id);
        message.text = Some(format!("Payment request: {reason} - KES {amount}"));
        message.is_payment_request = true;
        message.payment_request_id = Some(request_id);
        message
    }

    /// A status update on an earlier money-ask (rejected or paid).
    pub fn payment_update(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut message = Self::base(sender_id, receiver_id);
        message.text = Some(text.into());
        message.is_payment_update = true;
        message
    }
}
