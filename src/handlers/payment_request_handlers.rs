// handlers/payment_request_handlers.rs
use axum::extract::{Path, Query, State};
use axum::Json;
use bson::oid::ObjectId;
use bson::doc;
use futures::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::Collection;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::message::Message;
use crate::models::payment_request::{CreatePaymentRequest, PaymentRequest};
use crate::state::AppState;

fn requests(state: &AppState) -> Collection<PaymentRequest> {
    state.db.collection("payment_requests")
}

fn messages(state: &AppState) -> Collection<Message> {
    state.db.collection("messages")
}

/// `POST /api/payment-requests` — a money-ask from requester to recipient.
pub async fn create_payment_request(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<Json<Value>> {
    let mut missing = Vec::new();
    if body.amount.is_none() {
        missing.push("amount".to_string());
    }
    if body.reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
        missing.push("reason".to_string());
    }
    if body.requester_id.as_deref().map_or(true, |r| r.trim().is_empty()) {
        missing.push("requesterId".to_string());
    }
    if body.recipient_id.as_deref().map_or(true, |r| r.trim().is_empty()) {
        missing.push("recipientId".to_string());
    }
    if !missing.is_empty() {
        return Err(AppError::MissingFields(missing));
    }

    let amount = body.amount.unwrap();
    if !(amount > 0.0) {
        return Err(AppError::validation("Amount must be greater than 0"));
    }
    let reason = body.reason.unwrap();
    let requester_id = body.requester_id.unwrap();
    let recipient_id = body.recipient_id.unwrap();

    let mut request = PaymentRequest::pending(amount, &reason, &requester_id, &recipient_id);
    let inserted = requests(&state).insert_one(&request).await?;
    let request_id = inserted
        .inserted_id
        .as_object_id()
        .ok_or_else(|| AppError::validation("Insert did not return an ObjectId"))?;
    request.id = Some(request_id);

    info!("Payment request {} created by {}", request_id, requester_id);

    let message =
        Message::payment_request(&requester_id, &recipient_id, request_id, amount, &reason);
    messages(&state).insert_one(&message).await?;

    state
        .directory
        .emit_to_user(
            &recipient_id,
            "payment_request_received",
            json!({
                "requestId": request_id.to_hex(),
                "requesterId": requester_id,
                "amount": amount,
                "reason": reason,
            }),
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Payment request sent successfully",
        "paymentRequest": request,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// `GET /api/payment-requests?userId=` — requests the user sent or received.
pub async fn list_payment_requests(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
    let user_id = params
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::validation("User ID is required"))?;

    let filter = doc! {
        "$or": [
            { "requesterId": &user_id },
            { "recipientId": &user_id }
        ]
    };
    let cursor = requests(&state)
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .await?;
    let list: Vec<PaymentRequest> = cursor.try_collect().await?;

    Ok(Json(json!({
        "success": true,
        "paymentRequests": list,
    })))
}

/// `POST /api/payment-requests/:id/reject` — recipient declines. Only a
/// pending request can be rejected.
pub async fn reject_payment_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let oid = ObjectId::parse_str(&id)?;

    let updated = requests(&state)
        .find_one_and_update(
            doc! { "_id": oid, "status": "pending" },
            doc! { "$set": {
                "status": "rejected",
                "updatedAt": bson::DateTime::now(),
            }},
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or(AppError::PaymentRequestNotFound)?;

    let text = format!(
        "Your payment request of KES {} for \"{}\" was rejected.",
        updated.amount, updated.reason
    );
    let message = Message::payment_update(&updated.recipient_id, &updated.requester_id, text);
    if let Err(e) = messages(&state).insert_one(&message).await {
        warn!("Failed to record rejection message for {}: {}", id, e);
    }

    state
        .directory
        .emit_to_user(
            &updated.requester_id,
            "payment_request_updated",
            json!({
                "requestId": id,
                "status": "rejected",
            }),
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Payment request rejected successfully",
        "paymentRequest": updated,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequestBody {
    /// CheckoutRequestID of the transaction that settles this request.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// `POST /api/payment-requests/:id/pay` — recipient settles the request and
/// links the transaction that paid it. Only a pending request can be paid.
pub async fn pay_payment_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PayRequestBody>,
) -> Result<Json<Value>> {
    let transaction_id = body
        .transaction_id
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::validation("Transaction ID is required"))?;
    let oid = ObjectId::parse_str(&id)?;

    let updated = requests(&state)
        .find_one_and_update(
            doc! { "_id": oid, "status": "pending" },
            doc! { "$set": {
                "status": "paid",
                "transactionId": &transaction_id,
                "updatedAt": bson::DateTime::now(),
            }},
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or(AppError::PaymentRequestNotFound)?;

    let text = format!(
        "Your payment request of KES {} for \"{}\" was paid.",
        updated.amount, updated.reason
    );
    let message = Message::payment_update(&updated.recipient_id, &updated.requester_id, text);
    if let Err(e) = messages(&state).insert_one(&message).await {
        warn!("Failed to record payment message for {}: {}", id, e);
    }

    state
        .directory
        .emit_to_user(
            &updated.requester_id,
            "payment_request_updated",
            json!({
                "requestId": id,
                "status": "paid",
                "transactionId": transaction_id,
            }),
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Payment request paid successfully",
        "paymentRequest": updated,
    })))
}
