// handlers/mpesa_handlers.rs
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};
use crate::models::transaction::{CallbackData, TransactionStatus};
use crate::services::payment_coordinator::{InitiateRequest, PaymentCoordinator, StatusReport};
use crate::state::AppState;

fn coordinator(state: &AppState) -> Result<Arc<PaymentCoordinator>> {
    state
        .coordinator
        .clone()
        .ok_or_else(|| AppError::MissingConfig(state.missing_credentials.clone()))
}

/// `GET /api/mpesa/test` — credential presence probe, booleans only.
pub async fn test_probe() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "M-Pesa API route is working",
        "env": MpesaConfig::env_report(),
    }))
}

/// `POST /api/mpesa/initiate`
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiateRequest>,
) -> Result<Json<Value>> {
    info!("Received payment initiation request");

    let response = coordinator(&state)?.initiate(request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payment initiated successfully",
        "data": {
            "checkoutRequestID": response.checkout_request_id,
            "merchantRequestID": response.merchant_request_id,
            "responseCode": response.response_code,
            "responseDescription": response.response_description,
            "customerMessage": response.customer_message,
        },
    })))
}

/// `POST /api/mpesa/callback` — the gateway's asynchronous result. Answers
/// 200 for processed and re-delivered callbacks alike; 404/500 are reserved
/// for unknown ids and infrastructure faults.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<CallbackData>,
) -> Result<Json<Value>> {
    let callback = payload.body.stk_callback;
    info!(
        "M-Pesa callback for {}: result code {}",
        callback.checkout_request_id, callback.result_code
    );

    coordinator(&state)?.reconcile(callback).await?;

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(rename = "checkoutRequestID", default)]
    pub checkout_request_id: Option<String>,
}

/// `POST /api/mpesa/status` — the polling fallback. Settled transactions
/// answer from the store; pending ones get the gateway's live result.
pub async fn check_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Value>> {
    let checkout_request_id = request.checkout_request_id.unwrap_or_default();

    match coordinator(&state)?.query_status(&checkout_request_id).await? {
        StatusReport::Settled(transaction) => {
            let completed = transaction.status == TransactionStatus::Completed;
            let result_desc = transaction
                .result_description
                .clone()
                .unwrap_or_else(|| if completed { "Success" } else { "Failed" }.to_string());
            Ok(Json(json!({
                "success": true,
                "data": {
                    "ResultCode": if completed { "0" } else { "1" },
                    "ResultDesc": result_desc,
                    "mpesaReceiptNumber": transaction.mpesa_receipt_number,
                },
                "transaction": {
                    "status": transaction.status,
                    "amount": transaction.amount,
                    "description": transaction.description,
                },
            })))
        }
        StatusReport::Processing(result) => Ok(Json(json!({
            "success": true,
            "data": result,
        }))),
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionsParams {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// `GET /api/mpesa/transactions?userId=` — payment history, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionsParams>,
) -> Result<Json<Value>> {
    let user_id = params.user_id.unwrap_or_default();
    let transactions = coordinator(&state)?.transactions_for_user(&user_id).await?;

    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "transactions": transactions,
    })))
}
