// services/payment_coordinator.rs
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::database::messages::MessageStore;
use crate::database::transactions::TransactionStore;
use crate::errors::{AppError, Result};
use crate::models::message::Message;
use crate::models::transaction::{
    metadata_string, StkCallback, TerminalUpdate, Transaction, TransactionStatus,
};
use crate::services::mpesa_service::{StkGateway, StkPushResponse, StkQueryResponse};
use crate::socket::directory::ConnectionDirectory;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub phone_number: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub recipient_id: Option<String>,
    pub sender_id: Option<String>,
}

struct ValidatedInitiate {
    phone_number: String,
    amount: f64,
    description: String,
    recipient_id: String,
    sender_id: String,
}

impl InitiateRequest {
    /// All five fields are required; the error lists exactly the absent ones.
    fn validated(self) -> Result<ValidatedInitiate> {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.trim().is_empty())
        }

        let mut missing = Vec::new();
        if !present(&self.phone_number) {
            missing.push("phoneNumber".to_string());
        }
        if self.amount.is_none() {
            missing.push("amount".to_string());
        }
        if !present(&self.description) {
            missing.push("description".to_string());
        }
        if !present(&self.recipient_id) {
            missing.push("recipientId".to_string());
        }
        if !present(&self.sender_id) {
            missing.push("senderId".to_string());
        }
        if !missing.is_empty() {
            return Err(AppError::MissingFields(missing));
        }

        let amount = self.amount.unwrap();
        if !(amount > 0.0) {
            return Err(AppError::validation("Amount must be greater than 0"));
        }

        Ok(ValidatedInitiate {
            phone_number: self.phone_number.unwrap(),
            amount,
            description: self.description.unwrap(),
            recipient_id: self.recipient_id.unwrap(),
            sender_id: self.sender_id.unwrap(),
        })
    }
}

/// The answer to a status query: either the stored terminal record, or the
/// provider's live (possibly synthetic still-processing) result.
#[derive(Debug)]
pub enum StatusReport {
    Settled(Transaction),
    Processing(StkQueryResponse),
}

/// Orchestrates the payment lifecycle: initiation against the gateway,
/// callback reconciliation into the store, and the polling-side status
/// query. The only component touching the gateway, both stores and the
/// connection directory.
pub struct PaymentCoordinator {
    gateway: Arc<dyn StkGateway>,
    transactions: Arc<dyn TransactionStore>,
    messages: Arc<dyn MessageStore>,
    directory: Arc<ConnectionDirectory>,
}

impl PaymentCoordinator {
    pub fn new(
        gateway: Arc<dyn StkGateway>,
        transactions: Arc<dyn TransactionStore>,
        messages: Arc<dyn MessageStore>,
        directory: Arc<ConnectionDirectory>,
    ) -> Self {
        PaymentCoordinator {
            gateway,
            transactions,
            messages,
            directory,
        }
    }

    /// Submits an STK push and records the pending transaction under the
    /// provider's CheckoutRequestID.
    pub async fn initiate(&self, request: InitiateRequest) -> Result<StkPushResponse> {
        let fields = request.validated()?;

        let response = self
            .gateway
            .initiate_stk_push(&fields.phone_number, fields.amount, &fields.description)
            .await?;

        let transaction = Transaction::pending(
            &response.checkout_request_id,
            &response.merchant_request_id,
            fields.amount,
            &fields.phone_number,
            &fields.sender_id,
            &fields.recipient_id,
            &fields.description,
        );

        // The payer's phone is already prompting for a PIN at this point, so
        // a bookkeeping failure must not fail the initiation.
        if let Err(e) = self.transactions.insert_pending(transaction).await {
            error!(
                "Failed to persist pending transaction {}: {}",
                response.checkout_request_id, e
            );
        }

        self.directory
            .emit_to_user(
                &fields.recipient_id,
                "payment_initiated",
                json!({
                    "checkoutRequestID": response.checkout_request_id,
                    "senderId": fields.sender_id,
                    "amount": fields.amount,
                    "description": fields.description,
                }),
            )
            .await;

        Ok(response)
    }

    /// Applies one gateway callback. Safe under re-delivery: the terminal
    /// write goes through the store's update-if-pending primitive, so only
    /// one delivery ever performs the side effects.
    pub async fn reconcile(&self, callback: StkCallback) -> Result<()> {
        let checkout_request_id = callback.checkout_request_id.clone();

        let existing = self
            .transactions
            .find(&checkout_request_id)
            .await?
            .ok_or(AppError::TransactionNotFound)?;

        if existing.status.is_terminal() {
            info!(
                "Callback for {} re-delivered after settlement, ignoring",
                checkout_request_id
            );
            return Ok(());
        }

        let update = terminal_update(&callback);
        let transaction = match self
            .transactions
            .finish_if_pending(&checkout_request_id, update)
            .await?
        {
            Some(transaction) => transaction,
            None => {
                // Lost the race to a concurrent delivery of the same callback.
                info!("Transaction {} already settled, ignoring", checkout_request_id);
                return Ok(());
            }
        };

        match transaction.status {
            TransactionStatus::Completed => {
                info!(
                    "Payment {} completed, receipt {:?}",
                    checkout_request_id, transaction.mpesa_receipt_number
                );
                self.directory
                    .emit_to_user(
                        &transaction.recipient_id,
                        "payment_completed",
                        json!({
                            "checkoutRequestID": transaction.checkout_request_id,
                            "senderId": transaction.sender_id,
                            "amount": transaction.amount,
                            "description": transaction.description,
                            "receipt": transaction.mpesa_receipt_number,
                        }),
                    )
                    .await;

                let message = Message::payment(
                    &transaction.sender_id,
                    &transaction.recipient_id,
                    transaction.amount,
                    transaction.mpesa_receipt_number.clone(),
                );
                if let Err(e) = self.messages.insert(message).await {
                    error!(
                        "Failed to record payment message for {}: {}",
                        checkout_request_id, e
                    );
                }
            }
            TransactionStatus::Failed => {
                info!(
                    "Payment {} failed: {:?}",
                    checkout_request_id, transaction.result_description
                );
                self.directory
                    .emit_to_user(
                        &transaction.sender_id,
                        "payment_failed",
                        json!({
                            "checkoutRequestID": transaction.checkout_request_id,
                            "reason": transaction.result_description,
                        }),
                    )
                    .await;
            }
            TransactionStatus::Pending => {}
        }

        Ok(())
    }

    /// Answers a status poll. Settled transactions answer from the store;
    /// the gateway is consulted only while the outcome is unknown. Never
    /// mutates the transaction: only `reconcile` commits terminal state.
    pub async fn query_status(&self, checkout_request_id: &str) -> Result<StatusReport> {
        if checkout_request_id.trim().is_empty() {
            return Err(AppError::validation("Checkout request ID is required"));
        }

        match self.transactions.find(checkout_request_id).await {
            Ok(Some(transaction)) if transaction.status.is_terminal() => {
                return Ok(StatusReport::Settled(transaction));
            }
            Ok(_) => {}
            Err(e) => {
                // The gateway can still answer, so a store fault does not
                // fail the query.
                error!("Transaction lookup failed (continuing to gateway): {}", e);
            }
        }

        let result = self.gateway.query_status(checkout_request_id).await?;
        Ok(StatusReport::Processing(result))
    }

    /// Payment history for a user, as sender or recipient, newest first.
    pub async fn transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("User ID is required"));
        }
        self.transactions.find_for_user(user_id).await
    }
}

/// Derives the terminal fields from a callback. Result code 0 is success;
/// receipt and date ride in the metadata item list.
fn terminal_update(callback: &StkCallback) -> TerminalUpdate {
    if callback.result_code == 0 {
        let metadata = callback
            .callback_metadata
            .clone()
            .map(|m| m.into_map())
            .unwrap_or_default();
        TerminalUpdate {
            status: TransactionStatus::Completed,
            mpesa_receipt_number: metadata.get("MpesaReceiptNumber").map(metadata_string),
            transaction_date: metadata.get("TransactionDate").map(metadata_string),
            result_code: callback.result_code.to_string(),
            result_description: callback.result_desc.clone(),
        }
    } else {
        TerminalUpdate {
            status: TransactionStatus::Failed,
            mpesa_receipt_number: None,
            transaction_date: None,
            result_code: callback.result_code.to_string(),
            result_description: callback.result_desc.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::models::transaction::CallbackData;

    #[derive(Default)]
    struct InMemoryTransactionStore {
        transactions: Mutex<HashMap<String, Transaction>>,
        fail_inserts: AtomicBool,
    }

    #[async_trait]
    impl TransactionStore for InMemoryTransactionStore {
        async fn insert_pending(&self, transaction: Transaction) -> Result<()> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(AppError::validation("simulated storage outage"));
            }
            self.transactions
                .lock()
                .unwrap()
                .insert(transaction.checkout_request_id.clone(), transaction);
            Ok(())
        }

        async fn find(&self, checkout_request_id: &str) -> Result<Option<Transaction>> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .get(checkout_request_id)
                .cloned())
        }

        async fn finish_if_pending(
            &self,
            checkout_request_id: &str,
            update: TerminalUpdate,
        ) -> Result<Option<Transaction>> {
            let mut transactions = self.transactions.lock().unwrap();
            match transactions.get_mut(checkout_request_id) {
                Some(transaction) if transaction.status == TransactionStatus::Pending => {
                    transaction.status = update.status;
                    transaction.mpesa_receipt_number = update.mpesa_receipt_number;
                    transaction.transaction_date = update.transaction_date;
                    transaction.result_code = Some(update.result_code);
                    transaction.result_description = Some(update.result_description);
                    transaction.updated_at = chrono::Utc::now();
                    Ok(Some(transaction.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn find_for_user(&self, user_id: &str) -> Result<Vec<Transaction>> {
            let mut matching: Vec<Transaction> = self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.sender_id == user_id || t.recipient_id == user_id)
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(matching)
        }
    }

    #[derive(Default)]
    struct InMemoryMessageStore {
        messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageStore for InMemoryMessageStore {
        async fn insert(&self, message: Message) -> Result<()> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockGateway {
        push_calls: AtomicUsize,
        query_calls: AtomicUsize,
    }

    #[async_trait]
    impl StkGateway for MockGateway {
        async fn initiate_stk_push(
            &self,
            _phone_number: &str,
            _amount: f64,
            _description: &str,
        ) -> Result<StkPushResponse> {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            Ok(StkPushResponse {
                merchant_request_id: "29115-34620561-1".to_string(),
                checkout_request_id: "ws_CO_191220191020363925".to_string(),
                response_code: "0".to_string(),
                response_description: "Success. Request accepted for processing".to_string(),
                customer_message: "Success. Request accepted for processing".to_string(),
            })
        }

        async fn query_status(&self, _checkout_request_id: &str) -> Result<StkQueryResponse> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Ok(StkQueryResponse::still_processing())
        }
    }

    struct Harness {
        coordinator: PaymentCoordinator,
        gateway: Arc<MockGateway>,
        transactions: Arc<InMemoryTransactionStore>,
        messages: Arc<InMemoryMessageStore>,
        directory: Arc<ConnectionDirectory>,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(MockGateway::default());
        let transactions = Arc::new(InMemoryTransactionStore::default());
        let messages = Arc::new(InMemoryMessageStore::default());
        let directory = Arc::new(ConnectionDirectory::new());
        let coordinator = PaymentCoordinator::new(
            gateway.clone(),
            transactions.clone(),
            messages.clone(),
            directory.clone(),
        );
        Harness {
            coordinator,
            gateway,
            transactions,
            messages,
            directory,
        }
    }

    fn initiate_request() -> InitiateRequest {
        InitiateRequest {
            phone_number: Some("0712345678".to_string()),
            amount: Some(50.0),
            description: Some("lunch".to_string()),
            recipient_id: Some("user-b".to_string()),
            sender_id: Some("user-a".to_string()),
        }
    }

    fn success_callback() -> StkCallback {
        let callback: CallbackData = serde_json::from_value(json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 50.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "ABC123" },
                            { "Name": "TransactionDate", "Value": 20240101120000u64 },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        }))
        .unwrap();
        callback.body.stk_callback
    }

    fn failure_callback() -> StkCallback {
        let callback: CallbackData = serde_json::from_value(json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1,
                    "ResultDesc": "Insufficient funds"
                }
            }
        }))
        .unwrap();
        callback.body.stk_callback
    }

    #[tokio::test]
    async fn initiate_reports_missing_fields_by_name() {
        let h = harness();
        let mut request = initiate_request();
        request.recipient_id = None;

        let err = h.coordinator.initiate(request).await.unwrap_err();
        match err {
            AppError::MissingFields(missing) => assert_eq!(missing, vec!["recipientId"]),
            other => panic!("expected MissingFields, got {other:?}"),
        }
        assert_eq!(h.gateway.push_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn initiate_rejects_non_positive_amount() {
        let h = harness();
        let mut request = initiate_request();
        request.amount = Some(0.0);

        let err = h.coordinator.initiate(request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn initiate_persists_pending_transaction() {
        let h = harness();
        let response = h.coordinator.initiate(initiate_request()).await.unwrap();
        assert_eq!(response.checkout_request_id, "ws_CO_191220191020363925");

        let stored = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(stored.amount, 50.0);
        assert_eq!(stored.phone_number, "0712345678");
        assert_eq!(stored.sender_id, "user-a");
        assert_eq!(stored.recipient_id, "user-b");
        assert!(stored.mpesa_receipt_number.is_none());
    }

    #[tokio::test]
    async fn initiate_swallows_persistence_failure() {
        let h = harness();
        h.transactions.fail_inserts.store(true, Ordering::SeqCst);

        // The charge already went out; the caller still gets the checkout id.
        let response = h.coordinator.initiate(initiate_request()).await.unwrap();
        assert_eq!(response.checkout_request_id, "ws_CO_191220191020363925");
        assert!(h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn initiate_notifies_connected_recipient() {
        let h = harness();
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.directory.register("user-b", tx).await;
        rx.recv().await.unwrap(); // roster broadcast

        h.coordinator.initiate(initiate_request()).await.unwrap();

        let frame = match rx.recv().await.unwrap() {
            axum::extract::ws::Message::Text(text) => {
                serde_json::from_str::<serde_json::Value>(&text).unwrap()
            }
            other => panic!("expected text frame, got {other:?}"),
        };
        assert_eq!(frame["event"], "payment_initiated");
        assert_eq!(frame["data"]["senderId"], "user-a");
        assert_eq!(frame["data"]["amount"], 50.0);
    }

    #[tokio::test]
    async fn reconcile_completes_and_records_one_message() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();
        h.coordinator.reconcile(success_callback()).await.unwrap();

        let stored = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.mpesa_receipt_number.as_deref(), Some("ABC123"));
        assert_eq!(stored.transaction_date.as_deref(), Some("20240101120000"));
        assert_eq!(stored.result_code.as_deref(), Some("0"));

        let messages = h.messages.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert!(message.is_payment_message);
        assert_eq!(message.sender_id, "user-a");
        assert_eq!(message.receiver_id, "user-b");
        let details = message.payment_details.as_ref().unwrap();
        assert_eq!(details.status, TransactionStatus::Completed);
        assert_eq!(details.receipt.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn reconcile_failure_records_reason_and_no_message() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();
        h.coordinator.reconcile(failure_callback()).await.unwrap();

        let stored = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.result_description.as_deref(), Some("Insufficient funds"));
        assert!(stored.mpesa_receipt_number.is_none());

        assert!(h.messages.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_under_redelivery() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();
        h.coordinator.reconcile(success_callback()).await.unwrap();
        let first = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();

        h.coordinator.reconcile(success_callback()).await.unwrap();
        let second = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.mpesa_receipt_number, second.mpesa_receipt_number);
        assert_eq!(first.updated_at, second.updated_at);
        // At most one chat-message side effect, no matter how many deliveries.
        assert_eq!(h.messages.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconcile_never_regresses_a_terminal_state() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();
        h.coordinator.reconcile(success_callback()).await.unwrap();

        // A contradicting late callback must not flip completed to failed.
        h.coordinator.reconcile(failure_callback()).await.unwrap();
        let stored = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.mpesa_receipt_number.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn reconcile_unknown_transaction_is_not_found() {
        let h = harness();
        let err = h.coordinator.reconcile(success_callback()).await.unwrap_err();
        assert!(matches!(err, AppError::TransactionNotFound));
        assert!(h.messages.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_status_answers_terminal_from_store_without_gateway() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();
        h.coordinator.reconcile(success_callback()).await.unwrap();

        let report = h
            .coordinator
            .query_status("ws_CO_191220191020363925")
            .await
            .unwrap();
        match report {
            StatusReport::Settled(transaction) => {
                assert_eq!(transaction.status, TransactionStatus::Completed);
            }
            other => panic!("expected Settled, got {other:?}"),
        }
        assert_eq!(h.gateway.query_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_status_on_pending_consults_gateway_without_mutating() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();

        let report = h
            .coordinator
            .query_status("ws_CO_191220191020363925")
            .await
            .unwrap();
        match report {
            StatusReport::Processing(result) => assert_eq!(result.result_code, "1"),
            other => panic!("expected Processing, got {other:?}"),
        }
        assert_eq!(h.gateway.query_calls.load(Ordering::SeqCst), 1);

        // Observational only: the stored record is untouched.
        let stored = h
            .transactions
            .find("ws_CO_191220191020363925")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn query_status_requires_an_id() {
        let h = harness();
        let err = h.coordinator.query_status("").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn transactions_for_user_lists_both_directions() {
        let h = harness();
        h.coordinator.initiate(initiate_request()).await.unwrap();

        let as_sender = h.coordinator.transactions_for_user("user-a").await.unwrap();
        let as_recipient = h.coordinator.transactions_for_user("user-b").await.unwrap();
        let uninvolved = h.coordinator.transactions_for_user("user-c").await.unwrap();
        assert_eq!(as_sender.len(), 1);
        assert_eq!(as_recipient.len(), 1);
        assert!(uninvolved.is_empty());
    }
}
