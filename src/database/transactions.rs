use async_trait::async_trait;
use bson::doc;
use futures::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};

use crate::errors::Result;
use crate::models::transaction::{TerminalUpdate, Transaction, TransactionStatus};

/// Durable record of payment attempts, keyed by CheckoutRequestID.
///
/// `finish_if_pending` is the single concurrency-correctness mechanism for
/// reconciliation: the status check and the terminal write must be one
/// atomic step, so two concurrent callbacks for the same transaction cannot
/// both observe `pending`.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_pending(&self, transaction: Transaction) -> Result<()>;
    async fn find(&self, checkout_request_id: &str) -> Result<Option<Transaction>>;
    /// Applies the terminal update only if the transaction is still pending.
    /// Returns the updated document when this call won the transition, or
    /// `None` when the document is absent or already terminal.
    async fn finish_if_pending(
        &self,
        checkout_request_id: &str,
        update: TerminalUpdate,
    ) -> Result<Option<Transaction>>;
    async fn find_for_user(&self, user_id: &str) -> Result<Vec<Transaction>>;
}

fn status_str(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Completed => "completed",
        TransactionStatus::Failed => "failed",
    }
}

#[derive(Clone)]
pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        MongoTransactionStore {
            collection: db.collection("transactions"),
        }
    }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn insert_pending(&self, transaction: Transaction) -> Result<()> {
        self.collection.insert_one(&transaction).await?;
        Ok(())
    }

    async fn find(&self, checkout_request_id: &str) -> Result<Option<Transaction>> {
        let filter = doc! { "checkoutRequestID": checkout_request_id };
        Ok(self.collection.find_one(filter).await?)
    }

    async fn finish_if_pending(
        &self,
        checkout_request_id: &str,
        update: TerminalUpdate,
    ) -> Result<Option<Transaction>> {
        // Single-document atomic update: the `status: pending` filter is the
        // compare half of the compare-and-set.
        let filter = doc! {
            "checkoutRequestID": checkout_request_id,
            "status": "pending",
        };
        let set = doc! {
            "$set": {
                "status": status_str(update.status),
                "mpesaReceiptNumber": update.mpesa_receipt_number,
                "transactionDate": update.transaction_date,
                "resultCode": update.result_code,
                "resultDescription": update.result_description,
                "updatedAt": bson::DateTime::from_chrono(chrono::Utc::now()),
            }
        };

        let updated = self
            .collection
            .find_one_and_update(filter, set)
            .return_document(ReturnDocument::After)
            .await?;
        Ok(updated)
    }

    async fn find_for_user(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let filter = doc! {
            "$or": [
                { "senderId": user_id },
                { "recipientId": user_id }
            ]
        };
        let cursor = self
            .collection
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }
}
