use async_trait::async_trait;
use mongodb::{Collection, Database};

use crate::errors::Result;
use crate::models::message::Message;

/// Write-only boundary to the chat collaborator: reconciliation and the
/// payment-request flow record their outcomes as chat messages here.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: Message) -> Result<()>;
}

#[derive(Clone)]
pub struct MongoMessageStore {
    collection: Collection<Message>,
}

impl MongoMessageStore {
    pub fn new(db: &Database) -> Self {
        MongoMessageStore {
            collection: db.collection("messages"),
        }
    }
}

#[async_trait]
impl MessageStore for MongoMessageStore {
    async fn insert(&self, message: Message) -> Result<()> {
        self.collection.insert_one(&message).await?;
        Ok(())
    }
}
