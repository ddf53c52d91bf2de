use std::sync::Arc;

use mongodb::Database;

use crate::services::payment_coordinator::PaymentCoordinator;
use crate::socket::directory::ConnectionDirectory;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub directory: Arc<ConnectionDirectory>,
    /// Present only when the gateway credentials loaded; payment endpoints
    /// answer with `missing_credentials` otherwise.
    pub coordinator: Option<Arc<PaymentCoordinator>>,
    pub missing_credentials: Vec<String>,
}

impl AppState {
    pub fn new(db: Database, directory: Arc<ConnectionDirectory>) -> Self {
        AppState {
            db,
            directory,
            coordinator: None,
            missing_credentials: Vec::new(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<PaymentCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self.missing_credentials.clear();
        self
    }

    pub fn with_missing_credentials(mut self, missing: Vec<String>) -> Self {
        self.missing_credentials = missing;
        self
    }
}
