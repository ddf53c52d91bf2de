pub mod message;
pub mod payment_request;
pub mod transaction;
