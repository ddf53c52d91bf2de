pub mod mpesa_handlers;
pub mod payment_request_handlers;
