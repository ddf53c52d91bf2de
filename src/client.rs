// client.rs
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::warn;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_POLL_ATTEMPTS: u32 = 12;

/// Client-side view of a payment's outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Pending { attempts: u32 },
    Completed { receipt: Option<String> },
    Failed { reason: String },
    /// Neither the push notification nor polling resolved within the bound.
    Unknown { message: String },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Pending { .. })
    }
}

/// Bounded fallback for when the live-channel notification never arrives:
/// fixed-interval status polls with an attempt cap, ending in `Unknown`
/// when the cap is exhausted.
///
/// The machine is driven by responses, not timers, so the push path and the
/// poll path can race freely: the first terminal observation wins and later
/// contradicting responses are ignored.
#[derive(Debug)]
pub struct StatusPoller {
    state: PollState,
    max_attempts: u32,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_POLL_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        StatusPoller {
            state: PollState::Pending { attempts: 0 },
            max_attempts,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Whether another poll should be scheduled.
    pub fn should_poll(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Applies one `/api/mpesa/status` response body.
    pub fn apply(&mut self, response: &Value) -> &PollState {
        let attempts = match self.state {
            PollState::Pending { attempts } => attempts + 1,
            // Already terminal: a stray late response never regresses it.
            _ => return &self.state,
        };

        let result_code = response
            .pointer("/data/ResultCode")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let stored_status = response
            .pointer("/transaction/status")
            .and_then(|v| v.as_str());

        if result_code == "0" || stored_status == Some("completed") {
            let receipt = response
                .pointer("/data/mpesaReceiptNumber")
                .and_then(|v| v.as_str())
                .map(String::from);
            self.state = PollState::Completed { receipt };
        } else if (!result_code.is_empty() && result_code != "1") || stored_status == Some("failed")
        {
            let reason = response
                .pointer("/data/ResultDesc")
                .and_then(|v| v.as_str())
                .unwrap_or("Payment failed")
                .to_string();
            self.state = PollState::Failed { reason };
        } else {
            self.advance_or_give_up(attempts);
        }
        &self.state
    }

    /// A poll that produced no usable response still consumes one attempt.
    pub fn record_error(&mut self) -> &PollState {
        if let PollState::Pending { attempts } = self.state {
            self.advance_or_give_up(attempts + 1);
        }
        &self.state
    }

    fn advance_or_give_up(&mut self, attempts: u32) {
        if attempts >= self.max_attempts {
            self.state = PollState::Unknown {
                message: "Payment status check timed out. Please check your M-Pesa app or SMS \
                          for confirmation."
                    .to_string(),
            };
        } else {
            self.state = PollState::Pending { attempts };
        }
    }
}

/// HTTP client for the payment surface of the server.
pub struct PaymentClient {
    base_url: String,
    client: reqwest::Client,
}

impl PaymentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        PaymentClient {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Initiates an STK push and returns the response `data` object.
    pub async fn initiate(
        &self,
        phone_number: &str,
        amount: f64,
        description: &str,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/api/mpesa/initiate", self.base_url))
            .json(&json!({
                "phoneNumber": phone_number,
                "amount": amount,
                "description": description,
                "senderId": sender_id,
                "recipientId": recipient_id,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() || body["success"] != json!(true) {
            bail!("initiation failed ({}): {}", status, body["message"]);
        }
        Ok(body["data"].clone())
    }

    pub async fn status(&self, checkout_request_id: &str) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/api/mpesa/status", self.base_url))
            .json(&json!({ "checkoutRequestID": checkout_request_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?);
        }
        Ok(response.json().await?)
    }

    /// Polls `/status` at the fixed interval until the poller reaches a
    /// terminal state.
    pub async fn poll_until_settled(&self, checkout_request_id: &str) -> PollState {
        let mut poller = StatusPoller::new();
        while poller.should_poll() {
            tokio::time::sleep(POLL_INTERVAL).await;
            match self.status(checkout_request_id).await {
                Ok(response) => {
                    poller.apply(&response);
                }
                Err(e) => {
                    warn!("Status poll failed, will retry: {}", e);
                    poller.record_error();
                }
            }
        }
        poller.state().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing() -> Value {
        json!({
            "success": true,
            "data": { "ResultCode": "1", "ResultDesc": "Transaction still processing" }
        })
    }

    fn completed() -> Value {
        json!({
            "success": true,
            "data": {
                "ResultCode": "0",
                "ResultDesc": "Success",
                "mpesaReceiptNumber": "ABC123"
            },
            "transaction": { "status": "completed", "amount": 50.0, "description": "lunch" }
        })
    }

    fn failed() -> Value {
        json!({
            "success": true,
            "data": { "ResultCode": "1032", "ResultDesc": "Request cancelled by user" }
        })
    }

    #[test]
    fn completes_on_result_code_zero() {
        let mut poller = StatusPoller::new();
        let state = poller.apply(&completed()).clone();
        assert_eq!(
            state,
            PollState::Completed {
                receipt: Some("ABC123".to_string())
            }
        );
        assert!(!poller.should_poll());
    }

    #[test]
    fn completes_on_stored_terminal_status() {
        let response = json!({
            "success": true,
            "data": { "ResultDesc": "Success" },
            "transaction": { "status": "completed" }
        });
        let mut poller = StatusPoller::new();
        assert!(matches!(
            poller.apply(&response),
            PollState::Completed { .. }
        ));
    }

    #[test]
    fn fails_on_definite_failure_code() {
        let mut poller = StatusPoller::new();
        let state = poller.apply(&failed()).clone();
        assert_eq!(
            state,
            PollState::Failed {
                reason: "Request cancelled by user".to_string()
            }
        );
    }

    #[test]
    fn keeps_polling_while_processing() {
        let mut poller = StatusPoller::new();
        for attempts in 1..=5 {
            let state = poller.apply(&processing()).clone();
            assert_eq!(state, PollState::Pending { attempts });
            assert!(poller.should_poll());
        }
    }

    #[test]
    fn gives_up_after_exactly_twelve_attempts() {
        let mut poller = StatusPoller::new();
        for _ in 0..MAX_POLL_ATTEMPTS - 1 {
            poller.apply(&processing());
            assert!(poller.should_poll());
        }

        // The twelfth pending response is the last one tolerated.
        let state = poller.apply(&processing()).clone();
        match state {
            PollState::Unknown { message } => assert!(!message.is_empty()),
            other => panic!("expected Unknown, got {other:?}"),
        }
        assert!(!poller.should_poll());
    }

    #[test]
    fn errors_consume_attempts_too() {
        let mut poller = StatusPoller::with_max_attempts(3);
        poller.record_error();
        poller.apply(&processing());
        assert!(poller.should_poll());
        poller.record_error();
        assert!(matches!(poller.state(), PollState::Unknown { .. }));
    }

    #[test]
    fn terminal_state_absorbs_late_responses() {
        let mut poller = StatusPoller::new();
        poller.apply(&completed());

        // A racing, contradicting poll response must not regress the outcome.
        let state = poller.apply(&failed()).clone();
        assert_eq!(
            state,
            PollState::Completed {
                receipt: Some("ABC123".to_string())
            }
        );

        let mut timed_out = StatusPoller::with_max_attempts(1);
        timed_out.apply(&processing());
        assert!(matches!(timed_out.state(), PollState::Unknown { .. }));
        timed_out.apply(&completed());
        assert!(matches!(timed_out.state(), PollState::Unknown { .. }));
    }
}
