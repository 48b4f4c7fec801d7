//! Payment-gateway seam. The Daraja HTTP client implements this trait in
//! production; tests substitute a mock to drive accept/reject paths.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::app_error::AppError;

pub mod daraja;

pub use daraja::DarajaGateway;

/// Short-lived bearer credential issued by the gateway. Fetched per call;
/// callers must not assume reuse.
#[derive(Deserialize, Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: String,
}

/// What the initiator asks the gateway to push to the payer's device.
#[derive(Debug, Clone)]
pub struct StkPushOrder {
    pub amount: u64,
    pub phone_number: String,
    pub account_reference: String,
    pub description: String,
}

/// Gateway acceptance of a push request. The merchant request id is the
/// correlation id the eventual callback will carry.
#[derive(Debug, Clone)]
pub struct StkPushAcceptance {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Exchanges static client credentials for a bearer token.
    /// Fails with `AppError::Auth` when the gateway rejects the credentials.
    async fn authenticate(&self) -> Result<AccessToken, AppError>;

    /// Submits a push-payment request. A gateway-level decline surfaces as
    /// `AppError::InitiationRejected` carrying the gateway's message.
    async fn stk_push(
        &self,
        token: &AccessToken,
        order: &StkPushOrder,
    ) -> Result<StkPushAcceptance, AppError>;
}

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Daraja request password: base64 of shortcode + passkey + timestamp.
pub(crate) fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn password_matches_known_vector() {
        let password = stk_password(
            "174379",
            "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919",
            "20240101120000",
        );
        assert_eq!(
            password,
            "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2RkNzFhNDY3Y2QyZTBjODkzMDU5YjEwZjc4ZTZiNzJhZGExZWQyYzkxOTIwMjQwMTAxMTIwMDAw"
        );
    }

    #[test]
    fn timestamp_format_is_compact() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(at.format(TIMESTAMP_FORMAT).to_string(), "20240101120000");
    }
}
