use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::{
    app_error::AppError,
    config::DarajaConfig,
    gateway::{AccessToken, PaymentGateway, StkPushAcceptance, StkPushOrder, stk_password},
};

/// HTTP client for the Daraja STK-push API.
pub struct DarajaGateway {
    config: DarajaConfig,
    http_client: Client,
}

impl DarajaGateway {
    pub fn new(config: DarajaConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct StkPushRes {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct DarajaErrorRes {
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn authenticate(&self) -> Result<AccessToken, AppError> {
        let res = self
            .http_client
            .get(format!("{}/oauth/v1/generate", self.config.base_url))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnreachable("Daraja".into()))?;

        if !res.status().is_success() {
            tracing::warn!("Daraja rejected client credentials: {}", res.status());
            return Err(AppError::Auth);
        }

        let token: AccessToken = res
            .json()
            .await
            .context("Failed to parse token response")?;
        Ok(token)
    }

    async fn stk_push(
        &self,
        token: &AccessToken,
        order: &StkPushOrder,
    ) -> Result<StkPushAcceptance, AppError> {
        let timestamp = Utc::now().format(super::TIMESTAMP_FORMAT).to_string();
        let password = stk_password(&self.config.shortcode, &self.config.passkey, &timestamp);

        let body = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": order.amount,
            "PartyA": order.phone_number,
            "PartyB": self.config.shortcode,
            "PhoneNumber": order.phone_number,
            "CallBackURL": self.config.callback_url,
            "AccountReference": order.account_reference,
            "TransactionDesc": order.description,
        });

        let res = self
            .http_client
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url
            ))
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|_| AppError::ServiceUnreachable("Daraja".into()))?;

        if !res.status().is_success() {
            let message = res
                .json::<DarajaErrorRes>()
                .await
                .ok()
                .and_then(|e| e.error_message)
                .unwrap_or_else(|| "Push payment request declined".to_string());
            return Err(AppError::InitiationRejected(message));
        }

        let accepted: StkPushRes = res
            .json()
            .await
            .context("Failed to parse STK push response")?;

        if accepted.response_code != "0" {
            return Err(AppError::InitiationRejected(accepted.response_description));
        }

        Ok(StkPushAcceptance {
            merchant_request_id: accepted.merchant_request_id,
            checkout_request_id: accepted.checkout_request_id,
            customer_message: accepted
                .customer_message
                .unwrap_or(accepted.response_description),
        })
    }
}
