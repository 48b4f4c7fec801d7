use anyhow::Context;
use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, ErrorRes},
    app_state::AppState,
    gateway::StkPushOrder,
    models::{PendingPaymentEntity, PendingStatus},
    reconcile::{ReconcileJob, SettledPayment},
    store::PENDING_PAYMENTS,
};

/// Defines payment routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(initiate_mpesa))
        .routes(utoipa_axum::routes!(mpesa_callback))
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateMpesaReq {
    pub user_id: String,
    pub phone_number: String,
    pub amount: u64,
    pub cart_id: String,
    pub session_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct InitiateMpesaRes {
    pub success: bool,
    pub message: String,
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
}

/// Starts an STK push and records the pending payment under the gateway's
/// correlation id.
#[utoipa::path(
    post,
    path = "/initiateMpesa",
    tags = ["Payments"],
    request_body = InitiateMpesaReq,
    responses(
        (status = 200, description = "Push accepted by the gateway", body = InitiateMpesaRes),
        (status = 400, description = "Gateway rejected the push request", body = ErrorRes),
        (status = 500, description = "Credential exchange or store failure", body = ErrorRes)
    )
)]
pub async fn initiate_mpesa(
    State(state): State<AppState>,
    Json(body): Json<InitiateMpesaReq>,
) -> Result<impl IntoResponse, AppError> {
    let token = state.gateway.authenticate().await?;

    let order = StkPushOrder {
        amount: body.amount,
        phone_number: body.phone_number.clone(),
        account_reference: body.cart_id.clone(),
        description: "Duka order payment".to_string(),
    };
    let acceptance = state.gateway.stk_push(&token, &order).await?;

    // The record must be durable before we answer; the callback can race the
    // response in real deployments.
    let record = PendingPaymentEntity {
        merchant_request_id: acceptance.merchant_request_id.clone(),
        user_id: body.user_id,
        cart_id: body.cart_id,
        session_id: body.session_id,
        amount: body.amount,
        phone_number: body.phone_number,
        status: PendingStatus::Pending,
        created_at: Utc::now(),
    };
    state
        .documents
        .store(PENDING_PAYMENTS, &record.merchant_request_id, &record)
        .await
        .context("Failed to persist pending payment")?;

    tracing::info!(
        "STK push accepted, pending payment {} created",
        acceptance.merchant_request_id
    );

    Ok(Json(InitiateMpesaRes {
        success: true,
        message: acceptance.customer_message,
        merchant_request_id: acceptance.merchant_request_id,
    }))
}

#[derive(Serialize, ToSchema)]
pub struct CallbackAck {
    pub success: bool,
    pub message: String,
}

// Gateway callback envelope. Fields the gateway may omit are Options so a
// sparse-but-valid payload still parses; a missing envelope is malformed.

#[derive(Deserialize, Debug)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: Option<CallbackBody>,
}

#[derive(Deserialize, Debug)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: Option<StkCallback>,
}

#[derive(Deserialize, Debug)]
struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata")]
    metadata: Option<CallbackMetadata>,
}

#[derive(Deserialize, Debug)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    items: Vec<MetadataItem>,
}

#[derive(Deserialize, Debug)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Value,
}

enum CallbackDisposition {
    Enqueue(ReconcileJob),
    NoPaymentReceived,
}

/// Receives the gateway's asynchronous result notification. Validates and
/// acknowledges synchronously; reconciliation happens on the worker after the
/// acknowledgment is on the wire.
#[utoipa::path(
    post,
    path = "/mpesaCallback",
    tags = ["Payments"],
    responses(
        (status = 200, description = "Callback acknowledged", body = CallbackAck),
        (status = 400, description = "Payload missing the stkCallback envelope", body = ErrorRes)
    )
)]
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    match classify_callback(payload)? {
        CallbackDisposition::Enqueue(job) => {
            // The ack must not depend on reconciliation; a send failure only
            // means the worker is gone, which the logs need to know about.
            if state.jobs.send(job).is_err() {
                tracing::error!("Reconciliation queue is closed, callback dropped");
            }
        }
        CallbackDisposition::NoPaymentReceived => {
            tracing::info!("Success callback without payment metadata, nothing to reconcile");
        }
    }

    Ok(Json(CallbackAck {
        success: true,
        message: "Callback received".to_string(),
    }))
}

fn classify_callback(payload: Value) -> Result<CallbackDisposition, AppError> {
    let envelope: CallbackEnvelope =
        serde_json::from_value(payload).map_err(|_| AppError::MalformedCallback)?;
    let callback = envelope
        .body
        .and_then(|body| body.stk_callback)
        .ok_or(AppError::MalformedCallback)?;

    if callback.result_code != 0 {
        let result_desc = callback
            .result_desc
            .unwrap_or_else(|| format!("Result code {}", callback.result_code));
        return Ok(CallbackDisposition::Enqueue(ReconcileJob::Failed {
            merchant_request_id: callback.merchant_request_id,
            result_desc,
        }));
    }

    // Success code with no metadata means the gateway called back but no
    // money moved; acknowledge and do nothing.
    let items = match callback.metadata {
        Some(metadata) if !metadata.items.is_empty() => metadata.items,
        _ => return Ok(CallbackDisposition::NoPaymentReceived),
    };

    let amount = find_item(&items, "Amount").and_then(as_amount);
    let Some(amount) = amount else {
        return Ok(CallbackDisposition::NoPaymentReceived);
    };

    Ok(CallbackDisposition::Enqueue(ReconcileJob::Settled(
        SettledPayment {
            merchant_request_id: callback.merchant_request_id,
            amount,
            phone_number: find_item(&items, "PhoneNumber").and_then(as_text),
            receipt: find_item(&items, "MpesaReceiptNumber").and_then(as_text),
        },
    )))
}

fn find_item<'a>(items: &'a [MetadataItem], name: &str) -> Option<&'a Value> {
    items
        .iter()
        .find(|item| item.name == name)
        .map(|item| &item.value)
}

fn as_amount(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_f64().map(|f| f as u64))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_envelope_is_malformed() {
        assert!(matches!(
            classify_callback(json!({"unexpected": true})),
            Err(AppError::MalformedCallback)
        ));
        assert!(matches!(
            classify_callback(json!({"Body": {}})),
            Err(AppError::MalformedCallback)
        ));
    }

    #[test]
    fn failure_code_becomes_failed_job() {
        let disposition = classify_callback(json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "mr-1",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }}
        }))
        .unwrap();

        match disposition {
            CallbackDisposition::Enqueue(ReconcileJob::Failed {
                merchant_request_id,
                result_desc,
            }) => {
                assert_eq!(merchant_request_id, "mr-1");
                assert_eq!(result_desc, "Request cancelled by user");
            }
            _ => panic!("expected a Failed job"),
        }
    }

    #[test]
    fn success_without_metadata_means_no_payment() {
        let disposition = classify_callback(json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "mr-1",
                "ResultCode": 0,
                "ResultDesc": "Success"
            }}
        }))
        .unwrap();
        assert!(matches!(
            disposition,
            CallbackDisposition::NoPaymentReceived
        ));
    }

    #[test]
    fn success_with_metadata_becomes_settled_job() {
        let disposition = classify_callback(json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "mr-1",
                "ResultCode": 0,
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 100.0},
                    {"Name": "MpesaReceiptNumber", "Value": "RCPT1"},
                    {"Name": "PhoneNumber", "Value": 254700000000u64}
                ]}
            }}
        }))
        .unwrap();

        match disposition {
            CallbackDisposition::Enqueue(ReconcileJob::Settled(payment)) => {
                assert_eq!(payment.merchant_request_id, "mr-1");
                assert_eq!(payment.amount, 100);
                assert_eq!(payment.receipt.as_deref(), Some("RCPT1"));
                assert_eq!(payment.phone_number.as_deref(), Some("254700000000"));
            }
            _ => panic!("expected a Settled job"),
        }
    }

    #[test]
    fn metadata_without_amount_means_no_payment() {
        let disposition = classify_callback(json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "mr-1",
                "ResultCode": 0,
                "CallbackMetadata": {"Item": [
                    {"Name": "MpesaReceiptNumber", "Value": "RCPT1"}
                ]}
            }}
        }))
        .unwrap();
        assert!(matches!(
            disposition,
            CallbackDisposition::NoPaymentReceived
        ));
    }
}
