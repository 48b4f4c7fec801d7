//! Background reconciliation of gateway callbacks against pending payments.
//!
//! The callback handler acknowledges the gateway synchronously and hands work
//! to this module through an in-process queue. A single worker task drains the
//! queue for the life of the process; failures are logged per job and never
//! retried or surfaced, since the gateway already received its acknowledgment.

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::{
    models::{CartEntity, OrderEntity, OrderStatus, PendingPaymentEntity, PendingStatus},
    store::{CARTS, Documents, ORDERS, PENDING_PAYMENTS},
};

/// Payment details extracted from a successful callback's metadata.
#[derive(Debug, Clone)]
pub struct SettledPayment {
    pub merchant_request_id: String,
    pub amount: u64,
    pub phone_number: Option<String>,
    pub receipt: Option<String>,
}

#[derive(Debug)]
pub enum ReconcileJob {
    /// Success callback with payment metadata: materialize the order.
    Settled(SettledPayment),
    /// Failure callback: retire the pending record without touching anything else.
    Failed {
        merchant_request_id: String,
        result_desc: String,
    },
}

/// Spawns the worker task and returns the sender the HTTP layer enqueues into.
pub fn spawn_worker(documents: Documents) -> UnboundedSender<ReconcileJob> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(worker(rx, documents));
    tx
}

async fn worker(mut rx: UnboundedReceiver<ReconcileJob>, documents: Documents) {
    while let Some(job) = rx.recv().await {
        if let Err(err) = run_job(&documents, job).await {
            tracing::error!("Reconciliation job failed: {:#}", err);
        }
    }
}

pub async fn run_job(documents: &Documents, job: ReconcileJob) -> Result<()> {
    match job {
        ReconcileJob::Settled(payment) => settle(documents, payment).await,
        ReconcileJob::Failed {
            merchant_request_id,
            result_desc,
        } => mark_failed(documents, &merchant_request_id, &result_desc).await,
    }
}

/// Success-path reconciliation: claim the pending record, copy the cart into
/// a new order, then retire both documents. The conditional claim is what
/// makes redelivery of the same callback a no-op.
async fn settle(documents: &Documents, payment: SettledPayment) -> Result<()> {
    let correlation_id = payment.merchant_request_id.clone();

    let pending: Option<PendingPaymentEntity> = documents
        .fetch(PENDING_PAYMENTS, &correlation_id)
        .await
        .context("Failed to look up pending payment")?;

    let Some(pending) = pending else {
        tracing::warn!(
            "No pending payment for correlation id {correlation_id}, dropping callback"
        );
        return Ok(());
    };

    if pending.status != PendingStatus::Pending {
        tracing::warn!(
            "Pending payment {correlation_id} already {:?}, dropping duplicate callback",
            pending.status
        );
        return Ok(());
    }

    // Claim the record before the order write. A concurrent duplicate loses
    // this swap and terminates above or here without creating a second order.
    let claimed = pending.with_status(PendingStatus::Completed);
    let won = documents
        .replace_if(PENDING_PAYMENTS, &correlation_id, &pending, &claimed)
        .await
        .context("Failed to claim pending payment")?;
    if !won {
        tracing::warn!("Lost claim race for pending payment {correlation_id}, dropping callback");
        return Ok(());
    }

    let cart_key = CartEntity::key(&pending.user_id, &pending.cart_id);
    let cart: Option<CartEntity> = documents
        .fetch(CARTS, &cart_key)
        .await
        .context("Failed to look up cart")?;

    let Some(cart) = cart else {
        // The money moved but the cart is gone; keep the record around as
        // Failed so an external audit can find it.
        tracing::warn!("Cart {cart_key} not found for pending payment {correlation_id}");
        documents
            .store(
                PENDING_PAYMENTS,
                &correlation_id,
                &claimed.with_status(PendingStatus::Failed),
            )
            .await
            .context("Failed to mark pending payment as failed")?;
        return Ok(());
    };

    let order = materialize_order(&pending, &cart, &payment);
    let transaction_id = order.transaction_id.clone();

    // Order first: a crash after this point can leave stale documents behind,
    // but never loses the only record of a completed payment.
    documents
        .store(ORDERS, &transaction_id, &order)
        .await
        .context("Failed to write order")?;
    documents
        .remove(PENDING_PAYMENTS, &correlation_id)
        .await
        .context("Failed to delete pending payment")?;
    documents
        .remove(CARTS, &cart_key)
        .await
        .context("Failed to delete cart")?;

    tracing::info!(
        "Order {transaction_id} created for correlation id {correlation_id}, amount {}",
        order.amount
    );
    Ok(())
}

/// Composes the immutable order from the pending record, the cart's line
/// items at read time and the callback's payment metadata.
fn materialize_order(
    pending: &PendingPaymentEntity,
    cart: &CartEntity,
    payment: &SettledPayment,
) -> OrderEntity {
    OrderEntity {
        transaction_id: payment
            .receipt
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id: pending.user_id.clone(),
        cart_id: pending.cart_id.clone(),
        session_id: pending.session_id.clone(),
        amount: payment.amount,
        phone_number: payment
            .phone_number
            .clone()
            .unwrap_or_else(|| pending.phone_number.clone()),
        products: cart.products.clone(),
        status: OrderStatus::Paid,
        payment_mode: "M-Pesa".to_string(),
        created_at: Utc::now(),
    }
}

/// Failure-path reconciliation: the payment is abandoned, the record is kept
/// as Failed. No order, no deletions.
async fn mark_failed(
    documents: &Documents,
    correlation_id: &str,
    result_desc: &str,
) -> Result<()> {
    let pending: Option<PendingPaymentEntity> = documents
        .fetch(PENDING_PAYMENTS, correlation_id)
        .await
        .context("Failed to look up pending payment")?;

    let Some(pending) = pending else {
        tracing::warn!(
            "No pending payment for failed correlation id {correlation_id}: {result_desc}"
        );
        return Ok(());
    };

    if pending.status != PendingStatus::Pending {
        return Ok(());
    }

    documents
        .replace_if(
            PENDING_PAYMENTS,
            correlation_id,
            &pending,
            &pending.with_status(PendingStatus::Failed),
        )
        .await
        .context("Failed to mark pending payment as failed")?;

    tracing::info!("Payment {correlation_id} failed: {result_desc}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(correlation_id: &str) -> PendingPaymentEntity {
        PendingPaymentEntity {
            merchant_request_id: correlation_id.to_string(),
            user_id: "u1".into(),
            cart_id: "activeCart".into(),
            session_id: "s1".into(),
            amount: 100,
            phone_number: "254700000000".into(),
            status: PendingStatus::Pending,
            created_at: Utc::now(),
        }
    }

    fn cart() -> CartEntity {
        CartEntity {
            user_id: "u1".into(),
            cart_id: "activeCart".into(),
            products: vec![json!({"name": "Sugar 1kg", "quantity": 2, "unit_price": 50})],
            metadata: json!({"promo": null}),
        }
    }

    fn settled(correlation_id: &str) -> SettledPayment {
        SettledPayment {
            merchant_request_id: correlation_id.to_string(),
            amount: 100,
            phone_number: Some("254700000000".into()),
            receipt: Some("RCPT1".into()),
        }
    }

    async fn seed(documents: &Documents, correlation_id: &str) {
        documents
            .store(PENDING_PAYMENTS, correlation_id, &pending(correlation_id))
            .await
            .unwrap();
        documents
            .store(CARTS, &CartEntity::key("u1", "activeCart"), &cart())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn settle_creates_order_and_retires_state() {
        let documents = Documents::in_memory();
        seed(&documents, "mr-1").await;

        run_job(&documents, ReconcileJob::Settled(settled("mr-1")))
            .await
            .unwrap();

        let order: OrderEntity = documents
            .fetch(ORDERS, "RCPT1")
            .await
            .unwrap()
            .expect("order should exist");
        assert_eq!(order.user_id, "u1");
        assert_eq!(order.cart_id, "activeCart");
        assert_eq!(order.amount, 100);
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_mode, "M-Pesa");
        assert_eq!(order.products, cart().products);

        let gone: Option<PendingPaymentEntity> =
            documents.fetch(PENDING_PAYMENTS, "mr-1").await.unwrap();
        assert!(gone.is_none());
        let cart_gone: Option<CartEntity> = documents
            .fetch(CARTS, &CartEntity::key("u1", "activeCart"))
            .await
            .unwrap();
        assert!(cart_gone.is_none());
    }

    #[tokio::test]
    async fn duplicate_callback_does_not_create_second_order() {
        let documents = Documents::in_memory();
        seed(&documents, "mr-1").await;

        run_job(&documents, ReconcileJob::Settled(settled("mr-1")))
            .await
            .unwrap();

        // Swap the order for a sentinel so a second write would be visible.
        let mut order: OrderEntity = documents.fetch(ORDERS, "RCPT1").await.unwrap().unwrap();
        order.session_id = "sentinel".into();
        documents.store(ORDERS, "RCPT1", &order).await.unwrap();

        run_job(&documents, ReconcileJob::Settled(settled("mr-1")))
            .await
            .unwrap();

        let order: OrderEntity = documents.fetch(ORDERS, "RCPT1").await.unwrap().unwrap();
        assert_eq!(order.session_id, "sentinel");
    }

    #[tokio::test]
    async fn claimed_record_blocks_settlement() {
        let documents = Documents::in_memory();
        seed(&documents, "mr-1").await;
        documents
            .store(
                PENDING_PAYMENTS,
                "mr-1",
                &pending("mr-1").with_status(PendingStatus::Completed),
            )
            .await
            .unwrap();

        run_job(&documents, ReconcileJob::Settled(settled("mr-1")))
            .await
            .unwrap();

        let order: Option<OrderEntity> = documents.fetch(ORDERS, "RCPT1").await.unwrap();
        assert!(order.is_none());
        let cart_kept: Option<CartEntity> = documents
            .fetch(CARTS, &CartEntity::key("u1", "activeCart"))
            .await
            .unwrap();
        assert!(cart_kept.is_some());
    }

    #[tokio::test]
    async fn unknown_correlation_id_touches_nothing() {
        let documents = Documents::in_memory();
        documents
            .store(CARTS, &CartEntity::key("u1", "activeCart"), &cart())
            .await
            .unwrap();

        run_job(&documents, ReconcileJob::Settled(settled("mr-unknown")))
            .await
            .unwrap();

        let order: Option<OrderEntity> = documents.fetch(ORDERS, "RCPT1").await.unwrap();
        assert!(order.is_none());
        let cart_kept: Option<CartEntity> = documents
            .fetch(CARTS, &CartEntity::key("u1", "activeCart"))
            .await
            .unwrap();
        assert!(cart_kept.is_some());
    }

    #[tokio::test]
    async fn missing_cart_marks_record_failed() {
        let documents = Documents::in_memory();
        documents
            .store(PENDING_PAYMENTS, "mr-1", &pending("mr-1"))
            .await
            .unwrap();

        run_job(&documents, ReconcileJob::Settled(settled("mr-1")))
            .await
            .unwrap();

        let record: PendingPaymentEntity = documents
            .fetch(PENDING_PAYMENTS, "mr-1")
            .await
            .unwrap()
            .expect("record should be kept for audit");
        assert_eq!(record.status, PendingStatus::Failed);

        let order: Option<OrderEntity> = documents.fetch(ORDERS, "RCPT1").await.unwrap();
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn missing_receipt_falls_back_to_generated_id() {
        let documents = Documents::in_memory();
        seed(&documents, "mr-1").await;

        let mut payment = settled("mr-1");
        payment.receipt = None;
        run_job(&documents, ReconcileJob::Settled(payment))
            .await
            .unwrap();

        // Pending record is gone, so the order was written under some key.
        let gone: Option<PendingPaymentEntity> =
            documents.fetch(PENDING_PAYMENTS, "mr-1").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn failure_callback_marks_failed_without_deletions() {
        let documents = Documents::in_memory();
        seed(&documents, "mr-1").await;

        run_job(
            &documents,
            ReconcileJob::Failed {
                merchant_request_id: "mr-1".into(),
                result_desc: "Request cancelled by user".into(),
            },
        )
        .await
        .unwrap();

        let record: PendingPaymentEntity = documents
            .fetch(PENDING_PAYMENTS, "mr-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PendingStatus::Failed);

        let cart_kept: Option<CartEntity> = documents
            .fetch(CARTS, &CartEntity::key("u1", "activeCart"))
            .await
            .unwrap();
        assert!(cart_kept.is_some());
        let order: Option<OrderEntity> = documents.fetch(ORDERS, "RCPT1").await.unwrap();
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn failure_for_unknown_correlation_id_is_a_noop() {
        let documents = Documents::in_memory();

        run_job(
            &documents,
            ReconcileJob::Failed {
                merchant_request_id: "mr-unknown".into(),
                result_desc: "Timeout".into(),
            },
        )
        .await
        .unwrap();
    }
}
