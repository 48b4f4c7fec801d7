use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    gateway::PaymentGateway,
    reconcile::{self, ReconcileJob},
    store::Documents,
};

/// Shared state injected into every request handler. All coordination state
/// lives in the document store; nothing here is mutated between requests.
#[derive(Clone)]
pub struct AppState {
    pub documents: Documents,
    pub gateway: Arc<dyn PaymentGateway>,
    pub jobs: UnboundedSender<ReconcileJob>,
}

impl AppState {
    /// Wires up the state and spawns the reconciliation worker that drains
    /// the job queue for as long as the process lives.
    pub fn new(documents: Documents, gateway: Arc<dyn PaymentGateway>) -> Self {
        let jobs = reconcile::spawn_worker(documents.clone());
        Self {
            documents,
            gateway,
            jobs,
        }
    }
}
