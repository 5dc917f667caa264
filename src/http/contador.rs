//! The access counter endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared state of the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    visits: Arc<AtomicU64>,
    message: Arc<str>,
    producer: Arc<str>,
    docs: Arc<Value>,
}

impl AppState {
    pub fn new(message: &str, docs: Value) -> Self {
        let producer = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string());

        Self {
            visits: Arc::new(AtomicU64::new(0)),
            message: message.into(),
            producer: producer.into(),
            docs: Arc::new(docs),
        }
    }

    /// Current number of visits.
    pub fn visits(&self) -> u64 {
        self.visits.load(Ordering::SeqCst)
    }

    pub fn docs(&self) -> &Value {
        &self.docs
    }
}

/// Body of the counter endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contagem {
    pub valor_atual: u64,
    pub producer: String,
    pub kernel: String,
    pub framework: String,
    pub mensagem: String,
}

/// `GET /contador`: count the visit and report the new total.
pub async fn contador(State(state): State<AppState>) -> Json<Contagem> {
    let valor_atual = state.visits.fetch_add(1, Ordering::SeqCst) + 1;
    info!(valor_atual = valor_atual, "Contador incrementado");

    Json(Contagem {
        valor_atual,
        producer: state.producer.to_string(),
        kernel: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        framework: format!("axum / {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        mensagem: state.message.to_string(),
    })
}
