//! HTTP surface: the counter endpoint, its documentation and the request gate.

mod contador;
pub mod gate;
mod openapi;
mod server;

pub use contador::{AppState, Contagem};
pub use gate::{RateLimitLayer, RateLimitService, RequestGate};
pub use openapi::document as openapi_document;
pub use server::{build_router, HttpServer};
