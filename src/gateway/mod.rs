pub mod pipeline;
pub mod request;
pub mod security;

pub use pipeline::{Gateway, GatewayResponse};
pub use request::{
    AdmissionDecision, ApiKey, GatewayRequest, HandlerResponse, KeyStatus, SecurityAlert,
    UsageEvent,
};
pub use security::SecurityScanner;
