//! Mediator Core -- response envelope, orchestration records and the header map.
//!
//! Pure data with no async runtime. The engine crate owns all control flow.

pub mod envelope;
pub mod headers;

pub use envelope::{
    CoreResponse, Orchestration, OrchestrationRequest, OrchestrationResponse, Response,
    TransactionStatus, OPENHIM_MIME_TYPE,
};
pub use headers::Headers;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
