//! End-to-end integration tests for Vigil
//!
//! These tests assemble the full application router with an in-memory
//! telemetry sink and verify the monitoring pipeline end to end: error
//! classification at the HTTP boundary, telemetry emission, health
//! probes, and the client-telemetry relay.
