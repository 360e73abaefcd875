//! Integration tests for Mediawire
//!
//! These tests run a real `JobServer` on a loopback port with the simulated
//! backend and talk to it frame by frame, checking the wire behavior a
//! client observes and the server's temp file cleanup.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/concurrency.rs"]
mod concurrency;
#[path = "integration/job_protocol.rs"]
mod job_protocol;
#[path = "integration/timeouts.rs"]
mod timeouts;
