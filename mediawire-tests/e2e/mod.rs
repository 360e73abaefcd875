//! End-to-end tests for Mediawire
//!
//! These tests drive complete jobs through `JobClient` against a running
//! `JobServer`, from the local source file to the saved result.

mod client_workflow;
