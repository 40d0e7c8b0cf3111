//! Shared test utilities for recongraph integration tests.
//!
//! `TestHarness` builds an orchestrator over an in-memory database with a
//! sandboxed tool directory, so every tool a test needs is a small `sh`
//! script written by the test itself.

#![allow(dead_code)]

pub mod harness;

pub use harness::{TestHarness, HTTPX, NUCLEI, SUBFINDER, WAYBACK};
