//! Integration tests for the storefront crates.
//!
//! Exercises the reservation engine, the catalog query and the in-memory and
//! chaos stores together. Database-backed scenarios live with
//! `storefront-postgres`.

// This is a test-only crate
#![cfg(test)]
