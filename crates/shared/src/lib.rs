//! Shared utilities for the trade journal export service.
//!
//! This crate provides common functionality used across all other crates:
//! - Cryptographic utilities (hashing, truncated keyed signatures)
//! - JWT access token validation

pub mod crypto;
pub mod jwt;
