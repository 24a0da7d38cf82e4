// steward-client/src/lib.rs
// ============================================================================
// Module: Steward Client Library
// Description: Blocking HTTP client for the steward control plane.
// Purpose: Implement the core ManagementApi trait over the REST API.
// Dependencies: steward-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! This crate binds the reconciliation engine to a real control plane. The
//! [`HttpClient`] implements `steward_core::ManagementApi` with bounded
//! blocking requests: explicit timeout, redirects disabled, bearer-token
//! authentication on every call.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod http;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use http::HttpClient;
pub use http::HttpClientConfig;
