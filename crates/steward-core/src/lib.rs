// steward-core/src/lib.rs
// ============================================================================
// Module: Steward Core Library
// Description: Public API surface for the steward reconciliation core.
// Purpose: Expose the document model, interfaces, and reconciliation runtime.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Steward core reconciles declarative fleet-management configuration against
//! a remote control plane: YAML documents in, an ordered sequence of API
//! operations out. It is backend-agnostic and integrates through the
//! [`interfaces::ManagementApi`] capability trait rather than talking HTTP
//! itself.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::ApiError;
pub use interfaces::AppConfig;
pub use interfaces::ApplyOutcome;
pub use interfaces::ArtifactLedger;
pub use interfaces::CancelToken;
pub use interfaces::DryRunAssumptions;
pub use interfaces::FinalizeTask;
pub use interfaces::LabelInfo;
pub use interfaces::License;
pub use interfaces::LicenseTier;
pub use interfaces::ManagementApi;
pub use interfaces::MemorySink;
pub use interfaces::ScriptRef;
pub use interfaces::SoftwarePackageRef;
pub use interfaces::StatusSink;
pub use interfaces::Team;
pub use interfaces::VppAppRef;
pub use runtime::Engine;
pub use runtime::EngineError;
pub use runtime::LabelUse;
pub use runtime::LabelUsageError;
pub use runtime::PendingBindings;
pub use runtime::RunOptions;
pub use runtime::TokenError;
pub use runtime::label_usage;
