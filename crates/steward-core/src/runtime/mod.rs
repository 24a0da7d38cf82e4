// steward-core/src/runtime/mod.rs
// ============================================================================
// Module: Steward Runtime
// Description: Reconciliation orchestration over the management API.
// Purpose: Sequence parsing, validation, and document application for one run.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The runtime turns a set of parsed documents into an ordered sequence of
//! remote operations: global-first application, label-usage validation,
//! deferred token-binding resolution, and team lifecycle management.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod engine;
pub mod labels;
pub mod tokens;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use engine::Engine;
pub use engine::EngineError;
pub use engine::RunOptions;
pub use labels::LabelUse;
pub use labels::LabelUsageError;
pub use labels::label_usage;
pub use tokens::PendingBindings;
pub use tokens::TokenError;
pub use tokens::global_mdm;
