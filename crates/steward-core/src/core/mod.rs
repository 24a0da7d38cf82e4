// steward-core/src/core/mod.rs
// ============================================================================
// Module: Steward Core Types
// Description: Canonical document model and normalization pipeline.
// Purpose: Provide the typed form of declarative configuration documents.
// Dependencies: serde, serde_yaml, unicode-normalization
// ============================================================================

//! ## Overview
//! Core types define the canonical in-memory form of one configuration
//! document plus everything that turns YAML input into that form: name
//! normalization, environment-variable expansion, file indirection, and
//! aggregated validation.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod document;
pub mod env;
pub mod identifiers;
pub mod normalize;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use document::AbmAssignment;
pub use document::AppStoreAppSpec;
pub use document::Controls;
pub use document::Document;
pub use document::DocumentScope;
pub use document::EnrollSecret;
pub use document::FileRef;
pub use document::LabelSpec;
pub use document::MaintainedAppSpec;
pub use document::MdmSettings;
pub use document::OrgSettings;
pub use document::OsCustomSettings;
pub use document::PolicyInstallSoftware;
pub use document::PolicyRunScript;
pub use document::PolicySpec;
pub use document::ProfileSpec;
pub use document::QuerySpec;
pub use document::Software;
pub use document::SoftwarePackageSpec;
pub use document::TeamSettings;
pub use document::VppAssignment;
pub use env::EnvError;
pub use env::SECRET_ENV_PREFIX;
pub use env::expand_env_bytes;
pub use env::expand_env_bytes_with;
pub use env::lookup_env_secrets;
pub use env::lookup_env_secrets_with;
pub use identifiers::ALL_TEAMS;
pub use identifiers::NO_TEAM;
pub use identifiers::NO_TEAM_FILENAME;
pub use identifiers::TeamName;
pub use identifiers::duplicate_names;
pub use identifiers::is_ascii_name;
pub use identifiers::is_reserved_team_name;
pub use identifiers::normalize_name;
pub use normalize::ParseError;
pub use normalize::document_from_file;
