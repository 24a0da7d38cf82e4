// steward-core/src/interfaces/mod.rs
// ============================================================================
// Module: Steward Interfaces
// Description: Backend-agnostic interfaces between the engine and the remote API.
// Purpose: Define the capability surface the reconciliation runtime sequences.
// Dependencies: crate::core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The reconciliation engine never talks HTTP directly: it sequences calls
//! against the [`ManagementApi`] capability trait, which the `steward-client`
//! crate implements over the control plane's REST API and tests implement
//! in memory. Progress output flows through [`StatusSink`], and cancellation
//! through [`CancelToken`], checked at every remote-call boundary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::document::Document;
use crate::core::document::EnrollSecret;

// ============================================================================
// SECTION: Status Sink
// ============================================================================

/// Receiver for human-readable progress lines (`[+]`, `[-]`, `[!]`).
pub trait StatusSink {
    /// Emits one progress line.
    fn line(&mut self, message: &str);
}

/// Status sink that collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Collected lines, in emission order.
    pub lines: Vec<String>,
}

impl StatusSink for MemorySink {
    fn line(&mut self, message: &str) {
        self.lines.push(message.to_string());
    }
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation token, observed at remote-call boundaries.
///
/// In-flight calls are not interrupted; cancellation takes effect before the
/// next call is issued.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Shared cancellation flag.
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Remote Types
// ============================================================================

/// License tier reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    /// Free tier; per-team features are unavailable.
    Free,
    /// Premium tier.
    Premium,
}

/// License information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// License tier.
    pub tier: LicenseTier,
}

impl License {
    /// Returns true for premium licenses.
    #[must_use]
    pub fn is_premium(&self) -> bool {
        self.tier == LicenseTier::Premium
    }
}

/// Application configuration snapshot read at the start of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// License information.
    pub license: License,
    /// Remaining configuration, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One remotely existing team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team identifier.
    pub id: u64,
    /// Team name.
    pub name: String,
}

/// One remotely persisted label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    /// Label name.
    pub name: String,
    /// Built-in labels are managed by the server and never declared in
    /// documents.
    pub builtin: bool,
}

// ============================================================================
// SECTION: Apply Outcome
// ============================================================================

/// Dry-run assumptions produced by the global-document apply.
///
/// A pure value: created once by the global apply and passed read-only into
/// every subsequent team apply so team-level dry runs can reason about global
/// state that would exist after a real run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunAssumptions {
    /// Whether Windows MDM would be enabled and configured after the run.
    pub windows_enabled_and_configured: Option<bool>,
}

/// Reference to a software package applied earlier in the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwarePackageRef {
    /// Server-assigned software title identifier.
    pub title_id: u64,
    /// Package URL.
    pub url: String,
    /// Package SHA-256, when known.
    pub hash_sha256: Option<String>,
}

/// Reference to a VPP app applied earlier in the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VppAppRef {
    /// App Store identifier.
    pub app_store_id: String,
    /// Server-assigned software title identifier.
    pub title_id: u64,
}

/// Reference to a script applied earlier in the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRef {
    /// Server-assigned script identifier.
    pub id: u64,
    /// Script name.
    pub name: String,
}

/// Artifacts applied so far in this run, keyed by team name.
///
/// Later policy documents resolve installer hashes and script names against
/// this ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactLedger {
    /// Software packages applied per team.
    pub software: BTreeMap<String, Vec<SoftwarePackageRef>>,
    /// VPP apps applied per team.
    pub vpp_apps: BTreeMap<String, Vec<VppAppRef>>,
    /// Scripts applied per team.
    pub scripts: BTreeMap<String, Vec<ScriptRef>>,
}

/// One deferred finalization task, executed after all documents are applied.
///
/// Typed variants instead of anonymous closures so the finalization contract
/// is visible in the signature of [`ManagementApi::finalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FinalizeTask {
    /// Upload the end-user license agreement referenced by the run.
    ApplyEula {
        /// Path to the EULA document.
        path: String,
    },
    /// Apply a narrow patch to the app configuration.
    PatchAppConfig {
        /// JSON patch body.
        patch: Value,
    },
}

/// Result of applying one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Dry-run assumptions; only meaningful for the global document.
    pub assumptions: Option<DryRunAssumptions>,
    /// Finalization tasks accumulated by this apply.
    pub finalize: Vec<FinalizeTask>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Management API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connection, timeout, serialization).
    #[error("transport error: {0}")]
    Transport(String),
    /// Remote rejected the request.
    #[error("api error (HTTP {status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or diagnostic message.
        message: String,
    },
    /// Remote response could not be interpreted.
    #[error("invalid api response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// SECTION: Management API
// ============================================================================

/// Capability surface of the remote fleet-management control plane.
///
/// The engine is strictly sequential, so all operations are synchronous
/// blocking calls.
pub trait ManagementApi {
    /// Reads the application configuration, including the license tier.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the config cannot be fetched.
    fn app_config(&self) -> Result<AppConfig, ApiError>;

    /// Lists all remotely existing teams.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the listing fails.
    fn list_teams(&self) -> Result<Vec<Team>, ApiError>;

    /// Deletes a team by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when deletion fails.
    fn delete_team(&self, team_id: u64) -> Result<(), ApiError>;

    /// Lists persisted labels.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the listing fails.
    fn get_labels(&self) -> Result<Vec<LabelInfo>, ApiError>;

    /// Counts Apple Business Manager tokens known to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the count cannot be fetched.
    fn count_abm_tokens(&self) -> Result<usize, ApiError>;

    /// Applies a narrow patch to the app configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the patch is rejected.
    fn apply_app_config(&self, patch: &Value) -> Result<(), ApiError>;

    /// Uploads server-side secret variable bindings.
    ///
    /// Values already known to `saved` are skipped; newly saved names are
    /// added to it. During a dry run the server validates without storing.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the upload fails.
    fn save_env_secrets(
        &self,
        saved: &mut BTreeMap<String, String>,
        incoming: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<(), ApiError>;

    /// Applies (or simulates) one document; the per-document unit of work.
    ///
    /// Returns the dry-run assumptions (global document only) and the
    /// finalization tasks this apply deferred.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when any remote mutation fails.
    #[allow(clippy::too_many_arguments, reason = "Mirrors the per-document apply contract.")]
    fn apply_document(
        &self,
        document: &Document,
        filename: &str,
        dry_run: bool,
        assumptions: Option<&DryRunAssumptions>,
        app_config: &AppConfig,
        ledger: &mut ArtifactLedger,
        sink: &mut dyn StatusSink,
    ) -> Result<ApplyOutcome, ApiError>;

    /// Executes one finalization task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the task fails.
    fn finalize(&self, task: &FinalizeTask) -> Result<(), ApiError>;

    /// Applies enrollment secrets for a team (`None` targets the
    /// organization).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the apply fails.
    fn apply_enroll_secrets(
        &self,
        team_id: Option<u64>,
        secrets: &[EnrollSecret],
    ) -> Result<(), ApiError>;
}
