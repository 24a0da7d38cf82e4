// steward-core/tests/common/mod.rs
// ============================================================================
// Module: Test Support
// Description: In-memory ManagementApi mock and YAML fixtures.
// ============================================================================
//! ## Overview
//! Provides a recording mock of the management API plus helpers for writing
//! document fixtures to a temp directory.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]
#![allow(dead_code, reason = "Each integration test binary uses a subset of the helpers.")]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use steward_core::ApiError;
use steward_core::AppConfig;
use steward_core::ApplyOutcome;
use steward_core::ArtifactLedger;
use steward_core::Document;
use steward_core::DryRunAssumptions;
use steward_core::EnrollSecret;
use steward_core::FinalizeTask;
use steward_core::LabelInfo;
use steward_core::License;
use steward_core::LicenseTier;
use steward_core::ManagementApi;
use steward_core::StatusSink;
use steward_core::Team;

/// Recording in-memory management API.
pub struct MockApi {
    /// License tier returned by `app_config`.
    pub tier: LicenseTier,
    /// Extra app-config payload (e.g. server-side MDM bindings).
    pub extra_config: BTreeMap<String, Value>,
    /// Remotely existing teams.
    pub teams: Vec<Team>,
    /// Remotely existing labels.
    pub labels: Vec<LabelInfo>,
    /// ABM token count.
    pub abm_tokens: usize,
    /// Recorded calls, in order.
    pub calls: RefCell<Vec<String>>,
}

impl MockApi {
    /// Creates a premium-tier mock with no remote state.
    pub fn premium() -> Self {
        Self {
            tier: LicenseTier::Premium,
            extra_config: BTreeMap::new(),
            teams: Vec::new(),
            labels: Vec::new(),
            abm_tokens: 1,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Creates a free-tier mock with no remote state.
    pub fn free() -> Self {
        Self {
            tier: LicenseTier::Free,
            ..Self::premium()
        }
    }

    /// Returns the recorded calls.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Returns recorded calls whose entry starts with `prefix`.
    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|call| call.starts_with(prefix)).collect()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl ManagementApi for MockApi {
    fn app_config(&self) -> Result<AppConfig, ApiError> {
        self.record("app_config".to_string());
        Ok(AppConfig {
            license: License {
                tier: self.tier,
            },
            extra: self.extra_config.clone(),
        })
    }

    fn list_teams(&self) -> Result<Vec<Team>, ApiError> {
        self.record("list_teams".to_string());
        Ok(self.teams.clone())
    }

    fn delete_team(&self, team_id: u64) -> Result<(), ApiError> {
        self.record(format!("delete_team {team_id}"));
        Ok(())
    }

    fn get_labels(&self) -> Result<Vec<LabelInfo>, ApiError> {
        self.record("get_labels".to_string());
        Ok(self.labels.clone())
    }

    fn count_abm_tokens(&self) -> Result<usize, ApiError> {
        self.record("count_abm_tokens".to_string());
        Ok(self.abm_tokens)
    }

    fn apply_app_config(&self, patch: &Value) -> Result<(), ApiError> {
        self.record(format!("apply_app_config {patch}"));
        Ok(())
    }

    fn save_env_secrets(
        &self,
        saved: &mut BTreeMap<String, String>,
        incoming: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<(), ApiError> {
        self.record(format!("save_env_secrets n={} dry_run={dry_run}", incoming.len()));
        for (name, value) in incoming {
            saved.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn apply_document(
        &self,
        document: &Document,
        filename: &str,
        dry_run: bool,
        _assumptions: Option<&DryRunAssumptions>,
        _app_config: &AppConfig,
        _ledger: &mut ArtifactLedger,
        _sink: &mut dyn StatusSink,
    ) -> Result<ApplyOutcome, ApiError> {
        let scope = document
            .team_name
            .as_ref()
            .map_or_else(|| "global".to_string(), |team| format!("team:{team}"));
        let abm = document
            .org_settings
            .as_ref()
            .and_then(|org| org.mdm.as_ref())
            .is_some_and(|mdm| {
                mdm.apple_business_manager.is_some() || mdm.apple_bm_default_team.is_some()
            });
        let apps = document.software.app_store_apps.len();
        self.record(format!(
            "apply_document {scope} file={filename} dry_run={dry_run} abm={abm} app_store_apps={apps}"
        ));
        Ok(ApplyOutcome::default())
    }

    fn finalize(&self, task: &FinalizeTask) -> Result<(), ApiError> {
        self.record(format!("finalize {task:?}"));
        Ok(())
    }

    fn apply_enroll_secrets(
        &self,
        team_id: Option<u64>,
        secrets: &[EnrollSecret],
    ) -> Result<(), ApiError> {
        self.record(format!("apply_enroll_secrets team={team_id:?} n={}", secrets.len()));
        Ok(())
    }
}

/// Writes one fixture file and returns its path.
pub fn write_fixture(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// A minimal valid global document.
pub fn global_yaml() -> String {
    "org_settings:\n  org_info:\n    org_name: Acme\n  secrets:\n    - secret: \"org-secret\"\nagent_options:\n  config:\n    options: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\n    deadline: \"2026-01-01\"\npolicies:\nqueries:\n".to_string()
}

/// A minimal valid team document named `name` carrying `secret`.
pub fn team_yaml(name: &str, secret: &str) -> String {
    format!(
        "name: {name}\nteam_settings:\n  secrets:\n    - secret: \"{secret}\"\nagent_options:\n  config:\n    options: {{}}\npolicies:\nqueries:\nsoftware:\n"
    )
}
