// steward-core/src/core/document.rs
// ============================================================================
// Module: Document Model
// Description: Typed in-memory model of one declarative configuration file.
// Purpose: Represent org/team/no-team documents with explicit optional fields.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! One `Document` is the canonical form of one YAML input file after
//! normalization: external-file indirection resolved, environment variables
//! expanded, deprecated keys migrated, names validated. Settings domains that
//! the engine reasons about (MDM token bindings, enrollment secrets, MDM
//! profile scoping) are fully typed; everything else is carried in residual
//! `extra` bags so server-defined extension keys round-trip untouched.
//! Documents are immutable after parse: the runtime never mutates a parsed
//! document, it derives stripped clones instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::TeamName;

// ============================================================================
// SECTION: Document
// ============================================================================

/// Classification of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentScope {
    /// Organization-wide settings (no team identity).
    Global,
    /// A named team.
    Team,
    /// The built-in "No team" grouping.
    NoTeam,
}

/// One normalized configuration document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Team identity; `None` for the global document.
    pub team_name: Option<TeamName>,
    /// Organization settings; present only on the global document.
    pub org_settings: Option<OrgSettings>,
    /// Team settings; present only on team documents.
    pub team_settings: Option<TeamSettings>,
    /// Agent options blob, passed through to the server opaquely.
    pub agent_options: Option<Value>,
    /// Controls block (OS updates, profiles, scripts, setup).
    pub controls: Controls,
    /// Policy specifications.
    pub policies: Vec<PolicySpec>,
    /// Query specifications.
    pub queries: Vec<QuerySpec>,
    /// Label declarations. `None` means the key was absent and existing
    /// labels stay untouched; `Some` replaces the label set wholesale, so an
    /// empty list removes every label.
    pub labels: Option<Vec<LabelSpec>>,
    /// Software declarations; teams only.
    pub software: Software,
    /// Server-side secret variable bindings referenced by profiles/scripts.
    pub env_secrets: BTreeMap<String, String>,
}

impl Document {
    /// Returns an empty document for the given team identity.
    #[must_use]
    pub fn empty(team_name: Option<TeamName>) -> Self {
        Self {
            team_name,
            org_settings: None,
            team_settings: None,
            agent_options: None,
            controls: Controls::default(),
            policies: Vec::new(),
            queries: Vec::new(),
            labels: None,
            software: Software::default(),
            env_secrets: BTreeMap::new(),
        }
    }

    /// Returns true when this document carries no team identity.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.team_name.as_ref().is_none_or(|name| name.as_str().is_empty())
    }

    /// Returns true when this document describes the "No team" grouping.
    #[must_use]
    pub fn is_no_team(&self) -> bool {
        self.team_name.as_ref().is_some_and(TeamName::is_no_team)
    }

    /// Returns the document scope.
    #[must_use]
    pub fn scope(&self) -> DocumentScope {
        if self.is_global() {
            DocumentScope::Global
        } else if self.is_no_team() {
            DocumentScope::NoTeam
        } else {
            DocumentScope::Team
        }
    }

    /// Returns the enrollment secrets declared by this document.
    #[must_use]
    pub fn enroll_secrets(&self) -> &[EnrollSecret] {
        if let Some(org) = &self.org_settings {
            &org.secrets
        } else if let Some(team) = &self.team_settings {
            &team.secrets
        } else {
            &[]
        }
    }
}

// ============================================================================
// SECTION: Settings Domains
// ============================================================================

/// Organization-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrgSettings {
    /// Enrollment secrets. An explicit empty list removes all secrets.
    pub secrets: Vec<EnrollSecret>,
    /// MDM token-binding settings.
    pub mdm: Option<MdmSettings>,
    /// Remaining organization settings, passed through to the server.
    pub extra: BTreeMap<String, Value>,
}

/// Per-team settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeamSettings {
    /// Enrollment secrets. An explicit empty list removes all secrets.
    pub secrets: Vec<EnrollSecret>,
    /// Remaining team settings, passed through to the server.
    pub extra: BTreeMap<String, Value>,
}

/// One enrollment secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollSecret {
    /// Secret value; non-empty ASCII.
    pub secret: String,
}

/// Organization-level MDM settings relevant to token-team bindings.
///
/// The legacy single-team key and the current assignment lists are both
/// modeled so mutual-exclusion and deprecation rules are type-checked rather
/// than probed out of a map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MdmSettings {
    /// Legacy single default team for Apple Business Manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apple_bm_default_team: Option<String>,
    /// Current Apple Business Manager team assignments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apple_business_manager: Option<Vec<AbmAssignment>>,
    /// Volume Purchasing Program team assignments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_purchasing_program: Option<Vec<VppAssignment>>,
    /// Remaining MDM settings, passed through to the server.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One Apple Business Manager token assignment entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbmAssignment {
    /// Business-manager organization name the token belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    /// Team receiving macOS devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos_team: Option<String>,
    /// Team receiving iOS devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_team: Option<String>,
    /// Team receiving iPadOS devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipados_team: Option<String>,
}

impl AbmAssignment {
    /// Returns the non-empty team names referenced by this assignment.
    #[must_use]
    pub fn referenced_teams(&self) -> Vec<&str> {
        [&self.macos_team, &self.ios_team, &self.ipados_team]
            .into_iter()
            .filter_map(|team| team.as_deref())
            .filter(|team| !team.is_empty())
            .collect()
    }
}

/// One Volume Purchasing Program token assignment entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VppAssignment {
    /// Purchasing location the token belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Teams the token is assigned to.
    #[serde(default)]
    pub teams: Vec<String>,
}

// ============================================================================
// SECTION: Controls
// ============================================================================

/// Controls block: device-management settings scoped to one document.
///
/// `defined` records that a `controls:` key was present at all, which is a
/// distinct condition from any field being populated (see
/// [`Controls::is_set`]). The global/no-team mutual-exclusion rule needs
/// both.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Controls {
    /// `controls:` key was present in the file.
    #[serde(skip)]
    pub defined: bool,
    /// macOS OS-update policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macos_updates: Option<Value>,
    /// iOS OS-update policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ios_updates: Option<Value>,
    /// iPadOS OS-update policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipados_updates: Option<Value>,
    /// macOS settings, including custom MDM profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macos_settings: Option<OsCustomSettings>,
    /// macOS setup experience settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macos_setup: Option<Value>,
    /// macOS migration settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macos_migration: Option<Value>,
    /// Windows OS-update policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_updates: Option<Value>,
    /// Windows settings, including custom MDM profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_settings: Option<OsCustomSettings>,
    /// Windows MDM enablement toggle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_enabled_and_configured: Option<Value>,
    /// Windows migration toggle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_migration_enabled: Option<Value>,
    /// Disk-encryption enforcement toggle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_disk_encryption: Option<Value>,
    /// Script paths, resolved to absolute form; uploaded through their own
    /// batch endpoint rather than the config patch.
    #[serde(skip)]
    pub scripts: Vec<String>,
}

impl Controls {
    /// Returns true when any controls field is populated.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.macos_updates.is_some()
            || self.ios_updates.is_some()
            || self.ipados_updates.is_some()
            || self.macos_settings.is_some()
            || self.macos_setup.is_some()
            || self.macos_migration.is_some()
            || self.windows_updates.is_some()
            || self.windows_settings.is_some()
            || self.windows_enabled_and_configured.is_some()
            || self.windows_migration_enabled.is_some()
            || self.enable_disk_encryption.is_some()
            || !self.scripts.is_empty()
    }
}

/// Per-OS settings block carrying custom MDM profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsCustomSettings {
    /// Custom MDM profile declarations.
    #[serde(default)]
    pub custom_settings: Vec<ProfileSpec>,
    /// Remaining per-OS settings, passed through to the server.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One custom MDM profile declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSpec {
    /// Path to the profile file, resolved to absolute form.
    pub path: String,
    /// Scope to hosts carrying any of these labels.
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    /// Scope to hosts carrying all of these labels.
    #[serde(default)]
    pub labels_include_all: Vec<String>,
    /// Exclude hosts carrying any of these labels.
    #[serde(default)]
    pub labels_exclude_any: Vec<String>,
}

// ============================================================================
// SECTION: Policies and Queries
// ============================================================================

/// One policy specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Policy name; unique within the owning document.
    #[serde(default)]
    pub name: String,
    /// Policy query text.
    #[serde(default)]
    pub query: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Suggested resolution steps.
    #[serde(default)]
    pub resolution: String,
    /// Target platform string.
    #[serde(default)]
    pub platform: String,
    /// Marks the policy as critical.
    #[serde(default)]
    pub critical: bool,
    /// Scope to hosts carrying any of these labels.
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    /// Exclude hosts carrying any of these labels.
    #[serde(default)]
    pub labels_exclude_any: Vec<String>,
    /// Calendar-event automation toggle.
    #[serde(default)]
    pub calendar_events_enabled: bool,
    /// Conditional-access enforcement toggle.
    #[serde(default)]
    pub conditional_access_enabled: bool,
    /// Script automation binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_script: Option<PolicyRunScript>,
    /// Software-install automation binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_software: Option<PolicyInstallSoftware>,
    /// Resolved installer URL; populated from the referenced package spec.
    #[serde(skip)]
    pub install_software_url: Option<String>,
    /// Resolved script name; populated once the script is confirmed to exist
    /// in the owning document's controls.
    #[serde(skip)]
    pub run_script_name: Option<String>,
}

/// Script automation binding for a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRunScript {
    /// Path to the script file.
    #[serde(default)]
    pub path: String,
}

/// Software-install automation binding for a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInstallSoftware {
    /// Path to a software-package spec file.
    #[serde(default)]
    pub package_path: String,
    /// App Store identifier.
    #[serde(default)]
    pub app_store_id: String,
    /// SHA-256 of the installer package.
    #[serde(default)]
    pub hash_sha256: String,
}

/// One scheduled-query specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Query name; unique within the owning document.
    #[serde(default)]
    pub name: String,
    /// Query text.
    #[serde(default)]
    pub query: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Target platform string.
    #[serde(default)]
    pub platform: String,
    /// Collection interval in seconds.
    #[serde(default)]
    pub interval: u32,
    /// Scope to hosts carrying any of these labels.
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    /// Remaining query settings, passed through to the server.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ============================================================================
// SECTION: Labels
// ============================================================================

/// One label declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    /// Label name; ASCII, unique within the document.
    #[serde(default)]
    pub name: String,
    /// Membership query; required unless `hosts` makes the label manual.
    #[serde(default)]
    pub query: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Manual membership host list. Present (possibly empty) for manual
    /// labels, absent for dynamic ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
}

impl LabelSpec {
    /// Returns true when this label uses manual membership.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.hosts.is_some()
    }
}

// ============================================================================
// SECTION: Software
// ============================================================================

/// Software declarations for one team document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Software {
    /// Custom installer packages.
    pub packages: Vec<SoftwarePackageSpec>,
    /// App Store apps delivered through VPP.
    pub app_store_apps: Vec<AppStoreAppSpec>,
    /// Curated maintained apps.
    pub maintained_apps: Vec<MaintainedAppSpec>,
}

/// File reference used inside software-package specs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Path to the referenced file; empty when unset.
    #[serde(default)]
    pub path: String,
}

/// One custom installer package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftwarePackageSpec {
    /// Download URL for the installer.
    #[serde(default)]
    pub url: String,
    /// Lower-case hex SHA-256 of the installer.
    #[serde(default)]
    pub hash_sha256: String,
    /// Pre-install condition query.
    #[serde(default)]
    pub pre_install_query: FileRef,
    /// Install script.
    #[serde(default)]
    pub install_script: FileRef,
    /// Post-install script.
    #[serde(default)]
    pub post_install_script: FileRef,
    /// Uninstall script.
    #[serde(default)]
    pub uninstall_script: FileRef,
    /// Expose the package in self-service.
    #[serde(default)]
    pub self_service: bool,
    /// Scope to hosts carrying any of these labels.
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    /// Exclude hosts carrying any of these labels.
    #[serde(default)]
    pub labels_exclude_any: Vec<String>,
}

/// One App Store app declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStoreAppSpec {
    /// App Store identifier.
    #[serde(default)]
    pub app_store_id: String,
    /// Expose the app in self-service.
    #[serde(default)]
    pub self_service: bool,
    /// Scope to hosts carrying any of these labels.
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    /// Exclude hosts carrying any of these labels.
    #[serde(default)]
    pub labels_exclude_any: Vec<String>,
}

/// One maintained-app declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainedAppSpec {
    /// Maintained-app slug.
    #[serde(default)]
    pub slug: String,
    /// Expose the app in self-service.
    #[serde(default)]
    pub self_service: bool,
    /// Scope to hosts carrying any of these labels.
    #[serde(default)]
    pub labels_include_any: Vec<String>,
    /// Exclude hosts carrying any of these labels.
    #[serde(default)]
    pub labels_exclude_any: Vec<String>,
}
