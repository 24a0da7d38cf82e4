// steward-core/src/runtime/tokens.rs
// ============================================================================
// Module: Token Bindings
// Description: Deferred MDM token-to-team assignment resolution.
// Purpose: Let global settings reference teams created later in the same run.
// Dependencies: crate::core, crate::interfaces, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Apple Business Manager and Volume Purchasing Program tokens are bound to
//! teams inside the global document's MDM settings, but the referenced teams
//! may not exist until their own documents are applied later in the run. The
//! resolver records those bindings in a [`PendingBindings`] side table,
//! produces a stripped clone of the global document to apply first, and then
//! yields the assignment patches once every team name can be resolved. Parsed
//! documents are never mutated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::document::Document;
use crate::core::document::MdmSettings;
use crate::core::identifiers::is_reserved_team_name;
use crate::core::identifiers::normalize_name;
use crate::interfaces::ApiError;
use crate::interfaces::ManagementApi;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Token-binding resolution errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Legacy and current ABM keys were both provided.
    #[error(
        "mdm.apple_bm_default_team has been deprecated; use mdm.apple_business_manager, and remove mdm.apple_bm_default_team"
    )]
    LegacyAndCurrentAbmKeys,
    /// The legacy single-team ABM key with more than one token enrolled.
    #[error(
        "mdm.apple_bm_default_team cannot be used with multiple Apple Business Manager tokens; use mdm.apple_business_manager"
    )]
    LegacyKeyWithMultipleTokens,
    /// An ABM assignment referenced a team no document defines.
    #[error("apple_business_manager team {0} not found in team configs")]
    AbmTeamNotFound(String),
    /// A VPP assignment referenced a team no document defines.
    #[error("volume_purchasing_program team {0} not found in team configs")]
    VppTeamNotFound(String),
    /// The server could not be queried while resolving bindings.
    #[error(transparent)]
    Api(#[from] ApiError),
}

// ============================================================================
// SECTION: Pending Bindings
// ============================================================================

/// Token-to-team bindings referenced by the global document.
///
/// `abm_teams`/`vpp_teams` hold every referenced team and feed deletion
/// protection; the `*_missing` subsets hold the teams that did not exist
/// remotely when the run began, and only those defer the binding keys past
/// the global apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBindings {
    /// Teams referenced by ABM assignments, NFC-normalized.
    pub abm_teams: BTreeSet<String>,
    /// ABM-referenced teams that did not yet exist remotely.
    pub abm_missing: BTreeSet<String>,
    /// The ABM binding came from the legacy single-team key.
    pub abm_legacy: bool,
    /// Teams referenced by VPP assignments, NFC-normalized.
    pub vpp_teams: BTreeSet<String>,
    /// VPP-referenced teams that did not yet exist remotely.
    pub vpp_missing: BTreeSet<String>,
}

impl PendingBindings {
    /// Inspects the global document's MDM settings, records every referenced
    /// team, and marks the ones absent from `remote_teams` as deferred.
    ///
    /// `remote_teams` holds NFC-normalized names of remotely existing teams.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] on legacy-key misuse or when the server's ABM
    /// token count cannot be fetched.
    pub fn from_global(
        doc: &Document,
        api: &dyn ManagementApi,
        remote_teams: &BTreeSet<String>,
    ) -> Result<Self, TokenError> {
        let mut bindings = Self::default();
        let Some(mdm) = doc.org_settings.as_ref().and_then(|org| org.mdm.as_ref()) else {
            return Ok(bindings);
        };

        let has_legacy = mdm.apple_bm_default_team.is_some();
        let has_current = mdm.apple_business_manager.is_some();
        if has_legacy && has_current {
            return Err(TokenError::LegacyAndCurrentAbmKeys);
        }
        if let Some(legacy_team) = &mdm.apple_bm_default_team {
            if api.count_abm_tokens()? > 1 {
                return Err(TokenError::LegacyKeyWithMultipleTokens);
            }
            bindings.abm_legacy = true;
            if !legacy_team.is_empty() {
                bindings.abm_teams.insert(normalize_name(legacy_team));
            }
        } else if let Some(assignments) = &mdm.apple_business_manager {
            for assignment in assignments {
                for team in assignment.referenced_teams() {
                    bindings.abm_teams.insert(normalize_name(team));
                }
            }
        }

        if let Some(assignments) = &mdm.volume_purchasing_program {
            for assignment in assignments {
                for team in &assignment.teams {
                    if !team.is_empty() {
                        bindings.vpp_teams.insert(normalize_name(team));
                    }
                }
            }
        }

        bindings.abm_missing = bindings
            .abm_teams
            .iter()
            .filter(|team| !remote_teams.contains(*team) && !is_reserved_team_name(team))
            .cloned()
            .collect();
        bindings.vpp_missing = bindings
            .vpp_teams
            .iter()
            .filter(|team| !remote_teams.contains(*team) && !is_reserved_team_name(team))
            .cloned()
            .collect();
        Ok(bindings)
    }

    /// Returns true when any referenced team must be created first.
    #[must_use]
    pub fn has_deferred(&self) -> bool {
        !self.abm_missing.is_empty() || !self.vpp_missing.is_empty()
    }

    /// Returns a clone of the global document with deferred token-binding
    /// keys removed, suitable for the first apply pass.
    ///
    /// Bindings whose teams all exist remotely are left in place.
    #[must_use]
    pub fn stripped_global(&self, doc: &Document) -> Document {
        let mut stripped = doc.clone();
        if let Some(org) = &mut stripped.org_settings
            && let Some(mdm) = &mut org.mdm
        {
            if !self.abm_missing.is_empty() {
                mdm.apple_bm_default_team = None;
                mdm.apple_business_manager = None;
            }
            if !self.vpp_missing.is_empty() {
                mdm.volume_purchasing_program = None;
            }
        }
        stripped
    }

    /// Builds the ABM assignment patch once every referenced team resolves.
    ///
    /// `known_teams` holds NFC-normalized team names defined in this run.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::AbmTeamNotFound`] naming the first unresolved
    /// team.
    pub fn abm_patch(
        &self,
        doc: &Document,
        known_teams: &BTreeSet<String>,
    ) -> Result<Option<Value>, TokenError> {
        if self.abm_missing.is_empty() {
            return Ok(None);
        }
        for team in &self.abm_missing {
            if !known_teams.contains(team) {
                return Err(TokenError::AbmTeamNotFound(team.clone()));
            }
        }
        let Some(mdm) = doc.org_settings.as_ref().and_then(|org| org.mdm.as_ref()) else {
            return Ok(None);
        };
        let patch = if self.abm_legacy {
            json!({"mdm": {"apple_bm_default_team": mdm.apple_bm_default_team}})
        } else {
            json!({"mdm": {"apple_business_manager": mdm.apple_business_manager}})
        };
        Ok(Some(patch))
    }

    /// Builds the VPP assignment patch once every referenced team resolves.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::VppTeamNotFound`] naming the first unresolved
    /// team.
    pub fn vpp_patch(
        &self,
        doc: &Document,
        known_teams: &BTreeSet<String>,
    ) -> Result<Option<Value>, TokenError> {
        if self.vpp_missing.is_empty() {
            return Ok(None);
        }
        for team in &self.vpp_missing {
            if !known_teams.contains(team) {
                return Err(TokenError::VppTeamNotFound(team.clone()));
            }
        }
        let Some(mdm) = doc.org_settings.as_ref().and_then(|org| org.mdm.as_ref()) else {
            return Ok(None);
        };
        Ok(Some(
            json!({"mdm": {"volume_purchasing_program": mdm.volume_purchasing_program}}),
        ))
    }
}

/// Returns the MDM settings of the global document, when present.
#[must_use]
pub fn global_mdm(doc: &Document) -> Option<&MdmSettings> {
    doc.org_settings.as_ref().and_then(|org| org.mdm.as_ref())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
