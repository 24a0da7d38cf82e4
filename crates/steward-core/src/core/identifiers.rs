// steward-core/src/core/identifiers.rs
// ============================================================================
// Module: Steward Identifiers
// Description: Canonical team-name handling and name validation helpers.
// Purpose: Provide NFC-normalized team names with reserved-name awareness.
// Dependencies: serde, unicode-normalization
// ============================================================================

//! ## Overview
//! Team names are the join key between documents, remote teams, and token
//! bindings, so they are normalized once at the boundary (Unicode NFC) and
//! compared in normalized form everywhere else. The reserved names
//! `"No team"` and `"All teams"` are built into the control plane and may
//! never name a real team.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// SECTION: Reserved Names
// ============================================================================

/// Name of the built-in "No team" grouping.
pub const NO_TEAM: &str = "No team";

/// Name of the built-in "All teams" grouping.
pub const ALL_TEAMS: &str = "All teams";

/// Reserved filename for the "No team" document.
pub const NO_TEAM_FILENAME: &str = "no-team.yml";

/// Returns true when `name` matches a reserved team name.
///
/// The "No team" comparison is case-insensitive, matching how documents are
/// classified; "All teams" is matched exactly.
#[must_use]
pub fn is_reserved_team_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(NO_TEAM) || name == ALL_TEAMS
}

// ============================================================================
// SECTION: Team Name
// ============================================================================

/// NFC-normalized team name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamName(String);

impl TeamName {
    /// Creates a team name, applying Unicode NFC normalization.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().nfc().collect())
    }

    /// Returns the normalized name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when this is the built-in "No team" name.
    #[must_use]
    pub fn is_no_team(&self) -> bool {
        self.0.eq_ignore_ascii_case(NO_TEAM)
    }

    /// Returns true when this is a reserved team name.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        is_reserved_team_name(&self.0)
    }
}

impl fmt::Display for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TeamName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TeamName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Name Validation
// ============================================================================

/// Returns true when every character of `s` is ASCII.
#[must_use]
pub fn is_ascii_name(s: &str) -> bool {
    s.is_ascii()
}

/// Normalizes an arbitrary team-name string for comparison.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}

/// Collects the names that appear more than once in `names`.
///
/// Every duplicate is reported exactly once, preserving first-seen order, so
/// an operator sees the full set of offending names in a single pass.
#[must_use]
pub fn duplicate_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<(&str, bool)> = Vec::new();
    let mut duplicates = Vec::new();
    for name in names {
        match seen.iter_mut().find(|(n, _)| *n == name) {
            Some((_, reported)) => {
                if !*reported {
                    duplicates.push(name.to_string());
                    *reported = true;
                }
            }
            None => seen.push((name, false)),
        }
    }
    duplicates
}
