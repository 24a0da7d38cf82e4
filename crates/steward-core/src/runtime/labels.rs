// steward-core/src/runtime/labels.rs
// ============================================================================
// Module: Label Usage
// Description: Collects label references made by one document.
// Purpose: Validate label scoping before any document is applied.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Profiles, software items, queries, and policies may scope themselves to
//! labels. Before a document is applied, every referenced label must either
//! be declared by the global document or already exist on the server. This
//! module walks one document and produces the full reference map, enforcing
//! per-item mutual-exclusion of scoping modes along the way.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::document::Document;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One configuration item referencing a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelUse {
    /// Kind of the referencing item, for operator-facing messages.
    pub kind: &'static str,
    /// Name of the referencing item.
    pub name: String,
}

/// Label-reference scoping violations found while walking a document.
#[derive(Debug, Error)]
pub enum LabelUsageError {
    /// An item combined mutually exclusive label-scoping modes.
    #[error("{}", .0.join("; "))]
    Exclusivity(Vec<String>),
}

// ============================================================================
// SECTION: Collection
// ============================================================================

/// Walks `doc` and returns every label reference keyed by label name.
///
/// # Errors
///
/// Returns [`LabelUsageError::Exclusivity`] when any item mixes scoping
/// modes that cannot be combined; all findings are aggregated.
pub fn label_usage(doc: &Document) -> Result<BTreeMap<String, Vec<LabelUse>>, LabelUsageError> {
    let mut usage: BTreeMap<String, Vec<LabelUse>> = BTreeMap::new();
    let mut findings: Vec<String> = Vec::new();

    let mut record = |labels: &[String], kind: &'static str, name: &str| {
        for label in labels {
            if label.is_empty() {
                continue;
            }
            usage.entry(label.clone()).or_default().push(LabelUse {
                kind,
                name: name.to_string(),
            });
        }
    };

    for settings in [&doc.controls.macos_settings, &doc.controls.windows_settings]
        .into_iter()
        .flatten()
    {
        for profile in &settings.custom_settings {
            let modes_set = [
                !profile.labels_include_any.is_empty(),
                !profile.labels_include_all.is_empty(),
                !profile.labels_exclude_any.is_empty(),
            ]
            .into_iter()
            .filter(|set| *set)
            .count();
            if modes_set > 1 {
                findings.push(format!(
                    "only one of \"labels_exclude_any\", \"labels_include_all\" or \"labels_include_any\" can be specified for profile \"{}\"",
                    profile.path
                ));
                continue;
            }
            record(&profile.labels_include_any, "MDM Profile", &profile.path);
            record(&profile.labels_include_all, "MDM Profile", &profile.path);
            record(&profile.labels_exclude_any, "MDM Profile", &profile.path);
        }
    }

    // Software items enforce their exclusivity at parse time; only the
    // references are collected here.
    for package in &doc.software.packages {
        let name = if package.url.is_empty() { &package.hash_sha256 } else { &package.url };
        record(&package.labels_include_any, "Software Package", name);
        record(&package.labels_exclude_any, "Software Package", name);
    }
    for app in &doc.software.app_store_apps {
        record(&app.labels_include_any, "App Store App", &app.app_store_id);
        record(&app.labels_exclude_any, "App Store App", &app.app_store_id);
    }
    for app in &doc.software.maintained_apps {
        record(&app.labels_include_any, "Maintained App", &app.slug);
        record(&app.labels_exclude_any, "Maintained App", &app.slug);
    }

    for query in &doc.queries {
        record(&query.labels_include_any, "Query", &query.name);
    }

    for policy in &doc.policies {
        if !policy.labels_include_any.is_empty() && !policy.labels_exclude_any.is_empty() {
            findings.push(format!(
                "only one of \"labels_exclude_any\" or \"labels_include_any\" can be specified for policy \"{}\"",
                policy.name
            ));
            continue;
        }
        record(&policy.labels_include_any, "Policy", &policy.name);
        record(&policy.labels_exclude_any, "Policy", &policy.name);
    }

    if findings.is_empty() {
        Ok(usage)
    } else {
        Err(LabelUsageError::Exclusivity(findings))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
