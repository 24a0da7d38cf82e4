// steward-core/src/core/normalize.rs
// ============================================================================
// Module: Document Normalizer
// Description: YAML parsing and canonicalization of configuration documents.
// Purpose: Resolve indirection, env expansion, and deprecated keys into a Document.
// Dependencies: crate::core, crate::interfaces, serde_json, serde_yaml, url
// ============================================================================

//! ## Overview
//! The normalizer turns one YAML file into a typed [`Document`]. Validation
//! findings are accumulated and reported together rather than fail-fast, so
//! an operator sees every offending name and key in a single pass. Any major
//! section may be a `{path: <file>}` indirection, resolved relative to the
//! directory of the referencing document; nested indirection is rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::core::document::AppStoreAppSpec;
use crate::core::document::Controls;
use crate::core::document::Document;
use crate::core::document::EnrollSecret;
use crate::core::document::LabelSpec;
use crate::core::document::MaintainedAppSpec;
use crate::core::document::MdmSettings;
use crate::core::document::OrgSettings;
use crate::core::document::OsCustomSettings;
use crate::core::document::PolicySpec;
use crate::core::document::QuerySpec;
use crate::core::document::SoftwarePackageSpec;
use crate::core::document::TeamSettings;
use crate::core::env::EnvError;
use crate::core::env::expand_env_bytes;
use crate::core::env::lookup_env_secrets;
use crate::core::identifiers::NO_TEAM_FILENAME;
use crate::core::identifiers::TeamName;
use crate::core::identifiers::duplicate_names;
use crate::core::identifiers::is_ascii_name;
use crate::core::identifiers::normalize_name;
use crate::interfaces::StatusSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Allowed top-level document keys.
const TOP_LEVEL_KEYS: &[&str] = &[
    "name",
    "team_settings",
    "org_settings",
    "agent_options",
    "controls",
    "policies",
    "queries",
    "software",
    "labels",
];

/// Deprecated settings keys and their replacements.
const DEPRECATED_SETTINGS_KEYS: &[(&str, &str)] = &[("host_settings", "features")];

/// Maximum accepted software-package URL length.
const MAX_SOFTWARE_URL_LEN: usize = 4000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Document parse errors.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Reading the document or a referenced file failed.
    #[error("failed to read file {path}: {detail}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O detail.
        detail: String,
    },
    /// Environment expansion failed.
    #[error("failed to expand environment in file {path}: {source}")]
    Env {
        /// File path.
        path: String,
        /// Underlying expansion error.
        source: EnvError,
    },
    /// YAML decoding failed.
    #[error("failed to parse file {path}: {detail}")]
    Yaml {
        /// File path.
        path: String,
        /// Underlying decode detail.
        detail: String,
    },
    /// One or more validation findings; reported together.
    #[error("{path}: {}", .findings.join("; "))]
    Validation {
        /// File path.
        path: String,
        /// Every validation finding for this document.
        findings: Vec<String>,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Parses one document file into its canonical form.
///
/// `base_dir` anchors relative `{path: …}` indirection (normally the
/// directory containing `file_path`). `premium` gates software parsing.
/// Deprecation warnings are emitted through `sink`.
///
/// # Errors
///
/// Returns [`ParseError`] on I/O, environment, YAML, or validation failures;
/// validation findings are aggregated into a single error.
pub fn document_from_file(
    file_path: &Path,
    base_dir: &Path,
    premium: bool,
    sink: &mut dyn StatusSink,
) -> Result<Document, ParseError> {
    let display = file_path.display().to_string();
    let bytes = fs::read(file_path).map_err(|err| ParseError::Io {
        path: display.clone(),
        detail: err.to_string(),
    })?;
    let bytes = expand_env_bytes(&bytes).map_err(|source| ParseError::Env {
        path: display.clone(),
        source,
    })?;
    let top: BTreeMap<String, Value> =
        serde_yaml::from_slice(&bytes).map_err(|err| ParseError::Yaml {
            path: display.clone(),
            detail: err.to_string(),
        })?;

    let mut parser = Parser {
        file_path,
        display: display.clone(),
        base_dir,
        findings: Vec::new(),
        sink,
    };
    let mut doc = Document::empty(None);

    for key in top.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            parser.findings.push(format!("unknown top-level field: {key}"));
        }
    }

    parser.classify(&top, &mut doc);
    parser.parse_labels(&top, &mut doc);
    parser.parse_controls(&top, &mut doc);
    parser.parse_agent_options(&top, &mut doc);
    parser.parse_queries(&top, &mut doc);
    if premium {
        parser.parse_software(&top, &mut doc);
    }
    // Policies reference software installers and controls scripts, so they
    // parse last.
    parser.parse_policies(&top, &mut doc);

    if parser.findings.is_empty() {
        Ok(doc)
    } else {
        Err(ParseError::Validation {
            path: display,
            findings: parser.findings,
        })
    }
}

// ============================================================================
// SECTION: Parser State
// ============================================================================

/// Accumulating parser for one document file.
struct Parser<'a> {
    /// Path of the document being parsed.
    file_path: &'a Path,
    /// Display form of the document path.
    display: String,
    /// Directory anchoring relative indirection.
    base_dir: &'a Path,
    /// Accumulated validation findings.
    findings: Vec<String>,
    /// Receiver for deprecation and ignore warnings.
    sink: &'a mut dyn StatusSink,
}

impl Parser<'_> {
    // ------------------------------------------------------------------
    // Classification and settings
    // ------------------------------------------------------------------

    /// Determines document scope and parses the settings section.
    fn classify(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let has_name = top.contains_key("name");
        let has_team_settings = top.contains_key("team_settings");
        let has_org_settings = top.contains_key("org_settings");

        if has_org_settings {
            if has_name || has_team_settings {
                self.findings
                    .push("'org_settings' cannot be used with 'name', 'team_settings'".to_string());
                return;
            }
            if let Some(raw) = top.get("org_settings") {
                self.parse_org_settings(raw, doc);
            }
            return;
        }
        if has_name {
            self.parse_name(top.get("name"), doc);
            if doc.is_no_team() {
                if has_team_settings {
                    self.findings.push(format!(
                        "cannot set 'team_settings' on 'No team' file: \"{}\"",
                        self.display
                    ));
                }
                if self.file_path.file_name().and_then(|n| n.to_str())
                    != Some(NO_TEAM_FILENAME)
                {
                    self.findings.push(format!(
                        "file \"{}\" for 'No team' must be named '{NO_TEAM_FILENAME}'",
                        self.display
                    ));
                }
            } else if has_team_settings {
                if let Some(raw) = top.get("team_settings") {
                    self.parse_team_settings(raw, doc);
                }
            } else {
                self.findings
                    .push("'team_settings' is required when 'name' is provided".to_string());
            }
            return;
        }
        self.findings
            .push("either 'org_settings' or 'name' and 'team_settings' is required".to_string());
    }

    /// Parses and normalizes the team name.
    fn parse_name(&mut self, raw: Option<&Value>, doc: &mut Document) {
        let Some(Value::String(name)) = raw else {
            self.findings.push("team 'name' is required".to_string());
            return;
        };
        if name.is_empty() {
            self.findings.push("team 'name' is required".to_string());
            return;
        }
        if !is_ascii_name(name) {
            self.findings.push(format!("team name must be in ASCII: {name}"));
        }
        doc.team_name = Some(TeamName::new(name));
    }

    /// Parses `org_settings`, including indirection, deprecated keys, MDM
    /// settings, and enrollment secrets.
    fn parse_org_settings(&mut self, raw: &Value, doc: &mut Document) {
        let Some((value, _)) = self.resolve_section(raw, "org settings") else {
            return;
        };
        let Value::Object(mut map) = value else {
            self.findings.push("'org_settings' must be a map".to_string());
            return;
        };
        self.migrate_deprecated_keys(&mut map, "org_settings");
        let mut mdm = None;
        if let Some(mdm_value) = map.remove("mdm") {
            match serde_json::from_value::<MdmSettings>(mdm_value) {
                Ok(parsed) => mdm = Some(parsed),
                Err(err) => {
                    self.findings.push(format!("failed to parse org_settings.mdm: {err}"));
                }
            }
        }
        let secrets = self.parse_secrets(map.remove("secrets"), "org_settings");
        doc.org_settings = Some(OrgSettings {
            secrets,
            mdm,
            extra: map.into_iter().collect(),
        });
    }

    /// Parses `team_settings`, including indirection, deprecated keys, and
    /// enrollment secrets.
    fn parse_team_settings(&mut self, raw: &Value, doc: &mut Document) {
        let Some((value, _)) = self.resolve_section(raw, "team settings") else {
            return;
        };
        let Value::Object(mut map) = value else {
            self.findings.push("'team_settings' must be a map".to_string());
            return;
        };
        self.migrate_deprecated_keys(&mut map, "team_settings");
        let secrets = self.parse_secrets(map.remove("secrets"), "team_settings");
        doc.team_settings = Some(TeamSettings {
            secrets,
            extra: map.into_iter().collect(),
        });
    }

    /// Migrates deprecated settings keys in place, warning per occurrence.
    fn migrate_deprecated_keys(&mut self, map: &mut Map<String, Value>, section: &str) {
        for &(old, new) in DEPRECATED_SETTINGS_KEYS {
            if !map.contains_key(old) {
                continue;
            }
            if map.contains_key(new) {
                self.findings.push(format!(
                    "'{section}.{old}' has been deprecated in favor of '{section}.{new}'; both keys cannot be set"
                ));
                continue;
            }
            self.sink.line(&format!(
                "[!] '{section}.{old}' is deprecated, please use '{section}.{new}'"
            ));
            if let Some(value) = map.remove(old) {
                map.insert(new.to_string(), value);
            }
        }
    }

    /// Validates the enrollment-secret list under a settings section.
    ///
    /// A missing `secrets:` key is an error; an explicit empty (or null)
    /// list removes all secrets.
    fn parse_secrets(&mut self, raw: Option<Value>, section: &str) -> Vec<EnrollSecret> {
        let Some(raw) = raw else {
            self.findings.push(format!("'{section}.secrets' is required"));
            return Vec::new();
        };
        let items = match raw {
            Value::Null => return Vec::new(),
            Value::Array(items) => items,
            _ => {
                self.findings.push("'secrets' must be a list of secret items".to_string());
                return Vec::new();
            }
        };
        let mut secrets = Vec::new();
        for item in items {
            let secret = item
                .as_object()
                .and_then(|map| map.get("secret"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty() && is_ascii_name(s));
            match secret {
                Some(secret) => secrets.push(EnrollSecret {
                    secret: secret.to_string(),
                }),
                None => {
                    self.findings.push(
                        "each item in 'secrets' must have a 'secret' key containing an ASCII string value"
                            .to_string(),
                    );
                    break;
                }
            }
        }
        secrets
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Parses the `labels` key (global documents only).
    ///
    /// An absent key leaves existing labels untouched; a present key (even a
    /// bare or empty one) replaces the label set wholesale.
    fn parse_labels(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let Some(raw) = top.get("labels") else {
            return;
        };
        if !doc.is_global() {
            self.sink.line(
                "[!] 'labels' is only supported in global settings. This key will be ignored.",
            );
            return;
        }
        if raw.is_null() {
            // A bare `labels:` key removes every existing label.
            doc.labels = Some(Vec::new());
            return;
        }
        let Value::Array(items) = raw else {
            self.findings.push("'labels' must be a list".to_string());
            return;
        };
        let mut labels: Vec<LabelSpec> = Vec::new();
        for item in items {
            for resolved in self.resolve_list_item(item, "labels") {
                match serde_json::from_value::<LabelSpec>(resolved) {
                    Ok(label) => labels.push(label),
                    Err(err) => self.findings.push(format!("failed to parse labels: {err}")),
                }
            }
        }
        for label in &labels {
            if label.name.is_empty() {
                self.findings.push("name is required for each label".to_string());
            } else if !is_ascii_name(&label.name) {
                self.findings.push(format!("label name must be in ASCII: {}", label.name));
            }
            if !label.is_manual() && label.query.is_empty() {
                self.findings
                    .push("a SQL query is required for each non-manual label".to_string());
            }
        }
        let duplicates = duplicate_names(labels.iter().map(|l| l.name.as_str()));
        if !duplicates.is_empty() {
            self.findings.push(format!("duplicate label names: {}", duplicates.join(", ")));
        }
        doc.labels = Some(labels);
    }

    // ------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------

    /// Parses the `controls` section, resolving script and profile paths.
    fn parse_controls(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let Some(raw) = top.get("controls") else {
            return;
        };
        let Some((value, effective_dir)) = self.resolve_section(raw, "controls") else {
            doc.controls.defined = true;
            return;
        };
        // A bare `controls:` key is a valid empty block.
        let raw_controls = match serde_json::from_value::<RawControls>(if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        }) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.findings.push(format!("failed to parse controls: {err}"));
                doc.controls.defined = true;
                return;
            }
        };
        let mut controls = Controls {
            defined: true,
            macos_updates: raw_controls.macos_updates,
            ios_updates: raw_controls.ios_updates,
            ipados_updates: raw_controls.ipados_updates,
            macos_settings: raw_controls.macos_settings,
            macos_setup: raw_controls.macos_setup,
            macos_migration: raw_controls.macos_migration,
            windows_updates: raw_controls.windows_updates,
            windows_settings: raw_controls.windows_settings,
            windows_enabled_and_configured: raw_controls.windows_enabled_and_configured,
            windows_migration_enabled: raw_controls.windows_migration_enabled,
            enable_disk_encryption: raw_controls.enable_disk_encryption,
            scripts: Vec::new(),
        };

        for item in raw_controls.scripts {
            let path = item.as_object().and_then(|m| m.get("path")).and_then(Value::as_str);
            match path {
                Some(path) => {
                    let resolved = resolve_relative(&effective_dir, path);
                    controls.scripts.push(resolved.display().to_string());
                }
                None => self.findings.push(
                    "script entry was specified without a path; check for a stray \"-\" in your scripts list"
                        .to_string(),
                ),
            }
        }

        // Script and profile contents may reference server-side secrets.
        for script in controls.scripts.clone() {
            self.gather_file_secrets(Path::new(&script), "scripts", doc);
        }
        if let Some(setup) = &controls.macos_setup
            && let Some(script) = setup.get("script").and_then(Value::as_str)
            && !script.is_empty()
        {
            let resolved = resolve_relative(&effective_dir, script);
            self.gather_file_secrets(&resolved, "macos_setup script", doc);
        }
        if let Some(settings) = &mut controls.macos_settings {
            self.resolve_profiles(settings, &effective_dir, doc);
        }
        if let Some(settings) = &mut controls.windows_settings {
            self.resolve_profiles(settings, &effective_dir, doc);
        }

        doc.controls = controls;
    }

    /// Resolves profile paths to absolute form and collects their secrets.
    fn resolve_profiles(
        &mut self,
        settings: &mut OsCustomSettings,
        effective_dir: &Path,
        doc: &mut Document,
    ) {
        for profile in &mut settings.custom_settings {
            let resolved = resolve_relative(effective_dir, &profile.path);
            // Absolute form so later passes need not track the source
            // directory; controls may come from the global file or from
            // no-team.yml.
            let absolute = std::path::absolute(&resolved).unwrap_or(resolved);
            profile.path = absolute.display().to_string();
            self.gather_file_secrets(Path::new(&profile.path), "profile", doc);
        }
    }

    /// Reads `path` and records any `STEWARD_SECRET_*` references it makes.
    fn gather_file_secrets(&mut self, path: &Path, what: &str, doc: &mut Document) {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                self.findings
                    .push(format!("failed to read {what} file {}: {err}", path.display()));
                return;
            }
        };
        if let Err(err) = lookup_env_secrets(&content, &mut doc.env_secrets) {
            self.findings.push(err.to_string());
        }
    }

    // ------------------------------------------------------------------
    // Agent options
    // ------------------------------------------------------------------

    /// Parses the `agent_options` section (opaque blob, indirection only).
    fn parse_agent_options(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let raw = top.get("agent_options");
        if doc.is_no_team() {
            if raw.is_some() {
                self.sink.line(
                    "[!] 'agent_options' is not supported for \"No team\". This key will be ignored.",
                );
            }
            return;
        }
        let Some(raw) = raw else {
            self.findings.push("'agent_options' is required".to_string());
            return;
        };
        if let Some((value, _)) = self.resolve_section(raw, "agent options") {
            doc.agent_options = Some(value);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Parses the `queries` list.
    fn parse_queries(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let raw = top.get("queries");
        if doc.is_no_team() {
            if raw.is_some() {
                self.sink.line(
                    "[!] 'queries' is not supported for \"No team\". This key will be ignored.",
                );
            }
            return;
        }
        let Some(raw) = raw else {
            self.findings.push("'queries' key is required".to_string());
            return;
        };
        let items = match raw {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            _ => {
                self.findings.push("'queries' must be a list".to_string());
                return;
            }
        };
        for item in &items {
            for resolved in self.resolve_list_item(item, "queries") {
                match serde_json::from_value::<QuerySpec>(resolved) {
                    Ok(query) => doc.queries.push(query),
                    Err(err) => self.findings.push(format!("failed to parse queries: {err}")),
                }
            }
        }
        for query in &doc.queries {
            if query.name.is_empty() {
                self.findings.push("query name is required for each query".to_string());
            } else if !is_ascii_name(&query.name) {
                self.findings.push(format!("query name must be in ASCII: {}", query.name));
            }
            if query.query.is_empty() {
                self.findings.push("query SQL query is required for each query".to_string());
            }
        }
        let duplicates = duplicate_names(doc.queries.iter().map(|q| q.name.as_str()));
        if !duplicates.is_empty() {
            self.findings.push(format!("duplicate query names: {}", duplicates.join(", ")));
        }
    }

    // ------------------------------------------------------------------
    // Software
    // ------------------------------------------------------------------

    /// Parses the `software` section (premium feature; teams only).
    fn parse_software(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let raw = top.get("software");
        if doc.is_global() {
            if raw.is_some_and(|v| !v.is_null()) {
                self.findings.push("'software' cannot be set on global file".to_string());
            }
            return;
        }
        let Some(raw) = raw else {
            self.findings.push("'software' is required".to_string());
            return;
        };
        if raw.is_null() {
            return;
        }
        let raw_software = match serde_json::from_value::<RawSoftware>(raw.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.findings.push(format!("failed to parse software: {err}"));
                return;
            }
        };

        for app in raw_software.app_store_apps {
            if app.app_store_id.is_empty() {
                self.findings.push("software app store id required".to_string());
                continue;
            }
            if !app.labels_exclude_any.is_empty() && !app.labels_include_any.is_empty() {
                self.findings.push(format!(
                    "only one of \"labels_exclude_any\" or \"labels_include_any\" can be specified for app store app \"{}\"",
                    app.app_store_id
                ));
                continue;
            }
            doc.software.app_store_apps.push(app);
        }
        for app in raw_software.maintained_apps {
            if app.slug.is_empty() {
                self.findings.push("maintained app slug is required".to_string());
                continue;
            }
            if !app.labels_exclude_any.is_empty() && !app.labels_include_any.is_empty() {
                self.findings.push(format!(
                    "only one of \"labels_exclude_any\" or \"labels_include_any\" can be specified for maintained app \"{}\"",
                    app.slug
                ));
                continue;
            }
            doc.software.maintained_apps.push(app);
        }
        for item in raw_software.packages {
            self.parse_software_package(&item, doc);
        }
    }

    /// Parses one `software.packages` entry, which may reference a spec file
    /// containing either a single package or a list of packages.
    fn parse_software_package(&mut self, item: &Value, doc: &mut Document) {
        let mut specs: Vec<(SoftwarePackageSpec, PathBuf)> = Vec::new();
        let path = item.as_object().and_then(|m| m.get("path")).and_then(Value::as_str);
        if let Some(path) = path {
            let resolved = resolve_relative(self.base_dir, path);
            let Some(value) = self.read_yaml_value(&resolved, "software package") else {
                return;
            };
            let spec_dir = parent_dir(&resolved);
            // A referenced file may hold one package or a list of packages.
            match value {
                Value::Array(entries) => {
                    for entry in entries {
                        match serde_json::from_value::<SoftwarePackageSpec>(entry) {
                            Ok(spec) => specs.push((spec, spec_dir.clone())),
                            Err(err) => {
                                self.findings.push(format!(
                                    "failed to parse software package file {}: {err}",
                                    resolved.display()
                                ));
                                return;
                            }
                        }
                    }
                }
                entry => match serde_json::from_value::<SoftwarePackageSpec>(entry) {
                    Ok(spec) => specs.push((spec, spec_dir)),
                    Err(err) => {
                        self.findings.push(format!(
                            "failed to parse software package file {}: {err}",
                            resolved.display()
                        ));
                        return;
                    }
                },
            }
        } else {
            match serde_json::from_value::<SoftwarePackageSpec>(item.clone()) {
                Ok(spec) => specs.push((spec, self.base_dir.to_path_buf())),
                Err(err) => {
                    self.findings.push(format!("failed to parse software package: {err}"));
                    return;
                }
            }
        }

        for (mut spec, spec_dir) in specs {
            resolve_package_paths(&mut spec, &spec_dir);
            if self.validate_software_package(&mut spec, doc) {
                doc.software.packages.push(spec);
            }
        }
    }

    /// Validates one resolved software package; returns false to drop it.
    fn validate_software_package(
        &mut self,
        spec: &mut SoftwarePackageSpec,
        doc: &mut Document,
    ) -> bool {
        for script in [&spec.install_script, &spec.post_install_script, &spec.uninstall_script] {
            if !script.path.is_empty() {
                self.gather_file_secrets(Path::new(&script.path), "software script", doc);
            }
        }
        if !spec.hash_sha256.is_empty() && !is_valid_sha256(&spec.hash_sha256) {
            self.findings.push(format!(
                "hash_sha256 value \"{}\" must be a valid lower-case hex-encoded (64-character) SHA-256 hash value",
                spec.hash_sha256
            ));
            return false;
        }
        if spec.hash_sha256.is_empty() && spec.url.is_empty() {
            self.findings.push(
                "at least one of hash_sha256 or url is required for each software package"
                    .to_string(),
            );
            return false;
        }
        if !spec.labels_exclude_any.is_empty() && !spec.labels_include_any.is_empty() {
            self.findings.push(format!(
                "only one of \"labels_exclude_any\" or \"labels_include_any\" can be specified for software URL \"{}\"",
                spec.url
            ));
            return false;
        }
        if spec.url.is_empty() {
            return true;
        }
        if spec.url.len() > MAX_SOFTWARE_URL_LEN {
            self.findings.push(format!(
                "software URL \"{}\" is too long, must be {MAX_SOFTWARE_URL_LEN} characters or less",
                spec.url
            ));
            return false;
        }
        let Ok(parsed) = Url::parse(&spec.url) else {
            self.findings.push(format!("software URL {} is not a valid URL", spec.url));
            return false;
        };
        if spec.install_script.path.is_empty() || spec.uninstall_script.path.is_empty() {
            // Lightweight fail-fast for formats that always need both
            // scripts.
            if parsed.path().ends_with(".exe") {
                self.findings.push(format!(
                    "software URL {} refers to an .exe package, which requires both install_script and uninstall_script",
                    spec.url
                ));
                return false;
            }
            if parsed.path().ends_with(".tar.gz") || parsed.path().ends_with(".tgz") {
                self.findings.push(format!(
                    "software URL {} refers to a .tar.gz archive, which requires both install_script and uninstall_script",
                    spec.url
                ));
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    /// Parses the `policies` list and resolves automation bindings.
    fn parse_policies(&mut self, top: &BTreeMap<String, Value>, doc: &mut Document) {
        let Some(raw) = top.get("policies") else {
            self.findings.push("'policies' key is required".to_string());
            return;
        };
        let items = match raw {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            _ => {
                self.findings.push("'policies' must be a list".to_string());
                return;
            }
        };
        for item in &items {
            let entries = self.resolve_list_item(item, "policies");
            for resolved in entries {
                let mut policy = match serde_json::from_value::<PolicySpec>(resolved) {
                    Ok(policy) => policy,
                    Err(err) => {
                        self.findings.push(format!("failed to parse policies: {err}"));
                        continue;
                    }
                };
                if let Err(err) = self.resolve_policy_install_software(&mut policy, doc) {
                    self.findings.push(format!(
                        "failed to parse policy install_software \"{}\": {err}",
                        policy.name
                    ));
                    continue;
                }
                if let Err(err) = self.resolve_policy_run_script(&mut policy, doc) {
                    self.findings.push(format!(
                        "failed to parse policy run_script \"{}\": {err}",
                        policy.name
                    ));
                    continue;
                }
                doc.policies.push(policy);
            }
        }
        for policy in &mut doc.policies {
            if policy.name.is_empty() {
                self.findings.push("policy name is required for each policy".to_string());
            } else {
                policy.name = normalize_name(&policy.name);
            }
            if policy.query.is_empty() {
                self.findings.push("policy query is required for each policy".to_string());
            }
        }
        if doc.is_no_team() {
            for policy in &doc.policies {
                if policy.calendar_events_enabled {
                    self.findings.push(format!(
                        "calendar events are not supported on \"No team\" policies: \"{}\"",
                        policy.name
                    ));
                }
            }
        }
        let duplicates = duplicate_names(doc.policies.iter().map(|p| p.name.as_str()));
        if !duplicates.is_empty() {
            self.findings.push(format!("duplicate policy names: {}", duplicates.join(", ")));
        }
    }

    /// Resolves a policy's software-install binding against the document's
    /// own software declarations.
    fn resolve_policy_install_software(
        &mut self,
        policy: &mut PolicySpec,
        doc: &Document,
    ) -> Result<(), String> {
        let Some(install) = policy.install_software.clone() else {
            return Ok(());
        };
        if doc.team_name.is_none()
            && (!install.package_path.is_empty() || !install.app_store_id.is_empty())
        {
            return Err("install_software can only be set on team policies".to_string());
        }
        if install.package_path.is_empty()
            && install.app_store_id.is_empty()
            && install.hash_sha256.is_empty()
        {
            return Err(
                "install_software must include either a package_path, an app_store_id or a hash_sha256"
                    .to_string(),
            );
        }
        if !install.package_path.is_empty() && !install.app_store_id.is_empty() {
            return Err(
                "install_software must have only one of package_path or app_store_id".to_string()
            );
        }
        if !install.package_path.is_empty() {
            let resolved = resolve_relative(self.base_dir, &install.package_path);
            let bytes = fs::read(&resolved).map_err(|err| {
                format!(
                    "failed to read install_software.package_path file \"{}\": {err}",
                    install.package_path
                )
            })?;
            let spec: SoftwarePackageSpec = serde_yaml::from_slice(&bytes).map_err(|err| {
                format!(
                    "failed to parse install_software.package_path file {}: {err}",
                    install.package_path
                )
            })?;
            let found = doc.software.packages.iter().any(|pkg| {
                (!pkg.url.is_empty() && pkg.url == spec.url)
                    || (!pkg.hash_sha256.is_empty() && pkg.hash_sha256 == spec.hash_sha256)
            });
            if !found {
                if !spec.url.is_empty() {
                    return Err(format!(
                        "install_software.package_path URL {} not found on team: {}",
                        spec.url, install.package_path
                    ));
                }
                return Err(format!(
                    "install_software.package_path SHA256 {} not found on team: {}",
                    spec.hash_sha256, install.package_path
                ));
            }
            policy.install_software_url = Some(spec.url);
            if let Some(binding) = &mut policy.install_software {
                binding.hash_sha256 = spec.hash_sha256;
            }
        }
        if !install.app_store_id.is_empty() {
            let found = doc
                .software
                .app_store_apps
                .iter()
                .any(|app| app.app_store_id == install.app_store_id);
            if !found {
                let team = doc.team_name.as_ref().map_or("", TeamName::as_str);
                return Err(format!(
                    "install_software.app_store_id {} not found on team {team}",
                    install.app_store_id
                ));
            }
        }
        Ok(())
    }

    /// Resolves a policy's run-script binding against the document's
    /// controls scripts.
    fn resolve_policy_run_script(
        &mut self,
        policy: &mut PolicySpec,
        doc: &Document,
    ) -> Result<(), String> {
        let Some(run_script) = policy.run_script.clone() else {
            return Ok(());
        };
        if doc.team_name.is_none() && !run_script.path.is_empty() {
            return Err("run_script can only be set on team policies".to_string());
        }
        if run_script.path.is_empty() {
            return Err("empty run_script path".to_string());
        }
        let resolved = resolve_relative(self.base_dir, &run_script.path);
        if fs::metadata(&resolved).is_err() {
            return Err(format!("script file does not exist \"{}\"", run_script.path));
        }
        let resolved_display = resolved.display().to_string();
        let on_team = doc.controls.scripts.iter().any(|script| *script == resolved_display);
        if !on_team {
            if doc.is_no_team() {
                return Err(format!(
                    "policy script {resolved_display} was not defined in controls in {NO_TEAM_FILENAME}"
                ));
            }
            let team = doc.team_name.as_ref().map_or("", TeamName::as_str);
            return Err(format!(
                "policy script {resolved_display} was not defined in controls for {team}"
            ));
        }
        policy.run_script_name = resolved
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Indirection helpers
    // ------------------------------------------------------------------

    /// Resolves an optional `{path: …}` indirection for a whole section.
    ///
    /// Returns the effective value and the directory anchoring any paths the
    /// section itself contains. `None` means findings were recorded.
    fn resolve_section(&mut self, raw: &Value, section: &str) -> Option<(Value, PathBuf)> {
        let path = raw.as_object().and_then(|m| m.get("path")).and_then(Value::as_str);
        let Some(path) = path else {
            return Some((raw.clone(), self.base_dir.to_path_buf()));
        };
        let resolved = resolve_relative(self.base_dir, path);
        let value = self.read_yaml_value(&resolved, section)?;
        if value.as_object().is_some_and(|m| m.contains_key("path")) {
            let inner = value
                .as_object()
                .and_then(|m| m.get("path"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.findings.push(format!("nested paths are not supported: {inner} in {path}"));
            return None;
        }
        let dir = parent_dir(&resolved);
        Some((value, dir))
    }

    /// Resolves one list item that may be a `{path: …}` indirection to a
    /// file holding a single item or a list of items.
    fn resolve_list_item(&mut self, item: &Value, section: &str) -> Vec<Value> {
        let path = item.as_object().and_then(|m| m.get("path")).and_then(Value::as_str);
        let Some(path) = path else {
            return vec![item.clone()];
        };
        let resolved = resolve_relative(self.base_dir, path);
        let Some(value) = self.read_yaml_value(&resolved, section) else {
            return Vec::new();
        };
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        let mut out = Vec::new();
        for entry in entries {
            if entry.as_object().is_some_and(|m| m.contains_key("path")) {
                let inner = entry
                    .as_object()
                    .and_then(|m| m.get("path"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.findings.push(format!("nested paths are not supported: {inner} in {path}"));
                continue;
            }
            out.push(entry);
        }
        out
    }

    /// Reads, env-expands, and YAML-decodes a referenced file.
    fn read_yaml_value(&mut self, path: &Path, section: &str) -> Option<Value> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.findings
                    .push(format!("failed to read {section} file {}: {err}", path.display()));
                return None;
            }
        };
        let bytes = match expand_env_bytes(&bytes) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.findings.push(format!(
                    "failed to expand environment in file {}: {err}",
                    path.display()
                ));
                return None;
            }
        };
        match serde_yaml::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                self.findings
                    .push(format!("failed to parse {section} file {}: {err}", path.display()));
                None
            }
        }
    }
}

// ============================================================================
// SECTION: Raw Section Types
// ============================================================================

/// Serde shape for the `controls` section, including indirection.
#[derive(Debug, Default, Deserialize)]
struct RawControls {
    /// Indirection target, consumed before this struct is decoded again.
    #[serde(default)]
    #[allow(dead_code, reason = "Present so a nested 'path' key decodes instead of erroring.")]
    path: Option<String>,
    /// macOS OS-update policy.
    #[serde(default)]
    macos_updates: Option<Value>,
    /// iOS OS-update policy.
    #[serde(default)]
    ios_updates: Option<Value>,
    /// iPadOS OS-update policy.
    #[serde(default)]
    ipados_updates: Option<Value>,
    /// macOS settings with custom profiles.
    #[serde(default)]
    macos_settings: Option<OsCustomSettings>,
    /// macOS setup experience settings.
    #[serde(default)]
    macos_setup: Option<Value>,
    /// macOS migration settings.
    #[serde(default)]
    macos_migration: Option<Value>,
    /// Windows OS-update policy.
    #[serde(default)]
    windows_updates: Option<Value>,
    /// Windows settings with custom profiles.
    #[serde(default)]
    windows_settings: Option<OsCustomSettings>,
    /// Windows MDM enablement toggle.
    #[serde(default)]
    windows_enabled_and_configured: Option<Value>,
    /// Windows migration toggle.
    #[serde(default)]
    windows_migration_enabled: Option<Value>,
    /// Disk-encryption enforcement toggle.
    #[serde(default)]
    enable_disk_encryption: Option<Value>,
    /// Script declarations; items must be `{path: …}` maps.
    #[serde(default)]
    scripts: Vec<Value>,
}

/// Serde shape for the `software` section.
#[derive(Debug, Default, Deserialize)]
struct RawSoftware {
    /// Package entries; items may be `{path: …}` indirection.
    #[serde(default)]
    packages: Vec<Value>,
    /// App Store app entries.
    #[serde(default)]
    app_store_apps: Vec<AppStoreAppSpec>,
    /// Maintained-app entries.
    #[serde(default)]
    maintained_apps: Vec<MaintainedAppSpec>,
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Resolves `path` relative to `base_dir`; absolute paths pass through.
fn resolve_relative(base_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if base_dir.as_os_str().is_empty() || candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// Returns the parent directory of `path`, or `.` for bare filenames.
fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Resolves relative file references inside a software-package spec.
fn resolve_package_paths(spec: &mut SoftwarePackageSpec, base_dir: &Path) {
    for file_ref in [
        &mut spec.pre_install_query,
        &mut spec.install_script,
        &mut spec.post_install_script,
        &mut spec.uninstall_script,
    ] {
        if !file_ref.path.is_empty() {
            file_ref.path = resolve_relative(base_dir, &file_ref.path).display().to_string();
        }
    }
}

/// Returns true for a lower-case hex-encoded 64-character SHA-256 value.
fn is_valid_sha256(value: &str) -> bool {
    value.len() == 64
        && value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
