// steward-core/src/runtime/engine.rs
// ============================================================================
// Module: Reconciliation Engine
// Description: Sequential orchestrator for one reconciliation run.
// Purpose: Parse, validate, order, and apply a set of configuration documents.
// Dependencies: crate::core, crate::runtime, crate::interfaces, thiserror
// ============================================================================

//! ## Overview
//! One run takes the full set of document files, parses them all up front,
//! validates cross-document rules, and applies them strictly in order with
//! the global document first. Validation failures abort before any remote
//! mutation. Token-to-team bindings that reference teams created later in
//! the run are deferred and patched in after the team documents are applied;
//! new teams that declare App Store apps are replayed once after their VPP
//! token binding lands.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::document::Document;
use crate::core::document::MdmSettings;
use crate::core::identifiers::NO_TEAM;
use crate::core::identifiers::NO_TEAM_FILENAME;
use crate::core::identifiers::TeamName;
use crate::core::identifiers::normalize_name;
use crate::core::normalize::ParseError;
use crate::core::normalize::document_from_file;
use crate::interfaces::ApiError;
use crate::interfaces::AppConfig;
use crate::interfaces::ArtifactLedger;
use crate::interfaces::CancelToken;
use crate::interfaces::DryRunAssumptions;
use crate::interfaces::FinalizeTask;
use crate::interfaces::ManagementApi;
use crate::interfaces::StatusSink;
use crate::interfaces::Team;
use crate::runtime::labels::LabelUsageError;
use crate::runtime::labels::label_usage;
use crate::runtime::tokens::PendingBindings;
use crate::runtime::tokens::TokenError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Longest accepted file-name component.
const MAX_FILENAME_LEN: usize = 255;

// ============================================================================
// SECTION: Options and Errors
// ============================================================================

/// Options for one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Document files, in apply order (the global document is moved first).
    pub filenames: Vec<PathBuf>,
    /// Validate and simulate without mutating the server.
    pub dry_run: bool,
    /// Delete remote teams not named by any document in this run.
    pub delete_other_teams: bool,
}

/// Reconciliation-run errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The run was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,
    /// A document file name was empty.
    #[error("file name cannot be blank")]
    BlankFilename,
    /// A document file name exceeded the component limit.
    #[error("file name must be less than {MAX_FILENAME_LEN} characters: {0}")]
    FilenameTooLong(String),
    /// More than one global document was provided.
    #[error("only one global config file may be provided")]
    MultipleGlobalFiles,
    /// A team name appeared in more than one document.
    #[error("team name {0} is used in multiple config files")]
    DuplicateTeamName(String),
    /// Controls were set both globally and on the no-team document.
    #[error("'controls' cannot be set on both global config and on no-team.yml")]
    ControlsOnBoth,
    /// A team document has no controls and no document provides them.
    #[error("'controls' must be set on global config or no-team.yml")]
    ControlsMissingPremium,
    /// A team document has no controls and the global document omits them.
    #[error("'controls' must be set on global config")]
    ControlsMissing,
    /// Documents referenced labels that do not exist anywhere.
    #[error(
        "Please create the missing labels, or update your settings to not refer to these labels."
    )]
    UnknownLabels,
    /// The same enrollment secret appeared in more than one document.
    #[error("duplicate enroll secret found in {0}")]
    DuplicateEnrollSecret(String),
    /// A protected team was targeted for deletion.
    #[error("apple_bm_default_team {0} cannot be deleted")]
    AbmLegacyTeamProtected(String),
    /// A protected team was targeted for deletion.
    #[error("apple_business_manager team {0} cannot be deleted")]
    AbmTeamProtected(String),
    /// A protected team was targeted for deletion.
    #[error("volume_purchasing_program team {0} cannot be deleted")]
    VppTeamProtected(String),
    /// A document failed to parse or validate.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Label scoping on some item was contradictory.
    #[error(transparent)]
    LabelUsage(#[from] LabelUsageError),
    /// Token-binding resolution failed.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// A remote call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

// ============================================================================
// SECTION: Parsed File
// ============================================================================

/// One parsed document with its originating path.
#[derive(Debug)]
struct ParsedFile {
    /// Path as given on the command line.
    display: String,
    /// Parsed document.
    doc: Document,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Sequential reconciliation engine over a [`ManagementApi`] backend.
pub struct Engine<'a> {
    /// Remote capability surface.
    api: &'a dyn ManagementApi,
    /// Cooperative cancellation, observed at remote-call boundaries.
    cancel: CancelToken,
}

impl<'a> Engine<'a> {
    /// Creates an engine over the given backend.
    pub fn new(api: &'a dyn ManagementApi, cancel: CancelToken) -> Self {
        Self { api, cancel }
    }

    /// Executes one reconciliation run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on validation failures, remote failures, or
    /// cancellation. Validation failures abort before any remote mutation.
    pub fn run(&self, options: &RunOptions, sink: &mut dyn StatusSink) -> Result<(), EngineError> {
        validate_filenames(&options.filenames)?;
        self.check_cancelled()?;

        let app_config = self.api.app_config()?;
        let premium = app_config.license.is_premium();
        let remote_teams = self.api.list_teams()?;
        let remote_team_names: BTreeSet<String> =
            remote_teams.iter().map(|team| normalize_name(&team.name)).collect();

        let files = self.parse_all(&options.filenames, premium, sink)?;
        let no_team_present = files.iter().any(|file| file.doc.is_no_team());

        let global_count = files.iter().filter(|file| file.doc.is_global()).count();
        if global_count > 1 {
            return Err(EngineError::MultipleGlobalFiles);
        }
        check_duplicate_team_names(&files)?;
        let order = apply_order(&files);
        let global = files.iter().find(|file| file.doc.is_global());

        check_controls_placement(&files, premium)?;

        // A global document that reaches for teams defined later in the run
        // defers its token bindings.
        let resolve_tokens = premium
            && global.is_some()
            && files.len() > 1
            && !(files.len() == 2 && no_team_present);
        let pending = match (resolve_tokens, global) {
            (true, Some(global_file)) => {
                self.check_cancelled()?;
                PendingBindings::from_global(&global_file.doc, self.api, &remote_team_names)?
            }
            _ => PendingBindings::default(),
        };

        let known_labels = self.known_labels(global.map(|file| &file.doc))?;
        for file in &files {
            self.check_label_usage(file, &known_labels, sink)?;
        }

        if options.dry_run {
            check_duplicate_enroll_secrets(&files, &order)?;
        }

        let mut saved_secrets: BTreeMap<String, String> = BTreeMap::new();
        let mut ledger = ArtifactLedger::default();
        let mut assumptions: Option<DryRunAssumptions> = None;
        let mut finalize: Vec<FinalizeTask> = Vec::new();
        let mut replay_queue: Vec<usize> = Vec::new();

        for &index in &order {
            let file = &files[index];
            self.check_cancelled()?;

            if !premium && !file.doc.is_global() {
                sink.line(&format!(
                    "[!] skipping team config {} since teams are only supported for premium licenses",
                    file.display
                ));
                continue;
            }

            let mut working = file.doc.clone();
            if file.doc.is_global() {
                if pending.has_deferred() {
                    working = pending.stripped_global(&file.doc);
                }
                inherit_no_team_controls(&mut working, &files);
            } else if needs_vpp_replay(&file.doc, &pending) {
                // The first pass creates the team without its App Store apps;
                // those need the VPP token binding that lands afterwards.
                working.software.app_store_apps.clear();
                replay_queue.push(index);
            }

            self.api.save_env_secrets(
                &mut saved_secrets,
                &file.doc.env_secrets,
                options.dry_run,
            )?;
            let outcome = self.api.apply_document(
                &working,
                &file.display,
                options.dry_run,
                assumptions.as_ref(),
                &app_config,
                &mut ledger,
                sink,
            )?;
            if file.doc.is_global() {
                assumptions = outcome.assumptions;
            }
            finalize.extend(outcome.finalize);
        }

        if pending.has_deferred()
            && let Some(global_file) = global
        {
            self.resolve_pending(
                &global_file.doc,
                &files,
                &pending,
                options.dry_run,
                sink,
            )?;
        }

        for &index in &replay_queue {
            let file = &files[index];
            self.check_cancelled()?;
            if let Some(team) = &file.doc.team_name {
                sink.line(&format!(
                    "[!] re-applying configs for team {team} -- this only happens once for new teams that have App Store apps"
                ));
            }
            self.api.apply_document(
                &file.doc,
                &file.display,
                options.dry_run,
                assumptions.as_ref(),
                &app_config,
                &mut ledger,
                sink,
            )?;
        }

        if options.delete_other_teams && premium {
            self.delete_other_teams(
                &files,
                &remote_teams,
                global.map(|file| &file.doc),
                &app_config,
                &pending,
                options.dry_run,
                sink,
            )?;
        }

        if premium && global.is_some() && !no_team_present {
            // A run that names the global document but not no-team.yml still
            // resets the no-team grouping to its defaults.
            self.check_cancelled()?;
            let defaults = Document::empty(Some(TeamName::new(NO_TEAM)));
            self.api.apply_document(
                &defaults,
                NO_TEAM_FILENAME,
                options.dry_run,
                assumptions.as_ref(),
                &app_config,
                &mut ledger,
                sink,
            )?;
        }

        if !options.dry_run {
            for task in &finalize {
                self.check_cancelled()?;
                self.api.finalize(task)?;
            }
        }

        if options.dry_run {
            sink.line("[!] gitops dry run succeeded");
        } else {
            sink.line("[!] gitops succeeded");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Run phases
    // ------------------------------------------------------------------

    /// Parses every document file.
    fn parse_all(
        &self,
        filenames: &[PathBuf],
        premium: bool,
        sink: &mut dyn StatusSink,
    ) -> Result<Vec<ParsedFile>, EngineError> {
        let mut files = Vec::with_capacity(filenames.len());
        for path in filenames {
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            let doc = document_from_file(path, base_dir, premium, sink)?;
            files.push(ParsedFile {
                display: path.display().to_string(),
                doc,
            });
        }
        Ok(files)
    }

    /// Resolves the set of label names documents may reference: the proposed
    /// post-run label set.
    ///
    /// A declared `labels:` list replaces the label set wholesale, so only
    /// its names are referenceable (an empty list removes every label). When
    /// the key is absent, the remotely persisted regular labels stay. Builtin
    /// labels are server-managed and never referenceable.
    fn known_labels(&self, global: Option<&Document>) -> Result<BTreeSet<String>, EngineError> {
        self.check_cancelled()?;
        let mut known: BTreeSet<String> = BTreeSet::new();
        match global.and_then(|doc| doc.labels.as_ref()) {
            Some(declared) => {
                known.extend(declared.iter().map(|label| label.name.clone()));
            }
            None => {
                let remote = self.api.get_labels()?;
                known.extend(
                    remote.iter().filter(|label| !label.builtin).map(|l| l.name.clone()),
                );
            }
        }
        Ok(known)
    }

    /// Validates one document's label references against the known set.
    fn check_label_usage(
        &self,
        file: &ParsedFile,
        known: &BTreeSet<String>,
        sink: &mut dyn StatusSink,
    ) -> Result<(), EngineError> {
        let usage = label_usage(&file.doc)?;
        let mut missing = false;
        for (label, uses) in &usage {
            if known.contains(label) {
                continue;
            }
            missing = true;
            for item in uses {
                sink.line(&format!(
                    "[!] Unknown label '{label}' is referenced by {} '{}'",
                    item.kind, item.name
                ));
            }
        }
        if missing {
            return Err(EngineError::UnknownLabels);
        }
        Ok(())
    }

    /// Applies the deferred ABM/VPP token-binding patches.
    fn resolve_pending(
        &self,
        global: &Document,
        files: &[ParsedFile],
        pending: &PendingBindings,
        dry_run: bool,
        sink: &mut dyn StatusSink,
    ) -> Result<(), EngineError> {
        let known_teams: BTreeSet<String> = files
            .iter()
            .filter_map(|file| file.doc.team_name.as_ref())
            .map(|team| normalize_name(team.as_str()))
            .collect();
        if let Some(patch) = pending.abm_patch(global, &known_teams)? {
            self.check_cancelled()?;
            if dry_run {
                sink.line("[!] would apply ABM teams");
            } else {
                sink.line("[+] applying ABM teams");
                self.api.apply_app_config(&patch)?;
            }
        }
        if let Some(patch) = pending.vpp_patch(global, &known_teams)? {
            self.check_cancelled()?;
            if dry_run {
                sink.line("[!] would apply VPP teams");
            } else {
                sink.line("[+] applying VPP teams");
                self.api.apply_app_config(&patch)?;
            }
        }
        Ok(())
    }

    /// Deletes remote teams no document names, honoring token protections.
    #[allow(clippy::too_many_arguments, reason = "Carries the full run state for the final phase.")]
    fn delete_other_teams(
        &self,
        files: &[ParsedFile],
        remote_teams: &[Team],
        global: Option<&Document>,
        app_config: &AppConfig,
        pending: &PendingBindings,
        dry_run: bool,
        sink: &mut dyn StatusSink,
    ) -> Result<(), EngineError> {
        let run_teams: BTreeSet<String> = files
            .iter()
            .filter_map(|file| file.doc.team_name.as_ref())
            .map(|team| normalize_name(team.as_str()))
            .collect();
        let protections = team_protections(global, app_config, pending);

        for team in remote_teams {
            let name = normalize_name(&team.name);
            if run_teams.contains(&name) {
                continue;
            }
            if let Some(protection) = protections.get(&name) {
                return Err(match protection {
                    TeamProtection::AbmLegacy => {
                        EngineError::AbmLegacyTeamProtected(team.name.clone())
                    }
                    TeamProtection::Abm => EngineError::AbmTeamProtected(team.name.clone()),
                    TeamProtection::Vpp => EngineError::VppTeamProtected(team.name.clone()),
                });
            }
            self.check_cancelled()?;
            if dry_run {
                sink.line(&format!("[!] team '{}' would be deleted", team.name));
            } else {
                self.api.delete_team(team.id)?;
                sink.line(&format!("[!] deleted team '{}'", team.name));
            }
        }
        Ok(())
    }

    /// Returns an error once cancellation was requested.
    fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Run Validation
// ============================================================================

/// Validates file-name components before anything is read.
fn validate_filenames(filenames: &[PathBuf]) -> Result<(), EngineError> {
    for path in filenames {
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        if name.is_empty() {
            return Err(EngineError::BlankFilename);
        }
        if name.len() > MAX_FILENAME_LEN {
            return Err(EngineError::FilenameTooLong(name.to_string()));
        }
    }
    Ok(())
}

/// Rejects a team name defined by more than one document.
fn check_duplicate_team_names(files: &[ParsedFile]) -> Result<(), EngineError> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for file in files {
        let Some(team) = &file.doc.team_name else {
            continue;
        };
        if !seen.insert(normalize_name(team.as_str())) {
            return Err(EngineError::DuplicateTeamName(team.as_str().to_string()));
        }
    }
    Ok(())
}

/// Returns apply order: the global document first, the rest as given.
fn apply_order(files: &[ParsedFile]) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(files.len());
    order.extend(files.iter().enumerate().filter(|(_, f)| f.doc.is_global()).map(|(i, _)| i));
    order.extend(files.iter().enumerate().filter(|(_, f)| !f.doc.is_global()).map(|(i, _)| i));
    order
}

/// Enforces where controls may be defined across the run.
///
/// Whenever a global document is part of the run, either it or no-team.yml
/// must define controls, and they may not both set them.
fn check_controls_placement(files: &[ParsedFile], premium: bool) -> Result<(), EngineError> {
    let global = files.iter().find(|file| file.doc.is_global());
    let no_team = files.iter().find(|file| file.doc.is_no_team());

    let global_set = global.is_some_and(|file| file.doc.controls.is_set());
    let no_team_set = no_team.is_some_and(|file| file.doc.controls.is_set());
    if global_set && no_team_set {
        return Err(EngineError::ControlsOnBoth);
    }

    let no_team_defined = no_team.is_some_and(|file| file.doc.controls.defined);
    if let Some(global_file) = global
        && !global_file.doc.controls.defined
        && !no_team_defined
    {
        return Err(if premium {
            EngineError::ControlsMissingPremium
        } else {
            EngineError::ControlsMissing
        });
    }
    Ok(())
}

/// In dry runs, the same enrollment secret may not appear in two documents.
fn check_duplicate_enroll_secrets(
    files: &[ParsedFile],
    order: &[usize],
) -> Result<(), EngineError> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for &index in order {
        let file = &files[index];
        for secret in file.doc.enroll_secrets() {
            if !seen.insert(secret.secret.clone()) {
                return Err(EngineError::DuplicateEnrollSecret(file.display.clone()));
            }
        }
    }
    Ok(())
}

/// The global document inherits no-team controls when it defines none.
fn inherit_no_team_controls(working: &mut Document, files: &[ParsedFile]) {
    if working.controls.defined {
        return;
    }
    if let Some(no_team) = files.iter().find(|file| file.doc.is_no_team())
        && no_team.doc.controls.defined
    {
        working.controls = no_team.doc.controls.clone();
    }
}

/// Returns true when a team's App Store apps must wait for its VPP binding.
fn needs_vpp_replay(doc: &Document, pending: &PendingBindings) -> bool {
    let Some(team) = &doc.team_name else {
        return false;
    };
    if doc.software.app_store_apps.is_empty() {
        return false;
    }
    pending.vpp_missing.contains(&normalize_name(team.as_str()))
}

// ============================================================================
// SECTION: Deletion Protection
// ============================================================================

/// Why a remote team may not be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeamProtection {
    /// Bound through the legacy ABM default-team key.
    AbmLegacy,
    /// Bound through an ABM assignment.
    Abm,
    /// Bound through a VPP assignment.
    Vpp,
}

/// Collects token-bound team names from this run and from the server's
/// current app configuration.
fn team_protections(
    global: Option<&Document>,
    app_config: &AppConfig,
    pending: &PendingBindings,
) -> BTreeMap<String, TeamProtection> {
    let mut protections: BTreeMap<String, TeamProtection> = BTreeMap::new();
    let mut record = |name: &str, protection: TeamProtection| {
        if !name.is_empty() {
            protections.entry(normalize_name(name)).or_insert(protection);
        }
    };

    for team in &pending.vpp_teams {
        record(team, TeamProtection::Vpp);
    }
    let legacy = global
        .and_then(|doc| doc.org_settings.as_ref())
        .and_then(|org| org.mdm.as_ref())
        .is_some_and(|mdm| mdm.apple_bm_default_team.is_some());
    for team in &pending.abm_teams {
        record(team, if legacy { TeamProtection::AbmLegacy } else { TeamProtection::Abm });
    }

    // The server's own bindings protect teams even when this run does not
    // mention them.
    if let Some(mdm_value) = app_config.extra.get("mdm")
        && let Ok(mdm) = serde_json::from_value::<MdmSettings>(mdm_value.clone())
    {
        if let Some(team) = &mdm.apple_bm_default_team {
            record(team, TeamProtection::AbmLegacy);
        }
        for assignment in mdm.apple_business_manager.unwrap_or_default() {
            for team in assignment.referenced_teams() {
                record(team, TeamProtection::Abm);
            }
        }
        for assignment in mdm.volume_purchasing_program.unwrap_or_default() {
            for team in &assignment.teams {
                record(team, TeamProtection::Vpp);
            }
        }
    }
    protections
}

// ============================================================================
// SECTION: Tests
// ============================================================================
