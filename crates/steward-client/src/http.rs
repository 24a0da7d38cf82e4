// steward-client/src/http.rs
// ============================================================================
// Module: HTTP Management Client
// Description: REST implementation of the ManagementApi capability trait.
// Purpose: Translate document applies into bounded control-plane requests.
// Dependencies: steward-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! One [`HttpClient`] serves one control plane. Every request carries the
//! bearer token, a request timeout, and redirects disabled. The per-document
//! apply composes the narrow endpoint methods in a fixed order: settings,
//! labels, controls artifacts (scripts, profiles), software, queries, and
//! policies, recording server-assigned identifiers into the run's artifact
//! ledger.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use steward_core::ApiError;
use steward_core::AppConfig;
use steward_core::ApplyOutcome;
use steward_core::ArtifactLedger;
use steward_core::DryRunAssumptions;
use steward_core::FinalizeTask;
use steward_core::LabelInfo;
use steward_core::ManagementApi;
use steward_core::ScriptRef;
use steward_core::SoftwarePackageRef;
use steward_core::StatusSink;
use steward_core::Team;
use steward_core::VppAppRef;
use steward_core::core::document::Document;
use steward_core::core::document::EnrollSecret;
use steward_core::core::document::LabelSpec;
use steward_core::core::document::OsCustomSettings;
use steward_core::core::identifiers::TeamName;
use url::Url;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the HTTP management client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Base URL of the control plane, e.g. `https://fleet.example.com`.
    pub base_url: Url,
    /// API bearer token.
    pub token: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// User agent string for outbound requests.
    pub user_agent: String,
}

impl HttpClientConfig {
    /// Creates a configuration with default timeout and user agent.
    #[must_use]
    pub fn new(base_url: Url, token: String) -> Self {
        Self {
            base_url,
            token,
            timeout_ms: 30_000,
            user_agent: "steward/0.1".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Blocking HTTP client for the steward control plane.
pub struct HttpClient {
    /// Client configuration.
    config: HttpClientConfig,
    /// Underlying HTTP client.
    client: Client,
}

impl HttpClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: HttpClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|err| ApiError::Transport(format!("http client build failed: {err}")))?;
        Ok(Self {
            config,
            client,
        })
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    /// Joins a path onto the base URL.
    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .base_url
            .join(path)
            .map_err(|err| ApiError::Transport(format!("invalid request path {path}: {err}")))
    }

    /// Issues one request with optional JSON body and checks the status.
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.config.token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Issues one request and decodes the JSON response.
    fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let response = self.request(method, path, body)?;
        response
            .json::<T>()
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    /// Appends team and dry-run parameters to an endpoint path.
    fn scoped(path: &str, team: &str, dry_run: bool) -> String {
        let mut scoped = format!("{path}?dry_run={dry_run}");
        if !team.is_empty() {
            let encoded: String = url::form_urlencoded::byte_serialize(team.as_bytes()).collect();
            scoped.push_str("&team_name=");
            scoped.push_str(&encoded);
        }
        scoped
    }

    // ------------------------------------------------------------------
    // Endpoint methods
    // ------------------------------------------------------------------

    /// Creates a team and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when creation fails.
    pub fn new_team(&self, name: &str) -> Result<Team, ApiError> {
        let body = json!({"name": name});
        let response: TeamEnvelope =
            self.request_json(Method::POST, "api/v1/steward/teams", Some(&body))?;
        Ok(response.team)
    }

    /// Finds a remotely existing team by name.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the listing fails.
    pub fn team_by_name(&self, name: &str) -> Result<Option<Team>, ApiError> {
        Ok(self.list_teams()?.into_iter().find(|team| team.name == name))
    }

    /// Replaces the full label set.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the apply fails.
    pub fn apply_label_specs(&self, labels: &[LabelSpec], dry_run: bool) -> Result<(), ApiError> {
        let body = json!({"labels": labels});
        let path = Self::scoped("api/v1/steward/spec/labels", "", dry_run);
        self.request(Method::POST, &path, Some(&body)).map(drop)
    }

    /// Applies policy specs for one scope.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the apply fails.
    pub fn apply_policy_specs(
        &self,
        team: &str,
        policies: &Value,
        dry_run: bool,
    ) -> Result<(), ApiError> {
        let body = json!({"policies": policies});
        let path = Self::scoped("api/v1/steward/spec/policies", team, dry_run);
        self.request(Method::POST, &path, Some(&body)).map(drop)
    }

    /// Applies query specs for one scope.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the apply fails.
    pub fn apply_query_specs(
        &self,
        team: &str,
        queries: &Value,
        dry_run: bool,
    ) -> Result<(), ApiError> {
        let body = json!({"queries": queries});
        let path = Self::scoped("api/v1/steward/spec/queries", team, dry_run);
        self.request(Method::POST, &path, Some(&body)).map(drop)
    }

    /// Uploads the full script set for one scope, replacing what exists.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when a script cannot be read or the upload fails.
    pub fn batch_set_scripts(
        &self,
        team: &str,
        script_paths: &[String],
        dry_run: bool,
    ) -> Result<Vec<ScriptRef>, ApiError> {
        let mut scripts = Vec::with_capacity(script_paths.len());
        for path in script_paths {
            scripts.push(json!({
                "name": file_name(path),
                "contents": read_artifact(path)?,
            }));
        }
        let body = json!({"scripts": scripts});
        let path = Self::scoped("api/v1/steward/scripts/batch", team, dry_run);
        let response: ScriptsEnvelope = self.request_json(Method::POST, &path, Some(&body))?;
        Ok(response.scripts)
    }

    /// Uploads the full MDM profile set for one scope.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when a profile cannot be read or the upload
    /// fails.
    pub fn batch_set_profiles(
        &self,
        team: &str,
        settings: &[&OsCustomSettings],
        dry_run: bool,
    ) -> Result<(), ApiError> {
        let mut profiles = Vec::new();
        for block in settings {
            for profile in &block.custom_settings {
                profiles.push(json!({
                    "name": file_name(&profile.path),
                    "contents": read_artifact(&profile.path)?,
                    "labels_include_any": profile.labels_include_any,
                    "labels_include_all": profile.labels_include_all,
                    "labels_exclude_any": profile.labels_exclude_any,
                }));
            }
        }
        let body = json!({"profiles": profiles});
        let path = Self::scoped("api/v1/steward/mdm/profiles/batch", team, dry_run);
        self.request(Method::POST, &path, Some(&body)).map(drop)
    }

    /// Uploads the team's software declarations, replacing what exists.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the upload fails.
    pub fn batch_set_software(
        &self,
        team: &str,
        document: &Document,
        dry_run: bool,
    ) -> Result<SoftwareBatchEnvelope, ApiError> {
        let body = json!({
            "packages": document.software.packages,
            "app_store_apps": document.software.app_store_apps,
            "maintained_apps": document.software.maintained_apps,
        });
        let path = Self::scoped("api/v1/steward/software/batch", team, dry_run);
        self.request_json(Method::POST, &path, Some(&body))
    }

    /// Patches team settings and agent options for one team.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the patch fails.
    pub fn apply_team_settings(
        &self,
        team_id: u64,
        settings: &Value,
        dry_run: bool,
    ) -> Result<(), ApiError> {
        let path = Self::scoped(&format!("api/v1/steward/teams/{team_id}"), "", dry_run);
        self.request(Method::PATCH, &path, Some(settings)).map(drop)
    }

    /// Ensures the named team exists, creating it when missing.
    fn ensure_team(&self, name: &str, sink: &mut dyn StatusSink) -> Result<Team, ApiError> {
        if let Some(team) = self.team_by_name(name)? {
            return Ok(team);
        }
        let team = self.new_team(name)?;
        sink.line(&format!("[+] created team '{name}'"));
        Ok(team)
    }

    // ------------------------------------------------------------------
    // Apply composition
    // ------------------------------------------------------------------

    /// Applies the global document.
    fn apply_global(
        &self,
        document: &Document,
        dry_run: bool,
        ledger: &mut ArtifactLedger,
        sink: &mut dyn StatusSink,
    ) -> Result<ApplyOutcome, ApiError> {
        let mut outcome = ApplyOutcome::default();

        sink.line("[+] applying org settings");
        let payload = org_config_payload(document);
        let path = Self::scoped("api/v1/steward/config", "", dry_run);
        self.request(Method::PATCH, &path, Some(&payload)).map(drop)?;

        // An absent `labels` key keeps the remote set; a declared list
        // replaces it wholesale, so an empty list removes every label.
        if let Some(labels) = &document.labels {
            if !labels.is_empty() {
                sink.line(&format!("[+] applying {} labels", labels.len()));
            }
            self.apply_label_specs(labels, dry_run)?;
        }

        self.apply_controls_artifacts(document, "", dry_run, ledger, sink)?;

        if !document.queries.is_empty() {
            sink.line(&format!("[+] applying {} queries", document.queries.len()));
            self.apply_query_specs("", &json!(document.queries), dry_run)?;
        }
        if !document.policies.is_empty() {
            sink.line(&format!("[+] applying {} policies", document.policies.len()));
            self.apply_policy_specs("", &json!(document.policies), dry_run)?;
        }

        if !dry_run {
            self.apply_enroll_secrets(None, document.enroll_secrets())?;
        }

        if dry_run {
            outcome.assumptions = Some(global_assumptions(document));
        }
        outcome.finalize = global_finalize_tasks(document);
        Ok(outcome)
    }

    /// Applies a team or no-team document.
    fn apply_team(
        &self,
        document: &Document,
        dry_run: bool,
        ledger: &mut ArtifactLedger,
        sink: &mut dyn StatusSink,
    ) -> Result<ApplyOutcome, ApiError> {
        let team_name = document.team_name.as_ref().map_or("", TeamName::as_str);
        sink.line(&format!("[+] applying configuration for team '{team_name}'"));

        let mut team_id = None;
        if !document.is_no_team() && !dry_run {
            team_id = Some(self.ensure_team(team_name, sink)?.id);
        }

        if let Some(id) = team_id
            && (document.team_settings.is_some() || document.agent_options.is_some())
        {
            self.apply_team_settings(id, &team_settings_payload(document), dry_run)?;
        }

        self.apply_controls_artifacts(document, team_name, dry_run, ledger, sink)?;

        if document.software.packages.len()
            + document.software.app_store_apps.len()
            + document.software.maintained_apps.len()
            > 0
        {
            sink.line(&format!("[+] applying software for team '{team_name}'"));
            let applied = self.batch_set_software(team_name, document, dry_run)?;
            ledger.software.insert(team_name.to_string(), applied.packages);
            ledger.vpp_apps.insert(team_name.to_string(), applied.app_store_apps);
        }

        if !document.queries.is_empty() {
            sink.line(&format!(
                "[+] applying {} queries for team '{team_name}'",
                document.queries.len()
            ));
            self.apply_query_specs(team_name, &json!(document.queries), dry_run)?;
        }
        if !document.policies.is_empty() {
            sink.line(&format!(
                "[+] applying {} policies for team '{team_name}'",
                document.policies.len()
            ));
            self.apply_policy_specs(team_name, &json!(document.policies), dry_run)?;
        }

        if let Some(id) = team_id
            && document.team_settings.is_some()
        {
            self.apply_enroll_secrets(Some(id), document.enroll_secrets())?;
        }
        Ok(ApplyOutcome::default())
    }

    /// Uploads scripts and MDM profiles declared by the document's controls.
    fn apply_controls_artifacts(
        &self,
        document: &Document,
        team: &str,
        dry_run: bool,
        ledger: &mut ArtifactLedger,
        sink: &mut dyn StatusSink,
    ) -> Result<(), ApiError> {
        if !document.controls.scripts.is_empty() {
            sink.line(&format!(
                "[+] applying {} scripts",
                document.controls.scripts.len()
            ));
            let refs = self.batch_set_scripts(team, &document.controls.scripts, dry_run)?;
            ledger.scripts.insert(team.to_string(), refs);
        }
        let settings: Vec<&OsCustomSettings> = [
            document.controls.macos_settings.as_ref(),
            document.controls.windows_settings.as_ref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        let profile_count: usize =
            settings.iter().map(|block| block.custom_settings.len()).sum();
        if profile_count > 0 {
            sink.line(&format!("[+] applying {profile_count} MDM profiles"));
            self.batch_set_profiles(team, &settings, dry_run)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: ManagementApi Implementation
// ============================================================================

impl ManagementApi for HttpClient {
    fn app_config(&self) -> Result<AppConfig, ApiError> {
        self.request_json(Method::GET, "api/v1/steward/config", None)
    }

    fn list_teams(&self) -> Result<Vec<Team>, ApiError> {
        let response: TeamsEnvelope =
            self.request_json(Method::GET, "api/v1/steward/teams", None)?;
        Ok(response.teams)
    }

    fn delete_team(&self, team_id: u64) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("api/v1/steward/teams/{team_id}"), None)
            .map(drop)
    }

    fn get_labels(&self) -> Result<Vec<LabelInfo>, ApiError> {
        let response: LabelsEnvelope =
            self.request_json(Method::GET, "api/v1/steward/labels", None)?;
        Ok(response
            .labels
            .into_iter()
            .map(|label| LabelInfo {
                name: label.name,
                builtin: label.label_type == "builtin",
            })
            .collect())
    }

    fn count_abm_tokens(&self) -> Result<usize, ApiError> {
        let response: CountEnvelope =
            self.request_json(Method::GET, "api/v1/steward/abm_tokens/count", None)?;
        Ok(response.count)
    }

    fn apply_app_config(&self, patch: &Value) -> Result<(), ApiError> {
        self.request(Method::PATCH, "api/v1/steward/config?dry_run=false", Some(patch))
            .map(drop)
    }

    fn save_env_secrets(
        &self,
        saved: &mut BTreeMap<String, String>,
        incoming: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<(), ApiError> {
        let fresh: BTreeMap<&String, &String> = incoming
            .iter()
            .filter(|(name, value)| saved.get(*name) != Some(value))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        let secrets: Vec<Value> = fresh
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        let body = json!({"dry_run": dry_run, "secrets": secrets});
        self.request(Method::PUT, "api/v1/steward/spec/secret_variables", Some(&body))
            .map(drop)?;
        for (name, value) in fresh {
            saved.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn apply_document(
        &self,
        document: &Document,
        _filename: &str,
        dry_run: bool,
        _assumptions: Option<&DryRunAssumptions>,
        _app_config: &AppConfig,
        ledger: &mut ArtifactLedger,
        sink: &mut dyn StatusSink,
    ) -> Result<ApplyOutcome, ApiError> {
        if document.is_global() {
            self.apply_global(document, dry_run, ledger, sink)
        } else {
            self.apply_team(document, dry_run, ledger, sink)
        }
    }

    fn finalize(&self, task: &FinalizeTask) -> Result<(), ApiError> {
        match task {
            FinalizeTask::ApplyEula { path } => {
                let body = json!({
                    "name": file_name(path),
                    "contents": read_artifact(path)?,
                });
                self.request(Method::POST, "api/v1/steward/mdm/setup/eula", Some(&body))
                    .map(drop)
            }
            FinalizeTask::PatchAppConfig { patch } => self.apply_app_config(patch),
        }
    }

    fn apply_enroll_secrets(
        &self,
        team_id: Option<u64>,
        secrets: &[EnrollSecret],
    ) -> Result<(), ApiError> {
        let path = match team_id {
            Some(id) => format!("api/v1/steward/teams/{id}/secrets"),
            None => "api/v1/steward/spec/enroll_secret".to_string(),
        };
        let body = json!({"secrets": secrets});
        self.request(Method::PUT, &path, Some(&body)).map(drop)
    }
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Builds the app-config patch for the global document.
fn org_config_payload(document: &Document) -> Value {
    let mut payload = serde_json::Map::new();
    if let Some(org) = &document.org_settings {
        for (key, value) in &org.extra {
            payload.insert(key.clone(), value.clone());
        }
        if let Some(mdm) = &org.mdm {
            payload.insert("mdm".to_string(), json!(mdm));
        }
    }
    if let Some(agent_options) = &document.agent_options {
        payload.insert("agent_options".to_string(), agent_options.clone());
    }
    if document.controls.is_set() {
        payload.insert("controls".to_string(), json!(document.controls));
    }
    Value::Object(payload)
}

/// Builds the settings patch for one team.
fn team_settings_payload(document: &Document) -> Value {
    let mut payload = serde_json::Map::new();
    if let Some(settings) = &document.team_settings {
        for (key, value) in &settings.extra {
            payload.insert(key.clone(), value.clone());
        }
    }
    if let Some(agent_options) = &document.agent_options {
        payload.insert("agent_options".to_string(), agent_options.clone());
    }
    Value::Object(payload)
}

/// Derives dry-run assumptions from the global document.
fn global_assumptions(document: &Document) -> DryRunAssumptions {
    DryRunAssumptions {
        windows_enabled_and_configured: document
            .controls
            .windows_enabled_and_configured
            .as_ref()
            .and_then(Value::as_bool),
    }
}

/// Collects finalization tasks produced by the global document.
fn global_finalize_tasks(document: &Document) -> Vec<FinalizeTask> {
    let mut tasks = Vec::new();
    if let Some(setup) = &document.controls.macos_setup {
        if let Some(path) = setup.get("end_user_license_agreement").and_then(Value::as_str)
            && !path.is_empty()
        {
            tasks.push(FinalizeTask::ApplyEula {
                path: path.to_string(),
            });
        }
        if let Some(package) = setup.get("bootstrap_package").and_then(Value::as_str)
            && !package.is_empty()
        {
            // Bootstrap packages attach after profile and package uploads.
            tasks.push(FinalizeTask::PatchAppConfig {
                patch: json!({"mdm": {"macos_setup": {"bootstrap_package": package}}}),
            });
        }
    }
    tasks
}

// ============================================================================
// SECTION: Response Envelopes
// ============================================================================

/// Envelope for the teams listing.
#[derive(Debug, Deserialize)]
struct TeamsEnvelope {
    /// Remote teams.
    teams: Vec<Team>,
}

/// Envelope for one team.
#[derive(Debug, Deserialize)]
struct TeamEnvelope {
    /// The created or fetched team.
    team: Team,
}

/// Envelope for the labels listing.
#[derive(Debug, Deserialize)]
struct LabelsEnvelope {
    /// Remote labels.
    labels: Vec<RemoteLabel>,
}

/// One remote label record.
#[derive(Debug, Deserialize)]
struct RemoteLabel {
    /// Label name.
    name: String,
    /// Label classification; `builtin` labels are server-managed.
    #[serde(default)]
    label_type: String,
}

/// Envelope for the ABM token count.
#[derive(Debug, Deserialize)]
struct CountEnvelope {
    /// Number of tokens.
    count: usize,
}

/// Envelope for the scripts batch response.
#[derive(Debug, Deserialize)]
struct ScriptsEnvelope {
    /// Applied scripts with server-assigned identifiers.
    scripts: Vec<ScriptRef>,
}

/// Envelope for the software batch response.
#[derive(Debug, Deserialize)]
pub struct SoftwareBatchEnvelope {
    /// Applied packages with server-assigned title identifiers.
    #[serde(default)]
    pub packages: Vec<SoftwarePackageRef>,
    /// Applied App Store apps with server-assigned title identifiers.
    #[serde(default)]
    pub app_store_apps: Vec<VppAppRef>,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the final path component for upload naming.
fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Reads a local artifact referenced by a document.
fn read_artifact(path: &str) -> Result<String, ApiError> {
    fs::read_to_string(path)
        .map_err(|err| ApiError::Transport(format!("failed to read file {path}: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
