// steward-core/tests/normalize_validation.rs
// ============================================================================
// Module: Normalizer Validation Tests
// Description: Document parsing, indirection, and validation rules.
// ============================================================================
//! ## Overview
//! Exercises classification, aggregated findings, path indirection,
//! deprecated-key migration, and per-section validation of the normalizer.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]
#![allow(clippy::panic, reason = "Assertion helpers panic to fail the owning test.")]

mod common;

use common::write_fixture;
use steward_core::MemorySink;
use steward_core::ParseError;
use steward_core::document_from_file;
use tempfile::tempdir;

fn findings(err: ParseError) -> Vec<String> {
    match err {
        ParseError::Validation {
            findings, ..
        } => findings,
        other => panic!("expected validation error, got: {other}"),
    }
}

#[test]
fn global_document_parses_with_typed_mdm_and_extra_bag() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  org_info:\n    org_name: Acme\n  mdm:\n    apple_bm_default_team: Workstations\n  secrets:\n    - secret: \"abc\"\nagent_options:\n  config: {}\ncontrols:\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();

    assert!(doc.is_global());
    let org = doc.org_settings.unwrap();
    assert_eq!(org.secrets.len(), 1);
    assert_eq!(
        org.mdm.unwrap().apple_bm_default_team.as_deref(),
        Some("Workstations")
    );
    assert!(org.extra.contains_key("org_info"));
    assert!(doc.controls.defined);
    assert!(!doc.controls.is_set());
}

#[test]
fn org_settings_and_name_cannot_mix() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "bad.yml",
        "name: Workstations\norg_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err)
        .iter()
        .any(|f| f == "'org_settings' cannot be used with 'name', 'team_settings'"));
}

#[test]
fn team_names_must_be_ascii() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: \u{7aef}\u{70b9}\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.starts_with("team name must be in ASCII:")));
}

#[test]
fn no_team_document_must_use_the_reserved_filename() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "teams.yml",
        "name: No team\ncontrols:\npolicies:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains("must be named 'no-team.yml'")));
}

#[test]
fn no_team_rejects_team_settings_and_ignores_queries() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "no-team.yml",
        "name: No team\nteam_settings:\n  secrets: []\nqueries:\n  - name: q\n    query: SELECT 1\ncontrols:\npolicies:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.starts_with("cannot set 'team_settings'")));
    assert!(sink.lines.iter().any(|line| line.contains("'queries' is not supported")));
}

#[test]
fn unknown_top_level_keys_are_findings() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  secrets: []\nagent_options:\n  config: {}\nwebhooks: {}\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f == "unknown top-level field: webhooks"));
}

#[test]
fn secrets_key_is_required_and_items_are_validated() {
    let dir = tempdir().unwrap();
    let missing = write_fixture(
        dir.path(),
        "missing.yml",
        "org_settings:\n  org_info: {}\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&missing, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f == "'org_settings.secrets' is required"));

    let bad_item = write_fixture(
        dir.path(),
        "bad-item.yml",
        "org_settings:\n  secrets:\n    - secret: \"\"\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let err = document_from_file(&bad_item, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains("'secret' key containing an ASCII string")));
}

#[test]
fn deprecated_settings_keys_migrate_with_a_warning() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  host_settings:\n    enable_host_users: true\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    let org = doc.org_settings.unwrap();
    assert!(org.extra.contains_key("features"));
    assert!(!org.extra.contains_key("host_settings"));
    assert!(sink.lines.iter().any(|line| line.contains("'org_settings.host_settings' is deprecated")));
}

#[test]
fn deprecated_key_conflicts_with_its_replacement() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  host_settings: {}\n  features: {}\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains("both keys cannot be set")));
}

#[test]
fn sections_resolve_single_level_path_indirection() {
    let dir = tempdir().unwrap();
    write_fixture(
        dir.path(),
        "lib/team-settings.yml",
        "secrets:\n  - secret: \"abc\"\n",
    );
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  path: ./lib/team-settings.yml\nagent_options:\n  config: {}\npolicies:\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    assert_eq!(doc.team_settings.unwrap().secrets[0].secret, "abc");
}

#[test]
fn nested_path_indirection_is_rejected() {
    let dir = tempdir().unwrap();
    write_fixture(dir.path(), "lib/inner.yml", "path: ./deeper.yml\n");
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  path: ./lib/inner.yml\nagent_options:\n  config: {}\npolicies:\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.starts_with("nested paths are not supported:")));
}

#[test]
fn agent_options_are_required_outside_no_team() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\npolicies:\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f == "'agent_options' is required"));
}

#[test]
fn duplicate_query_names_are_reported_once() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\n  - name: osquery_info\n    query: SELECT 1\n  - name: osquery_info\n    query: SELECT 2\n  - name: osquery_info\n    query: SELECT 3\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    let all = findings(err);
    let dup: Vec<&String> =
        all.iter().filter(|f| f.starts_with("duplicate query names:")).collect();
    assert_eq!(dup.len(), 1);
    assert_eq!(dup[0].as_str(), "duplicate query names: osquery_info");
}

#[test]
fn labels_on_team_documents_are_ignored_with_a_warning() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\nlabels:\n  - name: Laptops\n    query: SELECT 1\npolicies:\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    assert_eq!(doc.labels, None);
    assert!(sink.lines.iter().any(|line| line.contains("'labels' is only supported in global settings")));
}

#[test]
fn bare_labels_key_means_delete_all() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  secrets: []\nagent_options:\n  config: {}\nlabels:\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    assert_eq!(doc.labels, Some(Vec::new()));
}

#[test]
fn absent_labels_key_leaves_remote_labels_untouched() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    assert_eq!(doc.labels, None);
}

#[test]
fn software_is_forbidden_on_global_and_required_on_teams() {
    let dir = tempdir().unwrap();
    let on_global = write_fixture(
        dir.path(),
        "default.yml",
        "org_settings:\n  secrets: []\nagent_options:\n  config: {}\nsoftware:\n  packages: []\npolicies:\nqueries:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&on_global, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f == "'software' cannot be set on global file"));

    let missing = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\n",
    );
    let err = document_from_file(&missing, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f == "'software' is required"));
}

#[test]
fn software_package_hashes_must_be_lowercase_sha256() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\nsoftware:\n  packages:\n    - url: https://cdn.example.com/tool.pkg\n      hash_sha256: NOTAHASH\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains("must be a valid lower-case hex-encoded")));
}

#[test]
fn exe_packages_require_install_and_uninstall_scripts() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\nqueries:\nsoftware:\n  packages:\n    - url: https://cdn.example.com/tool.exe\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains(".exe package")));
}

#[test]
fn policy_run_script_must_be_declared_in_controls() {
    let dir = tempdir().unwrap();
    write_fixture(dir.path(), "scripts/cleanup.sh", "#!/bin/sh\nexit 0\n");
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\ncontrols:\n  scripts: []\npolicies:\n  - name: Cleanup ran\n    query: SELECT 1\n    run_script:\n      path: ./scripts/cleanup.sh\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains("was not defined in controls")));
}

#[test]
fn policy_run_script_resolves_when_declared() {
    let dir = tempdir().unwrap();
    write_fixture(dir.path(), "scripts/cleanup.sh", "#!/bin/sh\nexit 0\n");
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\ncontrols:\n  scripts:\n    - path: ./scripts/cleanup.sh\npolicies:\n  - name: Cleanup ran\n    query: SELECT 1\n    run_script:\n      path: ./scripts/cleanup.sh\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    assert_eq!(doc.policies[0].run_script_name.as_deref(), Some("cleanup.sh"));
}

#[test]
fn policy_install_software_must_match_a_declared_package() {
    let dir = tempdir().unwrap();
    write_fixture(
        dir.path(),
        "software/tool.yml",
        "url: https://cdn.example.com/other.pkg\n",
    );
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\n  - name: Tool installed\n    query: SELECT 1\n    install_software:\n      package_path: ./software/tool.yml\nqueries:\nsoftware:\n  packages:\n    - url: https://cdn.example.com/tool.pkg\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| f.contains("not found on team")));
}

#[test]
fn calendar_events_are_rejected_on_no_team_policies() {
    let dir = tempdir().unwrap();
    let path = write_fixture(
        dir.path(),
        "no-team.yml",
        "name: No team\ncontrols:\npolicies:\n  - name: Meeting prep\n    query: SELECT 1\n    calendar_events_enabled: true\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let err = document_from_file(&path, dir.path(), true, &mut sink).unwrap_err();
    assert!(findings(err).iter().any(|f| {
        f == "calendar events are not supported on \"No team\" policies: \"Meeting prep\""
    }));
}

#[test]
fn policy_names_are_unicode_normalized() {
    let dir = tempdir().unwrap();
    // "Pere\u{301}" (combining accent) normalizes to "Per\u{e9}".
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\npolicies:\n  - name: \"Pere\u{301}\"\n    query: SELECT 1\nqueries:\nsoftware:\n",
    );
    let mut sink = MemorySink::default();
    let doc = document_from_file(&path, dir.path(), true, &mut sink).unwrap();
    assert_eq!(doc.policies[0].name, "Per\u{e9}");
}

#[test]
fn profile_files_contribute_their_secret_references() {
    let dir = tempdir().unwrap();
    write_fixture(
        dir.path(),
        "profiles/wifi.mobileconfig",
        "<plist><string>$STEWARD_SECRET_WIFI_PASSWORD</string></plist>\n",
    );
    let path = write_fixture(
        dir.path(),
        "team.yml",
        "name: Workstations\nteam_settings:\n  secrets: []\nagent_options:\n  config: {}\ncontrols:\n  macos_settings:\n    custom_settings:\n      - path: ./profiles/wifi.mobileconfig\npolicies:\nqueries:\nsoftware:\n",
    );
    // The referenced secret must exist in the runner's environment.
    let mut sink = MemorySink::default();
    let result = document_from_file(&path, dir.path(), true, &mut sink);
    match result {
        Ok(doc) => {
            assert!(doc.env_secrets.contains_key("STEWARD_SECRET_WIFI_PASSWORD"));
        }
        Err(err) => {
            assert!(err.to_string().contains("STEWARD_SECRET_WIFI_PASSWORD"));
        }
    }
}
