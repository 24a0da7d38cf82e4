// steward-core/tests/engine_runs.rs
// ============================================================================
// Module: Engine Run Tests
// Description: End-to-end reconciliation runs against the in-memory mock.
// ============================================================================
//! ## Overview
//! Exercises ordering, dry-run behavior, token-binding deferral, deletion
//! protection, and license gating across whole runs.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

mod common;

use common::MockApi;
use common::global_yaml;
use common::team_yaml;
use common::write_fixture;
use serde_json::json;
use steward_core::CancelToken;
use steward_core::Engine;
use steward_core::EngineError;
use steward_core::LabelInfo;
use steward_core::MemorySink;
use steward_core::RunOptions;
use steward_core::Team;
use tempfile::tempdir;

fn run(api: &MockApi, options: &RunOptions) -> (Result<(), EngineError>, MemorySink) {
    let mut sink = MemorySink::default();
    let engine = Engine::new(api, CancelToken::new());
    let result = engine.run(options, &mut sink);
    (result, sink)
}

#[test]
fn global_document_applies_first_and_run_succeeds() {
    let dir = tempdir().unwrap();
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());

    let api = MockApi::premium();
    let (result, sink) = run(
        &api,
        &RunOptions {
            // The team file comes first on purpose; the engine reorders.
            filenames: vec![team, global],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();

    let applies = api.calls_with_prefix("apply_document");
    assert_eq!(applies.len(), 3);
    assert!(applies[0].contains("global"));
    assert!(applies[1].contains("team:Workstations"));
    // No no-team.yml in the run, so no-team goes back to defaults last.
    assert!(applies[2].contains("file=no-team.yml"));
    assert_eq!(sink.lines.last().unwrap(), "[!] gitops succeeded");
}

#[test]
fn dry_run_reports_its_own_success_line() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());

    let api = MockApi::premium();
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global],
            dry_run: true,
            delete_other_teams: false,
        },
    );
    result.unwrap();
    assert_eq!(sink.lines.last().unwrap(), "[!] gitops dry run succeeded");
    assert!(api.calls_with_prefix("apply_document")[0].contains("dry_run=true"));
}

#[test]
fn only_one_global_file_is_accepted() {
    let dir = tempdir().unwrap();
    let first = write_fixture(dir.path(), "default.yml", &global_yaml());
    let second = write_fixture(dir.path(), "second.yml", &global_yaml());

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![first, second],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "only one global config file may be provided");
    assert!(api.calls_with_prefix("apply_document").is_empty());
}

#[test]
fn dry_run_rejects_duplicate_secrets_before_any_apply() {
    let dir = tempdir().unwrap();
    let global_doc =
        "org_settings:\n  secrets:\n    - secret: \"shared\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team = write_fixture(dir.path(), "team.yml", &team_yaml("Workstations", "shared"));

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: true,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert!(err.to_string().starts_with("duplicate enroll secret found in "));
    assert!(err.to_string().ends_with("team.yml"));
    assert!(api.calls_with_prefix("apply_document").is_empty());
    assert!(api.calls_with_prefix("save_env_secrets").is_empty());
}

#[test]
fn unknown_label_references_fail_with_itemized_warnings() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let team_doc = "name: Workstations\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\n  - name: Firewall enabled\n    query: SELECT 1\n    labels_include_any:\n      - Nonexistent\nqueries:\nsoftware:\n";
    let team = write_fixture(dir.path(), "workstations.yml", team_doc);

    let api = MockApi::premium();
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("create the missing labels"));
    assert!(sink.lines.iter().any(|line| {
        line == "[!] Unknown label 'Nonexistent' is referenced by Policy 'Firewall enabled'"
    }));
    assert!(api.calls_with_prefix("apply_document").is_empty());
}

#[test]
fn labels_declared_by_the_global_document_satisfy_references() {
    let dir = tempdir().unwrap();
    let global_doc = "org_settings:\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\nlabels:\n  - name: Laptops\n    query: SELECT 1 FROM system_info\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team_doc = "name: Workstations\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\n  - name: Firewall enabled\n    query: SELECT 1\n    labels_include_any:\n      - Laptops\nqueries:\nsoftware:\n";
    let team = write_fixture(dir.path(), "workstations.yml", team_doc);

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();
}

#[test]
fn free_tier_skips_team_documents() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let team_doc = "name: Workstations\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\nqueries:\n";
    let team = write_fixture(dir.path(), "workstations.yml", team_doc);

    let api = MockApi::free();
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();
    let applies = api.calls_with_prefix("apply_document");
    assert_eq!(applies.len(), 1);
    assert!(applies[0].contains("global"));
    assert!(sink.lines.iter().any(|line| line.starts_with("[!] skipping team config")));
}

#[test]
fn abm_assignment_defers_until_team_documents_apply() {
    let dir = tempdir().unwrap();
    let global_doc = "org_settings:\n  mdm:\n    apple_business_manager:\n      - organization_name: Acme Inc\n        macos_team: Workstations\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));

    let api = MockApi::premium();
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();

    // The first global apply goes out without the assignment keys; the patch
    // lands after the team document.
    let applies = api.calls_with_prefix("apply_document");
    assert!(applies[0].contains("abm=false"));
    assert!(sink.lines.contains(&"[+] applying ABM teams".to_string()));
    let patches = api.calls_with_prefix("apply_app_config");
    assert_eq!(patches.len(), 1);
    assert!(patches[0].contains("apple_business_manager"));
    let calls = api.calls();
    let team_apply = calls.iter().position(|c| c.contains("team:Workstations")).unwrap();
    let patch = calls.iter().position(|c| c.starts_with("apply_app_config")).unwrap();
    assert!(patch > team_apply);
}

#[test]
fn abm_assignment_to_undefined_team_fails() {
    let dir = tempdir().unwrap();
    let global_doc = "org_settings:\n  mdm:\n    apple_business_manager:\n      - organization_name: Acme Inc\n        macos_team: Phantom\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert_eq!(
        err.to_string(),
        "apple_business_manager team Phantom not found in team configs"
    );
}

#[test]
fn new_team_with_app_store_apps_replays_once() {
    let dir = tempdir().unwrap();
    let global_doc = "org_settings:\n  mdm:\n    volume_purchasing_program:\n      - location: HQ\n        teams:\n          - Mobile\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team_doc = "name: Mobile\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\nqueries:\nsoftware:\n  app_store_apps:\n    - app_store_id: \"1091189122\"\n";
    let team = write_fixture(dir.path(), "mobile.yml", team_doc);

    let api = MockApi::premium();
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();

    let team_applies = api.calls_with_prefix("apply_document team:Mobile");
    assert_eq!(team_applies.len(), 2);
    // First pass holds back the App Store apps, the replay carries them.
    assert!(team_applies[0].contains("app_store_apps=0"));
    assert!(team_applies[1].contains("app_store_apps=1"));
    assert!(sink.lines.contains(&"[+] applying VPP teams".to_string()));
    assert!(sink.lines.iter().any(|line| {
        line == "[!] re-applying configs for team Mobile -- this only happens once for new teams that have App Store apps"
    }));
}

#[test]
fn delete_other_teams_removes_unlisted_teams_and_resets_no_team() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));

    let mut api = MockApi::premium();
    api.teams = vec![
        Team {
            id: 7,
            name: "Legacy".to_string(),
        },
        Team {
            id: 9,
            name: "Workstations".to_string(),
        },
    ];
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: true,
        },
    );
    result.unwrap();
    assert_eq!(api.calls_with_prefix("delete_team"), vec!["delete_team 7".to_string()]);
    assert!(sink.lines.contains(&"[!] deleted team 'Legacy'".to_string()));
    // No no-team.yml in the run, so no-team goes back to defaults.
    assert!(api.calls().iter().any(|c| c.contains("file=no-team.yml")));
}

#[test]
fn token_bound_teams_cannot_be_deleted() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));

    let mut api = MockApi::premium();
    api.teams = vec![Team {
        id: 7,
        name: "Legacy".to_string(),
    }];
    api.extra_config = [(
        "mdm".to_string(),
        json!({"volume_purchasing_program": [{"location": "HQ", "teams": ["Legacy"]}]}),
    )]
    .into_iter()
    .collect();

    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: true,
        },
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "volume_purchasing_program team Legacy cannot be deleted");
    assert!(api.calls_with_prefix("delete_team").is_empty());
}

#[test]
fn controls_on_both_global_and_no_team_is_rejected() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let no_team_doc = "name: No team\ncontrols:\n  windows_updates:\n    deadline_days: 7\npolicies:\nsoftware:\n";
    let no_team = write_fixture(dir.path(), "no-team.yml", no_team_doc);

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, no_team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert_eq!(
        err.to_string(),
        "'controls' cannot be set on both global config and on no-team.yml"
    );
}

#[test]
fn remote_labels_satisfy_references_when_run_declares_none() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let team_doc = "name: Workstations\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\n  - name: Firewall enabled\n    query: SELECT 1\n    labels_include_any:\n      - Laptops\nqueries:\nsoftware:\n";
    let team = write_fixture(dir.path(), "workstations.yml", team_doc);

    let mut api = MockApi::premium();
    api.labels = vec![LabelInfo {
        name: "Laptops".to_string(),
        builtin: false,
    }];
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();
}

#[test]
fn env_secrets_flow_through_before_each_apply() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();
    let calls = api.calls();
    let save = calls.iter().position(|c| c.starts_with("save_env_secrets")).unwrap();
    let apply = calls.iter().position(|c| c.starts_with("apply_document")).unwrap();
    assert!(save < apply);
}

#[test]
fn abm_binding_to_existing_remote_team_applies_inline() {
    let dir = tempdir().unwrap();
    let global_doc = "org_settings:\n  mdm:\n    apple_business_manager:\n      - organization_name: Acme Inc\n        macos_team: Existing\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));

    let mut api = MockApi::premium();
    api.teams = vec![Team {
        id: 4,
        name: "Existing".to_string(),
    }];
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();

    // The bound team already exists remotely, so the assignment goes out with
    // the first global apply and nothing is patched afterwards.
    let applies = api.calls_with_prefix("apply_document");
    assert!(applies[0].contains("abm=true"));
    assert!(api.calls_with_prefix("apply_app_config").is_empty());
}

#[test]
fn no_team_reset_runs_without_the_delete_flag() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    result.unwrap();

    let calls = api.calls();
    let global_apply = calls.iter().position(|c| c.starts_with("apply_document global")).unwrap();
    let reset = calls.iter().position(|c| c.contains("file=no-team.yml")).unwrap();
    assert!(reset > global_apply);
}

#[test]
fn no_team_reset_needs_a_global_document() {
    let dir = tempdir().unwrap();
    let team = write_fixture(dir.path(), "workstations.yml", &team_yaml("Workstations", "b"));

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![team],
            dry_run: false,
            delete_other_teams: true,
        },
    );
    result.unwrap();
    assert!(!api.calls().iter().any(|c| c.contains("file=no-team.yml")));
}

#[test]
fn global_only_run_without_controls_is_rejected() {
    let dir = tempdir().unwrap();
    let global_doc =
        "org_settings:\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);

    let api = MockApi::premium();
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "'controls' must be set on global config or no-team.yml");
    assert!(api.calls_with_prefix("apply_document").is_empty());
}

#[test]
fn builtin_labels_do_not_satisfy_references() {
    let dir = tempdir().unwrap();
    let global = write_fixture(dir.path(), "default.yml", &global_yaml());
    let team_doc = "name: Workstations\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\n  - name: Firewall enabled\n    query: SELECT 1\n    labels_include_any:\n      - All Hosts\nqueries:\nsoftware:\n";
    let team = write_fixture(dir.path(), "workstations.yml", team_doc);

    let mut api = MockApi::premium();
    api.labels = vec![LabelInfo {
        name: "All Hosts".to_string(),
        builtin: true,
    }];
    let (result, sink) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("create the missing labels"));
    assert!(sink.lines.iter().any(|line| {
        line == "[!] Unknown label 'All Hosts' is referenced by Policy 'Firewall enabled'"
    }));
}

#[test]
fn declared_labels_replace_remote_knowledge() {
    let dir = tempdir().unwrap();
    let global_doc = "org_settings:\n  secrets:\n    - secret: \"a\"\nagent_options:\n  config: {}\ncontrols:\n  macos_updates:\n    minimum_version: \"14.0\"\nlabels:\n  - name: Desktops\n    query: SELECT 1 FROM system_info\npolicies:\nqueries:\n";
    let global = write_fixture(dir.path(), "default.yml", global_doc);
    let team_doc = "name: Workstations\nteam_settings:\n  secrets:\n    - secret: \"b\"\nagent_options:\n  config: {}\npolicies:\n  - name: Firewall enabled\n    query: SELECT 1\n    labels_include_any:\n      - Laptops\nqueries:\nsoftware:\n";
    let team = write_fixture(dir.path(), "workstations.yml", team_doc);

    let mut api = MockApi::premium();
    api.labels = vec![LabelInfo {
        name: "Laptops".to_string(),
        builtin: false,
    }];
    let (result, _) = run(
        &api,
        &RunOptions {
            filenames: vec![global, team],
            dry_run: false,
            delete_other_teams: false,
        },
    );
    // The declared list replaces the label set wholesale, so the remote
    // 'Laptops' label is no longer referenceable.
    let err = result.unwrap_err();
    assert!(err.to_string().contains("create the missing labels"));
}
