//! Environment overrides. Kept in their own test binary: the variables are
//! process-wide and would leak into the file-loading tests.

use std::env;

use assert_fs::prelude::*;
use reposync_core::load_at;

const YAML: &str = "project: waf\nrepository_url: git@github.com:acme/waf-config.git\ninstall_directory: /opt/waf\npreset: waf\n";

#[test]
fn branch_from_environment_is_taken_verbatim() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("config.yaml");
    file.write_str(YAML).expect("write");

    for branch in ["2024", "1.10", "true", "release/2024.1"] {
        env::set_var("REPOSYNC_TARGET_BRANCH", branch);
        let cfg = load_at(file.path()).expect("load");
        assert_eq!(cfg.target_branch.as_str(), branch);
        assert_eq!(cfg.target_branch.remote_ref(), format!("origin/{branch}"));
    }

    env::set_var("REPOSYNC_TARGET_BRANCH", "bad branch");
    let err = load_at(file.path()).unwrap_err();
    assert!(err.to_string().contains("whitespace"), "got: {err}");

    env::remove_var("REPOSYNC_TARGET_BRANCH");
    env::set_var("REPOSYNC_GIT_TIMEOUT_SECS", "45");
    let cfg = load_at(file.path()).expect("load");
    assert_eq!(cfg.target_branch.as_str(), "main");
    assert_eq!(cfg.git_timeout_secs, 45);
    env::remove_var("REPOSYNC_GIT_TIMEOUT_SECS");
}
