//! Coverage for credential loading and permission checks.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use mcrelay::credentials::{load_credentials, Credentials};

fn write_env(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join(".env");
    fs::write(&path, contents).expect("should write env file");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .expect("should restrict permissions");
    }
    path
}

#[test]
fn loads_env_credentials() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = write_env(
        &dir,
        "MCRELAY_TEST_TOKEN=123:abc\nMCRELAY_TEST_RCON=\"p@ss word\"\n",
    );

    let credentials = load_credentials(&path).expect("credentials should load");
    assert_eq!(credentials.get("MCRELAY_TEST_TOKEN").as_deref(), Some("123:abc"));
    assert_eq!(credentials.get("MCRELAY_TEST_RCON").as_deref(), Some("p@ss word"));
}

#[cfg(unix)]
#[test]
fn rejects_world_readable_env_file() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = write_env(&dir, "MCRELAY_TEST_TOKEN=123:abc\n");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644))
        .expect("should widen permissions");

    assert!(load_credentials(&path).is_err());
}

#[test]
fn missing_file_means_environment_only() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let credentials = load_credentials(&dir.path().join(".env")).expect("missing file is fine");
    assert!(credentials.get("MCRELAY_TEST_SURELY_UNSET_VARIABLE").is_none());
}

#[test]
fn require_reports_missing_key_without_values() {
    let mut vars = BTreeMap::new();
    vars.insert("MCRELAY_TEST_BLANK".to_owned(), "   ".to_owned());
    vars.insert("MCRELAY_TEST_SECRET".to_owned(), "s3cret".to_owned());
    let credentials = Credentials::from_map(vars);

    let err = credentials
        .require("MCRELAY_TEST_BLANK")
        .expect_err("blank values count as missing");
    assert!(err.to_string().contains("MCRELAY_TEST_BLANK"));

    let debug = format!("{credentials:?}");
    assert!(debug.contains("MCRELAY_TEST_SECRET"));
    assert!(!debug.contains("s3cret"));
}
