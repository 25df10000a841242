//! Snapshot tests for command output

use std::fs;
use std::process::Command;
use tempfile::TempDir;

/// Run kubehcl against a repository file inside `home`, returning stdout
fn kubehcl_stdout(home: &TempDir, args: &[&str]) -> String {
    let output = Command::new(env!("CARGO_BIN_EXE_kubehcl"))
        .env("KUBEHCL_REPOSITORY_CONFIG", home.path().join("repositories.hcl"))
        .env("KUBEHCL_NOCOLOR", "true")
        .current_dir(home.path())
        .args(args)
        .output()
        .expect("Failed to execute kubehcl");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_license_output() {
    let home = TempDir::new().unwrap();
    insta::assert_snapshot!(kubehcl_stdout(&home, &["license"]), @r"
    This project is dual license by MPL 2.0 and Apache 2.0
    Apache 2.0: https://www.apache.org/licenses/LICENSE-2.0
    MPL 2.0: https://www.mozilla.org/en-US/MPL/2.0/
    ");
}

#[test]
fn test_repo_list_output() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join("repositories.hcl"),
        r#"repo "local" {
  Name      = "local"
  Url       = "localhost:5000/modules"
  Protocol  = "oci"
  PlainHttp = true
}

repo "stable" {
  Name     = "stable"
  Url      = "charts.example.com/kubehcl"
  Protocol = "https"
}
"#,
    )
    .unwrap();

    insta::assert_snapshot!(kubehcl_stdout(&home, &["repo", "list"]), @r"
    NAME                 PROTOCOL   URL
    local                oci        localhost:5000/modules
    stable               https      charts.example.com/kubehcl
    ");
}

#[test]
fn test_fmt_output() {
    let home = TempDir::new().unwrap();
    fs::create_dir(home.path().join("app")).unwrap();
    fs::write(
        home.path().join("app").join("variables.hcl"),
        "variable \"replicas\" {\ntype=number\ndefault = 1\n}\n",
    )
    .unwrap();

    kubehcl_stdout(&home, &["fmt", "app"]);
    let formatted = fs::read_to_string(home.path().join("app").join("variables.hcl")).unwrap();
    insta::assert_snapshot!(formatted, @r#"
    variable "replicas" {
      type    = number
      default = 1
    }
    "#);
}
