//! Integration tests for the commands that need no cluster

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run kubehcl with its repository file inside `home` and a clean environment
fn kubehcl(home: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_kubehcl"));
    for (key, _) in std::env::vars() {
        if key.starts_with("KUBEHCL_") {
            command.env_remove(key);
        }
    }
    command
        .env("KUBEHCL_REPOSITORY_CONFIG", home.join("repositories.hcl"))
        .env("KUBEHCL_REPOSITORY_CACHE", home.join("cache"))
        .env("KUBEHCL_NOCOLOR", "true")
        .current_dir(home)
        .args(args)
        .output()
        .expect("Failed to execute kubehcl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

mod info_commands {
    use super::*;

    #[test]
    fn test_version() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["version"]);
        assert!(output.status.success());
        assert_eq!(
            stdout(&output),
            format!("Kubehcl v{}\n", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_license() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["license"]);
        assert!(output.status.success());
        let out = stdout(&output);
        assert!(out.starts_with("This project is dual license by MPL 2.0 and Apache 2.0\n"));
        assert!(out.contains("Apache 2.0: https://www.apache.org/licenses/LICENSE-2.0"));
        assert!(out.contains("MPL 2.0: https://www.mozilla.org/en-US/MPL/2.0/"));
    }

    #[test]
    fn test_usage_errors() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["deploy"]);
        assert_eq!(output.status.code(), Some(64));

        let output = kubehcl(home.path(), &["install", "web"]);
        assert_eq!(output.status.code(), Some(64));

        let output = kubehcl(home.path(), &["--help"]);
        assert!(output.status.success());
        assert!(stdout(&output).contains("template"));
    }
}

mod module_commands {
    use super::*;

    fn scaffold(home: &Path) {
        let output = kubehcl(home, &["create", "web"]);
        assert!(output.status.success(), "{}", stderr(&output));
    }

    #[test]
    fn test_create_then_template_yaml() {
        let home = TempDir::new().unwrap();
        scaffold(home.path());
        for file in ["index.hclvars", "main.hcl", "variables.hcl", "kubehcl.tfvars"] {
            assert!(home.path().join("web").join(file).is_file(), "{file}");
        }

        let output = kubehcl(home.path(), &["template", "web"]);
        assert!(output.status.success(), "{}", stderr(&output));
        let out = stdout(&output);
        assert!(out.contains("# Resource: kube_resource.deployment"), "{out}");
        assert!(out.contains("# Resource: kube_resource.service"), "{out}");
        assert!(out.contains("kind: Deployment"), "{out}");
        assert!(out.contains("replicas: 2"), "{out}");
        assert!(out.contains("nginx:latest"), "{out}");
        assert!(
            out.find("kube_resource.deployment") < out.find("kube_resource.service"),
            "resources are sorted"
        );
    }

    #[test]
    fn test_template_json_with_var() {
        let home = TempDir::new().unwrap();
        scaffold(home.path());

        let output = kubehcl(
            home.path(),
            &["template", "web", "--kind", "json", "--var", "image=httpd"],
        );
        assert!(output.status.success(), "{}", stderr(&output));
        let out = stdout(&output);
        assert!(out.contains("\"kind\": \"Service\""), "{out}");
        assert!(out.contains("\"image\": \"httpd\""), "{out}");
    }

    #[test]
    fn test_template_rejects_conflicting_var() {
        let home = TempDir::new().unwrap();
        scaffold(home.path());

        let output = kubehcl(home.path(), &["template", "web", "--var", "replicas=5"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("Variable declared in vars file and commandline"));
    }

    #[test]
    fn test_template_requires_index() {
        let home = TempDir::new().unwrap();
        scaffold(home.path());
        std::fs::remove_file(home.path().join("web").join("index.hclvars")).unwrap();

        let output = kubehcl(home.path(), &["template", "web"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("File index.hclvars is missing"));
    }

    #[test]
    fn test_template_errors() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["template", "absent"]);
        assert_eq!(output.status.code(), Some(5));

        scaffold(home.path());
        let output = kubehcl(home.path(), &["template", "web", "--kind", "xml"]);
        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_create_existing_folder() {
        let home = TempDir::new().unwrap();
        scaffold(home.path());
        let output = kubehcl(home.path(), &["create", "web"]);
        assert_eq!(output.status.code(), Some(64));
        assert!(stderr(&output).contains("already exists"));
    }

    #[test]
    fn test_fmt_rewrites_files() {
        let home = TempDir::new().unwrap();
        let module = home.path().join("app");
        std::fs::create_dir_all(module.join("nested")).unwrap();
        std::fs::write(module.join("main.hcl"), "locals {\nname=\"app\"\n}\n").unwrap();
        std::fs::write(module.join("nested").join("main.hcl"), "a=1\n").unwrap();

        let output = kubehcl(home.path(), &["fmt", "app"]);
        assert!(output.status.success(), "{}", stderr(&output));
        assert!(stdout(&output).contains("main.hcl"));
        assert_eq!(
            std::fs::read_to_string(module.join("main.hcl")).unwrap(),
            "locals {\n  name = \"app\"\n}\n"
        );
        assert_eq!(
            std::fs::read_to_string(module.join("nested").join("main.hcl")).unwrap(),
            "a=1\n"
        );

        let output = kubehcl(home.path(), &["fmt", "app", "--recursive"]);
        assert!(output.status.success());
        assert_eq!(
            std::fs::read_to_string(module.join("nested").join("main.hcl")).unwrap(),
            "a = 1\n"
        );
    }
}

mod repo_commands {
    use super::*;

    #[test]
    fn test_empty_list() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["repo", "list"]);
        assert!(output.status.success());
        assert!(stdout(&output).contains("No repositories configured."));
    }

    #[test]
    fn test_add_without_protocol() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["repo", "add", "stable", "example.com/modules"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("No protocol"));
        assert!(!home.path().join("repositories.hcl").exists());
    }

    #[test]
    fn test_unknown_repository() {
        let home = TempDir::new().unwrap();
        let output = kubehcl(home.path(), &["repo", "remove", "stable"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("Repository doesn't exist"));

        let output = kubehcl(home.path(), &["pull", "stable", "web", "--version", "1.0.0"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(!home.path().join("web").exists());
    }

    #[test]
    fn test_list_registered() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("repositories.hcl"),
            "repo \"local\" {\n  Name      = \"local\"\n  Url       = \"localhost:5000/modules\"\n  Protocol  = \"oci\"\n  PlainHttp = true\n}\n",
        )
        .unwrap();
        let output = kubehcl(home.path(), &["repo", "list"]);
        assert!(output.status.success(), "{}", stderr(&output));
        let out = stdout(&output);
        assert!(out.contains("local"), "{out}");
        assert!(out.contains("oci"), "{out}");
        assert!(out.contains("localhost:5000/modules"), "{out}");

        let output = kubehcl(home.path(), &["repo", "remove", "local"]);
        assert!(output.status.success(), "{}", stderr(&output));
        let output = kubehcl(home.path(), &["repo", "list"]);
        assert!(stdout(&output).contains("No repositories configured."));
    }

    #[test]
    fn test_push_requires_index() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir(home.path().join("web")).unwrap();
        let output = kubehcl(home.path(), &["push", "web", "local", "v1"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("File index.hclvars is missing"));
    }
}
