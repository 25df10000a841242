//! Create command - scaffold a module folder

use console::style;
use kubehcl_engine::{INDEX_FILE, VARS_FILE};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{CliError, Result};

const MAIN_HCL: &str = r#"locals {
  app = "{name}"
}

kube_resource "deployment" {
  apiVersion = "apps/v1"
  kind       = "Deployment"
  metadata {
    name = local.app
    labels = {
      app = local.app
    }
  }
  spec {
    replicas = var.replicas
    selector {
      matchLabels = {
        app = local.app
      }
    }
    template {
      metadata {
        labels = {
          app = local.app
        }
      }
      spec {
        containers = [
          {
            name  = local.app
            image = var.image
            ports = [{ containerPort = 80 }]
          },
        ]
      }
    }
  }
}

kube_resource "service" {
  apiVersion = "v1"
  kind       = "Service"
  metadata {
    name = local.app
  }
  spec {
    selector = {
      app = local.app
    }
    ports = [{ port = 80, targetPort = 80 }]
  }
  depends_on = [kube_resource.deployment]
}
"#;

const VARIABLES_HCL: &str = r#"variable "replicas" {
  type    = number
  default = 1
}

variable "image" {
  type    = string
  default = "nginx:latest"
}
"#;

const VARS: &str = "replicas = 2\n";

pub fn run(folder: &Path) -> Result<()> {
    scaffold(folder)?;
    println!(
        "{} Created module {}",
        style("✓").green().bold(),
        style(folder.display()).cyan()
    );
    println!();
    println!("Render it with: kubehcl template {}", folder.display());
    Ok(())
}

fn scaffold(folder: &Path) -> Result<()> {
    if folder.exists() {
        return Err(CliError::usage(format!(
            "Directory {} already exists",
            folder.display()
        )));
    }
    let name = folder
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CliError::usage(format!("{} is not a folder name", folder.display())))?;

    fs::create_dir_all(folder)?;
    let files = [
        (
            INDEX_FILE,
            format!("name    = \"{}\"\nversion = \"0.1.0\"\n", name),
        ),
        ("main.hcl", MAIN_HCL.replace("{name}", name)),
        ("variables.hcl", VARIABLES_HCL.to_string()),
        (VARS_FILE, VARS.to_string()),
    ];
    for (file, content) in files {
        fs::write(folder.join(file), content).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to write {}: {}", file, e))
        })?;
    }
    Ok(())
}
