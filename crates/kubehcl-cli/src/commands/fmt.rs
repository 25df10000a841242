//! Fmt command - rewrite configuration files in canonical layout

use kubehcl_syntax::format_source;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;

const FORMATTED_EXTENSIONS: &[&str] = &["hcl", "hclvars", "tfvars"];

pub fn run(folder: &Path, recursive: bool) -> Result<()> {
    for path in format_folder(folder, recursive)? {
        println!("{}", path.display());
    }
    Ok(())
}

/// Format every configuration file under `folder`, returning those rewritten
fn format_folder(folder: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{}: no such directory", folder.display()),
        )
        .into());
    }

    let walker = WalkDir::new(folder)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();
    let mut changed = Vec::new();
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || !is_config_file(entry.path()) {
            continue;
        }
        let src = fs::read_to_string(entry.path())?;
        let formatted = format_source(&src);
        if formatted != src {
            fs::write(entry.path(), formatted)?;
            tracing::debug!(file = %entry.path().display(), "formatted");
            changed.push(entry.into_path());
        }
    }
    Ok(changed)
}

fn is_config_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FORMATTED_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MESSY: &str = "kube_resource \"cm\" {\napiVersion=\"v1\"\n    kind = \"ConfigMap\"\n}\n";

    #[test]
    fn test_formats_top_level_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.hcl"), MESSY).unwrap();
        fs::write(dir.path().join("notes.txt"), MESSY).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("main.hcl"), MESSY).unwrap();

        let changed = format_folder(dir.path(), false).unwrap();
        assert_eq!(changed, vec![dir.path().join("main.hcl")]);
        let formatted = fs::read_to_string(dir.path().join("main.hcl")).unwrap();
        assert_eq!(formatted, format_source(MESSY));
        assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), MESSY);
        assert_eq!(
            fs::read_to_string(dir.path().join("nested").join("main.hcl")).unwrap(),
            MESSY
        );
    }

    #[test]
    fn test_recursive_and_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("main.hcl"), MESSY).unwrap();
        fs::write(dir.path().join("kubehcl.tfvars"), "replicas=3\n").unwrap();

        let changed = format_folder(dir.path(), true).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(format_folder(dir.path(), true).unwrap().is_empty());
    }

    #[test]
    fn test_missing_folder() {
        let dir = TempDir::new().unwrap();
        assert!(format_folder(&dir.path().join("absent"), false).is_err());
    }
}
