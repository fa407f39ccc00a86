//! Target tree layout: `<target>/forms/<form name>/` holding the form
//! definition, its media directory, and `instances/<instance>/`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

const FORMS_DIR: &str = "forms";
const INSTANCES_DIR: &str = "instances";

/// Directory a form is pulled into.
#[must_use]
pub fn form_dir(target_dir: &Path, form_name: &str) -> PathBuf {
    target_dir.join(FORMS_DIR).join(sanitize_name(form_name))
}

/// Directory holding a pulled form's submissions.
#[must_use]
pub fn instances_dir(form_dir: &Path) -> PathBuf {
    form_dir.join(INSTANCES_DIR)
}

/// Make `name` safe as a single path component.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "." {
        "form".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether `name` joins onto a directory as exactly one child entry.
#[must_use]
pub fn is_single_component(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Copy a file or directory tree to `destination`, creating parents.
///
/// # Errors
///
/// Returns an error if traversal, directory creation, or a copy fails.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    if source.is_file() {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create destination parent {}", parent.display())
            })?;
        }
        fs::copy(source, destination).with_context(|| {
            format!(
                "failed to copy {} to {}",
                source.display(),
                destination.display()
            )
        })?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry
            .with_context(|| format!("failed to traverse {} while copying", source.display()))?;
        let relative = entry.path().strip_prefix(source).with_context(|| {
            format!(
                "failed to strip prefix {} from {}",
                source.display(),
                entry.path().display()
            )
        })?;
        let target_path = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target_path).with_context(|| {
                format!("failed to create directory {}", target_path.display())
            })?;
        } else {
            fs::copy(entry.path(), &target_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target_path.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_single_components() {
        assert_eq!(sanitize_name("Survey: round 2/3"), "Survey_ round 2_3");
        assert_eq!(sanitize_name("  ..  "), "form");
        assert_eq!(sanitize_name("Visits."), "Visits");
    }

    #[test]
    fn child_names_cannot_leave_their_parent() {
        assert!(is_single_component("uuid:4f1c"));
        assert!(is_single_component("household_2024-05-01_10-00-00"));
        for name in ["", ".", "..", "../escape", "a/b", "a\\b", "/etc"] {
            assert!(!is_single_component(name), "{name}");
        }
    }

    #[test]
    fn form_tree_nests_under_forms() {
        let dir = form_dir(Path::new("/data"), "Household survey");
        assert_eq!(dir, PathBuf::from("/data/forms/Household survey"));
        assert_eq!(
            instances_dir(&dir),
            PathBuf::from("/data/forms/Household survey/instances")
        );
    }

    #[test]
    fn copies_nested_directories() -> Result<()> {
        let source = tempfile::tempdir()?;
        let destination = tempfile::tempdir()?;
        fs::create_dir_all(source.path().join("a/b"))?;
        fs::write(source.path().join("a/b/file.txt"), "x")?;
        fs::write(source.path().join("top.txt"), "y")?;

        let target = destination.path().join("copy");
        copy_tree(source.path(), &target)?;

        assert_eq!(fs::read_to_string(target.join("a/b/file.txt"))?, "x");
        assert_eq!(fs::read_to_string(target.join("top.txt"))?, "y");
        Ok(())
    }
}
