//! Deployment manifest rendering (`envsubst`-style).
//!
//! `${NAME}` and `$NAME` are replaced from the supplied variables. A
//! reference to a variable that is not supplied is an error rather than an
//! empty substitution, so a missing `IMAGE_TAG` can never deploy `repo:`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::domain::error::{ConveyorError, Result};

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("variable pattern is valid")
    })
}

/// Substitute variables in `template`.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let rendered = var_pattern().replace_all(template, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConveyorError::Manifest(format!(
            "undefined variable(s): {}",
            missing.join(", ")
        )));
    }
    Ok(rendered.into_owned())
}

/// `deploy.yml` → `deploy.rendered.yml`; `manifest` → `manifest.rendered`.
pub fn rendered_path(template: &Path) -> PathBuf {
    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match template.extension() {
        Some(ext) => format!("{stem}.rendered.{}", ext.to_string_lossy()),
        None => format!("{stem}.rendered"),
    };
    template.with_file_name(name)
}

/// Render `template` on disk, writing the result next to it.
/// Returns the path written.
pub async fn render_file(template: &Path, vars: &BTreeMap<String, String>) -> Result<PathBuf> {
    let source = tokio::fs::read_to_string(template).await.map_err(|e| {
        ConveyorError::Manifest(format!("cannot read {}: {e}", template.display()))
    })?;
    let rendered = render(&source, vars)?;
    let out = rendered_path(template);
    tokio::fs::write(&out, rendered).await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_braced_and_bare_forms() {
        let v = vars(&[("IMAGE_TAG", "20240101120000"), ("REPO", "myrepo")]);
        let out = render("image: $REPO:${IMAGE_TAG}", &v).unwrap();
        assert_eq!(out, "image: myrepo:20240101120000");
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let err = render("image: repo:${IMAGE_TAG} ${OTHER} ${IMAGE_TAG}", &vars(&[])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("IMAGE_TAG, OTHER"), "{msg}");
    }

    #[test]
    fn test_same_tag_renders_identically() {
        let v = vars(&[("IMAGE_TAG", "20240101120000")]);
        let t = "spec:\n  image: app:${IMAGE_TAG}\n";
        assert_eq!(render(t, &v).unwrap(), render(t, &v).unwrap());
    }

    #[test]
    fn test_text_without_variables_untouched() {
        let t = "cost: 5 dollars, no vars here";
        assert_eq!(render(t, &vars(&[])).unwrap(), t);
    }

    #[test]
    fn test_rendered_path_naming() {
        assert_eq!(
            rendered_path(Path::new("k8s/deploy.yml")),
            PathBuf::from("k8s/deploy.rendered.yml")
        );
        assert_eq!(
            rendered_path(Path::new("manifest")),
            PathBuf::from("manifest.rendered")
        );
    }

    #[tokio::test]
    async fn test_render_file_writes_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("app.yml");
        tokio::fs::write(&tpl, "image: app:${IMAGE_TAG}").await.unwrap();
        let out = render_file(&tpl, &vars(&[("IMAGE_TAG", "20240101120000")]))
            .await
            .unwrap();
        assert_eq!(out, dir.path().join("app.rendered.yml"));
        assert_eq!(
            tokio::fs::read_to_string(out).await.unwrap(),
            "image: app:20240101120000"
        );
    }
}
