//! Deploy manifest rendering.
//!
//! Takes a YAML values file and a set of template inputs (files or
//! directories) and renders each template into an output directory,
//! preserving the input layout. Used by the CLI before artifacts are
//! pushed to workers.

use std::fs;
use std::path::{Component, Path, PathBuf};

use minijinja::Environment;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Errors produced while rendering templates.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read values file {path}: {source}")]
    Values {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse values file {path}: {source}")]
    ParseValues {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to read input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to write output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk input directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Render every input against the values file into `output_dir`.
///
/// A file input renders to `output_dir/<input>`; a directory input renders
/// each contained file to `output_dir/<input>/<relative path>`. Leading
/// root components of an input are stripped so absolute inputs stay inside
/// the output directory.
pub fn execute(
    values_file: &Path,
    output_dir: &Path,
    inputs: &[PathBuf],
) -> Result<(), RenderError> {
    let raw = fs::read_to_string(values_file).map_err(|source| RenderError::Values {
        path: values_file.to_path_buf(),
        source,
    })?;
    let values: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|source| RenderError::ParseValues {
            path: values_file.to_path_buf(),
            source,
        })?;

    let env = Environment::new();

    for input in inputs {
        let metadata = fs::metadata(input).map_err(|source| RenderError::Input {
            path: input.clone(),
            source,
        })?;
        let base = output_dir.join(relative(input));

        if metadata.is_dir() {
            for entry in WalkDir::new(input) {
                let entry = entry.map_err(|source| RenderError::Walk {
                    path: input.clone(),
                    source,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(input)
                    .expect("walked path is under its root");
                render_file(&env, entry.path(), &base.join(rel), &values)?;
            }
        } else {
            render_file(&env, input, &base, &values)?;
        }
    }

    Ok(())
}

fn render_file(
    env: &Environment,
    src: &Path,
    dst: &Path,
    values: &serde_yaml::Value,
) -> Result<(), RenderError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|source| RenderError::Output {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let template = fs::read_to_string(src).map_err(|source| RenderError::Input {
        path: src.to_path_buf(),
        source,
    })?;
    let rendered = env
        .render_str(&template, values)
        .map_err(|source| RenderError::Template {
            path: src.to_path_buf(),
            source,
        })?;
    fs::write(dst, rendered).map_err(|source| RenderError::Output {
        path: dst.to_path_buf(),
        source,
    })?;

    debug!(src = %src.display(), dst = %dst.display(), "rendered template");
    Ok(())
}

/// Strip root and prefix components so joining stays under the output dir.
fn relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn renders_single_file_with_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let values = dir.path().join("values.yaml");
        write(&values, "name: api\nreplicas: 3\n");
        let input = dir.path().join("deploy.yaml");
        write(&input, "app: {{ name }}\ncount: {{ replicas }}\n");
        let out = dir.path().join("out");

        execute(&values, &out, &[input.clone()]).expect("render");

        let rendered = fs::read_to_string(out.join(relative(&input))).expect("read");
        assert_eq!(rendered, "app: api\ncount: 3\n");
    }

    #[test]
    fn renders_directory_preserving_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let values = dir.path().join("values.yaml");
        write(&values, "env: staging\n");
        let input = dir.path().join("manifests");
        write(&input.join("a.yaml"), "env: {{ env }}\n");
        write(&input.join("nested/b.yaml"), "also: {{ env }}\n");
        let out = dir.path().join("out");

        execute(&values, &out, &[input.clone()]).expect("render");

        let base = out.join(relative(&input));
        assert_eq!(
            fs::read_to_string(base.join("a.yaml")).expect("read"),
            "env: staging\n"
        );
        assert_eq!(
            fs::read_to_string(base.join("nested/b.yaml")).expect("read"),
            "also: staging\n"
        );
    }

    #[test]
    fn missing_values_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = execute(
            &dir.path().join("absent.yaml"),
            &dir.path().join("out"),
            &[],
        )
        .expect_err("missing values");
        assert!(matches!(err, RenderError::Values { .. }));
    }

    #[test]
    fn template_syntax_error_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let values = dir.path().join("values.yaml");
        write(&values, "name: x\n");
        let input = dir.path().join("broken.yaml");
        write(&input, "oops: {{ name\n");

        let err = execute(&values, &dir.path().join("out"), &[input.clone()])
            .expect_err("broken template");
        match err {
            RenderError::Template { path, .. } => assert_eq!(path, input),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn absolute_input_stays_under_output_dir() {
        assert_eq!(
            relative(Path::new("/etc/app/deploy.yaml")),
            PathBuf::from("etc/app/deploy.yaml")
        );
        assert_eq!(
            relative(Path::new("manifests")),
            PathBuf::from("manifests")
        );
    }
}
