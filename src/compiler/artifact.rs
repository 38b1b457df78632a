//! Compiled artifacts on disk
//!
//! A compiled model lives at `<dir>/<name>.json`. Writes go to a temporary
//! sibling file that is renamed into place, so a reader never observes a
//! partially written artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{CompiledModel, ModelCompiler};
use crate::symbolic::descriptor::ModelDescriptor;
use crate::{Error, Result};

/// Location of the artifact for `name` inside `dir`.
pub fn artifact_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.json"))
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::Compilation(format!("{}: {err}", path.display()))
}

/// Persists `model` and returns the path written.
pub fn write_artifact(dir: impl AsRef<Path>, model: &CompiledModel) -> Result<PathBuf> {
    let dir = dir.as_ref();
    if model.name().is_empty() || model.name().contains(['/', '\\']) {
        return Err(Error::Compilation(format!(
            "model name '{}' cannot be used as a file name",
            model.name()
        )));
    }
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let path = artifact_path(dir, model.name());
    let tmp = dir.join(format!(".{}.json.tmp", model.name()));
    let bytes = serde_json::to_vec_pretty(model)
        .map_err(|e| Error::Compilation(format!("encoding '{}': {e}", model.name())))?;

    let written = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, &path));
    if let Err(e) = written {
        // best effort, the rename never happened
        let _ = fs::remove_file(&tmp);
        return Err(io_error(&path, e));
    }

    log::info!("wrote model '{}' to {}", model.name(), path.display());
    Ok(path)
}

/// Reads and re-validates the artifact for `name` inside `dir`.
///
/// # Errors
/// `Error::Compilation` when the file is missing, cannot be decoded, names a
/// different model, or fails [`CompiledModel::validate`].
pub fn load_artifact(dir: impl AsRef<Path>, name: &str) -> Result<CompiledModel> {
    let path = artifact_path(dir, name);
    let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
    let model: CompiledModel = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Compilation(format!("{}: {e}", path.display())))?;

    if model.name() != name {
        return Err(Error::Compilation(format!(
            "{} holds model '{}', expected '{name}'",
            path.display(),
            model.name()
        )));
    }
    model.validate()?;

    log::info!(
        "loaded model '{}' (D={}, D_err={}) from {}",
        name,
        model.dim_state(),
        model.dim_state_err(),
        path.display()
    );
    Ok(model)
}

/// Compiles `descriptor` and persists the result.
pub fn compile_to_dir<C: ModelCompiler + ?Sized>(
    compiler: &C,
    descriptor: &ModelDescriptor,
    dir: impl AsRef<Path>,
) -> Result<CompiledModel> {
    let model = compiler.compile(descriptor)?;
    write_artifact(dir, &model)?;
    Ok(model)
}
