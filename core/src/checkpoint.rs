/// Checkpoint I/O: model config + parameters as a single JSON document.

use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::driver::{MemoryCell, ModelParams};
use crate::error::Result;

#[derive(Serialize, Deserialize)]
struct ParamCheckpoint {
    config: ModelConfig,
    params: ModelParams,
}

/// Save ModelParams + ModelConfig to a JSON file.
pub fn save_checkpoint(path: &Path, params: &ModelParams, config: &ModelConfig) -> Result<()> {
    let checkpoint = ParamCheckpoint {
        config: config.clone(),
        params: params.clone(),
    };
    let json = serde_json::to_string(&checkpoint)?;
    std::fs::write(path, json)?;
    debug!(path = %path.display(), params = params.num_params(), "checkpoint saved");
    Ok(())
}

/// Load ModelParams + ModelConfig from a JSON file. Every layer width is
/// re-validated against the stored config before anything is returned.
pub fn load_checkpoint(path: &Path) -> Result<(ModelParams, ModelConfig)> {
    let cell = load_cell(path)?;
    Ok((cell.params(), cell.config().clone()))
}

/// Load a checkpoint and rebuild the cell, validating every layer width.
pub fn load_cell(path: &Path) -> Result<MemoryCell> {
    let json = std::fs::read_to_string(path)?;
    let checkpoint: ParamCheckpoint = serde_json::from_str(&json)?;
    let cell = MemoryCell::from_params(checkpoint.config, checkpoint.params)?;
    debug!(path = %path.display(), params = cell.params().num_params(), "checkpoint loaded");
    Ok(cell)
}
