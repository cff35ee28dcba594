//! Agent
//!
//! Bundles a model, the pipe that adapts market environments to it, and the
//! metadata of the dataset it was trained on. The metadata is what lets a
//! trader rebuild a live stream with the same columns as the training data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::pipe::Pipe;
use crate::data::DatasetMetadata;
use crate::env::MarketEnv;
use crate::error::{NeuralError, Result};
use crate::model::Model;

pub const AGENT_FILE: &str = "agent.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent<M, P> {
    pub model: M,
    pub pipe: P,
    pub dataset_metadata: DatasetMetadata,
}

impl<M, P> Agent<M, P>
where
    M: Model,
    P: Pipe,
{
    pub fn new(model: M, pipe: P, dataset_metadata: DatasetMetadata) -> Self {
        Self {
            model,
            pipe,
            dataset_metadata,
        }
    }

    /// Wrap a base environment in this agent's pipe
    pub fn env(&self, base: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>> {
        if base.n_assets() != self.dataset_metadata.n_assets() {
            return Err(NeuralError::validation(format!(
                "environment has {} assets, agent was trained on {}",
                base.n_assets(),
                self.dataset_metadata.n_assets()
            )));
        }
        self.pipe.pipe(base)
    }
}

impl<M, P> Agent<M, P>
where
    M: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
{
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(AGENT_FILE)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = Self::path(dir);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        info!("Agent saved to {}", path.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let raw = fs::read(&path).map_err(|e| {
            NeuralError::validation(format!("cannot read agent {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
