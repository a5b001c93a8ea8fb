//! Bandit state persistence
//!
//! Posteriors are serialized as a flat JSON object
//! `{arm_name: {alpha, beta, trials}}` and rewritten atomically
//! (write-to-temp, fsync, rename). Startup tries the runtime path, then
//! the committed pre-warmed default, then uniform priors, logging which
//! source won.

use crate::bandit::ArmState;
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use smartrag_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk record for one arm; this schema is the persistence contract
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ArmRecord {
    alpha: f64,
    beta: f64,
    trials: u64,
}

/// Validate and convert a raw state file into arm states
///
/// Unknown arm names and non-positive parameters are rejected so a corrupt
/// or hand-edited file never reaches the sampler.
fn validate(raw: HashMap<String, ArmRecord>) -> Result<HashMap<StrategyKind, ArmState>> {
    let mut arms = HashMap::new();
    for (name, record) in raw {
        let kind = StrategyKind::parse(&name).ok_or_else(|| AppError::Configuration {
            message: format!("unknown bandit arm '{}' in state file", name),
        })?;
        if record.alpha <= 0.0 || record.beta <= 0.0 {
            return Err(AppError::Configuration {
                message: format!(
                    "arm '{}' has non-positive posterior (alpha={}, beta={})",
                    name, record.alpha, record.beta
                ),
            });
        }
        arms.insert(
            kind,
            ArmState {
                alpha: record.alpha,
                beta: record.beta,
                trials: record.trials,
            },
        );
    }
    Ok(arms)
}

/// JSON persistence for bandit posteriors
pub struct StateStore {
    runtime_path: PathBuf,
    default_path: PathBuf,
}

impl StateStore {
    pub fn new(runtime_path: impl Into<PathBuf>, default_path: impl Into<PathBuf>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
            default_path: default_path.into(),
        }
    }

    fn read(path: &Path) -> Result<HashMap<StrategyKind, ArmState>> {
        let bytes = std::fs::read(path)?;
        let raw: HashMap<String, ArmRecord> = serde_json::from_slice(&bytes)?;
        validate(raw)
    }

    /// Load initial state: runtime file, else pre-warmed default, else
    /// uniform priors
    pub fn load_initial(&self) -> HashMap<StrategyKind, ArmState> {
        match Self::read(&self.runtime_path) {
            Ok(arms) => {
                tracing::info!(path = %self.runtime_path.display(), "Loaded bandit state (runtime)");
                return arms;
            }
            Err(e) if self.runtime_path.exists() => {
                tracing::warn!(
                    path = %self.runtime_path.display(),
                    error = %e,
                    "Runtime bandit state invalid, trying default"
                );
            }
            Err(_) => {}
        }

        match Self::read(&self.default_path) {
            Ok(arms) => {
                tracing::info!(path = %self.default_path.display(), "Loaded bandit state (pre-warmed default)");
                return arms;
            }
            Err(e) if self.default_path.exists() => {
                tracing::warn!(
                    path = %self.default_path.display(),
                    error = %e,
                    "Default bandit state invalid, using uniform priors"
                );
            }
            Err(_) => {
                tracing::info!("No bandit state found, using uniform priors");
            }
        }

        StrategyKind::ALL
            .iter()
            .map(|&kind| (kind, ArmState::uniform()))
            .collect()
    }

    /// Atomically replace the runtime state file
    pub fn save(&self, arms: &HashMap<StrategyKind, ArmState>) -> Result<()> {
        let raw: HashMap<&str, ArmRecord> = arms
            .iter()
            .map(|(kind, state)| {
                (
                    kind.as_str(),
                    ArmRecord {
                        alpha: state.alpha,
                        beta: state.beta,
                        trials: state.trials,
                    },
                )
            })
            .collect();

        if let Some(parent) = self.runtime_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.runtime_path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&serde_json::to_vec_pretty(&raw)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.runtime_path)?;
        Ok(())
    }
}
