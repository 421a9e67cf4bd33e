//! Q-Chem settings shared by every method run through it

use serde::{Deserialize, Serialize};

use super::ConfigError;

const VERSION: f64 = 5.2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QChemOptions {
    pub basis_set: String,

    /// in MB
    pub memory: usize,

    pub qm_path: String,
    pub nthreads: usize,
    pub version: f64,
}

impl Default for QChemOptions {
    fn default() -> Self {
        Self {
            basis_set: "sto-3g".to_owned(),
            memory: 2000,
            qm_path: "./".to_owned(),
            nthreads: 1,
            version: VERSION,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QChem {
    pub basis_set: String,
    pub memory: usize,
    pub qm_path: String,
    pub nthreads: usize,
}

impl QChem {
    pub fn new(opts: QChemOptions) -> Result<Self, ConfigError> {
        if (opts.version - VERSION).abs() > 1e-8 {
            return Err(ConfigError::UnsupportedVersion(format!(
                "Q-Chem {}",
                opts.version
            )));
        }
        Ok(Self {
            basis_set: opts.basis_set,
            memory: opts.memory,
            qm_path: opts.qm_path,
            nthreads: opts.nthreads,
        })
    }
}
