//! Columbus settings shared by every method run through it

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::runner::Runner;

use super::ConfigError;

pub mod mrci;

const VERSION: &str = "7.0";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumbusOptions {
    pub basis_set: String,

    /// in MB, passed to `runc -m`
    pub memory: usize,

    /// directory containing `runc`
    pub qm_path: String,

    pub version: String,
}

impl Default for ColumbusOptions {
    fn default() -> Self {
        Self {
            basis_set: "6-31g*".to_owned(),
            memory: 500,
            qm_path: "./".to_owned(),
            version: VERSION.to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Columbus {
    pub basis_set: String,
    memory: usize,
    qm_path: PathBuf,
}

impl Columbus {
    pub fn new(opts: ColumbusOptions) -> Result<Self, ConfigError> {
        if opts.version != VERSION {
            return Err(ConfigError::UnsupportedVersion(format!(
                "Columbus {}",
                opts.version
            )));
        }
        Ok(Self {
            basis_set: opts.basis_set,
            memory: opts.memory,
            qm_path: PathBuf::from(opts.qm_path),
        })
    }

    /// the `runc` driver script, writing its listing to `runls`
    pub fn runner(&self) -> Runner {
        Runner::new(self.qm_path.join("runc"), "runls")
            .arg("-m")
            .arg(self.memory.to_string())
    }
}
