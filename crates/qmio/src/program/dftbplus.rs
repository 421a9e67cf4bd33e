//! DFTB+ settings shared by every method run through it

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::runner::Runner;

use super::ConfigError;

pub mod params;
pub mod ssr;

/// DFTB+ versions with known input and output layouts, and the
/// `ParserVersion` each one expects in `ParserOptions`
const PARSER_VERSIONS: [(f64, usize); 1] = [(19.1, 7)];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DftbPlusOptions {
    /// prefix for the Slater-Koster files
    pub sk_path: String,

    /// directory containing the `dftb+` binary
    pub qm_path: String,

    /// OpenMP threads for the program
    pub nthreads: usize,

    pub version: f64,
}

impl Default for DftbPlusOptions {
    fn default() -> Self {
        Self {
            sk_path: "./".to_owned(),
            qm_path: "./".to_owned(),
            nthreads: 1,
            version: 19.1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DftbPlus {
    pub(crate) sk_path: String,
    qm_path: PathBuf,
    nthreads: usize,
    pub(crate) parser_version: usize,
}

impl DftbPlus {
    pub fn new(opts: DftbPlusOptions) -> Result<Self, ConfigError> {
        let Some(&(_, parser_version)) = PARSER_VERSIONS
            .iter()
            .find(|(v, _)| (v - opts.version).abs() < 1e-8)
        else {
            return Err(ConfigError::UnsupportedVersion(format!(
                "DFTB+ {}",
                opts.version
            )));
        };
        Ok(Self {
            sk_path: opts.sk_path,
            qm_path: PathBuf::from(opts.qm_path),
            nthreads: opts.nthreads,
            parser_version,
        })
    }

    /// the `dftb+` invocation, writing its output to `log`
    pub fn runner(&self) -> Runner {
        Runner::new(self.qm_path.join("dftb+"), "log")
            .env("OMP_NUM_THREADS", self.nthreads.to_string())
    }
}
