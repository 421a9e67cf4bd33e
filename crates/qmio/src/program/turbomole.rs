//! Turbomole settings shared by every method run through it. Turbomole finds
//! its basis sets and parallel binaries through environment variables, which
//! are passed to each invocation through [Turbomole::runner]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::runner::Runner;

use super::ConfigError;

const VERSION: &str = "6.4";

const SERIAL_BIN: &str = "bin/em64t-unknown-linux-gnu";
const SMP_BIN: &str = "bin/em64t-unknown-linux-gnu_smp";

/// The version as written in the input. Numbers are accepted by the
/// deserializer only so that `version = 6.4` can be reported as a type error
/// instead of an opaque parse failure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionSrc {
    Text(String),
    Number(f64),
}

impl Default for VersionSrc {
    fn default() -> Self {
        Self::Text(VERSION.to_owned())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TurbomoleOptions {
    pub functional: String,
    pub basis_set: String,

    /// in MB
    pub memory: usize,

    /// the Turbomole installation root, exported as `TURBODIR`
    pub qm_path: String,

    pub nthreads: usize,
    pub version: VersionSrc,
}

impl Default for TurbomoleOptions {
    fn default() -> Self {
        Self {
            functional: "b-lyp".to_owned(),
            basis_set: "SV(P)".to_owned(),
            memory: 50,
            qm_path: "./".to_owned(),
            nthreads: 1,
            version: VersionSrc::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Turbomole {
    pub functional: String,
    pub basis_set: String,
    pub memory: usize,
    qm_path: PathBuf,
    nthreads: usize,
}

impl Turbomole {
    pub fn new(opts: TurbomoleOptions) -> Result<Self, ConfigError> {
        match opts.version {
            VersionSrc::Text(v) if v == VERSION => {}
            VersionSrc::Text(v) => {
                return Err(ConfigError::UnsupportedVersion(format!(
                    "Turbomole {v}"
                )));
            }
            VersionSrc::Number(v) => {
                return Err(ConfigError::WrongType(format!(
                    "Turbomole version must be a string, got {v}"
                )));
            }
        }
        Ok(Self {
            functional: opts.functional,
            basis_set: opts.basis_set,
            memory: opts.memory,
            qm_path: PathBuf::from(opts.qm_path),
            nthreads: opts.nthreads,
        })
    }

    pub fn qm_path(&self) -> &Path {
        &self.qm_path
    }

    /// whether the SMP binaries are used
    pub fn parallel(&self) -> bool {
        self.nthreads > 1
    }

    /// the variables Turbomole reads at startup
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut ret = vec![(
            "TURBODIR".to_owned(),
            self.qm_path.to_string_lossy().to_string(),
        )];
        if self.parallel() {
            ret.push(("PARA_ARCH".to_owned(), "SMP".to_owned()));
            ret.push(("PARNODES".to_owned(), self.nthreads.to_string()));
        }
        ret
    }

    pub fn bin_path(&self) -> PathBuf {
        if self.parallel() {
            self.qm_path.join(SMP_BIN)
        } else {
            self.qm_path.join(SERIAL_BIN)
        }
    }

    pub fn scripts_path(&self) -> PathBuf {
        self.qm_path.join("scripts")
    }

    /// an invocation of `binary` from [Self::bin_path] with the Turbomole
    /// environment applied
    pub fn runner(&self, binary: &str, log: &str) -> Runner {
        Runner::new(self.bin_path().join(binary), log).envs(self.environment())
    }
}
