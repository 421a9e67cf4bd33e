//! Configuration settings for a single calculation step

use std::{
    fmt::{Debug, Display},
    fs::read_to_string,
    path::{Path, PathBuf},
};

use anyhow::Context;
use qmio::{
    Molecule,
    program::{columbus::mrci::MrciOptions, dftbplus::ssr::SsrOptions},
};
use serde::{Deserialize, Serialize};


/// Geometries can either be literal XYZ strings in the config file, or the name
/// of an XYZ file to be loaded
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(untagged)]
enum GeometrySrc {
    Literal(String),
    File { file: String },
}

impl TryFrom<GeometrySrc> for String {
    type Error = String;

    fn try_from(value: GeometrySrc) -> Result<Self, Self::Error> {
        match value {
            GeometrySrc::Literal(s) => Ok(s),
            GeometrySrc::File { file } => read_to_string(&file).map_err(|e| {
                format!("failed to read geometry file {file}: {e}")
            }),
        }
    }
}

/// The quantum chemistry method to run, selected by the `program` key of the
/// `[qm]` table. The remaining keys are the options of that method
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(tag = "program", rename_all = "lowercase")]
pub enum QmOptions {
    Ssr(SsrOptions),
    Mrci(MrciOptions),
}

impl Display for QmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QmOptions::Ssr(_) => write!(f, "dftb+ ssr"),
            QmOptions::Mrci(_) => write!(f, "columbus mrci"),
        }
    }
}

fn one() -> usize {
    1
}

fn initial_step() -> isize {
    -1
}

fn running_state() -> Vec<usize> {
    vec![0]
}

fn here() -> String {
    ".".to_owned()
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// The geometry in XYZ format with coordinates in Å. The atom count and
    /// comment lines are optional.
    geometry: GeometrySrc,

    /// The molecular charge.
    #[serde(default)]
    charge: isize,

    /// The number of electronic states to compute.
    #[serde(default = "one")]
    nstates: usize,

    /// The states whose forces are needed, starting from 0. The first one is
    /// the running state.
    #[serde(default = "running_state")]
    bo_list: Vec<usize>,

    /// The MD step, where -1 is the initial step. Only used to name archived
    /// logs.
    #[serde(default = "initial_step")]
    istep: isize,

    /// The directory holding the QMRUN scratch directory and the optional QMlog
    /// archive.
    #[serde(default = "here")]
    base_dir: String,

    /// Recompute only the forces, reusing the scratch directory of the last
    /// step.
    #[serde(default)]
    calc_force_only: bool,

    qm: QmOptions,
}

/// Load a [Config] from a TOML file with [Config::load]
#[derive(Clone, Deserialize, PartialEq, Debug)]
#[serde(try_from = "RawConfig")]
pub struct Config {
    /// the starting snapshot, with positions in bohr
    pub molecule: Molecule,

    pub bo_list: Vec<usize>,
    pub istep: isize,
    pub base_dir: PathBuf,
    pub calc_force_only: bool,
    pub qm: QmOptions,
}

impl TryFrom<RawConfig> for Config {
    type Error = String;

    fn try_from(rc: RawConfig) -> Result<Self, Self::Error> {
        if rc.nstates == 0 {
            return Err("nstates must be at least 1".to_owned());
        }
        if rc.bo_list.is_empty() {
            return Err("bo_list must name at least one state".to_owned());
        }
        if let Some(s) = rc.bo_list.iter().find(|&&s| s >= rc.nstates) {
            return Err(format!(
                "state {s} in bo_list is out of range for {} states",
                rc.nstates
            ));
        }
        let geometry: String = rc.geometry.try_into()?;
        let molecule = Molecule::from_xyz(&geometry, rc.charge, rc.nstates)
            .map_err(|e| format!("failed to parse geometry: {e}"))?;
        Ok(Self {
            molecule,
            bo_list: rc.bo_list,
            istep: rc.istep,
            base_dir: PathBuf::from(rc.base_dir),
            calc_force_only: rc.calc_force_only,
            qm: rc.qm,
        })
    }
}

impl Config {
    /// load a [Config] from the TOML file specified by `filename`
    pub fn load<P>(filename: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path> + Debug,
    {
        let contents = std::fs::read_to_string(&filename)
            .with_context(|| format!("failed to load config file {filename:?}"))?;
        toml::from_str(&contents).with_context(|| {
            format!("failed to deserialize config file {filename:?}")
        })
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            molecule,
            bo_list,
            istep,
            base_dir,
            calc_force_only,
            qm,
        } = self;
        writeln!(f, "\nConfiguration Options:")?;
        writeln!(f, "geometry (bohr) = {{")?;
        for atom in &molecule.atoms {
            writeln!(f, "{atom}")?;
        }
        writeln!(f, "}}")?;
        writeln!(f, "charge = {}", molecule.charge)?;
        writeln!(f, "nstates = {}", molecule.nst())?;
        writeln!(f, "bo_list = {bo_list:?}")?;
        writeln!(f, "istep = {istep}")?;
        writeln!(f, "base_dir = {}", base_dir.display())?;
        writeln!(f, "calc_force_only = {calc_force_only}")?;
        writeln!(f, "program = {qm}")
    }
}
