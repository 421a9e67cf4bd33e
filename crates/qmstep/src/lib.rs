use std::path::Path;

use qmio::{
    Calculator, ConfigError, Molecule, ProgramError,
    program::{columbus::mrci::Mrci, dftbplus::ssr::Ssr},
};

use config::{Config, QmOptions};

pub mod config;
pub mod summary;


/// The calculator selected by [QmOptions], validated against the molecule it
/// will run on
#[derive(Debug)]
pub enum Adapter {
    Ssr(Ssr),
    Mrci(Mrci),
}

impl Adapter {
    pub fn new(qm: &QmOptions, molecule: &Molecule) -> Result<Self, ConfigError> {
        Ok(match qm {
            QmOptions::Ssr(opts) => Self::Ssr(Ssr::new(opts.clone(), molecule)?),
            QmOptions::Mrci(opts) => {
                Self::Mrci(Mrci::new(opts.clone(), molecule)?)
            }
        })
    }

    /// the input decks that a step described by `config` would write, without
    /// touching the filesystem
    pub fn preview(&self, config: &Config) -> String {
        let mol = &config.molecule;
        match self {
            Adapter::Ssr(ssr) => ssr.render(mol, config.bo_list[0]),
            Adapter::Mrci(_) => format!(
                "geom:\n{}\ntransmomin:\n{}",
                Mrci::geom(mol),
                Mrci::transmomin(
                    mol.nst(),
                    &config.bo_list,
                    config.calc_force_only
                )
            ),
        }
    }

    /// whether the driver has to compute NACMEs from wavefunction overlaps
    pub fn needs_overlap_nacme(&self) -> bool {
        match self {
            Adapter::Ssr(ssr) => ssr.needs_overlap_nacme(),
            Adapter::Mrci(mrci) => mrci.needs_overlap_nacme(),
        }
    }

    /// whether the driver has to recompute forces after a hop between `nst`
    /// states
    pub fn re_calc(&self, nst: usize) -> bool {
        match self {
            Adapter::Ssr(ssr) => ssr.re_calc(nst),
            Adapter::Mrci(mrci) => mrci.re_calc(),
        }
    }
}

impl Calculator for Adapter {
    fn get_bo(
        &mut self,
        molecule: &mut Molecule,
        base_dir: &Path,
        istep: isize,
        bo_list: &[usize],
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        match self {
            Adapter::Ssr(ssr) => {
                ssr.get_bo(molecule, base_dir, istep, bo_list, calc_force_only)
            }
            Adapter::Mrci(mrci) => {
                mrci.get_bo(molecule, base_dir, istep, bo_list, calc_force_only)
            }
        }
    }
}

/// run the step described by `config`, returning the updated molecule
pub fn run(config: &Config) -> anyhow::Result<(Adapter, Molecule)> {
    use anyhow::Context;
    let mut adapter = Adapter::new(&config.qm, &config.molecule)
        .context("invalid qm options")?;
    let mut molecule = config.molecule.clone();
    adapter
        .get_bo(
            &mut molecule,
            &config.base_dir,
            config.istep,
            &config.bo_list,
            config.calc_force_only,
        )
        .with_context(|| format!("{} step {} failed", config.qm, config.istep))?;
    Ok((adapter, molecule))
}
