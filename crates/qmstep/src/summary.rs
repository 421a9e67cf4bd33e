use qmio::Molecule;
use serde::{Deserialize, Serialize};

use crate::{Adapter, config::Config};

/// The JSON report of one step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub program: String,
    pub istep: isize,
    pub bo_list: Vec<usize>,
    pub calc_force_only: bool,

    /// in hartree
    pub energies: Vec<f64>,

    /// `forces[state][atom]` in hartree/bohr
    pub forces: Vec<Vec<[f64; 3]>>,

    /// `nac[i][j][atom]`
    pub nac: Vec<Vec<Vec<[f64; 3]>>>,

    pub needs_overlap_nacme: bool,
    pub re_calc: bool,
}

impl Summary {
    pub fn new(adapter: &Adapter, config: &Config, mol: &Molecule) -> Self {
        let nst = mol.nst();
        let nat = mol.nat();
        let forces = mol
            .states
            .iter()
            .map(|s| {
                s.force
                    .rows()
                    .into_iter()
                    .map(|r| [r[0], r[1], r[2]])
                    .collect()
            })
            .collect();
        let nac = (0..nst)
            .map(|i| {
                (0..nst)
                    .map(|j| {
                        (0..nat)
                            .map(|a| {
                                [
                                    mol.nac[[i, j, a, 0]],
                                    mol.nac[[i, j, a, 1]],
                                    mol.nac[[i, j, a, 2]],
                                ]
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Self {
            program: config.qm.to_string(),
            istep: config.istep,
            bo_list: config.bo_list.clone(),
            calc_force_only: config.calc_force_only,
            energies: mol.states.iter().map(|s| s.energy).collect(),
            forces,
            nac,
            needs_overlap_nacme: adapter.needs_overlap_nacme(),
            re_calc: adapter.re_calc(nst),
        }
    }
}
