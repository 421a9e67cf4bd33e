//! Spin-restricted ensemble-referenced Kohn-Sham (REKS) calculations in DFTB+,
//! reporting either state-interaction (SSR) or state-averaged (SA-REKS)
//! states

use std::{fmt::Display, path::Path};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    geom::{gen_string, xyz_string},
    molecule::Molecule,
    program::{
        Calculator, ConfigError, ProgramError, prepare_scratch, read_file,
        running_state, write_file,
    },
    runner::archive_log,
};

use super::{DftbPlus, DftbPlusOptions, params};

mod output;

use output::{EnergySource, Request};

#[cfg(test)]
mod tests;

/// screening algorithms for the long-range corrected functional
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LcMethod {
    MatrixBased,
    NeighbourBased,
}

impl TryFrom<&str> for LcMethod {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "MM" => Ok(Self::MatrixBased),
            "NB" => Ok(Self::NeighbourBased),
            s => Err(ConfigError::InvalidOption(format!(
                "LC screening method `{s}` is not compatible with SSR"
            ))),
        }
    }
}

impl Display for LcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LcMethod::MatrixBased => write!(f, "MatrixBased"),
            LcMethod::NeighbourBased => write!(f, "NeighbourBased"),
        }
    }
}

/// The user-facing options for an SSR calculation. Defaults match the
/// recommended REKS(2,2) settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsrOptions {
    /// include the SCC scheme
    pub scc: bool,
    pub scc_tol: f64,
    pub max_scc_iter: usize,

    /// include the spin-polarisation parameters
    pub sdftb: bool,

    /// include the long-range corrected functional
    pub lcdftb: bool,

    /// `"MM"` for matrix-based or `"NB"` for neighbour-based screening
    pub lc_method: String,

    /// include the onsite correction
    pub ocdftb: bool,

    /// use the REKS(2,2) active space. nothing else is implemented
    pub ssr22: bool,

    /// report SSR states if true, SA-REKS states otherwise
    pub use_ssr_state: bool,

    /// the microstate to treat as the target state
    pub state_l: usize,

    /// 1 to start from the diagonalized H0, 2 to read external eigenvectors
    pub guess: usize,

    /// level shift in the REKS SCC iterations
    pub shift: f64,

    /// scaling factor for the atomic spin constants
    pub tuning: f64,

    pub grad_level: usize,

    /// tolerance for the CP-REKS equations
    pub grad_tol: f64,

    pub mem_level: usize,

    pub periodic: bool,
    pub a_axis: f64,
    pub b_axis: f64,
    pub c_axis: f64,

    /// whether the propagator needs nonadiabatic couplings, as in surface
    /// hopping or Ehrenfest dynamics
    pub calc_coupling: bool,

    /// prefix for the Slater-Koster files
    pub sk_path: String,

    /// directory containing the `dftb+` binary
    pub qm_path: String,

    pub nthreads: usize,
    pub version: f64,
}

impl SsrOptions {
    /// the settings shared with every other DFTB+ method
    fn dftb(&self) -> DftbPlusOptions {
        DftbPlusOptions {
            sk_path: self.sk_path.clone(),
            qm_path: self.qm_path.clone(),
            nthreads: self.nthreads,
            version: self.version,
        }
    }
}

impl Default for SsrOptions {
    fn default() -> Self {
        let dftb = DftbPlusOptions::default();
        Self {
            scc: true,
            scc_tol: 1e-6,
            max_scc_iter: 1000,
            sdftb: true,
            lcdftb: true,
            lc_method: "NB".to_owned(),
            ocdftb: false,
            ssr22: true,
            use_ssr_state: true,
            state_l: 0,
            guess: 1,
            shift: 0.3,
            tuning: 1.0,
            grad_level: 1,
            grad_tol: 1e-8,
            mem_level: 2,
            periodic: false,
            a_axis: 0.0,
            b_axis: 0.0,
            c_axis: 0.0,
            calc_coupling: false,
            sk_path: dftb.sk_path,
            qm_path: dftb.qm_path,
            nthreads: dftb.nthreads,
            version: dftb.version,
        }
    }
}

/// the parameters spliced into the Hamiltonian block for one element
#[derive(Clone, Debug, PartialEq)]
struct TypeParams {
    label: &'static str,
    max_l: &'static str,
    spin: Option<String>,
    onsite: Option<(String, String)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ssr {
    dftb: DftbPlus,
    scc: bool,
    scc_tol: f64,
    max_scc_iter: usize,
    sdftb: bool,
    /// `Some` if the long-range correction is enabled
    lc: Option<LcMethod>,
    ocdftb: bool,
    use_ssr_state: bool,
    state_l: usize,
    guess: usize,
    shift: f64,
    grad_level: usize,
    grad_tol: f64,
    mem_level: usize,
    cell: Option<[f64; 3]>,
    calc_coupling: bool,
    types: Vec<TypeParams>,
}

/// the `(EnergyFunctional, EnergyLevel)` pair for `nst` states: single-state
/// REKS for one state, SA-REKS for two, and the 3-state SA-REKS functional
/// beyond that
pub fn energy_functional(nst: usize) -> (usize, usize) {
    match nst {
        0 | 1 => (1, 1),
        2 => (2, 1),
        _ => (2, 2),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "Yes" } else { "No" }
}

impl Ssr {
    /// validate `opts` for calculations on `mol`. The atom types of `mol`
    /// determine which element parameters are needed, so later calls must use
    /// a molecule with the same elements
    pub fn new(opts: SsrOptions, mol: &Molecule) -> Result<Self, ConfigError> {
        let dftb = DftbPlus::new(opts.dftb())?;
        if !opts.ssr22 {
            return Err(ConfigError::NotImplemented(
                "active spaces other than REKS(2,2)".to_owned(),
            ));
        }
        match opts.guess {
            1 => {}
            2 => {
                return Err(ConfigError::NotImplemented(
                    "reading an external initial guess".to_owned(),
                ));
            }
            g => {
                return Err(ConfigError::InvalidOption(format!(
                    "initial guess must be 1 or 2, got {g}"
                )));
            }
        }
        let lc = if opts.scc && opts.lcdftb {
            Some(LcMethod::try_from(opts.lc_method.as_str())?)
        } else {
            None
        };

        let mut types = Vec::new();
        for label in mol.atom_types() {
            let spin = if opts.scc && opts.sdftb {
                Some(params::spin_constants(label, opts.tuning)?)
            } else {
                None
            };
            let onsite = if opts.scc && opts.ocdftb {
                Some(params::onsite_constants(label)?)
            } else {
                None
            };
            types.push(TypeParams {
                label,
                max_l: params::max_angular_momentum(label)?,
                spin,
                onsite,
            });
        }

        Ok(Self {
            dftb,
            scc: opts.scc,
            scc_tol: opts.scc_tol,
            max_scc_iter: opts.max_scc_iter,
            sdftb: opts.sdftb,
            lc,
            ocdftb: opts.ocdftb,
            use_ssr_state: opts.use_ssr_state,
            state_l: opts.state_l,
            guess: opts.guess,
            shift: opts.shift,
            grad_level: opts.grad_level,
            grad_tol: opts.grad_tol,
            mem_level: opts.mem_level,
            cell: opts
                .periodic
                .then_some([opts.a_axis, opts.b_axis, opts.c_axis]),
            calc_coupling: opts.calc_coupling,
            types,
        })
    }

    /// whether DFTB+ is asked for nonadiabatic couplings with `nst` states.
    /// only SSR states have them, and only the propagators that use them ask
    pub fn nac_enabled(&self, nst: usize) -> bool {
        nst > 1 && self.use_ssr_state && self.calc_coupling
    }

    /// SA-REKS states produce no couplings, so the driver has to get NACMEs
    /// from wavefunction overlaps instead
    pub fn needs_overlap_nacme(&self) -> bool {
        !self.use_ssr_state
    }

    /// whether the driver needs to recompute forces after a hop
    pub fn re_calc(&self, nst: usize) -> bool {
        nst > 1 && !self.use_ssr_state
    }

    /// render `dftb_in.hsd` for `mol` with `target` as the running state
    pub fn render(&self, mol: &Molecule, target: usize) -> String {
        let mut ret = String::from(
            "Geometry = GenFormat{
  <<< 'geometry.gen'
}
Hamiltonian = DFTB{
",
        );
        if self.scc {
            ret.push_str(&format!(
                "  SCC = Yes
  SCCTolerance = {:e}
  MaxSCCIterations = {}
",
                self.scc_tol, self.max_scc_iter
            ));
            if self.sdftb {
                ret.push_str("  SpinConstants = {\n    ShellResolvedSpin = Yes\n");
                for t in &self.types {
                    if let Some(spin) = &t.spin {
                        ret.push_str(&format!("    {} = {{ {spin} }}\n", t.label));
                    }
                }
                ret.push_str("  }\n");
            }
            if let Some(lc) = self.lc {
                ret.push_str(&format!(
                    "  RangeSeparated = LC{{
    Screening = {lc}{{}}
  }}
"
                ));
            }
            if self.ocdftb {
                ret.push_str("  OnsiteCorrection = {\n");
                for t in &self.types {
                    if let Some((uu, _)) = &t.onsite {
                        ret.push_str(&format!("    {}uu = {{ {uu} }}\n", t.label));
                    }
                }
                for t in &self.types {
                    if let Some((_, ud)) = &t.onsite {
                        ret.push_str(&format!("    {}ud = {{ {ud} }}\n", t.label));
                    }
                }
                ret.push_str("  }\n");
            }
        }
        if self.cell.is_some() {
            ret.push_str(
                "  KPointsAndWeights = {
    0.0 0.0 0.0 1.0
  }
",
            );
        }
        ret.push_str(&format!("  Charge = {}\n", mol.charge));
        ret.push_str("  MaxAngularMomentum = {\n");
        for t in &self.types {
            ret.push_str(&format!("    {} = '{}'\n", t.label, t.max_l));
        }
        ret.push_str("  }\n");
        ret.push_str(&format!(
            "  SlaterKosterFiles = Type2FileNames{{
    Prefix = '{}'
    Separator = '-'
    Suffix = '.skf'
    LowerCaseTypeName = No
  }}
}}
",
            self.dftb.sk_path
        ));
        ret.push_str(
            "Analysis = {
  CalculateForces = Yes
  WriteBandOut = Yes
  WriteEigenvectors = Yes
  MullikenAnalysis = Yes
}
Options = {
  WriteDetailedXml = Yes
  WriteDetailedOut = Yes
  TimingVerbosity = -1
}
",
        );

        let nst = mol.nst();
        let (functional, level) = energy_functional(nst);
        ret.push_str(&format!(
            "REKS = SSR22{{
  EnergyFunctional = {functional}
  EnergyLevel = {level}
  useSSRstate = {}
  TargetState = {}
  TargetStateL = {}
  InitialGuess = {}
  FONmaxIter = 50
  shift = {}
  GradientLevel = {}
  CGmaxIter = 100
  GradientTolerance = {:e}
  RelaxedDensity = No
  NonAdiabaticCoupling = {}
  PrintLevel = 1
  MemoryLevel = {}
}}
ParserOptions = {{
  ParserVersion = {}
}}
",
            usize::from(self.use_ssr_state),
            target + 1,
            self.state_l,
            self.guess,
            self.shift,
            self.grad_level,
            self.grad_tol,
            yes_no(self.nac_enabled(nst)),
            self.mem_level,
            self.dftb.parser_version,
        ));
        ret
    }

    /// the element parameters were resolved for the molecule passed to
    /// [Ssr::new], so `mol` has to contain the same elements
    fn check_types(&self, mol: &Molecule) -> Result<(), ConfigError> {
        let have: Vec<_> = self.types.iter().map(|t| t.label).collect();
        let want = mol.atom_types();
        if have != want {
            return Err(ConfigError::InvalidOption(format!(
                "element parameters were set up for {have:?}, not {want:?}"
            )));
        }
        Ok(())
    }

    /// write `geometry.xyz`, `geometry.gen`, and `dftb_in.hsd` to `dir`
    pub fn write_input(
        &self,
        mol: &Molecule,
        target: usize,
        dir: &Path,
    ) -> Result<(), ProgramError> {
        self.check_types(mol)?;
        write_file(&dir.join("geometry.xyz"), &xyz_string(mol))?;
        write_file(&dir.join("geometry.gen"), &gen_string(mol, self.cell))?;
        write_file(&dir.join("dftb_in.hsd"), &self.render(mol, target))
    }

    /// read the energies, forces, and couplings for `mol` from the contents
    /// of a DFTB+ log. nothing in `mol` is modified unless every expected
    /// section is found
    pub fn extract(
        &self,
        mol: &mut Molecule,
        contents: &str,
        outname: &str,
        target: usize,
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        let nst = mol.nst();
        let energies = if calc_force_only {
            None
        } else if nst > 1 && self.use_ssr_state {
            Some(EnergySource::SsrStates)
        } else {
            Some(EnergySource::StateTable)
        };
        let req = Request {
            nat: mol.nat(),
            nst,
            energies,
            couplings: self.nac_enabled(nst),
            target,
            force_only: calc_force_only,
        };
        debug!("reading {outname} with {req:?}");
        let out = output::read(contents, &req, outname)?;

        if let Some(energies) = out.energies {
            for (state, energy) in mol.states.iter_mut().zip(energies) {
                state.energy = energy;
            }
        }
        if !calc_force_only {
            for state in mol.states.iter_mut() {
                state.force.fill(0.0);
            }
        }
        for (i, gradient) in out.gradients {
            mol.states[i].force = -gradient;
        }
        if let Some(nacs) = out.couplings {
            mol.set_nacs(nacs);
        }
        Ok(())
    }
}

impl Calculator for Ssr {
    fn get_bo(
        &mut self,
        molecule: &mut Molecule,
        base_dir: &Path,
        istep: isize,
        bo_list: &[usize],
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        let target = running_state(molecule, bo_list)?;
        let dir = prepare_scratch(base_dir, calc_force_only)?;
        self.write_input(molecule, target, &dir)?;

        let log = self.dftb.runner().run(&dir)?;
        archive_log(&log, base_dir, istep, target)?;

        let contents = read_file(&log)?;
        self.extract(
            molecule,
            &contents,
            &log.to_string_lossy(),
            target,
            calc_force_only,
        )?;
        info!("finished SSR step {istep} for state {target}");
        Ok(())
    }
}
