//! Multireference CI calculations in Columbus.
//!
//! The interactive input generators are not driven from here. Their products
//! (`mcscfin`, `cigrdin`, `daltcomm`, `daltaoin`, `ciudgin`, `control.run` and
//! the rest) are copied from [MrciOptions::input_dir] into the scratch directory
//! on every full step, and only the iteration limits and state averaging are
//! patched in place.

use std::{
    fmt::Write,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use log::{debug, info, trace};
use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    molecule::Molecule,
    program::{
        Calculator, ConfigError, ProgramError, copy_file, expect_count,
        prepare_scratch, read_file, read_vectors, running_state, scratch_dir,
        write_file,
    },
    runner::archive_log,
};

use super::{Columbus, ColumbusOptions};

#[cfg(test)]
mod tests;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MrciOptions {
    /// `"hf"` to start every step from HF orbitals, `"read"` to start from
    /// `guess_file` and then from the MCSCF orbitals of the previous step
    pub guess: String,
    pub guess_file: String,

    /// accepted for the SCF deck generated alongside the other inputs
    pub scf_en_tol: usize,
    pub scf_max_iter: usize,

    /// run MRCI directly on the HF orbitals
    pub skip_mcscf: bool,

    /// the MCSCF energy tolerance is `1e-<mcscf_en_tol>`
    pub mcscf_en_tol: usize,
    pub mcscf_max_iter: usize,

    /// the CP-MCSCF gradient tolerance is `1e-<cpscf_grad_tol>`
    pub cpscf_grad_tol: usize,
    pub cpscf_max_iter: usize,

    pub active_elec: usize,
    pub active_orb: usize,
    pub frozen_core_orb: usize,
    pub frozen_virt_orb: usize,

    pub calc_coupling: bool,

    /// directory holding the decks produced by `colinp`
    pub input_dir: String,

    pub basis_set: String,

    /// in MB, passed to `runc -m`
    pub memory: usize,

    /// directory containing `runc`
    pub qm_path: String,

    pub version: String,
}

impl MrciOptions {
    /// the settings shared with every other Columbus method
    fn columbus(&self) -> ColumbusOptions {
        ColumbusOptions {
            basis_set: self.basis_set.clone(),
            memory: self.memory,
            qm_path: self.qm_path.clone(),
            version: self.version.clone(),
        }
    }
}

impl Default for MrciOptions {
    fn default() -> Self {
        let columbus = ColumbusOptions::default();
        Self {
            guess: "hf".to_owned(),
            guess_file: "./mocoef".to_owned(),
            scf_en_tol: 9,
            scf_max_iter: 40,
            skip_mcscf: false,
            mcscf_en_tol: 8,
            mcscf_max_iter: 100,
            cpscf_grad_tol: 6,
            cpscf_max_iter: 100,
            active_elec: 2,
            active_orb: 2,
            frozen_core_orb: 0,
            frozen_virt_orb: 0,
            calc_coupling: false,
            input_dir: "./columbus".to_owned(),
            basis_set: columbus.basis_set,
            memory: columbus.memory,
            qm_path: columbus.qm_path,
            version: columbus.version,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Guess {
    Hf,
    Read(PathBuf),
}

/// orbital counts for the HF, MCSCF, and MRCI steps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Orbitals {
    /// doubly occupied in HF
    pub docc: usize,

    /// doubly occupied outside the MCSCF active space
    pub closed: usize,

    /// internal orbitals in MRCI, with no auxiliary orbitals
    pub internal: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mrci {
    columbus: Columbus,
    guess: Guess,
    skip_mcscf: bool,
    mcscf_en_tol: usize,
    mcscf_max_iter: usize,
    cpscf_grad_tol: usize,
    cpscf_max_iter: usize,
    calc_coupling: bool,
    input_dir: PathBuf,
    orbitals: Orbitals,
}

static ENERGY: OnceLock<Regex> = OnceLock::new();

fn invalid(s: String) -> ConfigError {
    ConfigError::InvalidOption(s)
}

impl Mrci {
    /// validate `opts` for calculations on `mol`, which must be closed shell
    pub fn new(opts: MrciOptions, mol: &Molecule) -> Result<Self, ConfigError> {
        let columbus = Columbus::new(opts.columbus())?;
        let guess = match opts.guess.as_str() {
            "hf" => Guess::Hf,
            "read" => Guess::Read(PathBuf::from(opts.guess_file)),
            g => return Err(invalid(format!("initial guess `{g}`"))),
        };
        if opts.skip_mcscf && guess != Guess::Hf {
            return Err(invalid(
                "skipping MCSCF requires an HF initial guess".to_owned(),
            ));
        }

        let nelec = mol.nelec();
        if nelec < 0 || nelec % 2 != 0 {
            return Err(ConfigError::NotImplemented(format!(
                "open-shell systems with {nelec} electrons"
            )));
        }
        let nelec = nelec as usize;
        let closed = nelec
            .checked_sub(opts.active_elec)
            .map(|n| n / 2)
            .ok_or_else(|| {
                invalid(format!(
                    "{} active electrons out of {nelec}",
                    opts.active_elec
                ))
            })?;
        let internal = (closed + opts.active_orb)
            .checked_sub(opts.frozen_core_orb)
            .ok_or_else(|| {
                invalid(format!(
                    "{} frozen core orbitals out of {}",
                    opts.frozen_core_orb,
                    closed + opts.active_orb
                ))
            })?;

        Ok(Self {
            columbus,
            guess,
            skip_mcscf: opts.skip_mcscf,
            mcscf_en_tol: opts.mcscf_en_tol,
            mcscf_max_iter: opts.mcscf_max_iter,
            cpscf_grad_tol: opts.cpscf_grad_tol,
            cpscf_max_iter: opts.cpscf_max_iter,
            calc_coupling: opts.calc_coupling,
            input_dir: PathBuf::from(opts.input_dir),
            orbitals: Orbitals {
                docc: nelec / 2,
                closed,
                internal,
            },
        })
    }

    pub fn orbitals(&self) -> Orbitals {
        self.orbitals
    }

    /// MRCI computes couplings directly, so overlaps are never needed
    pub fn needs_overlap_nacme(&self) -> bool {
        false
    }

    /// gradients of several states are available from one run, but only the
    /// running state is requested to save time, so the driver must recompute
    /// after a hop
    pub fn re_calc(&self) -> bool {
        true
    }

    /// the `geom` file: symbol, atomic number, position in bohr, and mass in
    /// amu
    pub fn geom(mol: &Molecule) -> String {
        let mut ret = String::new();
        for atom in &mol.atoms {
            writeln!(
                ret,
                " {:5}{:7.2}{:15.8}{:15.8}{:15.8}{:15.8}",
                atom.label(),
                atom.atomic_number as f64,
                atom.x,
                atom.y,
                atom.z,
                atom.mass()
            )
            .unwrap();
        }
        ret
    }

    /// the `transmomin` file requesting gradients for `bo_list` and, on full
    /// steps, couplings for every pair of states
    pub fn transmomin(nst: usize, bo_list: &[usize], calc_force_only: bool) -> String {
        let mut ret = String::from("CI\n");
        for k in bo_list {
            writeln!(ret, "1  {}  1  {}", k + 1, k + 1).unwrap();
        }
        if !calc_force_only {
            for i in 0..nst {
                for j in i + 1..nst {
                    writeln!(ret, "1  {}  1  {}", i + 1, j + 1).unwrap();
                }
            }
        }
        ret
    }

    /// replace the iteration limit and energy tolerance in `mcscfin` and
    /// average over `nst` states with equal weights. The last three lines of
    /// the generated deck hold its state averaging and the closing `&end`
    pub fn patch_mcscfin(
        &self,
        contents: &str,
        nst: usize,
    ) -> Result<String, ProgramError> {
        let lines: Vec<&str> = contents.lines().collect();
        let Some(keep) = lines.len().checked_sub(3) else {
            return Err(ProgramError::PatternNotFound(
                "state averaging block".to_owned(),
                "mcscfin".to_owned(),
            ));
        };
        let mut ret = String::new();
        for line in &lines[..keep] {
            if line.contains("niter") {
                writeln!(ret, "  niter={},", self.mcscf_max_iter).unwrap();
            } else if line.contains("tol(1)") {
                writeln!(ret, "  tol(1)=1.e-{},", self.mcscf_en_tol).unwrap();
            } else {
                writeln!(ret, "{line}").unwrap();
            }
        }
        writeln!(ret, "  NAVST(1) = {nst},").unwrap();
        for i in 0..nst {
            writeln!(ret, "  WAVST(1,{})=1 ,", i + 1).unwrap();
        }
        ret.push_str(" &end\n");
        Ok(ret)
    }

    /// replace the CP-MCSCF iteration limit and tolerance in `cigrdin`
    pub fn patch_cigrdin(&self, contents: &str) -> String {
        let mut ret = String::new();
        for line in contents.lines() {
            if line.contains("nmiter") {
                writeln!(
                    ret,
                    " nmiter= {}, print=0, fresdd=1,",
                    self.cpscf_max_iter
                )
                .unwrap();
            } else if line.contains("rtol") {
                writeln!(ret, " rtol=1e-{}, dtol=1e-6,", self.cpscf_grad_tol)
                    .unwrap();
            } else {
                writeln!(ret, "{line}").unwrap();
            }
        }
        ret
    }

    /// copy the generated decks into `dir`
    fn copy_inputs(&self, dir: &Path) -> Result<(), ProgramError> {
        let name = self.input_dir.to_string_lossy().to_string();
        let entries = std::fs::read_dir(&self.input_dir).map_err(|e| {
            match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProgramError::FileNotFound(name.clone())
                }
                kind => ProgramError::ReadFileError(name.clone(), kind),
            }
        })?;
        for entry in entries {
            let entry = entry
                .map_err(|e| ProgramError::ReadFileError(name.clone(), e.kind()))?;
            let path = entry.path();
            if path.is_file() {
                copy_file(&path, &dir.join(entry.file_name()))?;
            }
        }
        Ok(())
    }

    /// with a read guess, keep the MCSCF orbitals of the last step in
    /// `base_dir` before the scratch directory is cleared
    fn save_guess(
        &self,
        base_dir: &Path,
        istep: isize,
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        if calc_force_only || istep < 0 || self.guess == Guess::Hf {
            return Ok(());
        }
        let src = scratch_dir(base_dir).join("MOCOEFS/mocoef_mc.sp");
        copy_file(&src, &base_dir.join("mocoef"))
    }

    /// put the starting orbitals for this step in `dir/mocoef`, if any
    fn place_guess(
        &self,
        base_dir: &Path,
        dir: &Path,
        istep: isize,
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        let dest = dir.join("mocoef");
        if calc_force_only {
            let src = if self.skip_mcscf {
                "mocoef_scf.sp"
            } else {
                "mocoef_mc.sp"
            };
            return copy_file(&dir.join("MOCOEFS").join(src), &dest);
        }
        let Guess::Read(file) = &self.guess else {
            return Ok(());
        };
        if istep >= 0 {
            let src = base_dir.join("mocoef");
            return std::fs::rename(&src, &dest).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProgramError::FileNotFound(src.to_string_lossy().to_string())
                }
                kind => ProgramError::WriteFileError(
                    dest.to_string_lossy().to_string(),
                    kind,
                ),
            });
        }
        if file.exists() {
            copy_file(file, &dest)
        } else {
            info!(
                "initial guess {} not found, starting from HF orbitals",
                file.display()
            );
            Ok(())
        }
    }

    /// write `geom` and `transmomin` and patch the generated decks in `dir`
    pub fn write_input(
        &self,
        mol: &Molecule,
        bo_list: &[usize],
        dir: &Path,
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        write_file(&dir.join("geom"), &Self::geom(mol))?;
        write_file(
            &dir.join("transmomin"),
            &Self::transmomin(mol.nst(), bo_list, calc_force_only),
        )?;
        if !calc_force_only {
            let mcscfin = read_file(&dir.join("mcscfin"))?;
            let patched = self.patch_mcscfin(&mcscfin, mol.nst())?;
            write_file(&dir.join("mcscfin.old"), &mcscfin)?;
            write_file(&dir.join("mcscfin"), &patched)?;
        }
        let cigrdin = read_file(&dir.join("cigrdin"))?;
        write_file(&dir.join("cigrdin.old"), &cigrdin)?;
        write_file(&dir.join("cigrdin"), &self.patch_cigrdin(&cigrdin))?;
        copy_file(&dir.join("daltcomm"), &dir.join("daltcomm.new"))
    }

    /// read the energies, forces, and couplings for `mol` from the listings in
    /// `dir`. nothing in `mol` is modified unless every file is read
    pub fn extract(
        &self,
        mol: &mut Molecule,
        dir: &Path,
        bo_list: &[usize],
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        let nat = mol.nat();
        let nst = mol.nst();
        let energies = if calc_force_only {
            None
        } else {
            let path = dir.join("LISTINGS/mcscfsm.sp");
            Some(read_energies(
                &read_file(&path)?,
                nst,
                &path.to_string_lossy(),
            )?)
        };

        let mut gradients = Vec::with_capacity(bo_list.len());
        for &k in bo_list {
            let path = dir.join(format!("GRADIENTS/cartgrd.drt1.state{}.sp", k + 1));
            let g = read_cartgrd(&read_file(&path)?, nat, &path.to_string_lossy())?;
            gradients.push((k, g));
        }

        let nacs = if !calc_force_only && self.calc_coupling {
            let mut ret = Vec::new();
            for i in 0..nst {
                for j in i + 1..nst {
                    let path = dir.join(format!(
                        "GRADIENTS/cartgrd.nad.drt1.state{}.drt1.state{}.sp",
                        j + 1,
                        i + 1
                    ));
                    ret.push(read_cartgrd(
                        &read_file(&path)?,
                        nat,
                        &path.to_string_lossy(),
                    )?);
                }
            }
            Some(ret)
        } else {
            None
        };

        if let Some(energies) = energies {
            for (state, energy) in mol.states.iter_mut().zip(energies) {
                state.energy = energy;
            }
        }
        for (k, g) in gradients {
            mol.states[k].force = -g;
        }
        if let Some(nacs) = nacs {
            mol.set_nacs(nacs);
        }
        Ok(())
    }
}

/// the state energies in `mcscfsm.sp`, printed as `total energy= <e>,`
pub(crate) fn read_energies(
    contents: &str,
    nst: usize,
    outname: &str,
) -> Result<Vec<f64>, ProgramError> {
    let re = ENERGY.get_or_init(|| {
        trace!("initializing columbus energy regex");
        Regex::new(r"total\s+energy=\s*(\S+?),").unwrap()
    });
    let found: Vec<&str> = re
        .captures_iter(contents)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    expect_count(found, nst, "MCSCF state energies", outname)?
        .into_iter()
        .map(|s| {
            s.parse::<f64>().map_err(|_| {
                ProgramError::ParseError(s.to_owned(), outname.to_owned())
            })
        })
        .collect()
}

/// a `cartgrd` file: exactly `nat` rows of three numbers, possibly with
/// Fortran `D` exponents
pub(crate) fn read_cartgrd(
    contents: &str,
    nat: usize,
    outname: &str,
) -> Result<Array2<f64>, ProgramError> {
    let rows: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    if rows.len() > nat {
        return Err(ProgramError::AmbiguousOutput {
            what: "cartesian gradient rows".to_owned(),
            file: outname.to_owned(),
            found: rows.len(),
            expected: nat,
        });
    }
    read_vectors(rows, nat, "cartesian gradient", outname)
}

impl Calculator for Mrci {
    fn get_bo(
        &mut self,
        molecule: &mut Molecule,
        base_dir: &Path,
        istep: isize,
        bo_list: &[usize],
        calc_force_only: bool,
    ) -> Result<(), ProgramError> {
        let first = running_state(molecule, bo_list)?;
        self.save_guess(base_dir, istep, calc_force_only)?;
        let dir = prepare_scratch(base_dir, calc_force_only)?;
        if !calc_force_only {
            self.copy_inputs(&dir)?;
        }
        self.place_guess(base_dir, &dir, istep, calc_force_only)?;
        self.write_input(molecule, bo_list, &dir, calc_force_only)?;

        let log = self.columbus.runner().run(&dir)?;
        archive_log(&log, base_dir, istep, first)?;
        let work = dir.join("WORK");
        if work.exists() {
            debug!("removing {}", work.display());
            std::fs::remove_dir_all(&work).map_err(|e| {
                ProgramError::WriteFileError(
                    work.to_string_lossy().to_string(),
                    e.kind(),
                )
            })?;
        }

        self.extract(molecule, &dir, bo_list, calc_force_only)?;
        info!("finished MRCI step {istep} for states {bo_list:?}");
        Ok(())
    }
}
