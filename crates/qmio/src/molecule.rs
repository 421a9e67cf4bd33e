//! The molecular snapshot handed to a [crate::program::Calculator] for one
//! calculation step

use std::io;

use ndarray::{Array2, Array4};

use crate::atom::{ANG_TO_BOHR, Atom};

/// the per-state results of a calculation
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    /// in hartree
    pub energy: f64,

    /// `nat x 3`, in hartree/bohr
    pub force: Array2<f64>,
}

impl State {
    fn new(nat: usize) -> Self {
        Self {
            energy: 0.0,
            force: Array2::zeros((nat, 3)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Molecule {
    /// positions in bohr
    pub atoms: Vec<Atom>,

    pub charge: isize,

    /// one entry per requested electronic state
    pub states: Vec<State>,

    /// nonadiabatic couplings with shape `(nst, nst, nat, 3)`
    pub nac: Array4<f64>,
}

impl Molecule {
    pub fn new(atoms: Vec<Atom>, charge: isize, nst: usize) -> Self {
        let nat = atoms.len();
        Self {
            atoms,
            charge,
            states: vec![State::new(nat); nst],
            nac: Array4::zeros((nst, nst, nat, 3)),
        }
    }

    /// load a molecule from the contents of an XYZ file with coordinates in Å.
    /// The atom-count and comment lines are optional, but if the count is
    /// present it must match the number of atoms
    pub fn from_xyz(s: &str, charge: isize, nst: usize) -> io::Result<Self> {
        let mut lines =
            s.lines().skip_while(|l| l.trim().is_empty()).peekable();
        let mut want = None;
        if let Some(first) = lines.peek() {
            if let Ok(n) = first.trim().parse::<usize>() {
                want = Some(n);
                lines.next();
                // comment line
                lines.next();
            }
        }
        let mut atoms = Vec::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let atom: Atom = line.parse()?;
            atoms.push(atom.scaled(ANG_TO_BOHR));
        }
        if let Some(n) = want {
            if n != atoms.len() {
                return Err(io::Error::other(format!(
                    "expected {n} atoms in XYZ geometry, found {}",
                    atoms.len()
                )));
            }
        }
        if atoms.is_empty() {
            return Err(io::Error::other("no atoms found in XYZ geometry"));
        }
        Ok(Self::new(atoms, charge, nst))
    }

    pub fn nat(&self) -> usize {
        self.atoms.len()
    }

    pub fn nst(&self) -> usize {
        self.states.len()
    }

    /// number of electrons implied by the atoms and the charge
    pub fn nelec(&self) -> isize {
        self.atoms
            .iter()
            .map(|a| a.atomic_number as isize)
            .sum::<isize>()
            - self.charge
    }

    /// element symbols in order of first appearance
    pub fn atom_types(&self) -> Vec<&'static str> {
        let mut ret: Vec<&'static str> = Vec::new();
        for atom in &self.atoms {
            let label = atom.label();
            if !ret.contains(&label) {
                ret.push(label);
            }
        }
        ret
    }

    /// fill the NAC array from the couplings of the unordered pairs `(i < j)`,
    /// given in row-major order. the lower triangle is the negated upper
    /// triangle and the diagonal is zero
    pub(crate) fn set_nacs(&mut self, pairs: Vec<Array2<f64>>) {
        let nst = self.nst();
        let mut pairs = pairs.into_iter();
        for i in 0..nst {
            self.nac
                .slice_mut(ndarray::s![i, i, .., ..])
                .fill(0.0);
            for j in i + 1..nst {
                let Some(nac) = pairs.next() else {
                    return;
                };
                self.nac
                    .slice_mut(ndarray::s![j, i, .., ..])
                    .assign(&nac.mapv(|v| -v));
                self.nac.slice_mut(ndarray::s![i, j, .., ..]).assign(&nac);
            }
        }
    }
}
