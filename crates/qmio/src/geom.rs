//! Geometry file formats written next to program inputs

use std::fmt::Write;

use crate::{atom::BOHR_TO_ANG, molecule::Molecule};

/// XYZ file contents for `mol` in Å
pub fn xyz_string(mol: &Molecule) -> String {
    let mut ret = String::with_capacity(50 * (mol.nat() + 2));
    writeln!(ret, "{}", mol.nat()).unwrap();
    writeln!(ret).unwrap();
    for atom in &mol.atoms {
        let [x, y, z] = atom.scaled(BOHR_TO_ANG).coord();
        writeln!(ret, "{:<3}{:15.8}{:15.8}{:15.8}", atom.label(), x, y, z)
            .unwrap();
    }
    ret
}

/// DFTB+ GenFormat contents for `mol` in Å. With `cell`, the geometry is
/// written as a supercell (`S`) with the origin at the Γ point and an
/// orthorhombic lattice with axis lengths `cell`; otherwise as a cluster
/// (`C`)
pub fn gen_string(mol: &Molecule, cell: Option<[f64; 3]>) -> String {
    let types = mol.atom_types();
    let mut ret = String::with_capacity(50 * (mol.nat() + 6));
    let kind = if cell.is_some() { "S" } else { "C" };
    writeln!(ret, "{:5}  {kind}", mol.nat()).unwrap();
    writeln!(ret, "  {}", types.join(" ")).unwrap();
    for (i, atom) in mol.atoms.iter().enumerate() {
        let species = types
            .iter()
            .position(|&t| t == atom.label())
            .expect("atom types are built from the atoms")
            + 1;
        let [x, y, z] = atom.scaled(BOHR_TO_ANG).coord();
        writeln!(ret, "{:6} {species:3} {x:18.10} {y:18.10} {z:18.10}", i + 1)
            .unwrap();
    }
    if let Some([a, b, c]) = cell {
        let zero = 0.0;
        writeln!(ret, "{zero:15.8} {zero:15.8} {zero:15.8}").unwrap();
        writeln!(ret, "{a:15.8} {zero:15.8} {zero:15.8}").unwrap();
        writeln!(ret, "{zero:15.8} {b:15.8} {zero:15.8}").unwrap();
        writeln!(ret, "{zero:15.8} {zero:15.8} {c:15.8}").unwrap();
    }
    ret
}
