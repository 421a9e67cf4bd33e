use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Serialize};

/// Å per bohr
pub const BOHR_TO_ANG: f64 = 0.529177249;

/// bohr per Å
pub const ANG_TO_BOHR: f64 = 1.0 / BOHR_TO_ANG;

/// element symbols and standard atomic masses in amu, indexed by atomic number
const ELEMENTS: [(&str, f64); 37] = [
    ("X", 0.0),
    ("H", 1.008),
    ("He", 4.0026),
    ("Li", 6.94),
    ("Be", 9.0122),
    ("B", 10.81),
    ("C", 12.011),
    ("N", 14.007),
    ("O", 15.999),
    ("F", 18.998),
    ("Ne", 20.180),
    ("Na", 22.990),
    ("Mg", 24.305),
    ("Al", 26.982),
    ("Si", 28.085),
    ("P", 30.974),
    ("S", 32.06),
    ("Cl", 35.45),
    ("Ar", 39.948),
    ("K", 39.098),
    ("Ca", 40.078),
    ("Sc", 44.956),
    ("Ti", 47.867),
    ("V", 50.942),
    ("Cr", 51.996),
    ("Mn", 54.938),
    ("Fe", 55.845),
    ("Co", 58.933),
    ("Ni", 58.693),
    ("Cu", 63.546),
    ("Zn", 65.38),
    ("Ga", 69.723),
    ("Ge", 72.630),
    ("As", 74.922),
    ("Se", 78.971),
    ("Br", 79.904),
    ("Kr", 83.798),
];

/// look up the atomic number for `label`, ignoring case
pub fn atomic_number(label: &str) -> Option<usize> {
    ELEMENTS
        .iter()
        .skip(1)
        .position(|(sym, _)| sym.eq_ignore_ascii_case(label))
        .map(|i| i + 1)
}

/// An atom in a [crate::molecule::Molecule]. Coordinates are in bohr once the
/// atom is part of a molecule, but [FromStr] and [Atom::new_from_label] store
/// whatever numbers they are given
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub atomic_number: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Atom {
    pub fn new(atomic_number: usize, x: f64, y: f64, z: f64) -> Self {
        Self {
            atomic_number,
            x,
            y,
            z,
        }
    }

    /// returns `None` if `label` is not a known element symbol
    pub fn new_from_label(label: &str, x: f64, y: f64, z: f64) -> Option<Self> {
        atomic_number(label).map(|n| Self::new(n, x, y, z))
    }

    pub fn label(&self) -> &'static str {
        ELEMENTS[self.atomic_number].0
    }

    /// standard atomic mass in amu
    pub fn mass(&self) -> f64 {
        ELEMENTS[self.atomic_number].1
    }

    pub fn coord(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// a copy of `self` with every coordinate multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
            ..*self
        }
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:2} {:15.10} {:15.10} {:15.10}",
            self.label(),
            self.x,
            self.y,
            self.z
        )
    }
}

impl FromStr for Atom {
    type Err = io::Error;

    /// parse an Atom from a line like
    ///  C 1.0 1.0 1.0
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(io::Error::other("wrong number of fields in Atom"));
        }
        let coord = fields[1..]
            .iter()
            .map(|s| s.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                io::Error::other("failed to parse coordinate field as f64")
            })?;
        Self::new_from_label(fields[0], coord[0], coord[1], coord[2]).ok_or_else(
            || io::Error::other(format!("unknown element `{}`", fields[0])),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(atomic_number("c"), Some(6));
        assert_eq!(atomic_number("Cl"), Some(17));
        assert_eq!(atomic_number("X"), None);
        assert_eq!(atomic_number("Xx"), None);
        assert_eq!(Atom::new(8, 0.0, 0.0, 0.0).label(), "O");
    }

    #[test]
    fn from_str() {
        let got: Atom = " O   0.0  -0.71603315   1.5 ".parse().unwrap();
        assert_eq!(got, Atom::new(8, 0.0, -0.71603315, 1.5));

        assert!("Q 0.0 0.0 0.0".parse::<Atom>().is_err());
        assert!("H 0.0 0.0".parse::<Atom>().is_err());
        assert!("H 0.0 zero 0.0".parse::<Atom>().is_err());
    }
}
