//! Adapters that run external quantum chemistry programs for a molecular
//! dynamics driver: each one writes the program's input decks, runs it in a
//! scratch directory, and reads energies, forces, and nonadiabatic couplings
//! back into a [molecule::Molecule]

pub mod atom;
pub mod geom;
pub mod molecule;
pub mod program;
pub mod runner;

pub use molecule::{Molecule, State};
pub use program::{Calculator, ConfigError, ProgramError};
