use std::{error::Error, fmt::Display, io, path::Path};

use ndarray::Array2;
use regex::Regex;

use crate::molecule::Molecule;

pub mod columbus;
pub mod dftbplus;
pub mod qchem;
pub mod turbomole;

/// Errors raised while constructing a calculator from its options. These are
/// always raised before any file is written
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// the program version is not one the input and output layouts are known
    /// for
    UnsupportedVersion(String),

    /// the option combination is valid for the program but not implemented
    /// here
    NotImplemented(String),

    /// an option value the program or method does not accept
    InvalidOption(String),

    /// an option was given with the wrong type, such as a number where a
    /// string is expected
    WrongType(String),

    /// no entry for element `0` in parameter table `1`
    MissingParameter(String, &'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnsupportedVersion(v) => {
                write!(f, "other versions not implemented: {v}")
            }
            ConfigError::NotImplemented(s) => write!(f, "not implemented: {s}"),
            ConfigError::InvalidOption(s) => write!(f, "invalid option: {s}"),
            ConfigError::WrongType(s) => write!(f, "wrong option type: {s}"),
            ConfigError::MissingParameter(elem, table) => {
                write!(f, "no {table} parameter for element {elem}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Errors raised while writing inputs, running the program, or reading its
/// output. Every variant is fatal to the current step
#[derive(Debug, PartialEq, Eq)]
pub enum ProgramError {
    FileNotFound(String),
    ReadFileError(String, io::ErrorKind),
    WriteFileError(String, io::ErrorKind),

    /// the program could not be started at all
    SpawnError(String, io::ErrorKind),

    /// the program exited unsuccessfully. the exit code is `None` if it was
    /// killed by a signal
    ExitFailure(String, Option<i32>),

    /// the section described by `0` was not found in file `1`
    PatternNotFound(String, String),

    /// the section described by `what` was found `found` times in `file`
    /// instead of `expected` times
    AmbiguousOutput {
        what: String,
        file: String,
        found: usize,
        expected: usize,
    },

    /// a field in file `1` could not be parsed as a number
    ParseError(String, String),

    /// the request itself was invalid, such as an empty `bo_list`
    Config(ConfigError),
}

impl From<ConfigError> for ProgramError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for ProgramError {}

/// A trait for adapters that compute Born-Oppenheimer quantities by running an
/// external program
pub trait Calculator {
    /// write the inputs for, run, and read the outputs of one calculation step
    /// on `molecule`, storing the energies, forces, and couplings back into
    /// it. `base_dir` holds the `QMRUN` scratch directory and the optional
    /// `QMlog` archive. `istep` is the current MD step, starting from -1 for
    /// the initial step, and `bo_list` holds the states whose forces are
    /// needed, the first being the running state. With `calc_force_only`, only
    /// the forces are recomputed
    fn get_bo(
        &mut self,
        molecule: &mut Molecule,
        base_dir: &Path,
        istep: isize,
        bo_list: &[usize],
        calc_force_only: bool,
    ) -> Result<(), ProgramError>;
}

/// check that `bo_list` is non-empty and names only states of `mol`, returning
/// the running state
pub(crate) fn running_state(
    mol: &Molecule,
    bo_list: &[usize],
) -> Result<usize, ConfigError> {
    let Some(&first) = bo_list.first() else {
        return Err(ConfigError::InvalidOption("empty bo_list".to_owned()));
    };
    if let Some(bad) = bo_list.iter().find(|&&s| s >= mol.nst()) {
        return Err(ConfigError::InvalidOption(format!(
            "state {bad} out of range for {} states",
            mol.nst()
        )));
    }
    Ok(first)
}

/// the scratch directory for calculations run under `base_dir`
pub fn scratch_dir(base_dir: &Path) -> std::path::PathBuf {
    base_dir.join("QMRUN")
}

/// create the scratch directory for a step. unless `calc_force_only`, any
/// existing scratch directory is removed first so that each full step starts
/// clean
pub(crate) fn prepare_scratch(
    base_dir: &Path,
    calc_force_only: bool,
) -> Result<std::path::PathBuf, ProgramError> {
    let dir = scratch_dir(base_dir);
    let name = dir.to_string_lossy().to_string();
    if !calc_force_only && dir.exists() {
        std::fs::remove_dir_all(&dir)
            .map_err(|e| ProgramError::WriteFileError(name.clone(), e.kind()))?;
    }
    std::fs::create_dir_all(&dir)
        .map_err(|e| ProgramError::WriteFileError(name, e.kind()))?;
    Ok(dir)
}

pub(crate) fn read_file(path: &Path) -> Result<String, ProgramError> {
    let name = path.to_string_lossy().to_string();
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ProgramError::FileNotFound(name),
        kind => ProgramError::ReadFileError(name, kind),
    })
}

pub(crate) fn write_file(
    path: &Path,
    contents: &str,
) -> Result<(), ProgramError> {
    std::fs::write(path, contents).map_err(|e| {
        ProgramError::WriteFileError(path.to_string_lossy().to_string(), e.kind())
    })
}

pub(crate) fn copy_file(from: &Path, to: &Path) -> Result<(), ProgramError> {
    std::fs::copy(from, to).map(|_| ()).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound if !from.exists() => {
            ProgramError::FileNotFound(from.to_string_lossy().to_string())
        }
        kind => ProgramError::WriteFileError(to.to_string_lossy().to_string(), kind),
    })
}

/// parses the `nth` field of `line` into a float, accepting Fortran `D`
/// exponents, and returns [ProgramError::ParseError] containing `outname` if it
/// fails or the field is missing
#[inline]
pub(crate) fn parse_float(
    line: &str,
    nth: usize,
    outname: &str,
) -> Result<f64, ProgramError> {
    line.split_whitespace()
        .nth(nth)
        .and_then(|s| s.replace(['D', 'd'], "E").parse::<f64>().ok())
        .ok_or_else(|| {
            ProgramError::ParseError(line.trim().to_owned(), outname.to_owned())
        })
}

/// parse `nat` consecutive rows of three numbers from `lines` into a `nat x 3`
/// array
pub(crate) fn read_vectors<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    nat: usize,
    what: &str,
    outname: &str,
) -> Result<Array2<f64>, ProgramError> {
    let mut ret = Array2::zeros((nat, 3));
    let mut lines = lines.into_iter();
    for i in 0..nat {
        let Some(line) = lines.next() else {
            return Err(ProgramError::PatternNotFound(
                format!("{what}: row {} of {nat}", i + 1),
                outname.to_owned(),
            ));
        };
        for j in 0..3 {
            ret[(i, j)] = parse_float(line, j, outname)?;
        }
    }
    Ok(ret)
}

/// collect every `nat x 3` block that directly follows a line matching
/// `header` in `contents`
pub(crate) fn vector_blocks(
    contents: &str,
    header: &Regex,
    nat: usize,
    what: &str,
    outname: &str,
) -> Result<Vec<Array2<f64>>, ProgramError> {
    let lines: Vec<&str> = contents.lines().collect();
    let mut ret = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if header.is_match(line) {
            ret.push(read_vectors(
                lines[i + 1..].iter().copied(),
                nat,
                what,
                outname,
            )?);
        }
    }
    Ok(ret)
}

/// return the single item in `items`, or an error describing how many were
/// found instead
pub(crate) fn exactly_one<T>(
    mut items: Vec<T>,
    what: &str,
    outname: &str,
) -> Result<T, ProgramError> {
    match items.len() {
        0 => Err(ProgramError::PatternNotFound(
            what.to_owned(),
            outname.to_owned(),
        )),
        1 => Ok(items.pop().unwrap()),
        found => Err(ProgramError::AmbiguousOutput {
            what: what.to_owned(),
            file: outname.to_owned(),
            found,
            expected: 1,
        }),
    }
}

/// check that exactly `expected` items were found, treating none at all as a
/// missing section
pub(crate) fn expect_count<T>(
    items: Vec<T>,
    expected: usize,
    what: &str,
    outname: &str,
) -> Result<Vec<T>, ProgramError> {
    match items.len() {
        n if n == expected => Ok(items),
        0 => Err(ProgramError::PatternNotFound(
            what.to_owned(),
            outname.to_owned(),
        )),
        found => Err(ProgramError::AmbiguousOutput {
            what: what.to_owned(),
            file: outname.to_owned(),
            found,
            expected,
        }),
    }
}
