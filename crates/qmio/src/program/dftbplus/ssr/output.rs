//! Reader for the REKS results printed to standard output by DFTB+ 19.1.
//!
//! The layout this expects:
//!
//! ```text
//!   State       Energy       FON(1)      FON(2)      Spin
//!    PPS       -4.07724020    1.951234    0.048766    0.000000
//!    OSS       -3.88515117    1.000000    1.000000    0.000000
//!
//!    SSR state  1       -4.07801534
//!    SSR state  2       -3.88437603
//!
//!  1 st state (SSR)          <- or ` 2 state (SA-REKS)` for one target state
//!       0.00000000     -0.01523412      0.00000000
//!  ...
//!  < 1 | 2 > non-adiabatic coupling
//!       0.31240512      0.00000000      0.00000000
//!  ...
//! ```
//!
//! Gradients are returned as printed; turning them into forces is up to the
//! caller.

use std::sync::OnceLock;

use log::trace;
use ndarray::Array2;
use regex::Regex;

use crate::program::{
    ProgramError, exactly_one, expect_count, parse_float, vector_blocks,
};

static CELL: OnceLock<[Regex; 3]> = OnceLock::new();

fn regexes() -> &'static [Regex; 3] {
    CELL.get_or_init(|| {
        trace!("initializing dftb+ reks regexes");
        [
            Regex::new(r"Spin\s*$").unwrap(),
            Regex::new(r"^\s*SSR state\s+\S+\s+\S+").unwrap(),
            Regex::new(r"non-adiabatic coupling\s*$").unwrap(),
        ]
    })
}

/// which table the state energies are read from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EnergySource {
    /// the microstate table ending in `Spin`: single-state REKS and SA-REKS
    StateTable,

    /// the `SSR state` lines
    SsrStates,
}

/// what to read from one log
#[derive(Clone, Copy, Debug)]
pub(crate) struct Request {
    pub nat: usize,
    pub nst: usize,
    /// `None` when energies are not needed
    pub energies: Option<EnergySource>,
    /// read the gradients of every state and the couplings; otherwise read
    /// only the gradient of `target`
    pub couplings: bool,
    pub target: usize,
    /// skip the couplings even when `couplings` is set
    pub force_only: bool,
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct ReksOutput {
    pub energies: Option<Vec<f64>>,
    /// (state index, gradient)
    pub gradients: Vec<(usize, Array2<f64>)>,
    /// one per unordered state pair `(i < j)` in row-major order
    pub couplings: Option<Vec<Array2<f64>>>,
}

pub(crate) fn read(
    contents: &str,
    req: &Request,
    outname: &str,
) -> Result<ReksOutput, ProgramError> {
    let energies = match req.energies {
        Some(EnergySource::StateTable) => {
            Some(state_table_energies(contents, req.nst, outname)?)
        }
        Some(EnergySource::SsrStates) => {
            Some(ssr_energies(contents, req.nst, outname)?)
        }
        None => None,
    };

    let gradients = if req.couplings {
        (0..req.nst)
            .map(|i| {
                ssr_gradient(contents, i, req.nat, outname).map(|g| (i, g))
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![(
            req.target,
            target_gradient(contents, req.target, req.nat, outname)?,
        )]
    };

    let nacs = if req.couplings && !req.force_only {
        Some(couplings(contents, req.nst, req.nat, outname)?)
    } else {
        None
    };

    Ok(ReksOutput {
        energies,
        gradients,
        couplings: nacs,
    })
}

/// energies from the single table whose header ends in `Spin`
pub(crate) fn state_table_energies(
    contents: &str,
    nst: usize,
    outname: &str,
) -> Result<Vec<f64>, ProgramError> {
    let [table_re, _, _] = regexes();
    let lines: Vec<&str> = contents.lines().collect();
    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| table_re.is_match(l).then_some(i))
        .collect();
    let start = exactly_one(starts, "REKS state table", outname)?;
    let mut ret = Vec::with_capacity(nst);
    for i in 0..nst {
        let Some(line) = lines.get(start + 1 + i) else {
            return Err(ProgramError::PatternNotFound(
                format!("REKS state table: row {} of {nst}", i + 1),
                outname.to_owned(),
            ));
        };
        // label, energy, two occupations and the spin
        if line.split_whitespace().count() < 5 {
            return Err(ProgramError::PatternNotFound(
                format!("REKS state table: row {} of {nst}", i + 1),
                outname.to_owned(),
            ));
        }
        ret.push(parse_float(line, 1, outname)?);
    }
    Ok(ret)
}

/// energies from the `SSR state <i> <energy>` lines
pub(crate) fn ssr_energies(
    contents: &str,
    nst: usize,
    outname: &str,
) -> Result<Vec<f64>, ProgramError> {
    let [_, ssr_re, _] = regexes();
    let lines: Vec<&str> =
        contents.lines().filter(|l| ssr_re.is_match(l)).collect();
    expect_count(lines, nst, "SSR state energies", outname)?
        .into_iter()
        .map(|l| parse_float(l, 3, outname))
        .collect()
}

/// the gradient block printed for every state when couplings are computed
pub(crate) fn ssr_gradient(
    contents: &str,
    state: usize,
    nat: usize,
    outname: &str,
) -> Result<Array2<f64>, ProgramError> {
    let what = format!("gradient of SSR state {}", state + 1);
    let header = Regex::new(&format!(r" {} st state \(SSR\)\s*$", state + 1))
        .expect("valid regex");
    let blocks = vector_blocks(contents, &header, nat, &what, outname)?;
    exactly_one(blocks, &what, outname)
}

/// the gradient block of the single target state, labeled with the method
/// name, like ` 2 state (SA-REKS)`
pub(crate) fn target_gradient(
    contents: &str,
    state: usize,
    nat: usize,
    outname: &str,
) -> Result<Array2<f64>, ProgramError> {
    let what = format!("gradient of state {}", state + 1);
    let header = Regex::new(&format!(r" {} state \(\w+-*\w+\)\s*$", state + 1))
        .expect("valid regex");
    let blocks = vector_blocks(contents, &header, nat, &what, outname)?;
    exactly_one(blocks, &what, outname)
}

pub(crate) fn couplings(
    contents: &str,
    nst: usize,
    nat: usize,
    outname: &str,
) -> Result<Vec<Array2<f64>>, ProgramError> {
    let [_, _, nac_re] = regexes();
    let blocks = vector_blocks(
        contents,
        nac_re,
        nat,
        "non-adiabatic coupling",
        outname,
    )?;
    expect_count(blocks, nst * (nst - 1) / 2, "non-adiabatic couplings", outname)
}
