//! Per-element DFTB parameters spliced into `dftb_in.hsd`

use crate::program::ConfigError;

/// shell-resolved atomic spin constants W, in the order ss sp ps pp (sd ...)
const SPIN_W: [(&str, &[f64]); 8] = [
    ("H", &[-0.07174]),
    ("C", &[-0.03062, -0.02505, -0.02505, -0.02265]),
    ("N", &[-0.03318, -0.02755, -0.02755, -0.02545]),
    ("O", &[-0.03524, -0.02956, -0.02956, -0.02785]),
    ("F", &[-0.03691, -0.03133, -0.03133, -0.02982]),
    ("P", &[-0.02069, -0.01634, -0.01634, -0.01452]),
    ("S", &[-0.02137, -0.01699, -0.01699, -0.01549]),
    ("Cl", &[-0.02213, -0.01775, -0.01775, -0.01615]),
];

/// onsite correction constants for parallel spins, shell-resolved
const ONSITE_UU: [(&str, &[f64]); 5] = [
    ("H", &[0.0]),
    ("C", &[0.0, 0.04973, 0.04973, -0.01203]),
    ("N", &[0.0, 0.06816, 0.06816, -0.00879]),
    ("O", &[0.0, 0.08672, 0.08672, -0.00523]),
    ("S", &[0.0, 0.03254, 0.03254, -0.00763]),
];

/// onsite correction constants for antiparallel spins, shell-resolved
const ONSITE_UD: [(&str, &[f64]); 5] = [
    ("H", &[0.0]),
    ("C", &[0.0, 0.10512, 0.10512, 0.02643]),
    ("N", &[0.0, 0.12770, 0.12770, 0.03246]),
    ("O", &[0.0, 0.14969, 0.14969, 0.03834]),
    ("S", &[0.0, 0.06765, 0.06765, 0.01883]),
];

const MAX_L: [(&str, &str); 8] = [
    ("H", "s"),
    ("C", "p"),
    ("N", "p"),
    ("O", "p"),
    ("F", "p"),
    ("P", "d"),
    ("S", "d"),
    ("Cl", "d"),
];

fn lookup<T: Copy>(
    table: &[(&str, T)],
    elem: &str,
    name: &'static str,
) -> Result<T, ConfigError> {
    table
        .iter()
        .find(|(e, _)| *e == elem)
        .map(|(_, v)| *v)
        .ok_or_else(|| ConfigError::MissingParameter(elem.to_owned(), name))
}

/// `v` to at most 8 decimal places, without trailing zeros
fn format_param(v: f64) -> String {
    let s = format!("{v:.8}");
    s.trim_end_matches('0').trim_end_matches('.').to_owned()
}

fn join(vals: &[f64], scale: f64) -> String {
    vals.iter()
        .map(|v| format_param(v * scale))
        .collect::<Vec<_>>()
        .join(" ")
}

/// the spin constants for `elem` multiplied by `tuning`, formatted for an HSD
/// value list
pub(crate) fn spin_constants(
    elem: &str,
    tuning: f64,
) -> Result<String, ConfigError> {
    lookup(&SPIN_W, elem, "spin constant").map(|w| join(w, tuning))
}

/// the `uu` and `ud` onsite correction constants for `elem`
pub(crate) fn onsite_constants(
    elem: &str,
) -> Result<(String, String), ConfigError> {
    let uu = lookup(&ONSITE_UU, elem, "onsite uu")?;
    let ud = lookup(&ONSITE_UD, elem, "onsite ud")?;
    Ok((join(uu, 1.0), join(ud, 1.0)))
}

pub(crate) fn max_angular_momentum(
    elem: &str,
) -> Result<&'static str, ConfigError> {
    lookup(&MAX_L, elem, "max angular momentum")
}
