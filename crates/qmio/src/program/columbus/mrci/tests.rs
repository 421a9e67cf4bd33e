use std::{fs::read_to_string, io, os::unix::fs::PermissionsExt, path::Path};

use approx::assert_abs_diff_eq;
use ndarray::array;

use super::*;
use crate::atom::Atom;

fn water(nst: usize) -> Molecule {
    Molecule::new(
        vec![
            Atom::new(8, 0.0, -1.35311169, 0.0),
            Atom::new(1, 0.0, -0.26834600, 1.47104476),
            Atom::new(1, 0.0, -0.26834600, -1.47104476),
        ],
        0,
        nst,
    )
}

fn testfile(name: &str) -> String {
    read_to_string(format!("testfiles/columbus/{name}")).unwrap()
}

#[test]
fn orbitals() {
    let mol = water(2);
    let mrci = Mrci::new(MrciOptions::default(), &mol).unwrap();
    assert_eq!(
        mrci.orbitals(),
        Orbitals {
            docc: 5,
            closed: 4,
            internal: 6
        }
    );
    assert!(!mrci.needs_overlap_nacme());
    assert!(mrci.re_calc());

    let mrci = Mrci::new(
        MrciOptions {
            active_elec: 4,
            active_orb: 3,
            frozen_core_orb: 1,
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    assert_eq!(
        mrci.orbitals(),
        Orbitals {
            docc: 5,
            closed: 3,
            internal: 5
        }
    );
}

#[test]
fn config_errors() {
    let mol = water(2);
    let new = |opts| Mrci::new(opts, &mol).map(|_| ());
    assert!(matches!(
        new(MrciOptions {
            guess: "huckel".to_owned(),
            ..Default::default()
        }),
        Err(ConfigError::InvalidOption(_))
    ));
    assert!(matches!(
        new(MrciOptions {
            guess: "read".to_owned(),
            skip_mcscf: true,
            ..Default::default()
        }),
        Err(ConfigError::InvalidOption(_))
    ));
    assert_eq!(
        new(MrciOptions {
            skip_mcscf: true,
            ..Default::default()
        }),
        Ok(())
    );
    assert!(matches!(
        new(MrciOptions {
            active_elec: 12,
            ..Default::default()
        }),
        Err(ConfigError::InvalidOption(_))
    ));
    assert!(matches!(
        new(MrciOptions {
            version: "6.0".to_owned(),
            ..Default::default()
        }),
        Err(ConfigError::UnsupportedVersion(_))
    ));

    let mut cation = water(2);
    cation.charge = 1;
    assert!(matches!(
        Mrci::new(MrciOptions::default(), &cation),
        Err(ConfigError::NotImplemented(_))
    ));
}

#[test]
fn geom() {
    assert_eq!(
        Mrci::geom(&water(1)),
        " O       8.00     0.00000000    -1.35311169     0.00000000    15.99900000
 H       1.00     0.00000000    -0.26834600     1.47104476     1.00800000
 H       1.00     0.00000000    -0.26834600    -1.47104476     1.00800000
"
    );
}

#[test]
fn transmomin() {
    assert_eq!(
        Mrci::transmomin(3, &[1], false),
        "CI\n1  2  1  2\n1  1  1  2\n1  1  1  3\n1  2  1  3\n"
    );
    assert_eq!(Mrci::transmomin(3, &[1], true), "CI\n1  2  1  2\n");
}

#[test]
fn patch_mcscfin() {
    let mol = water(2);
    let mrci = Mrci::new(
        MrciOptions {
            mcscf_max_iter: 60,
            mcscf_en_tol: 10,
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    let got = mrci.patch_mcscfin(&testfile("input/mcscfin"), 2).unwrap();
    assert_eq!(
        got,
        " &input
  niter=60,
  nmiter=50,
  nciitr=300,
  tol(3)=1.e-4,
  tol(2)=1.e-4,
  tol(1)=1.e-10,
  NSTATE=0,
  npath=1,3,9,10,13,17,19,21,-11,12, 2,30
  ncoupl=5,
  tol(9)=1.e-3,
  FCIORB=  1,5,20,1,6,20
  NAVST(1) = 2,
  WAVST(1,1)=1 ,
  WAVST(1,2)=1 ,
 &end
"
    );
    assert!(matches!(
        mrci.patch_mcscfin(" &end\n", 2),
        Err(ProgramError::PatternNotFound(..))
    ));
}

#[test]
fn patch_cigrdin() {
    let mol = water(1);
    let mrci = Mrci::new(
        MrciOptions {
            cpscf_max_iter: 250,
            cpscf_grad_tol: 7,
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    let got = mrci.patch_cigrdin(&testfile("input/cigrdin"));
    let lines: Vec<&str> = got.lines().collect();
    assert_eq!(lines.len(), 11);
    assert_eq!(lines[1], " nmiter= 250, print=0, fresdd=1,");
    assert_eq!(lines[5], " rtol=1e-7, dtol=1e-6,");
    assert_eq!(lines[6], " wndtol=1e-7,wnatol=1e-7,wnvtol=1e-7");
}

#[test]
fn energies() {
    let got = read_energies(&testfile("LISTINGS/mcscfsm.sp"), 2, "mcscfsm.sp")
        .unwrap();
    assert_eq!(got, vec![-76.056122313, -76.002989934]);
    assert!(matches!(
        read_energies(&testfile("LISTINGS/mcscfsm.sp"), 3, "mcscfsm.sp"),
        Err(ProgramError::AmbiguousOutput {
            found: 2,
            expected: 3,
            ..
        })
    ));
    assert!(matches!(
        read_energies("no energies here", 1, "mcscfsm.sp"),
        Err(ProgramError::PatternNotFound(..))
    ));
}

#[test]
fn cartgrd() {
    let got = read_cartgrd(
        &testfile("GRADIENTS/cartgrd.drt1.state1.sp"),
        3,
        "cartgrd",
    )
    .unwrap();
    assert_abs_diff_eq!(
        got,
        array![
            [0.0, -0.0152341, 0.0],
            [0.0, 0.00761706, 0.0124568],
            [0.0, 0.00761706, -0.0124568],
        ],
        epsilon = 1e-12
    );
    assert!(matches!(
        read_cartgrd(&testfile("GRADIENTS/cartgrd.drt1.state1.sp"), 2, "c"),
        Err(ProgramError::AmbiguousOutput { .. })
    ));
    assert!(matches!(
        read_cartgrd(&testfile("GRADIENTS/cartgrd.drt1.state1.sp"), 4, "c"),
        Err(ProgramError::PatternNotFound(..))
    ));
}

#[test]
fn extract() {
    let mut mol = water(2);
    let mrci = Mrci::new(
        MrciOptions {
            calc_coupling: true,
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    mrci.extract(&mut mol, Path::new("testfiles/columbus"), &[1], false)
        .unwrap();
    assert_abs_diff_eq!(mol.states[0].energy, -76.056122313);
    assert_abs_diff_eq!(mol.states[1].energy, -76.002989934);
    assert_abs_diff_eq!(mol.states[1].force[[0, 1]], -0.0223141, epsilon = 1e-12);
    assert_abs_diff_eq!(mol.states[0].force[[0, 1]], 0.0);
    assert_abs_diff_eq!(mol.nac[[0, 1, 0, 0]], 0.312405, epsilon = 1e-12);
    assert_abs_diff_eq!(mol.nac[[1, 0, 1, 0]], 0.156203, epsilon = 1e-12);
    assert_abs_diff_eq!(mol.nac[[1, 1, 0, 0]], 0.0);
}

#[test]
fn extract_missing_gradient() {
    let mut mol = water(3);
    let before = mol.clone();
    let mrci = Mrci::new(MrciOptions::default(), &mol).unwrap();
    let got =
        mrci.extract(&mut mol, Path::new("testfiles/columbus"), &[2], true);
    assert!(matches!(got, Err(ProgramError::FileNotFound(_))));
    assert_eq!(mol, before);
}

/// write an executable `runc` into `bin` that produces the listings of a
/// finished state-averaged run
fn fake_runc(bin: &Path) {
    let path = bin.join("runc");
    let src = Path::new("testfiles/columbus").canonicalize().unwrap();
    std::fs::write(
        &path,
        format!(
            "#!/bin/sh
test -f geom && test -f transmomin && test -f daltcomm.new || exit 3
cp -r {src}/LISTINGS {src}/GRADIENTS .
mkdir -p WORK MOCOEFS
echo orbitals > MOCOEFS/mocoef_mc.sp
echo runc \"$@\"
",
            src = src.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .unwrap();
}

fn run_step(
    mrci: &mut Mrci,
    mol: &mut Molecule,
    base: &Path,
    istep: isize,
    bo_list: &[usize],
    force_only: bool,
) -> Result<(), ProgramError> {
    for _ in 0..10 {
        match mrci.get_bo(mol, base, istep, bo_list, force_only) {
            Err(ProgramError::SpawnError(_, io::ErrorKind::ExecutableFileBusy)) => {
                std::thread::sleep(std::time::Duration::from_millis(50))
            }
            res => return res,
        }
    }
    mrci.get_bo(mol, base, istep, bo_list, force_only)
}

#[test]
fn get_bo() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    fake_runc(&bin);
    std::fs::create_dir(tmp.path().join("QMlog")).unwrap();

    let mut mol = water(2);
    let mut mrci = Mrci::new(
        MrciOptions {
            guess: "read".to_owned(),
            guess_file: tmp.path().join("missing").to_string_lossy().to_string(),
            calc_coupling: true,
            input_dir: Path::new("testfiles/columbus/input")
                .canonicalize()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            qm_path: bin.to_string_lossy().to_string(),
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    run_step(&mut mrci, &mut mol, tmp.path(), -1, &[0], false).unwrap();

    let scratch = tmp.path().join("QMRUN");
    assert!(!scratch.join("WORK").exists());
    assert_eq!(
        read_to_string(scratch.join("mcscfin.old")).unwrap(),
        testfile("input/mcscfin")
    );
    assert!(
        read_to_string(scratch.join("mcscfin"))
            .unwrap()
            .contains("  WAVST(1,2)=1 ,\n")
    );
    assert_eq!(
        read_to_string(tmp.path().join("QMlog/runls.0.0")).unwrap(),
        "runc -m 500\n"
    );
    assert_abs_diff_eq!(mol.states[1].energy, -76.002989934);
    assert_abs_diff_eq!(mol.states[0].force[[0, 1]], 0.0152341, epsilon = 1e-12);
    assert_abs_diff_eq!(mol.nac[[1, 0, 0, 0]], -0.312405, epsilon = 1e-12);

    // the orbitals of the last step seed the next one
    run_step(&mut mrci, &mut mol, tmp.path(), 0, &[1], false).unwrap();
    assert_eq!(
        read_to_string(scratch.join("mocoef")).unwrap(),
        "orbitals\n"
    );
    assert!(!tmp.path().join("mocoef").exists());

    run_step(&mut mrci, &mut mol, tmp.path(), 0, &[0], true).unwrap();
    assert_eq!(
        read_to_string(scratch.join("transmomin")).unwrap(),
        "CI\n1  1  1  1\n"
    );
    assert!(tmp.path().join("QMlog/runls.1.0").exists());
}
