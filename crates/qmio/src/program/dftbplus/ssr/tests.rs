use std::{fs::read_to_string, io, os::unix::fs::PermissionsExt, path::Path};

use approx::assert_abs_diff_eq;
use insta::assert_snapshot;
use ndarray::{Array2, array, s};
use test_case::test_case;

use super::*;
use crate::program::scratch_dir;

const WATER: &str = "    3
Geometry Step: 9
    O      0.00000000     -0.71603315      0.00000000
    H      0.00000000     -0.14200298      0.77844804
    H     -0.00000000     -0.14200298     -0.77844804
";

fn water(nst: usize) -> Molecule {
    Molecule::from_xyz(WATER, 0, nst).unwrap()
}

fn g1() -> Array2<f64> {
    array![
        [0.0, -0.01523412, 0.0],
        [0.0, 0.00761706, 0.01245677],
        [0.0, 0.00761706, -0.01245677],
    ]
}

fn g2() -> Array2<f64> {
    array![
        [0.0, 0.02231405, 0.0],
        [0.0, -0.01115702, 0.03312008],
        [0.0, -0.01115702, -0.03312008],
    ]
}

fn g3() -> Array2<f64> {
    array![
        [0.0, 0.04187731, 0.0],
        [0.0, -0.02093865, 0.05120334],
        [0.0, -0.02093865, -0.05120334],
    ]
}

fn log(name: &str) -> String {
    read_to_string(format!("testfiles/dftb+/{name}")).unwrap()
}

fn coupled() -> SsrOptions {
    SsrOptions {
        calc_coupling: true,
        ..Default::default()
    }
}

#[test]
fn render() {
    let mol = water(1);
    let ssr = Ssr::new(SsrOptions::default(), &mol).unwrap();
    let got = ssr.render(&mol, 0);
    assert_eq!(got, ssr.render(&mol, 0));
    assert_snapshot!(got, @r"
    Geometry = GenFormat{
      <<< 'geometry.gen'
    }
    Hamiltonian = DFTB{
      SCC = Yes
      SCCTolerance = 1e-6
      MaxSCCIterations = 1000
      SpinConstants = {
        ShellResolvedSpin = Yes
        O = { -0.03524 -0.02956 -0.02956 -0.02785 }
        H = { -0.07174 }
      }
      RangeSeparated = LC{
        Screening = NeighbourBased{}
      }
      Charge = 0
      MaxAngularMomentum = {
        O = 'p'
        H = 's'
      }
      SlaterKosterFiles = Type2FileNames{
        Prefix = './'
        Separator = '-'
        Suffix = '.skf'
        LowerCaseTypeName = No
      }
    }
    Analysis = {
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
    REKS = SSR22{
      EnergyFunctional = 1
      EnergyLevel = 1
      useSSRstate = 1
      TargetState = 1
      TargetStateL = 0
      InitialGuess = 1
      FONmaxIter = 50
      shift = 0.3
      GradientLevel = 1
      CGmaxIter = 100
      GradientTolerance = 1e-8
      RelaxedDensity = No
      NonAdiabaticCoupling = No
      PrintLevel = 1
      MemoryLevel = 2
    }
    ParserOptions = {
      ParserVersion = 7
    }
    ");
}

#[test]
fn render_three_states() {
    let mol = water(3);
    let ssr = Ssr::new(coupled(), &mol).unwrap();
    let got = ssr.render(&mol, 2);
    for want in [
        "  EnergyFunctional = 2\n",
        "  EnergyLevel = 2\n",
        "  TargetState = 3\n",
        "  NonAdiabaticCoupling = Yes\n",
    ] {
        assert!(got.contains(want), "missing {want:?} in\n{got}");
    }
}

#[test]
fn render_options() {
    let mut mol = water(2);
    mol.charge = -1;
    let ssr = Ssr::new(
        SsrOptions {
            ocdftb: true,
            lc_method: "MM".to_owned(),
            use_ssr_state: false,
            calc_coupling: true,
            periodic: true,
            a_axis: 10.0,
            b_axis: 10.0,
            c_axis: 10.0,
            tuning: 2.0,
            sk_path: "/skf/mio-1-1/".to_owned(),
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    let got = ssr.render(&mol, 1);
    for want in [
        "    Screening = MatrixBased{}\n",
        "  OnsiteCorrection = {
    Ouu = { 0 0.08672 0.08672 -0.00523 }
    Huu = { 0 }
    Oud = { 0 0.14969 0.14969 0.03834 }
    Hud = { 0 }
  }
",
        "    H = { -0.14348 }\n",
        "  KPointsAndWeights = {\n    0.0 0.0 0.0 1.0\n  }\n",
        "  Charge = -1\n",
        "    Prefix = '/skf/mio-1-1/'\n",
        "  useSSRstate = 0\n",
        "  NonAdiabaticCoupling = No\n",
    ] {
        assert!(got.contains(want), "missing {want:?} in\n{got}");
    }
}

#[test]
fn render_without_scc() {
    let mol = water(1);
    let ssr = Ssr::new(
        SsrOptions {
            scc: false,
            ocdftb: true,
            lc_method: "unused".to_owned(),
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    let got = ssr.render(&mol, 0);
    for unwanted in ["SCC", "SpinConstants", "RangeSeparated", "Onsite"] {
        assert!(!got.contains(unwanted), "found {unwanted:?} in\n{got}");
    }
}

#[test_case(1 => (1, 1))]
#[test_case(2 => (2, 1))]
#[test_case(3 => (2, 2))]
#[test_case(4 => (2, 2))]
fn functional(nst: usize) -> (usize, usize) {
    energy_functional(nst)
}

#[test]
fn flags() {
    let mol = water(2);
    let ssr = Ssr::new(coupled(), &mol).unwrap();
    assert!(ssr.nac_enabled(2));
    assert!(!ssr.nac_enabled(1));
    assert!(!ssr.needs_overlap_nacme());
    assert!(!ssr.re_calc(2));

    let ssr = Ssr::new(
        SsrOptions {
            use_ssr_state: false,
            ..coupled()
        },
        &mol,
    )
    .unwrap();
    assert!(!ssr.nac_enabled(2));
    assert!(ssr.needs_overlap_nacme());
    assert!(ssr.re_calc(2));
    assert!(!ssr.re_calc(1));
}

#[test]
fn config_errors() {
    let mol = water(1);
    let new = |opts| Ssr::new(opts, &mol).map(|_| ());
    assert!(matches!(
        new(SsrOptions {
            ssr22: false,
            ..Default::default()
        }),
        Err(ConfigError::NotImplemented(_))
    ));
    assert!(matches!(
        new(SsrOptions {
            guess: 2,
            ..Default::default()
        }),
        Err(ConfigError::NotImplemented(_))
    ));
    assert!(matches!(
        new(SsrOptions {
            guess: 3,
            ..Default::default()
        }),
        Err(ConfigError::InvalidOption(_))
    ));
    assert!(matches!(
        new(SsrOptions {
            lc_method: "XX".to_owned(),
            ..Default::default()
        }),
        Err(ConfigError::InvalidOption(_))
    ));
    assert_eq!(
        new(SsrOptions {
            lcdftb: false,
            lc_method: "XX".to_owned(),
            ..Default::default()
        }),
        Ok(())
    );
    assert!(matches!(
        new(SsrOptions {
            version: 18.2,
            ..Default::default()
        }),
        Err(ConfigError::UnsupportedVersion(_))
    ));

    let iron = Molecule::from_xyz("Fe 0 0 0\n", 0, 1).unwrap();
    assert_eq!(
        Ssr::new(SsrOptions::default(), &iron),
        Err(ConfigError::MissingParameter(
            "Fe".to_owned(),
            "spin constant"
        ))
    );
    // only the tables for enabled corrections are consulted
    let fluorine = Molecule::from_xyz("F 0 0 0\n", -1, 1).unwrap();
    assert!(Ssr::new(SsrOptions::default(), &fluorine).is_ok());
    assert!(matches!(
        Ssr::new(
            SsrOptions {
                ocdftb: true,
                ..Default::default()
            },
            &fluorine
        ),
        Err(ConfigError::MissingParameter(..))
    ));
}

#[test]
fn extract_single_state() {
    let mut mol = water(1);
    mol.nac.fill(1.0);
    let ssr = Ssr::new(SsrOptions::default(), &mol).unwrap();
    ssr.extract(&mut mol, &log("single.log"), "single.log", 0, false)
        .unwrap();
    assert_abs_diff_eq!(mol.states[0].energy, -4.07724020);
    assert_abs_diff_eq!(mol.states[0].force, -g1());
    // no couplings were requested, so the array is left alone
    assert_abs_diff_eq!(mol.nac.sum(), 9.0);
}

#[test]
fn extract_sareks() {
    let mut mol = water(2);
    mol.states[0].force.fill(3.0);
    let ssr = Ssr::new(
        SsrOptions {
            use_ssr_state: false,
            ..coupled()
        },
        &mol,
    )
    .unwrap();
    ssr.extract(&mut mol, &log("sareks.log"), "sareks.log", 1, false)
        .unwrap();
    assert_abs_diff_eq!(mol.states[0].energy, -4.07724020);
    assert_abs_diff_eq!(mol.states[1].energy, -3.88515117);
    assert_abs_diff_eq!(mol.states[0].force, Array2::zeros((3, 3)));
    assert_abs_diff_eq!(mol.states[1].force, -g2());
}

#[test]
fn extract_ssr_target() {
    let mut mol = water(2);
    let ssr = Ssr::new(SsrOptions::default(), &mol).unwrap();
    ssr.extract(&mut mol, &log("ssr2.log"), "ssr2.log", 0, false)
        .unwrap();
    assert_abs_diff_eq!(mol.states[0].energy, -4.07801534);
    assert_abs_diff_eq!(mol.states[1].energy, -3.88437603);
    assert_abs_diff_eq!(mol.states[0].force, -g1());
    assert_abs_diff_eq!(mol.states[1].force, Array2::zeros((3, 3)));
}

#[test]
fn extract_couplings() {
    let mut mol = water(3);
    let ssr = Ssr::new(coupled(), &mol).unwrap();
    ssr.extract(&mut mol, &log("ssr3.log"), "ssr3.log", 1, false)
        .unwrap();
    let energies: Vec<f64> = mol.states.iter().map(|s| s.energy).collect();
    assert_abs_diff_eq!(
        energies.as_slice(),
        [-4.07801534, -3.88437603, -3.60997841].as_slice()
    );
    for (state, g) in mol.states.iter().zip([g1(), g2(), g3()]) {
        assert_abs_diff_eq!(state.force, -g);
    }
    assert_abs_diff_eq!(
        mol.nac.slice(s![0, 1, .., ..]),
        array![[0.31240512, 0.0, 0.0], [-0.15620256, 0.0, 0.0], [-0.15620256, 0.0, 0.0]]
    );
    assert_abs_diff_eq!(mol.nac[[2, 1, 2, 0]], -0.41005717);
    assert_abs_diff_eq!(mol.nac[[2, 0, 1, 2]], -0.01784511);
    for i in 0..3 {
        assert_abs_diff_eq!(mol.nac.slice(s![i, i, .., ..]).sum(), 0.0);
    }
}

#[test]
fn extract_force_only() {
    let mut mol = water(3);
    for state in mol.states.iter_mut() {
        state.energy = 1.0;
        state.force.fill(5.0);
    }
    mol.nac.fill(2.0);
    let ssr = Ssr::new(coupled(), &mol).unwrap();
    ssr.extract(&mut mol, &log("ssr3.log"), "ssr3.log", 0, true)
        .unwrap();
    for (state, g) in mol.states.iter().zip([g1(), g2(), g3()]) {
        assert_eq!(state.energy, 1.0);
        assert_abs_diff_eq!(state.force, -g);
    }
    assert_eq!(mol.nac.sum(), 2.0 * 27.0 * 3.0);
}

#[test]
fn missing_section() {
    let mut mol = water(3);
    let before = mol.clone();
    let ssr = Ssr::new(coupled(), &mol).unwrap();
    let got = ssr.extract(&mut mol, &log("ssr2.log"), "ssr2.log", 0, false);
    assert!(matches!(got, Err(ProgramError::AmbiguousOutput { .. })));
    assert_eq!(mol, before);

    let mut mol = water(2);
    let got = ssr.extract(&mut mol, &log("sareks.log"), "sareks.log", 0, false);
    assert!(
        matches!(got, Err(ProgramError::PatternNotFound(..))),
        "{got:?}"
    );
}

#[test]
fn duplicate_sections() {
    let mut mol = water(2);
    let ssr = Ssr::new(SsrOptions::default(), &mol).unwrap();
    let contents = log("ssr2.log").repeat(2);
    assert_eq!(
        ssr.extract(&mut mol, &contents, "log", 0, false),
        Err(ProgramError::AmbiguousOutput {
            what: "SSR state energies".to_owned(),
            file: "log".to_owned(),
            found: 4,
            expected: 2,
        })
    );

    let mut mol = water(1);
    let contents = log("single.log").repeat(2);
    assert!(matches!(
        ssr.extract(&mut mol, &contents, "log", 0, false),
        Err(ProgramError::AmbiguousOutput { found: 2, .. })
    ));
}

/// write an executable `dftb+` into `bin` that prints `log` and records its
/// environment
fn fake_dftb(bin: &Path, log: &str) {
    let path = bin.join("dftb+");
    let src = Path::new("testfiles/dftb+").join(log).canonicalize().unwrap();
    std::fs::write(
        &path,
        format!(
            "#!/bin/sh\ntest -f dftb_in.hsd || exit 3\n\
             echo $OMP_NUM_THREADS > threads\ncat {}\n",
            src.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .unwrap();
}

/// retry while the freshly written script is still open for writing in
/// another test thread's forked child
fn run_step(
    ssr: &mut Ssr,
    mol: &mut Molecule,
    base: &Path,
    istep: isize,
    bo_list: &[usize],
    force_only: bool,
) -> Result<(), ProgramError> {
    for _ in 0..10 {
        match ssr.get_bo(mol, base, istep, bo_list, force_only) {
            Err(ProgramError::SpawnError(_, io::ErrorKind::ExecutableFileBusy)) => {
                std::thread::sleep(std::time::Duration::from_millis(50))
            }
            res => return res,
        }
    }
    ssr.get_bo(mol, base, istep, bo_list, force_only)
}

#[test]
fn get_bo() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    fake_dftb(&bin, "ssr3.log");
    std::fs::create_dir(tmp.path().join("QMlog")).unwrap();

    let mut mol = water(3);
    let mut ssr = Ssr::new(
        SsrOptions {
            qm_path: bin.to_string_lossy().to_string(),
            nthreads: 4,
            ..coupled()
        },
        &mol,
    )
    .unwrap();
    run_step(&mut ssr, &mut mol, tmp.path(), -1, &[0], false).unwrap();

    let scratch = scratch_dir(tmp.path());
    for f in ["geometry.xyz", "geometry.gen", "dftb_in.hsd", "log"] {
        assert!(scratch.join(f).exists(), "missing {f}");
    }
    assert_eq!(read_to_string(scratch.join("threads")).unwrap(), "4\n");
    assert!(tmp.path().join("QMlog/log.0.0").exists());
    assert_abs_diff_eq!(mol.states[2].energy, -3.60997841);
    assert_abs_diff_eq!(mol.states[0].force, -g1());
    assert_abs_diff_eq!(mol.nac[[1, 0, 0, 0]], -0.31240512);

    // a force-only step reuses the scratch directory
    std::fs::write(scratch.join("keep"), "").unwrap();
    run_step(&mut ssr, &mut mol, tmp.path(), 0, &[1], true).unwrap();
    assert!(scratch.join("keep").exists());
    assert!(tmp.path().join("QMlog/log.1.1").exists());

    // while a full step starts over
    run_step(&mut ssr, &mut mol, tmp.path(), 1, &[1], false).unwrap();
    assert!(!scratch.join("keep").exists());
}

#[test]
fn get_bo_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let mut mol = water(1);
    let mut ssr = Ssr::new(
        SsrOptions {
            qm_path: tmp.path().join("nowhere").to_string_lossy().to_string(),
            ..Default::default()
        },
        &mol,
    )
    .unwrap();
    assert!(matches!(
        ssr.get_bo(&mut mol, tmp.path(), -1, &[0], false),
        Err(ProgramError::SpawnError(..))
    ));
    assert!(matches!(
        ssr.get_bo(&mut mol, tmp.path(), -1, &[], false),
        Err(ProgramError::Config(ConfigError::InvalidOption(_)))
    ));
}

#[test]
fn unknown_options() {
    let got: SsrOptions =
        toml::from_str("calc_coupling = true\nnthreads = 8\n").unwrap();
    assert!(got.calc_coupling);
    assert_eq!(got.nthreads, 8);

    for typo in ["calc_couplng = true", "nthread = 8"] {
        let err = toml::from_str::<SsrOptions>(typo).unwrap_err();
        assert!(err.to_string().contains("unknown field"), "{err}");
    }
}

#[test]
fn mismatched_elements() {
    let tmp = tempfile::tempdir().unwrap();
    let ssr = Ssr::new(SsrOptions::default(), &water(1)).unwrap();
    assert!(ssr.write_input(&water(1), 0, tmp.path()).is_ok());

    let methane = Molecule::from_xyz(
        "C 0 0 0\nH 0.63 0.63 0.63\nH -0.63 -0.63 0.63\n\
         H -0.63 0.63 -0.63\nH 0.63 -0.63 -0.63\n",
        0,
        1,
    )
    .unwrap();
    assert!(matches!(
        ssr.write_input(&methane, 0, tmp.path()),
        Err(ProgramError::Config(ConfigError::InvalidOption(_)))
    ));
}
