//! Running external programs synchronously in a scratch directory

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, info};

use crate::program::ProgramError;

/// A single invocation of an external program. Environment variables set here
/// are applied only to the spawned process, never to the current one
#[derive(Clone, Debug, PartialEq)]
pub struct Runner {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,

    /// name of the file in the working directory that receives the combined
    /// stdout and stderr of the program
    log: String,
}

impl Runner {
    pub fn new(program: impl Into<PathBuf>, log: &str) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            log: log.to_owned(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.envs.push((key.into(), val.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// run the program in `dir` and block until it exits. On success, return
    /// the path to the log file
    pub fn run(&self, dir: &Path) -> Result<PathBuf, ProgramError> {
        let name = self.program.to_string_lossy().to_string();
        let log_path = dir.join(&self.log);
        let log_name = log_path.to_string_lossy().to_string();
        let out = File::create(&log_path)
            .map_err(|e| ProgramError::WriteFileError(log_name.clone(), e.kind()))?;
        let err = out
            .try_clone()
            .map_err(|e| ProgramError::WriteFileError(log_name, e.kind()))?;

        info!("running {name} in {}", dir.display());
        debug!("arguments: {:?}, environment: {:?}", self.args, self.envs);
        // relative to the driver, not to `dir`
        let program = if self.program.is_relative()
            && self.program.components().count() > 1
        {
            std::path::absolute(&self.program)
                .map_err(|e| ProgramError::SpawnError(name.clone(), e.kind()))?
        } else {
            self.program.clone()
        };
        let status = Command::new(&program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .status()
            .map_err(|e| ProgramError::SpawnError(name.clone(), e.kind()))?;

        if !status.success() {
            return Err(ProgramError::ExitFailure(name, status.code()));
        }
        Ok(log_path)
    }
}

/// copy `log` to `<base_dir>/QMlog/<log name>.<istep + 1>.<state>` if the
/// `QMlog` directory exists, returning the destination if a copy was made
pub fn archive_log(
    log: &Path,
    base_dir: &Path,
    istep: isize,
    state: usize,
) -> Result<Option<PathBuf>, ProgramError> {
    let dir = base_dir.join("QMlog");
    if !dir.is_dir() {
        return Ok(None);
    }
    let stem = log
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "log".to_owned());
    let dest = dir.join(format!("{stem}.{}.{state}", istep + 1));
    std::fs::copy(log, &dest).map_err(|e| {
        ProgramError::WriteFileError(dest.to_string_lossy().to_string(), e.kind())
    })?;
    debug!("archived {} to {}", log.display(), dest.display());
    Ok(Some(dest))
}
