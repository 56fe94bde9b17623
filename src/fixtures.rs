//! Fixture loading for the end-to-end test harness.
//!
//! Each case is a directory under `tests/programs/` holding `program.opal`,
//! a `case.yaml` spec, and optional `stdin.txt` / expected-stdout files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// The program runs to completion; exit code and stdout are asserted.
    RuntimeSuccess,
    /// Lexing, parsing, or checking fails; the interpreter never runs.
    FrontendError,
    /// The frontend accepts the program but evaluation fails.
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    #[serde(default)]
    pub exit_code: i32,
    pub stdout_file: Option<String>,
    pub error_stage: Option<String>,
    pub error_contains: Option<String>,
    pub error_line: Option<u32>,
    pub error_column: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    pub fn source(&self) -> Result<String> {
        fs::read_to_string(&self.program_path)
            .with_context(|| format!("Reading {} program", self.name))
    }

    /// Contents of `stdin.txt`, or empty input when the case has none.
    pub fn stdin(&self) -> Result<String> {
        let path = self.dir.join("stdin.txt");
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&path).with_context(|| format!("Reading {} stdin", self.name))
    }

    /// Expected stdout; cases without a `stdout_file` expect no output.
    pub fn expected_stdout(&self) -> Result<String> {
        match &self.spec.expected.stdout_file {
            Some(file) => self.read_text(file),
            None => Ok(String::new()),
        }
    }
}

pub fn load_cases(root: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();
    let entries = fs::read_dir(root).with_context(|| format!("Reading case root {root:?}"))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        let spec_path = dir.join("case.yaml");
        ensure!(spec_path.exists(), "Case {name} is missing case.yaml");
        let spec_raw = fs::read_to_string(&spec_path)
            .with_context(|| format!("Reading {name} case.yaml"))?;
        let spec: CaseSpec = serde_yaml::from_str(&spec_raw)
            .with_context(|| format!("Parsing {name} case.yaml"))?;

        let program_path = dir.join("program.opal");
        ensure!(program_path.exists(), "Case {name} is missing program.opal");

        cases.push(Case {
            name,
            dir,
            program_path,
            spec,
        });
    }
    cases.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(cases)
}
