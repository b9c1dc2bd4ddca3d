//! External processes and interactive confirmation.
//!
//! `CommandRunner` is the seam every transfer and submission goes through. Runs block
//! until the child exits; output is inherited so the user sees rsync/qsub directly.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;

/// One external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: &str, args: Vec<String>, cwd: &Path) -> Invocation {
        Invocation {
            program: program.to_string(),
            args,
            cwd: cwd.to_path_buf(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a finished process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub Option<i32>);

impl ExitCode {
    pub fn success(&self) -> bool {
        self.0 == Some(0)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit status {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ExitCode>;
}

/// Spawns the program for real and waits for it
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ExitCode> {
        info!("Running `{}` in {}", invocation, invocation.cwd.display());
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .status()?;
        Ok(ExitCode(status.code()))
    }
}

pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Asks on stdin. Only a non-empty answer that does not start with n/N proceeds.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> bool {
        print!("\n[QUESTION] {question} [y/N]? ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => accepts(&answer),
            Err(_) => false,
        }
    }
}

fn accepts(answer: &str) -> bool {
    match answer.trim().chars().next() {
        Some('n') | Some('N') | None => false,
        Some(_) => true,
    }
}
