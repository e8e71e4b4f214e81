//! Out-of-process scorers.
//!
//! The heavyweight models (a GPT-2 perplexity scorer, LanguageTool, a
//! sentence-transformer) usually live in another runtime. A
//! [`CommandOracle`] reaches one of them by spawning a configured command
//! once per call:
//!
//! - stdin: the sentence, newlines folded to spaces, terminated by `\n`
//! - stdout: a float (fluency), an integer (grammar) or whitespace-separated
//!   floats (embedding)
//!
//! A non-zero exit status or unparseable stdout is an error; there is no
//! retry.

use crate::config::{CommandConfig, ConfigError};
use crate::oracle::{EmbeddingOracle, FluencyOracle, GrammarOracle, OracleError};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Scorer reached through a subprocess
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOracle {
    /// Create an oracle for `program` with `args`
    #[must_use]
    pub fn new(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout,
        }
    }

    /// Create an oracle from a configured command line
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the command line cannot be split.
    pub fn from_config(config: &CommandConfig) -> Result<Self, ConfigError> {
        let mut argv = config.argv()?.into_iter();
        let program = argv.next().unwrap_or_default();
        Ok(Self {
            program,
            args: argv.collect(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check if the program can be found on `PATH`
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Run the command on one sentence and return its trimmed stdout
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the program cannot be spawned, `Timeout` if it
    /// runs too long, `Failed` on a non-zero exit status and `InvalidOutput`
    /// if stdout is not UTF-8.
    pub fn run(&self, sentence: &str) -> Result<String, OracleError> {
        let start = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OracleError::Unavailable(self.program.clone())
                } else {
                    OracleError::IoError(e)
                }
            })?;

        let line = sentence.replace(['\r', '\n'], " ");
        let stdin = spawn_writer(child.stdin.take(), line);
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = self.wait_with_deadline(&mut child, start)?;
        let written = join(stdin, &self.program)?;
        let stdout = join(stdout, &self.program)?;
        let stderr = join(stderr, &self.program)?.map_err(OracleError::IoError)?;
        let stderr = String::from_utf8_lossy(&stderr);

        if !status.success() {
            tracing::error!(
                program = %self.program,
                status = %status,
                stderr = %stderr.trim(),
                "Scorer command failed"
            );
            return Err(OracleError::Failed(format!(
                "{} exited with {status}: {}",
                self.program,
                stderr.trim()
            )));
        }

        tracing::trace!(
            program = %self.program,
            elapsed_ms = start.elapsed().as_millis(),
            "Scorer command finished"
        );

        // A scorer that exits without reading stdin is judged by its status
        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(OracleError::IoError(e));
            }
        }
        let stdout = stdout.map_err(OracleError::IoError)?;
        let stdout = String::from_utf8(stdout).map_err(|e| {
            OracleError::InvalidOutput(format!("{}: stdout is not valid UTF-8: {e}", self.program))
        })?;

        Ok(stdout.trim().to_string())
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        start: Instant,
    ) -> Result<std::process::ExitStatus, OracleError> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() > self.timeout {
                // Already exited or unkillable; either way the call has failed
                let _ = child.kill();
                let _ = child.wait();
                return Err(OracleError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn spawn_writer<W: Write + Send + 'static>(
    pipe: Option<W>,
    line: String,
) -> thread::JoinHandle<std::io::Result<()>> {
    thread::spawn(move || match pipe {
        // Dropping the pipe afterwards closes the child's stdin
        Some(mut pipe) => writeln!(pipe, "{line}"),
        None => Ok(()),
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join<T>(handle: thread::JoinHandle<T>, program: &str) -> Result<T, OracleError> {
    handle
        .join()
        .map_err(|_| OracleError::Failed(format!("{program}: pipe thread panicked")))
}

fn invalid(program: &str, output: &str, expected: &str) -> OracleError {
    OracleError::InvalidOutput(format!("{program}: expected {expected}, got '{output}'"))
}

impl FluencyOracle for CommandOracle {
    fn score(&self, sentence: &str) -> Result<f64, OracleError> {
        let output = self.run(sentence)?;
        // "nan" and "inf" parse and flow on as invalid scores
        output
            .parse::<f64>()
            .map_err(|_| invalid(&self.program, &output, "a float"))
    }
}

impl GrammarOracle for CommandOracle {
    fn violations(&self, sentence: &str) -> Result<usize, OracleError> {
        let output = self.run(sentence)?;
        output
            .parse::<usize>()
            .map_err(|_| invalid(&self.program, &output, "a non-negative integer"))
    }
}

impl EmbeddingOracle for CommandOracle {
    fn embed(&self, sentence: &str) -> Result<Vec<f32>, OracleError> {
        let output = self.run(sentence)?;
        let embedding = output
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(str::parse::<f32>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid(&self.program, &output, "whitespace-separated floats"))?;
        if embedding.is_empty() {
            return Err(invalid(&self.program, &output, "a non-empty embedding"));
        }
        Ok(embedding)
    }
}
