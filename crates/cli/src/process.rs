//! Child-process implementations of the preflight and model seams.

use grounding_evidence::{CmdOutput, PreflightRunner};
use grounding_orchestrator::{answer_from_response, ModelBackend, ModelRequest, OrchestratorError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// Runs preflight argv directly, without a shell.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    workdir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self { workdir }
    }
}

impl PreflightRunner for ProcessRunner {
    fn run(&mut self, argv: &[String]) -> io::Result<CmdOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty preflight argv"))?;
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        let output = command.output()?;
        Ok(CmdOutput {
            argv: argv.to_vec(),
            returncode: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// External model command: the prompt goes in on stdin and the answer comes back
/// on stdout, as raw text or a JSON object with `answer`, `response` or `text`.
///
/// `GROUNDING_QID`, `GROUNDING_PHASE` and `GROUNDING_TOP_K` describe the request.
#[derive(Debug)]
pub struct CommandBackend {
    argv: Vec<String>,
    calls: usize,
}

impl CommandBackend {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, calls: 0 }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl ModelBackend for CommandBackend {
    fn complete(&mut self, request: &ModelRequest) -> grounding_orchestrator::Result<String> {
        let phase = request.phase;
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| OrchestratorError::backend(phase, "empty model command"))?;
        self.calls += 1;

        let mut child = Command::new(program)
            .args(args)
            .env("GROUNDING_QID", &request.qid)
            .env("GROUNDING_PHASE", phase.to_string())
            .env("GROUNDING_TOP_K", request.top_k.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| OrchestratorError::backend(phase, format!("failed to start {program}: {err}")))?;
        // Fed from another thread: the command may write output before it has read all input.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt.clone();
            thread::spawn(move || stdin.write_all(prompt.as_bytes()))
        });
        let output = child
            .wait_with_output()
            .map_err(|err| OrchestratorError::backend(phase, err))?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The command may exit without reading all of its input.
                Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(err)) => {
                    return Err(OrchestratorError::backend(
                        phase,
                        format!("failed to send prompt: {err}"),
                    ))
                }
                Err(_) => {
                    return Err(OrchestratorError::backend(phase, "prompt writer panicked"));
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::backend(
                phase,
                format!(
                    "{program} exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            ));
        }
        let answer = answer_from_response(&String::from_utf8_lossy(&output.stdout));
        log::debug!(
            "model.command.done qid={} phase={phase} answer_chars={}",
            request.qid,
            answer.chars().count()
        );
        Ok(answer)
    }
}
