//! JSON-lines command runner
//!
//! Each non-blank input line is one `ManagerCommand`; each produces one
//! envelope line on stdout, in input order. All lines share one router,
//! so an `extract` on one line is visible to a `generate` on a later one.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use studyloop_core::{CommandRouter, Envelope, ManagerCommand, StudyError};
use tracing::info;

use crate::app::GlobalArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// File of JSON-lines commands; reads stdin when omitted or "-"
    pub input: Option<PathBuf>,

    /// Dispatch the whole batch concurrently instead of line by line
    #[arg(long)]
    pub parallel: bool,
}

pub async fn run(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let router = global.router()?;
    let reader: Box<dyn Read> = match &args.input {
        Some(path) if path.as_os_str() != "-" => Box::new(
            std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        _ => Box::new(std::io::stdin()),
    };
    let lines = read_lines(reader)?;

    let envelopes = if args.parallel {
        dispatch_parallel(&router, lines).await
    } else {
        dispatch_sequential(&router, lines).await
    };

    let failed = envelopes.iter().filter(|e| !e.success).count();
    let mut stdout = std::io::stdout().lock();
    for envelope in &envelopes {
        writeln!(stdout, "{}", envelope.to_json())?;
    }
    stdout.flush()?;

    info!(commands = envelopes.len(), failed, "Batch complete");
    Ok(())
}

fn read_lines(reader: impl Read) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line.context("Failed to read command input")?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn parse_line(line: &str) -> Result<ManagerCommand, Envelope> {
    serde_json::from_str(line).map_err(|e| {
        Envelope::failure(&StudyError::Validation(format!("malformed command: {e}")))
    })
}

async fn dispatch_sequential(router: &CommandRouter, lines: Vec<String>) -> Vec<Envelope> {
    let mut envelopes = Vec::with_capacity(lines.len());
    for line in &lines {
        let envelope = match parse_line(line) {
            Ok(command) => router.dispatch(command).await,
            Err(envelope) => envelope,
        };
        envelopes.push(envelope);
    }
    envelopes
}

async fn dispatch_parallel(router: &CommandRouter, lines: Vec<String>) -> Vec<Envelope> {
    let parsed: Vec<Result<ManagerCommand, Envelope>> =
        lines.iter().map(|line| parse_line(line)).collect();

    let commands: Vec<ManagerCommand> = parsed
        .iter()
        .filter_map(|p| p.as_ref().ok().cloned())
        .collect();
    let mut dispatched = router.dispatch_all(commands).await.into_iter();

    // Stitch parse failures back into input order
    parsed
        .into_iter()
        .map(|p| match p {
            Ok(_) => dispatched.next().unwrap_or_else(|| {
                Envelope::failure(&StudyError::Internal("missing batch result".into()))
            }),
            Err(envelope) => envelope,
        })
        .collect()
}
