//! End-to-end study session: extract, pick a mode, generate, close
//!
//! Feedback given with `--feedback` is recorded before the session is
//! ended, so the session count never runs ahead of the feedback it
//! belongs to.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use studyloop_core::{ManagerCommand, ModeId};
use tracing::info;
use uuid::Uuid;

use super::policy::parse_feedback;
use crate::app::{GlobalArgs, dispatch_ok, parse_mode};

#[derive(Args, Debug)]
pub struct StudyArgs {
    /// Document to study
    pub file: PathBuf,

    /// Teaching mode; recommended by the policy when omitted
    #[arg(short, long, value_parser = parse_mode)]
    pub mode: Option<ModeId>,

    /// Number of items to generate
    #[arg(short = 'n', long)]
    pub count: Option<u32>,

    /// Focus topic passed to the generator
    #[arg(long)]
    pub topic: Option<String>,

    /// Outcome to record for the mode (true/false or a score in [0, 1])
    #[arg(long, value_parser = parse_feedback)]
    pub feedback: Option<Value>,
}

pub async fn run(global: &GlobalArgs, args: StudyArgs) -> Result<()> {
    let router = global.router()?;
    let user = router.default_user().to_string();
    let session_id = Uuid::new_v4().to_string();

    let extracted = dispatch_ok(
        &router,
        ManagerCommand::new("extract")
            .session(&session_id)
            .user(&user)
            .param("file_path", args.file.to_string_lossy().into_owned()),
    )
    .await
    .with_context(|| format!("Failed to extract {}", args.file.display()))?;
    let chunks = extracted["chunks"].as_array().map_or(0, Vec::len);
    info!(session_id = %session_id, chunks, "Document extracted");

    let mode = match args.mode {
        Some(mode) => mode,
        None => {
            let recommended = dispatch_ok(&router, ManagerCommand::new("recommend").user(&user)).await?;
            let mode = recommended["mode"].as_str().unwrap_or_default();
            parse_mode(mode).map_err(anyhow::Error::msg)?
        }
    };
    eprintln!("Studying {} as {mode}", args.file.display());

    let mut generate = ManagerCommand::new("generate")
        .session(&session_id)
        .user(&user)
        .param("mode", mode.as_str());
    if let Some(count) = args.count {
        generate = generate.param("count", count);
    }
    if let Some(topic) = args.topic {
        generate = generate.param("topic", topic);
    }
    let generated = dispatch_ok(&router, generate).await?;
    println!("{}", serde_json::to_string_pretty(&generated["payload"])?);

    if let Some(feedback) = args.feedback {
        let updated = dispatch_ok(
            &router,
            ManagerCommand::new("update_rl")
                .session(&session_id)
                .user(&user)
                .param("mode", mode.as_str())
                .param("feedback", feedback),
        )
        .await?;
        eprintln!(
            "Recorded feedback for {mode}: success={} failure={}",
            updated["mode_success"], updated["mode_failure"]
        );
    }

    let ended = dispatch_ok(
        &router,
        ManagerCommand::new("end_session").session(&session_id).user(&user),
    )
    .await?;
    eprintln!("Session complete ({} sessions so far)", ended["total_sessions"]);
    Ok(())
}
