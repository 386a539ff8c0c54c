//! One-shot policy subcommands

use anyhow::Result;
use chrono::SecondsFormat;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde_json::Value;
use studyloop_core::{ManagerCommand, ModeId, PolicyState, PolicyStore};

use crate::app::{GlobalArgs, dispatch_ok, parse_mode};

#[derive(Args, Debug, Default)]
pub struct OutputArgs {
    /// Print the raw JSON envelope
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RecommendArgs {
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct FeedbackArgs {
    /// Mode the learner just used (quiz, flashcard, interactive)
    #[arg(value_parser = parse_mode)]
    pub mode: ModeId,

    /// Outcome: true/false, or a score between 0 and 1
    #[arg(value_parser = parse_feedback)]
    pub feedback: Value,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct SurveyArgs {
    /// Preferred mode; omit to record "no preference"
    #[arg(value_parser = parse_mode)]
    pub preference: Option<ModeId>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct EndSessionArgs {
    /// Session whose transient context should be dropped
    #[arg(long)]
    pub session: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Feedback as JSON: `true`/`false` or a number
pub(crate) fn parse_feedback(s: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(s.trim()) {
        Ok(value @ (Value::Bool(_) | Value::Number(_))) => Ok(value),
        _ => Err(format!("expected true, false or a number in [0, 1], got {s:?}")),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn recommend(global: &GlobalArgs, args: RecommendArgs) -> Result<()> {
    let router = global.router()?;
    let command = ManagerCommand::new("recommend").user(router.default_user());
    let json = dispatch_ok(&router, command).await?;

    if args.output.json {
        return print_json(&json);
    }
    let source = match json["source"].as_str() {
        Some("cold_start") => "survey preference",
        _ => "sampled",
    };
    println!("{} ({source})", json["mode"].as_str().unwrap_or("?"));
    Ok(())
}

pub async fn feedback(global: &GlobalArgs, args: FeedbackArgs) -> Result<()> {
    let router = global.router()?;
    let command = ManagerCommand::new("update_rl")
        .user(router.default_user())
        .param("mode", args.mode.as_str())
        .param("feedback", args.feedback);
    let json = dispatch_ok(&router, command).await?;

    if args.output.json {
        return print_json(&json);
    }
    println!(
        "{}: success={} failure={} ({} feedback events)",
        args.mode, json["mode_success"], json["mode_failure"], json["history_len"]
    );
    Ok(())
}

pub async fn survey(global: &GlobalArgs, args: SurveyArgs) -> Result<()> {
    let router = global.router()?;
    let mut command = ManagerCommand::new("survey").user(router.default_user());
    if let Some(mode) = args.preference {
        command = command.param("preference", mode.as_str());
    }
    let json = dispatch_ok(&router, command).await?;

    if args.output.json {
        return print_json(&json);
    }
    match args.preference {
        Some(mode) => println!("Survey recorded: prefers {mode}"),
        None => println!("Survey recorded: no preference"),
    }
    Ok(())
}

pub async fn reset(global: &GlobalArgs, args: OutputArgs) -> Result<()> {
    let router = global.router()?;
    let user = router.default_user().to_string();
    let json = dispatch_ok(&router, ManagerCommand::new("reset_preferences").user(&user)).await?;

    if args.json {
        return print_json(&json);
    }
    println!("Reset preferences for {user}");
    Ok(())
}

pub async fn end_session(global: &GlobalArgs, args: EndSessionArgs) -> Result<()> {
    let router = global.router()?;
    let mut command = ManagerCommand::new("end_session").user(router.default_user());
    if let Some(session) = args.session {
        command = command.session(session);
    }
    let json = dispatch_ok(&router, command).await?;

    if args.output.json {
        return print_json(&json);
    }
    println!("Sessions completed: {}", json["total_sessions"]);
    Ok(())
}

pub async fn state(global: &GlobalArgs, args: OutputArgs) -> Result<()> {
    let router = global.router()?;
    let user = router.default_user();
    let state = router.store().load(user).await;

    if args.json {
        return print_json(&serde_json::to_value(&state)?);
    }
    println!("User: {user}");
    println!("{}", state_table(&state));
    println!("Survey completed: {}", state.survey_completed);
    println!(
        "Initial preference: {}",
        state.initial_preference.map_or("none", |m| m.as_str())
    );
    println!("Sessions completed: {}", state.total_sessions);
    println!("Feedback events: {}", state.history.len());
    if let Some(ts) = state.last_updated {
        println!("Last updated: {}", ts.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    Ok(())
}

fn state_table(state: &PolicyState) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Mode").fg(Color::Cyan),
        Cell::new("Success (α)").fg(Color::Cyan),
        Cell::new("Failure (β)").fg(Color::Cyan),
        Cell::new("Mean").fg(Color::Cyan),
    ]);
    for mode in ModeId::all() {
        table.add_row(vec![
            Cell::new(mode.as_str()),
            Cell::new(format!("{:.2}", state.success(*mode))),
            Cell::new(format!("{:.2}", state.failure(*mode))),
            Cell::new(format!("{:.3}", state.mean(*mode))),
        ]);
    }
    table
}
