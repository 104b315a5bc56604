//! Session lifecycle commands: `arv create`, `arv activate`, `arv sweep`, ...

use std::str::FromStr;

use anyhow::Result;

use arv::config::ArvConfig;
use arv::errors::SessionError;
use arv::runtime::build_orchestrator;
use arv::session::models::{ImageIdx, Session, SessionStatus};
use arv::session::orchestrator::Step;
use arv::session::sweeper::Sweeper;

fn print_session(session: &Session) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(session)?);
    Ok(())
}

fn idx_label(idx: Option<ImageIdx>) -> String {
    idx.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_step(step: &Step) -> Result<()> {
    if !step.advanced() {
        println!(
            "Session {} is still {}; the wager is not ready yet.",
            step.session().id,
            step.session().status
        );
    }
    print_session(step.session())
}

pub async fn cmd_create(config: &ArvConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let session = orchestrator.create_session().await?;
    print_session(&session)
}

pub async fn cmd_activate(config: &ArvConfig, id: &str, impression: &str, no_wait: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let session = orchestrator.record_impression(id, impression).await?;
    if no_wait {
        println!("Impression recorded; session {} is {}.", session.id, session.status);
        return Ok(());
    }

    // A CLI process does not outlive the call, so run the chain inline.
    report_drive(orchestrator.drive(id).await)
}

/// The impression is already stored when this runs, so only errors that
/// leave the session stuck fail the command.
fn report_drive(result: Result<Session, SessionError>) -> Result<()> {
    match result {
        Ok(session) => print_session(&session),
        Err(e) if e.is_benign() => {
            println!("Impression recorded; another process moved the session on ({}).", e);
            Ok(())
        }
        Err(e) if e.is_retryable() => {
            println!("Impression recorded, but the next step failed: {}", e);
            println!("The session stays where it is; `arv sweep` will retry it.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_show(config: &ArvConfig, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    print_session(&orchestrator.get_session(id).await?)
}

pub async fn cmd_list(config: &ArvConfig, status: Option<&str>) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let sessions = match status {
        Some(raw) => {
            let status = SessionStatus::from_str(raw).map_err(anyhow::Error::msg)?;
            orchestrator.sessions_with_status(status).await?
        }
        None => orchestrator.get_sessions().await?,
    };

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    println!("{:<38} {:<10} {:>6} {:>6}  IMAGES", "ID", "STATUS", "CHOSEN", "TARGET");
    for session in &sessions {
        println!(
            "{:<38} {:<10} {:>6} {:>6}  {}, {}",
            session.id,
            session.status,
            idx_label(session.chosen_image_idx),
            idx_label(session.target_image_idx),
            session.images[0],
            session.images[1]
        );
    }
    Ok(())
}

pub async fn cmd_advance(config: &ArvConfig, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let step = orchestrator.advance(id).await?;
    print_step(&step)
}

pub async fn cmd_feedback(config: &ArvConfig, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let step = orchestrator.shown_feedback(id).await?;
    let session = step.session();
    match session.is_win() {
        Some(true) => println!("Hit: the judged image was the target."),
        Some(false) => println!("Miss: the target was the other image."),
        None => {}
    }
    print_session(session)
}

pub async fn cmd_sweep(config: &ArvConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let sweeper = Sweeper::new(orchestrator, config.sweep_interval());
    match sweeper.run_cycle().await {
        Some(report) => {
            println!(
                "Examined {}: {} advanced, {} waiting, {} skipped, {} failed",
                report.examined, report.advanced, report.waiting, report.skipped, report.failed
            );
        }
        None => println!("A sweep is already running."),
    }
    Ok(())
}

pub async fn cmd_stats(config: &ArvConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let stats = orchestrator.stats().await?;
    println!("Resolved sessions: {}", stats.total_sessions);
    println!("Wins:              {}", stats.wins);
    println!("Losses:            {}", stats.losses);
    println!("Win percentage:    {:.2}%", stats.win_percentage);
    Ok(())
}
