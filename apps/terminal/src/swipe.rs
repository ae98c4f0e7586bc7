use std::io::Write;

use anyhow::Result;
use client_core::{CandidateController, ControllerUpdate, QueueState};
use shared::domain::{CandidateProfile, DecisionKind, MatchNotification};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Like,
    Dislike,
    DismissMatch,
    Retry,
    Logout,
    Quit,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeExit {
    Quit,
    Logout,
}

pub fn parse_action(line: &str) -> Option<Action> {
    match line.trim().to_ascii_lowercase().as_str() {
        "l" | "like" => Some(Action::Like),
        "d" | "dislike" => Some(Action::Dislike),
        "x" | "dismiss" => Some(Action::DismissMatch),
        "r" | "retry" => Some(Action::Retry),
        "o" | "logout" => Some(Action::Logout),
        "q" | "quit" | "exit" => Some(Action::Quit),
        "?" | "h" | "help" => Some(Action::Help),
        _ => None,
    }
}

pub const HELP: &str = "[l]ike  [d]islike  [x] dismiss match  [r]etry  l[o]gout  [q]uit";
pub const EXHAUSTED: &str = "That's all :( no more candidates";

pub fn render_candidate(profile: &CandidateProfile) -> String {
    let name = if profile.display_name.is_empty() {
        profile.id.as_str()
    } else {
        profile.display_name.as_str()
    };
    let mut card = format!("== {name} ==");
    if !profile.bio.is_empty() {
        card.push('\n');
        card.push_str(&profile.bio);
    }
    if !profile.avatar_uri.is_empty() {
        card.push_str("\navatar: ");
        card.push_str(&profile.avatar_uri);
    }
    card
}

pub fn render_match(notification: &MatchNotification) -> String {
    let profile = &notification.profile;
    let name = if profile.display_name.is_empty() {
        profile.id.as_str()
    } else {
        profile.display_name.as_str()
    };
    format!(
        "*** [{}] It's a match! {name} liked you back. Press x to dismiss. ***",
        notification.received_at.format("%H:%M:%S UTC")
    )
}

fn show_head<W: Write>(controller: &CandidateController, out: &mut W) -> Result<()> {
    match controller.head() {
        Some(profile) => writeln!(
            out,
            "{}\n({} left)",
            render_candidate(profile),
            controller.remaining()
        )?,
        None if controller.is_exhausted() => writeln!(out, "{EXHAUSTED}")?,
        None => {}
    }
    Ok(())
}

fn show_update<W: Write>(
    controller: &CandidateController,
    update: &ControllerUpdate,
    out: &mut W,
) -> Result<()> {
    match update {
        ControllerUpdate::CandidatesLoaded { .. } => show_head(controller, out)?,
        ControllerUpdate::LoadFailed(err) => {
            writeln!(out, "Could not load candidates: {err}. Press r to retry.")?
        }
        ControllerUpdate::MatchReceived(_) => {
            if let Some(notification) = controller.active_match() {
                writeln!(out, "{}", render_match(notification))?;
            }
        }
        ControllerUpdate::PushUnavailable(reason) => {
            writeln!(out, "Live match updates are unavailable ({reason}).")?
        }
        ControllerUpdate::PushConnected | ControllerUpdate::Stale => {
            debug!(?update, "swipe: quiet update")
        }
    }
    out.flush()?;
    Ok(())
}

fn decide<W: Write>(
    controller: &mut CandidateController,
    kind: DecisionKind,
    out: &mut W,
) -> Result<()> {
    if controller.decide(kind).is_none() {
        if controller.is_exhausted() {
            writeln!(out, "{EXHAUSTED}")?;
        } else {
            writeln!(out, "Candidates are not ready yet.")?;
        }
        return Ok(());
    }
    show_head(controller, out)
}

/// Drives an initialized controller from line-based input until the user
/// quits, logs out or the input ends. Input is read while candidates are
/// still loading, so a stuck load can be abandoned.
pub async fn run<R, W>(
    controller: &mut CandidateController,
    input: R,
    out: &mut W,
) -> Result<SwipeExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    match controller.state() {
        QueueState::Ready(_) => show_head(controller, out)?,
        QueueState::Failed(err) => {
            writeln!(out, "Could not load candidates: {err}. Press r to retry.")?
        }
        QueueState::Loading | QueueState::Uninitialized => {
            writeln!(out, "Loading candidates... (q to quit)")?
        }
    }
    if let Some(notification) = controller.active_match() {
        writeln!(out, "{}", render_match(notification))?;
    }
    writeln!(out, "{HELP}")?;
    out.flush()?;

    loop {
        tokio::select! {
            update = controller.next_update() => {
                let Some(update) = update else {
                    return Ok(SwipeExit::Quit);
                };
                show_update(controller, &update, out)?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(SwipeExit::Quit);
                };
                match parse_action(&line) {
                    Some(Action::Like) => decide(controller, DecisionKind::Like, out)?,
                    Some(Action::Dislike) => decide(controller, DecisionKind::Dislike, out)?,
                    Some(Action::DismissMatch) => {
                        controller.dismiss_match();
                        show_head(controller, out)?;
                    }
                    Some(Action::Retry) => {
                        if controller.retry() {
                            writeln!(out, "Loading candidates...")?;
                        } else {
                            writeln!(out, "Nothing to retry.")?;
                        }
                    }
                    Some(Action::Logout) => return Ok(SwipeExit::Logout),
                    Some(Action::Quit) => return Ok(SwipeExit::Quit),
                    Some(Action::Help) => writeln!(out, "{HELP}")?,
                    None if line.trim().is_empty() => {}
                    None => writeln!(out, "Unknown command {:?}. {HELP}", line.trim())?,
                }
                out.flush()?;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/swipe_tests.rs"]
mod tests;
