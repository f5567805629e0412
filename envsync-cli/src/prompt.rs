//! Interactive decisions on stdin.

use async_trait::async_trait;
use envsync_core::decision::{ConflictPrompt, MigrationProposal};
use envsync_core::{ConflictChoice, DecisionCallback, MigrationChoice};
use std::io::{self, Write};

pub struct StdinDecision;

#[async_trait]
impl DecisionCallback for StdinDecision {
    async fn resolve_conflict(&self, prompt: ConflictPrompt) -> ConflictChoice {
        let question = format!(
            "{} changed on this device ({} vars) and remotely ({} vars).\nKeep [l]ocal, take [r]emote, or [c]ancel? ",
            prompt.file_name, prompt.local_var_count, prompt.remote_var_count
        );
        match ask(question).await.as_deref() {
            Some("l") | Some("local") => ConflictChoice::UseLocal,
            Some("r") | Some("remote") => ConflictChoice::UseRemote,
            _ => ConflictChoice::Cancel,
        }
    }

    async fn confirm_migration(&self, proposal: MigrationProposal) -> MigrationChoice {
        let question = format!(
            "Project identity changed ({}).\n  old: {}\n  new: {}\n[m]igrate synced files, [k]eep new id without moving, or decide [l]ater? ",
            proposal.reason, proposal.old_id, proposal.new_id
        );
        match ask(question).await.as_deref() {
            Some("m") | Some("migrate") => MigrationChoice::Migrate,
            Some("k") | Some("keep") => MigrationChoice::Keep,
            _ => MigrationChoice::Later,
        }
    }
}

/// Print `question` and read one trimmed, lowercased line.
async fn ask(question: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        let mut stdout = io::stdout();
        stdout.write_all(question.as_bytes()).ok()?;
        stdout.flush().ok()?;

        let mut line = String::new();
        io::stdin().read_line(&mut line).ok()?;
        Some(line.trim().to_lowercase())
    })
    .await
    .ok()
    .flatten()
}
