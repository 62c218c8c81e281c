use async_trait::async_trait;
use portal_core_types::TargetIdentity;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// What the operator answered when asked to finish a login by hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HumanSignal {
    Confirmed,
    Cancelled,
}

/// Out-of-band channel to a person who can complete MFA in the browser window.
#[async_trait]
pub trait InteractionChannel: Send + Sync {
    async fn request_login(&self, target: &TargetIdentity, reason: &str) -> HumanSignal;
}

/// Prints a banner on stderr and waits for ENTER on stdin. EOF cancels.
#[derive(Clone, Debug, Default)]
pub struct TerminalPrompt;

#[async_trait]
impl InteractionChannel for TerminalPrompt {
    async fn request_login(&self, target: &TargetIdentity, reason: &str) -> HumanSignal {
        let rule = "=".repeat(56);
        eprintln!("\n  {rule}");
        eprintln!("  Sign-in to {} needs you ({reason}).", target.key());
        eprintln!("  Complete the login in the browser window,");
        eprintln!("  then press ENTER here. (Ctrl+D to cancel)");
        eprintln!("  {rule}\n");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(0) => HumanSignal::Cancelled,
            Ok(_) => HumanSignal::Confirmed,
            Err(err) => {
                debug!(target: "session-center", %err, "stdin unavailable for login prompt");
                HumanSignal::Cancelled
            }
        }
    }
}
