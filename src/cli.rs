use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::protocol::{BasicProtocolHandler, TerminationCodec, TerminationReason};

#[derive(Parser)]
#[command(name = "agbot")]
#[command(version)]
#[command(about = "Agreement bot protocol coordinator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and the per-environment files
    #[arg(short, long, default_value = "config")]
    pub config_dir: String,

    /// Override the configured number of agreement workers
    #[arg(short, long, env = "AGBOT_WORKERS")]
    pub workers: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the coordinator and run until interrupted
    Run,
    /// Load and validate the configuration, then exit
    Check,
    /// Print the termination reasons and their cancel codes
    Reasons {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct ReasonRow {
    pub reason: String,
    pub code: u32,
    pub description: String,
}

/// Reason, code and decoded text for every known termination reason
pub fn reason_table(codec: &dyn TerminationCodec) -> Vec<ReasonRow> {
    TerminationReason::ALL
        .iter()
        .map(|reason| {
            let code = codec.termination_code(*reason);
            ReasonRow {
                reason: reason.to_string(),
                code,
                description: codec.get_termination_reason(code),
            }
        })
        .collect()
}

pub fn print_reasons(handler: &BasicProtocolHandler, json: bool) -> crate::Result<()> {
    let rows = reason_table(handler);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<18} {:>5}  DESCRIPTION", "REASON", "CODE");
    for row in rows {
        println!("{:<18} {:>5}  {}", row.reason, row.code, row.description);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        MemoryAgreementStore, MemoryProtocolRecorder, RecordingMessenger, StaticEndpointResolver,
    };
    use crate::config::AppConfig;
    use crate::coordinator::{Collaborators, PolicyManager};
    use std::sync::Arc;

    #[test]
    fn test_reason_table_covers_every_reason() {
        let cfg = AppConfig::default_config(1);
        let handler = BasicProtocolHandler::new(
            &cfg.agreement_bot.protocol,
            &cfg.agreement_bot,
            Collaborators {
                store: Arc::new(MemoryAgreementStore::new()),
                policies: Arc::new(PolicyManager::new()),
                resolver: Arc::new(StaticEndpointResolver::new()),
                messenger: Arc::new(RecordingMessenger::new()),
                recorder: Arc::new(MemoryProtocolRecorder::new()),
            },
        )
        .unwrap();

        let rows = reason_table(&handler);
        assert_eq!(rows.len(), TerminationReason::ALL.len());

        let policy = rows.iter().find(|r| r.reason == "PolicyChanged").unwrap();
        assert_eq!(policy.code, 204);
        assert_eq!(policy.description, "agreement bot policy changed");
    }
}
