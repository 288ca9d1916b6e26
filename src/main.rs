//! Tripwire CLI entry point.
//!
//! Operator and CI front end for the governance engine. `verify` and
//! `status` double as CI gates through their exit codes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Duration;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use tripwire::config::GovernanceConfig;
use tripwire::governance::{
    CalibrationPolicy, GovernanceEngine, OverrideAuthority, OverrideKind, OverrideRequest,
    PolicyVerifier, SafetyEvent,
};
use tripwire::logging;
use tripwire::verdict::{CalibrationStatus, Verdict};

/// Tripwire governance engine for the phishing classifier.
#[derive(Parser)]
#[command(name = "tripwire", version, about)]
struct Cli {
    /// Config file (default: $TRIPWIRE_CONFIG or ./tripwire.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Cross-check policy artifacts; exits 1 on drift.
    Verify,
    /// Print budget status; exits 1 while frozen.
    Status,
    /// List active overrides.
    Overrides,
    /// Show promotion eligibility for a canary domain.
    Canary {
        /// Canary domain.
        domain: String,
    },
    /// Issue a policy override.
    RequestOverride {
        /// permanent, emergency or testing.
        #[arg(long)]
        kind: OverrideKind,
        /// security-team, on-call or ci-system.
        #[arg(long)]
        authority: OverrideAuthority,
        /// Affected domain (repeatable).
        #[arg(long = "domain", required = true)]
        domains: Vec<String>,
        /// Justification.
        #[arg(long)]
        reason: String,
        /// Approver identity.
        #[arg(long)]
        approved_by: String,
        /// Review ticket (required for permanent overrides).
        #[arg(long)]
        ticket: Option<String>,
        /// Requested lifetime in minutes; capped per kind.
        #[arg(long)]
        duration_minutes: Option<i64>,
    },
    /// Deactivate an override.
    Revoke {
        /// Override identifier.
        id: String,
        /// Operator identity.
        #[arg(long)]
        by: String,
        /// Justification.
        #[arg(long)]
        reason: String,
    },
    /// Record one canary run.
    RecordCanary {
        /// Canary domain.
        domain: String,
        /// Verdict the classifier returned.
        #[arg(long)]
        verdict: Verdict,
        /// Predictions evaluated in this run.
        #[arg(long, default_value_t = 1)]
        sample_size: u64,
    },
    /// Count a safety event against the budget.
    RecordEvent {
        /// suspicious_on_trusted, override or canary_failure.
        event: SafetyEvent,
    },
    /// Approve promotion of an eligible canary.
    Promote {
        /// Canary domain.
        domain: String,
        /// Approver identity.
        #[arg(long)]
        approved_by: String,
        /// Review ticket.
        #[arg(long)]
        ticket: String,
    },
    /// Lift the safety freeze and restart the budget window.
    LiftFreeze {
        /// Operator identity.
        #[arg(long)]
        by: String,
        /// Documented resolution.
        #[arg(long)]
        resolution: String,
        /// Review ticket.
        #[arg(long)]
        ticket: String,
    },
    /// Restart the budget window (refused while frozen).
    ResetWindow {
        /// Operator identity.
        #[arg(long)]
        by: String,
        /// Justification.
        #[arg(long)]
        reason: String,
    },
    /// Show the policy adjustment for a calibration status.
    Calibration {
        /// healthy, degraded or anything else (unknown).
        status: String,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };
    debug!(state = %config.state_path().display(), "configuration loaded");

    run(cli.command, &config)
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<GovernanceConfig> {
    let Some(path) = path else {
        return GovernanceConfig::load().context("failed to load configuration");
    };
    let mut config = GovernanceConfig::load_from(path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn run(command: Command, config: &GovernanceConfig) -> anyhow::Result<ExitCode> {
    match command {
        // Verification must work even when the state file is the thing that drifted.
        Command::Verify => {
            let report = PolicyVerifier::new(config.artifact_paths()).verify();
            print_json(&report)?;
            Ok(exit_if(report.should_fail_ci))
        }
        Command::Calibration { status } => {
            let status = CalibrationStatus::parse(&status);
            print_json(&CalibrationPolicy::for_status(status))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let status = open_engine(config)?.status()?;
            print_json(&status)?;
            Ok(exit_if(status.is_frozen))
        }
        Command::Overrides => {
            print_json(&open_engine(config)?.active_overrides()?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Canary { domain } => {
            print_json(&open_engine(config)?.promotion_eligibility(&domain)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::RequestOverride {
            kind,
            authority,
            domains,
            reason,
            approved_by,
            ticket,
            duration_minutes,
        } => {
            let mut request = OverrideRequest::new(kind, authority)
                .domains(domains)
                .reason(reason)
                .approved_by(approved_by);
            if let Some(ticket) = ticket {
                request = request.ticket(ticket);
            }
            if let Some(minutes) = duration_minutes {
                request = request.duration(minutes_saturating(minutes));
            }
            print_json(&open_engine(config)?.request_override(request)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Revoke { id, by, reason } => {
            open_engine(config)?.revoke_override(&id, &by, &reason)?;
            println!("revoked {id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::RecordCanary {
            domain,
            verdict,
            sample_size,
        } => {
            let signal = open_engine(config)?.record_canary_result(&domain, verdict, sample_size)?;
            print_json(&signal)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::RecordEvent { event } => {
            let engine = open_engine(config)?;
            engine.record_event(event)?;
            let status = engine.status()?;
            print_json(&status)?;
            Ok(exit_if(status.is_frozen))
        }
        Command::Promote {
            domain,
            approved_by,
            ticket,
        } => {
            let record = open_engine(config)?.promote_canary(&domain, &approved_by, &ticket)?;
            print_json(&record)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::LiftFreeze {
            by,
            resolution,
            ticket,
        } => {
            if open_engine(config)?.lift_freeze(&by, &resolution, &ticket)? {
                println!("freeze lifted; budget window reset");
            } else {
                println!("system is not frozen; nothing to lift");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ResetWindow { by, reason } => {
            open_engine(config)?.reset_window(&by, &reason)?;
            println!("budget window reset");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_engine(config: &GovernanceConfig) -> anyhow::Result<GovernanceEngine> {
    GovernanceEngine::open(config).context("failed to open governance state")
}

/// Minutes as a duration, saturating instead of overflowing. The ledger caps
/// overlong requests and rejects non-positive ones.
fn minutes_saturating(minutes: i64) -> Duration {
    Duration::try_minutes(minutes).unwrap_or(if minutes > 0 {
        Duration::MAX
    } else {
        Duration::MIN
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

fn exit_if(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
