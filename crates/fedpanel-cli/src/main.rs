use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fedpanel_core::{
    ActionError, CapabilityCategory, Config, ExecutionResult, OperationRequest, OutputStream,
    ParamValue,
};
use fedpanel_orchestration::ActionService;
use fedpanel_security::Acknowledgement;
use fedpanel_telemetry::{LogLevel, TelemetryConfig, TelemetrySystem};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "Run privileged Fedora administration actions", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(long, global = true, help = "Set log level")]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true, help = "Print machine-readable JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an action, e.g. `run service.restart -p unit=sshd`
    Run {
        action: String,

        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        #[arg(long, help = "Show the command without running it")]
        dry_run: bool,

        #[arg(long, help = "Confirm a risky action")]
        yes: bool,

        #[arg(long, help = "A system snapshot was taken beforehand")]
        snapshot_taken: bool,
    },
    /// List the available actions
    Actions {
        #[arg(long)]
        category: Option<CapabilityCategory>,
    },
    /// Show recently completed actions
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Undo the most recent action
    Undo {
        #[arg(long, help = "Confirm a risky undo")]
        yes: bool,

        #[arg(long, help = "A system snapshot was taken beforehand")]
        snapshot_taken: bool,
    },
    /// Show the detected system mode
    Mode {
        #[arg(long, help = "Probe the system again")]
        refresh: bool,
    },
}

async fn create_telemetry_config(cli: &Cli, config: &Config) -> Result<TelemetryConfig> {
    let mut telemetry = TelemetryConfig::load(config.telemetry.config_path.as_deref()).await?;
    telemetry.enabled = telemetry.enabled && config.telemetry.enabled;

    if let Some(level) = &cli.log_level {
        match LogLevel::parse(level) {
            Some(level) => telemetry.logging.level = level,
            None => eprintln!("Invalid log level '{}', using default", level),
        }
    } else if std::env::var("FEDPANEL_LOG_LEVEL").is_err() {
        // Keep the terminal for command output unless asked otherwise
        telemetry.logging.level = LogLevel::Warn;
    }
    Ok(telemetry)
}

fn parse_params(service: &ActionService, action: &str, raw: &[String]) -> Result<BTreeMap<String, ParamValue>> {
    let schema = service.catalog().get(action).map(|spec| &spec.schema);
    raw.iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Parameter '{}' must look like KEY=VALUE", pair))?;
            let value = match schema {
                Some(schema) => schema.coerce(name, value),
                None => ParamValue::Text(value.to_string()),
            };
            Ok((name.to_string(), value))
        })
        .collect()
}

fn print_error(error: &ActionError) {
    eprintln!("error: {} [{}]", error.hint, error.code);
    if error.cause.is_some() {
        eprintln!("  details: {}", error.detailed());
    }
}

fn report(result: &ExecutionResult, json: bool, streamed: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        if !streamed && !result.stdout.is_empty() {
            println!("{}", result.stdout.trim_end());
        }
        if result.output_truncated {
            eprintln!("note: output was truncated");
        }
        for warning in &result.warnings {
            eprintln!("warning: {} [{}]", warning.hint, warning.code);
        }
        if let Some(error) = &result.error {
            print_error(error);
        }
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn acknowledgement(yes: bool, snapshot_taken: bool) -> Acknowledgement {
    let ack = if yes {
        Acknowledgement::confirmed()
    } else {
        Acknowledgement::none()
    };
    if snapshot_taken {
        ack.with_snapshot()
    } else {
        ack
    }
}

async fn run_action(
    service: &ActionService,
    cli: &Cli,
    action: &str,
    params: &[String],
    flags: (bool, bool, bool),
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let (dry_run, yes, snapshot_taken) = flags;
    let category = CapabilityCategory::from_action_id(action)
        .ok_or_else(|| anyhow!("'{}' is not a known action; see `fedpanel actions`", action))?;

    let request = OperationRequest::new(category, action)
        .params(parse_params(service, action, params)?)
        .dry_run(dry_run);
    let ack = acknowledgement(yes, snapshot_taken);

    if cli.json {
        let result = service.submit(request, ack, cancel).await;
        return report(&result, true, false);
    }

    let result = service
        .submit_with_output(request, ack, cancel, &mut |chunk| {
            // Broken pipes on the terminal are not worth failing the action over
            let _ = match chunk.stream {
                OutputStream::Stdout => std::io::stdout().write_all(chunk.text.as_bytes()),
                OutputStream::Stderr => std::io::stderr().write_all(chunk.text.as_bytes()),
            };
        })
        .await;
    report(&result, false, !result.dry_run)
}

async fn list_actions(service: &ActionService, category: Option<CapabilityCategory>, json: bool) -> Result<ExitCode> {
    let mut actions: Vec<_> = service
        .catalog()
        .actions()
        .filter(|spec| category.map_or(true, |c| spec.category == c))
        .collect();
    actions.sort_by(|a, b| a.id.cmp(&b.id));

    if json {
        let listing: Vec<_> = actions
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "id": spec.id,
                    "category": spec.category,
                    "summary": spec.summary,
                    "risk": spec.risk,
                    "mutating": spec.mutating,
                    "privileged": spec.privileged,
                    "parameters": spec.schema.specs().iter().map(|p| &p.name).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for spec in actions {
            let params: Vec<&str> = spec.schema.specs().iter().map(|p| p.name.as_str()).collect();
            println!(
                "{:<28} {:<6} {}{}",
                spec.id,
                spec.risk.to_string(),
                spec.summary,
                if params.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", params.join(", "))
                }
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables before parsing configuration
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let telemetry_config = create_telemetry_config(&cli, &config).await?;
    let _telemetry_guard = TelemetrySystem::init(telemetry_config)
        .await
        .map_err(|e| anyhow!("Telemetry initialization failed: {}", e))?;

    info!("Starting fedpanel");

    let service = ActionService::from_config(&config).context("Failed to initialize actions")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    match &cli.command {
        Commands::Run {
            action,
            params,
            dry_run,
            yes,
            snapshot_taken,
        } => {
            run_action(
                &service,
                &cli,
                action,
                params,
                (*dry_run, *yes, *snapshot_taken),
                cancel,
            )
            .await
        }
        Commands::Actions { category } => list_actions(&service, *category, cli.json).await,
        Commands::History { limit } => {
            let entries = service.history(*limit);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No actions recorded");
            } else {
                for entry in entries {
                    println!(
                        "{}  {:<28} {}{}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.action_id,
                        entry.description,
                        if entry.is_reversible() { "" } else { "  (irreversible)" }
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Undo {
            yes,
            snapshot_taken,
        } => match service
            .undo_last(acknowledgement(*yes, *snapshot_taken), cancel)
            .await
        {
            Ok(result) => report(&result, cli.json, false),
            Err(error) => {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&error)?);
                } else {
                    print_error(&error);
                }
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Mode { refresh } => {
            let mode = if *refresh {
                service.refresh_mode().await
            } else {
                service.mode().await
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&mode)?);
            } else {
                println!("backend:    {}", mode.package_backend);
                println!("atomic:     {}", mode.is_atomic);
                println!("snapshots:  {}", mode.checkpoint_available);
                if let Some(desktop) = &mode.desktop {
                    println!("desktop:    {}", desktop);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
