use std::io::BufReader;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Local;
use clap::Parser;

use roomflow::app::App;
use roomflow::cli::{parse_kwargs, AuthCommand, Cli, Command, ScheduleCommand};
use roomflow::config::Config;
use roomflow::engine::RunReport;
use roomflow::logging;
use roomflow::summary::tally_log;
use roomflow::task::TaskInfo;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    logging::init(&config)?;

    if let Command::Summary { period } = &cli.command {
        let since = period.since(Local::now());
        let path = config.log_file();
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let totals = tally_log(BufReader::new(file), since)?;
        println!("{}", serde_json::to_string_pretty(&totals)?);
        return Ok(ExitCode::SUCCESS);
    }

    let app = App::bootstrap(config).await?;

    match cli.command {
        Command::Serve => {
            app.scheduler.start().await?;
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, stopping scheduler...");
            app.scheduler.stop().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { id, args } => {
            let kwargs = parse_kwargs(&args)?;
            let report = app.engine.run(&id, &kwargs).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let succeeded = match &report {
                RunReport::Task(task) => task.succeeded(),
                RunReport::Flow(flow) => flow.aborted_at().is_none(),
            };
            Ok(if succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::List { json } => {
            let tasks: Vec<TaskInfo> = app.engine.registry().list().iter().map(|t| t.info()).collect();
            let flows = app.engine.flows().list();
            if json {
                let flows: Vec<_> = flows
                    .iter()
                    .map(|flow| {
                        serde_json::json!({
                            "id": flow.id,
                            "name": flow.name,
                            "steps": flow.steps.iter().map(|s| &s.task_id).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                let listing = serde_json::json!({ "tasks": tasks, "flows": flows });
                println!("{}", serde_json::to_string_pretty(&listing)?);
                return Ok(ExitCode::SUCCESS);
            }

            println!("Tasks:");
            for task in tasks {
                println!(
                    "  {:<24} {:<14} {}{}",
                    task.id,
                    task.outcome,
                    task.name,
                    if task.schedulable { "" } else { " (manual)" }
                );
            }
            println!("Flows:");
            for flow in flows {
                let steps: Vec<&str> = flow.steps.iter().map(|s| s.task_id.as_str()).collect();
                println!("  {:<24} {} [{}]", flow.id, flow.name, steps.join(" | "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Schedule { action } => {
            let store = app.scheduler.store();
            match action {
                ScheduleCommand::Show => {
                    app.scheduler.reload().await?;
                    let overview = app.scheduler.overview().await;
                    println!("{}", serde_json::to_string_pretty(&overview)?);
                }
                ScheduleCommand::Profiles => {
                    for name in store.list_profiles()? {
                        println!("{}", name);
                    }
                }
                ScheduleCommand::Save { name } => {
                    store.save_profile(&name)?;
                    println!("Saved schedule profile '{}'", name);
                }
                ScheduleCommand::Load { name } => {
                    let jobs = app.scheduler.load_profile(&name).await?;
                    println!("Loaded schedule profile '{}' ({} job(s))", name, jobs);
                }
                ScheduleCommand::Delete { name } => {
                    if !store.delete_profile(&name)? {
                        anyhow::bail!("Schedule profile '{}' not found", name);
                    }
                    println!("Deleted schedule profile '{}'", name);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Auth { action } => {
            match action {
                AuthCommand::Status { profile } => {
                    let status = app.auth.status(app.profile(profile.as_deref())).await?;
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                AuthCommand::Backup { profile } => {
                    let profile = app.profile(profile.as_deref());
                    app.auth.backup(profile).await?;
                    println!("Backed up auth state for '{}'", profile);
                }
                AuthCommand::Restore { profile } => {
                    let profile = app.profile(profile.as_deref());
                    app.auth.restore(profile).await?;
                    println!("Restored auth state for '{}'", profile);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Summary { .. } => Ok(ExitCode::SUCCESS),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
