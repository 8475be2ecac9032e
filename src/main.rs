use anyhow::{Context, Result};
use image_pipeline::cli::commands::{resolve_step, RunCommand, StepsAction, StepsCommand, ValidateCommand};
use image_pipeline::cli::output::*;
use image_pipeline::cli::terminal_output::TerminalPresenter;
use image_pipeline::cli::{Cli, Command};
use image_pipeline::core::config::source_from_locations;
use image_pipeline::core::defaults::NEW_STEP_CODE;
use image_pipeline::persistence::open_storage;
use image_pipeline::{AppConfig, ImageVision, Mat, Orchestrator, Presenter, StepCompiler, StepStore};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = AppConfig::discover(cli.config.as_deref()).context("Failed to load config")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &config).await?,
        Command::Steps(cmd) => manage_steps(cmd, &config).await?,
        Command::Validate(cmd) => validate(cmd, &config).await?,
    }

    Ok(())
}

async fn open_store(config: &AppConfig) -> Result<StepStore> {
    let storage = open_storage(&config.storage)
        .await
        .context("Failed to open step storage")?;
    let mut store = StepStore::new(storage, config.storage.key.clone());
    store.load(&config.seed_steps()).await;
    Ok(store)
}

fn compiler(config: &AppConfig) -> StepCompiler<ImageVision> {
    StepCompiler::new(Arc::new(ImageVision::new()), &config.sandbox)
}

async fn run_pipeline(cmd: &RunCommand, config: &AppConfig) -> Result<()> {
    let store = open_store(config).await?;
    let source = if cmd.images.is_empty() {
        config.default_source()
    } else {
        source_from_locations(&cmd.images)
    };

    let out_dir = cmd.out.clone().unwrap_or_else(|| config.output_dir.clone());
    let mut presenter = TerminalPresenter::new(&out_dir);
    if cmd.no_progress || cmd.json {
        presenter = presenter.without_progress();
    }

    println!(
        "{}Running {} steps over {} images",
        ROCKET,
        style(store.list().iter().filter(|s| s.enabled).count()).cyan(),
        style(source.len()).cyan()
    );
    println!("{}", style(separator()).dim());

    let presenter: Arc<dyn Presenter<Mat>> = Arc::new(presenter);
    let orchestrator = Orchestrator::new(compiler(config), store, presenter, source);
    let summary = match orchestrator.rerun().await {
        Ok(summary) => summary,
        Err(e) => {
            println!("{}{}", CROSS, style(&e).red());
            error!("{}", e);
            std::process::exit(1);
        }
    };
    orchestrator.show_final_result().await;

    println!("{}", style(separator()).dim());
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", format_summary(&summary));
    }

    Ok(())
}

async fn manage_steps(cmd: &StepsCommand, config: &AppConfig) -> Result<()> {
    let mut store = open_store(config).await?;
    let compiler = compiler(config);

    let resolve = |store: &StepStore, key: &str| -> Result<String> {
        resolve_step(store.list(), key).map_err(anyhow::Error::msg)
    };

    match &cmd.action {
        StepsAction::List { code, json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(store.list())?);
                return Ok(());
            }
            if store.is_empty() {
                println!("{}No steps", INFO);
                return Ok(());
            }
            for (i, step) in store.list().iter().enumerate() {
                println!("{}", format_step_definition(i + 1, step));
                if *code {
                    println!("{}", format_code(&step.code));
                }
            }
        }
        StepsAction::Add { name, code } => {
            if name.trim().is_empty() {
                anyhow::bail!("Step name must not be empty");
            }
            let code = code.read()?.unwrap_or_else(|| NEW_STEP_CODE.to_string());
            if let Err(e) = compiler.check_syntax(&code) {
                println!("{}{}", CROSS, format_step_error(&e));
                std::process::exit(1);
            }
            let step = store.add(name, &code).await?;
            println!("{}Added {}", CHECK, format_step_definition(store.len(), &step));
        }
        StepsAction::Edit { step, name, code } => {
            let id = resolve(&store, step)?;
            let Some(current) = store.get(&id).cloned() else {
                anyhow::bail!("No step with id {}", id);
            };
            let name = name.clone().unwrap_or(current.name);
            if name.trim().is_empty() {
                anyhow::bail!("Step name must not be empty");
            }
            let code = code.read()?.unwrap_or(current.code);
            if let Err(e) = compiler.check_syntax(&code) {
                println!("{}{}", CROSS, format_step_error(&e));
                std::process::exit(1);
            }
            store.update(&id, &name, &code).await?;
            println!("{}Updated {}", CHECK, style(&name).bold());
        }
        StepsAction::Remove { step } => {
            let id = resolve(&store, step)?;
            store.remove(&id).await?;
            println!("{}Removed {}", CHECK, style(short_id(&id)).dim());
        }
        StepsAction::Move { step, direction } => {
            let id = resolve(&store, step)?;
            if let Some(index) = store.position(&id) {
                store.move_step(index, (*direction).into()).await?;
            }
            for (i, step) in store.list().iter().enumerate() {
                println!("{}", format_step_definition(i + 1, step));
            }
        }
        StepsAction::Enable { step } | StepsAction::Disable { step } => {
            let enabled = matches!(cmd.action, StepsAction::Enable { .. });
            let id = resolve(&store, step)?;
            store.set_enabled(&id, enabled).await?;
            if let Some(step) = store.get(&id) {
                let position = store.position(&id).unwrap_or(0) + 1;
                println!("{}{}", CHECK, format_step_definition(position, step));
            }
        }
        StepsAction::Reset { yes } => {
            if !*yes && !confirm(&format!("Replace all {} steps with the defaults?", store.len()))? {
                println!("{}Cancelled", INFO);
                return Ok(());
            }
            store.reset(&config.seed_steps()).await?;
            println!("{}Reset to {} default steps", CHECK, store.len());
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    let term = console::Term::stdout();
    term.write_str(&format!("{} [y/N] ", prompt))?;
    let answer = term.read_line()?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn validate(cmd: &ValidateCommand, config: &AppConfig) -> Result<()> {
    println!("{}Validating configuration and steps...", INFO);

    let store = open_store(config).await?;
    let compiler = compiler(config);

    let mut report = Vec::new();
    for (i, step) in store.list().iter().enumerate() {
        let result = compiler.check_syntax(&step.code);
        match &result {
            Ok(()) => println!("{}{}", CHECK, format_step_definition(i + 1, step)),
            Err(e) => println!(
                "{}{}\n       {}",
                CROSS,
                format_step_definition(i + 1, step),
                format_step_error(e)
            ),
        }
        report.push(serde_json::json!({
            "id": step.id,
            "name": step.name,
            "enabled": step.enabled,
            "error": result.as_ref().err().map(|e| e.to_string()),
        }));
    }

    let failures = report.iter().filter(|r| !r["error"].is_null()).count();

    if cmd.json {
        let data = serde_json::json!({
            "config": config,
            "steps": report,
        });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    if failures > 0 {
        println!("{}{} of {} steps have syntax errors", CROSS, failures, report.len());
        std::process::exit(1);
    }
    println!("{}Configuration and {} steps are valid", CHECK, report.len());
    Ok(())
}
