use anyhow::{Context, Result};
use clap::Parser;
use insight_engine::services::insights::{run_batch, BatchOptions, ReportStatus};
use insight_engine::{cli, config, store::MemoryStore};
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = config::config_path(args.config.clone()).with_context(|| {
        format!(
            "no config file given; pass --config or set {}",
            config::CONFIG_PATH_ENV
        )
    })?;
    let config = config::EngineConfig::load(&config_path)?;

    let data_path = args
        .data
        .clone()
        .or_else(|| config.data_path.clone())
        .context("no observations file given; pass --data or set data_path in the config")?;
    let store = MemoryStore::from_csv_path(&data_path)?;

    let templates: Vec<_> = if args.templates.is_empty() {
        config.templates.clone()
    } else {
        let mut selected = Vec::with_capacity(args.templates.len());
        for id in &args.templates {
            let template = config
                .template(id)
                .with_context(|| format!("unknown template {id}"))?;
            selected.push(template.clone());
        }
        selected
    };

    let published = args
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let options = BatchOptions {
        max_parallel: config.max_parallel,
        force: args.force,
        last_published: args.last_published_dates(templates.iter().map(|t| t.id.as_str()))?,
    };

    tracing::info!(
        published = %published,
        templates = templates.len(),
        metrics = store.metric_ids().len(),
        force = options.force,
        "running insight batch"
    );
    let reports = run_batch(
        Arc::new(store),
        Arc::new(config.seasons.clone()),
        templates,
        published,
        options,
    )
    .await;

    let failed = reports
        .iter()
        .filter(|report| matches!(report.status, ReportStatus::Failed { .. }))
        .count();
    let due = reports.iter().filter(|report| report.is_due()).count();
    tracing::info!(reports = reports.len(), due, failed, "insight batch finished");

    let json = if args.pretty {
        serde_json::to_string_pretty(&reports)?
    } else {
        serde_json::to_string(&reports)?
    };
    match args.output.as_deref() {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write reports to {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").context("failed to write reports to stdout")?;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} insight template(s) failed");
    }
    Ok(())
}
