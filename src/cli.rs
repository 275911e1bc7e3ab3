use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "insight-engine",
    version,
    about = "Evaluates insight templates against daily time series"
)]
pub struct Args {
    /// Config file (falls back to INSIGHT_ENGINE_CONFIG).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Observations CSV; overrides the config file and INSIGHT_ENGINE_DATA_PATH.
    #[arg(long)]
    pub data: Option<PathBuf>,
    /// Publication date (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
    /// Only evaluate these template ids.
    #[arg(long = "template")]
    pub templates: Vec<String>,
    #[arg(long, default_value_t = false)]
    pub force: bool,
    /// `YYYY-MM-DD` for every template or `TEMPLATE_ID=YYYY-MM-DD`.
    #[arg(long = "last-published")]
    pub last_published: Vec<String>,
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

impl Args {
    /// Resolves `--last-published` entries for the given template ids. A
    /// template-specific entry wins over a bare date.
    pub fn last_published_dates<'a, I>(&self, template_ids: I) -> Result<HashMap<String, NaiveDate>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut default = None;
        let mut by_template = HashMap::new();
        for entry in &self.last_published {
            let entry = entry.trim();
            match entry.split_once('=') {
                Some((id, raw)) => {
                    let date = parse_date(raw)
                        .with_context(|| format!("invalid --last-published entry {entry}"))?;
                    by_template.insert(id.trim().to_string(), date);
                }
                None => {
                    default = Some(
                        parse_date(entry)
                            .with_context(|| format!("invalid --last-published entry {entry}"))?,
                    );
                }
            }
        }

        let mut resolved = HashMap::new();
        for id in template_ids {
            if let Some(date) = by_template.get(id).copied().or(default) {
                resolved.insert(id.to_string(), date);
            }
        }
        Ok(resolved)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").context("expected YYYY-MM-DD")
}
