use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::context::{ComparisonContext, ComparisonContextBuilder};
use super::due::{is_due, DueCheck, DueDecision};
use super::period::{resolve_period, PeriodOfInterest};
use super::season::SeasonMapping;
use super::template::InsightTemplate;
use crate::error::EngineError;
use crate::store::ObservationStore;
use crate::time::DateRange;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_parallel: usize,
    pub force: bool,
    /// Last publication date per template id.
    pub last_published: HashMap<String, NaiveDate>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            force: false,
            last_published: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Evaluated {
        due: DueDecision,
        context: Box<ComparisonContext>,
    },
    Skipped {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        due: Option<DueDecision>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightReport {
    pub template_id: String,
    pub metric_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<PeriodOfInterest>,
    #[serde(flatten)]
    pub status: ReportStatus,
}

impl InsightReport {
    fn new(template: &InsightTemplate, period: Option<PeriodOfInterest>, status: ReportStatus) -> Self {
        Self {
            template_id: template.id.clone(),
            metric_id: template.metric_id.clone(),
            period,
            status,
        }
    }

    pub fn is_due(&self) -> bool {
        matches!(&self.status, ReportStatus::Evaluated { due, .. } if due.is_due)
    }

    pub fn context(&self) -> Option<&ComparisonContext> {
        match &self.status {
            ReportStatus::Evaluated { context, .. } => Some(context.as_ref()),
            _ => None,
        }
    }
}

/// Evaluates one template for a publication date. Never panics on data
/// problems; every outcome is expressed as a report.
pub fn evaluate_template<S: ObservationStore + ?Sized>(
    store: &S,
    seasons: &SeasonMapping,
    template: &InsightTemplate,
    published: NaiveDate,
    options: &BatchOptions,
) -> InsightReport {
    if !template.active {
        return InsightReport::new(
            template,
            None,
            ReportStatus::Skipped {
                reason: "template is inactive".to_string(),
                due: None,
            },
        );
    }

    let history = match store.history_bounds(&template.metric_id) {
        Ok(history) => history,
        Err(err) => {
            tracing::error!(template = %template.id, error = %err, "failed to read history bounds");
            return InsightReport::new(
                template,
                None,
                ReportStatus::Failed {
                    error: err.to_string(),
                },
            );
        }
    };
    let most_recent_day = history
        .zip(published.pred_opt())
        .map(|(history, yesterday)| history.end.min(yesterday));

    let Some(period) = resolve_period(template.reference_period, published, most_recent_day, seasons)
    else {
        return InsightReport::new(
            template,
            None,
            ReportStatus::Failed {
                error: format!("cannot resolve reference period for {published}"),
            },
        );
    };

    // The latest observation of the period that is already published.
    let search = published
        .pred_opt()
        .and_then(|yesterday| DateRange::new(period.start, period.end.min(yesterday)));
    let latest = match search.map(|range| store.observations_in(&template.metric_id, range)) {
        Some(Ok(observations)) => observations.into_iter().rev().find(|obs| obs.value.is_finite()),
        Some(Err(err)) => {
            tracing::error!(template = %template.id, error = %err, "failed to read period observations");
            return InsightReport::new(
                template,
                Some(period),
                ReportStatus::Failed {
                    error: err.to_string(),
                },
            );
        }
        None => None,
    };
    let Some(current) = latest else {
        let due = is_due(&DueCheck {
            period: &period,
            has_data: false,
            last_published: options.last_published.get(&template.id).copied(),
            verdict: None,
            force: options.force,
        });
        tracing::info!(
            template = %template.id,
            metric_id = %template.metric_id,
            period_start = %period.start,
            period_end = %period.end,
            "no observation in reference period; skipping"
        );
        let reason = format!(
            "no observation for metric {} between {} and {}",
            template.metric_id, period.start, period.end
        );
        return InsightReport::new(
            template,
            Some(period),
            ReportStatus::Skipped {
                reason,
                due: Some(due),
            },
        );
    };

    let builder = ComparisonContextBuilder::new(store, seasons);
    let built = builder.build(
        &template.metric_id,
        current.date,
        &template.windows,
        &template.significance,
    );
    let mut context = match built {
        Ok(context) => context,
        Err(err) if err.is_skippable() => {
            tracing::info!(
                template = %template.id,
                metric_id = %template.metric_id,
                anchor_date = %current.date,
                "no current observation; skipping"
            );
            return InsightReport::new(
                template,
                Some(period),
                ReportStatus::Skipped {
                    reason: err.to_string(),
                    due: None,
                },
            );
        }
        Err(err) => {
            tracing::error!(template = %template.id, error = %err, "failed to build comparison context");
            return InsightReport::new(
                template,
                Some(period),
                ReportStatus::Failed {
                    error: err.to_string(),
                },
            );
        }
    };
    context.period = Some(period.clone());

    let due = is_due(&DueCheck {
        period: &period,
        has_data: true,
        last_published: options.last_published.get(&template.id).copied(),
        verdict: Some(&context.verdict),
        force: options.force,
    });
    tracing::info!(
        template = %template.id,
        anchor_date = %context.anchor_date,
        due = due.is_due,
        reason = ?due.reason,
        significance = ?context.verdict.significance,
        "evaluated insight template"
    );

    InsightReport::new(
        template,
        Some(period),
        ReportStatus::Evaluated {
            due,
            context: Box::new(context),
        },
    )
}

/// Evaluates all templates for `published` on blocking workers, at most
/// `options.max_parallel` at a time. Reports are returned in template order.
pub async fn run_batch<S>(
    store: Arc<S>,
    seasons: Arc<SeasonMapping>,
    templates: Vec<InsightTemplate>,
    published: NaiveDate,
    options: BatchOptions,
) -> Vec<InsightReport>
where
    S: ObservationStore + ?Sized + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.max_parallel.max(1)));
    let options = Arc::new(options);
    let mut tasks = JoinSet::new();

    for (idx, template) in templates.into_iter().enumerate() {
        let store = store.clone();
        let seasons = seasons.clone();
        let options = options.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let fallback = template.clone();
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    let status = ReportStatus::Failed {
                        error: format!("worker pool closed: {err}"),
                    };
                    return (idx, InsightReport::new(&fallback, None, status));
                }
            };
            let joined = tokio::task::spawn_blocking(move || {
                evaluate_template(store.as_ref(), &seasons, &template, published, &options)
            })
            .await;
            let report = joined.unwrap_or_else(|err| {
                tracing::error!(template = %fallback.id, error = %err, "insight worker failed");
                InsightReport::new(
                    &fallback,
                    None,
                    ReportStatus::Failed {
                        error: EngineError::Store(format!("worker failed: {err}")).to_string(),
                    },
                )
            });
            (idx, report)
        });
    }

    let mut indexed: Vec<(usize, InsightReport)> = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => indexed.push(entry),
            Err(err) => tracing::error!(error = %err, "insight batch task aborted"),
        }
    }
    indexed.sort_by_key(|(idx, _)| *idx);
    indexed.into_iter().map(|(_, report)| report).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::insights::due::DueReason;
    use crate::services::insights::period::ReferencePeriod;
    use crate::services::insights::significance::{
        ExtremeSide, PublishPredicate, SignificanceConfig,
    };
    use crate::services::insights::window::WindowSpec;
    use crate::store::{MemoryStore, Observation};
    use crate::test_support::{daily_series, date, store_with};

    fn template(id: &str, metric_id: &str) -> InsightTemplate {
        let mut significance = SignificanceConfig::new(PublishPredicate::IsAllTimeExtreme {
            direction: ExtremeSide::High,
        });
        significance.min_sample_size = 3;
        InsightTemplate {
            id: id.to_string(),
            title: String::new(),
            metric_id: metric_id.to_string(),
            reference_period: ReferencePeriod::Daily,
            windows: vec![WindowSpec::trailing_days(30), WindowSpec::all_time(false)],
            significance,
            active: true,
        }
    }

    fn store() -> MemoryStore {
        let mut store = store_with(daily_series("rising", date(2024, 1, 1), &[1.0, 2.0, 3.0, 4.0, 5.0]));
        store.extend(daily_series("flat", date(2024, 1, 1), &[5.0, 5.0, 5.0, 5.0, 1.0]));
        store
    }

    #[test]
    fn daily_template_anchors_on_day_before_publication() {
        let store = store();
        let report = evaluate_template(
            &store,
            &SeasonMapping::default(),
            &template("rising-record", "rising"),
            date(2024, 1, 6),
            &BatchOptions::default(),
        );
        let context = report.context().expect("context");
        assert_eq!(context.anchor_date, date(2024, 1, 5));
        assert_eq!(context.current.value, 5.0);
        assert!(report.is_due());
        assert_eq!(
            report.period.as_ref().map(|p| p.start),
            Some(date(2024, 1, 5))
        );
    }

    #[test]
    fn stale_data_anchors_on_most_recent_day() {
        let store = store();
        let report = evaluate_template(
            &store,
            &SeasonMapping::default(),
            &template("rising-record", "rising"),
            date(2024, 2, 1),
            &BatchOptions::default(),
        );
        assert_eq!(
            report.context().map(|ctx| ctx.anchor_date),
            Some(date(2024, 1, 5))
        );
    }

    #[test]
    fn unknown_metric_is_skipped_not_failed() {
        let report = evaluate_template(
            &store(),
            &SeasonMapping::default(),
            &template("ghost", "missing"),
            date(2024, 1, 6),
            &BatchOptions::default(),
        );
        assert!(matches!(report.status, ReportStatus::Skipped { .. }));
    }

    fn template_for(id: &str, metric_id: &str, period: ReferencePeriod) -> InsightTemplate {
        InsightTemplate {
            reference_period: period,
            ..template(id, metric_id)
        }
    }

    #[test]
    fn weekly_template_anchors_on_latest_observation_of_the_week() {
        let values: Vec<f64> = (0..45).map(f64::from).collect();
        // 2024-04-01 .. 2024-05-15, published on a Wednesday.
        let store = store_with(daily_series("w", date(2024, 4, 1), &values));
        let report = evaluate_template(
            &store,
            &SeasonMapping::default(),
            &template_for("weekly", "w", ReferencePeriod::Weekly),
            date(2024, 5, 15),
            &BatchOptions::default(),
        );
        let context = report.context().expect("context");
        assert_eq!(context.anchor_date, date(2024, 5, 14));
        assert_eq!(context.current.value, 43.0);
        assert_eq!(report.period.as_ref().map(|p| p.start), Some(date(2024, 5, 6)));
        assert!(report.is_due());
    }

    #[test]
    fn monthly_template_over_daily_data_uses_last_day_of_month() {
        let values: Vec<f64> = (0..70).map(f64::from).collect();
        let store = store_with(daily_series("d", date(2024, 1, 1), &values));
        let report = evaluate_template(
            &store,
            &SeasonMapping::default(),
            &template_for("monthly", "d", ReferencePeriod::Monthly),
            date(2024, 3, 5),
            &BatchOptions::default(),
        );
        let context = report.context().expect("context");
        assert_eq!(context.anchor_date, date(2024, 2, 29));
        assert_eq!(context.current.value, 59.0);
        let trailing = context.window("trailing_30_days").expect("trailing");
        assert_eq!(trailing.summary().stats().map(|s| s.max), Some(58.0));
    }

    #[test]
    fn monthly_template_over_month_end_series() {
        let mut store = MemoryStore::new();
        for year in 2010..=2023 {
            store.insert(Observation::new("m", date(year, 12, 31), f64::from(year - 2000)));
        }
        let mut tpl = template_for("december", "m", ReferencePeriod::Monthly);
        tpl.windows = vec![WindowSpec::all_time(true)];
        let report = evaluate_template(
            &store,
            &SeasonMapping::default(),
            &tpl,
            date(2024, 1, 3),
            &BatchOptions::default(),
        );
        let context = report.context().expect("context");
        assert_eq!(context.anchor_date, date(2023, 12, 31));
        assert_eq!(context.current.value, 23.0);
        let window = context.window("all_time_same_month").expect("window");
        assert_eq!(window.summary().count(), 13);
        assert!(report.is_due());
    }

    #[test]
    fn period_without_observations_reports_no_data() {
        let store = store_with(daily_series("w", date(2024, 4, 1), &[1.0, 2.0, 3.0]));
        let report = evaluate_template(
            &store,
            &SeasonMapping::default(),
            &template_for("weekly", "w", ReferencePeriod::Weekly),
            date(2024, 5, 15),
            &BatchOptions {
                force: true,
                ..BatchOptions::default()
            },
        );
        let ReportStatus::Skipped { due: Some(due), .. } = &report.status else {
            panic!("expected a skipped report with a due decision, got {:?}", report.status);
        };
        assert!(!due.is_due);
        assert_eq!(due.reason, DueReason::NoData);
    }

    #[tokio::test]
    async fn batch_preserves_template_order() {
        let store = Arc::new(store());
        let templates = vec![
            template("a", "flat"),
            template("b", "rising"),
            template("c", "missing"),
            template("d", "rising"),
        ];
        let options = BatchOptions {
            max_parallel: 2,
            ..BatchOptions::default()
        };
        let reports = run_batch(
            store,
            Arc::new(SeasonMapping::default()),
            templates,
            date(2024, 1, 6),
            options,
        )
        .await;
        let ids: Vec<&str> = reports.iter().map(|r| r.template_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(!reports[0].is_due());
        assert!(reports[1].is_due());
        assert!(matches!(reports[2].status, ReportStatus::Skipped { .. }));
    }

    #[tokio::test]
    async fn force_regenerates_already_published_reports() {
        let store = Arc::new(store());
        let mut last_published = HashMap::new();
        last_published.insert("b".to_string(), date(2024, 1, 6));
        let options = BatchOptions {
            max_parallel: 1,
            force: false,
            last_published: last_published.clone(),
        };
        let reports = run_batch(
            store.clone(),
            Arc::new(SeasonMapping::default()),
            vec![template("b", "rising")],
            date(2024, 1, 6),
            options,
        )
        .await;
        assert!(!reports[0].is_due());

        let options = BatchOptions {
            max_parallel: 1,
            force: true,
            last_published,
        };
        let forced = run_batch(
            store,
            Arc::new(SeasonMapping::default()),
            vec![template("b", "rising")],
            date(2024, 1, 6),
            options,
        )
        .await;
        assert!(forced[0].is_due());
        assert_eq!(
            serde_json::to_string(reports[0].context().expect("context")).expect("json"),
            serde_json::to_string(forced[0].context().expect("context")).expect("json")
        );
    }
}
