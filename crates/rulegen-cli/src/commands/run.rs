//! `rulegen run`: generate rule documents

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use rulegen_core::{
    Catalog, Config, Job, LibraryEntry, LibraryFilter, LlmClient, MdcWriter, ProgressStore,
    PromptBuilder, ResearchCache, ResearchClient, Scheduler, StatusClassifier,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::{RunProgress, render_run_summary};

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(workers) = args.workers {
        config.processing.max_workers = workers;
    }
    if let Some(calls) = args.rate_limit {
        config.api.rate_limit_calls = calls;
    }
    if let Some(output) = &args.output {
        config.paths.output_dir.clone_from(output);
    }
    if let Some(research_dir) = &args.research_dir {
        config.paths.research_dir.clone_from(research_dir);
    }
    if args.no_research {
        config.research.enabled = false;
    }
}

/// Fetch research for selected libraries that have none cached yet.
async fn research(
    config: &Config,
    entries: &[LibraryEntry],
    cancel: &CancellationToken,
) -> Result<()> {
    if !config.research.enabled || entries.is_empty() {
        return Ok(());
    }
    let Some(client) = ResearchClient::from_config(&config.research)? else {
        warn!(
            "{} is not set, generating without fetched research",
            config.research.api_key_env
        );
        return Ok(());
    };

    let cache = ResearchCache::new(&config.paths.research_dir);
    let classifier = StatusClassifier::new(config.api.transient_statuses.clone());
    let summary = cache
        .fill(
            &client,
            entries,
            config.research.concurrency,
            &config.retry_policy(),
            &classifier,
            cancel,
        )
        .await;
    if summary.failed > 0 {
        warn!(failed = summary.failed, "some libraries will be generated without research");
    }
    Ok(())
}

fn select_entries(catalog: &Catalog, args: &RunArgs) -> Result<Vec<LibraryEntry>> {
    let filter = LibraryFilter {
        category: args.category.clone(),
        subcategory: args.subcategory.clone(),
        library: args.library.clone(),
    };

    if args.test {
        let entry = catalog.select_test(&filter)?;
        info!(library = %entry.id(), "test mode");
        return Ok(vec![entry]);
    }

    let entries = catalog.select(&filter);
    if entries.is_empty() && !filter.is_empty() {
        return Err(CliError::not_found(anyhow!("no library in the catalog matches the filter")).into());
    }
    Ok(entries)
}

/// Run the scheduler over every selected library.
///
/// Returns an [`Incomplete`](crate::error::ErrorCategory::Incomplete) error
/// when any library failed or was left pending.
pub async fn execute(mut config: Config, args: &RunArgs, quiet: bool) -> Result<()> {
    apply_overrides(&mut config, args);
    config.validate()?;

    let client = LlmClient::from_config(&config.api)?;
    let catalog = Catalog::load(&config.paths.libraries)?;
    let entries = select_entries(&catalog, args)?;

    let store = Arc::new(
        ProgressStore::open(&config.paths.progress_file)
            .context("Failed to open the progress store")?,
    );
    let mut unfinished = Vec::with_capacity(entries.len());
    for entry in &entries {
        if !store.is_done(&entry.id())? {
            unfinished.push(entry.clone());
        }
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight work");
                cancel.cancel();
            }
        }
    });

    if let Err(err) = research(&config, &unfinished, &cancel).await {
        interrupt.abort();
        return Err(err);
    }

    let prompts = PromptBuilder::from_file(&config.paths.instructions)
        .with_research_dir(&config.paths.research_dir);
    let jobs: Vec<Job> = entries.iter().map(|entry| prompts.build_job(entry)).collect();

    let writer = MdcWriter::new(&config.paths.output_dir);
    let scheduler = Scheduler::new(config.scheduler_config(), client, writer, store);

    let pending = scheduler.pending_count(&jobs)?;
    info!(
        selected = jobs.len(),
        pending,
        model = %config.api.model,
        "starting run"
    );

    let progress = RunProgress::new(pending, quiet);
    let scheduler = scheduler.with_progress({
        let callback = progress.callback();
        move |completed, total| callback(completed, total)
    });

    let result = scheduler.run(jobs, &cancel).await;
    interrupt.abort();
    progress.finish();
    let summary = result?;

    if !quiet {
        render_run_summary(&mut std::io::stdout().lock(), &summary)?;
    }

    if summary.is_complete() {
        Ok(())
    } else {
        Err(CliError::incomplete(anyhow!(
            "{} failed, {} pending; run again to retry",
            summary.failed,
            summary.pending
        ))
        .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CATALOG: &str = r#"{
        "frontend_frameworks": {"react": ["react", "next.js"], "vue": ["vue"]},
        "backend": {"python": ["django"]}
    }"#;

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::default();
        let args = RunArgs {
            workers: Some(9),
            rate_limit: Some(10),
            output: Some(PathBuf::from("elsewhere")),
            research_dir: Some(PathBuf::from("notes")),
            no_research: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.processing.max_workers, 9);
        assert_eq!(config.api.rate_limit_calls, 10);
        assert_eq!(config.paths.output_dir, PathBuf::from("elsewhere"));
        assert_eq!(config.paths.research_dir, PathBuf::from("notes"));
        assert!(!config.research.enabled);
    }

    #[test]
    fn test_select_by_subcategory() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let args = RunArgs {
            subcategory: Some("react".into()),
            ..RunArgs::default()
        };
        let names: Vec<_> = select_entries(&catalog, &args)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["react", "next.js"]);
    }

    #[test]
    fn test_test_mode_selects_one() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let args = RunArgs {
            test: true,
            ..RunArgs::default()
        };
        let entries = select_entries(&catalog, &args).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id().as_str(), "frontend_frameworks/react/react");
    }

    #[test]
    fn test_unmatched_filter_is_not_found() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let args = RunArgs {
            library: Some("rails".into()),
            ..RunArgs::default()
        };
        let err = select_entries(&catalog, &args).unwrap_err();
        assert_eq!(crate::error::exit_code_from_error(&err), 3);
    }
}
