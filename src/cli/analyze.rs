use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cli::commands::AnalyzeArgs;
use crate::collaborators::default_collaborators;
use crate::config::{self, AnalysisConfig};
use crate::db::Database;
use crate::errors::HoundError;
use crate::models::PackageData;
use crate::pipeline::{build_pipeline, Context, RunOutcome};

pub async fn handle_analyze(args: AnalyzeArgs) -> Result<(), HoundError> {
    info!(package = %args.package, "Starting package analysis");

    let mut analysis_config = if let Some(config_path) = &args.config {
        config::parse_config(&PathBuf::from(config_path)).await?
    } else {
        AnalysisConfig::default()
    };
    if let Some(output) = &args.output {
        analysis_config.output_dir = PathBuf::from(output);
    }
    config::validate(&analysis_config)?;
    tokio::fs::create_dir_all(&analysis_config.output_dir).await?;

    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let created_at = Utc::now().to_rfc3339();

    let package = PackageData::new(&args.package, args.version.clone());
    let collaborators = default_collaborators(&analysis_config);
    let pipeline = build_pipeline(&collaborators);
    let output_dir = analysis_config.output_dir.clone();
    let context = Context::new(Arc::new(analysis_config), package);

    let (context, outcome) = pipeline.run(context).await?;
    let package = context.into_package();

    // Persist the record whatever the outcome; an aborted run still carries
    // every fact discovered before the abort.
    let db = Database::new(&args.db)?;
    db.save_run(&run_id, &package, &outcome, &created_at)?;
    let record_path = output_dir.join(format!("{run_id}.json"));
    tokio::fs::write(
        &record_path,
        serde_json::to_string_pretty(&package.to_record())?,
    )
    .await?;

    match &outcome {
        RunOutcome::Aborted { task } => {
            warn!(run_id = %run_id, task, record = %record_path.display(), "Analysis aborted")
        }
        RunOutcome::Halted { task } => {
            info!(run_id = %run_id, task, record = %record_path.display(), "Analysis halted with confirmed exploit")
        }
        RunOutcome::Completed => {
            info!(run_id = %run_id, record = %record_path.display(), "Analysis completed")
        }
    }
    Ok(())
}
