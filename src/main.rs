use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};

use ridership_ablation::ablation::run_ablation;
use ridership_ablation::config::Args;
use ridership_ablation::logging::init_logging;
use ridership_ablation::model::ForestBackend;
use ridership_ablation::run_context::create_run_context;
use ridership_ablation::run_meta::RunMeta;
use ridership_ablation::schema::write_schema_version_json;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_file.as_deref())?;

    let config_path = args.config.clone();
    let cfg = args.into_run_config().context("resolve run config")?;
    let ctx = create_run_context(cfg).context("create results layout")?;

    RunMeta::from_context(&ctx, config_path.as_deref())
        .write_to_dir(&ctx.results_dir)
        .context("write run_meta.json")?;
    write_schema_version_json(&ctx.results_dir, ctx.start_ts_ms)
        .context("write schema_version.json")?;
    info!(
        run_id = %ctx.run_id,
        raw_csv = %ctx.config.raw_csv.display(),
        results_dir = %ctx.results_dir.display(),
        "run started"
    );

    let report = run_ablation(&ctx, &ForestBackend)?;
    if !report.all_ok() {
        error!(
            failed = report.failed,
            skipped = report.skipped,
            "ablation finished with failures"
        );
        anyhow::bail!(
            "{} of {} experiments failed ({} skipped)",
            report.failed,
            report.total,
            report.skipped
        );
    }

    info!("done");
    Ok(())
}
