use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cx_anomaly_detector::config::AppConfig;
use cx_anomaly_detector::mock::{self, MockOptions};
use cx_anomaly_detector::{db, evaluate, predict, server, table, telemetry, train};

#[derive(Parser)]
#[command(name = "cx-anomaly-detector")]
#[command(about = "Unsupervised anomaly detection for customer-service interactions", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the feature pipeline and every configured model, then save artifacts
    Train,
    /// Score an inference table with every model and write a results CSV
    Predict {
        /// Inference CSV (defaults to data.inference_path)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output directory (defaults to data.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also store the run in Postgres
        #[arg(long)]
        persist: bool,
    },
    /// Re-score the training table and write a markdown evaluation report
    Evaluate,
    /// Serve the scoring API
    Serve,
    /// Create or upgrade the prediction database schema
    InitDb,
    /// Write a synthetic interactions CSV
    Generate {
        #[arg(long, default_value_t = 930)]
        normal: usize,
        #[arg(long, default_value_t = 70)]
        anomalous: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value = "data/input/mock_train.csv")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            normal,
            anomalous,
            seed,
            out,
        } => {
            let records = mock::generate_records(&MockOptions {
                normal,
                anomalous,
                seed,
            });
            table::write_records(&out, &records)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote {} interactions to {}.", records.len(), out.display());
        }
        Commands::Train => {
            let config = load_config(cli.config.as_deref())?;
            let trained = tokio::task::spawn_blocking(move || train::run_training(&config))
                .await?
                .context("training failed")?;
            for model in &trained.models {
                println!(
                    "{} ({}) threshold {:.4} at p{}",
                    model.name,
                    model.metadata.algorithm,
                    model.metadata.threshold,
                    model.metadata.threshold_percentile
                );
            }
        }
        Commands::Predict {
            input,
            output,
            persist,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let database_url = config.database.url.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                predict::run_prediction(&config, input.as_deref(), output.as_deref())
            })
            .await?
            .context("prediction failed")?;
            println!(
                "Scored {} records, {} anomalies. Results written to {}.",
                outcome.scored.len(),
                outcome.anomaly_count(),
                outcome.output_path.display()
            );

            if persist {
                let url = database_url
                    .context("DATABASE_URL must be set to persist predictions")?;
                let pool = db::connect(&url).await?;
                let run_id =
                    db::persist_predictions(&pool, &outcome.selection, &outcome.scored).await?;
                println!("Stored prediction run {run_id}.");
            }
        }
        Commands::Evaluate => {
            let config = load_config(cli.config.as_deref())?;
            let outcome = tokio::task::spawn_blocking(move || evaluate::run_evaluation(&config))
                .await?
                .context("evaluation failed")?;
            println!("Report written to {}.", outcome.report_path.display());
        }
        Commands::Serve => {
            let config = load_config(cli.config.as_deref())?;
            server::serve(config).await?;
        }
        Commands::InitDb => {
            let config = load_config(cli.config.as_deref())?;
            let url = config
                .database
                .url
                .context("DATABASE_URL must be set to a production Postgres instance")?;
            let pool = db::connect(&url).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).context("failed to load configuration")
}
