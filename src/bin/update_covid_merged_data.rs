use std::{error::Error, path::Path, process};

use clap::Parser;
use covid_etl::{config::Config, job::CovidEtl};
use log::{error, info, warn};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Run this job once a day, after the sources publish the previous day.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    if let Err(e) = dotenvy::from_path(Path::new(&env_file)) {
        warn!("Could not load {}: {}, using the process environment", env_file, e);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let job = match CovidEtl::from_config(&config) {
        Ok(job) => job,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    match job.handle(&Value::Null) {
        Ok(status) => {
            info!("{}", status);
            Ok(())
        }
        Err(e) => {
            error!("Covid ETL run failed: {}", e);
            process::exit(1);
        }
    }
}
