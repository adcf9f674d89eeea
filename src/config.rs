use std::env;

use crate::error::EtlError;

/// CSV columns: date,cases,deaths
pub const PRIMARY_URL: &str = "https://github.com/nytimes/covid-19-data/raw/master/us.csv";

/// CSV columns: Date,Country/Region,Province/State,Lat,Long,Confirmed,Recovered,Deaths
pub const SECONDARY_URL: &str =
    "https://raw.githubusercontent.com/datasets/covid-19/master/data/time-series-19-covid-combined.csv";

/// Settings for one run of the job.  Read from the environment, usually after
/// `dotenvy` has loaded `.env/<env>.env`.
#[derive(Clone)]
pub struct Config {
    /// Path of the DuckDB file holding the `covid_merged_data` table
    pub db_name: String,
    pub db_host: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    /// Where notifications get published, an email address
    pub notify_topic: String,
    pub mailtrap_api_key: String,
    pub email_from: String,
    pub primary_url: String,
    pub secondary_url: String,
}

impl Config {
    pub fn from_env() -> Result<Config, EtlError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| EtlError::Config(key.to_string()))
        };

        Ok(Config {
            db_name: required("COVID_DB_NAME")?,
            db_host: lookup("COVID_DB_HOST"),
            db_user: lookup("COVID_DB_USER"),
            db_password: lookup("COVID_DB_PASSWORD"),
            notify_topic: required("COVID_NOTIFY_TOPIC")?,
            mailtrap_api_key: required("MAILTRAP_API_KEY")?,
            email_from: required("EMAIL_FROM")?,
            primary_url: lookup("COVID_PRIMARY_URL").unwrap_or_else(|| PRIMARY_URL.to_string()),
            secondary_url: lookup("COVID_SECONDARY_URL")
                .unwrap_or_else(|| SECONDARY_URL.to_string()),
        })
    }
}
