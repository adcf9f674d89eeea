use duckdb::Connection;
use log::{debug, error, info};
use serde_json::Value;

use crate::{
    config::Config,
    db::{
        covid::{
            merge::CovidSources,
            merged_data_archive::{CovidMergedDataArchive, LoadMode, LoadSummary},
        },
        lib_http::{HttpSource, TextSource},
    },
    error::EtlError,
    utils::send_email::{notify_with_retry, MailtrapNotifier, Notifier, RetryPolicy},
};

pub const STATUS_OK: &str = "Successful run of the Covid ETL program";
pub const SUCCESS_SUBJECT: &str = "Successful run of the Covid ETL job";

/// Download, merge and load the covid data, then notify about the outcome.
pub struct CovidEtl<S, N> {
    pub sources: CovidSources,
    pub archive: CovidMergedDataArchive,
    pub source: S,
    pub notifier: N,
    pub retry: RetryPolicy,
}

impl CovidEtl<HttpSource, MailtrapNotifier> {
    pub fn from_config(config: &Config) -> Result<Self, EtlError> {
        if let Some(host) = &config.db_host {
            info!(
                "database host {} (user {}) is not used, the table lives in {}",
                host,
                config.db_user.as_deref().unwrap_or("-"),
                config.db_name
            );
        }
        Ok(CovidEtl {
            sources: CovidSources {
                primary_url: config.primary_url.clone(),
                secondary_url: config.secondary_url.clone(),
            },
            archive: CovidMergedDataArchive {
                duckdb_path: config.db_name.clone(),
            },
            source: HttpSource::new()?,
            notifier: MailtrapNotifier::new(
                config.email_from.clone(),
                config.notify_topic.clone(),
                config.mailtrap_api_key.clone(),
            ),
            retry: RetryPolicy::default(),
        })
    }
}

impl<S: TextSource, N: Notifier> CovidEtl<S, N> {
    /// Entry point for the scheduler.  The event is opaque and only logged.
    ///
    /// Opens the database, runs the job and sends exactly one notification.
    /// The connection is closed before returning, whatever the outcome.
    pub fn handle(&self, event: &Value) -> Result<String, EtlError> {
        debug!("invoked with event {}", event);
        let outcome = self
            .archive
            .connect()
            .and_then(|mut conn| self.ingest(&mut conn));
        self.report(outcome)
    }

    /// Same as [`CovidEtl::handle`] on an already open connection.
    pub fn handle_with(&self, conn: &mut Connection, event: &Value) -> Result<String, EtlError> {
        debug!("invoked with event {}", event);
        let outcome = self.ingest(conn);
        self.report(outcome)
    }

    fn ingest(&self, conn: &mut Connection) -> Result<LoadSummary, EtlError> {
        let records = self.sources.merge(&self.source)?;
        self.archive.load(conn, &records)
    }

    fn report(&self, outcome: Result<LoadSummary, EtlError>) -> Result<String, EtlError> {
        let (subject, body) = match &outcome {
            Ok(summary) => {
                info!("Successful run of the Covid ETL job: {:?}", summary);
                (SUCCESS_SUBJECT.to_string(), success_body(summary))
            }
            Err(e) => {
                error!("Covid ETL job failed: {}", e);
                (failure_subject(e).to_string(), failure_body(e))
            }
        };
        // delivery problems never change the outcome of the job
        if let Err(e) = notify_with_retry(&self.notifier, &subject, &body, self.retry) {
            error!("{}", e);
        }
        outcome.map(|_| STATUS_OK.to_string())
    }
}

pub fn failure_subject(e: &EtlError) -> &'static str {
    match e {
        EtlError::Retrieval { .. } | EtlError::Parse { .. } => "Extract Transform Module Problem",
        EtlError::DatabaseConnection { .. } => "Covid ETL Database Connection Problem",
        EtlError::DatabaseWrite(_) => "Covid ETL Database Load Problem",
        EtlError::Config(_) | EtlError::Notification { .. } => "Covid ETL Problem",
    }
}

fn failure_body(e: &EtlError) -> String {
    if e.is_extract() {
        format!("Extracting or Transforming data failed due to {}", e)
    } else {
        format!("The Covid ETL job failed due to {}", e)
    }
}

fn success_body(summary: &LoadSummary) -> String {
    let mut body =
        "If new Covid data was found it has been loaded into the database.".to_string();
    match summary.mode {
        LoadMode::Bulk => body.push_str(&format!(
            " The table was empty, {} rows were loaded.",
            summary.inserted
        )),
        LoadMode::Incremental => body.push_str(&format!(
            " {} new row(s) after {}.",
            summary.inserted,
            summary
                .previous_max_date
                .map_or("an undated table".to_string(), |d| d.to_string())
        )),
    }
    body
}
