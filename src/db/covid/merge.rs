use std::collections::HashMap;

use csv::StringRecord;
use jiff::civil::Date;
use log::{info, warn};

use super::{MergedRecord, DATE_FORMAT};
use crate::db::lib_http::TextSource;
use crate::error::EtlError;

/// Secondary source lines are kept only if they contain this text.
pub const US_MARKER: &str = "US";

/// Position of the `Recovered` column in the secondary source.
pub const RECOVERED_COLUMN: usize = 6;

/// A row of the primary source, `date,cases,deaths`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryRow {
    pub date: Date,
    pub cases: u32,
    pub deaths: u32,
}

/// The two fields of a US row of the secondary source that get used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredRow {
    pub date: Date,
    pub recovered: u32,
}

#[derive(Debug, Clone)]
pub struct CovidSources {
    pub primary_url: String,
    pub secondary_url: String,
}

impl CovidSources {
    /// Download both sources and join them on date.  Any download or parse
    /// problem fails the whole merge, there is no partial result.
    pub fn merge<S: TextSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<Vec<MergedRecord>, EtlError> {
        info!("Attempt to get {}", self.primary_url);
        let text = source.get_text(&self.primary_url)?;
        info!("Succeeded to get {}", self.primary_url);
        let primary = parse_primary(&text)?;

        info!("Attempt to get {}", self.secondary_url);
        let text = source.get_text(&self.secondary_url)?;
        info!("Succeeded to get {}", self.secondary_url);
        let secondary = parse_secondary(&text)?;

        info!(
            "Attempt to merge {} primary rows with {} US rows",
            primary.len(),
            secondary.len()
        );
        let merged = merge_rows(&primary, &secondary);
        info!("Succeeded to merge, {} merged rows", merged.len());
        Ok(merged)
    }
}

/// Parse the primary source.  The header line is skipped, every other line
/// must have a valid date and two counts.
pub fn parse_primary(text: &str) -> Result<Vec<PrimaryRow>, EtlError> {
    let what = "primary source";
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(what, e))?;
        let line = line_of(&record);
        if record.len() < 3 {
            return Err(parse_error(
                what,
                line,
                format!("expected 3 fields, got {}", record.len()),
            ));
        }
        rows.push(PrimaryRow {
            date: parse_date(&record[0], what, line)?,
            cases: parse_count(&record[1], what, line)?,
            deaths: parse_count(&record[2], what, line)?,
        });
    }
    Ok(rows)
}

/// Parse the US rows of the secondary source.  Lines without the marker are
/// not validated at all.  An empty recovered field counts as 0.
pub fn parse_secondary(text: &str) -> Result<Vec<RecoveredRow>, EtlError> {
    let what = "secondary source";
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(what, e))?;
        if !record.iter().any(|field| field.contains(US_MARKER)) {
            continue;
        }
        let line = line_of(&record);
        let recovered = match record.get(RECOVERED_COLUMN) {
            Some(field) if field.trim().is_empty() => 0,
            Some(field) => parse_count(field, what, line)?,
            None => {
                return Err(parse_error(
                    what,
                    line,
                    format!("no recovered column, only {} fields", record.len()),
                ))
            }
        };
        rows.push(RecoveredRow {
            date: parse_date(&record[0], what, line)?,
            recovered,
        });
    }
    Ok(rows)
}

/// Join on date.  Output follows the order of `primary`; a primary row
/// without a matching US row is dropped.  A date present several times in
/// `secondary` yields one merged record per occurrence.
pub fn merge_rows(primary: &[PrimaryRow], secondary: &[RecoveredRow]) -> Vec<MergedRecord> {
    let mut recovered_by_date: HashMap<Date, Vec<u32>> = HashMap::new();
    for row in secondary {
        recovered_by_date.entry(row.date).or_default().push(row.recovered);
    }

    let mut merged = Vec::with_capacity(primary.len());
    for row in primary {
        let Some(values) = recovered_by_date.get(&row.date) else {
            continue;
        };
        if values.len() > 1 {
            warn!(
                "{} US rows in the secondary source for {}, emitting one merged row for each",
                values.len(),
                row.date
            );
        }
        for &recovered in values {
            merged.push(MergedRecord {
                date: row.date,
                cases: row.cases,
                deaths: row.deaths,
                recovered,
            });
        }
    }
    merged
}

fn parse_date(field: &str, what: &str, line: u64) -> Result<Date, EtlError> {
    Date::strptime(DATE_FORMAT, field.trim())
        .map_err(|e| parse_error(what, line, format!("bad date {:?}: {}", field, e)))
}

fn parse_count(field: &str, what: &str, line: u64) -> Result<u32, EtlError> {
    field
        .trim()
        .parse::<u32>()
        .map_err(|e| parse_error(what, line, format!("bad count {:?}: {}", field, e)))
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn csv_error(what: &str, e: csv::Error) -> EtlError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    parse_error(what, line, e.to_string())
}

fn parse_error(what: &str, line: u64, reason: String) -> EtlError {
    EtlError::Parse {
        what: what.to_string(),
        line,
        reason,
    }
}
