use duckdb::{params, Connection};
use jiff::civil::Date;
use log::info;

use super::{MergedRecord, DATE_FORMAT};
use crate::error::EtlError;

const INSERT_SQL: &str = r#"
INSERT INTO covid_merged_data (cdate, cases, deaths, recovered)
VALUES (CAST(? AS DATE), ?, ?, ?);
"#;

#[derive(Clone)]
pub struct CovidMergedDataArchive {
    pub duckdb_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// The table was empty, every record got inserted in one transaction.
    Bulk,
    /// Only records newer than the stored maximum date got inserted.
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub mode: LoadMode,
    pub previous_max_date: Option<Date>,
    pub inserted: usize,
    pub skipped: usize,
}

impl CovidMergedDataArchive {
    pub fn connect(&self) -> Result<Connection, EtlError> {
        let conn = Connection::open(&self.duckdb_path).map_err(|err| {
            EtlError::DatabaseConnection {
                path: self.duckdb_path.clone(),
                err,
            }
        })?;
        info!("SUCCESS: connection to {} succeeded", self.duckdb_path);
        Ok(conn)
    }

    pub fn create_table(&self, conn: &Connection) -> Result<(), EtlError> {
        conn.execute_batch(
            r#"
CREATE SEQUENCE IF NOT EXISTS covid_merged_data_id_seq START 1;
CREATE TABLE IF NOT EXISTS covid_merged_data (
    id BIGINT PRIMARY KEY DEFAULT nextval('covid_merged_data_id_seq'),
    cdate DATE,
    cases UINTEGER NOT NULL,
    deaths UINTEGER NOT NULL,
    recovered UINTEGER NOT NULL
);
"#,
        )?;
        Ok(())
    }

    pub fn row_count(&self, conn: &Connection) -> Result<u64, EtlError> {
        let n = conn.query_row("SELECT count(*) FROM covid_merged_data;", [], |row| {
            row.get::<usize, i64>(0)
        })?;
        Ok(n as u64)
    }

    /// The high-water date of the table, `None` if there are no dated rows.
    pub fn max_date(&self, conn: &Connection) -> Result<Option<Date>, EtlError> {
        let value = conn.query_row(
            "SELECT strftime(max(cdate), '%Y-%m-%d') FROM covid_merged_data;",
            [],
            |row| row.get::<usize, Option<String>>(0),
        )?;
        value.map(|s| stored_date(&s)).transpose()
    }

    /// All stored rows, in insertion order.
    pub fn get_data(&self, conn: &Connection) -> Result<Vec<MergedRecord>, EtlError> {
        let mut stmt = conn.prepare(
            r#"
SELECT strftime(cdate, '%Y-%m-%d'), cases, deaths, recovered
FROM covid_merged_data
ORDER BY id;
"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<usize, String>(0)?,
                    row.get::<usize, u32>(1)?,
                    row.get::<usize, u32>(2)?,
                    row.get::<usize, u32>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(cdate, cases, deaths, recovered)| {
                Ok(MergedRecord {
                    date: stored_date(&cdate)?,
                    cases,
                    deaths,
                    recovered,
                })
            })
            .collect()
    }

    /// Insert the records not yet in the table.
    ///
    /// An empty table gets all the records in one transaction.  Otherwise only
    /// records strictly after the stored maximum date are inserted, each one
    /// committed on its own.  Records are inserted in the order given.
    pub fn load(
        &self,
        conn: &mut Connection,
        records: &[MergedRecord],
    ) -> Result<LoadSummary, EtlError> {
        self.create_table(conn)?;

        if self.row_count(conn)? == 0 {
            info!(
                "table covid_merged_data is empty, inserting all {} rows",
                records.len()
            );
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(INSERT_SQL)?;
                for record in records {
                    insert(&mut stmt, record)?;
                }
            }
            tx.commit()?;
            return Ok(LoadSummary {
                mode: LoadMode::Bulk,
                previous_max_date: None,
                inserted: records.len(),
                skipped: 0,
            });
        }

        let max_date = self.max_date(conn)?;
        info!(
            "most recent date in covid_merged_data is {}",
            max_date.map_or("NULL".to_string(), |d| d.to_string())
        );
        let mut stmt = conn.prepare(INSERT_SQL)?;
        let mut inserted = 0;
        for record in records {
            if max_date.is_some_and(|d| record.date <= d) {
                continue;
            }
            info!("inserting new row with date of {}", record.date);
            insert(&mut stmt, record)?;
            inserted += 1;
        }
        info!("inserted {} new rows", inserted);

        Ok(LoadSummary {
            mode: LoadMode::Incremental,
            previous_max_date: max_date,
            inserted,
            skipped: records.len() - inserted,
        })
    }
}

fn insert(stmt: &mut duckdb::Statement<'_>, record: &MergedRecord) -> Result<(), EtlError> {
    stmt.execute(params![
        record.date.to_string(),
        record.cases,
        record.deaths,
        record.recovered
    ])?;
    Ok(())
}

fn stored_date(s: &str) -> Result<Date, EtlError> {
    Date::strptime(DATE_FORMAT, s).map_err(|e| EtlError::Parse {
        what: "covid_merged_data.cdate".to_string(),
        line: 0,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use duckdb::Connection;
    use jiff::civil::date;

    use super::*;

    fn archive() -> CovidMergedDataArchive {
        CovidMergedDataArchive {
            duckdb_path: ":memory:".to_string(),
        }
    }

    fn record(day: Date, cases: u32) -> MergedRecord {
        MergedRecord {
            date: day,
            cases,
            deaths: cases / 50,
            recovered: cases / 2,
        }
    }

    fn seed(conn: &mut Connection) -> Result<Vec<MergedRecord>, Box<dyn Error>> {
        let records = vec![
            record(date(2021, 1, 1), 1000),
            record(date(2021, 1, 2), 1100),
            record(date(2021, 1, 3), 1200),
        ];
        archive().load(conn, &records)?;
        Ok(records)
    }

    #[test]
    fn empty_table_gets_all_rows() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = archive();
        let records = seed(&mut conn)?;
        assert_eq!(archive.row_count(&conn)?, 3);
        assert_eq!(archive.get_data(&conn)?, records);
        assert_eq!(archive.max_date(&conn)?, Some(date(2021, 1, 3)));
        Ok(())
    }

    #[test]
    fn bulk_load_summary() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let summary = archive().load(&mut conn, &[record(date(2021, 1, 1), 5)])?;
        assert_eq!(summary.mode, LoadMode::Bulk);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.previous_max_date, None);
        Ok(())
    }

    #[test]
    fn rerun_inserts_nothing() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = archive();
        let records = seed(&mut conn)?;
        let summary = archive.load(&mut conn, &records)?;
        assert_eq!(summary.mode, LoadMode::Incremental);
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(archive.row_count(&conn)?, 3);
        Ok(())
    }

    #[test]
    fn next_day_is_inserted_once() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = archive();
        let mut records = seed(&mut conn)?;
        let new_day = record(date(2021, 1, 4), 1300);
        records.push(new_day);

        let summary = archive.load(&mut conn, &records)?;
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.previous_max_date, Some(date(2021, 1, 3)));
        assert_eq!(archive.row_count(&conn)?, 4);
        assert_eq!(archive.get_data(&conn)?.last(), Some(&new_day));
        Ok(())
    }

    #[test]
    fn older_dates_are_not_backfilled() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = archive();
        archive.load(&mut conn, &[record(date(2021, 1, 5), 10)])?;
        let summary = archive.load(
            &mut conn,
            &[record(date(2021, 1, 2), 7), record(date(2021, 1, 5), 10)],
        )?;
        assert_eq!(summary.inserted, 0);
        assert_eq!(archive.row_count(&conn)?, 1);
        Ok(())
    }

    #[test]
    fn insertion_order_is_kept() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let archive = archive();
        let records = vec![
            record(date(2021, 1, 3), 3),
            record(date(2021, 1, 1), 1),
            record(date(2021, 1, 2), 2),
        ];
        archive.load(&mut conn, &records)?;
        assert_eq!(archive.get_data(&conn)?, records);
        Ok(())
    }

    #[test]
    fn create_table_twice() -> Result<(), Box<dyn Error>> {
        let conn = Connection::open_in_memory()?;
        let archive = archive();
        archive.create_table(&conn)?;
        archive.create_table(&conn)?;
        assert_eq!(archive.row_count(&conn)?, 0);
        assert_eq!(archive.max_date(&conn)?, None);
        Ok(())
    }

    #[test]
    fn connect_to_missing_dir_fails() {
        let archive = CovidMergedDataArchive {
            duckdb_path: "/nonexistent/covid_etl/covid.duckdb".to_string(),
        };
        assert!(matches!(
            archive.connect(),
            Err(EtlError::DatabaseConnection { .. })
        ));
    }
}
