use jiff::civil::Date;
use serde::Serialize;

pub mod merge;
pub mod merged_data_archive;

/// Format of the date column in both sources and in the database.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One day of US totals, the primary source joined with the recovered count
/// of the secondary source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergedRecord {
    pub date: Date,
    pub cases: u32,
    pub deaths: u32,
    pub recovered: u32,
}
