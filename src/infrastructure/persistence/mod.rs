pub mod csv_log;
pub mod records;

pub use csv_log::CsvLog;
