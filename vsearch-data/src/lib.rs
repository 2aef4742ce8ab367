mod sink;

pub use sink::{CsvSink, DataError, HEADER};
