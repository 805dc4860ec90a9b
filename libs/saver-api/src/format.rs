/// Pure text formatting of a structured record into one line.
///
/// The returned string must not contain a newline: batches are written
/// as newline-delimited records.
pub trait RecordFormatter<R>: Send + Sync {
    fn format(&self, record: &R) -> String;
}
