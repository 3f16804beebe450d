pub mod lib_duckdb;
pub mod lib_retry;
#[cfg(test)]
pub(crate) mod test_http;
