pub mod clickhouse_writer;
pub mod duckdb_writer;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod writer;
