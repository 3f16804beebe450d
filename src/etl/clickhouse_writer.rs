use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;

use crate::config::ClickHouseSettings;
use crate::etl::schema::TickRow;
use crate::etl::writer::{encode_csv, BatchInsertError, TableWriter};

/// ClickHouse reads `\N` as NULL in CSV input.
pub const CLICKHOUSE_NULL: &str = "\\N";

pub fn create_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    Comm String,
    Contract_Type String,
    Mth_Code String,
    Year Int32,
    Strike Float32,
    Trade_Date Date,
    Log_Time Int32,
    Price Float32,
    Msg_Code Nullable(String),
    Volume Int32
)
ENGINE = MergeTree
PARTITION BY toYYYYMM(Trade_Date)
ORDER BY (Trade_Date, Comm, Contract_Type)"#
    )
}

pub fn insert_sql(table: &str) -> String {
    format!("INSERT INTO {} FORMAT CSV", table)
}

/// Talks to the ClickHouse HTTP interface, one POST per batch.
pub struct ClickHouseWriter {
    client: Client,
    settings: ClickHouseSettings,
}

impl ClickHouseWriter {
    pub fn new(settings: &ClickHouseSettings) -> Result<Self, BatchInsertError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(ClickHouseWriter {
            client,
            settings: settings.clone(),
        })
    }

    /// Without `query` the body is the statement.
    fn request(&self, query: Option<&str>) -> RequestBuilder {
        let mut params = Vec::new();
        if let Some(query) = query {
            params.push(("query", query));
        }
        if let Some(database) = &self.settings.database {
            params.push(("database", database.as_str()));
        }
        let mut request = self.client.post(&self.settings.url).query(&params);
        if let Some(user) = &self.settings.user {
            request = request.basic_auth(user, self.settings.password.as_ref());
        }
        request
    }

    fn send(&self, request: RequestBuilder) -> Result<(), BatchInsertError> {
        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        Err(BatchInsertError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

impl TableWriter for ClickHouseWriter {
    fn ensure_table(&self, table: &str) -> Result<(), BatchInsertError> {
        let sql = create_table_sql(table);
        self.send(self.request(None).body(sql))
    }

    fn write_batch(&self, table: &str, rows: &[TickRow]) -> Result<(), BatchInsertError> {
        if rows.is_empty() {
            return Ok(());
        }
        let body = encode_csv(rows, CLICKHOUSE_NULL)?;
        let query = insert_sql(table);
        self.send(
            self.request(Some(&query))
                .header(CONTENT_TYPE, "text/csv")
                .body(body),
        )
    }
}
