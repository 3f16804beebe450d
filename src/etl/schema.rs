use csv::StringRecord;
use jiff::civil::Date;
use thiserror::Error;

/// Column order of the staged csv files and of the target table.
pub const COLUMNS: [&str; 10] = [
    "Comm",
    "Contract_Type",
    "Mth_Code",
    "Year",
    "Strike",
    "Trade_Date",
    "Log_Time",
    "Price",
    "Msg_Code",
    "Volume",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: {reason}")]
pub struct RowParseError {
    pub line: u64,
    pub column: &'static str,
    pub reason: String,
}

/// One tick from the SGX `WEBPXTICK_DT` file.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRow {
    pub comm: String,
    pub contract_type: String,
    pub mth_code: String,
    pub year: i32,
    pub strike: f32,
    pub trade_date: Date,
    /// Time of the trade as reported, e.g. 84512 for 08:45:12.
    pub log_time: i32,
    pub price: f32,
    pub msg_code: Option<String>,
    pub volume: i32,
}

impl TickRow {
    /// Parse and normalize one csv record.  Every field but `Msg_Code` is
    /// required, an empty `Msg_Code` becomes `None`.
    pub fn from_record(record: &StringRecord, line: u64) -> Result<TickRow, RowParseError> {
        if record.len() != COLUMNS.len() {
            return Err(RowParseError {
                line,
                column: "*",
                reason: format!("expected {} fields, found {}", COLUMNS.len(), record.len()),
            });
        }
        let field = |i: usize| record.get(i).unwrap_or_default().trim();
        let msg_code = field(8);
        Ok(TickRow {
            comm: text(field(0), line, COLUMNS[0])?,
            contract_type: text(field(1), line, COLUMNS[1])?,
            mth_code: text(field(2), line, COLUMNS[2])?,
            year: int(field(3), line, COLUMNS[3])?,
            strike: float(field(4), line, COLUMNS[4])?,
            trade_date: trade_date(field(5), line)?,
            log_time: int(field(6), line, COLUMNS[6])?,
            price: float(field(7), line, COLUMNS[7])?,
            msg_code: if msg_code.is_empty() {
                None
            } else {
                Some(msg_code.to_string())
            },
            volume: int(field(9), line, COLUMNS[9])?,
        })
    }

    /// Field values in column order, `null` stands for a missing `Msg_Code`.
    pub fn fields(&self, null: &str) -> [String; 10] {
        [
            self.comm.clone(),
            self.contract_type.clone(),
            self.mth_code.clone(),
            self.year.to_string(),
            self.strike.to_string(),
            self.trade_date.to_string(),
            self.log_time.to_string(),
            self.price.to_string(),
            self.msg_code.clone().unwrap_or_else(|| null.to_string()),
            self.volume.to_string(),
        ]
    }
}

fn missing(line: u64, column: &'static str) -> RowParseError {
    RowParseError {
        line,
        column,
        reason: "missing value".to_string(),
    }
}

fn text(value: &str, line: u64, column: &'static str) -> Result<String, RowParseError> {
    if value.is_empty() {
        return Err(missing(line, column));
    }
    Ok(value.to_string())
}

fn int(value: &str, line: u64, column: &'static str) -> Result<i32, RowParseError> {
    if value.is_empty() {
        return Err(missing(line, column));
    }
    value.parse::<i32>().map_err(|e| RowParseError {
        line,
        column,
        reason: format!("{:?} is not an int32: {}", value, e),
    })
}

fn float(value: &str, line: u64, column: &'static str) -> Result<f32, RowParseError> {
    if value.is_empty() {
        return Err(missing(line, column));
    }
    match value.parse::<f32>() {
        Ok(x) if x.is_finite() => Ok(x),
        _ => Err(RowParseError {
            line,
            column,
            reason: format!("{:?} is not a finite float32", value),
        }),
    }
}

/// Accepts `2025-03-14` and `20250314`.
fn trade_date(value: &str, line: u64) -> Result<Date, RowParseError> {
    let column = COLUMNS[5];
    if value.is_empty() {
        return Err(missing(line, column));
    }
    let parsed = if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        Date::strptime("%Y%m%d", value)
    } else {
        value.parse::<Date>()
    };
    parsed.map_err(|_| RowParseError {
        line,
        column,
        reason: format!("{:?} is not a date", value),
    })
}
