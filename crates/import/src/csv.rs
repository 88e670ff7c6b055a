use chrono::NaiveDate;
use dexter_core::{Account, Category, Column, Entry, Money, Tag};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvColumnMapping {
    pub date: Option<usize>,
    pub description: Option<usize>,
    /// Single signed amount column.
    pub amount: Option<usize>,
    pub debit: Option<usize>,
    pub credit: Option<usize>,
    pub date_format: String,
    /// For single-column exports: negative amounts go in the credit column.
    pub negative_is_credit: bool,
}

impl Default for CsvColumnMapping {
    fn default() -> Self {
        Self {
            date: None,
            description: None,
            amount: None,
            debit: None,
            credit: None,
            date_format: "%Y-%m-%d".to_string(),
            negative_is_credit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvImportProfile {
    pub name: String,
    #[serde(flatten)]
    pub mapping: CsvColumnMapping,
    pub has_header: bool,
    pub delimiter: String,
    /// Tag every imported entry `#pending`, for instruments that are reconciled.
    pub pending: bool,
    /// Case-insensitive pattern for settlement rows, tagged `#xfer` and `#pending`.
    pub settlement: Option<String>,
}

impl Default for CsvImportProfile {
    fn default() -> Self {
        Self {
            name: "Unnamed Profile".to_string(),
            mapping: CsvColumnMapping::default(),
            has_header: true,
            delimiter: ",".to_string(),
            pending: false,
            settlement: None,
        }
    }
}

/// Inclusive import window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid settlement pattern: {0}")]
    InvalidPattern(String),
    #[error("Invalid account record: {0}")]
    InvalidAccount(String),
    #[error("No data rows")]
    NoDataRows,
}

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%m-%d-%Y", "%Y%m%d", "%b %d, %Y",
];

fn parse_date(s: &str, format: &str) -> Result<NaiveDate, CsvError> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Ok(date);
    }

    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or_else(|| CsvError::InvalidDate(s.to_string()))
}

fn parse_amount(s: &str) -> Result<Money, CsvError> {
    s.parse::<Money>()
        .map_err(|_| CsvError::InvalidAmount(s.trim().to_string()))
}

impl CsvImportProfile {
    fn settlement_pattern(&self) -> Result<Option<Regex>, CsvError> {
        self.settlement
            .as_deref()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CsvError::InvalidPattern(format!("{p}: {e}")))
            })
            .transpose()
    }
}

fn field<'r>(record: &'r csv::StringRecord, col: usize, name: &str) -> Result<&'r str, CsvError> {
    record
        .get(col)
        .ok_or_else(|| CsvError::MissingColumn(format!("{name} column {col}")))
}

/// Reads one bank or card export into `#unpaired` entries for `account`.
/// Rows matching the profile's settlement pattern are also tagged `#xfer`
/// and `#pending`; with `pending` set every row is `#pending`.
/// Uids are provisional; run the batch through [`crate::UidAssigner`].
pub fn import_entries<R: Read>(
    data: R,
    profile: &CsvImportProfile,
    account: &str,
    window: DateWindow,
) -> Result<Vec<Entry>, CsvError> {
    let delimiter = profile
        .delimiter
        .as_bytes()
        .first()
        .copied()
        .unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let headers = if profile.has_header {
        Some(reader.headers()?.clone())
    } else {
        None
    };

    let mapping = &profile.mapping;
    let settlement = profile.settlement_pattern()?;
    let date_col = mapping
        .date
        .ok_or_else(|| CsvError::MissingColumn("date".to_string()))?;

    let mut entries = Vec::new();
    let mut rows = 0usize;

    for result in reader.records() {
        let record = result?;

        if record.is_empty() || headers.as_ref() == Some(&record) {
            continue;
        }
        rows += 1;

        let date = parse_date(field(&record, date_col, "date")?, &mapping.date_format)?;
        if !window.contains(date) {
            continue;
        }

        let description = match mapping.description {
            Some(col) => field(&record, col, "description")?.trim().to_string(),
            None => String::new(),
        };

        let (column, amount) = if let Some(col) = mapping.amount {
            let amt = parse_amount(field(&record, col, "amount")?)?;
            let column = match (amt.is_negative(), mapping.negative_is_credit) {
                (true, true) | (false, false) => Column::Credit,
                _ => Column::Debit,
            };
            (column, amt.abs())
        } else if let (Some(d_col), Some(c_col)) = (mapping.debit, mapping.credit) {
            let debit = record.get(d_col).filter(|s| !s.trim().is_empty());
            let credit = record.get(c_col).filter(|s| !s.trim().is_empty());
            match (debit, credit) {
                (Some(d), _) => (Column::Debit, parse_amount(d)?.abs()),
                (None, Some(c)) => (Column::Credit, parse_amount(c)?.abs()),
                (None, None) => continue,
            }
        } else {
            return Err(CsvError::MissingColumn("amount or debit/credit".to_string()));
        };

        let mut entry = Entry::new(date, &description, account, column, amount)
            .map_err(|e| CsvError::InvalidAmount(e.to_string()))?
            .with_tag(Tag::Unpaired);
        if settlement.as_ref().is_some_and(|re| re.is_match(&description)) {
            entry = entry.with_tag(Tag::Settlement).with_tag(Tag::Pending);
        } else if profile.pending {
            entry = entry.with_tag(Tag::Pending);
        }
        tracing::debug!("new entry: {entry}");
        entries.push(entry);
    }

    if rows == 0 {
        return Err(CsvError::NoDataRows);
    }

    Ok(entries)
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    fullname: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    abbrev: String,
    #[serde(default)]
    comment: String,
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// Reads an account table with the header `fullname,category,abbrev[,comment]`.
/// A blank category is taken from the first segment of the name.
pub fn import_accounts<R: Read>(data: R) -> Result<Vec<Account>, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data);
    let mut accounts = Vec::new();
    for record in reader.deserialize::<AccountRecord>() {
        let record = record?;
        let category = if record.category.trim().is_empty() {
            Category::from_name(&record.fullname)
                .ok_or_else(|| CsvError::InvalidAccount(record.fullname.clone()))?
        } else {
            record
                .category
                .parse()
                .map_err(|_| CsvError::InvalidAccount(format!("{}: {}", record.fullname, record.category)))?
        };
        accounts.push(Account {
            name: record.fullname,
            category,
            abbrev: non_empty(record.abbrev),
            comment: non_empty(record.comment),
        });
    }
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn default_profile() -> CsvImportProfile {
        CsvImportProfile {
            name: "test".to_string(),
            mapping: CsvColumnMapping {
                date: Some(0),
                description: Some(1),
                amount: Some(2),
                ..CsvColumnMapping::default()
            },
            ..CsvImportProfile::default()
        }
    }

    // ── parse_amount / parse_date ─────────────────────────────────────────────

    #[test]
    fn parse_amount_decorated() {
        assert_eq!(parse_amount("$1,234.56").unwrap(), Money::from_cents(123456));
        assert_eq!(parse_amount("(75.25)").unwrap(), Money::from_cents(-7525));
        assert!(parse_amount("not_a_number").is_err());
    }

    #[test]
    fn parse_date_fallbacks() {
        assert_eq!(parse_date("2024-01-15", "%Y-%m-%d").unwrap(), date(2024, 1, 15));
        assert_eq!(parse_date("01/15/2024", "%Y-%m-%d").unwrap(), date(2024, 1, 15));
        assert_eq!(parse_date("20240115", "%Y-%m-%d").unwrap(), date(2024, 1, 15));
        assert_eq!(parse_date("Aug 8, 2024", "%Y-%m-%d").unwrap(), date(2024, 8, 8));
        assert!(parse_date("not-a-date", "%Y-%m-%d").is_err());
    }

    // ── import_entries ────────────────────────────────────────────────────────

    #[test]
    fn signed_amount_column() {
        let data = b"date,description,amount\n2024-01-15,AMAZON,-49.99\n2024-01-16,REFUND,5.00\n";
        let entries =
            import_entries(data.as_ref(), &default_profile(), "liabilities:visa", DateWindow::default())
                .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].column, Column::Credit);
        assert_eq!(entries[0].amount, Money::from_cents(4999));
        assert_eq!(entries[0].account, "liabilities:visa");
        assert!(entries[0].is_unpaired());
        assert_eq!(entries[1].column, Column::Debit);
    }

    #[test]
    fn inverted_sign_convention() {
        let mut profile = default_profile();
        profile.mapping.negative_is_credit = false;
        let data = b"date,description,amount\n2024-01-15,AMAZON,49.99\n";
        let entries = import_entries(data.as_ref(), &profile, "visa", DateWindow::default()).unwrap();
        assert_eq!(entries[0].column, Column::Credit);
    }

    #[test]
    fn debit_credit_columns() {
        let data = b"date,description,debit,credit\n2024-01-15,PAYMENT,,100.00\n2024-01-16,CHARGE,50.00,\n";
        let profile = CsvImportProfile {
            mapping: CsvColumnMapping {
                date: Some(0),
                description: Some(1),
                debit: Some(2),
                credit: Some(3),
                ..CsvColumnMapping::default()
            },
            ..default_profile()
        };
        let entries = import_entries(data.as_ref(), &profile, "checking", DateWindow::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].column, Column::Credit);
        assert_eq!(entries[0].amount, Money::from_cents(10000));
        assert_eq!(entries[1].column, Column::Debit);
    }

    #[test]
    fn date_window_filters_rows() {
        let data = b"date,description,amount\n2024-01-15,A,1\n2024-02-15,B,2\n2024-03-15,C,3\n";
        let window = DateWindow {
            start: Some(date(2024, 2, 1)),
            end: Some(date(2024, 2, 29)),
        };
        let entries = import_entries(data.as_ref(), &default_profile(), "checking", window).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description, "B");
    }

    #[test]
    fn repeated_header_rows_are_skipped() {
        let data = b"date,description,amount\n2024-01-15,A,1\ndate,description,amount\n2024-01-16,B,2\n";
        let entries =
            import_entries(data.as_ref(), &default_profile(), "checking", DateWindow::default()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn settlement_rows_and_pending_profile() {
        let data = b"date,description,amount\n2024-06-01,AMAZON,-40.00\n2024-06-20,Payment Thank You,80.00\n";
        let profile = CsvImportProfile {
            pending: true,
            settlement: Some("^payment".to_string()),
            ..default_profile()
        };
        let entries = import_entries(data.as_ref(), &profile, "liabilities:visa", DateWindow::default()).unwrap();
        assert!(entries[0].has_tag(Tag::Pending));
        assert!(!entries[0].has_tag(Tag::Settlement));
        assert!(entries[1].has_tag(Tag::Settlement));
        assert!(entries[1].has_tag(Tag::Pending));
        assert!(entries.iter().all(|e| e.is_unpaired()));
    }

    #[test]
    fn untagged_profile_marks_nothing_pending() {
        let data = b"date,description,amount\n2024-06-01,PAYMENT,80.00\n";
        let entries =
            import_entries(data.as_ref(), &default_profile(), "checking", DateWindow::default()).unwrap();
        assert!(!entries[0].has_tag(Tag::Pending));
        assert!(!entries[0].has_tag(Tag::Settlement));
    }

    #[test]
    fn bad_settlement_pattern_errors() {
        let profile = CsvImportProfile {
            settlement: Some("(".to_string()),
            ..default_profile()
        };
        let data = b"date,description,amount\n2024-06-01,A,1\n";
        let result = import_entries(data.as_ref(), &profile, "visa", DateWindow::default());
        assert!(matches!(result, Err(CsvError::InvalidPattern(_))));
    }

    #[test]
    fn no_data_rows_errors() {
        let data = b"date,description,amount\n";
        let result = import_entries(data.as_ref(), &default_profile(), "checking", DateWindow::default());
        assert!(matches!(result, Err(CsvError::NoDataRows)));
    }

    #[test]
    fn profile_from_flat_toml() {
        let profile: CsvImportProfile = toml::from_str(
            r#"
            date = 0
            description = 2
            amount = 5
            date_format = "%m/%d/%Y"
            "#,
        )
        .unwrap();
        assert_eq!(profile.mapping.amount, Some(5));
        assert_eq!(profile.mapping.date_format, "%m/%d/%Y");
        assert!(profile.mapping.negative_is_credit);
        assert!(profile.has_header);
        assert!(!profile.pending);
        assert_eq!(profile.settlement, None);
    }

    // ── import_accounts ───────────────────────────────────────────────────────

    #[test]
    fn accounts_with_implied_category() {
        let data = "fullname,category,abbrev\nexpenses:food:groceries,,groceries\nliabilities:chase:visa,liability,\n";
        let accounts = import_accounts(data.as_bytes()).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].category, Category::Expense);
        assert_eq!(accounts[0].abbrev.as_deref(), Some("groceries"));
        assert_eq!(accounts[1].category, Category::Liability);
        assert_eq!(accounts[1].abbrev, None);
    }

    #[test]
    fn account_with_unknown_category_errors() {
        let data = "fullname,category,abbrev\nstuff:things,,\n";
        assert!(matches!(import_accounts(data.as_bytes()), Err(CsvError::InvalidAccount(_))));
    }
}
