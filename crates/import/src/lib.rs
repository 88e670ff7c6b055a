pub mod csv;
pub mod pairing;
pub mod rules;
pub mod uid;

pub use csv::{import_accounts, import_entries, CsvColumnMapping, CsvError, CsvImportProfile, DateWindow};
pub use pairing::{
    commit_report, missing_rule_accounts, CommitSummary, PairingEngine, PairingReport, PairingSummary,
    Unmatched, UnmatchedReason,
};
pub use rules::{CompiledRule, RuleError, RuleSet, Template, Transform};
pub use uid::{AssignedBatch, ImportError, UidAssigner, MAX_UID_RETRIES};
