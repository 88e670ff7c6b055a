pub mod account;
pub mod entry;
pub mod error;
pub mod memory;
pub mod money;
pub mod rule;
pub mod store;
pub mod transaction;

pub use account::{Account, AccountTable, Category};
pub use entry::{compute_uid, Column, Entry, Tag};
pub use error::{LedgerError, StoreError};
pub use memory::MemoryStore;
pub use money::{Money, MoneyParseError};
pub use rule::{Action, MatchRule};
pub use store::{EntryQuery, EntryUpdate, LedgerStore, TransactionQuery};
pub use transaction::{Transaction, TransactionId};
