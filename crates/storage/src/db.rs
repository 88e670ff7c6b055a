use async_trait::async_trait;
use chrono::NaiveDate;
use dexter_core::{
    Account, Column, Entry, EntryQuery, EntryUpdate, LedgerError, LedgerStore, MatchRule, Money, StoreError, Tag,
    Transaction, TransactionId, TransactionQuery,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            name TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            abbrev TEXT,
            comment TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            comment TEXT,
            tags TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            uid TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            account TEXT NOT NULL,
            side TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            transaction_id INTEGER,
            FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry_tags (
            uid TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (uid, tag),
            FOREIGN KEY (uid) REFERENCES entries(uid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_entries (
            transaction_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            uid TEXT NOT NULL,
            PRIMARY KEY (transaction_id, position),
            FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (uid) REFERENCES entries(uid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            expr TEXT NOT NULL,
            repl TEXT NOT NULL DEFAULT '',
            acct TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_account ON entries(account, date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entry_tags_tag ON entry_tags(tag)")
        .execute(pool)
        .await?;

    Ok(())
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

type EntryRow = (String, NaiveDate, String, String, String, i64, Option<i64>, String);

const ENTRY_SELECT: &str = "SELECT e.uid, e.date, e.description, e.account, e.side, e.amount_cents, \
     e.transaction_id, COALESCE(GROUP_CONCAT(t.tag, ' '), '') \
     FROM entries e LEFT JOIN entry_tags t ON t.uid = e.uid";

fn entry_from_row(row: EntryRow) -> Result<Entry, LedgerError> {
    let (uid, date, description, account, side, cents, tx_id, tags) = row;
    let tags = tags
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<BTreeSet<Tag>, _>>()?;
    Ok(Entry {
        uid,
        date,
        description,
        account,
        column: side.parse::<Column>()?,
        amount: Money::from_cents(cents),
        tags,
        transaction: tx_id.map(TransactionId),
    })
}

async fn upsert_entry(conn: &mut SqliteConnection, entry: &Entry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO entries (uid, date, description, account, side, amount_cents, transaction_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(uid) DO UPDATE SET date = excluded.date, description = excluded.description, \
         account = excluded.account, side = excluded.side, amount_cents = excluded.amount_cents, \
         transaction_id = excluded.transaction_id",
    )
    .bind(&entry.uid)
    .bind(entry.date)
    .bind(&entry.description)
    .bind(&entry.account)
    .bind(entry.column.as_str())
    .bind(entry.amount.to_cents())
    .bind(entry.transaction.map(|id| id.0))
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM entry_tags WHERE uid = ?")
        .bind(&entry.uid)
        .execute(&mut *conn)
        .await?;
    for tag in &entry.tags {
        sqlx::query("INSERT INTO entry_tags (uid, tag) VALUES (?, ?)")
            .bind(&entry.uid)
            .bind(tag.as_str())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn write_transaction(conn: &mut SqliteConnection, tx: &Transaction) -> Result<TransactionId, StoreError> {
    let tags = tx.tags.join(" ");
    let id = match tx.id {
        Some(id) => {
            sqlx::query("UPDATE transactions SET description = ?, comment = ?, tags = ? WHERE id = ?")
                .bind(&tx.description)
                .bind(&tx.comment)
                .bind(&tags)
                .bind(id.0)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            sqlx::query("DELETE FROM transaction_entries WHERE transaction_id = ?")
                .bind(id.0)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            id
        }
        None => {
            let result = sqlx::query("INSERT INTO transactions (description, comment, tags) VALUES (?, ?, ?)")
                .bind(&tx.description)
                .bind(&tx.comment)
                .bind(&tags)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            TransactionId(result.last_insert_rowid())
        }
    };

    for (position, entry) in tx.entries().iter().enumerate() {
        let linked = sqlx::query("UPDATE entries SET transaction_id = ? WHERE uid = ?")
            .bind(id.0)
            .bind(&entry.uid)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        if linked.rows_affected() == 0 {
            return Err(StoreError::NotFound(entry.uid.clone()));
        }
        sqlx::query("INSERT INTO transaction_entries (transaction_id, position, uid) VALUES (?, ?, ?)")
            .bind(id.0)
            .bind(position as i64)
            .bind(&entry.uid)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
    }
    Ok(id)
}

/// [`LedgerStore`] over a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(create_db(path).await.map_err(backend)?))
    }

    async fn transaction_entries(&self, id: i64) -> Result<Vec<Entry>, StoreError> {
        let sql = format!(
            "{ENTRY_SELECT} JOIN transaction_entries te ON te.uid = e.uid \
             WHERE te.transaction_id = ? GROUP BY e.uid ORDER BY MIN(te.position)"
        );
        let rows = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<String>)>(
            "SELECT name, category, abbrev, comment FROM accounts ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut accounts = Vec::with_capacity(rows.len());
        for (name, category, abbrev, comment) in rows {
            accounts.push(Account {
                name,
                category: category.parse()?,
                abbrev,
                comment,
            });
        }
        Ok(accounts)
    }

    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO accounts (name, category, abbrev, comment) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET category = excluded.category, \
             abbrev = excluded.abbrev, comment = excluded.comment",
        )
        .bind(&account.name)
        .bind(account.category.as_str())
        .bind(&account.abbrev)
        .bind(&account.comment)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<MatchRule>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT action, expr, repl, acct FROM match_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut rules = Vec::with_capacity(rows.len());
        for (action, expr, repl, acct) in rows {
            rules.push(MatchRule {
                action: action.parse()?,
                expr,
                repl,
                acct,
            });
        }
        Ok(rules)
    }

    async fn replace_rules(&self, rules: &[MatchRule]) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM match_rules")
            .execute(&mut *db_tx)
            .await
            .map_err(backend)?;
        for rule in rules {
            sqlx::query("INSERT INTO match_rules (action, expr, repl, acct) VALUES (?, ?, ?, ?)")
                .bind(rule.action.as_str())
                .bind(&rule.expr)
                .bind(&rule.repl)
                .bind(&rule.acct)
                .execute(&mut *db_tx)
                .await
                .map_err(backend)?;
        }
        db_tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn select_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(ENTRY_SELECT);
        builder.push(" WHERE 1 = 1");
        if let Some(tag) = query.tag {
            builder
                .push(" AND e.uid IN (SELECT uid FROM entry_tags WHERE tag = ")
                .push_bind(tag.as_str())
                .push(")");
        }
        if let (Some(account), false) = (&query.account, query.account_prefix) {
            builder.push(" AND e.account = ").push_bind(account.clone());
        }
        if let Some(column) = query.column {
            builder.push(" AND e.side = ").push_bind(column.as_str());
        }
        if let Some(start) = query.start_date {
            builder.push(" AND e.date >= ").push_bind(start);
        }
        if let Some(end) = query.end_date {
            builder.push(" AND e.date <= ").push_bind(end);
        }
        builder.push(" GROUP BY e.uid ORDER BY e.date, e.rowid");

        let rows = builder
            .build_query_as::<EntryRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = entry_from_row(row)?;
            if query.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        upsert_entry(&mut *db_tx, entry).await.map_err(backend)?;
        db_tx.commit().await.map_err(backend)
    }

    async fn update_entry(&self, uid: &str, update: &EntryUpdate) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entries WHERE uid = ?")
            .bind(uid)
            .fetch_one(&mut *db_tx)
            .await
            .map_err(backend)?;
        if exists == 0 {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        for tag in &update.remove_tags {
            sqlx::query("DELETE FROM entry_tags WHERE uid = ? AND tag = ?")
                .bind(uid)
                .bind(tag.as_str())
                .execute(&mut *db_tx)
                .await
                .map_err(backend)?;
        }
        for tag in &update.add_tags {
            sqlx::query("INSERT OR IGNORE INTO entry_tags (uid, tag) VALUES (?, ?)")
                .bind(uid)
                .bind(tag.as_str())
                .execute(&mut *db_tx)
                .await
                .map_err(backend)?;
        }
        db_tx.commit().await.map_err(backend)
    }

    async fn delete_entry(&self, uid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM entries WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        Ok(())
    }

    async fn uids(&self) -> Result<HashSet<String>, StoreError> {
        let uids = sqlx::query_scalar::<_, String>("SELECT uid FROM entries")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(uids.into_iter().collect())
    }

    async fn save_transaction(&self, tx: &Transaction) -> Result<TransactionId, StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        let id = write_transaction(&mut *db_tx, tx).await?;
        db_tx.commit().await.map_err(backend)?;
        Ok(id)
    }

    async fn select_transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, String)>(
            "SELECT id, description, comment, tags FROM transactions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut found = Vec::new();
        for (id, description, comment, tags) in rows {
            let mut tx = Transaction::new(&description, self.transaction_entries(id).await?)?;
            tx.comment = comment;
            tx.tags = tags.split_whitespace().map(str::to_string).collect();
            tx.assign_id(TransactionId(id));
            if query.matches(&tx) {
                found.push(tx);
            }
        }
        Ok(found)
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("UPDATE entries SET transaction_id = NULL WHERE transaction_id = ?")
            .bind(id.0)
            .execute(&mut *db_tx)
            .await
            .map_err(backend)?;
        let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
            .bind(id.0)
            .execute(&mut *db_tx)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        db_tx.commit().await.map_err(backend)
    }

    /// All writes of one pairing in a single database transaction.
    async fn commit_pairing(&self, tx: &Transaction) -> Result<Transaction, StoreError> {
        let mut tx = tx.clone();
        tx.clear_entry_tag(Tag::Unpaired);

        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        for entry in tx.entries() {
            upsert_entry(&mut *db_tx, entry).await.map_err(backend)?;
        }
        let id = write_transaction(&mut *db_tx, &tx).await?;
        db_tx.commit().await.map_err(backend)?;

        tx.assign_id(id);
        tracing::debug!(id = id.0, "committed '{}'", tx.description);
        Ok(tx)
    }
}
