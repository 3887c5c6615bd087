use crate::domain::account::{Account, IdempotencyRecord};
use crate::domain::ports::{AccountRegistry, LedgerStore, LedgerTransaction, LedgerTransactionBox};
use crate::error::LedgerError;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Column Family for account balances.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for idempotency records, keyed by event id.
pub const CF_IDEMPOTENCY: &str = "idempotency";

/// A persistent ledger backed by RocksDB.
///
/// Accounts and idempotency records live in separate Column Families. A
/// transaction holds a process-wide write lock and stages its writes in a
/// `WriteBatch`, which is applied atomically on commit. The key check on
/// insert happens under that lock, which is what makes the idempotency key
/// unique.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_accounts = ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default());
        let cf_idempotency = ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_accounts, cf_idempotency])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

fn column_family<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, LedgerError> {
    db.cf_handle(name)
        .ok_or_else(|| LedgerError::Internal(format!("column family `{name}` not found")))
}

fn read_account(db: &DB, id: Uuid) -> Result<Option<Account>, LedgerError> {
    let cf = column_family(db, CF_ACCOUNTS)?;
    match db.get_pinned_cf(cf, id.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedger {
    async fn begin(&self) -> Result<LedgerTransactionBox, LedgerError> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        Ok(Box::new(RocksDbTransaction {
            db: Arc::clone(&self.db),
            _guard: guard,
            batch: WriteBatch::default(),
            claimed: HashSet::new(),
            balances: HashMap::new(),
        }))
    }
}

#[async_trait]
impl AccountRegistry for RocksDbLedger {
    async fn open_account(&self, account: Account) -> Result<bool, LedgerError> {
        let _guard = self.write_lock.lock().await;
        if read_account(&self.db, account.id)?.is_some() {
            return Ok(false);
        }
        let cf = column_family(&self.db, CF_ACCOUNTS)?;
        self.db
            .put_cf(cf, account.id.as_bytes(), serde_json::to_vec(&account)?)?;
        Ok(true)
    }

    async fn account(&self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        read_account(&self.db, id)
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let cf = column_family(&self.db, CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            accounts.push(serde_json::from_slice(&value)?);
        }
        Ok(accounts)
    }
}

struct RocksDbTransaction {
    db: Arc<DB>,
    _guard: OwnedMutexGuard<()>,
    batch: WriteBatch,
    claimed: HashSet<Uuid>,
    balances: HashMap<Uuid, Decimal>,
}

#[async_trait]
impl LedgerTransaction for RocksDbTransaction {
    async fn insert_idempotency_record(
        &mut self,
        record: &IdempotencyRecord,
    ) -> Result<(), LedgerError> {
        let cf = column_family(&self.db, CF_IDEMPOTENCY)?;
        let key = record.event_id.as_bytes();
        if self.claimed.contains(&record.event_id) || self.db.get_pinned_cf(cf, key)?.is_some() {
            return Err(LedgerError::DuplicateKey(record.event_id));
        }
        self.batch.put_cf(cf, key, serde_json::to_vec(record)?);
        self.claimed.insert(record.event_id);
        Ok(())
    }

    async fn adjust_balance(
        &mut self,
        account_id: Uuid,
        delta: Decimal,
    ) -> Result<u64, LedgerError> {
        let current = match self.balances.get(&account_id) {
            Some(balance) => *balance,
            None => match read_account(&self.db, account_id)? {
                Some(account) => account.balance,
                None => return Ok(0),
            },
        };

        let balance = current
            .checked_add(delta)
            .ok_or(LedgerError::Overflow(account_id))?;
        let updated = Account::new(account_id, balance);
        let cf = column_family(&self.db, CF_ACCOUNTS)?;
        self.batch
            .put_cf(cf, account_id.as_bytes(), serde_json::to_vec(&updated)?);
        self.balances.insert(account_id, updated.balance);
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let RocksDbTransaction { db, batch, .. } = *self;
        db.write(batch)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
