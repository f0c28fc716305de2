//! Durable storage for the offline queue and payment records.
//!
//! Built on sled's embedded key-value store. Tree layout:
//!
//! | Tree       | Key                                     | Value                  |
//! |------------|-----------------------------------------|------------------------|
//! | `queue`    | `enqueued_at_ms (8B BE) ‖ payment_id (16B)` | `bincode(QueueEntry)` |
//! | `payments` | `payment_id (16B)`                      | `bincode(Payment)`     |
//!
//! Queue keys lead with the enqueue time in big-endian form so sled's
//! lexicographic iteration order *is* FIFO order; the payment id suffix
//! keeps keys unique for entries enqueued in the same millisecond.
//!
//! Queue writes flush before returning: provisional acceptance is a promise
//! the merchant relies on, and a promise that dies with the process is no
//! promise at all.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::Mutex;
use sled::Tree;
use thiserror::Error;

use crate::payment::types::{Payment, PaymentId};

use super::entry_key;
use super::QueueEntry;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Failures in the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("store codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Durable, FIFO-ordered persistence for offline queue entries.
///
/// `insert` must not return until the entry is safe against process
/// restart.
pub trait QueueStore: Send + Sync {
    /// Persists a new entry durably.
    fn insert(&self, entry: &QueueEntry) -> Result<(), StoreError>;

    /// Rewrites an existing entry (retry bookkeeping). Keyed by the
    /// entry's enqueue time and payment id, which never change.
    fn update(&self, entry: &QueueEntry) -> Result<(), StoreError>;

    /// Removes the entry for `payment_id`, if present.
    fn remove(&self, payment_id: &PaymentId) -> Result<(), StoreError>;

    /// All entries, FIFO by enqueue time.
    fn pending(&self) -> Result<Vec<QueueEntry>, StoreError>;

    /// Looks up a single entry.
    fn get(&self, payment_id: &PaymentId) -> Result<Option<QueueEntry>, StoreError>;
}

/// Persistence for payment records, keyed by payment id.
pub trait PaymentStore: Send + Sync {
    /// Inserts or overwrites the record for `payment.id`.
    fn save(&self, payment: &Payment) -> Result<(), StoreError>;

    /// Looks up a payment.
    fn get(&self, payment_id: &PaymentId) -> Result<Option<Payment>, StoreError>;
}

// ---------------------------------------------------------------------------
// Sled-backed store
// ---------------------------------------------------------------------------

/// On-disk store backing both ports with one sled database.
///
/// sled trees support lock-free concurrent reads and serialized writes, so
/// `TerminalDb` is shared across tasks via `Arc` with no extra locking.
#[derive(Clone)]
pub struct TerminalDb {
    db: sled::Db,
    queue: Tree,
    payments: Tree,
}

impl TerminalDb {
    /// Opens (or creates) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a throwaway store that vanishes on drop. For tests.
    pub fn open_temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let queue = db.open_tree("queue")?;
        let payments = db.open_tree("payments")?;
        Ok(Self {
            db,
            queue,
            payments,
        })
    }

    fn find_queue_key(&self, payment_id: &PaymentId) -> Result<Option<Vec<u8>>, StoreError> {
        // The queue stays small (it only holds unreconciled offline
        // payments), so a scan beats maintaining a second index tree.
        for item in self.queue.iter() {
            let (key, _) = item?;
            if key.len() == 24 && &key[8..] == payment_id.as_bytes() {
                return Ok(Some(key.to_vec()));
            }
        }
        Ok(None)
    }
}

impl QueueStore for TerminalDb {
    fn insert(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        let value = bincode::serialize(entry)?;
        self.queue.insert(entry_key(entry), value)?;
        // Durability barrier: the caller promises the merchant "accepted"
        // only after this returns.
        self.db.flush()?;
        Ok(())
    }

    fn update(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        let value = bincode::serialize(entry)?;
        self.queue.insert(entry_key(entry), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn remove(&self, payment_id: &PaymentId) -> Result<(), StoreError> {
        if let Some(key) = self.find_queue_key(payment_id)? {
            self.queue.remove(key)?;
            self.db.flush()?;
        }
        Ok(())
    }

    fn pending(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in self.queue.iter() {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    fn get(&self, payment_id: &PaymentId) -> Result<Option<QueueEntry>, StoreError> {
        match self.find_queue_key(payment_id)? {
            Some(key) => match self.queue.get(key)? {
                Some(value) => Ok(Some(bincode::deserialize(&value)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }
}

impl PaymentStore for TerminalDb {
    fn save(&self, payment: &Payment) -> Result<(), StoreError> {
        let value = bincode::serialize(payment)?;
        self.payments.insert(payment.id.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, payment_id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        match self.payments.get(payment_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile implementation of both ports. Not durable — for tests and for
/// deployments that explicitly opt out of offline acceptance.
#[derive(Default)]
pub struct MemoryStore {
    queue: Mutex<BTreeMap<Vec<u8>, QueueEntry>>,
    payments: Mutex<HashMap<PaymentId, Payment>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryStore {
    fn insert(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        self.queue.lock().insert(entry_key(entry), entry.clone());
        Ok(())
    }

    fn update(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        self.queue.lock().insert(entry_key(entry), entry.clone());
        Ok(())
    }

    fn remove(&self, payment_id: &PaymentId) -> Result<(), StoreError> {
        self.queue
            .lock()
            .retain(|_, e| e.payment_id != *payment_id);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self.queue.lock().values().cloned().collect())
    }

    fn get(&self, payment_id: &PaymentId) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self
            .queue
            .lock()
            .values()
            .find(|e| e.payment_id == *payment_id)
            .cloned())
    }
}

impl PaymentStore for MemoryStore {
    fn save(&self, payment: &Payment) -> Result<(), StoreError> {
        self.payments.lock().insert(payment.id, payment.clone());
        Ok(())
    }

    fn get(&self, payment_id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.lock().get(payment_id).cloned())
    }
}
