//! Durable queues backed by RocksDB.
//!
//! Each queue is an ordered sequence of strings stored under keys
//! `q:{queue}:{seq}` with a zero-padded, monotonically increasing sequence
//! number, so a prefix scan yields the queue front to back. The full queue
//! contents are mirrored in memory; every mutation goes through a
//! [`Txn`] whose writes land in a single `WriteBatch`, so a pop/append pair
//! is either fully persisted or not at all.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use rocksdb::{Options, WriteBatch, DB};

use crate::error::{QueueError, Result};

const KEY_PREFIX: &str = "q:";

/// The controller's durable sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Raw announced node IDs not yet seen online.
    Announce,
    /// Node IDs accepted for placement in the chain.
    Registered,
    /// Online node IDs that have not announced yet.
    Waiting,
    /// Node IDs polling for a cfg message that is not ready.
    Hold,
    /// Serialized cfg messages awaiting delivery.
    Cfg,
    /// Node IDs that have had a cfg message published.
    Publish,
    /// Node IDs currently online at the controller.
    Node,
    /// The open bootstrap segment, in join order.
    Boot,
}

impl Queue {
    pub const ALL: [Queue; 8] = [
        Queue::Announce,
        Queue::Registered,
        Queue::Waiting,
        Queue::Hold,
        Queue::Cfg,
        Queue::Publish,
        Queue::Node,
        Queue::Boot,
    ];

    /// Storage name of the queue.
    pub const fn name(self) -> &'static str {
        match self {
            Queue::Announce => "announce",
            Queue::Registered => "registered",
            Queue::Waiting => "waiting",
            Queue::Hold => "hold",
            Queue::Cfg => "active/cfg",
            Queue::Publish => "publish",
            Queue::Node => "node",
            Queue::Boot => "boot",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.name() == name)
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn item_key(queue: Queue, seq: u64) -> String {
    format!("{}{}:{:020}", KEY_PREFIX, queue.name(), seq)
}

#[derive(Debug, Clone, Default)]
struct Sequence {
    next: u64,
    items: VecDeque<(u64, String)>,
}

/// A set of queue mutations committed atomically.
pub struct Txn<'a> {
    seqs: &'a mut HashMap<Queue, Sequence>,
    batch: WriteBatch,
}

impl Txn<'_> {
    fn seq(&mut self, queue: Queue) -> &mut Sequence {
        self.seqs.entry(queue).or_default()
    }

    /// Append a value to the back of `queue`.
    pub fn append(&mut self, queue: Queue, value: impl Into<String>) {
        let value = value.into();
        let seq = self.seq(queue);
        let n = seq.next;
        seq.next += 1;
        seq.items.push_back((n, value.clone()));
        self.batch.put(item_key(queue, n).as_bytes(), value.as_bytes());
    }

    /// Remove and return the front of `queue`.
    pub fn pop_left(&mut self, queue: Queue) -> Option<String> {
        let (n, value) = self.seq(queue).items.pop_front()?;
        self.batch.delete(item_key(queue, n).as_bytes());
        Some(value)
    }

    /// Remove and return the first value matching `pred`.
    pub fn remove_first(&mut self, queue: Queue, pred: impl Fn(&str) -> bool) -> Option<String> {
        let seq = self.seq(queue);
        let pos = seq.items.iter().position(|(_, v)| pred(v))?;
        let (n, value) = seq.items.remove(pos)?;
        self.batch.delete(item_key(queue, n).as_bytes());
        Some(value)
    }

    /// Remove every value matching `pred`. Returns number removed.
    pub fn remove_where(&mut self, queue: Queue, pred: impl Fn(&str) -> bool) -> usize {
        let seq = self.seq(queue);
        let mut removed = Vec::new();
        seq.items.retain(|(n, v)| {
            if pred(v) {
                removed.push(*n);
                false
            } else {
                true
            }
        });
        for n in &removed {
            self.batch.delete(item_key(queue, *n).as_bytes());
        }
        removed.len()
    }

    /// Remove every occurrence of `value`. Returns number removed.
    pub fn remove_all(&mut self, queue: Queue, value: &str) -> usize {
        self.remove_where(queue, |v| v == value)
    }

    /// Empty `queue`. Returns number removed.
    pub fn clear(&mut self, queue: Queue) -> usize {
        self.remove_where(queue, |_| true)
    }

    /// Snapshot of `queue`, front to back.
    pub fn items(&self, queue: Queue) -> Vec<String> {
        self.seqs
            .get(&queue)
            .map(|s| s.items.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of values in `queue`.
    pub fn len(&self, queue: Queue) -> usize {
        self.seqs.get(&queue).map_or(0, |s| s.items.len())
    }

    /// Check whether `queue` is empty.
    pub fn is_empty(&self, queue: Queue) -> bool {
        self.len(queue) == 0
    }

    /// Check whether `value` is in `queue`.
    pub fn contains(&self, queue: Queue, value: &str) -> bool {
        self.count(queue, value) > 0
    }

    /// Number of occurrences of `value` in `queue`.
    pub fn count(&self, queue: Queue, value: &str) -> usize {
        self.seqs
            .get(&queue)
            .map_or(0, |s| s.items.iter().filter(|(_, v)| v == value).count())
    }
}

/// Crash-durable queue storage shared by the refresh loop and the message
/// responders.
pub struct QueueStore {
    db: DB,
    seqs: Mutex<HashMap<Queue, Sequence>>,
}

impl QueueStore {
    /// Open or create storage at the given path, loading all queues.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;

        let mut seqs: HashMap<Queue, Sequence> = HashMap::new();
        let prefix = KEY_PREFIX.as_bytes();
        for item in db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let key = String::from_utf8_lossy(&key).into_owned();
            let (queue, n) = key
                .strip_prefix(KEY_PREFIX)
                .and_then(|rest| rest.rsplit_once(':'))
                .and_then(|(name, n)| Some((Queue::from_name(name)?, n.parse::<u64>().ok()?)))
                .ok_or_else(|| QueueError::Corrupt(key.clone()))?;
            let value = String::from_utf8(value.to_vec())
                .map_err(|_| QueueError::Corrupt(key.clone()))?;

            let seq = seqs.entry(queue).or_default();
            seq.next = seq.next.max(n + 1);
            seq.items.push_back((n, value));
        }

        for (queue, seq) in &seqs {
            tracing::debug!("Loaded queue {} ({} items)", queue, seq.items.len());
        }

        Ok(Self {
            db,
            seqs: Mutex::new(seqs),
        })
    }

    /// Run `f` as one transaction.
    ///
    /// The queue lock is held for the whole closure, so other tasks observe
    /// either none or all of its mutations. Nothing is persisted if `f`
    /// returns an error.
    pub fn transact<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.seqs.lock().map_err(|_| QueueError::Poisoned)?;
        let mut working = guard.clone();
        let mut txn = Txn {
            seqs: &mut working,
            batch: WriteBatch::default(),
        };
        let out = f(&mut txn)?;
        let batch = txn.batch;
        if !batch.is_empty() {
            self.db.write(batch)?;
        }
        *guard = working;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<Queue, Sequence>) -> T) -> Result<T> {
        let guard = self.seqs.lock().map_err(|_| QueueError::Poisoned)?;
        Ok(f(&guard))
    }

    /// Append a value to the back of `queue`.
    pub fn append(&self, queue: Queue, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        self.transact(|txn| {
            txn.append(queue, value);
            Ok(())
        })
    }

    /// Remove and return the front of `queue`.
    pub fn pop_left(&self, queue: Queue) -> Result<Option<String>> {
        self.transact(|txn| Ok(txn.pop_left(queue)))
    }

    /// Snapshot of `queue`, front to back.
    pub fn items(&self, queue: Queue) -> Result<Vec<String>> {
        self.read(|seqs| {
            seqs.get(&queue)
                .map(|s| s.items.iter().map(|(_, v)| v.clone()).collect())
                .unwrap_or_default()
        })
    }

    /// Number of values in `queue`.
    pub fn len(&self, queue: Queue) -> Result<usize> {
        self.read(|seqs| seqs.get(&queue).map_or(0, |s| s.items.len()))
    }

    /// Check whether `value` is in `queue`.
    pub fn contains(&self, queue: Queue, value: &str) -> Result<bool> {
        Ok(self.count(queue, value)? > 0)
    }

    /// Number of occurrences of `value` in `queue`.
    pub fn count(&self, queue: Queue, value: &str) -> Result<usize> {
        self.read(|seqs| {
            seqs.get(&queue)
                .map_or(0, |s| s.items.iter().filter(|(_, v)| v == value).count())
        })
    }
}
