//! In-memory store with Redis semantics
//!
//! One mutex guards the whole keyspace, so a transaction applies every
//! queued command without interleaving, the same way a single-threaded Redis
//! runs EXEC. Expiry is evaluated lazily against a `Clock`.
//!
//! Only the command subset in `StoreCommand` is supported. Empty lists and
//! sets are removed, matching Redis.

use super::{MergeStore, Reply, StoreCommand, Transaction};
use crate::clock::{Clock, ProductionClock, Timestamp};
use crate::error::StoreResult;
use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    String(String),
    List(VecDeque<String>),
    Set(AHashSet<String>),
}

#[derive(Debug, Default)]
struct Database {
    data: AHashMap<String, Entry>,
    expirations: AHashMap<String, Timestamp>,
}

impl Database {
    fn expire_if_due(&mut self, key: &str, now: Timestamp) {
        if let Some(deadline) = self.expirations.get(key) {
            if *deadline <= now {
                self.data.remove(key);
                self.expirations.remove(key);
            }
        }
    }

    fn get(&mut self, key: &str, now: Timestamp) -> Option<&Entry> {
        self.expire_if_due(key, now);
        self.data.get(key)
    }

    fn get_mut(&mut self, key: &str, now: Timestamp) -> Option<&mut Entry> {
        self.expire_if_due(key, now);
        self.data.get_mut(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expirations.remove(key);
        self.data.remove(key).is_some()
    }

    fn live_keys(&self, now: Timestamp) -> impl Iterator<Item = &String> {
        self.data.keys().filter(move |k| {
            self.expirations
                .get(k.as_str())
                .map_or(true, |deadline| *deadline > now)
        })
    }

    fn apply(&mut self, command: &StoreCommand, now: Timestamp) -> Reply {
        match command {
            StoreCommand::SAdd { key, member } => self.sadd(key, member, now),
            StoreCommand::SRem { key, member } => self.srem(key, member, now),
            StoreCommand::SIsMember { key, member } => match self.get(key, now) {
                Some(Entry::Set(set)) => Reply::Integer(set.contains(member) as i64),
                Some(_) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Integer(0),
            },
            StoreCommand::SMembers { key } => match self.get(key, now) {
                Some(Entry::Set(set)) => {
                    Reply::Array(set.iter().map(|m| Reply::bulk(m.as_str())).collect())
                }
                Some(_) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Array(Vec::new()),
            },
            StoreCommand::LPush { key, value } => self.lpush(key, value, now),
            StoreCommand::LRange { key, start, stop } => match self.get(key, now) {
                Some(Entry::List(list)) => {
                    let elements = match range_bounds(list.len(), *start, *stop) {
                        Some((from, to)) => list
                            .iter()
                            .skip(from)
                            .take(to - from + 1)
                            .map(|v| Reply::bulk(v.as_str()))
                            .collect(),
                        None => Vec::new(),
                    };
                    Reply::Array(elements)
                }
                Some(_) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Array(Vec::new()),
            },
            StoreCommand::LRem { key, count, value } => self.lrem(key, *count, value, now),
            StoreCommand::LLen { key } => match self.get(key, now) {
                Some(Entry::List(list)) => Reply::Integer(list.len() as i64),
                Some(_) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Integer(0),
            },
            StoreCommand::Get { key } => match self.get(key, now) {
                Some(Entry::String(s)) => Reply::bulk(s.as_str()),
                Some(_) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Nil,
            },
            StoreCommand::SetNx { key, value } => {
                if self.get(key, now).is_some() {
                    return Reply::Integer(0);
                }
                self.data.insert(key.clone(), Entry::String(value.clone()));
                Reply::Integer(1)
            }
            StoreCommand::SetNxPx { key, value, ttl_ms } => {
                if *ttl_ms == 0 || *ttl_ms > i64::MAX as u64 {
                    return Reply::Error("ERR invalid expire time in 'set' command".to_string());
                }
                if self.get(key, now).is_some() {
                    return Reply::Nil;
                }
                self.data.insert(key.clone(), Entry::String(value.clone()));
                self.expirations
                    .insert(key.clone(), Timestamp(now.0.saturating_add(*ttl_ms)));
                Reply::Ok
            }
            StoreCommand::PTtl { key } => {
                if self.get(key, now).is_none() {
                    return Reply::Integer(-2);
                }
                match self.expirations.get(key) {
                    Some(deadline) => {
                        let remaining = deadline.0.saturating_sub(now.0);
                        Reply::Integer(i64::try_from(remaining).unwrap_or(i64::MAX))
                    }
                    None => Reply::Integer(-1),
                }
            }
            StoreCommand::Del { keys } => {
                let mut deleted = 0;
                for key in keys {
                    self.expire_if_due(key, now);
                    if self.remove(key) {
                        deleted += 1;
                    }
                }
                Reply::Integer(deleted)
            }
            StoreCommand::DeleteMatching { patterns } => {
                let doomed: Vec<String> = self
                    .data
                    .keys()
                    .filter(|k| {
                        patterns
                            .iter()
                            .any(|p| glob_match(p.as_bytes(), k.as_bytes()))
                    })
                    .cloned()
                    .collect();
                let mut deleted = 0;
                for key in doomed {
                    let live = self
                        .expirations
                        .get(&key)
                        .map_or(true, |deadline| *deadline > now);
                    self.remove(&key);
                    if live {
                        deleted += 1;
                    }
                }
                Reply::Integer(deleted)
            }
        }
    }

    fn sadd(&mut self, key: &str, member: &str, now: Timestamp) -> Reply {
        self.expire_if_due(key, now);
        let entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(AHashSet::new()));
        match entry {
            Entry::Set(set) => Reply::Integer(set.insert(member.to_string()) as i64),
            _ => Reply::Error(WRONGTYPE.to_string()),
        }
    }

    fn srem(&mut self, key: &str, member: &str, now: Timestamp) -> Reply {
        let (removed, now_empty) = match self.get_mut(key, now) {
            Some(Entry::Set(set)) => (set.remove(member), set.is_empty()),
            Some(_) => return Reply::Error(WRONGTYPE.to_string()),
            None => return Reply::Integer(0),
        };
        if now_empty {
            self.remove(key);
        }
        Reply::Integer(removed as i64)
    }

    fn lpush(&mut self, key: &str, value: &str, now: Timestamp) -> Reply {
        self.expire_if_due(key, now);
        let entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => {
                list.push_front(value.to_string());
                Reply::Integer(list.len() as i64)
            }
            _ => Reply::Error(WRONGTYPE.to_string()),
        }
    }

    fn lrem(&mut self, key: &str, count: i64, value: &str, now: Timestamp) -> Reply {
        let (removed, now_empty) = match self.get_mut(key, now) {
            Some(Entry::List(list)) => {
                let limit = if count == 0 {
                    usize::MAX
                } else {
                    count.unsigned_abs() as usize
                };
                let mut removed = 0usize;
                if count >= 0 {
                    let mut i = 0;
                    while i < list.len() && removed < limit {
                        if list[i] == value {
                            list.remove(i);
                            removed += 1;
                        } else {
                            i += 1;
                        }
                    }
                } else {
                    let mut i = list.len();
                    while i > 0 && removed < limit {
                        i -= 1;
                        if list[i] == value {
                            list.remove(i);
                            removed += 1;
                        }
                    }
                }
                (removed, list.is_empty())
            }
            Some(_) => return Reply::Error(WRONGTYPE.to_string()),
            None => return Reply::Integer(0),
        };
        if now_empty {
            self.remove(key);
        }
        Reply::Integer(removed as i64)
    }
}

/// Resolve Redis-style inclusive, possibly negative, range indices
fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Redis glob matching: `*`, `?`, `[abc]`, `[^a-z]`, and `\` escapes
pub(crate) fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some(b'*') => {
            let rest = &pattern[1..];
            (0..=key.len()).any(|i| glob_match(rest, &key[i..]))
        }
        Some(b'?') => !key.is_empty() && glob_match(&pattern[1..], &key[1..]),
        Some(b'[') => {
            let Some(&c) = key.first() else {
                return false;
            };
            let Some(close) = pattern.iter().skip(1).position(|&b| b == b']') else {
                // Unterminated class matches a literal '['
                return c == b'[' && glob_match(&pattern[1..], &key[1..]);
            };
            let class = &pattern[1..close + 1];
            let (negate, class) = match class.first() {
                Some(b'^') => (true, &class[1..]),
                _ => (false, class),
            };
            let mut matched = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == b'-' {
                    let (lo, hi) = if class[i] <= class[i + 2] {
                        (class[i], class[i + 2])
                    } else {
                        (class[i + 2], class[i])
                    };
                    matched |= (lo..=hi).contains(&c);
                    i += 3;
                } else {
                    matched |= class[i] == c;
                    i += 1;
                }
            }
            matched != negate && glob_match(&pattern[close + 2..], &key[1..])
        }
        Some(b'\\') if pattern.len() > 1 => {
            key.first() == Some(&pattern[1]) && glob_match(&pattern[2..], &key[1..])
        }
        Some(&p) => key.first() == Some(&p) && glob_match(&pattern[1..], &key[1..]),
    }
}

/// In-memory Redis-semantics store
///
/// Clones share the same keyspace.
#[derive(Debug)]
pub struct InMemoryStore<C: Clock = ProductionClock> {
    db: Arc<Mutex<Database>>,
    clock: C,
}

impl InMemoryStore<ProductionClock> {
    pub fn new() -> Self {
        Self::with_clock(ProductionClock::new())
    }
}

impl Default for InMemoryStore<ProductionClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Clone for InMemoryStore<C> {
    fn clone(&self) -> Self {
        InMemoryStore {
            db: Arc::clone(&self.db),
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock> InMemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        InMemoryStore {
            db: Arc::new(Mutex::new(Database::default())),
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = self.clock.now();
        self.db.lock().live_keys(now).count()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.db.lock().get(key, now).is_some()
    }

    /// Overwrite a key with a raw string value
    pub fn set_raw(&self, key: &str, value: &str) {
        let mut db = self.db.lock();
        db.remove(key);
        db.data.insert(key.to_string(), Entry::String(value.to_string()));
    }

    pub fn apply(&self, command: &StoreCommand) -> Reply {
        let now = self.clock.now();
        self.db.lock().apply(command, now)
    }

    /// Apply every command under a single lock acquisition
    pub fn apply_all(&self, commands: &[StoreCommand]) -> Vec<Reply> {
        let now = self.clock.now();
        let mut db = self.db.lock();
        commands.iter().map(|cmd| db.apply(cmd, now)).collect()
    }
}

impl<C: Clock> MergeStore for InMemoryStore<C> {
    fn execute<'a>(
        &'a self,
        command: StoreCommand,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Reply>> + Send + 'a>> {
        Box::pin(async move { Ok(self.apply(&command)) })
    }

    fn execute_atomic<'a>(
        &'a self,
        transaction: Transaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let replies = self.apply_all(transaction.commands());
            transaction.complete(replies)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn store() -> InMemoryStore<SimulatedClock> {
        InMemoryStore::with_clock(SimulatedClock::new(1_000))
    }

    #[test]
    fn test_lpush_prepends_and_lrange_reads_newest_first() {
        let store = store();
        store.apply(&StoreCommand::LPush { key: s("l"), value: s("a") });
        store.apply(&StoreCommand::LPush { key: s("l"), value: s("b") });
        let reply = store.apply(&StoreCommand::LRange { key: s("l"), start: 0, stop: -1 });
        assert_eq!(reply.into_strings().unwrap(), vec![s("b"), s("a")]);
    }

    #[test]
    fn test_lrange_bounds() {
        assert_eq!(range_bounds(3, 0, -1), Some((0, 2)));
        assert_eq!(range_bounds(3, -2, -1), Some((1, 2)));
        assert_eq!(range_bounds(3, 0, 100), Some((0, 2)));
        assert_eq!(range_bounds(3, -100, 0), Some((0, 0)));
        assert_eq!(range_bounds(3, 2, 1), None);
        assert_eq!(range_bounds(0, 0, -1), None);
        assert_eq!(range_bounds(3, 5, 10), None);
    }

    #[test]
    fn test_lrem_all_occurrences_and_drops_empty_list() {
        let store = store();
        for v in ["x", "y", "x", "x"] {
            store.apply(&StoreCommand::LPush { key: s("l"), value: s(v) });
        }
        let removed = store.apply(&StoreCommand::LRem { key: s("l"), count: 0, value: s("x") });
        assert_eq!(removed, Reply::Integer(3));
        assert_eq!(store.apply(&StoreCommand::LLen { key: s("l") }), Reply::Integer(1));

        store.apply(&StoreCommand::LRem { key: s("l"), count: 0, value: s("y") });
        assert!(!store.contains_key("l"));
    }

    #[test]
    fn test_lrem_counts_from_head_or_tail() {
        let store = store();
        // head first: x m x m x
        for v in ["x", "m", "x", "m", "x"] {
            store.apply(&StoreCommand::LPush { key: s("l"), value: s(v) });
        }
        store.apply(&StoreCommand::LRem { key: s("l"), count: -1, value: s("m") });
        let list = store
            .apply(&StoreCommand::LRange { key: s("l"), start: 0, stop: -1 })
            .into_strings()
            .unwrap();
        assert_eq!(list, vec![s("x"), s("m"), s("x"), s("x")]);

        store.apply(&StoreCommand::LRem { key: s("l"), count: 2, value: s("x") });
        let list = store
            .apply(&StoreCommand::LRange { key: s("l"), start: 0, stop: -1 })
            .into_strings()
            .unwrap();
        assert_eq!(list, vec![s("m"), s("x")]);
    }

    #[test]
    fn test_set_operations() {
        let store = store();
        assert_eq!(store.apply(&StoreCommand::SAdd { key: s("s"), member: s("a") }), Reply::Integer(1));
        assert_eq!(store.apply(&StoreCommand::SAdd { key: s("s"), member: s("a") }), Reply::Integer(0));
        assert_eq!(store.apply(&StoreCommand::SIsMember { key: s("s"), member: s("a") }), Reply::Integer(1));
        assert_eq!(store.apply(&StoreCommand::SRem { key: s("s"), member: s("a") }), Reply::Integer(1));
        assert!(!store.contains_key("s"));
        assert_eq!(store.apply(&StoreCommand::SMembers { key: s("s") }), Reply::Array(vec![]));
    }

    #[test]
    fn test_setnx_first_write_wins() {
        let store = store();
        assert_eq!(store.apply(&StoreCommand::SetNx { key: s("t"), value: s("1") }), Reply::Integer(1));
        assert_eq!(store.apply(&StoreCommand::SetNx { key: s("t"), value: s("2") }), Reply::Integer(0));
        assert_eq!(store.apply(&StoreCommand::Get { key: s("t") }), Reply::bulk("1"));
    }

    #[test]
    fn test_set_nx_px_expires_with_clock() {
        let store = store();
        let lock = StoreCommand::SetNxPx { key: s("lock"), value: s("1"), ttl_ms: 500 };
        assert_eq!(store.apply(&lock), Reply::Ok);
        assert_eq!(store.apply(&lock), Reply::Nil);
        assert_eq!(store.apply(&StoreCommand::PTtl { key: s("lock") }), Reply::Integer(500));

        store.clock().advance_ms(499);
        assert_eq!(store.apply(&lock), Reply::Nil);

        store.clock().advance_ms(1);
        assert_eq!(store.apply(&StoreCommand::PTtl { key: s("lock") }), Reply::Integer(-2));
        assert_eq!(store.apply(&lock), Reply::Ok);
    }

    #[test]
    fn test_set_nx_px_rejects_out_of_range_ttl() {
        let store = store();
        for ttl_ms in [0, i64::MAX as u64 + 1, u64::MAX] {
            let reply = store.apply(&StoreCommand::SetNxPx { key: s("lock"), value: s("1"), ttl_ms });
            assert!(matches!(reply, Reply::Error(_)), "ttl {} accepted", ttl_ms);
            assert!(!store.contains_key("lock"));
        }
    }

    #[test]
    fn test_pttl_of_longest_lock_stays_positive() {
        let store = store();
        let lock = StoreCommand::SetNxPx { key: s("lock"), value: s("1"), ttl_ms: i64::MAX as u64 };
        assert_eq!(store.apply(&lock), Reply::Ok);
        assert_eq!(store.apply(&StoreCommand::PTtl { key: s("lock") }), Reply::Integer(i64::MAX));
        assert_eq!(store.apply(&lock), Reply::Nil);
    }

    #[test]
    fn test_wrong_type_is_error_reply() {
        let store = store();
        store.apply(&StoreCommand::SetNx { key: s("k"), value: s("v") });
        let reply = store.apply(&StoreCommand::LPush { key: s("k"), value: s("x") });
        assert_eq!(reply, Reply::Error(WRONGTYPE.to_string()));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"ns:msg:*", b"ns:msg:batch1"));
        assert!(glob_match(b"ns:msg:*", b"ns:msg:"));
        assert!(!glob_match(b"ns:msg:*", b"ns:time:batch1"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(glob_match(b"ns:merges", b"ns:merges"));
    }

    #[test]
    fn test_delete_matching_counts_live_keys() {
        let store = store();
        store.apply(&StoreCommand::SAdd { key: s("ns:merges"), member: s("g") });
        store.apply(&StoreCommand::LPush { key: s("ns:msg:g"), value: s("m") });
        store.apply(&StoreCommand::SetNxPx { key: s("ns:lock:g"), value: s("1"), ttl_ms: 10 });
        store.apply(&StoreCommand::LPush { key: s("other:msg:g"), value: s("m") });
        store.clock().advance_ms(10);

        let reply = store.apply(&StoreCommand::DeleteMatching {
            patterns: vec![s("ns:merges"), s("ns:msg:*"), s("ns:lock:*")],
        });
        assert_eq!(reply, Reply::Integer(2));
        assert_eq!(store.key_count(), 1);
        assert!(store.contains_key("other:msg:g"));
    }

    #[tokio::test]
    async fn test_execute_atomic_completes_deferreds() {
        let store = store();
        let mut tx = Transaction::new();
        tx.queue(StoreCommand::LPush { key: s("l"), value: s("a") });
        let len = tx.queue(StoreCommand::LLen { key: s("l") });
        store.execute_atomic(tx).await.unwrap();
        assert_eq!(len.try_take(), Some(Reply::Integer(1)));
    }
}
