//! In-memory session cache.
//!
//! Bounded LRU of recently authenticated accounts keyed by uid. Entries
//! expire a fixed time after insertion; the database stays the source of
//! truth, so concurrent upserts are last-writer-wins.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::auth::account::UserAccount;
use crate::prelude::*;

const CACHE_CAPACITY: usize = 1000;
const CACHE_TTL_SECS: i64 = 300;

#[derive(Debug)]
struct CachedSession {
	account: UserAccount,
	cached_at: Timestamp,
}

#[derive(Debug)]
pub struct SessionCache {
	inner: Mutex<LruCache<Box<str>, CachedSession>>,
	ttl_secs: i64,
}

impl SessionCache {
	pub fn new() -> Self {
		Self::with_ttl(CACHE_TTL_SECS)
	}

	pub fn with_ttl(ttl_secs: i64) -> Self {
		let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
		Self { inner: Mutex::new(LruCache::new(capacity)), ttl_secs }
	}

	pub fn get(&self, uid: &str) -> Option<UserAccount> {
		let mut cache = self.inner.lock();
		let expired = match cache.get(uid) {
			Some(entry) => {
				if entry.cached_at.elapsed_secs() < self.ttl_secs {
					return Some(entry.account.clone());
				}
				true
			}
			None => false,
		};
		if expired {
			cache.pop(uid);
		}
		None
	}

	pub fn put(&self, account: UserAccount) {
		let entry = CachedSession { account: account.clone(), cached_at: Timestamp::now() };
		self.inner.lock().put(account.uid, entry);
	}

	pub fn remove(&self, uid: &str) {
		self.inner.lock().pop(uid);
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().is_empty()
	}
}

impl Default for SessionCache {
	fn default() -> Self {
		Self::new()
	}
}


// vim: ts=4
