//! Advisory per-identifier write locks.
//!
//! - acquire: свободно -> новый токен (granted), занято -> Contended (не ошибка).
//! - release: NoLockHeld / TokenMismatch / Released — три различимых исхода.
//! - Lock never expires: a crashed holder leaks it for the life of the table.
//!
//! The table does not guard get/set. Callers acquire before mutating a key and
//! release after; the store itself never checks.

use log::debug;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::keycodec::Identifier;

/// Token length in base-36 characters.
pub const TOKEN_LEN: usize = 9;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque lease credential.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn new<S: Into<String>>(s: S) -> Self {
        LockToken(s.into())
    }

    /// Fresh unpredictable token (not a security boundary, just hard to guess).
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let s: String = (0..TOKEN_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        LockToken(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Токен не печатаем целиком в логах.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.0.chars().take(3).collect();
        write!(f, "LockToken({head}…)")
    }
}

/// Result of `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockGrant {
    Granted(LockToken),
    /// Someone else holds the lock. Back off and retry, or report a conflict.
    Contended,
}

impl LockGrant {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockGrant::Granted(_))
    }

    pub fn token(&self) -> Option<&LockToken> {
        match self {
            LockGrant::Granted(t) => Some(t),
            LockGrant::Contended => None,
        }
    }

    /// Wire status: 1 = granted, 0 = contended.
    pub fn status(&self) -> u8 {
        if self.is_granted() {
            1
        } else {
            0
        }
    }
}

/// Result of `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// Nothing to release (idempotent no-op).
    NoLockHeld,
    /// A lock exists but the token is not its owner's; lock left intact.
    TokenMismatch,
    Released,
}

impl ReleaseStatus {
    /// Wire status: 0 = no lock, 1 = released, 2 = token mismatch.
    pub fn status(&self) -> u8 {
        match self {
            ReleaseStatus::NoLockHeld => 0,
            ReleaseStatus::Released => 1,
            ReleaseStatus::TokenMismatch => 2,
        }
    }
}

/// Shared lock table. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct LockManager {
    inner: Arc<Mutex<BTreeMap<String, LockToken>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a serialized lock map (identifier -> token). Empty tokens are
    /// treated as "no lock", matching a cleared entry.
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        let held = map
            .into_iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(k, t)| (k, LockToken(t)))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(held)),
        }
    }

    /// Try to take the lock for `id`. Never blocks.
    pub fn acquire(&self, id: &Identifier) -> LockGrant {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if g.contains_key(id.as_str()) {
            debug!("lock: {} already held", id);
            return LockGrant::Contended;
        }
        let token = LockToken::generate();
        g.insert(id.as_str().to_string(), token.clone());
        LockGrant::Granted(token)
    }

    /// Release the lock for `id` if `token` owns it.
    pub fn release(&self, id: &Identifier, token: &LockToken) -> ReleaseStatus {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match g.get(id.as_str()) {
            None => ReleaseStatus::NoLockHeld,
            Some(held) if held != token => {
                debug!("lock: release of {} with foreign token", id);
                ReleaseStatus::TokenMismatch
            }
            Some(_) => {
                g.remove(id.as_str());
                ReleaseStatus::Released
            }
        }
    }

    pub fn is_locked(&self, id: &Identifier) -> bool {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.contains_key(id.as_str())
    }

    /// Copy of the current table (identifier -> token).
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.iter()
            .map(|(k, t)| (k.clone(), t.as_str().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let t = LockToken::generate();
        assert_eq!(t.as_str().len(), TOKEN_LEN);
        assert!(t.as_str().bytes().all(|b| BASE36.contains(&b)));
        assert_ne!(t, LockToken::generate());
    }

    #[test]
    fn seeded_empty_token_is_not_a_lock() {
        let mut m = BTreeMap::new();
        let id = Identifier::parse("01").unwrap();
        m.insert(id.as_str().to_string(), String::new());
        let lm = LockManager::from_map(m);
        assert!(!lm.is_locked(&id));
        assert!(lm.acquire(&id).is_granted());
    }
}
