//! Lock token codec.
//!
//! A held lock stores the string `"<pid>:<tid>:<depth>"` as its value. The
//! pid/tid pair identifies the owner, the depth counts re-entrant
//! acquisitions. All state lives in the token; the lock object itself stays
//! immutable and can be shared freely.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// The process/thread pair that owns a lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Owner {
    /// Identifier of the owning process.
    pub pid: i64,
    /// Identifier of the owning thread within that process.
    pub tid: i64,
}

impl Owner {
    /// Returns the identity of the calling thread.
    pub fn current() -> Self {
        Self {
            pid: std::process::id() as i64,
            tid: thread_ident(),
        }
    }
}

/// Returns a process-wide unique integer for the calling thread.
///
/// `std::thread::ThreadId` has no stable integer projection, so idents are
/// handed out from a monotonic counter on first use per thread. Stable
/// across re-entries within one thread, which is all the token needs.
fn thread_ident() -> i64 {
    static NEXT_IDENT: AtomicI64 = AtomicI64::new(1);
    thread_local! {
        static IDENT: i64 = NEXT_IDENT.fetch_add(1, Ordering::Relaxed);
    }
    IDENT.with(|ident| *ident)
}

/// The parsed value stored under a held lock key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LockToken {
    /// Identifier of the owning process.
    pub pid: i64,
    /// Identifier of the owning thread.
    pub tid: i64,
    /// Number of re-entrant acquisitions currently outstanding.
    pub depth: i64,
}

impl LockToken {
    /// Creates a token owned by `owner` with the given depth.
    pub fn new(owner: Owner, depth: i64) -> Self {
        Self {
            pid: owner.pid,
            tid: owner.tid,
            depth,
        }
    }

    /// Returns the owner identity carried by this token.
    pub fn owner(&self) -> Owner {
        Owner {
            pid: self.pid,
            tid: self.tid,
        }
    }

    /// Parses a token previously rendered by [`LockToken`]'s `Display`.
    ///
    /// Anything else fails with [`Error::Internal`]: a malformed token means
    /// somebody tampered with the lock keys, not that the caller erred.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(Error::Internal(format!("bad lock token: {}", raw)));
        }
        let mut nums = [0i64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| Error::Internal(format!("bad lock token: {}", raw)))?;
        }
        Ok(Self {
            pid: nums[0],
            tid: nums[1],
            depth: nums[2],
        })
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.pid, self.tid, self.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_token() {
        let token = LockToken::parse("1:2:3").unwrap();
        assert_eq!(token.pid, 1);
        assert_eq!(token.tid, 2);
        assert_eq!(token.depth, 3);
    }

    #[test]
    fn parse_rejects_short_and_garbled_tokens() {
        assert!(matches!(LockToken::parse("1:2"), Err(Error::Internal(_))));
        assert!(matches!(LockToken::parse("a:b:c"), Err(Error::Internal(_))));
        assert!(matches!(LockToken::parse(""), Err(Error::Internal(_))));
    }

    #[test]
    fn roundtrip_keeps_negative_depth() {
        // release() needs to see depths it will then reject.
        let token = LockToken::parse("10:20:-1").unwrap();
        assert_eq!(token.depth, -1);
        assert_eq!(token.to_string(), "10:20:-1");
    }

    #[test]
    fn owner_is_stable_within_a_thread() {
        assert_eq!(Owner::current(), Owner::current());
        let other = std::thread::spawn(Owner::current).join().unwrap();
        assert_ne!(Owner::current().tid, other.tid);
        assert_eq!(Owner::current().pid, other.pid);
    }
}
