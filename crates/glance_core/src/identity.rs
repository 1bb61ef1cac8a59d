use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type RequestId = u64;

/// Set once the active request has been retired without a successor (panel closed).
const RETIRED: u64 = 1 << 63;
const ID_MASK: u64 = !RETIRED;

/// Single authority for "which preview request is current".
///
/// Clones share the same counter, so the pure update loop and the async stage
/// tasks answer `is_active` from one source. The latest id and the retired flag
/// live in one atomic word; allocation and checks never observe a torn pair.
#[derive(Clone, Default)]
pub struct RequestIdentity {
    latest: Arc<AtomicU64>,
}

impl RequestIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues an id strictly greater than every id issued before. Ids start at 1.
    pub fn allocate(&self) -> RequestId {
        let previous = self
            .latest
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                Some((word & ID_MASK) + 1)
            })
            .unwrap_or_else(|word| word);
        (previous & ID_MASK) + 1
    }

    pub fn is_active(&self, id: RequestId) -> bool {
        id != 0 && self.latest.load(Ordering::SeqCst) == id
    }

    /// Makes every outstanding id stale without issuing a new one.
    pub fn retire(&self) {
        self.latest.fetch_or(RETIRED, Ordering::SeqCst);
    }

    pub fn active(&self) -> Option<RequestId> {
        let word = self.latest.load(Ordering::SeqCst);
        if word == 0 || word & RETIRED != 0 {
            None
        } else {
            Some(word)
        }
    }
}

impl PartialEq for RequestIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.latest.load(Ordering::SeqCst) == other.latest.load(Ordering::SeqCst)
    }
}

impl Eq for RequestIdentity {}

impl fmt::Debug for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestIdentity")
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::RequestIdentity;

    #[test]
    fn ids_start_at_one_and_increase() {
        let identity = RequestIdentity::new();
        assert_eq!(identity.active(), None);
        assert_eq!(identity.allocate(), 1);
        assert_eq!(identity.allocate(), 2);
        assert!(identity.is_active(2));
        assert!(!identity.is_active(1));
        assert!(!identity.is_active(0));
    }

    #[test]
    fn retire_invalidates_without_reusing_ids() {
        let identity = RequestIdentity::new();
        let first = identity.allocate();
        identity.retire();
        assert!(!identity.is_active(first));
        assert_eq!(identity.active(), None);

        let second = identity.allocate();
        assert_eq!(second, first + 1);
        assert!(identity.is_active(second));

        identity.retire();
        identity.retire();
        assert_eq!(identity.allocate(), second + 1);
    }

    #[test]
    fn clones_share_the_counter() {
        let identity = RequestIdentity::new();
        let observer = identity.clone();
        let id = identity.allocate();
        assert!(observer.is_active(id));
        assert_eq!(observer.allocate(), id + 1);
        assert!(!identity.is_active(id));
    }

    #[test]
    fn concurrent_allocation_never_duplicates() {
        let identity = RequestIdentity::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let identity = identity.clone();
                thread::spawn(move || (0..250).map(|_| identity.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {id} issued twice");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(identity.active(), Some(2000));
    }
}
