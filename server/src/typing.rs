use crate::identity::Identity;
use std::time::{Duration, Instant};

struct Typist {
    identity: Identity,
    name: String,
    since: Instant,
}

/// Who is currently typing in one room, in the order they started.
#[derive(Default)]
pub struct TypingTracker {
    typists: Vec<Typist>,
}

impl TypingTracker {
    /// Record a typing action. Repeats refresh the timestamp and name.
    pub fn start(&mut self, identity: Identity, name: &str) {
        self.start_at(identity, name, Instant::now());
    }

    fn start_at(&mut self, identity: Identity, name: &str, now: Instant) {
        match self.typists.iter_mut().find(|t| t.identity == identity) {
            Some(t) => {
                t.name = name.to_string();
                t.since = now;
            }
            None => self.typists.push(Typist {
                identity,
                name: name.to_string(),
                since: now,
            }),
        }
    }

    /// Returns true if the identity was typing.
    pub fn stop(&mut self, identity: Identity) -> bool {
        let before = self.typists.len();
        self.typists.retain(|t| t.identity != identity);
        self.typists.len() != before
    }

    /// Drop entries older than `ttl`. Returns true if anything expired.
    pub fn expire(&mut self, ttl: Duration) -> bool {
        self.expire_at(ttl, Instant::now())
    }

    fn expire_at(&mut self, ttl: Duration, now: Instant) -> bool {
        let before = self.typists.len();
        self.typists
            .retain(|t| now.saturating_duration_since(t.since) < ttl);
        self.typists.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.typists.iter().map(|t| t.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.typists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_refreshes_and_stop_removes() {
        let mut tracker = TypingTracker::default();
        tracker.start(Identity::Registered(1), "Alice");
        tracker.start(Identity::Registered(2), "Bob");
        tracker.start(Identity::Registered(1), "Alice B.");
        assert_eq!(tracker.names(), ["Alice B.", "Bob"]);
        assert!(tracker.stop(Identity::Registered(1)));
        assert!(!tracker.stop(Identity::Registered(1)));
        assert_eq!(tracker.names(), ["Bob"]);
    }

    #[test]
    fn stale_entries_expire() {
        let mut tracker = TypingTracker::default();
        let t0 = Instant::now();
        tracker.start_at(Identity::Registered(1), "Alice", t0);
        tracker.start_at(Identity::Registered(2), "Bob", t0 + Duration::from_secs(5));
        let ttl = Duration::from_secs(8);
        assert!(!tracker.expire_at(ttl, t0 + Duration::from_secs(7)));
        assert!(tracker.expire_at(ttl, t0 + Duration::from_secs(9)));
        assert_eq!(tracker.names(), ["Bob"]);
        assert!(tracker.expire_at(ttl, t0 + Duration::from_secs(20)));
        assert!(tracker.is_empty());
    }
}
