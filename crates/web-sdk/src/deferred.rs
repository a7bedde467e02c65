//! Deferred-parameter queue.
//!
//! Interactions that produce inline stats but no beacon of their own park
//! their parameters in the `s_sq` session cookie, keyed by account list. The
//! next beacon for one of those accounts carries them. The cookie value is
//! `accounts=encoded-params` entries joined by `&`, at most two entries, the
//! most recent first.

use crate::cookies::CookieStore;

pub const QUEUE_COOKIE: &str = "s_sq";

const MAX_ENTRIES: usize = 2;

/// Parameters waiting for any of `accounts`, or `""`.
pub fn read_deferred(store: &CookieStore, accounts: &str) -> String {
    let raw = store.read(QUEUE_COOKIE);
    let codec = store.codec();
    accounts
        .split(',')
        .map(str::trim)
        .filter(|acct| !acct.is_empty())
        .find_map(|acct| {
            raw.split('&').find_map(|entry| {
                let (owners, params) = entry.split_once('=')?;
                owners
                    .split(',')
                    .any(|owner| owner == acct)
                    .then(|| codec.epa(params))
                    .filter(|p| !p.is_empty())
            })
        })
        .unwrap_or_default()
}

/// Make `params` the pending parameters for `accounts`. An empty `params`
/// clears them. Returns whether the cookie write verified.
pub fn store_deferred(store: &CookieStore, accounts: &str, params: &str) -> bool {
    let raw = store.read(QUEUE_COOKIE);
    let codec = store.codec();

    let mut order: Vec<String> = vec![params.to_string()];
    let mut owners: Vec<(String, String)> = Vec::new();
    let mut assign = |acct: &str, value: &str| {
        let acct = acct.trim();
        if acct.is_empty() {
            return;
        }
        match owners.iter_mut().find(|(a, _)| a == acct) {
            Some(slot) => slot.1 = value.to_string(),
            None => owners.push((acct.to_string(), value.to_string())),
        }
    };

    for entry in raw.split('&') {
        let Some((accts, encoded)) = entry.split_once('=') else {
            continue;
        };
        let queued = codec.epa(encoded);
        if !order.contains(&queued) {
            order.push(queued.clone());
        }
        for acct in accts.split(',') {
            assign(acct, &queued);
        }
    }
    for acct in accounts.split(',') {
        assign(acct, params);
    }

    let mut entries = Vec::new();
    for queued in order.iter().filter(|q| !q.is_empty()) {
        let holders: Vec<&str> = owners
            .iter()
            .filter(|(_, v)| v == queued)
            .map(|(a, _)| a.as_str())
            .collect();
        if holders.is_empty() {
            continue;
        }
        if queued == params || entries.len() < MAX_ENTRIES {
            entries.push(format!("{}={}", holders.join(","), codec.ape(queued)));
        }
    }
    store.write(QUEUE_COOKIE, &entries.join("&"), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::MemoryCookieJar;
    use crate::encoding::Codec;
    use crate::host::ManualClock;
    use beacon_core::CookieLifetime;
    use std::sync::Arc;

    fn store() -> CookieStore {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let jar = Arc::new(MemoryCookieJar::new("www.example.com", clock.clone()));
        CookieStore::new(
            jar,
            Codec::default(),
            CookieLifetime::Default,
            2,
            "www.example.com",
            clock,
        )
    }

    #[test]
    fn test_store_and_read_roundtrip() {
        let store = store();
        let params = "&pid=Home&oid=http%3A//a/&ot=A";
        assert!(store_deferred(&store, "acct1", params));
        assert_eq!(read_deferred(&store, "acct1"), params);
        assert_eq!(read_deferred(&store, "acct2"), "");
    }

    #[test]
    fn test_multi_account_lookup() {
        let store = store();
        assert!(store_deferred(&store, "acct1,acct2", "&pid=P"));
        assert_eq!(read_deferred(&store, "acct2"), "&pid=P");
        assert_eq!(read_deferred(&store, "other,acct1"), "&pid=P");
    }

    #[test]
    fn test_clear_removes_only_own_entry() {
        let store = store();
        assert!(store_deferred(&store, "a", "&pid=A"));
        assert!(store_deferred(&store, "b", "&pid=B"));
        assert!(store_deferred(&store, "a", ""));
        assert_eq!(read_deferred(&store, "a"), "");
        assert_eq!(read_deferred(&store, "b"), "&pid=B");
    }

    #[test]
    fn test_keeps_two_most_recent() {
        let store = store();
        assert!(store_deferred(&store, "a", "&pid=A"));
        assert!(store_deferred(&store, "b", "&pid=B"));
        assert!(store_deferred(&store, "c", "&pid=C"));
        assert_eq!(read_deferred(&store, "c"), "&pid=C");
        assert_eq!(read_deferred(&store, "b"), "&pid=B");
        assert_eq!(read_deferred(&store, "a"), "");
    }

    #[test]
    fn test_accounts_sharing_params_are_grouped() {
        let store = store();
        assert!(store_deferred(&store, "a", "&pid=X"));
        assert!(store_deferred(&store, "b", "&pid=X"));
        assert_eq!(store.read(QUEUE_COOKIE), format!("a,b={}", Codec::default().ape("&pid=X")));
    }
}
