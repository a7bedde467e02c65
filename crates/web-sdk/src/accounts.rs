//! Dynamic account selection and the tracker instance registry.

use std::sync::Arc;

use beacon_core::{BeaconError, BeaconResult, TrackerConfig};
use parking_lot::Mutex;
use tracing::debug;

use crate::tracker::Tracker;

/// Account from a `acct=sub1,sub2;acct2=sub3` list whose substring occurs in
/// `subject`, compared case-insensitively.
pub fn resolve_dynamic_account(list: &str, subject: &str) -> Option<String> {
    let subject = subject.to_ascii_lowercase();
    list.split(';').find_map(|entry| {
        let (account, subs) = entry.split_once('=')?;
        let account = account.trim();
        let hit = subs
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .any(|s| !s.is_empty() && subject.contains(&s));
        (hit && !account.is_empty()).then(|| account.to_ascii_lowercase())
    })
}

/// Accounts a tracker built from `config` reports to on a page at
/// `hostname`. `configured` is used when dynamic selection is off or finds
/// no match.
pub fn active_accounts(config: &TrackerConfig, configured: &str, hostname: &str) -> String {
    if !config.dynamic_account_selection || config.dynamic_account_list.is_empty() {
        return configured.to_string();
    }
    let subject = config
        .dynamic_account_match
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(hostname);
    resolve_dynamic_account(&config.dynamic_account_list, subject)
        .unwrap_or_else(|| configured.to_string())
}

/// First account of a comma-separated list.
pub fn primary_account(accounts: &str) -> &str {
    accounts.split(',').next().unwrap_or_default()
}

pub type SharedTracker = Arc<Mutex<Tracker>>;

/// How [`TrackerRegistry::acquire`] satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// An instance already reports to exactly these accounts.
    Reused,
    /// Copied from an instance whose account list contains the request.
    Cloned,
    Created,
}

/// Live tracker instances for one page, indexed by creation order.
#[derive(Default)]
pub struct TrackerRegistry {
    instances: Vec<SharedTracker>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, index: usize) -> BeaconResult<SharedTracker> {
        self.instances
            .get(index)
            .cloned()
            .ok_or(BeaconError::UnknownInstance(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedTracker> {
        self.instances.iter()
    }

    /// Find or build the instance for `accounts`. `create` receives the new
    /// instance index.
    pub fn acquire<F>(&mut self, accounts: &str, create: F) -> (SharedTracker, Acquired)
    where
        F: FnOnce(usize) -> Tracker,
    {
        let wanted = accounts.trim();
        let mut matched = None;
        for (idx, shared) in self.instances.iter().enumerate() {
            let mut tracker = shared.lock();
            tracker.refresh_accounts();
            if tracker.accounts() == wanted {
                matched = Some((idx, Acquired::Reused));
                break;
            }
            if tracker.accounts().split(',').any(|acct| acct.trim() == wanted) {
                matched = Some((idx, Acquired::Cloned));
                break;
            }
        }

        let index = self.instances.len();
        let (shared, how) = match matched {
            Some((idx, Acquired::Reused)) => (self.instances[idx].clone(), Acquired::Reused),
            Some((idx, _)) => {
                let clone = self.instances[idx].lock().clone_for(index, wanted);
                let shared = Arc::new(Mutex::new(clone));
                self.instances.push(shared.clone());
                (shared, Acquired::Cloned)
            }
            None => {
                let shared = Arc::new(Mutex::new(create(index)));
                self.instances.push(shared.clone());
                (shared, Acquired::Created)
            }
        };
        debug!(accounts = %wanted, outcome = ?how, instances = self.instances.len(), "Acquired tracker instance");
        (shared, how)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_dynamic_account() {
        let list = "devsuite=dev.,staging.;prodsuite=example.com";
        assert_eq!(
            resolve_dynamic_account(list, "DEV.example.com").as_deref(),
            Some("devsuite")
        );
        assert_eq!(
            resolve_dynamic_account(list, "www.example.com").as_deref(),
            Some("prodsuite")
        );
        assert_eq!(resolve_dynamic_account(list, "other.org"), None);
        assert_eq!(resolve_dynamic_account("", "x"), None);
        assert_eq!(resolve_dynamic_account("broken;a=", "x"), None);
    }

    #[test]
    fn test_active_accounts() {
        let mut config = TrackerConfig {
            account: "acct1".into(),
            dynamic_account_list: "prodsuite=www.example".into(),
            ..TrackerConfig::default()
        };
        assert_eq!(active_accounts(&config, "acct1", "www.example.com"), "acct1");

        config.dynamic_account_selection = true;
        assert_eq!(active_accounts(&config, "acct1", "www.example.com"), "prodsuite");
        assert_eq!(active_accounts(&config, "acct1", "other.org"), "acct1");

        config.dynamic_account_match = Some("http://www.example.com/x".into());
        assert_eq!(active_accounts(&config, "acct1", "other.org"), "prodsuite");
    }

    #[test]
    fn test_primary_account() {
        assert_eq!(primary_account("acct1,acct2"), "acct1");
        assert_eq!(primary_account("solo"), "solo");
    }
}
