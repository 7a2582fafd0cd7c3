use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::host::HostState;

/// Orders the candidate hosts for a request.
///
/// Hosts currently backing off sort by their earliest availability;
/// otherwise lower priority wins, and on ties the upstream goes last so
/// mirrors absorb the load. The backoff comparison uses a single `now`
/// snapshot so the order is a strict total order at the moment of
/// sorting.
pub(crate) fn sort_candidates(hosts: &mut [Arc<HostState>], upstream: &str) {
    let now = Instant::now();
    hosts.sort_by(|a, b| {
        let until_a = a.backoff_until();
        let until_b = b.backoff_until();
        let backing_off = |until: Option<Instant>| until.is_some_and(|at| at > now);
        if backing_off(until_a) || backing_off(until_b) {
            return cmp_until(until_a, until_b);
        }
        a.config
            .priority
            .cmp(&b.config.priority)
            .then_with(|| (a.config.name == upstream).cmp(&(b.config.name == upstream)))
    });
}

/// No backoff sorts before any backoff.
fn cmp_until(a: Option<Instant>, b: Option<Instant>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::host::config::HostConfig;

    fn host(name: &str, priority: u32) -> Arc<HostState> {
        let mut config = HostConfig::new(name);
        config.priority = priority;
        Arc::new(HostState::new(config, reqwest::Client::new(), None))
    }

    fn back_off(host: &HostState) {
        host.backoff_set(
            Duration::from_secs(1),
            Duration::from_secs(30),
            10,
            None,
        )
        .unwrap();
    }

    fn names(hosts: &[Arc<HostState>]) -> Vec<&str> {
        hosts.iter().map(|h| h.config.name.as_str()).collect()
    }

    #[test]
    fn test_priority_order_with_upstream_last() {
        let mut hosts = vec![host("upstream", 10), host("m1", 5), host("m2", 10)];
        sort_candidates(&mut hosts, "upstream");
        assert_eq!(names(&hosts), vec!["m1", "m2", "upstream"]);
    }

    #[test]
    fn test_backed_off_host_sorts_last() {
        let m1 = host("m1", 5);
        back_off(&m1);
        let mut hosts = vec![m1, host("m2", 10), host("upstream", 10)];
        sort_candidates(&mut hosts, "upstream");
        assert_eq!(names(&hosts), vec!["m2", "upstream", "m1"]);
    }

    #[test]
    fn test_earlier_backoff_preferred_among_backed_off() {
        let short = host("short", 0);
        back_off(&short); // ~2s
        let long = host("long", 0);
        back_off(&long);
        back_off(&long); // ~4s
        let mut hosts = vec![long, short];
        sort_candidates(&mut hosts, "upstream");
        assert_eq!(names(&hosts), vec!["short", "long"]);
    }

    #[test]
    fn test_upstream_first_when_lower_priority() {
        let mut hosts = vec![host("m1", 10), host("upstream", 1)];
        sort_candidates(&mut hosts, "upstream");
        assert_eq!(names(&hosts), vec!["upstream", "m1"]);
    }
}
