use crate::cache::Cache;

/// Fixed-window signup limiter backed by Redis so the window survives
/// restarts and is shared across instances. Key is the client address.
pub async fn check_signup_window(
    cache: &Cache,
    client_ip: &str,
    max_attempts: i64,
    window_secs: i64,
) -> bool {
    let key = format!("signup:{}", client_ip);
    let count = cache.incr(&key).await;
    if count == 1 {
        cache.expire(&key, window_secs).await;
    }
    // A Redis failure yields count 0; fail open rather than block signups.
    within_window(count, max_attempts)
}

pub fn within_window(count: i64, max_attempts: i64) -> bool {
    count <= max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        assert!(within_window(1, 3));
        assert!(within_window(3, 3));
        assert!(!within_window(4, 3));
    }

    #[test]
    fn redis_failure_fails_open() {
        assert!(within_window(0, 3));
    }
}
