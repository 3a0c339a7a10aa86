//! Server Readiness Detection
//!
//! The supervised server announces its bound URL on stdout once it is
//! accepting connections. Readiness is detected by scanning each log
//! line for a URL with an explicit port; the first match wins and no
//! further scanning happens for that launch.
//!
//! This is a best-effort text contract with the server's log output,
//! not a health check. Lines matched:
//!
//! - `http://127.0.0.1:8188`
//! - `https://localhost:443`
//! - `http://[::1]:8188` (bracketed IPv6)

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `scheme://host:port` with a mandatory explicit port.
/// The host may be a bracketed IPv6 literal.
static SERVER_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:\[[^\]]+\]|[^/\s:]+):\d+").expect("readiness pattern must compile")
});

/// Extracts the first served URL from a log line, if any.
pub fn find_server_url(line: &str) -> Option<&str> {
    SERVER_URL_REGEX.find(line).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_ipv4_with_port() {
        assert_eq!(
            find_server_url("To see the GUI go to: http://127.0.0.1:8188"),
            Some("http://127.0.0.1:8188")
        );
    }

    #[test]
    fn test_matches_https_hostname() {
        assert_eq!(
            find_server_url("serving on https://localhost:443"),
            Some("https://localhost:443")
        );
    }

    #[test]
    fn test_matches_bracketed_ipv6() {
        assert_eq!(
            find_server_url("listening at http://[::1]:8188"),
            Some("http://[::1]:8188")
        );
    }

    #[test]
    fn test_rejects_missing_scheme() {
        assert_eq!(find_server_url("listening at 127.0.0.1:8188"), None);
    }

    #[test]
    fn test_rejects_missing_port() {
        assert_eq!(find_server_url("see http://localhost for details"), None);
    }

    #[test]
    fn test_no_url_in_ordinary_log_line() {
        assert_eq!(find_server_url("loading model weights..."), None);
    }

    #[test]
    fn test_first_url_of_several() {
        let line = "mirrors: http://a:1 http://b:2";
        assert_eq!(find_server_url(line), Some("http://a:1"));
    }
}
