//! Client identity for rate limiting

use std::net::SocketAddr;

use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Peer address, or the first `X-Forwarded-For` hop when `trust_forwarded`
/// is set. `"unknown"` when neither is available.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let forwarded = if trust_forwarded {
        headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    } else {
        None
    };

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn trusted_proxy_uses_first_forwarded_hop() {
        let peer = "127.0.0.1:5000".parse().ok();
        assert_eq!(
            client_id(&forwarded("203.0.113.7, 10.0.0.1"), peer, true),
            "203.0.113.7"
        );
    }

    #[test]
    fn forwarded_header_is_ignored_by_default() {
        let peer = "198.51.100.9:40000".parse().ok();
        let first = client_id(&forwarded("203.0.113.7"), peer, false);
        let second = client_id(&forwarded("203.0.113.8"), peer, false);
        assert_eq!(first, "198.51.100.9");
        assert_eq!(first, second);
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let headers = HeaderMap::new();
        let peer = "192.168.1.4:51234".parse().ok();
        assert_eq!(client_id(&headers, peer, true), "192.168.1.4");
        assert_eq!(client_id(&headers, None, true), "unknown");
        assert_eq!(client_id(&forwarded("203.0.113.7"), None, false), "unknown");
    }
}
