//! Internode Wire Conventions
//!
//! Peers talk plain HTTP: `GET <base path><group>/<key>` returns the raw
//! value bytes as `application/octet-stream`. Both path segments are
//! percent-encoded so keys may contain any byte. This module centralizes
//! the path layout, service naming, and address validation shared by the
//! server and the client.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::Duration;

/// Path prefix for internode cache lookups. Namespaced so a node can share
/// its listener with other routes.
pub const BASE_PATH: &str = "/_meshcache/";

/// Prefix under which nodes publish themselves to the service registry.
pub const SERVICE_NAMESPACE: &str = "meshcache";

/// Overall deadline for one peer fetch, covering address resolution, every
/// retry attempt, and reading the response body.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters escaped inside a path segment. The slash matters most: an
/// unescaped slash in a key would change the route shape.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encodes one path segment of a lookup URL.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// The registry service name a node advertises for its address.
pub fn service_name(addr: &str) -> String {
    format!("{}/{}", SERVICE_NAMESPACE, addr)
}

/// Recovers the address embedded in a service name, used when no registry
/// is configured and the name itself is the only source of truth.
pub fn addr_from_service(service: &str) -> Option<&str> {
    service
        .strip_prefix(SERVICE_NAMESPACE)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|addr| !addr.is_empty())
}

/// Accepts `host:port` with a non-empty host and a valid port number.
pub fn valid_peer_addr(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_validation() {
        assert!(valid_peer_addr("localhost:9999"));
        assert!(valid_peer_addr("10.0.0.2:8001"));
        assert!(!valid_peer_addr("localhost"));
        assert!(!valid_peer_addr(":8001"));
        assert!(!valid_peer_addr("host:notaport"));
        assert!(!valid_peer_addr("host:99999"));
    }

    #[test]
    fn test_service_name_round_trip() {
        let service = service_name("127.0.0.1:8001");
        assert_eq!(service, "meshcache/127.0.0.1:8001");
        assert_eq!(addr_from_service(&service), Some("127.0.0.1:8001"));
        assert_eq!(addr_from_service("other/127.0.0.1:8001"), None);
        assert_eq!(addr_from_service("meshcache/"), None);
    }

    #[test]
    fn test_segment_encoding_escapes_separators() {
        assert_eq!(encode_segment("plain"), "plain");
        assert_eq!(encode_segment("a/b"), "a%2Fb");
        assert_eq!(encode_segment("50%"), "50%25");
    }
}
