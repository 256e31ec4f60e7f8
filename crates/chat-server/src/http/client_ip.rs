use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

const UNKNOWN_SOURCE: &str = "unknown";

/// Rate-limit identity of the caller: the peer address, or the right-most
/// untrusted `x-forwarded-for` hop when the peer is a trusted proxy.
pub(super) fn request_source(
    extensions: &Extensions,
    headers: &HeaderMap,
    trusted_proxy_ips: &HashSet<IpAddr>,
) -> String {
    remote_ip(extensions, headers, trusted_proxy_ips)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

fn remote_ip(
    extensions: &Extensions,
    headers: &HeaderMap,
    trusted_proxy_ips: &HashSet<IpAddr>,
) -> Option<IpAddr> {
    let peer_ip = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())?;

    if !trusted_proxy_ips.contains(&peer_ip) {
        return Some(peer_ip);
    }

    forwarded_client_ip(headers, trusted_proxy_ips, peer_ip).or(Some(peer_ip))
}

fn forwarded_client_ip(
    headers: &HeaderMap,
    trusted_proxy_ips: &HashSet<IpAddr>,
    peer_ip: IpAddr,
) -> Option<IpAddr> {
    let mut chain = forwarded_for_chain(headers);
    if chain.is_empty() {
        return None;
    }
    chain.push(peer_ip);
    chain
        .iter()
        .rev()
        .find(|ip| !trusted_proxy_ips.contains(ip))
        .copied()
}

fn forwarded_for_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .filter_map(|entry| entry.parse::<IpAddr>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::{IpAddr, SocketAddr};

    use axum::extract::ConnectInfo;
    use axum::http::header::HeaderName;
    use axum::http::{Extensions, HeaderMap};

    use super::request_source;

    fn peer(octets: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((octets, 8080))));
        extensions
    }

    fn forwarded(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(
                HeaderName::from_static("x-forwarded-for"),
                value.parse().expect("header value should parse"),
            );
        }
        headers
    }

    #[test]
    fn untrusted_peer_ignores_spoofable_forward_headers() {
        let source = request_source(
            &peer([10, 20, 30, 40]),
            &forwarded(&["203.0.113.99"]),
            &HashSet::new(),
        );
        assert_eq!(source, "10.20.30.40");
    }

    #[test]
    fn trusted_proxy_uses_right_most_untrusted_hop() {
        let trusted = HashSet::from([IpAddr::from([10, 0, 0, 5]), IpAddr::from([10, 0, 0, 9])]);
        let source = request_source(
            &peer([10, 0, 0, 5]),
            &forwarded(&["203.0.113.250", "198.51.100.20, 10.0.0.9"]),
            &trusted,
        );
        assert_eq!(source, "198.51.100.20");
    }

    #[test]
    fn trusted_proxy_without_forward_header_falls_back_to_peer() {
        let trusted = HashSet::from([IpAddr::from([10, 0, 0, 5])]);
        let source = request_source(&peer([10, 0, 0, 5]), &HeaderMap::new(), &trusted);
        assert_eq!(source, "10.0.0.5");
    }

    #[test]
    fn missing_connect_info_is_unknown() {
        let source = request_source(&Extensions::new(), &HeaderMap::new(), &HashSet::new());
        assert_eq!(source, "unknown");
    }
}
