//! Credential extraction from request parts.

use std::net::SocketAddr;

use axum::http::{HeaderMap, Uri, header::AUTHORIZATION};

use crate::error::AuthError;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let scheme = value.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    value[7..]
        .split(' ')
        .next()
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

/// Token from a `?token=` query parameter.
pub fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;

    for pair in query.split('&') {
        if let Some(("token", value)) = pair.split_once('=') {
            let value = urlencoding::decode(value).ok()?;
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Every address the request can be attributed to.
///
/// Collects each `X-Forwarded-For` entry followed by the peer address,
/// without duplicates.
pub fn client_ips(headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<Vec<String>, AuthError> {
    let mut ips: Vec<String> = Vec::new();
    let mut push = |ip: String| {
        if !ip.is_empty() && !ips.contains(&ip) {
            ips.push(ip);
        }
    };

    for value in headers.get_all(FORWARDED_FOR) {
        if let Ok(value) = value.to_str() {
            value.split(',').for_each(|ip| push(ip.trim().to_string()));
        }
    }
    if let Some(peer) = peer {
        push(peer.ip().to_string());
    }

    if ips.is_empty() {
        return Err(AuthError::IpResolveFailed);
    }
    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Bearer abc")])),
            Some("abc".into())
        );
        assert_eq!(
            bearer_token(&headers(&[("authorization", "bearer abc")])),
            Some("abc".into())
        );
        assert_eq!(bearer_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_query_token() {
        let uri: Uri = "/ws?foo=1&token=pub-ab%2Bc".parse().unwrap();
        assert_eq!(query_token(&uri), Some("pub-ab+c".into()));

        let uri: Uri = "/ws?token=".parse().unwrap();
        assert_eq!(query_token(&uri), None);

        let uri: Uri = "/ws".parse().unwrap();
        assert_eq!(query_token(&uri), None);
    }

    #[test]
    fn test_client_ips_union() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let map = headers(&[("x-forwarded-for", "1.1.1.1, 10.0.0.9 ,2.2.2.2")]);

        let ips = client_ips(&map, Some(peer)).unwrap();
        assert_eq!(ips, vec!["1.1.1.1", "10.0.0.9", "2.2.2.2"]);
    }

    #[test]
    fn test_client_ips_unresolvable() {
        assert_eq!(
            client_ips(&HeaderMap::new(), None),
            Err(AuthError::IpResolveFailed)
        );
    }
}
