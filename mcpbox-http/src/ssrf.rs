//! URL validation for SSRF prevention
//!
//! DNS is resolved exactly once during validation; the resolved IP is
//! returned and must be used for the actual connection with the original
//! Host header preserved. Resolution failure blocks the request.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use url::Url;

use crate::errors::HttpError;

/// Result of URL validation with IP pinning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    /// The URL as provided.
    pub original_url: String,
    /// The resolved address the connection must use. `None` only in proxy
    /// mode, where a downstream proxy performs the final policy check.
    pub pinned_ip: Option<IpAddr>,
    /// Original hostname, preserved for the Host header and SNI.
    pub hostname: String,
    pub port: u16,
    pub scheme: String,
}

impl ValidatedUrl {
    /// Socket address for the pinned connection.
    pub fn pinned_addr(&self) -> Option<SocketAddr> {
        self.pinned_ip.map(|ip| SocketAddr::new(ip, self.port))
    }
}

/// Hostnames rejected outright, before any resolution.
const BLOCKED_HOSTNAMES: &[&str] = &[
    // Loopback forms
    "localhost",
    "localhost.localdomain",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "ip6-localhost",
    "ip6-loopback",
    // AWS metadata
    "169.254.169.254",
    "metadata.aws.internal",
    "instance-data.ec2.internal",
    // GCP metadata
    "metadata.google.internal",
    "metadata.gke.internal",
    // Azure metadata
    "169.254.169.255",
    "metadata.azure.com",
    // Kubernetes internal DNS
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
];

/// Whether an address falls in a blocked range.
///
/// IPv4-mapped and IPv4-compatible IPv6 addresses are unwrapped and checked
/// as IPv4 so `::ffff:127.0.0.1` cannot slip past the v4 rules.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ipv4(mapped);
            }
            // IPv4-compatible (deprecated ::x.x.x.x form)
            let octets = v6.octets();
            if octets[..12].iter().all(|b| *b == 0) && !v6.is_loopback() && !v6.is_unspecified() {
                let v4 = Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]);
                if is_blocked_ipv4(v4) {
                    return true;
                }
            }

            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // Unique-local fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn parse_and_screen(url: &str) -> Result<(Url, String, u16), HttpError> {
    let parsed = Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(HttpError::Ssrf(format!(
            "URL scheme must be http or https, got: {scheme}"
        )));
    }

    let hostname = parsed
        .host_str()
        .ok_or_else(|| HttpError::Ssrf("URL must have a hostname".to_string()))?
        .trim_matches(['[', ']'])
        .to_ascii_lowercase();

    if BLOCKED_HOSTNAMES.contains(&hostname.as_str()) {
        return Err(HttpError::Ssrf(format!(
            "access to '{hostname}' is not allowed"
        )));
    }

    // Literal IPs are screened without resolution
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(HttpError::Ssrf(format!(
                "access to IP address {ip} is not allowed"
            )));
        }
    }

    let port = parsed
        .port()
        .unwrap_or(if scheme == "https" { 443 } else { 80 });

    Ok((parsed, hostname, port))
}

/// Validate a URL and pin the resolved IP.
///
/// Every address the hostname resolves to is screened; any blocked address
/// fails the whole URL. The first address becomes the pinned IP.
pub async fn validate_url(url: &str) -> Result<ValidatedUrl, HttpError> {
    let (_, hostname, port) = parse_and_screen(url)?;

    // Literal IP: already screened, pin it directly
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ValidatedUrl {
            original_url: url.to_string(),
            pinned_ip: Some(ip),
            hostname,
            port,
            scheme: scheme_of(url),
        });
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hostname.as_str(), port))
        .await
        .map_err(|_| {
            HttpError::Ssrf(format!(
                "DNS resolution failed for '{hostname}'; cannot verify the URL is safe to access"
            ))
        })?
        .collect();

    let mut pinned: Option<IpAddr> = None;
    for addr in &addrs {
        if is_blocked_ip(addr.ip()) {
            return Err(HttpError::Ssrf(format!(
                "URL resolves to blocked address ({})",
                addr.ip()
            )));
        }
        if pinned.is_none() {
            pinned = Some(addr.ip());
        }
    }

    let pinned_ip = pinned
        .ok_or_else(|| HttpError::Ssrf(format!("no addresses found for '{hostname}'")))?;

    Ok(ValidatedUrl {
        original_url: url.to_string(),
        pinned_ip: Some(pinned_ip),
        hostname,
        port,
        scheme: scheme_of(url),
    })
}

/// Proxy-mode validation: the same scheme, hostname and literal-IP rules,
/// but no resolution, for deployments where an outbound proxy applies the
/// policy.
pub fn validate_url_proxy_mode(url: &str) -> Result<ValidatedUrl, HttpError> {
    let (_, hostname, port) = parse_and_screen(url)?;
    Ok(ValidatedUrl {
        original_url: url.to_string(),
        pinned_ip: None,
        hostname,
        port,
        scheme: scheme_of(url),
    })
}

fn scheme_of(url: &str) -> String {
    url.split("://").next().unwrap_or("http").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_ipv4_ranges() {
        for ip in [
            "127.0.0.1",
            "127.8.8.8",
            "10.0.0.5",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "224.0.0.1",
            "255.255.255.255",
        ] {
            assert!(is_blocked_ip(ip.parse().unwrap()), "{ip} should be blocked");
        }
    }

    #[test]
    fn allowed_ipv4() {
        for ip in ["1.1.1.1", "8.8.8.8", "93.184.216.34", "172.32.0.1"] {
            assert!(!is_blocked_ip(ip.parse().unwrap()), "{ip} should pass");
        }
    }

    #[test]
    fn blocked_ipv6_ranges() {
        for ip in [
            "::1",
            "::",
            "fe80::1",
            "fc00::1",
            "fd12:3456::1",
            "ff02::1",
            "::ffff:127.0.0.1",
            "::ffff:10.0.0.1",
            "::ffff:192.168.0.1",
            "::10.0.0.1",
        ] {
            assert!(is_blocked_ip(ip.parse().unwrap()), "{ip} should be blocked");
        }
    }

    #[test]
    fn allowed_ipv6() {
        assert!(!is_blocked_ip("2606:4700:4700::1111".parse().unwrap()));
        assert!(!is_blocked_ip("::ffff:1.1.1.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        for url in ["ftp://example.com/x", "file:///etc/passwd", "gopher://x"] {
            assert!(matches!(validate_url(url).await, Err(HttpError::Ssrf(_))), "{url}");
        }
    }

    #[tokio::test]
    async fn rejects_blocked_hostnames() {
        for url in [
            "http://localhost/x",
            "http://LOCALHOST/x",
            "http://metadata.google.internal/computeMetadata",
            "http://169.254.169.254/latest/meta-data/",
            "https://kubernetes.default.svc/api",
        ] {
            let err = validate_url(url).await.unwrap_err();
            assert!(matches!(err, HttpError::Ssrf(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn rejects_literal_private_ips() {
        for url in [
            "http://127.0.0.1:8080/",
            "http://10.1.2.3/",
            "http://[::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(validate_url(url).await.is_err(), "{url}");
        }
    }

    #[tokio::test]
    async fn pins_literal_public_ip() {
        let validated = validate_url("http://93.184.216.34/page").await.unwrap();
        assert_eq!(
            validated.pinned_ip,
            Some("93.184.216.34".parse::<IpAddr>().unwrap())
        );
        assert_eq!(validated.port, 80);
        assert_eq!(validated.hostname, "93.184.216.34");
    }

    #[test]
    fn proxy_mode_skips_resolution_but_screens_hostnames() {
        assert!(validate_url_proxy_mode("http://localhost/").is_err());
        assert!(validate_url_proxy_mode("http://10.0.0.1/").is_err());

        let validated = validate_url_proxy_mode("https://api.example.com/v1").unwrap();
        assert_eq!(validated.pinned_ip, None);
        assert_eq!(validated.port, 443);
        assert_eq!(validated.hostname, "api.example.com");
    }

    #[test]
    fn default_ports_follow_scheme() {
        let v = validate_url_proxy_mode("https://api.example.com/").unwrap();
        assert_eq!(v.port, 443);
        let v = validate_url_proxy_mode("http://api.example.com/").unwrap();
        assert_eq!(v.port, 80);
        let v = validate_url_proxy_mode("http://api.example.com:8080/").unwrap();
        assert_eq!(v.port, 8080);
    }
}
