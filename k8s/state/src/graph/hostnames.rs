//! Hostname validation, wildcard matching and specificity ordering.

use nginx_gateway_controller_core::dataplane::WILDCARD_HOSTNAME;
use std::cmp::Ordering;

/// Validates an RFC 1123 DNS name that may begin with a single wildcard
/// label (`*.`).
pub(crate) fn validate_hostname(hostname: &str) -> Result<(), String> {
    if hostname.is_empty() {
        return Err("hostname cannot be empty".to_string());
    }
    if hostname.contains(':') {
        return Err("hostname cannot contain a port".to_string());
    }

    let name = hostname.strip_prefix("*.").unwrap_or(hostname);
    validate_dns_name(name)
}

/// Validates a hostname usable for SNI: a DNS name with no wildcard.
pub(crate) fn validate_sni_hostname(hostname: &str) -> Result<(), String> {
    if hostname.is_empty() {
        return Err("hostname cannot be empty".to_string());
    }
    if hostname.starts_with("*.") {
        return Err("hostname cannot be a wildcard".to_string());
    }
    validate_dns_name(hostname)
}

fn validate_dns_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("hostname is invalid: empty name".to_string());
    }
    if name.len() > 253 {
        return Err("hostname is invalid: must be no more than 253 characters".to_string());
    }

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("hostname is invalid: label {label:?} must be 1-63 characters"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!(
                "hostname is invalid: label {label:?} must consist of lower case alphanumeric \
                 characters or '-'"
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!(
                "hostname is invalid: label {label:?} must start and end with an alphanumeric \
                 character"
            ));
        }
    }

    Ok(())
}

/// Computes the hostnames a route binds on a listener: the intersection of
/// the listener hostname (empty means any) and the route hostnames.
///
/// A route with no hostnames binds the listener hostname itself, or the
/// catch-all when the listener has none.
pub(crate) fn find_accepted_hostnames(
    listener_hostname: Option<&str>,
    route_hostnames: &[String],
) -> Vec<String> {
    let listener_hostname = listener_hostname.unwrap_or("");

    if route_hostnames.is_empty() {
        if listener_hostname.is_empty() {
            return vec![WILDCARD_HOSTNAME.to_string()];
        }
        return vec![listener_hostname.to_string()];
    }

    route_hostnames
        .iter()
        .filter(|route_hostname| hostnames_intersect(listener_hostname, route_hostname))
        .map(|route_hostname| {
            more_specific_hostname(listener_hostname, route_hostname).to_string()
        })
        .collect()
}

/// Whether two hostnames have a non-empty intersection. Wildcards match per
/// the RFC 6125 left-label rule: `*.example.com` matches `foo.example.com`
/// but neither `example.com` nor `bar.foo.example.com`... except that the
/// Gateway API allows multiple leading labels under a wildcard, which is the
/// behavior implemented here.
pub(crate) fn hostnames_intersect(h1: &str, h2: &str) -> bool {
    if h1.is_empty() || h2.is_empty() || h1 == h2 {
        return true;
    }

    let wildcard_matches = |wildcard: &str, name: &str| {
        let suffix = &wildcard[1..]; // keep the leading dot
        name.strip_suffix(suffix).map(|head| !head.is_empty()).unwrap_or(false)
            || name == wildcard
    };

    match (h1.starts_with("*."), h2.starts_with("*.")) {
        (true, false) => wildcard_matches(h1, h2),
        (false, true) => wildcard_matches(h2, h1),
        // Two distinct wildcards intersect when one domain is under the other.
        (true, true) => wildcard_matches(h1, &h2[2..]) || wildcard_matches(h2, &h1[2..]),
        (false, false) => false,
    }
}

/// Returns the more specific of two intersecting hostnames: a non-empty name
/// beats the empty one, an exact name beats a wildcard, and a longer
/// wildcard beats a shorter one.
pub(crate) fn more_specific_hostname<'a>(h1: &'a str, h2: &'a str) -> &'a str {
    match cmp_hostname_specificity(h1, h2) {
        Ordering::Less => h2,
        _ => h1,
    }
}

/// Orders hostnames by specificity, most specific last being `Greater`.
/// Equal-specificity names order lexicographically on reversed labels so the
/// result is total and deterministic.
pub(crate) fn cmp_hostname_specificity(h1: &str, h2: &str) -> Ordering {
    fn class(h: &str) -> u8 {
        if h.is_empty() || h == WILDCARD_HOSTNAME {
            0
        } else if h.starts_with("*.") {
            1
        } else {
            2
        }
    }

    class(h1)
        .cmp(&class(h2))
        .then_with(|| h1.len().cmp(&h2.len()))
        .then_with(|| {
            let r1: Vec<&str> = h1.rsplit('.').collect();
            let r2: Vec<&str> = h2.rsplit('.').collect();
            r1.cmp(&r2)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_validation() {
        for valid in ["example.com", "*.example.com", "foo-bar.example.com", "cafe"] {
            assert!(validate_hostname(valid).is_ok(), "{valid}");
        }
        for invalid in [
            "",
            "example.com:80",
            "*.*.example.com:",
            "Example.com",
            "-foo.example.com",
            "foo..example.com",
        ] {
            assert!(validate_hostname(invalid).is_err(), "{invalid:?}");
        }
    }

    #[test]
    fn sni_hostname_forbids_wildcards() {
        assert!(validate_sni_hostname("app.example.com").is_ok());
        assert!(validate_sni_hostname("*.example.com").is_err());
        assert!(validate_sni_hostname("").is_err());
    }

    #[test]
    fn intersection_follows_wildcard_rules() {
        for (h1, h2, expected) in [
            ("", "foo.example.com", true),
            ("foo.example.com", "", true),
            ("foo.example.com", "foo.example.com", true),
            ("foo.example.com", "bar.example.com", false),
            ("*.example.com", "foo.example.com", true),
            ("*.example.com", "example.com", false),
            ("*.example.com", "bar.foo.example.com", true),
            ("foo.example.com", "*.example.com", true),
            ("*.example.com", "*.example.com", true),
            ("*.foo.example.com", "*.example.com", true),
            ("*.example.com", "*.example.org", false),
        ] {
            assert_eq!(hostnames_intersect(h1, h2), expected, "{h1} vs {h2}");
        }
    }

    #[test]
    fn accepted_hostnames_are_the_intersection() {
        let route_hostnames = vec!["foo.example.com".to_string(), "bar.example.org".to_string()];

        assert_eq!(
            find_accepted_hostnames(None, &route_hostnames),
            vec!["foo.example.com", "bar.example.org"]
        );
        assert_eq!(
            find_accepted_hostnames(Some("*.example.com"), &route_hostnames),
            vec!["foo.example.com"]
        );
        assert_eq!(
            find_accepted_hostnames(Some("qux.example.com"), &route_hostnames),
            Vec::<String>::new()
        );
    }

    #[test]
    fn route_without_hostnames_binds_the_listener_hostname() {
        assert_eq!(
            find_accepted_hostnames(Some("cafe.example.com"), &[]),
            vec!["cafe.example.com"]
        );
        assert_eq!(find_accepted_hostnames(None, &[]), vec![WILDCARD_HOSTNAME]);
    }

    #[test]
    fn specificity_prefers_exact_over_wildcard_over_empty() {
        assert_eq!(
            more_specific_hostname("*.example.com", "foo.example.com"),
            "foo.example.com"
        );
        assert_eq!(more_specific_hostname("foo.example.com", ""), "foo.example.com");
        assert_eq!(
            cmp_hostname_specificity("", "*.example.com"),
            Ordering::Less
        );
    }
}
