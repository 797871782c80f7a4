//! Name-shaped datatypes: rfc822Name, x500Name, ipAddress, dnsName, and
//! the path-expression value used by attribute selectors.

use std::net::IpAddr;

type ParseResult<T> = Result<T, &'static str>;

// ─── rfc822Name ─────────────────────────────────────────────────────────

/// An email-style name. The local part is case-sensitive; the domain part
/// is case-insensitive and stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc822Name {
    pub local: String,
    pub domain: String,
}

impl Rfc822Name {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let (local, domain) = lexical.split_once('@').ok_or("expected local@domain")?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err("expected local@domain");
        }
        Ok(Self {
            local: local.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    pub fn print(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// XACML rfc822Name-match: a full `local@domain` pattern matches the
    /// whole name (local case-sensitively), a `.sub.domain` pattern matches
    /// any name in that subdomain, and a bare domain matches the domain
    /// exactly — domains case-insensitively throughout.
    pub fn matches(&self, pattern: &str) -> bool {
        if let Some((local, domain)) = pattern.split_once('@') {
            return self.local == local && self.domain == domain.to_ascii_lowercase();
        }
        let pattern = pattern.to_ascii_lowercase();
        if pattern.starts_with('.') {
            self.domain.ends_with(&pattern)
        } else {
            self.domain == pattern
        }
    }
}

// ─── x500Name ───────────────────────────────────────────────────────────

/// A distinguished name, canonicalized for comparison: RDNs in document
/// order, attribute types lowercased, values compared case-insensitively
/// with surrounding whitespace trimmed. A multi-valued RDN (`cn=a+sn=b`)
/// holds its attribute-value assertions sorted, so assertion order inside
/// one RDN never affects equality or matching.
#[derive(Debug, Clone)]
pub struct X500Name {
    raw: String,
    rdns: Vec<Vec<(String, String)>>,
}

/// Equality over the RFC 2253 canonical form, not the raw lexical form.
impl PartialEq for X500Name {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for X500Name {}

impl X500Name {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let mut rdns = Vec::new();
        for rdn in split_unescaped(lexical, ',') {
            let mut assertions = Vec::new();
            for ava in split_unescaped(rdn, '+') {
                let (attr_type, value) = ava.split_once('=').ok_or("RDN missing '='")?;
                let attr_type = attr_type.trim();
                let value = value.trim();
                if attr_type.is_empty() || value.is_empty() {
                    return Err("empty RDN component");
                }
                assertions.push((attr_type.to_ascii_lowercase(), value.to_ascii_lowercase()));
            }
            assertions.sort();
            rdns.push(assertions);
        }
        if rdns.is_empty() {
            return Err("empty distinguished name");
        }
        Ok(Self {
            raw: lexical.to_string(),
            rdns,
        })
    }

    pub fn print(&self) -> String {
        self.raw.clone()
    }

    /// XACML x500Name-match: true iff `self` is a terminal (rightmost)
    /// RDN sequence of `other`.
    pub fn is_suffix_of(&self, other: &X500Name) -> bool {
        if self.rdns.len() > other.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        other.rdns[offset..] == self.rdns[..]
    }
}

#[cfg(test)]
impl X500Name {
    fn canonical(&self) -> &[Vec<(String, String)>] {
        &self.rdns
    }
}

fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

// ─── ipAddress ──────────────────────────────────────────────────────────

/// A port range bound: `80`, `80-`, `-1023`, or `80-1023`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortRange {
    pub lower: Option<u16>,
    pub upper: Option<u16>,
}

impl PortRange {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        if lexical.is_empty() {
            return Err("empty port range");
        }
        let port = |s: &str| s.parse::<u16>().map_err(|_| "invalid port");
        if let Some((lo, hi)) = lexical.split_once('-') {
            let lower = if lo.is_empty() { None } else { Some(port(lo)?) };
            let upper = if hi.is_empty() { None } else { Some(port(hi)?) };
            if lower.is_none() && upper.is_none() {
                return Err("empty port range");
            }
            Ok(Self { lower, upper })
        } else {
            let p = port(lexical)?;
            Ok(Self {
                lower: Some(p),
                upper: Some(p),
            })
        }
    }

    pub fn print(&self) -> String {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) if lo == hi => lo.to_string(),
            (Some(lo), Some(hi)) => format!("{lo}-{hi}"),
            (Some(lo), None) => format!("{lo}-"),
            (None, Some(hi)) => format!("-{hi}"),
            (None, None) => String::new(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }
}

/// An IP address with optional mask and port range. Equality compares the
/// normalized address, mask, and port range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddressValue {
    pub address: IpAddr,
    pub mask: Option<IpAddr>,
    pub ports: PortRange,
}

impl IpAddressValue {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let s = lexical.trim();
        // IPv6 literals are bracketed: [::1]/[mask]:ports
        let (addr_str, rest) = if let Some(stripped) = s.strip_prefix('[') {
            let end = stripped.find(']').ok_or("unterminated IPv6 literal")?;
            (&stripped[..end], &stripped[end + 1..])
        } else {
            let end = s.find(['/', ':']).unwrap_or(s.len());
            (&s[..end], &s[end..])
        };
        let address: IpAddr = addr_str.parse().map_err(|_| "invalid IP address")?;

        let mut mask = None;
        let mut ports = PortRange::default();
        let mut rest = rest;
        if let Some(after) = rest.strip_prefix('/') {
            let (mask_str, tail) = if let Some(stripped) = after.strip_prefix('[') {
                let end = stripped.find(']').ok_or("unterminated IPv6 mask")?;
                (&stripped[..end], &stripped[end + 1..])
            } else {
                let end = after.find(':').unwrap_or(after.len());
                (&after[..end], &after[end..])
            };
            let m: IpAddr = mask_str.parse().map_err(|_| "invalid address mask")?;
            if m.is_ipv4() != address.is_ipv4() {
                return Err("mask family does not match address family");
            }
            mask = Some(m);
            rest = tail;
        }
        if let Some(port_str) = rest.strip_prefix(':') {
            ports = PortRange::parse(port_str)?;
        } else if !rest.is_empty() {
            return Err("trailing characters after IP address");
        }
        Ok(Self {
            address,
            mask,
            ports,
        })
    }

    pub fn print(&self) -> String {
        let mut out = match self.address {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        if let Some(mask) = &self.mask {
            match mask {
                IpAddr::V4(v4) => out.push_str(&format!("/{v4}")),
                IpAddr::V6(v6) => out.push_str(&format!("/[{v6}]")),
            }
        }
        if !self.ports.is_unbounded() {
            out.push(':');
            out.push_str(&self.ports.print());
        }
        out
    }
}

// ─── dnsName ────────────────────────────────────────────────────────────

/// A hostname (optionally with a leading `*.` wildcard label) plus an
/// optional port range. Hostnames are case-insensitive and stored
/// lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsName {
    pub name: String,
    pub ports: PortRange,
}

impl DnsName {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let s = lexical.trim();
        let (name, ports) = match s.split_once(':') {
            Some((name, ports)) => (name, PortRange::parse(ports)?),
            None => (s, PortRange::default()),
        };
        if name.is_empty() {
            return Err("empty hostname");
        }
        let host = name.strip_prefix("*.").unwrap_or(name);
        if host.is_empty()
            || !host
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
        {
            return Err("invalid hostname");
        }
        Ok(Self {
            name: name.to_ascii_lowercase(),
            ports,
        })
    }

    pub fn print(&self) -> String {
        if self.ports.is_unbounded() {
            self.name.clone()
        } else {
            format!("{}:{}", self.name, self.ports.print())
        }
    }
}

// ─── path expression ────────────────────────────────────────────────────

/// A content-path expression value: the path text plus the category whose
/// content it addresses (absent when the enclosing element supplies it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    pub category: Option<String>,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc822_domain_case_insensitive() {
        let a = Rfc822Name::parse("Anderson@SUN.COM").unwrap();
        let b = Rfc822Name::parse("Anderson@sun.com").unwrap();
        let c = Rfc822Name::parse("anderson@sun.com").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c); // local part is case-sensitive
    }

    #[test]
    fn test_rfc822_match_forms() {
        let name = Rfc822Name::parse("Anderson@sun.com").unwrap();
        assert!(name.matches("Anderson@SUN.COM"));
        assert!(!name.matches("anderson@sun.com"));
        assert!(name.matches("sun.com"));
        assert!(!name.matches("example.com"));
        let east = Rfc822Name::parse("Anderson@east.sun.com").unwrap();
        assert!(east.matches(".sun.com"));
        assert!(!name.matches(".sun.com")); // bare domain is not its own subdomain
    }

    #[test]
    fn test_x500_canonical_equality() {
        let a = X500Name::parse("cn=Steve Kille, o=Isode Limited, c=GB").unwrap();
        let b = X500Name::parse("CN=steve kille,O=isode limited,C=gb").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_x500_match_is_terminal_sequence() {
        let whole = X500Name::parse("cn=Steve Kille,o=Isode Limited,c=GB").unwrap();
        let suffix = X500Name::parse("o=Isode Limited,c=GB").unwrap();
        let prefix = X500Name::parse("cn=Steve Kille,o=Isode Limited").unwrap();
        assert!(suffix.is_suffix_of(&whole));
        assert!(whole.is_suffix_of(&whole));
        assert!(!prefix.is_suffix_of(&whole));
        assert!(!whole.is_suffix_of(&suffix));
    }

    #[test]
    fn test_x500_escaped_comma() {
        let n = X500Name::parse("cn=Kille\\, Steve,c=GB").unwrap();
        assert_eq!(n.canonical().len(), 2);
    }

    #[test]
    fn test_x500_multi_valued_rdn_is_one_component() {
        let n = X500Name::parse("cn=a+sn=b,c=GB").unwrap();
        assert_eq!(n.canonical().len(), 2);
        assert_eq!(n.canonical()[0].len(), 2);
        assert!(X500Name::parse("cn=a+,c=GB").is_err());
    }

    #[test]
    fn test_x500_multi_valued_rdn_order_independent() {
        let a = X500Name::parse("cn=a+sn=b,c=GB").unwrap();
        let b = X500Name::parse("SN=B+CN=A,c=GB").unwrap();
        assert_eq!(a, b);
        let suffix = X500Name::parse("c=GB").unwrap();
        assert!(suffix.is_suffix_of(&a));
        assert!(a.is_suffix_of(&b));
        // A single-valued cn is not the same RDN as the multi-valued one.
        let single = X500Name::parse("cn=a,c=GB").unwrap();
        assert_ne!(a, single);
    }

    #[test]
    fn test_ip_address_v4_forms() {
        let plain = IpAddressValue::parse("10.0.0.1").unwrap();
        assert_eq!(plain.print(), "10.0.0.1");
        let masked = IpAddressValue::parse("10.0.0.1/255.0.0.0").unwrap();
        assert_eq!(masked.print(), "10.0.0.1/255.0.0.0");
        let full = IpAddressValue::parse("10.0.0.1/255.0.0.0:80-1023").unwrap();
        assert_eq!(full.print(), "10.0.0.1/255.0.0.0:80-1023");
        let ported = IpAddressValue::parse("10.0.0.1:8080").unwrap();
        assert_eq!(ported.print(), "10.0.0.1:8080");
        assert!(IpAddressValue::parse("10.0.0.300").is_err());
    }

    #[test]
    fn test_ip_address_v6_forms() {
        let v6 = IpAddressValue::parse("[::1]").unwrap();
        assert_eq!(v6.print(), "[::1]");
        let ported = IpAddressValue::parse("[::1]:-1023").unwrap();
        assert_eq!(ported.ports.upper, Some(1023));
        assert!(IpAddressValue::parse("[::1").is_err());
    }

    #[test]
    fn test_ip_equality_normalizes() {
        let a = IpAddressValue::parse("10.0.0.1:80").unwrap();
        let b = IpAddressValue::parse("10.0.0.1:80-80").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dns_name() {
        let n = DnsName::parse("Example.COM").unwrap();
        assert_eq!(n.print(), "example.com");
        let wild = DnsName::parse("*.example.com:8080-").unwrap();
        assert_eq!(wild.print(), "*.example.com:8080-");
        assert!(DnsName::parse("bad host").is_err());
    }

    #[test]
    fn test_port_range_forms() {
        assert_eq!(PortRange::parse("80").unwrap().print(), "80");
        assert_eq!(PortRange::parse("80-").unwrap().print(), "80-");
        assert_eq!(PortRange::parse("-1023").unwrap().print(), "-1023");
        assert_eq!(PortRange::parse("80-1023").unwrap().print(), "80-1023");
        assert!(PortRange::parse("-").is_err());
        assert!(PortRange::parse("").is_err());
    }
}
