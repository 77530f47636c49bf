//! Peer-address helpers.

/// Strip a leading `::ffff:` IPv4-mapped-IPv6 prefix, exactly once, the way
/// `connection_init` does before storing a peer-IP string on a `Connection`.
#[must_use]
pub fn strip_ipv6_mapped_prefix(addr: &str) -> &str {
    addr.strip_prefix("::ffff:").unwrap_or(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefix_once() {
        assert_eq!(strip_ipv6_mapped_prefix("::ffff:192.168.1.1"), "192.168.1.1");
        assert_eq!(strip_ipv6_mapped_prefix("192.168.1.1"), "192.168.1.1");
    }

    #[test]
    fn does_not_strip_twice() {
        // A pathological double-prefixed string only loses one copy.
        let doubled = "::ffff:::ffff:10.0.0.1";
        assert_eq!(strip_ipv6_mapped_prefix(doubled), "::ffff:10.0.0.1");
    }
}
