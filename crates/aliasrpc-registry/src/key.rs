/// Identity of one published record: which alias, served by which server.
///
/// Keys are laid out as `{prefix}{alias}:{server_id}` with `%` and `:`
/// percent-escaped in the alias, so distinct `(alias, server_id)` pairs never
/// share a key and all records of an alias share the scan prefix
/// `{prefix}{alias}:`.
///
/// # Example
///
/// ```
/// use aliasrpc_registry::RegistryKey;
///
/// let key = RegistryKey::new("math:v2", "k3x9");
/// let encoded = key.encode("svc:");
/// assert_eq!(encoded, "svc:math%3Av2:k3x9");
/// assert_eq!(RegistryKey::parse("svc:", &encoded), Some(key));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub alias: String,
    pub server_id: String,
}

impl RegistryKey {
    pub fn new(alias: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            server_id: server_id.into(),
        }
    }

    pub fn encode(&self, prefix: &str) -> String {
        let mut key = Self::alias_prefix(prefix, &self.alias);
        key.push_str(&self.server_id);
        key
    }

    /// Scan prefix matching every record of `alias`.
    pub fn alias_prefix(prefix: &str, alias: &str) -> String {
        format!("{}{}:", prefix, escape(alias))
    }

    /// Parses a key produced by [`encode`](Self::encode) with the same prefix.
    pub fn parse(prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(prefix)?;
        let (alias, server_id) = rest.split_once(':')?;
        if server_id.is_empty() {
            return None;
        }
        Some(Self::new(unescape(alias)?, server_id))
    }
}

fn escape(alias: &str) -> String {
    let mut out = String::with_capacity(alias.len());
    for c in alias.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "aliasrpc:service:";

    #[test]
    fn test_plain_alias_layout() {
        let key = RegistryKey::new("math", "abc123");
        assert_eq!(key.encode(PREFIX), "aliasrpc:service:math:abc123");
        assert_eq!(RegistryKey::alias_prefix(PREFIX, "math"), "aliasrpc:service:math:");
    }

    #[test]
    fn test_escaped_aliases_parse_back() {
        for alias in ["a:b", "100%", "%3A", "::", "", "ünïcode"] {
            let key = RegistryKey::new(alias, "srv1");
            let encoded = key.encode(PREFIX);
            assert_eq!(RegistryKey::parse(PREFIX, &encoded), Some(key), "alias {:?}", alias);
        }
    }

    #[test]
    fn test_no_collisions_between_tricky_aliases() {
        let a = RegistryKey::new("a:b", "c").encode(PREFIX);
        let b = RegistryKey::new("a", "b:c").encode(PREFIX);
        let c = RegistryKey::new("a%3Ab", "c").encode(PREFIX);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_alias_prefix_does_not_match_longer_alias() {
        let prefix = RegistryKey::alias_prefix(PREFIX, "math");
        let other = RegistryKey::new("mathx", "s1").encode(PREFIX);
        let nested = RegistryKey::new("math:x", "s1").encode(PREFIX);
        assert!(!other.starts_with(&prefix));
        assert!(!nested.starts_with(&prefix));
        assert!(RegistryKey::new("math", "s1").encode(PREFIX).starts_with(&prefix));
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert_eq!(RegistryKey::parse(PREFIX, "other:math:s1"), None);
        assert_eq!(RegistryKey::parse(PREFIX, "aliasrpc:service:math"), None);
        assert_eq!(RegistryKey::parse(PREFIX, "aliasrpc:service:math:"), None);
        assert_eq!(RegistryKey::parse(PREFIX, "aliasrpc:service:bad%zz:s1"), None);
    }
}
