use std::fmt;
use uuid::Uuid;

/// Parsed form of whatever identifies the tenant of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    Id(Uuid),
    /// Routing code taken from the first label of a host name.
    Subdomain(String),
    /// Routing code given as is, e.g. from a header.
    Code(String),
}

impl RoutingKey {
    /// Returns `None` for an empty key.
    pub fn parse(raw: &str, base_domain: &str) -> Option<Self> {
        let raw = raw.trim().to_lowercase();

        if raw.is_empty() {
            return None;
        }

        if let Ok(id) = Uuid::parse_str(&raw) {
            return Some(RoutingKey::Id(id));
        }

        if !raw.contains('.') {
            return Some(RoutingKey::Code(raw));
        }

        let host = raw.split(':').next().unwrap_or_default();
        let base = base_domain.trim_start_matches('.').to_lowercase();

        if host == base {
            return None;
        }

        let label = match host.strip_suffix(&base).and_then(|s| s.strip_suffix('.')) {
            Some(prefix) => prefix.rsplit('.').next(),
            None => host.split('.').next(),
        };

        label
            .filter(|label| !label.is_empty() && *label != "www")
            .map(|label| RoutingKey::Subdomain(label.to_owned()))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            RoutingKey::Id(_) => None,
            RoutingKey::Subdomain(code) | RoutingKey::Code(code) => Some(code),
        }
    }

    /// Cache key: subdomain and code forms of the same tenant share it.
    pub(crate) fn cache_key(&self) -> String {
        match self {
            RoutingKey::Id(id) => id.to_string(),
            RoutingKey::Subdomain(code) | RoutingKey::Code(code) => format!("code:{code}"),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Id(id) => write!(f, "{id}"),
            RoutingKey::Subdomain(code) | RoutingKey::Code(code) => f.write_str(code),
        }
    }
}
