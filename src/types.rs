//! Data structures used throughout the alias daemon.
//!
//! Container labels are parsed into an [`AliasRequest`] here, and the
//! records read back from pfSense are modelled as [`HostOverride`] and
//! [`AliasEntry`]. Everything is keyed by [`Fqdn`], which mirrors the
//! `host` + `domain` split pfSense stores.

use std::collections::HashMap;
use std::fmt;

use log::debug;

pub const LABEL_OVERRIDE: &str = "pfsense.dns.override";
pub const LABEL_ALIAS: &str = "pfsense.dns.alias";
pub const LABEL_REMOVE_ON_STOP: &str = "pfsense.dns.remove_on_stop";
pub const LABEL_DESCRIPTION: &str = "pfsense.dns.description";

/// A fully qualified name split at its first dot.
///
/// Both parts are lowercased so comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqdn {
    host: String,
    domain: String,
}

impl Fqdn {
    /// Parse `host.domain`. Returns `None` when either side is empty.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().trim_end_matches('.');
        let (host, domain) = name.split_once('.')?;
        Self::from_parts(host, domain)
    }

    pub fn from_parts(host: &str, domain: &str) -> Option<Self> {
        if host.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_ascii_lowercase(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.host, self.domain)
    }
}

/// The alias a container asks for through its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRequest {
    /// Existing host override the alias hangs off.
    pub override_host: Fqdn,
    pub alias_name: Fqdn,
    pub remove_on_stop: bool,
    pub description: String,
}

impl AliasRequest {
    /// Build a request from container labels.
    ///
    /// Returns `None` unless both the override and alias labels are present
    /// and hold usable names.
    pub fn from_labels(labels: &HashMap<String, String>) -> Option<Self> {
        let override_raw = non_empty(labels, LABEL_OVERRIDE)?;
        let alias_raw = non_empty(labels, LABEL_ALIAS)?;

        let Some(override_host) = Fqdn::parse(override_raw) else {
            debug!("Ignoring unusable {} label '{}'", LABEL_OVERRIDE, override_raw);
            return None;
        };
        let Some(alias_name) = Fqdn::parse(alias_raw) else {
            debug!("Ignoring unusable {} label '{}'", LABEL_ALIAS, alias_raw);
            return None;
        };

        let remove_on_stop = labels
            .get(LABEL_REMOVE_ON_STOP)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let description = labels.get(LABEL_DESCRIPTION).cloned().unwrap_or_default();

        Some(Self {
            override_host,
            alias_name,
            remove_on_stop,
            description,
        })
    }
}

fn non_empty<'a>(labels: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    labels
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// A DNS host override on the appliance. Never created or deleted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOverride {
    pub id: u64,
    pub name: Fqdn,
    pub aliases: Vec<AliasEntry>,
}

impl HostOverride {
    pub fn alias(&self, name: &Fqdn) -> Option<&AliasEntry> {
        self.aliases.iter().find(|a| &a.name == name)
    }

    /// True when `name` is this override's own name or one of its aliases.
    pub fn answers_for(&self, name: &Fqdn) -> bool {
        &self.name == name || self.alias(name).is_some()
    }
}

/// An alias record nested under a [`HostOverride`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    /// Identifier of the alias within its parent override.
    pub id: u64,
    pub name: Fqdn,
    pub description: String,
}

/// The two lifecycle transitions the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop,
}

impl Lifecycle {
    /// Classify a runtime action. Anything other than start/stop/die is ignored.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "start" => Some(Self::Start),
            "stop" | "die" => Some(Self::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// A container lifecycle event handed from the runtime to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub lifecycle: Lifecycle,
    pub container_id: String,
    /// Attributes carried on the event itself, which include the labels the
    /// container was created with.
    pub attributes: HashMap<String, String>,
    /// Unix seconds.
    pub time: Option<i64>,
}

impl ContainerEvent {
    /// Container name from the event attributes, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.attributes
            .get("name")
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.container_id)
    }
}

/// Identity and labels of a container as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fqdn_splits_at_first_dot() {
        let name = Fqdn::parse("nginx.lab.internal").unwrap();
        assert_eq!(name.host(), "nginx");
        assert_eq!(name.domain(), "lab.internal");
        assert_eq!(name.to_string(), "nginx.lab.internal");
    }

    #[test]
    fn fqdn_is_case_insensitive() {
        assert_eq!(
            Fqdn::parse("Caddy.LAB.internal"),
            Fqdn::parse("caddy.lab.internal")
        );
    }

    #[test]
    fn fqdn_rejects_single_label_and_empty_parts() {
        assert!(Fqdn::parse("nginx").is_none());
        assert!(Fqdn::parse(".lab.internal").is_none());
        assert!(Fqdn::parse("nginx.").is_none());
        assert!(Fqdn::parse("").is_none());
    }

    #[test]
    fn request_from_full_labels() {
        let req = AliasRequest::from_labels(&labels(&[
            (LABEL_OVERRIDE, "caddy.lab.internal"),
            (LABEL_ALIAS, "nginx.lab.internal"),
            (LABEL_REMOVE_ON_STOP, "TRUE"),
            (LABEL_DESCRIPTION, "nginx via caddy"),
        ]))
        .unwrap();

        assert_eq!(req.override_host.to_string(), "caddy.lab.internal");
        assert_eq!(req.alias_name.to_string(), "nginx.lab.internal");
        assert!(req.remove_on_stop);
        assert_eq!(req.description, "nginx via caddy");
    }

    #[test]
    fn request_defaults_optional_labels() {
        let req = AliasRequest::from_labels(&labels(&[
            (LABEL_OVERRIDE, "caddy.lab.internal"),
            (LABEL_ALIAS, "nginx.lab.internal"),
        ]))
        .unwrap();

        assert!(!req.remove_on_stop);
        assert_eq!(req.description, "");
    }

    #[test]
    fn remove_on_stop_only_accepts_true() {
        for value in ["yes", "1", "false", ""] {
            let req = AliasRequest::from_labels(&labels(&[
                (LABEL_OVERRIDE, "caddy.lab.internal"),
                (LABEL_ALIAS, "nginx.lab.internal"),
                (LABEL_REMOVE_ON_STOP, value),
            ]))
            .unwrap();
            assert!(!req.remove_on_stop, "{value:?} should not enable removal");
        }
    }

    #[test]
    fn request_requires_both_names() {
        assert!(AliasRequest::from_labels(&labels(&[(LABEL_ALIAS, "nginx.lab.internal")])).is_none());
        assert!(AliasRequest::from_labels(&labels(&[(LABEL_OVERRIDE, "caddy.lab.internal")])).is_none());
        assert!(AliasRequest::from_labels(&labels(&[
            (LABEL_OVERRIDE, "caddy.lab.internal"),
            (LABEL_ALIAS, "  "),
        ]))
        .is_none());
        assert!(AliasRequest::from_labels(&HashMap::new()).is_none());
    }

    #[test]
    fn request_rejects_undotted_names() {
        assert!(AliasRequest::from_labels(&labels(&[
            (LABEL_OVERRIDE, "caddy"),
            (LABEL_ALIAS, "nginx.lab.internal"),
        ]))
        .is_none());
    }

    #[test]
    fn lifecycle_classification() {
        assert_eq!(Lifecycle::from_action("start"), Some(Lifecycle::Start));
        assert_eq!(Lifecycle::from_action("stop"), Some(Lifecycle::Stop));
        assert_eq!(Lifecycle::from_action("die"), Some(Lifecycle::Stop));
        assert_eq!(Lifecycle::from_action("kill"), None);
        assert_eq!(Lifecycle::from_action("exec_die"), None);
        assert_eq!(Lifecycle::from_action("restart"), None);
    }

    #[test]
    fn display_name_prefers_attribute() {
        let mut event = ContainerEvent {
            lifecycle: Lifecycle::Start,
            container_id: "abc123".into(),
            attributes: HashMap::new(),
            time: None,
        };
        assert_eq!(event.display_name(), "abc123");
        event.attributes.insert("name".into(), "nginx".into());
        assert_eq!(event.display_name(), "nginx");
    }
}
