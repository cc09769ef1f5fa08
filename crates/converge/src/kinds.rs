//! Object kinds and their metadata table.
//!
//! Every component that needs to know something about a kind (how to name it,
//! whether it carries tags, which family it belongs to, where it sits in the
//! dependency order) asks [`info`] instead of matching on concrete types.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a configuration object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Tag,
    Address,
    ExternalList,
    AddressGroup,
    Service,
    ServiceGroup,
    Application,
    ApplicationFilter,
    ApplicationGroup,
    UrlCategory,
    SecurityRule,
}

impl ObjectKind {
    /// All kinds, in table order
    pub const ALL: [ObjectKind; 11] = [
        ObjectKind::Tag,
        ObjectKind::Address,
        ObjectKind::ExternalList,
        ObjectKind::AddressGroup,
        ObjectKind::Service,
        ObjectKind::ServiceGroup,
        ObjectKind::Application,
        ObjectKind::ApplicationFilter,
        ObjectKind::ApplicationGroup,
        ObjectKind::UrlCategory,
        ObjectKind::SecurityRule,
    ];

    /// Metadata for this kind
    pub fn info(self) -> &'static KindInfo {
        info(self)
    }

    /// Stable kebab-case identifier
    pub fn as_str(self) -> &'static str {
        self.info().id
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        KINDS
            .iter()
            .find(|k| k.id == wanted || k.aliases.contains(&wanted.as_str()))
            .map(|k| k.kind)
            .ok_or_else(|| Error::validation(format!("unknown object kind '{s}'")))
    }
}

/// A set of kinds that reference each other (leaf, group, filter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Address,
    Service,
    Application,
    UrlCategory,
}

impl Family {
    /// Kinds a member name may resolve to, in probing priority order
    pub fn candidates(self) -> &'static [ObjectKind] {
        match self {
            Family::Address => &[
                ObjectKind::Address,
                ObjectKind::AddressGroup,
                ObjectKind::ExternalList,
            ],
            Family::Service => &[ObjectKind::Service, ObjectKind::ServiceGroup],
            Family::Application => &[
                ObjectKind::Application,
                ObjectKind::ApplicationGroup,
                ObjectKind::ApplicationFilter,
            ],
            Family::UrlCategory => &[ObjectKind::UrlCategory],
        }
    }

    /// Built-in names that are never looked up
    pub fn is_sentinel(self, name: &str) -> bool {
        let name = name.trim();
        name.eq_ignore_ascii_case("any")
            || (self == Family::Service && name.eq_ignore_ascii_case("application-default"))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Family::Address => "address",
            Family::Service => "service",
            Family::Application => "application",
            Family::UrlCategory => "URL category",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a kind inside its family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Standalone object with no references inside its family
    Leaf,
    /// Object listing members of its own family
    Group,
    /// Object matching members dynamically (filters, external lists)
    Filter,
    /// Object referencing several families (rules)
    Root,
    /// Object only ever referenced as a tag
    Support,
}

/// Metadata row for one kind
#[derive(Debug)]
pub struct KindInfo {
    pub kind: ObjectKind,
    /// Stable identifier used in paths, CLI flags and snapshots
    pub id: &'static str,
    /// Accepted alternative spellings
    pub aliases: &'static [&'static str],
    /// Singular human name
    pub display_name: &'static str,
    pub family: Option<Family>,
    pub role: Role,
    /// Whether the device accepts tag assignments on this kind
    pub taggable: bool,
    /// Dependency tier: lower tiers must exist before higher ones
    pub tier: u8,
}

impl KindInfo {
    /// "1 address group", "3 address groups"
    pub fn count(&self, n: usize) -> String {
        if n == 1 {
            format!("1 {}", self.display_name)
        } else {
            format!("{} {}", n, pluralize(self.display_name))
        }
    }
}

static KINDS: [KindInfo; 11] = [
    KindInfo {
        kind: ObjectKind::Tag,
        id: "tag",
        aliases: &["tags"],
        display_name: "tag",
        family: None,
        role: Role::Support,
        taggable: false,
        tier: 0,
    },
    KindInfo {
        kind: ObjectKind::Address,
        id: "address",
        aliases: &["addresses"],
        display_name: "address",
        family: Some(Family::Address),
        role: Role::Leaf,
        taggable: true,
        tier: 1,
    },
    KindInfo {
        kind: ObjectKind::ExternalList,
        id: "external-list",
        aliases: &["edl", "external-dynamic-list"],
        display_name: "external dynamic list",
        family: Some(Family::Address),
        role: Role::Filter,
        taggable: false,
        tier: 1,
    },
    KindInfo {
        kind: ObjectKind::AddressGroup,
        id: "address-group",
        aliases: &["address-groups"],
        display_name: "address group",
        family: Some(Family::Address),
        role: Role::Group,
        taggable: true,
        tier: 2,
    },
    KindInfo {
        kind: ObjectKind::Service,
        id: "service",
        aliases: &["services"],
        display_name: "service",
        family: Some(Family::Service),
        role: Role::Leaf,
        taggable: false,
        tier: 1,
    },
    KindInfo {
        kind: ObjectKind::ServiceGroup,
        id: "service-group",
        aliases: &["service-groups"],
        display_name: "service group",
        family: Some(Family::Service),
        role: Role::Group,
        taggable: false,
        tier: 2,
    },
    KindInfo {
        kind: ObjectKind::Application,
        id: "application",
        aliases: &["applications", "app"],
        display_name: "application",
        family: Some(Family::Application),
        role: Role::Leaf,
        taggable: true,
        tier: 1,
    },
    KindInfo {
        kind: ObjectKind::ApplicationFilter,
        id: "application-filter",
        aliases: &["application-filters", "app-filter"],
        display_name: "application filter",
        family: Some(Family::Application),
        role: Role::Filter,
        taggable: true,
        tier: 1,
    },
    KindInfo {
        kind: ObjectKind::ApplicationGroup,
        id: "application-group",
        aliases: &["application-groups", "app-group"],
        display_name: "application group",
        family: Some(Family::Application),
        role: Role::Group,
        taggable: true,
        tier: 2,
    },
    KindInfo {
        kind: ObjectKind::UrlCategory,
        id: "url-category",
        aliases: &["custom-url-category", "url-categories"],
        display_name: "custom URL category",
        family: Some(Family::UrlCategory),
        role: Role::Leaf,
        taggable: false,
        tier: 1,
    },
    KindInfo {
        kind: ObjectKind::SecurityRule,
        id: "security-rule",
        aliases: &["security-rules", "rule"],
        display_name: "security rule",
        family: None,
        role: Role::Root,
        taggable: true,
        tier: 3,
    },
];

/// Look up the metadata row for a kind.
pub fn info(kind: ObjectKind) -> &'static KindInfo {
    // Table order matches `ObjectKind::ALL`, checked by test_table_matches_enum_order.
    &KINDS[kind as usize]
}

/// Convert a singular English noun to its plural form.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if lower.ends_with('y')
        && !lower.ends_with("ay")
        && !lower.ends_with("ey")
        && !lower.ends_with("oy")
        && !lower.ends_with("uy")
    {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{word}es");
    }
    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_enum_order() {
        for kind in ObjectKind::ALL {
            assert_eq!(info(kind).kind, kind);
        }
    }

    #[test]
    fn test_parse_kind_and_aliases() {
        assert_eq!(
            "address-group".parse::<ObjectKind>().unwrap(),
            ObjectKind::AddressGroup
        );
        assert_eq!("EDL".parse::<ObjectKind>().unwrap(), ObjectKind::ExternalList);
        assert!("widget".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("policy"), "policies");
        assert_eq!(pluralize("key"), "keys");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("security rule"), "security rules");
        assert_eq!(pluralize("custom URL category"), "custom URL categories");
    }

    #[test]
    fn test_count_labels() {
        assert_eq!(ObjectKind::AddressGroup.info().count(1), "1 address group");
        assert_eq!(ObjectKind::AddressGroup.info().count(3), "3 address groups");
    }

    #[test]
    fn test_family_candidates_priority() {
        assert_eq!(
            Family::Address.candidates(),
            &[
                ObjectKind::Address,
                ObjectKind::AddressGroup,
                ObjectKind::ExternalList
            ]
        );
    }

    #[test]
    fn test_sentinels() {
        assert!(Family::Address.is_sentinel("ANY"));
        assert!(Family::Service.is_sentinel("application-default"));
        assert!(!Family::Address.is_sentinel("application-default"));
        assert!(!Family::Address.is_sentinel("web-servers"));
    }
}
