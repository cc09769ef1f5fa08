//! Core types for reconciliation runs

use crate::error::{Error, Result};
use crate::kinds::{Family, ObjectKind};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Longest object name the device accepts
pub const MAX_NAME_LEN: usize = 63;

/// Configuration container on the device
///
/// `Shared` is the ancestor of every other scope. Objects in `Shared` are
/// visible from all scopes, never the other way around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Scope {
    #[default]
    Shared,
    DeviceGroup(String),
    Template(String),
    Vsys(String),
}

impl Scope {
    /// Nearest ancestor scope, if any
    pub fn parent(&self) -> Option<Scope> {
        match self {
            Scope::Shared => None,
            _ => Some(Scope::Shared),
        }
    }

    /// Ancestors from nearest to farthest
    pub fn ancestors(&self) -> Vec<Scope> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(scope) = current {
            current = scope.parent();
            out.push(scope);
        }
        out
    }

    /// Whether objects living in `self` can be referenced from `other`
    pub fn is_visible_from(&self, other: &Scope) -> bool {
        self == other || other.ancestors().contains(self)
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Scope::Shared)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Shared => f.write_str("shared"),
            Scope::DeviceGroup(name) => write!(f, "device-group:{name}"),
            Scope::Template(name) => write!(f, "template:{name}"),
            Scope::Vsys(name) => write!(f, "vsys:{name}"),
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("shared") {
            return Ok(Scope::Shared);
        }
        let (prefix, name) = s
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("invalid scope '{s}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation(format!("scope '{s}' has an empty name")));
        }
        match prefix.trim().to_ascii_lowercase().as_str() {
            "device-group" | "dg" => Ok(Scope::DeviceGroup(name.to_string())),
            "template" => Ok(Scope::Template(name.to_string())),
            "vsys" => Ok(Scope::Vsys(name.to_string())),
            other => Err(Error::validation(format!("unknown scope type '{other}'"))),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Address value encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    #[default]
    IpNetmask,
    IpRange,
    IpWildcard,
    Fqdn,
}

/// Transport protocol of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Content type of an external dynamic list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    #[default]
    Ip,
    Domain,
    Url,
}

/// Matching mode of a custom URL category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlCategoryType {
    #[default]
    UrlList,
    CategoryMatch,
}

/// Action taken by a security rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
    Drop,
    ResetClient,
    ResetServer,
    ResetBoth,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressObject {
    #[serde(default, rename = "type")]
    pub address_type: AddressType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressGroupObject {
    /// Static members (address family names)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    /// Dynamic match expression over tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalListObject {
    #[serde(default, rename = "type")]
    pub list_type: ListType,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceObject {
    #[serde(default)]
    pub protocol: Protocol,
    pub destination_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceGroupObject {
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationObject {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    pub risk: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationGroupObject {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationFilterObject {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcategories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlCategoryObject {
    #[serde(default, rename = "type")]
    pub category_type: UrlCategoryType,
    #[serde(default)]
    pub list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityRuleObject {
    #[serde(default)]
    pub from_zones: Vec<String>,
    #[serde(default)]
    pub to_zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Kind-specific attributes of a configuration object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ObjectSpec {
    Tag(TagObject),
    Address(AddressObject),
    ExternalList(ExternalListObject),
    AddressGroup(AddressGroupObject),
    Service(ServiceObject),
    ServiceGroup(ServiceGroupObject),
    Application(ApplicationObject),
    ApplicationFilter(ApplicationFilterObject),
    ApplicationGroup(ApplicationGroupObject),
    UrlCategory(UrlCategoryObject),
    SecurityRule(SecurityRuleObject),
}

impl ObjectSpec {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectSpec::Tag(_) => ObjectKind::Tag,
            ObjectSpec::Address(_) => ObjectKind::Address,
            ObjectSpec::ExternalList(_) => ObjectKind::ExternalList,
            ObjectSpec::AddressGroup(_) => ObjectKind::AddressGroup,
            ObjectSpec::Service(_) => ObjectKind::Service,
            ObjectSpec::ServiceGroup(_) => ObjectKind::ServiceGroup,
            ObjectSpec::Application(_) => ObjectKind::Application,
            ObjectSpec::ApplicationFilter(_) => ObjectKind::ApplicationFilter,
            ObjectSpec::ApplicationGroup(_) => ObjectKind::ApplicationGroup,
            ObjectSpec::UrlCategory(_) => ObjectKind::UrlCategory,
            ObjectSpec::SecurityRule(_) => ObjectKind::SecurityRule,
        }
    }

    /// Copy with every field in comparison form.
    ///
    /// Strings are trimmed and blank optionals dropped. Lists are trimmed,
    /// stripped of blanks, sorted and deduplicated. Values the device treats
    /// case-insensitively (FQDNs, application ids, URL entries, sentinels)
    /// are lowercased; names stay case-sensitive.
    pub fn normalized(&self) -> ObjectSpec {
        match self {
            ObjectSpec::Tag(t) => ObjectSpec::Tag(TagObject {
                color: opt(&t.color).map(|c| c.to_ascii_lowercase()),
                comments: opt(&t.comments),
            }),
            ObjectSpec::Address(a) => ObjectSpec::Address(AddressObject {
                address_type: a.address_type,
                value: if a.address_type == AddressType::Fqdn {
                    a.value.trim().to_ascii_lowercase()
                } else {
                    a.value.trim().to_string()
                },
                description: opt(&a.description),
                tags: set(&a.tags, Case::Sensitive),
            }),
            ObjectSpec::ExternalList(e) => ObjectSpec::ExternalList(ExternalListObject {
                list_type: e.list_type,
                source: e.source.trim().to_string(),
                description: opt(&e.description),
                exceptions: set(&e.exceptions, Case::Insensitive),
            }),
            ObjectSpec::AddressGroup(g) => ObjectSpec::AddressGroup(AddressGroupObject {
                members: set(&g.members, Case::Sensitive),
                filter: opt(&g.filter),
                description: opt(&g.description),
                tags: set(&g.tags, Case::Sensitive),
            }),
            ObjectSpec::Service(s) => ObjectSpec::Service(ServiceObject {
                protocol: s.protocol,
                destination_port: s.destination_port.trim().to_string(),
                source_port: opt(&s.source_port),
                description: opt(&s.description),
            }),
            ObjectSpec::ServiceGroup(g) => ObjectSpec::ServiceGroup(ServiceGroupObject {
                members: set(&g.members, Case::Sensitive),
            }),
            ObjectSpec::Application(a) => ObjectSpec::Application(ApplicationObject {
                category: a.category.trim().to_ascii_lowercase(),
                subcategory: opt(&a.subcategory).map(|s| s.to_ascii_lowercase()),
                technology: opt(&a.technology).map(|s| s.to_ascii_lowercase()),
                risk: a.risk,
                description: opt(&a.description),
                tags: set(&a.tags, Case::Sensitive),
            }),
            ObjectSpec::ApplicationFilter(f) => {
                let mut risks = f.risks.clone();
                risks.sort_unstable();
                risks.dedup();
                ObjectSpec::ApplicationFilter(ApplicationFilterObject {
                    categories: set(&f.categories, Case::Insensitive),
                    subcategories: set(&f.subcategories, Case::Insensitive),
                    technologies: set(&f.technologies, Case::Insensitive),
                    risks,
                    tags: set(&f.tags, Case::Sensitive),
                })
            }
            ObjectSpec::ApplicationGroup(g) => ObjectSpec::ApplicationGroup(ApplicationGroupObject {
                members: set(&g.members, Case::Insensitive),
                tags: set(&g.tags, Case::Sensitive),
            }),
            ObjectSpec::UrlCategory(u) => ObjectSpec::UrlCategory(UrlCategoryObject {
                category_type: u.category_type,
                list: set(&u.list, Case::Insensitive),
                description: opt(&u.description),
            }),
            ObjectSpec::SecurityRule(r) => ObjectSpec::SecurityRule(SecurityRuleObject {
                from_zones: set(&r.from_zones, Case::Sensitive),
                to_zones: set(&r.to_zones, Case::Sensitive),
                sources: set_with_sentinels(&r.sources),
                destinations: set_with_sentinels(&r.destinations),
                applications: set(&r.applications, Case::Insensitive),
                services: set_with_sentinels(&r.services),
                categories: set_with_sentinels(&r.categories),
                action: r.action,
                description: opt(&r.description),
                tags: set(&r.tags, Case::Sensitive),
                disabled: r.disabled,
            }),
        }
    }
}

#[derive(Clone, Copy)]
enum Case {
    Sensitive,
    Insensitive,
}

fn opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set(values: &[String], case: Case) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| match case {
            Case::Sensitive => v.to_string(),
            Case::Insensitive => v.to_ascii_lowercase(),
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

// Member lists where only the built-in names are case-insensitive.
fn set_with_sentinels(values: &[String]) -> Vec<String> {
    let lowered: Vec<String> = values
        .iter()
        .map(|v| {
            let t = v.trim();
            if t.eq_ignore_ascii_case("any") || t.eq_ignore_ascii_case("application-default") {
                t.to_ascii_lowercase()
            } else {
                t.to_string()
            }
        })
        .collect();
    set(&lowered, Case::Sensitive)
}

/// Address of one object on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectPath {
    pub scope: Scope,
    pub kind: ObjectKind,
    pub name: String,
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.kind, self.name)
    }
}

/// A named configuration object in one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(flatten)]
    pub spec: ObjectSpec,
}

impl ConfigObject {
    /// Build a validated object.
    pub fn new(name: impl Into<String>, scope: Scope, spec: ObjectSpec) -> Result<Self> {
        let object = Self {
            name: name.into(),
            scope,
            spec,
        };
        object.validate()?;
        Ok(object)
    }

    /// Tag created on demand when a copied object references it.
    pub fn default_tag(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            spec: ObjectSpec::Tag(TagObject::default()),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.spec.kind()
    }

    pub fn path(&self) -> ObjectPath {
        ObjectPath {
            scope: self.scope.clone(),
            kind: self.kind(),
            name: self.name.clone(),
        }
    }

    /// Same object placed in another scope.
    pub fn with_scope(&self, scope: Scope) -> Self {
        Self {
            name: self.name.clone(),
            scope,
            spec: self.spec.clone(),
        }
    }

    /// Check the name rules and the kind's required fields.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        let label = format!("{} '{}'", kind.info().display_name, self.name);
        if self.name.trim().is_empty() {
            return Err(Error::validation(format!(
                "{} name must not be empty",
                kind.info().display_name
            )));
        }
        if self.name.trim() != self.name {
            return Err(Error::validation(format!(
                "{label}: name has leading or trailing whitespace"
            )));
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(Error::validation(format!(
                "{label}: name is longer than {MAX_NAME_LEN} characters"
            )));
        }

        if let Some(field) = self.blank_entry() {
            return Err(Error::validation(format!("{label}: {field} has a blank entry")));
        }

        let missing = |field: &str| Error::validation(format!("{label}: {field} is required"));
        match &self.spec {
            ObjectSpec::Address(a) if a.value.trim().is_empty() => Err(missing("value")),
            ObjectSpec::Service(s) if s.destination_port.trim().is_empty() => {
                Err(missing("destination port"))
            }
            ObjectSpec::ExternalList(e) if e.source.trim().is_empty() => Err(missing("source")),
            ObjectSpec::AddressGroup(g) => {
                let has_members = g.members.iter().any(|m| !m.trim().is_empty());
                let has_filter = opt(&g.filter).is_some();
                match (has_members, has_filter) {
                    (false, false) => Err(missing("members or a dynamic filter")),
                    (true, true) => Err(Error::validation(format!(
                        "{label}: static members and a dynamic filter are mutually exclusive"
                    ))),
                    _ => Ok(()),
                }
            }
            ObjectSpec::ServiceGroup(g) if g.members.iter().all(|m| m.trim().is_empty()) => {
                Err(missing("members"))
            }
            ObjectSpec::ApplicationGroup(g) if g.members.iter().all(|m| m.trim().is_empty()) => {
                Err(missing("members"))
            }
            ObjectSpec::Application(a) if a.category.trim().is_empty() => Err(missing("category")),
            ObjectSpec::Application(a) if !(1..=5).contains(&a.risk) => Err(Error::validation(
                format!("{label}: risk must be between 1 and 5"),
            )),
            ObjectSpec::UrlCategory(u) if u.list.iter().all(|m| m.trim().is_empty()) => {
                Err(missing("list"))
            }
            ObjectSpec::SecurityRule(r) if r.from_zones.iter().all(|z| z.trim().is_empty()) => {
                Err(missing("source zone"))
            }
            ObjectSpec::SecurityRule(r) if r.to_zones.iter().all(|z| z.trim().is_empty()) => {
                Err(missing("destination zone"))
            }
            _ => Ok(()),
        }
    }

    /// First name list holding an empty or whitespace-only entry
    fn blank_entry(&self) -> Option<&'static str> {
        let lists: Vec<(&'static str, &[String])> = match &self.spec {
            ObjectSpec::AddressGroup(g) => vec![("members", g.members.as_slice())],
            ObjectSpec::ServiceGroup(g) => vec![("members", g.members.as_slice())],
            ObjectSpec::ApplicationGroup(g) => vec![("members", g.members.as_slice())],
            ObjectSpec::UrlCategory(u) => vec![("list", u.list.as_slice())],
            ObjectSpec::SecurityRule(r) => vec![
                ("source zones", r.from_zones.as_slice()),
                ("destination zones", r.to_zones.as_slice()),
                ("sources", r.sources.as_slice()),
                ("destinations", r.destinations.as_slice()),
                ("applications", r.applications.as_slice()),
                ("services", r.services.as_slice()),
                ("categories", r.categories.as_slice()),
            ],
            _ => Vec::new(),
        };
        std::iter::once(("tags", self.tags()))
            .chain(lists)
            .find(|(_, entries)| entries.iter().any(|e| e.trim().is_empty()))
            .map(|(field, _)| field)
    }

    /// Names this object refers to, each paired with the family to search.
    ///
    /// Sentinel names are included; callers skip them with
    /// [`Family::is_sentinel`].
    pub fn references(&self) -> Vec<(Family, &str)> {
        fn tagged<'a>(family: Family, names: &'a [String]) -> impl Iterator<Item = (Family, &'a str)> {
            names
                .iter()
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(move |n| (family, n))
        }

        match &self.spec {
            ObjectSpec::AddressGroup(g) => tagged(Family::Address, &g.members).collect(),
            ObjectSpec::ServiceGroup(g) => tagged(Family::Service, &g.members).collect(),
            ObjectSpec::ApplicationGroup(g) => tagged(Family::Application, &g.members).collect(),
            ObjectSpec::SecurityRule(r) => tagged(Family::Address, &r.sources)
                .chain(tagged(Family::Address, &r.destinations))
                .chain(tagged(Family::Service, &r.services))
                .chain(tagged(Family::Application, &r.applications))
                .chain(tagged(Family::UrlCategory, &r.categories))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Tag names assigned to this object.
    pub fn tags(&self) -> &[String] {
        match &self.spec {
            ObjectSpec::Address(a) => &a.tags,
            ObjectSpec::AddressGroup(g) => &g.tags,
            ObjectSpec::Application(a) => &a.tags,
            ObjectSpec::ApplicationFilter(f) => &f.tags,
            ObjectSpec::ApplicationGroup(g) => &g.tags,
            ObjectSpec::SecurityRule(r) => &r.tags,
            _ => &[],
        }
    }

    /// Whether this object carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t.trim() == tag.trim())
    }
}

/// Changes needed to converge one kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub kind: ObjectKind,
    /// Desired objects missing from the live side
    pub to_create: Vec<ConfigObject>,
    /// Live objects missing from the desired side
    pub to_delete: Vec<ConfigObject>,
    /// Names whose duplicate entries were merged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collapsed: Vec<String>,
}

impl ChangeSet {
    pub fn empty(kind: ObjectKind) -> Self {
        Self {
            kind,
            to_create: Vec::new(),
            to_delete: Vec::new(),
            collapsed: Vec::new(),
        }
    }

    /// Check if there are any changes
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }

    /// Pairs of (live, desired) sharing a name, i.e. updates.
    pub fn modified(&self) -> Vec<(&ConfigObject, &ConfigObject)> {
        self.to_delete
            .iter()
            .filter_map(|old| {
                self.to_create
                    .iter()
                    .find(|new| new.name == old.name)
                    .map(|new| (old, new))
            })
            .collect()
    }

    /// Creations that do not replace a live object
    pub fn added(&self) -> Vec<&ConfigObject> {
        self.to_create
            .iter()
            .filter(|new| !self.to_delete.iter().any(|old| old.name == new.name))
            .collect()
    }

    /// Deletions that are not followed by a recreate
    pub fn removed(&self) -> Vec<&ConfigObject> {
        self.to_delete
            .iter()
            .filter(|old| !self.to_create.iter().any(|new| new.name == old.name))
            .collect()
    }
}

/// What an operation does at its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Delete,
}

impl Action {
    /// Progressive verb for batch labels
    pub fn verb(self) -> &'static str {
        match self {
            Action::Create => "Creating",
            Action::Delete => "Deleting",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Delete => f.write_str("delete"),
        }
    }
}

/// One step of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// 1-based position inside the batch
    pub seq: u32,
    pub action: Action,
    pub path: ObjectPath,
    /// Full object for creations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ConfigObject>,
}

impl Operation {
    pub fn create(object: ConfigObject) -> Self {
        Self {
            seq: 0,
            action: Action::Create,
            path: object.path(),
            payload: Some(object),
        }
    }

    pub fn delete(path: ObjectPath) -> Self {
        Self {
            seq: 0,
            action: Action::Delete,
            path,
            payload: None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.seq, self.action, self.path)
    }
}

/// Ordered operations with contiguous 1-based sequence numbers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationList(Vec<Operation>);

impl OperationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation, assigning the next sequence number.
    pub fn push(&mut self, mut op: Operation) {
        op.seq = self.next_seq();
        self.0.push(op);
    }

    /// Append every operation of `other`, renumbering.
    pub fn append(&mut self, other: OperationList) {
        for op in other.0 {
            self.push(op);
        }
    }

    fn next_seq(&self) -> u32 {
        u32::try_from(self.0.len()).map_or(u32::MAX, |n| n.saturating_add(1))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Operation> {
        self.0
    }

    /// Split into batches of consecutive operations sharing an action and
    /// kind, each renumbered from 1. Order is preserved.
    pub fn batches(&self) -> Vec<OperationList> {
        let mut out: Vec<OperationList> = Vec::new();
        let mut current = OperationList::new();
        for op in &self.0 {
            if let Some(last) = current.0.last()
                && (last.action != op.action || last.path.kind != op.path.kind)
            {
                out.push(std::mem::take(&mut current));
            }
            current.push(op.clone());
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// Human label such as "Deleting 3 address groups".
    pub fn label(&self) -> String {
        let Some(first) = self.0.first() else {
            return "Empty batch".to_string();
        };
        let uniform = self
            .0
            .iter()
            .all(|op| op.action == first.action && op.path.kind == first.path.kind);
        if uniform {
            format!(
                "{} {}",
                first.action.verb(),
                first.path.kind.info().count(self.0.len())
            )
        } else if self.0.len() == 1 {
            "Applying 1 operation".to_string()
        } else {
            format!("Applying {} operations", self.0.len())
        }
    }
}

impl From<Vec<Operation>> for OperationList {
    /// Takes operations as given, keeping their sequence numbers.
    fn from(ops: Vec<Operation>) -> Self {
        Self(ops)
    }
}

impl FromIterator<Operation> for OperationList {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut list = OperationList::new();
        for op in iter {
            list.push(op);
        }
        list
    }
}

impl<'a> IntoIterator for &'a OperationList {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::validation(format!(
                        concat!("invalid ", stringify!($ty), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Batch submission mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The device rejects the whole batch if any precondition fails
    Strict,
    /// Each operation is applied independently
    #[default]
    Relaxed,
}

text_enum!(Mode { Strict => "strict", Relaxed => "relaxed" });

/// What to do when a batch submission fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Abort the run and leave locks held
    #[default]
    Hard,
    /// Record the failure and continue
    Soft,
}

text_enum!(FailurePolicy { Hard => "hard", Soft => "soft" });

/// What to do when a copied object already exists at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Skip,
    Overwrite,
}

text_enum!(ConflictPolicy { Skip => "skip", Overwrite => "overwrite" });

/// Where a copied security rule lands in the destination rulebase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RulePosition {
    Top,
    #[default]
    Bottom,
    /// Right above the named rule
    Before(String),
    /// Right below the named rule
    After(String),
}

impl RulePosition {
    /// Rule the position is relative to
    pub fn anchor(&self) -> Option<&str> {
        match self {
            RulePosition::Before(name) | RulePosition::After(name) => Some(name),
            RulePosition::Top | RulePosition::Bottom => None,
        }
    }

    /// Whether placing several rules one by one must go in reverse order to
    /// keep their relative order.
    pub fn stacks_in_reverse(&self) -> bool {
        matches!(self, RulePosition::Top | RulePosition::After(_))
    }
}

impl fmt::Display for RulePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulePosition::Top => f.write_str("top"),
            RulePosition::Bottom => f.write_str("bottom"),
            RulePosition::Before(name) => write!(f, "before:{name}"),
            RulePosition::After(name) => write!(f, "after:{name}"),
        }
    }
}

impl FromStr for RulePosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("top") {
            return Ok(RulePosition::Top);
        }
        if s.eq_ignore_ascii_case("bottom") {
            return Ok(RulePosition::Bottom);
        }
        let invalid = || {
            Error::validation(format!(
                "invalid position '{s}' (expected top, bottom, before:<rule> or after:<rule>)"
            ))
        };
        let (relation, name) = s.split_once(':').ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation(format!("position '{s}' has an empty rule name")));
        }
        match relation.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(RulePosition::Before(name.to_string())),
            "after" => Ok(RulePosition::After(name.to_string())),
            _ => Err(invalid()),
        }
    }
}

/// Device lock type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Config,
    Commit,
}

text_enum!(LockKind { Config => "config", Commit => "commit" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockAction {
    Acquire,
    Release,
}

text_enum!(LockAction { Acquire => "acquire", Release => "release" });

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn address(name: &str, value: &str) -> ConfigObject {
        ConfigObject::new(
            name,
            Scope::Shared,
            ObjectSpec::Address(AddressObject {
                value: value.to_string(),
                ..Default::default()
            }),
        )
        .unwrap()
    }

    pub fn tagged_address(name: &str, value: &str, tags: &[&str]) -> ConfigObject {
        let mut obj = address(name, value);
        if let ObjectSpec::Address(a) = &mut obj.spec {
            a.tags = tags.iter().map(|t| t.to_string()).collect();
        }
        obj
    }

    pub fn address_group(name: &str, members: &[&str]) -> ConfigObject {
        ConfigObject::new(
            name,
            Scope::Shared,
            ObjectSpec::AddressGroup(AddressGroupObject {
                members: members.iter().map(|m| m.to_string()).collect(),
                ..Default::default()
            }),
        )
        .unwrap()
    }

    pub fn service(name: &str, port: &str) -> ConfigObject {
        ConfigObject::new(
            name,
            Scope::Shared,
            ObjectSpec::Service(ServiceObject {
                destination_port: port.to_string(),
                ..Default::default()
            }),
        )
        .unwrap()
    }

    pub fn rule(name: &str, sources: &[&str], services: &[&str], tags: &[&str]) -> ConfigObject {
        let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        ConfigObject::new(
            name,
            Scope::Shared,
            ObjectSpec::SecurityRule(SecurityRuleObject {
                from_zones: vec!["trust".to_string()],
                to_zones: vec!["untrust".to_string()],
                sources: strings(sources),
                destinations: vec!["any".to_string()],
                services: strings(services),
                tags: strings(tags),
                ..Default::default()
            }),
        )
        .unwrap()
    }

    pub fn in_scope(obj: ConfigObject, scope: &Scope) -> ConfigObject {
        obj.with_scope(scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_scope_parse_and_display() {
        let dg: Scope = "device-group:branch".parse().unwrap();
        assert_eq!(dg, Scope::DeviceGroup("branch".to_string()));
        assert_eq!(dg.to_string(), "device-group:branch");
        assert_eq!("SHARED".parse::<Scope>().unwrap(), Scope::Shared);
        assert!("device-group:".parse::<Scope>().is_err());
        assert!("region:eu".parse::<Scope>().is_err());
    }

    #[test]
    fn test_visibility_is_one_directional() {
        let dg = Scope::DeviceGroup("branch".to_string());
        assert!(Scope::Shared.is_visible_from(&dg));
        assert!(!dg.is_visible_from(&Scope::Shared));
        assert!(!dg.is_visible_from(&Scope::Vsys("vsys1".to_string())));
        assert_eq!(dg.ancestors(), vec![Scope::Shared]);
    }

    #[test]
    fn test_object_json_layout() {
        let json = r#"{"name":"web-1","scope":"device-group:dc","kind":"address","value":"10.0.0.1/32"}"#;
        let obj: ConfigObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.kind(), ObjectKind::Address);
        assert_eq!(obj.scope, Scope::DeviceGroup("dc".to_string()));
        assert_eq!(obj.path().to_string(), "device-group:dc/address/web-1");
    }

    #[test]
    fn test_validate_name_rules() {
        let spec = ObjectSpec::Tag(TagObject::default());
        assert!(ConfigObject::new("", Scope::Shared, spec.clone()).is_err());
        assert!(ConfigObject::new(" padded", Scope::Shared, spec.clone()).is_err());
        assert!(ConfigObject::new("x".repeat(64), Scope::Shared, spec.clone()).is_err());
        assert!(ConfigObject::new("x".repeat(63), Scope::Shared, spec).is_ok());
    }

    #[test]
    fn test_validate_required_fields() {
        let empty_group = ObjectSpec::AddressGroup(AddressGroupObject::default());
        assert!(ConfigObject::new("g", Scope::Shared, empty_group).is_err());

        let both = ObjectSpec::AddressGroup(AddressGroupObject {
            members: vec!["a".to_string()],
            filter: Some("'web'".to_string()),
            ..Default::default()
        });
        assert!(ConfigObject::new("g", Scope::Shared, both).is_err());

        let no_port = ObjectSpec::Service(ServiceObject::default());
        assert!(ConfigObject::new("svc", Scope::Shared, no_port).is_err());

        let no_zone = ObjectSpec::SecurityRule(SecurityRuleObject {
            to_zones: vec!["untrust".to_string()],
            ..Default::default()
        });
        assert!(ConfigObject::new("r", Scope::Shared, no_zone).is_err());
    }

    #[test]
    fn test_validate_rejects_blank_list_entries() {
        let err = tagged_address("a", "10.0.0.1", &["web", " "]).validate().unwrap_err();
        assert!(err.to_string().contains("tags has a blank entry"), "{err}");

        let group = ObjectSpec::AddressGroup(AddressGroupObject {
            members: vec!["a".to_string(), String::new()],
            ..Default::default()
        });
        let err = ConfigObject::new("g", Scope::Shared, group).unwrap_err();
        assert!(err.to_string().contains("members has a blank entry"), "{err}");

        let mut blank_source = rule("r", &["web"], &["any"], &[]);
        if let ObjectSpec::SecurityRule(r) = &mut blank_source.spec {
            r.sources.push(String::new());
        }
        let err = blank_source.validate().unwrap_err();
        assert!(err.to_string().contains("sources has a blank entry"), "{err}");

        assert!(tagged_address("a", "10.0.0.1", &[" web "]).validate().is_ok());
    }

    #[test]
    fn test_rule_references_by_family() {
        let rule = rule("allow-web", &["web-servers"], &["svc-https"], &["migrate"]);
        let refs = rule.references();
        assert!(refs.contains(&(Family::Address, "web-servers")));
        assert!(refs.contains(&(Family::Address, "any")));
        assert!(refs.contains(&(Family::Service, "svc-https")));
        assert_eq!(rule.tags(), ["migrate".to_string()]);
        assert!(rule.has_tag("migrate"));
    }

    #[test]
    fn test_normalized_ignores_order_case_and_blanks() {
        let a = tagged_address("a", " 10.0.0.1 ", &["b", "a", ""]);
        let b = tagged_address("a", "10.0.0.1", &["a", "b"]);
        assert_eq!(a.spec.normalized(), b.spec.normalized());
        let described = {
            let mut obj = address("a", "10.0.0.1");
            if let ObjectSpec::Address(x) = &mut obj.spec {
                x.description = Some("  ".to_string());
            }
            obj
        };
        assert_eq!(
            described.spec.normalized(),
            address("a", "10.0.0.1").spec.normalized()
        );
    }

    #[test]
    fn test_operation_list_numbering_and_batches() {
        let mut ops = OperationList::new();
        ops.push(Operation::delete(address("old", "10.0.0.9").path()));
        ops.push(Operation::create(address("a", "10.0.0.1")));
        ops.push(Operation::create(address("b", "10.0.0.2")));
        ops.push(Operation::create(address_group("g", &["a", "b"])));
        let seqs: Vec<u32> = ops.iter().map(|op| op.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);

        let batches = ops.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].label(), "Deleting 1 address");
        assert_eq!(batches[1].label(), "Creating 2 addresses");
        assert_eq!(batches[1].iter().map(|op| op.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(batches[2].label(), "Creating 1 address group");
    }

    #[test]
    fn test_change_set_modified_pairs_updates() {
        let cs = ChangeSet {
            kind: ObjectKind::Address,
            to_create: vec![address("a", "10.0.0.2"), address("new", "10.0.0.3")],
            to_delete: vec![address("a", "10.0.0.1"), address("gone", "10.0.0.4")],
            collapsed: Vec::new(),
        };
        let modified = cs.modified();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].0.name, "a");
        assert_eq!(cs.added().len(), 1);
        assert_eq!(cs.removed()[0].name, "gone");
    }

    #[test]
    fn test_rule_position_parse() {
        assert_eq!("top".parse::<RulePosition>().unwrap(), RulePosition::Top);
        assert_eq!(" Bottom ".parse::<RulePosition>().unwrap(), RulePosition::Bottom);
        let before: RulePosition = "before:deny-all".parse().unwrap();
        assert_eq!(before, RulePosition::Before("deny-all".to_string()));
        assert_eq!(before.anchor(), Some("deny-all"));
        assert_eq!(before.to_string(), "before:deny-all");
        assert_eq!(
            "after: allow-dns".parse::<RulePosition>().unwrap(),
            RulePosition::After("allow-dns".to_string())
        );
        assert!("after:".parse::<RulePosition>().is_err());
        assert!("middle".parse::<RulePosition>().is_err());
        assert!("beside:x".parse::<RulePosition>().is_err());
        assert_eq!(RulePosition::default(), RulePosition::Bottom);
    }

    #[test]
    fn test_text_enums() {
        assert_eq!("STRICT".parse::<Mode>().unwrap(), Mode::Strict);
        assert_eq!(FailurePolicy::Soft.to_string(), "soft");
        assert!("maybe".parse::<ConflictPolicy>().is_err());
    }
}
