//! Resource URL parsing and construction.
//!
//! Every resource is addressed by a self link of the form
//! `{base}/projects/{project}/{scope}/{collection}/{name}` where the scope is
//! empty (global), `zones/{zone}` or `regions/{region}`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("expected a {expected} link, found {found}")]
    WrongCollection { expected: String, found: String },

    #[error("malformed resource link: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Zone(String),
    Region(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLink {
    pub project: String,
    pub scope: Scope,
    pub collection: String,
    pub name: String,
}

impl ResourceLink {
    pub fn zonal(project: &str, zone: &str, collection: &str, name: &str) -> Self {
        Self {
            project: project.into(),
            scope: Scope::Zone(zone.into()),
            collection: collection.into(),
            name: name.into(),
        }
    }

    pub fn global(project: &str, collection: &str, name: &str) -> Self {
        Self {
            project: project.into(),
            scope: Scope::Global,
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Parse a full or partial (`projects/...`) resource URL.
    ///
    /// Top-level zone and region links (`projects/p/zones/z`) parse with a
    /// global scope and `zones`/`regions` as the collection.
    pub fn parse(url: &str) -> Result<Self, LinkError> {
        let malformed = || LinkError::Malformed(url.to_string());

        let path = url.split(['?', '#']).next().unwrap_or(url);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let start = segments
            .iter()
            .rposition(|s| *s == "projects")
            .ok_or_else(malformed)?;
        let rest = &segments[start + 1..];

        match rest {
            [project, scope_kind @ ("zones" | "regions"), scope, collection, name] => {
                let scope = if *scope_kind == "zones" {
                    Scope::Zone(scope.to_string())
                } else {
                    Scope::Region(scope.to_string())
                };
                Ok(Self {
                    project: project.to_string(),
                    scope,
                    collection: collection.to_string(),
                    name: name.to_string(),
                })
            }
            [project, "global", collection, name] | [project, collection, name] => Ok(Self {
                project: project.to_string(),
                scope: Scope::Global,
                collection: collection.to_string(),
                name: name.to_string(),
            }),
            _ => Err(malformed()),
        }
    }

    /// Parse and require a specific collection.
    pub fn parse_in(url: &str, collection: &str) -> Result<Self, LinkError> {
        let link = Self::parse(url)?;
        if link.collection != collection {
            return Err(LinkError::WrongCollection {
                expected: collection.to_string(),
                found: link.collection,
            });
        }
        Ok(link)
    }

    pub fn zone(&self) -> Option<&str> {
        match &self.scope {
            Scope::Zone(z) => Some(z),
            _ => None,
        }
    }

    /// Canonical URL under `base` (e.g. `https://compute.googleapis.com/compute/v1`).
    pub fn to_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self)
    }
}

impl fmt::Display for ResourceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/", self.project)?;
        match &self.scope {
            Scope::Global if matches!(self.collection.as_str(), "zones" | "regions") => {}
            Scope::Global => f.write_str("global/")?,
            Scope::Zone(z) => write!(f, "zones/{z}/")?,
            Scope::Region(r) => write!(f, "regions/{r}/")?,
        }
        write!(f, "{}/{}", self.collection, self.name)
    }
}

/// Last path segment of a resource URL, or the input if it has none.
pub fn resource_name(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://compute.example.test/compute/v1";

    #[test]
    fn test_parse_zonal_link() {
        let link =
            ResourceLink::parse(&format!("{BASE}/projects/p/zones/twilight-a/machineTypes/n1"))
                .unwrap();
        assert_eq!(link.project, "p");
        assert_eq!(link.zone(), Some("twilight-a"));
        assert_eq!(link.collection, "machineTypes");
        assert_eq!(link.name, "n1");
    }

    #[test]
    fn test_parse_global_and_top_level_links() {
        let snap = ResourceLink::parse("projects/p/global/snapshots/s1").unwrap();
        assert_eq!(snap.scope, Scope::Global);
        assert_eq!(snap.to_url(BASE), format!("{BASE}/projects/p/global/snapshots/s1"));

        let region = ResourceLink::parse(&format!("{BASE}/projects/p/regions/danger")).unwrap();
        assert_eq!(region.collection, "regions");
        assert_eq!(region.name, "danger");
        assert_eq!(region.to_url(BASE), format!("{BASE}/projects/p/regions/danger"));
    }

    #[test]
    fn test_parse_errors_are_distinguished() {
        assert_eq!(
            ResourceLink::parse_in("projects/p/zones/z/disks/d", "instances"),
            Err(LinkError::WrongCollection {
                expected: "instances".into(),
                found: "disks".into(),
            })
        );
        assert!(matches!(
            ResourceLink::parse("no-project-here/x"),
            Err(LinkError::Malformed(_))
        ));
        assert!(matches!(
            ResourceLink::parse("projects/p/zones/z/disks/d/extra/segments"),
            Err(LinkError::Malformed(_))
        ));
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(resource_name("projects/p/zones/z/disks/root"), "root");
        assert_eq!(resource_name("plain"), "plain");
    }
}
