//! # Resource Router
//!
//! Maps request paths onto registered resource types.
//!
//! Each resource owns a small `matchit` radix trie with its collection URL
//! (`/api/contacts`) and item URL (`/api/contacts/{id}`). Resources are tried
//! in registration order; the first one that claims the path handles it.

use crate::error::{Error, Result};
use crate::validation::Schema;
use matchit::Router as MatchitRouter;
use std::fmt;

/// URL prefix shared by every collection
pub const API_PREFIX: &str = "/api";

/// HTTP methods seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
    /// Any other method, kept verbatim for error messages
    Other(String),
}

impl Method {
    /// Parse a method token as sent on the wire
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<&hyper::Method> for Method {
    fn from(method: &hyper::Method) -> Self {
        Self::from_token(method.as_str())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
            Self::Other(token) => f.write_str(token),
        }
    }
}

/// A configured kind of record (contact, bookmark)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    /// Singular name used in messages ("contact")
    pub name: String,
    /// Plural name naming the store ("contacts")
    pub collection: String,
    /// Collection URL ("/api/contacts")
    pub path: String,
    /// Required fields for POST and PUT payloads
    pub schema: Schema,
}

impl ResourceType {
    /// Define a resource from its singular name; the plural appends `s`
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        let collection = format!("{name}s");
        Self {
            path: format!("{API_PREFIX}/{collection}"),
            name,
            collection,
            schema,
        }
    }
}

/// What part of a resource a path addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The collection URL itself
    Collection,
    /// A single record by id
    Item(i64),
    /// Under the collection URL, but the remainder is not an integer id
    InvalidId(String),
}

#[derive(Debug, Clone, Copy)]
enum RouteKind {
    Collection,
    Item,
}

/// One registered resource with its compiled URL patterns
#[derive(Clone)]
struct ResourceRoute {
    resource: ResourceType,
    routes: MatchitRouter<RouteKind>,
    item_prefix: String,
}

impl ResourceRoute {
    fn new(resource: ResourceType) -> Result<Self> {
        let item_pattern = format!("{}/{{id}}", resource.path);
        let invalid = |pattern: &str, e: matchit::InsertError| Error::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };

        let mut routes = MatchitRouter::new();
        routes
            .insert(resource.path.as_str(), RouteKind::Collection)
            .map_err(|e| invalid(&resource.path, e))?;
        routes
            .insert(item_pattern.as_str(), RouteKind::Item)
            .map_err(|e| invalid(&item_pattern, e))?;

        Ok(Self {
            item_prefix: format!("{}/", resource.path),
            resource,
            routes,
        })
    }

    fn match_path(&self, path: &str) -> Option<Target> {
        if let Ok(matched) = self.routes.at(path) {
            return Some(match matched.value {
                RouteKind::Collection => Target::Collection,
                RouteKind::Item => parse_id(matched.params.get("id").unwrap_or_default()),
            });
        }

        // "/api/contacts/" or "/api/contacts/1/x": claimed, but no usable id
        path.strip_prefix(&self.item_prefix)
            .map(|rest| Target::InvalidId(rest.to_string()))
    }
}

fn parse_id(raw: &str) -> Target {
    raw.parse::<i64>()
        .map_or_else(|_| Target::InvalidId(raw.to_string()), Target::Item)
}

/// Ordered set of resources served by the API
#[derive(Clone, Default)]
pub struct Registry {
    resources: Vec<ResourceRoute>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field(
                "resources",
                &self.resources.iter().map(|r| &r.resource.path).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource after all previously registered ones
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the resource's URL cannot be
    /// compiled (e.g. its name contains `{`).
    pub fn register(&mut self, resource: ResourceType) -> Result<&mut Self> {
        self.resources.push(ResourceRoute::new(resource)?);
        Ok(self)
    }

    /// Find the first resource claiming `path`
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<(&ResourceType, Target)> {
        self.resources
            .iter()
            .find_map(|route| route.match_path(path).map(|target| (&route.resource, target)))
    }

    /// Registered resources in order
    pub fn resources(&self) -> impl Iterator<Item = &ResourceType> {
        self.resources.iter().map(|r| &r.resource)
    }
}
