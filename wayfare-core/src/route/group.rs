//! Declaration flattener (spec §4.3): walks the user's nested tree of
//! [`Group`]s and [`Declaration`]s, threading an accumulated [`GroupContext`]
//! down the tree, and emits one [`trie::RouteTable`] insert per declaration
//! for the full cross-product of (endpoint × host × method) its resolved
//! context implies.

use std::{collections::HashMap, fmt, hash::Hash};

use http::Method;

use super::{
    query::QuerySpec,
    trie::{DeclEntry, HostSpec, RouteTable, TrailingSlash},
};

/// A bound transport endpoint: address (literal or a host name to resolve)
/// and port. `0.0.0.0`/`::` are permitted and resolved by the transport
/// layer, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// A user-auth constraint contributed by a group. The core only threads
/// this through to the resolved context; enforcing it is the handler's (or
/// an incident handler's) job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConstraint {
    None,
    Required(std::sync::Arc<str>),
}

/// Per-group modifiers, as the user declares them on one [`Group`] node
/// (before merging with ancestors).
#[derive(Clone)]
pub struct GroupModifiers<IH> {
    pub endpoints: Vec<Endpoint>,
    pub hosts: Vec<HostSpec>,
    pub path_prefix: Vec<String>,
    pub methods: Option<Vec<Method>>,
    pub auth: Vec<AuthConstraint>,
    pub body_limit: Option<u64>,
    pub incident_handlers: Vec<IH>,
}

impl<IH> Default for GroupModifiers<IH> {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            hosts: Vec::new(),
            path_prefix: Vec::new(),
            methods: None,
            auth: Vec::new(),
            body_limit: None,
            incident_handlers: Vec::new(),
        }
    }
}

impl<IH> GroupModifiers<IH> {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The accumulated group context of one declaration: its fully-resolved
/// snapshot of every enclosing group's modifiers (spec §3 "Group context").
#[derive(Clone)]
pub struct GroupContext<IH> {
    pub endpoints: Vec<Endpoint>,
    pub hosts: Vec<HostSpec>,
    pub path_prefix: Vec<String>,
    pub methods: Option<Vec<Method>>,
    pub auth: Vec<AuthConstraint>,
    pub body_limit: Option<u64>,
    /// Innermost first, per the incident dispatcher's walk order (§4.6).
    pub incident_handlers: Vec<IH>,
}

impl<IH> GroupContext<IH> {
    fn root() -> Self {
        Self {
            endpoints: Vec::new(),
            hosts: Vec::new(),
            path_prefix: Vec::new(),
            methods: None,
            auth: Vec::new(),
            body_limit: None,
            incident_handlers: Vec::new(),
        }
    }
}

impl<IH: Clone> GroupContext<IH> {
    /// Child context = parent merged with child's modifiers, per §4.3's
    /// merge rules: path prefixes concatenate, method sets intersect, host
    /// sets are overridden by a non-empty child set, body-length-limit takes
    /// the innermost value, incident handlers stack innermost-first.
    fn merge(&self, child: &GroupModifiers<IH>) -> Result<Self, FlattenError> {
        let methods = match (&self.methods, &child.methods) {
            (None, None) => None,
            (Some(m), None) | (None, Some(m)) => Some(m.clone()),
            (Some(parent), Some(child)) => {
                let intersection: Vec<Method> =
                    parent.iter().filter(|m| child.contains(m)).cloned().collect();
                if intersection.is_empty() {
                    return Err(FlattenError::EmptyMethodIntersection);
                }
                Some(intersection)
            }
        };

        let mut path_prefix = self.path_prefix.clone();
        path_prefix.extend(child.path_prefix.iter().cloned());

        let hosts = if child.hosts.is_empty() {
            self.hosts.clone()
        } else {
            child.hosts.clone()
        };

        let auth = if child.auth.is_empty() {
            self.auth.clone()
        } else {
            child.auth.clone()
        };

        let mut endpoints = self.endpoints.clone();
        endpoints.extend(child.endpoints.iter().cloned());

        let body_limit = child.body_limit.or(self.body_limit);

        let mut incident_handlers = child.incident_handlers.clone();
        incident_handlers.extend(self.incident_handlers.iter().cloned());

        Ok(Self {
            endpoints,
            hosts,
            path_prefix,
            methods,
            auth,
            body_limit,
            incident_handlers,
        })
    }
}

/// A terminal response declaration: the leaf of a [`Group`] tree.
pub struct Declaration<H> {
    pub method: Method,
    pub path: Vec<String>,
    pub query: QuerySpec,
    pub trailing_slash: TrailingSlash,
    pub handler: H,
}

pub enum Node<H, IH> {
    Group(Group<H, IH>),
    Declaration(Declaration<H>),
}

/// One node of the user-authored declarative tree: its own modifiers plus a
/// list of already-constructed children (groups or declarations).
pub struct Group<H, IH> {
    pub modifiers: GroupModifiers<IH>,
    pub children: Vec<Node<H, IH>>,
}

impl<H, IH> Group<H, IH> {
    pub fn new(modifiers: GroupModifiers<IH>) -> Self {
        Self {
            modifiers,
            children: Vec::new(),
        }
    }

    pub fn with_children(modifiers: GroupModifiers<IH>, children: Vec<Node<H, IH>>) -> Self {
        Self { modifiers, children }
    }
}

#[derive(Debug)]
pub enum FlattenError {
    EmptyMethodIntersection,
    UnreachableDeclaration { method: Method, path: String },
    AmbiguousBucket,
}

impl fmt::Display for FlattenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlattenError::EmptyMethodIntersection => {
                write!(f, "a nested group narrows the method set to nothing")
            }
            FlattenError::UnreachableDeclaration { method, path } => write!(
                f,
                "declaration {method} {path} is unreachable: its method is excluded by an \
                 enclosing group's method set"
            ),
            FlattenError::AmbiguousBucket => {
                write!(f, "two declarations at the same (host, method, path) are not distinguishable")
            }
        }
    }
}

impl std::error::Error for FlattenError {}

/// A declaration paired with the fully-resolved context of every group that
/// encloses it. This is what ends up stored in the route table's bucket.
#[derive(Clone)]
pub struct Resolved<H, IH> {
    pub handler: H,
    pub context: GroupContext<IH>,
}

/// Per-endpoint route tables, the flattener's output.
pub struct Tables<H, IH> {
    pub by_endpoint: HashMap<Endpoint, RouteTable<Resolved<H, IH>>>,
}

impl<H, IH> Default for Tables<H, IH> {
    fn default() -> Self {
        Self {
            by_endpoint: HashMap::new(),
        }
    }
}

/// Flatten a user-described tree into per-endpoint route tables. Does not
/// call [`RouteTable::build`] — the caller does that once, after flattening
/// every top-level group, to catch bucket ambiguity across the whole tree.
pub fn flatten<H, IH>(root: Group<H, IH>, tables: &mut Tables<H, IH>) -> Result<(), FlattenError>
where
    H: Clone,
    IH: Clone,
{
    walk(root, GroupContext::root(), tables)
}

fn walk<H, IH>(
    group: Group<H, IH>,
    parent: GroupContext<IH>,
    tables: &mut Tables<H, IH>,
) -> Result<(), FlattenError>
where
    H: Clone,
    IH: Clone,
{
    let context = parent.merge(&group.modifiers)?;
    for child in group.children {
        match child {
            Node::Group(g) => walk(g, context.clone(), tables)?,
            Node::Declaration(decl) => insert_declaration(decl, &context, tables)?,
        }
    }
    Ok(())
}

fn insert_declaration<H, IH>(
    decl: Declaration<H>,
    context: &GroupContext<IH>,
    tables: &mut Tables<H, IH>,
) -> Result<(), FlattenError>
where
    H: Clone,
    IH: Clone,
{
    if let Some(methods) = &context.methods {
        if !methods.contains(&decl.method) {
            return Err(FlattenError::UnreachableDeclaration {
                method: decl.method.clone(),
                path: format!("/{}", decl.path.join("/")),
            });
        }
    }

    let mut full_path = context.path_prefix.clone();
    full_path.extend(decl.path.iter().cloned());
    let segments = normalize_segments(&full_path, decl.trailing_slash);

    let hosts: Vec<HostSpec> = if context.hosts.is_empty() {
        vec![HostSpec::Any]
    } else {
        context.hosts.clone()
    };
    let endpoints = if context.endpoints.is_empty() {
        vec![Endpoint {
            address: "0.0.0.0".into(),
            port: 80,
        }]
    } else {
        context.endpoints.clone()
    };

    let resolved = Resolved {
        handler: decl.handler.clone(),
        context: context.clone(),
    };

    for endpoint in &endpoints {
        let table = tables.by_endpoint.entry(endpoint.clone()).or_default();
        for host in &hosts {
            table.insert(
                host.clone(),
                decl.method.clone(),
                segments.clone(),
                DeclEntry {
                    query: decl.query.clone(),
                    handler: resolved.clone(),
                },
            );
        }
    }
    Ok(())
}

fn normalize_segments(full_path: &[String], trailing: TrailingSlash) -> Vec<String> {
    let mut segments: Vec<String> = full_path
        .iter()
        .flat_map(|seg| seg.split('/'))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if trailing == TrailingSlash::Distinct
        && full_path.last().map(|s| s.ends_with('/')).unwrap_or(false)
    {
        segments.push(String::new());
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{query::QuerySpec, trie::Lookup};

    fn decl(method: Method, path: &str, handler: &'static str) -> Node<&'static str, ()> {
        Node::Declaration(Declaration {
            method,
            path: path.split('/').filter(|s| !s.is_empty()).map(String::from).collect(),
            query: QuerySpec::Named(Vec::new()),
            trailing_slash: TrailingSlash::Collapse,
            handler,
        })
    }

    #[test]
    fn nested_groups_concatenate_path_prefixes() {
        let inner = Group::with_children(
            GroupModifiers {
                path_prefix: vec!["v1".into()],
                ..Default::default()
            },
            vec![decl(Method::GET, "/ping", "pong")],
        );
        let root = Group::with_children(
            GroupModifiers {
                path_prefix: vec!["api".into()],
                ..Default::default()
            },
            vec![Node::Group(inner)],
        );

        let mut tables = Tables::default();
        flatten(root, &mut tables).unwrap();
        let table = tables
            .by_endpoint
            .get(&Endpoint {
                address: "0.0.0.0".into(),
                port: 80,
            })
            .unwrap();
        match table.lookup("any-host", &Method::GET, "/api/v1/ping") {
            Lookup::Found { .. } => {}
            _ => panic!("expected concatenated path to be reachable"),
        }
    }

    #[test]
    fn narrowing_method_set_to_empty_is_an_error() {
        let inner = Group::with_children(
            GroupModifiers {
                methods: Some(vec![Method::POST]),
                ..Default::default()
            },
            vec![decl(Method::POST, "/x", "h")],
        );
        let root = Group::with_children(
            GroupModifiers {
                methods: Some(vec![Method::GET]),
                ..Default::default()
            },
            vec![Node::Group(inner)],
        );
        let mut tables = Tables::default();
        assert!(matches!(
            flatten(root, &mut tables),
            Err(FlattenError::EmptyMethodIntersection)
        ));
    }

    #[test]
    fn declaration_outside_group_method_set_is_unreachable() {
        let root = Group::with_children(
            GroupModifiers {
                methods: Some(vec![Method::GET]),
                ..Default::default()
            },
            vec![decl(Method::POST, "/x", "h")],
        );
        let mut tables = Tables::default();
        assert!(matches!(
            flatten(root, &mut tables),
            Err(FlattenError::UnreachableDeclaration { .. })
        ));
    }
}
