//! Route table: a per-host trie keyed by normalized path segments, with a
//! per-method bucket of response declarations at each reachable node.

use std::collections::HashMap;

use http::Method;

use super::query::{MatchOutcome, QueryMatcher, QuerySpec};

/// Whether a declaration wants a trailing slash to be a distinguishing
/// marker, or collapsed into the same node as the non-slashed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingSlash {
    #[default]
    Collapse,
    Distinct,
}

/// Percent-decode and split a path into normalized segments. Empty segments
/// collapse; a distinguishing trailing-slash marker is appended only when
/// the declaration that owns this insert asked for it.
pub fn normalize_path(path: &str, trailing: TrailingSlash) -> Vec<String> {
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8_lossy()
        .into_owned();
    let mut segments: Vec<String> = decoded
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if trailing == TrailingSlash::Distinct && decoded.len() > 1 && decoded.ends_with('/') {
        segments.push(String::new());
    }
    segments
}

/// One response declaration registered at a (host, method, path).
#[derive(Clone)]
pub struct DeclEntry<H> {
    pub query: QuerySpec,
    pub handler: H,
}

/// Every declaration sharing one (host, method, path), plus its compiled
/// query matcher.
#[derive(Clone)]
pub struct Bucket<H> {
    entries: Vec<DeclEntry<H>>,
    matcher: Option<QueryMatcher>,
}

#[derive(Debug)]
pub enum BucketDispatchError {
    NoMatch,
    Ambiguous,
}

impl<H> Bucket<H> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            matcher: None,
        }
    }

    fn push(&mut self, entry: DeclEntry<H>) {
        self.entries.push(entry);
    }

    /// Compile this bucket's query matcher. Called once by
    /// [`RouteTable::build`]; returns the conflicting pair of declaration
    /// indices on ambiguity.
    fn build(&mut self) -> Result<(), (usize, usize)> {
        let specs = self.entries.iter().map(|e| e.query.clone()).collect();
        self.matcher = Some(QueryMatcher::compile(specs)?);
        Ok(())
    }

    pub fn dispatch(
        &self,
        items: &[(String, String)],
    ) -> Result<(&H, super::query::MatchedQuery), BucketDispatchError> {
        let matcher = self
            .matcher
            .as_ref()
            .expect("bucket dispatched before RouteTable::build");
        match matcher.dispatch(items) {
            MatchOutcome::Unique(id, values) => Ok((&self.entries[id].handler, values)),
            MatchOutcome::NoMatch => Err(BucketDispatchError::NoMatch),
            MatchOutcome::Ambiguous => Err(BucketDispatchError::Ambiguous),
        }
    }

}

#[derive(Default, Clone)]
struct PathNode<H> {
    children: HashMap<String, PathNode<H>>,
    buckets: HashMap<Method, Bucket<H>>,
}

impl<H> PathNode<H> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    fn insert(&mut self, segments: &[String], method: Method, entry: DeclEntry<H>) {
        match segments.split_first() {
            Some((head, rest)) => self
                .children
                .entry(head.clone())
                .or_insert_with(PathNode::new)
                .insert(rest, method, entry),
            None => self
                .buckets
                .entry(method)
                .or_insert_with(Bucket::new)
                .push(entry),
        }
    }

    fn find(&self, segments: &[String]) -> Option<&PathNode<H>> {
        match segments.split_first() {
            Some((head, rest)) => self.children.get(head).and_then(|c| c.find(rest)),
            None => Some(self),
        }
    }

    fn find_mut(&mut self, segments: &[String]) -> Option<&mut PathNode<H>> {
        match segments.split_first() {
            Some((head, rest)) => self.children.get_mut(head).and_then(|c| c.find_mut(rest)),
            None => Some(self),
        }
    }

    fn build_all(&mut self) -> Result<(), (usize, usize)> {
        for bucket in self.buckets.values_mut() {
            bucket.build()?;
        }
        for child in self.children.values_mut() {
            child.build_all()?;
        }
        Ok(())
    }
}

/// How a host is matched to this route table's per-host tries.
#[derive(Debug, Clone)]
pub enum HostSpec {
    Exact(String),
    /// `base` with an optional subdomain prefix, e.g. `base = "example.com"`,
    /// `prefix = "www"` matches both `example.com` and `www.example.com`.
    Wildcard { base: String, prefix: String },
    Any,
}

#[derive(Clone)]
struct HostTries<H> {
    exact: HashMap<String, PathNode<H>>,
    wildcards: Vec<(HostSpec, PathNode<H>)>,
    any: Option<PathNode<H>>,
}

impl<H> HostTries<H> {
    fn new() -> Self {
        Self {
            exact: HashMap::new(),
            wildcards: Vec::new(),
            any: None,
        }
    }
}

/// Result of looking a request up in the route table.
pub enum Lookup<'a, H> {
    /// Found a bucket directly serving `method`.
    Found {
        bucket: &'a Bucket<H>,
        automatic_head: bool,
    },
    /// The node exists but has no bucket for `method` (nor a GET bucket to
    /// fall back to for HEAD).
    MethodNotAllowed(Vec<Method>),
    /// `OPTIONS` was requested, no declaration answers it directly, and the
    /// node exists: answer automatically with the node's method set.
    AutomaticOptions(Vec<Method>),
    /// No node reachable for this (host, path) at all.
    NotFound,
}

/// Map from endpoint to per-host path tries, keyed by (host, method, path).
/// Built incrementally via [`RouteTable::insert`] while *configuring*;
/// [`RouteTable::build`] compiles every bucket's query matcher and the table
/// becomes read-only for the server's *running* lifetime.
#[derive(Clone)]
pub struct RouteTable<H> {
    hosts: HostTries<H>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self {
            hosts: HostTries::new(),
        }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        host: HostSpec,
        method: Method,
        segments: Vec<String>,
        entry: DeclEntry<H>,
    ) {
        let node = match &host {
            HostSpec::Exact(name) => self
                .hosts
                .exact
                .entry(name.clone())
                .or_insert_with(PathNode::new),
            HostSpec::Any => self.hosts.any.get_or_insert_with(PathNode::new),
            HostSpec::Wildcard { .. } => {
                if let Some(idx) = self
                    .hosts
                    .wildcards
                    .iter()
                    .position(|(existing, _)| host_spec_eq(existing, &host))
                {
                    &mut self.hosts.wildcards[idx].1
                } else {
                    self.hosts.wildcards.push((host.clone(), PathNode::new()));
                    &mut self.hosts.wildcards.last_mut().unwrap().1
                }
            }
        };
        node.insert(&segments, method, entry);
    }

    /// Compile every bucket's query matcher. Must be called exactly once,
    /// after all inserts and before serving traffic.
    pub fn build(&mut self) -> Result<(), (usize, usize)> {
        for node in self.hosts.exact.values_mut() {
            node.build_all()?;
        }
        for (_, node) in self.hosts.wildcards.iter_mut() {
            node.build_all()?;
        }
        if let Some(node) = self.hosts.any.as_mut() {
            node.build_all()?;
        }
        Ok(())
    }

    fn find_host_node(&self, host: &str) -> Option<&PathNode<H>> {
        if let Some(node) = self.hosts.exact.get(host) {
            return Some(node);
        }
        for (spec, node) in &self.hosts.wildcards {
            if let HostSpec::Wildcard { base, prefix } = spec {
                if host == base || host == format!("{prefix}.{base}") {
                    return Some(node);
                }
            }
        }
        self.hosts.any.as_ref()
    }

    pub fn lookup(&self, host: &str, method: &Method, path: &str) -> Lookup<'_, H> {
        let Some(host_node) = self.find_host_node(host) else {
            return Lookup::NotFound;
        };
        // A declaration may have been inserted under either normalization
        // (`TrailingSlash::Collapse` or `::Distinct`, chosen per declaration
        // at insert time — see `group::normalize_segments`), and a lookup has
        // no way to know in advance which one produced the node it's after.
        // Try the collapsed form first since it's the common case; only fall
        // back to the distinct form (which only differs when `path` itself
        // ends in `/`) if that misses.
        let collapsed = normalize_path(path, TrailingSlash::Collapse);
        let distinct = normalize_path(path, TrailingSlash::Distinct);
        let node = host_node.find(&collapsed).or_else(|| {
            if distinct != collapsed {
                host_node.find(&distinct)
            } else {
                None
            }
        });
        let Some(node) = node else {
            return Lookup::NotFound;
        };

        if let Some(bucket) = node.buckets.get(method) {
            return Lookup::Found {
                bucket,
                automatic_head: false,
            };
        }

        if method == Method::HEAD {
            if let Some(bucket) = node.buckets.get(&Method::GET) {
                return Lookup::Found {
                    bucket,
                    automatic_head: true,
                };
            }
        }

        if node.buckets.is_empty() {
            return Lookup::NotFound;
        }

        if method == Method::OPTIONS {
            return Lookup::AutomaticOptions(node.buckets.keys().cloned().collect());
        }

        Lookup::MethodNotAllowed(node.buckets.keys().cloned().collect())
    }

    /// Exposed for the declaration flattener, which needs to find an
    /// already-inserted node to merge the cross-product of a later
    /// declaration into (e.g. OPTIONS auto-answering shares a node's bucket
    /// set, it doesn't need its own entry).
    pub fn find_mut(
        &mut self,
        host: &HostSpec,
        segments: &[String],
    ) -> Option<&mut PathNode<H>> {
        let node = match host {
            HostSpec::Exact(name) => self.hosts.exact.get_mut(name)?,
            HostSpec::Any => self.hosts.any.as_mut()?,
            HostSpec::Wildcard { .. } => {
                let idx = self
                    .hosts
                    .wildcards
                    .iter()
                    .position(|(existing, _)| host_spec_eq(existing, host))?;
                &mut self.hosts.wildcards[idx].1
            }
        };
        node.find_mut(segments)
    }
}

fn host_spec_eq(a: &HostSpec, b: &HostSpec) -> bool {
    matches!(
        (a, b),
        (HostSpec::Wildcard { base: ba, prefix: pa }, HostSpec::Wildcard { base: bb, prefix: pb })
        if ba == bb && pa == pb
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::query::QuerySpec;

    fn entry(handler: &'static str) -> DeclEntry<&'static str> {
        DeclEntry {
            query: QuerySpec::Named(Vec::new()),
            handler,
        }
    }

    #[test]
    fn exact_host_lookup_after_build() {
        let mut table = RouteTable::new();
        table.insert(
            HostSpec::Exact("example.com".into()),
            Method::GET,
            vec!["hello".into()],
            entry("hello-handler"),
        );
        table.build().unwrap();

        match table.lookup("example.com", &Method::GET, "/hello") {
            Lookup::Found { bucket, automatic_head } => {
                assert!(!automatic_head);
                assert!(bucket.dispatch(&[]).is_ok());
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn head_falls_back_to_get_with_automatic_head() {
        let mut table = RouteTable::new();
        table.insert(
            HostSpec::Any,
            Method::GET,
            vec!["only-get".into()],
            entry("get-handler"),
        );
        table.build().unwrap();

        match table.lookup("any-host", &Method::HEAD, "/only-get") {
            Lookup::Found { automatic_head, .. } => assert!(automatic_head),
            _ => panic!("expected HEAD to fall back to GET"),
        }
    }

    #[test]
    fn unmatched_method_is_method_not_allowed_with_allow_list() {
        let mut table = RouteTable::new();
        table.insert(
            HostSpec::Any,
            Method::POST,
            vec!["only-post".into()],
            entry("post-handler"),
        );
        table.build().unwrap();

        match table.lookup("any-host", &Method::GET, "/only-post") {
            Lookup::MethodNotAllowed(methods) => assert_eq!(methods, vec![Method::POST]),
            _ => panic!("expected 405"),
        }
    }

    #[test]
    fn missing_path_is_not_found() {
        let mut table: RouteTable<&'static str> = RouteTable::new();
        table.build().unwrap();
        assert!(matches!(
            table.lookup("any-host", &Method::GET, "/nope"),
            Lookup::NotFound
        ));
    }

    #[test]
    fn distinct_trailing_slash_declaration_is_reachable() {
        let mut table = RouteTable::new();
        table.insert(
            HostSpec::Any,
            Method::GET,
            normalize_path("dir/", TrailingSlash::Distinct),
            entry("dir-index"),
        );
        table.build().unwrap();

        assert!(matches!(
            table.lookup("any-host", &Method::GET, "/dir/"),
            Lookup::Found { .. }
        ));
        assert!(matches!(
            table.lookup("any-host", &Method::GET, "/dir"),
            Lookup::NotFound
        ));
    }

    #[test]
    fn www_wildcard_matches_both_bare_and_prefixed_host() {
        let mut table = RouteTable::new();
        table.insert(
            HostSpec::Wildcard {
                base: "example.com".into(),
                prefix: "www".into(),
            },
            Method::GET,
            vec![],
            entry("root"),
        );
        table.build().unwrap();

        assert!(matches!(
            table.lookup("example.com", &Method::GET, "/"),
            Lookup::Found { .. }
        ));
        assert!(matches!(
            table.lookup("www.example.com", &Method::GET, "/"),
            Lookup::Found { .. }
        ));
    }
}
