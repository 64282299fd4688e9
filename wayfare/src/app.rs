//! Fluent builder over the declarative route tree
//! (`wayfare_core::route::{Group, Declaration}`), so an embedding
//! application doesn't have to hand-construct the core tree types.

use std::path::PathBuf;

use http::Method;
use wayfare_core::{
    http::static_files::{discover_files, StaticFileHandler},
    route::{
        AuthConstraint, Declaration, Endpoint, Group, GroupModifiers, HostSpec, Node, QuerySpec,
        TrailingSlash,
    },
};

/// One node of the tree under construction. Call [`GroupBuilder::finish`]
/// once it's complete, or nest it inside another builder via
/// [`GroupBuilder::group`].
pub struct GroupBuilder<H, IH> {
    modifiers: GroupModifiers<IH>,
    children: Vec<Node<H, IH>>,
}

impl<H, IH> Default for GroupBuilder<H, IH> {
    fn default() -> Self {
        Self {
            modifiers: GroupModifiers::new(),
            children: Vec::new(),
        }
    }
}

impl<H, IH> GroupBuilder<H, IH> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, address: impl Into<String>, port: u16) -> Self {
        self.modifiers.endpoints.push(Endpoint {
            address: address.into(),
            port,
        });
        self
    }

    pub fn host(mut self, host: HostSpec) -> Self {
        self.modifiers.hosts.push(host);
        self
    }

    pub fn prefix(mut self, segment: impl Into<String>) -> Self {
        self.modifiers.path_prefix.push(segment.into());
        self
    }

    pub fn methods(mut self, methods: Vec<Method>) -> Self {
        self.modifiers.methods = Some(methods);
        self
    }

    pub fn auth_required(mut self, realm: impl Into<std::sync::Arc<str>>) -> Self {
        self.modifiers.auth.push(AuthConstraint::Required(realm.into()));
        self
    }

    pub fn body_limit(mut self, bytes: u64) -> Self {
        self.modifiers.body_limit = Some(bytes);
        self
    }

    pub fn incident(mut self, handler: IH) -> Self {
        self.modifiers.incident_handlers.push(handler);
        self
    }

    /// Nest a sub-group; the closure builds it starting from a fresh
    /// [`GroupBuilder`] whose modifiers merge with this one's at flatten
    /// time (`wayfare_core::route::flatten`).
    pub fn group(mut self, build: impl FnOnce(GroupBuilder<H, IH>) -> GroupBuilder<H, IH>) -> Self {
        let nested = build(GroupBuilder::new()).finish();
        self.children.push(Node::Group(nested));
        self
    }

    pub fn route(
        mut self,
        method: Method,
        path: &str,
        query: QuerySpec,
        trailing_slash: TrailingSlash,
        handler: H,
    ) -> Self {
        self.children.push(Node::Declaration(Declaration {
            method,
            path: split_path(path),
            query,
            trailing_slash,
            handler,
        }));
        self
    }

    pub fn get(self, path: &str, handler: H) -> Self {
        self.route(Method::GET, path, QuerySpec::Named(Vec::new()), TrailingSlash::Collapse, handler)
    }

    pub fn get_query(self, path: &str, query: QuerySpec, handler: H) -> Self {
        self.route(Method::GET, path, query, TrailingSlash::Collapse, handler)
    }

    pub fn post(self, path: &str, handler: H) -> Self {
        self.route(Method::POST, path, QuerySpec::Named(Vec::new()), TrailingSlash::Collapse, handler)
    }

    pub fn put(self, path: &str, handler: H) -> Self {
        self.route(Method::PUT, path, QuerySpec::Named(Vec::new()), TrailingSlash::Collapse, handler)
    }

    pub fn delete(self, path: &str, handler: H) -> Self {
        self.route(Method::DELETE, path, QuerySpec::Named(Vec::new()), TrailingSlash::Collapse, handler)
    }

    pub fn patch(self, path: &str, handler: H) -> Self {
        self.route(Method::PATCH, path, QuerySpec::Named(Vec::new()), TrailingSlash::Collapse, handler)
    }

    /// Serve every file discovered under `base_dir` (walked once, here, at
    /// tree-build time) from `prefix`, plus an index-file-fallback
    /// declaration at `prefix` itself and at each subdirectory. The route
    /// table only matches literal path segments (no wildcard routes), so
    /// this registers one `GET` declaration per discovered file/directory
    /// rather than a single catch-all.
    pub fn static_files(
        mut self,
        prefix: &str,
        base_dir: impl Into<PathBuf>,
        index_names: Vec<String>,
    ) -> Self
    where
        H: From<StaticFileHandler>,
    {
        let base_dir = base_dir.into();
        let prefix_segments = split_path(prefix);
        let files = discover_files(&base_dir).unwrap_or_default();

        let mut dirs_registered = std::collections::HashSet::new();
        dirs_registered.insert(Vec::<String>::new());
        self = self.static_entry(&prefix_segments, Vec::new(), &base_dir, &index_names);

        for file in &files {
            self = self.static_entry(&prefix_segments, file.clone(), &base_dir, &index_names);
            for depth in 1..file.len() {
                let dir = file[..depth].to_vec();
                if dirs_registered.insert(dir.clone()) {
                    self = self.static_entry(&prefix_segments, dir, &base_dir, &index_names);
                }
            }
        }
        self
    }

    fn static_entry(
        self,
        prefix_segments: &[String],
        sub_path: Vec<String>,
        base_dir: &std::path::Path,
        index_names: &[String],
    ) -> Self
    where
        H: From<StaticFileHandler>,
    {
        let mut path = prefix_segments.to_vec();
        path.extend(sub_path.iter().cloned());
        let handler = StaticFileHandler::new(base_dir.to_path_buf(), sub_path, index_names.to_vec());
        self.route(
            Method::GET,
            &format!("/{}", path.join("/")),
            QuerySpec::Named(Vec::new()),
            TrailingSlash::Collapse,
            handler.into(),
        )
    }

    pub fn finish(self) -> Group<H, IH> {
        Group::with_children(self.modifiers, self.children)
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_declaration(group: &Group<&'static str, ()>) -> &Declaration<&'static str> {
        match &group.children[..] {
            [Node::Declaration(d)] => d,
            other => panic!("expected exactly one declaration, got {}", other.len()),
        }
    }

    #[test]
    fn get_splits_path_into_segments_and_defaults_to_named_empty_query() {
        let group = GroupBuilder::<&'static str, ()>::new().get("/a/b", "handler").finish();
        let decl = only_declaration(&group);
        assert_eq!(decl.method, Method::GET);
        assert_eq!(decl.path, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(decl.query, QuerySpec::Named(ref items) if items.is_empty()));
    }

    #[test]
    fn post_uses_post_method() {
        let group = GroupBuilder::<&'static str, ()>::new().post("/echo", "handler").finish();
        assert_eq!(only_declaration(&group).method, Method::POST);
    }

    #[test]
    fn nested_group_merges_as_a_child_node() {
        let group = GroupBuilder::<&'static str, ()>::new()
            .prefix("api")
            .group(|g| g.prefix("v1").get("/ping", "pong"))
            .finish();
        assert_eq!(group.modifiers.path_prefix, vec!["api".to_string()]);
        match &group.children[..] {
            [Node::Group(inner)] => {
                assert_eq!(inner.modifiers.path_prefix, vec!["v1".to_string()]);
                assert_eq!(only_declaration(inner).path, vec!["ping".to_string()]);
            }
            other => panic!("expected exactly one nested group, got {}", other.len()),
        }
    }

    #[test]
    fn empty_path_segments_are_dropped() {
        assert_eq!(split_path("//a//b/"), vec!["a".to_string(), "b".to_string()]);
    }

    #[derive(Clone)]
    enum TestHandler {
        Plain(&'static str),
        Static(StaticFileHandler),
    }

    impl From<StaticFileHandler> for TestHandler {
        fn from(h: StaticFileHandler) -> Self {
            TestHandler::Static(h)
        }
    }

    fn declaration_paths(group: &Group<TestHandler, ()>) -> Vec<String> {
        group
            .children
            .iter()
            .map(|child| match child {
                Node::Declaration(d) => format!("/{}", d.path.join("/")),
                Node::Group(_) => panic!("expected only declarations"),
            })
            .collect()
    }

    #[test]
    fn static_files_registers_one_declaration_per_discovered_file_and_directory() {
        let dir = std::env::temp_dir().join(format!("wayfare-app-static-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("a.txt"), b"a").unwrap();
        std::fs::write(dir.join("sub").join("b.txt"), b"b").unwrap();

        let group = GroupBuilder::<TestHandler, ()>::new()
            .static_files("assets", dir, vec!["index.html".to_string()])
            .finish();

        let mut paths = declaration_paths(&group);
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "/assets".to_string(),
                "/assets/a.txt".to_string(),
                "/assets/sub".to_string(),
                "/assets/sub/b.txt".to_string(),
            ]
        );
    }
}
