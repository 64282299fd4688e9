//! Single-pass URL-query matcher/disambiguator for one routing-table
//! bucket: the structured dispatcher described as "the hard engineering at
//! its center" of the framework. A bucket holds every response declaration
//! registered at one (host, method, path); at request time this module picks
//! at most one of them from the request's raw query items in a single pass.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// How many times a named query item may/must appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Must be present exactly once and parse successfully.
    Required,
    /// May be absent (falls back to a default) or present at most once.
    Optional,
    /// Satisfied by presence alone, or by a value in
    /// `{"", "true", "false", "1", "0"}`.
    Bool,
    /// Presence-only; the value (if any) is ignored.
    Void,
}

type ParseFn = Arc<dyn Fn(&str) -> Result<Box<dyn Any>, String> + Send + Sync>;

/// One named query item a declaration accepts.
#[derive(Clone)]
pub struct QueryItemDescriptor {
    pub name: Arc<str>,
    pub arity: Arity,
    parser: ParseFn,
    default: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for QueryItemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryItemDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl QueryItemDescriptor {
    /// A required item of type `T`, parsed via `FromStr`.
    pub fn required<T>(name: impl Into<Arc<str>>) -> Self
    where
        T: std::str::FromStr + 'static,
        T::Err: fmt::Display,
    {
        Self {
            name: name.into(),
            arity: Arity::Required,
            parser: from_str_parser::<T>(),
            default: None,
        }
    }

    /// An optional item of type `T`, falling back to `default` when absent.
    pub fn optional<T>(name: impl Into<Arc<str>>, default: T) -> Self
    where
        T: std::str::FromStr + Send + Sync + 'static,
        T::Err: fmt::Display,
    {
        Self {
            name: name.into(),
            arity: Arity::Optional,
            parser: from_str_parser::<T>(),
            default: Some(Arc::new(default)),
        }
    }

    /// A boolean flag: present-without-value, or one of the accepted
    /// truthy/falsy spellings.
    pub fn bool_flag(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            arity: Arity::Bool,
            parser: Arc::new(|raw: &str| -> Result<Box<dyn Any>, String> {
                let v: bool = match raw {
                    "" | "true" | "1" => true,
                    "false" | "0" => false,
                    other => return Err(format!("not a recognized boolean: {other:?}")),
                };
                Ok(Box::new(v))
            }),
            default: Some(Arc::new(false)),
        }
    }

    /// A presence-only flag whose value (if any) is discarded.
    pub fn void(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            arity: Arity::Void,
            parser: Arc::new(|_raw: &str| Ok(Box::new(()) as Box<dyn Any>)),
            default: None,
        }
    }
}

fn from_str_parser<T>() -> ParseFn
where
    T: std::str::FromStr + 'static,
    T::Err: fmt::Display,
{
    Arc::new(|raw: &str| -> Result<Box<dyn Any>, String> {
        raw.parse::<T>()
            .map(|v| Box::new(v) as Box<dyn Any>)
            .map_err(|e| e.to_string())
    })
}

/// The query shape of one declaration: either a fixed set of named items, or
/// a single "raw" descriptor that absorbs the whole query verbatim. Per the
/// tie-break policy, a raw declaration never shares a bucket with a
/// named-descriptor declaration.
#[derive(Clone)]
pub enum QuerySpec {
    Named(Vec<QueryItemDescriptor>),
    Raw,
}

impl QuerySpec {
    fn required_names(&self) -> Vec<&Arc<str>> {
        match self {
            QuerySpec::Named(items) => items
                .iter()
                .filter(|d| d.arity == Arity::Required)
                .map(|d| &d.name)
                .collect(),
            QuerySpec::Raw => Vec::new(),
        }
    }

    fn acceptable_names(&self) -> Vec<&Arc<str>> {
        match self {
            QuerySpec::Named(items) => items.iter().map(|d| &d.name).collect(),
            QuerySpec::Raw => Vec::new(),
        }
    }
}

/// A successfully parsed query for one declaration.
pub enum MatchedQuery {
    Named(HashMap<Arc<str>, Box<dyn Any>>),
    Raw(Vec<(String, String)>),
}

impl MatchedQuery {
    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        match self {
            MatchedQuery::Named(values) => values.get(name).and_then(|v| v.downcast_ref::<T>()),
            MatchedQuery::Raw(_) => None,
        }
    }

    pub fn raw_items(&self) -> Option<&[(String, String)]> {
        match self {
            MatchedQuery::Raw(items) => Some(items),
            MatchedQuery::Named(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum MatchOutcome {
    Unique(usize, MatchedQuery),
    NoMatch,
    Ambiguous,
}

impl fmt::Debug for MatchedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedQuery::Named(v) => write!(f, "Named({} values)", v.len()),
            MatchedQuery::Raw(v) => write!(f, "Raw({v:?})"),
        }
    }
}

/// Two declarations are distinguishable iff there is no query item name-set
/// accepted by both. A candidate overlap name-set exists exactly when the
/// union of both required sets fits inside both declarations' acceptable
/// name sets; if it does, a query exists that would satisfy both, which is
/// the ambiguity the spec forbids at start-up.
pub fn distinguishable(a: &QuerySpec, b: &QuerySpec) -> bool {
    match (a, b) {
        (QuerySpec::Raw, QuerySpec::Raw) => false,
        (QuerySpec::Raw, QuerySpec::Named(_)) | (QuerySpec::Named(_), QuerySpec::Raw) => false,
        (QuerySpec::Named(_), QuerySpec::Named(_)) => {
            let req_a = a.required_names();
            let req_b = b.required_names();
            let all_a = a.acceptable_names();
            let all_b = b.acceptable_names();
            let union_req: Vec<&Arc<str>> = req_a.iter().chain(req_b.iter()).copied().collect();
            !union_req
                .iter()
                .all(|n| all_a.contains(n) && all_b.contains(n))
        }
    }
}

struct CandidateState {
    evicted: bool,
    consumed: Vec<bool>,
    values: HashMap<Arc<str>, Box<dyn Any>>,
}

/// Compiled, single-pass dispatcher for one bucket.
#[derive(Clone)]
pub struct QueryMatcher {
    specs: Vec<QuerySpec>,
    /// query-item name -> (declaration id, descriptor index within that
    /// declaration) pairs that mention it.
    name_index: HashMap<Arc<str>, Vec<(usize, usize)>>,
    raw_decl: Option<usize>,
}

impl QueryMatcher {
    /// Compile a bucket's declared query specs into a dispatcher. Returns an
    /// error naming the first pair of indistinguishable declarations found.
    pub fn compile(specs: Vec<QuerySpec>) -> Result<Self, (usize, usize)> {
        for i in 0..specs.len() {
            for j in (i + 1)..specs.len() {
                if !distinguishable(&specs[i], &specs[j]) {
                    return Err((i, j));
                }
            }
        }

        let mut name_index: HashMap<Arc<str>, Vec<(usize, usize)>> = HashMap::new();
        let mut raw_decl = None;
        for (decl_id, spec) in specs.iter().enumerate() {
            match spec {
                QuerySpec::Named(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        name_index
                            .entry(item.name.clone())
                            .or_default()
                            .push((decl_id, idx));
                    }
                }
                QuerySpec::Raw => raw_decl = Some(decl_id),
            }
        }

        Ok(Self {
            specs,
            name_index,
            raw_decl,
        })
    }

    /// Dispatch one request's raw, ordered query items.
    pub fn dispatch(&self, items: &[(String, String)]) -> MatchOutcome {
        if let Some(decl_id) = self.raw_decl {
            return MatchOutcome::Unique(decl_id, MatchedQuery::Raw(items.to_vec()));
        }

        let mut candidates: Vec<CandidateState> = self
            .specs
            .iter()
            .map(|spec| match spec {
                QuerySpec::Named(items) => CandidateState {
                    evicted: false,
                    consumed: vec![false; items.len()],
                    values: HashMap::new(),
                },
                QuerySpec::Raw => CandidateState {
                    evicted: true,
                    consumed: Vec::new(),
                    values: HashMap::new(),
                },
            })
            .collect();

        for (name, raw_value) in items {
            match self.name_index.get(name.as_str()) {
                Some(owners) => {
                    for &(decl_id, desc_idx) in owners {
                        let cand = &mut candidates[decl_id];
                        if cand.evicted {
                            continue;
                        }
                        if cand.consumed[desc_idx] {
                            cand.evicted = true;
                            continue;
                        }
                        let QuerySpec::Named(descs) = &self.specs[decl_id] else {
                            unreachable!("raw declarations are never indexed by name")
                        };
                        match descs[desc_idx].parser.as_ref()(raw_value) {
                            Ok(value) => {
                                cand.consumed[desc_idx] = true;
                                cand.values.insert(descs[desc_idx].name.clone(), value);
                            }
                            Err(_) => cand.evicted = true,
                        }
                    }
                    // Evict every candidate that doesn't own this name at all.
                    for (decl_id, cand) in candidates.iter_mut().enumerate() {
                        if cand.evicted {
                            continue;
                        }
                        if !owners.iter().any(|&(id, _)| id == decl_id) {
                            cand.evicted = true;
                        }
                    }
                }
                None => {
                    for cand in candidates.iter_mut() {
                        cand.evicted = true;
                    }
                }
            }
        }

        let mut winners = Vec::new();
        for (decl_id, cand) in candidates.into_iter().enumerate() {
            if cand.evicted {
                continue;
            }
            let QuerySpec::Named(descs) = &self.specs[decl_id] else {
                continue;
            };
            let satisfied = descs.iter().enumerate().all(|(idx, d)| match d.arity {
                Arity::Required => cand.consumed[idx],
                _ => true,
            });
            if !satisfied {
                continue;
            }
            let mut values = cand.values;
            for (idx, d) in descs.iter().enumerate() {
                if !cand.consumed.get(idx).copied().unwrap_or(false) {
                    if let Some(default) = &d.default {
                        values.insert(d.name.clone(), clone_default(default));
                    }
                }
            }
            winners.push((decl_id, values));
        }

        match winners.len() {
            0 => MatchOutcome::NoMatch,
            1 => {
                let (decl_id, values) = winners.pop().unwrap();
                MatchOutcome::Unique(decl_id, MatchedQuery::Named(values))
            }
            _ => MatchOutcome::Ambiguous,
        }
    }
}

/// Defaults are stored type-erased; cloning requires re-boxing through the
/// concrete type, so we re-derive the same boxed value via `Any::downcast`
/// over the small set of primitive types `optional`/`bool_flag` support.
fn clone_default(default: &Arc<dyn Any + Send + Sync>) -> Box<dyn Any> {
    if let Some(v) = default.downcast_ref::<bool>() {
        return Box::new(*v);
    }
    if let Some(v) = default.downcast_ref::<i64>() {
        return Box::new(*v);
    }
    if let Some(v) = default.downcast_ref::<u64>() {
        return Box::new(*v);
    }
    if let Some(v) = default.downcast_ref::<String>() {
        return Box::new(v.clone());
    }
    if let Some(v) = default.downcast_ref::<f64>() {
        return Box::new(*v);
    }
    panic!("unsupported default type for query descriptor; add a case to clone_default")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unique_match_with_required_field() {
        let spec = QuerySpec::Named(vec![QueryItemDescriptor::required::<i64>("x")]);
        let matcher = QueryMatcher::compile(vec![spec]).unwrap();
        match matcher.dispatch(&items(&[("x", "42")])) {
            MatchOutcome::Unique(0, values) => assert_eq!(values.get::<i64>("x"), Some(&42)),
            other => panic!("expected unique match, got {other:?}"),
        }
    }

    #[test]
    fn bad_parse_is_no_match() {
        let spec = QuerySpec::Named(vec![QueryItemDescriptor::required::<i64>("x")]);
        let matcher = QueryMatcher::compile(vec![spec]).unwrap();
        assert!(matches!(
            matcher.dispatch(&items(&[("x", "abc")])),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn unknown_name_without_raw_is_no_match() {
        let spec = QuerySpec::Named(vec![QueryItemDescriptor::required::<i64>("x")]);
        let matcher = QueryMatcher::compile(vec![spec]).unwrap();
        assert!(matches!(
            matcher.dispatch(&items(&[("x", "1"), ("y", "2")])),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn disjoint_overloads_disambiguate_by_name_set() {
        let from_to = QuerySpec::Named(vec![
            QueryItemDescriptor::required::<u64>("from"),
            QueryItemDescriptor::required::<u64>("to"),
        ]);
        let through_only = QuerySpec::Named(vec![QueryItemDescriptor::required::<u64>("through")]);
        let matcher = QueryMatcher::compile(vec![from_to, through_only]).unwrap();

        assert!(matches!(
            matcher.dispatch(&items(&[("from", "3"), ("to", "7")])),
            MatchOutcome::Unique(0, _)
        ));
        assert!(matches!(
            matcher.dispatch(&items(&[("through", "5")])),
            MatchOutcome::Unique(1, _)
        ));
        assert!(matches!(
            matcher.dispatch(&items(&[])),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn order_of_distinct_names_does_not_affect_outcome() {
        let spec = QuerySpec::Named(vec![
            QueryItemDescriptor::required::<u64>("a"),
            QueryItemDescriptor::required::<u64>("b"),
        ]);
        let matcher = QueryMatcher::compile(vec![spec]).unwrap();
        let a = matcher.dispatch(&items(&[("a", "1"), ("b", "2")]));
        let b = matcher.dispatch(&items(&[("b", "2"), ("a", "1")]));
        assert!(matches!(a, MatchOutcome::Unique(0, _)));
        assert!(matches!(b, MatchOutcome::Unique(0, _)));
    }

    #[test]
    fn identical_required_sets_are_rejected_at_compile_time() {
        let a = QuerySpec::Named(vec![QueryItemDescriptor::required::<u64>("x")]);
        let b = QuerySpec::Named(vec![QueryItemDescriptor::required::<u64>("x")]);
        assert!(QueryMatcher::compile(vec![a, b]).is_err());
    }

    #[test]
    fn raw_descriptor_always_matches_uniquely() {
        let matcher = QueryMatcher::compile(vec![QuerySpec::Raw]).unwrap();
        match matcher.dispatch(&items(&[("anything", "goes")])) {
            MatchOutcome::Unique(0, MatchedQuery::Raw(raw)) => assert_eq!(raw.len(), 1),
            other => panic!("expected raw unique match, got {other:?}"),
        }
    }
}
