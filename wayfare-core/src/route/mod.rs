//! Declarative routing: the compositional `Group`/`Declaration` tree and its
//! flattener (§4.3), the per-endpoint route table trie (§4.2), and the
//! single-pass URL-query matcher (§4.1).

pub mod group;
pub mod query;
pub mod trie;

pub use group::{
    flatten, AuthConstraint, Declaration, Endpoint, FlattenError, Group, GroupContext,
    GroupModifiers, Node, Resolved, Tables,
};
pub use query::{Arity, MatchOutcome, MatchedQuery, QueryItemDescriptor, QueryMatcher, QuerySpec};
pub use trie::{Bucket, BucketDispatchError, HostSpec, Lookup, RouteTable, TrailingSlash};
