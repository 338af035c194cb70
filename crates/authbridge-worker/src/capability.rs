//! Capability namespace, allowlist and resolver.
//!
//! The capability library is a tree of named members addressed by dotted
//! paths (`ed25519.sign`). Only names present *verbatim* in the
//! [`Allowlist`] can be resolved: allowing `ed25519.sign` does not allow
//! `ed25519`, nor any other member below it.
//!
//! At startup every allowlisted name is resolved once into a
//! [`CapabilityTable`], so a misconfigured path fails the process before it
//! accepts any input instead of failing each request.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use authbridge_protocol::Value;
use thiserror::Error;

/// A capability failed while running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InvocationError {
    pub message: String,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Boxed future produced by an asynchronous capability.
pub type InvocationFuture =
    Pin<Box<dyn Future<Output = Result<Value, InvocationError>> + Send + 'static>>;

/// Outcome of invoking a capability: either already settled or pending.
pub enum Invocation {
    Ready(Result<Value, InvocationError>),
    Pending(InvocationFuture),
}

impl Invocation {
    /// Wrap a future as a pending invocation.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, InvocationError>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    /// Wait for the result. Ready results return without yielding.
    pub async fn settle(self) -> Result<Value, InvocationError> {
        match self {
            Self::Ready(result) => result,
            Self::Pending(future) => future.await,
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// An invocable member of the capability namespace.
pub trait Capability: Send + Sync {
    /// Invoke with positional arguments.
    fn invoke(&self, args: Vec<Value>) -> Invocation;
}

impl fmt::Debug for dyn Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(..)")
    }
}

impl<F> Capability for F
where
    F: Fn(Vec<Value>) -> Invocation + Send + Sync,
{
    fn invoke(&self, args: Vec<Value>) -> Invocation {
        self(args)
    }
}

/// A node in the capability namespace.
#[derive(Clone)]
pub enum Member {
    /// Nested namespace (`secp256k1` in `secp256k1.sign`).
    Namespace(Namespace),
    /// Invocable capability.
    Function(Arc<dyn Capability>),
    /// Plain data; present but not invocable.
    Constant(Value),
}

impl Member {
    /// A synchronous capability.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(move |args: Vec<Value>| Invocation::Ready(f(args))))
    }

    /// A capability that returns a future.
    pub fn async_function<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvocationError>> + Send + 'static,
    {
        Self::Function(Arc::new(move |args: Vec<Value>| Invocation::pending(f(args))))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "namespace",
            Self::Function(_) => "function",
            Self::Constant(value) => value.kind(),
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(ns) => f.debug_tuple("Namespace").field(ns).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
        }
    }
}

/// A tree of named capabilities.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    members: BTreeMap<String, Member>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, member: Member) -> Self {
        self.insert(name, member);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, member: Member) {
        self.members.insert(name.into(), member);
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Dotted paths of every invocable member, depth-first.
    pub fn function_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, member) in &self.members {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            match member {
                Member::Namespace(ns) => ns.collect_paths(&path, out),
                Member::Function(_) => out.push(path),
                Member::Constant(_) => {}
            }
        }
    }
}

/// Immutable set of exact dotted names that may be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    names: BTreeSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact membership; prefixes never match.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("capability not allowed: {0}")]
    NotAllowed(String),

    #[error("capability not found: {name} (no member '{segment}')")]
    NotFound { name: String, segment: String },

    #[error("capability is not a function: {name} (found {kind})")]
    NotCallable { name: String, kind: &'static str },
}

/// Maps allowlisted dotted names to callables in a namespace.
///
/// Resolution is read-only and can run concurrently.
#[derive(Debug, Clone)]
pub struct Resolver {
    namespace: Arc<Namespace>,
    allowlist: Allowlist,
}

impl Resolver {
    pub fn new(namespace: Arc<Namespace>, allowlist: Allowlist) -> Self {
        Self {
            namespace,
            allowlist,
        }
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Resolve `name` to a callable.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>, ResolveError> {
        if !self.allowlist.contains(name) {
            return Err(ResolveError::NotAllowed(name.to_string()));
        }

        let mut current = self.namespace.as_ref();
        let mut segments = name.split('.').peekable();
        while let Some(segment) = segments.next() {
            let member = current.get(segment).ok_or_else(|| ResolveError::NotFound {
                name: name.to_string(),
                segment: segment.to_string(),
            })?;

            if segments.peek().is_none() {
                return match member {
                    Member::Function(capability) => Ok(Arc::clone(capability)),
                    other => Err(ResolveError::NotCallable {
                        name: name.to_string(),
                        kind: other.kind(),
                    }),
                };
            }

            current = match member {
                Member::Namespace(ns) => ns,
                // Only namespaces have children.
                _ => {
                    return Err(ResolveError::NotFound {
                        name: name.to_string(),
                        segment: segments.next().unwrap_or_default().to_string(),
                    })
                }
            };
        }

        // `split` always yields at least one segment.
        Err(ResolveError::NotFound {
            name: name.to_string(),
            segment: String::new(),
        })
    }
}

/// Allowlisted names bound to their capabilities at startup.
pub struct CapabilityTable {
    allowlist: Allowlist,
    entries: HashMap<String, Result<Arc<dyn Capability>, ResolveError>>,
}

impl CapabilityTable {
    /// Resolve every allowlisted name.
    ///
    /// With `strict`, the first unresolvable name is returned as an error.
    /// Otherwise the failure is logged and replayed to every request for
    /// that name.
    pub fn bind(resolver: &Resolver, strict: bool) -> Result<Self, ResolveError> {
        let mut entries = HashMap::with_capacity(resolver.allowlist().len());
        for name in resolver.allowlist().iter() {
            let resolved = resolver.resolve(name);
            if let Err(e) = &resolved {
                if strict {
                    return Err(e.clone());
                }
                tracing::warn!(capability = name, error = %e, "allowlisted capability is unavailable");
            }
            entries.insert(name.to_string(), resolved);
        }

        Ok(Self {
            allowlist: resolver.allowlist().clone(),
            entries,
        })
    }

    /// Look up a bound capability.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Capability>, ResolveError> {
        match self.entries.get(name) {
            Some(Ok(capability)) => Ok(Arc::clone(capability)),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ResolveError::NotAllowed(name.to_string())),
        }
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Names that resolved successfully, sorted.
    pub fn bound_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_ok())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("allowlist", &self.allowlist)
            .field("bound", &self.bound_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Member {
        Member::function(|args| Ok(Value::Array(args)))
    }

    fn fake_namespace() -> Arc<Namespace> {
        let secp = Namespace::new()
            .with("derivePublicKeyCompressed", echo())
            .with("derivePublicKeyUncompressed", echo())
            .with("internal", Member::Namespace(Namespace::new().with("leak", echo())));
        Arc::new(
            Namespace::new()
                .with("hexToBin", echo())
                .with("secp256k1", Member::Namespace(secp))
                .with("version", Member::Constant(Value::from("1.0"))),
        )
    }

    fn resolver(allowed: &[&str]) -> Resolver {
        Resolver::new(fake_namespace(), Allowlist::new(allowed.iter().copied()))
    }

    #[test]
    fn test_resolves_nested_path() {
        let r = resolver(&["secp256k1.derivePublicKeyCompressed"]);
        let cap = r.resolve("secp256k1.derivePublicKeyCompressed").unwrap();
        let out = cap.invoke(vec![Value::Bool(true)]);
        assert!(matches!(out, Invocation::Ready(Ok(Value::Array(_)))));
    }

    #[test]
    fn test_prefix_of_allowed_name_is_not_allowed() {
        let r = resolver(&["secp256k1.derivePublicKeyCompressed"]);
        assert_eq!(
            r.resolve("secp256k1").unwrap_err(),
            ResolveError::NotAllowed("secp256k1".to_string())
        );
    }

    #[test]
    fn test_child_of_allowed_namespace_is_not_allowed() {
        let r = resolver(&["secp256k1"]);
        assert!(matches!(
            r.resolve("secp256k1.internal.leak"),
            Err(ResolveError::NotAllowed(_))
        ));
    }

    #[test]
    fn test_missing_segment_is_not_found() {
        let r = resolver(&["secp256k1.sign", "nope.deeper"]);
        assert_eq!(
            r.resolve("secp256k1.sign").unwrap_err(),
            ResolveError::NotFound {
                name: "secp256k1.sign".to_string(),
                segment: "sign".to_string()
            }
        );
        assert!(matches!(r.resolve("nope.deeper"), Err(ResolveError::NotFound { .. })));
    }

    #[test]
    fn test_descending_into_function_is_not_found() {
        let r = resolver(&["hexToBin.call"]);
        assert_eq!(
            r.resolve("hexToBin.call").unwrap_err(),
            ResolveError::NotFound {
                name: "hexToBin.call".to_string(),
                segment: "call".to_string()
            }
        );
    }

    #[test]
    fn test_non_function_is_not_callable() {
        let r = resolver(&["secp256k1", "version"]);
        assert_eq!(
            r.resolve("secp256k1").unwrap_err(),
            ResolveError::NotCallable {
                name: "secp256k1".to_string(),
                kind: "namespace"
            }
        );
        assert!(matches!(
            r.resolve("version"),
            Err(ResolveError::NotCallable { kind: "string", .. })
        ));
    }

    #[test]
    fn test_strict_bind_fails_on_missing_path() {
        let r = resolver(&["hexToBin", "binToHex"]);
        let err = CapabilityTable::bind(&r, true).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn test_lenient_bind_replays_failure() {
        let r = resolver(&["hexToBin", "binToHex"]);
        let table = CapabilityTable::bind(&r, false).unwrap();
        assert_eq!(table.bound_names(), vec!["hexToBin"]);
        assert!(table.lookup("hexToBin").is_ok());
        assert!(matches!(table.lookup("binToHex"), Err(ResolveError::NotFound { .. })));
        assert!(matches!(table.lookup("secp256k1"), Err(ResolveError::NotAllowed(_))));
    }

    #[test]
    fn test_resolved_capability_is_debug() {
        let r = resolver(&["hexToBin"]);
        assert_eq!(format!("{:?}", r.resolve("hexToBin")), "Ok(Capability(..))");
    }

    #[test]
    fn test_function_paths() {
        let paths = fake_namespace().function_paths();
        assert_eq!(
            paths,
            vec![
                "hexToBin",
                "secp256k1.derivePublicKeyCompressed",
                "secp256k1.derivePublicKeyUncompressed",
                "secp256k1.internal.leak",
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_invocation_settles() {
        let member = Member::async_function(|args| async move {
            tokio::task::yield_now().await;
            Ok::<_, InvocationError>(Value::from(args.len() as u64))
        });
        let Member::Function(cap) = member else {
            panic!("expected function");
        };
        let invocation = cap.invoke(vec![Value::Null, Value::Null]);
        assert!(matches!(invocation, Invocation::Pending(_)));
        assert_eq!(invocation.settle().await.unwrap(), Value::from(2u64));
    }
}
