use std::fmt;

/// The kind of object that owns a set of installed policy rules.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    NetworkPolicy,
}

/// Identifies the object that owns a set of installed policy rules.
///
/// The identity is stable for the lifetime of the object and is the only key used when deciding
/// whether a submission replaces previously installed rules.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkPolicy => f.write_str("netpol"),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}
