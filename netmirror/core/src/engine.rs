//! The policy engine seam.
//!
//! Reconcilers submit parsed rules through [`PolicyEngine`]. Every submission carries the
//! [`ResourceId`] of the object that produced it, so that a replacing add or a delete only ever
//! touches rules owned by that object.

use crate::{Labels, ResourceId, Rule};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// The provenance of a set of rules.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Source {
    Kubernetes,
    LocalApi,
}

/// The engine's revision after a change has been committed.
pub type Revision = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddOptions {
    /// Removes all rules previously installed by `resource` before installing the new ones.
    pub replace: bool,
    pub source: Source,
    pub resource: ResourceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteOptions {
    pub source: Source,
    pub resource: ResourceId,
}

/// Installs and removes policy rules.
///
/// Implementations must apply each call atomically: either all of the submitted rules are
/// installed (and, when replacing, all prior rules removed) or the engine is left unchanged.
pub trait PolicyEngine: Send + Sync {
    fn add(&self, rules: Vec<Rule>, opts: AddOptions) -> Result<Revision>;

    /// Removes every rule that was installed by `opts.resource` from `opts.source` and whose labels
    /// include all of `selector`. Returns the number of rules removed.
    fn delete(&self, selector: &Labels, opts: DeleteOptions) -> Result<usize>;
}

impl<E: PolicyEngine + ?Sized> PolicyEngine for Arc<E> {
    fn add(&self, rules: Vec<Rule>, opts: AddOptions) -> Result<Revision> {
        (**self).add(rules, opts)
    }

    fn delete(&self, selector: &Labels, opts: DeleteOptions) -> Result<usize> {
        (**self).delete(selector, opts)
    }
}

/// An in-memory, revisioned rule store.
#[derive(Debug, Default)]
pub struct Repository {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    revision: Revision,
    rules: Vec<Installed>,
}

#[derive(Clone, Debug)]
struct Installed {
    rule: Rule,
    source: Source,
    resource: ResourceId,
}

// === impl Repository ===

impl Repository {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn revision(&self) -> Revision {
        self.state.lock().revision
    }

    pub fn len(&self) -> usize {
        self.state.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the rules currently installed by `resource`, in installation order.
    pub fn rules_for(&self, resource: &ResourceId) -> Vec<Rule> {
        self.state
            .lock()
            .rules
            .iter()
            .filter(|i| i.resource == *resource)
            .map(|i| i.rule.clone())
            .collect()
    }
}

impl PolicyEngine for Repository {
    fn add(&self, rules: Vec<Rule>, opts: AddOptions) -> Result<Revision> {
        // Validate everything up front so that a rejected submission leaves no trace.
        for rule in &rules {
            if rule.labels.is_empty() {
                bail!("rule for {} has no labels", opts.resource);
            }
        }

        let mut state = self.state.lock();
        if opts.replace {
            let before = state.rules.len();
            state
                .rules
                .retain(|i| !(i.source == opts.source && i.resource == opts.resource));
            debug!(
                resource = %opts.resource,
                removed = before - state.rules.len(),
                "Replacing rules"
            );
        }
        state
            .rules
            .extend(rules.into_iter().map(|rule| Installed {
                rule,
                source: opts.source,
                resource: opts.resource.clone(),
            }));
        state.revision += 1;
        Ok(state.revision)
    }

    fn delete(&self, selector: &Labels, opts: DeleteOptions) -> Result<usize> {
        let mut state = self.state.lock();
        let before = state.rules.len();
        state.rules.retain(|i| {
            !(i.source == opts.source
                && i.resource == opts.resource
                && i.rule.labels.contains_all(selector))
        });
        let removed = before - state.rules.len();
        if removed > 0 {
            state.revision += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rule::EndpointSelector, ResourceKind, Selector};
    use maplit::btreemap;

    fn mk_rule(name: &str, app: &str) -> Rule {
        Rule::new(
            EndpointSelector::in_namespace(
                "a",
                Selector::from_map(btreemap! { "app".to_string() => app.to_string() }),
            ),
            btreemap! { "policy-name".to_string() => name.to_string() }.into(),
        )
    }

    fn netpol(ns: &str, name: &str) -> ResourceId {
        ResourceId::new(ResourceKind::NetworkPolicy, ns, name)
    }

    fn add_opts(resource: ResourceId) -> AddOptions {
        AddOptions {
            replace: true,
            source: Source::Kubernetes,
            resource,
        }
    }

    #[test]
    fn replace_supersedes_prior_rules() {
        let repo = Repository::default();
        let id = netpol("a", "p1");
        repo.add(vec![mk_rule("p1", "r1")], add_opts(id.clone()))
            .unwrap();
        repo.add(vec![mk_rule("p1", "r2")], add_opts(id.clone()))
            .unwrap();
        assert_eq!(repo.rules_for(&id), vec![mk_rule("p1", "r2")]);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.revision(), 2);
    }

    #[test]
    fn identities_do_not_interfere() {
        let repo = Repository::default();
        repo.add(vec![mk_rule("p1", "x")], add_opts(netpol("a", "p1")))
            .unwrap();
        repo.add(vec![mk_rule("p2", "y")], add_opts(netpol("a", "p2")))
            .unwrap();
        assert_eq!(repo.rules_for(&netpol("a", "p1")), vec![mk_rule("p1", "x")]);
        assert_eq!(repo.rules_for(&netpol("a", "p2")), vec![mk_rule("p2", "y")]);
    }

    #[test]
    fn rejected_add_leaves_state_untouched() {
        let repo = Repository::default();
        let id = netpol("a", "p1");
        repo.add(vec![mk_rule("p1", "r1")], add_opts(id.clone()))
            .unwrap();

        let unlabeled = Rule::new(
            EndpointSelector::in_namespace("a", Selector::default()),
            Labels::default(),
        );
        repo.add(vec![mk_rule("p1", "r2"), unlabeled], add_opts(id.clone()))
            .expect_err("unlabeled rules must be rejected");
        assert_eq!(repo.rules_for(&id), vec![mk_rule("p1", "r1")]);
        assert_eq!(repo.revision(), 1);
    }

    #[test]
    fn delete_requires_matching_source_and_identity() {
        let repo = Repository::default();
        let id = netpol("a", "p1");
        repo.add(vec![mk_rule("p1", "x")], add_opts(id.clone()))
            .unwrap();
        repo.add(
            vec![mk_rule("p1", "x")],
            AddOptions {
                replace: true,
                source: Source::LocalApi,
                resource: netpol("local", "p1"),
            },
        )
        .unwrap();

        let selector = btreemap! { "policy-name".to_string() => "p1".to_string() }.into();
        let removed = repo
            .delete(
                &selector,
                DeleteOptions {
                    source: Source::Kubernetes,
                    resource: id.clone(),
                },
            )
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.rules_for(&id).is_empty());
        assert_eq!(repo.rules_for(&netpol("local", "p1")).len(), 1);
    }

    #[test]
    fn delete_of_unknown_identity_is_a_noop() {
        let repo = Repository::default();
        let removed = repo
            .delete(
                &btreemap! { "policy-name".to_string() => "p1".to_string() }.into(),
                DeleteOptions {
                    source: Source::Kubernetes,
                    resource: netpol("a", "p1"),
                },
            )
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(repo.revision(), 0);
    }
}
