//! Rule-set reconciliation.
//!
//! A rule set is replaced wholesale on every write, so grant and revoke are
//! read-modify-write cycles: read the grant rules (recording the etag), edit
//! the list in memory, then PUT the whole list back with that etag.

use tracing::{info, instrument};

use crate::client::{AccessTarget, DatabricksClient};
use crate::endpoints::Scope;
use crate::error::{DatabricksError, DatabricksResult};
use crate::models::{PrincipalKind, PrincipalRef, RuleSet};

const ROLE_PREFIX: &str = "roles/";

/// How a grant rule's role is compared with the requested role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMatch<'a> {
    /// Same role, ignoring a `roles/` prefix on either side.
    Exact(&'a str),
    /// Role name contains the given slug (account roles such as
    /// `roles/marketplace.admin` are addressed by their short slug).
    Containing(&'a str),
}

impl RoleMatch<'_> {
    #[must_use]
    pub fn matches(&self, role: &str) -> bool {
        match self {
            Self::Exact(wanted) => strip_role_prefix(role) == strip_role_prefix(wanted),
            Self::Containing(slug) => role.contains(slug),
        }
    }
}

fn strip_role_prefix(role: &str) -> &str {
    role.strip_prefix(ROLE_PREFIX).unwrap_or(role)
}

/// Role name for a slug, adding the `roles/` prefix if missing.
#[must_use]
pub fn qualified_role(slug: &str) -> String {
    if slug.starts_with(ROLE_PREFIX) {
        slug.to_string()
    } else {
        format!("{ROLE_PREFIX}{slug}")
    }
}

fn is_same_principal(raw: &str, principal: &PrincipalRef) -> bool {
    raw.parse::<PrincipalRef>()
        .map(|p| p == *principal)
        .unwrap_or(false)
}

/// Adds `principal` to every rule matching `role`, or appends a new
/// `{new_role: [principal]}` rule when none matches.
///
/// Returns false, leaving `rules` untouched, if a matching rule already holds
/// the principal.
pub fn add_principal(
    rules: &mut Vec<RuleSet>,
    role: RoleMatch<'_>,
    new_role: &str,
    principal: &PrincipalRef,
) -> bool {
    let already_granted = rules
        .iter()
        .filter(|r| role.matches(&r.role))
        .any(|r| r.principals.iter().any(|p| is_same_principal(p, principal)));
    if already_granted {
        return false;
    }

    let mut found = false;
    for rule in rules.iter_mut().filter(|r| role.matches(&r.role)) {
        rule.principals.push(principal.to_string());
        found = true;
    }

    if !found {
        rules.push(RuleSet {
            principals: vec![principal.to_string()],
            role: new_role.to_string(),
        });
    }

    true
}

/// Removes `principal` from the first rule matching `role` that holds it.
/// A rule left without principals is dropped entirely.
///
/// Returns false, leaving `rules` untouched, if no matching rule holds the
/// principal.
pub fn remove_principal(
    rules: &mut Vec<RuleSet>,
    role: RoleMatch<'_>,
    principal: &PrincipalRef,
) -> bool {
    let Some(index) = rules.iter().position(|r| {
        role.matches(&r.role) && r.principals.iter().any(|p| is_same_principal(p, principal))
    }) else {
        return false;
    };

    let rule = &mut rules[index];
    rule.principals.retain(|p| !is_same_principal(p, principal));
    if rule.principals.is_empty() {
        rules.remove(index);
    }

    true
}

impl DatabricksClient {
    /// Rule-set principal for an opaque platform id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrincipal` if no principal has that id, or a request
    /// error.
    pub async fn principal_ref(
        &self,
        scope: &Scope,
        kind: PrincipalKind,
        id: &str,
    ) -> DatabricksResult<PrincipalRef> {
        self.find_natural_key(scope, kind, id)
            .await?
            .map(|key| PrincipalRef::new(kind, key))
            .ok_or_else(|| {
                DatabricksError::InvalidPrincipal(format!(
                    "no {} with id {id}",
                    kind.rule_set_prefix()
                ))
            })
    }

    /// Opaque platform id of a rule-set principal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrincipal` if the principal no longer exists, or a
    /// request error.
    pub async fn resolve_principal_ref(
        &self,
        scope: &Scope,
        principal: &PrincipalRef,
    ) -> DatabricksResult<String> {
        self.find_principal_id(scope, principal.kind, &principal.key)
            .await?
            .ok_or_else(|| DatabricksError::InvalidPrincipal(format!("{principal} not found")))
    }

    /// Grants `principal` a role on `target`.
    ///
    /// Returns false when the principal already held the role; nothing is
    /// written in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the rule set fails. A
    /// concurrent writer surfaces as a conflict `ApiError`.
    #[instrument(skip(self), fields(principal = %principal))]
    pub async fn grant_rule(
        &self,
        scope: &Scope,
        target: &AccessTarget,
        role: RoleMatch<'_>,
        new_role: &str,
        principal: &PrincipalRef,
    ) -> DatabricksResult<bool> {
        let (mut rules, _) = self.list_rule_sets(scope, target).await?;

        if !add_principal(&mut rules, role, new_role, principal) {
            info!(role = new_role, "Principal already holds the role");
            return Ok(false);
        }

        self.update_rule_sets(scope, target, &rules).await?;
        Ok(true)
    }

    /// Revokes a role on `target` from `principal`.
    ///
    /// Returns false when the principal did not hold the role; nothing is
    /// written in that case.
    ///
    /// # Errors
    ///
    /// Same as [`grant_rule`](Self::grant_rule).
    #[instrument(skip(self), fields(principal = %principal))]
    pub async fn revoke_rule(
        &self,
        scope: &Scope,
        target: &AccessTarget,
        role: RoleMatch<'_>,
        principal: &PrincipalRef,
    ) -> DatabricksResult<bool> {
        let (mut rules, _) = self.list_rule_sets(scope, target).await?;

        if !remove_principal(&mut rules, role, principal) {
            info!(?role, "Principal does not hold the role");
            return Ok(false);
        }

        self.update_rule_sets(scope, target, &rules).await?;
        Ok(true)
    }
}
