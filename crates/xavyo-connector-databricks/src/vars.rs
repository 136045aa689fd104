//! Query-string builders.
//!
//! Each builder writes its own keys into a [`QueryParams`] list and skips
//! empty values, so a request only carries the parameters it needs.

/// Ordered query-string pairs. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, keeping earlier values for the same key.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.0.push((key.to_string(), value.into()));
    }

    /// Replaces every value of `key` with a single value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.retain(|(k, _)| k != key);
        self.add(key, value);
    }

    /// Returns the first value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Builds the params from a list of builders, in order.
    #[must_use]
    pub fn from_vars(vars: &[&dyn QueryVars]) -> Self {
        let mut params = Self::new();
        for v in vars {
            v.apply(&mut params);
        }
        params
    }
}

/// A set of query parameters that knows how to serialize itself.
pub trait QueryVars: Send + Sync {
    fn apply(&self, params: &mut QueryParams);
}

/// SCIM pagination: 1-based `startIndex` and page size `count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationVars {
    pub start: u32,
    pub count: u32,
}

impl PaginationVars {
    #[must_use]
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    /// Requests at most one result, for lookups.
    #[must_use]
    pub fn single() -> Self {
        Self { start: 0, count: 1 }
    }
}

impl QueryVars for PaginationVars {
    fn apply(&self, params: &mut QueryParams) {
        if self.start > 0 {
            params.add("startIndex", self.start.to_string());
        }
        if self.count > 0 {
            params.add("count", self.count.to_string());
        }
    }
}

/// SCIM filter expression, e.g. `userName eq 'alice'`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterVars {
    pub filter: String,
}

impl FilterVars {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }

    /// Equality filter `<field> eq '<value>'`.
    #[must_use]
    pub fn eq(field: &str, value: &str) -> Self {
        Self::new(format!("{field} eq '{value}'"))
    }
}

impl QueryVars for FilterVars {
    fn apply(&self, params: &mut QueryParams) {
        if !self.filter.is_empty() {
            params.add("filter", self.filter.clone());
        }
    }
}

/// Attribute projection (`attributes=` repeated).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrVars {
    pub attrs: Vec<&'static str>,
}

impl AttrVars {
    #[must_use]
    pub fn user() -> Self {
        Self {
            attrs: vec!["id", "emails", "userName", "displayName", "active"],
        }
    }

    #[must_use]
    pub fn user_roles() -> Self {
        Self {
            attrs: vec!["roles", "entitlements"],
        }
    }

    #[must_use]
    pub fn group() -> Self {
        Self {
            attrs: vec!["id", "displayName", "members"],
        }
    }

    #[must_use]
    pub fn group_roles() -> Self {
        Self {
            attrs: vec!["roles", "entitlements", "meta"],
        }
    }

    #[must_use]
    pub fn service_principal() -> Self {
        Self {
            attrs: vec!["id", "displayName", "active", "applicationId"],
        }
    }

    #[must_use]
    pub fn service_principal_roles() -> Self {
        Self {
            attrs: vec!["roles", "entitlements"],
        }
    }
}

impl QueryVars for AttrVars {
    fn apply(&self, params: &mut QueryParams) {
        for attr in &self.attrs {
            params.add("attributes", *attr);
        }
    }
}

/// Resource a role catalog is scoped to (`resource=`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceVars {
    pub resource: String,
}

impl ResourceVars {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

impl QueryVars for ResourceVars {
    fn apply(&self, params: &mut QueryParams) {
        if !self.resource.is_empty() {
            params.add("resource", self.resource.clone());
        }
    }
}

/// Rule-set name and the etag guarding it.
///
/// `etag` is always sent, even when empty; the platform treats an empty etag
/// as "latest".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameVars {
    pub name: String,
    pub etag: String,
}

impl NameVars {
    pub fn new(name: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            etag: etag.into(),
        }
    }
}

impl QueryVars for NameVars {
    fn apply(&self, params: &mut QueryParams) {
        params.set("etag", self.etag.clone());
        if !self.name.is_empty() {
            params.add("name", self.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_skips_zero() {
        let params = QueryParams::from_vars(&[&PaginationVars::new(0, 0)]);
        assert!(params.is_empty());

        let params = QueryParams::from_vars(&[&PaginationVars::new(51, 50)]);
        assert_eq!(params.get("startIndex"), Some("51"));
        assert_eq!(params.get("count"), Some("50"));
    }

    #[test]
    fn test_filter_eq() {
        let params = QueryParams::from_vars(&[
            &PaginationVars::single(),
            &FilterVars::eq("userName", "alice@example.com"),
        ]);
        assert_eq!(params.get("filter"), Some("userName eq 'alice@example.com'"));
        assert_eq!(params.get("count"), Some("1"));
        assert_eq!(params.get("startIndex"), None);
    }

    #[test]
    fn test_attributes_repeat() {
        let params = QueryParams::from_vars(&[&AttrVars::group_roles()]);
        let attrs: Vec<_> = params
            .iter()
            .filter(|(k, _)| *k == "attributes")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(attrs, vec!["roles", "entitlements", "meta"]);
    }

    #[test]
    fn test_name_vars_always_sets_etag() {
        let params = QueryParams::from_vars(&[&NameVars::new("", "")]);
        assert_eq!(params.get("etag"), Some(""));
        assert_eq!(params.get("name"), None);

        let params = QueryParams::from_vars(&[
            &NameVars::new("accounts/a/ruleSets/default", "e1"),
            &NameVars::new("accounts/a/ruleSets/default", "e2"),
        ]);
        let etags: Vec<_> = params.iter().filter(|(k, _)| *k == "etag").collect();
        assert_eq!(etags, vec![("etag", "e2")]);
    }

    #[test]
    fn test_empty_resource_skipped() {
        assert!(QueryParams::from_vars(&[&ResourceVars::new("")]).is_empty());
        assert!(QueryParams::from_vars(&[&FilterVars::default()]).is_empty());
    }
}
