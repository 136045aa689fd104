//! Page tokens for multi-phase syncs.
//!
//! The host hands back whatever token the previous page returned. The token is
//! a JSON stack of [`PageState`] frames, so one sync call can walk several
//! resource types in turn (users, then groups, then service principals). The
//! innermost frame's `token` is the SCIM `startIndex` of the next page.

use serde::{Deserialize, Serialize};

use crate::error::{DatabricksError, DatabricksResult};

/// Page size used by every paged listing.
pub const RESOURCES_PAGE_SIZE: u32 = 50;

/// One frame of the page stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    #[serde(default)]
    pub token: String,
    #[serde(rename = "type", default)]
    pub resource_type_id: String,
    #[serde(rename = "id", default)]
    pub resource_id: String,
}

impl PageState {
    pub fn for_type(resource_type_id: impl Into<String>) -> Self {
        Self {
            resource_type_id: resource_type_id.into(),
            ..Self::default()
        }
    }
}

/// Stack of page states serialized into the opaque page token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBag {
    #[serde(default)]
    states: Vec<PageState>,
    #[serde(default)]
    current_state: Option<PageState>,
}

impl PageBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `state` current, saving the previous current state on the stack.
    pub fn push(&mut self, state: PageState) {
        if let Some(current) = self.current_state.take() {
            self.states.push(current);
        }
        self.current_state = Some(state);
    }

    /// Removes and returns the current state; the top of the stack becomes current.
    pub fn pop(&mut self) -> Option<PageState> {
        let current = self.current_state.take()?;
        self.current_state = self.states.pop();
        Some(current)
    }

    /// Advances the current frame to `token`, or drops it when `token` is empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPageToken` if there is no current frame.
    pub fn next(&mut self, token: &str) -> DatabricksResult<()> {
        let state = self
            .pop()
            .ok_or_else(|| DatabricksError::InvalidPageToken("no active page state".into()))?;
        if !token.is_empty() {
            self.push(PageState {
                token: token.to_string(),
                resource_type_id: state.resource_type_id,
                resource_id: state.resource_id,
            });
        }
        Ok(())
    }

    /// [`next`](Self::next) followed by [`marshal`](Self::marshal).
    ///
    /// # Errors
    ///
    /// Same as [`next`](Self::next).
    pub fn next_token(&mut self, token: &str) -> DatabricksResult<String> {
        self.next(token)?;
        self.marshal()
    }

    #[must_use]
    pub fn current(&self) -> Option<&PageState> {
        self.current_state.as_ref()
    }

    /// Token of the current frame, or empty.
    #[must_use]
    pub fn page_token(&self) -> &str {
        self.current_state
            .as_ref()
            .map_or("", |s| s.token.as_str())
    }

    /// Resource type of the current frame, or empty.
    #[must_use]
    pub fn resource_type_id(&self) -> &str {
        self.current_state
            .as_ref()
            .map_or("", |s| s.resource_type_id.as_str())
    }

    /// Serializes the bag. A bag with no current frame is the empty token.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if serialization fails.
    pub fn marshal(&self) -> DatabricksResult<String> {
        if self.current_state.is_none() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a token produced by [`marshal`](Self::marshal).
    ///
    /// # Errors
    ///
    /// Returns `InvalidPageToken` if the token is not a serialized bag.
    pub fn unmarshal(token: &str) -> DatabricksResult<Self> {
        if token.is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(token).map_err(|e| DatabricksError::InvalidPageToken(e.to_string()))
    }
}

/// Decodes a page token, seeding an empty bag with `default_resource_type`.
///
/// Returns the bag and the 1-based start index of the page to fetch.
///
/// # Errors
///
/// Returns `InvalidPageToken` if the token or its start index is malformed.
pub fn parse_page_token(
    token: &str,
    default_resource_type: &str,
) -> DatabricksResult<(PageBag, u32)> {
    let mut bag = PageBag::unmarshal(token)?;
    if bag.current().is_none() {
        bag.push(PageState::for_type(default_resource_type));
    }

    let start = match bag.page_token() {
        "" => 1,
        raw => raw
            .parse::<u32>()
            .map_err(|e| DatabricksError::InvalidPageToken(format!("{raw}: {e}")))?,
    };

    Ok((bag, start))
}

/// Start index of the next page, or empty when the listing is exhausted.
#[must_use]
pub fn prepare_next_token(start: u32, returned: usize, total: u32) -> String {
    let returned = u32::try_from(returned).unwrap_or(u32::MAX);
    let next = start.saturating_add(returned);
    if returned == 0 || next > total {
        return String::new();
    }
    next.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_next_token() {
        assert_eq!(prepare_next_token(1, 50, 120), "51");
        assert_eq!(prepare_next_token(51, 50, 120), "101");
        assert_eq!(prepare_next_token(101, 20, 120), "");
        assert_eq!(prepare_next_token(1, 0, 0), "");
        assert_eq!(prepare_next_token(1, 0, 10), "");
    }

    #[test]
    fn test_pagination_terminates_in_expected_steps() {
        let page = RESOURCES_PAGE_SIZE;
        for total in [0u32, 1, 49, 50, 51, 99, 100, 101, 250, 1001] {
            let mut start = 1u32;
            let mut steps = 0u32;
            let mut seen = 0u32;
            loop {
                steps += 1;
                let remaining = total.saturating_sub(start - 1);
                let returned = remaining.min(page);
                seen += returned;
                let token = prepare_next_token(start, returned as usize, total);
                if token.is_empty() {
                    break;
                }
                start = token.parse().unwrap();
            }
            assert_eq!(seen, total, "total {total}");
            assert_eq!(steps, total.div_ceil(page).max(1), "total {total}");
        }
    }

    #[test]
    fn test_empty_token_starts_at_one() {
        let (bag, start) = parse_page_token("", "user").unwrap();
        assert_eq!(start, 1);
        assert_eq!(bag.resource_type_id(), "user");
    }

    #[test]
    fn test_next_token_round_trip() {
        let (mut bag, _) = parse_page_token("", "group").unwrap();
        let token = bag.next_token("51").unwrap();

        let (bag, start) = parse_page_token(&token, "group").unwrap();
        assert_eq!(start, 51);
        assert_eq!(bag.resource_type_id(), "group");
    }

    #[test]
    fn test_last_page_yields_empty_token() {
        let (mut bag, _) = parse_page_token("", "group").unwrap();
        assert_eq!(bag.next_token("").unwrap(), "");
    }

    #[test]
    fn test_multi_frame_walk() {
        let (mut bag, _) = parse_page_token("", "role").unwrap();
        bag.pop();
        bag.push(PageState::for_type("user"));
        bag.push(PageState::for_type("group"));
        bag.push(PageState::for_type("service_principal"));

        let mut order = Vec::new();
        let mut token = bag.marshal().unwrap();
        while !token.is_empty() {
            let (mut bag, _) = parse_page_token(&token, "role").unwrap();
            order.push(bag.resource_type_id().to_string());
            token = bag.next_token("").unwrap();
        }
        assert_eq!(order, vec!["service_principal", "group", "user"]);
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(matches!(
            PageBag::unmarshal("not json"),
            Err(DatabricksError::InvalidPageToken(_))
        ));

        let mut bag = PageBag::new();
        bag.push(PageState {
            token: "abc".into(),
            resource_type_id: "user".into(),
            resource_id: String::new(),
        });
        let token = bag.marshal().unwrap();
        assert!(parse_page_token(&token, "user").is_err());

        assert!(PageBag::new().next("1").is_err());
    }
}
