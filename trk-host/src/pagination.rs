//! limit/offset pagination for list endpoints

use serde::{Deserialize, Serialize};

/// Page size when the caller gives none
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page a caller may ask for
pub const MAX_LIMIT: i64 = 200;

/// `?limit=&offset=` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Sanitized page bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl PageQuery {
    /// Clamp limit to `[1, MAX_LIMIT]` and offset to `>= 0`
    ///
    /// # Examples
    /// ```
    /// use trk_host::pagination::{PageQuery, MAX_LIMIT};
    ///
    /// let page = PageQuery { limit: Some(10_000), offset: Some(-5) }.page();
    /// assert_eq!(page.limit, MAX_LIMIT);
    /// assert_eq!(page.offset, 0);
    /// ```
    pub fn page(self) -> Page {
        Page {
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        PageQuery::default().page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(
            PageQuery::default().page(),
            Page {
                limit: DEFAULT_LIMIT,
                offset: 0
            }
        );
    }

    #[test]
    fn test_zero_limit_becomes_one() {
        let page = PageQuery {
            limit: Some(0),
            offset: Some(20),
        }
        .page();
        assert_eq!(page.limit, 1);
        assert_eq!(page.offset, 20);
    }
}
