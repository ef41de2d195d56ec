// Normalized listing shape shared by every site, plus the query that produced it

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Vinted,
    Ebay,
    Vestiaire,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::Vinted, Site::Ebay, Site::Vestiaire];

    // Also the circuit breaker's dependency id
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Vinted => "vinted",
            Site::Ebay => "ebay",
            Site::Vestiaire => "vestiaire",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<String>,
    pub site: Site,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub seller: Option<String>,
}

pub const DEFAULT_ITEMS_PER_PAGE: u32 = 25;
pub const MAX_ITEMS_PER_PAGE: u32 = 100;
// No site paginates this deep; keeps offsets well inside u32
pub const MAX_PAGE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub search: String,
    pub page: u32,
    pub items_per_page: u32,
    pub country: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            page: 1,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            country: None,
            min_price: None,
            max_price: None,
        }
    }
}

impl SearchQuery {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            ..Default::default()
        }
    }

    // Clamp user input into something every site accepts
    pub fn normalized(mut self) -> Self {
        self.search = self.search.trim().to_string();
        self.page = self.page.clamp(1, MAX_PAGE);
        self.items_per_page = self.items_per_page.clamp(1, MAX_ITEMS_PER_PAGE);
        self.country = self
            .country
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn offset(&self) -> u32 {
        self.page
            .max(1)
            .saturating_sub(1)
            .saturating_mul(self.items_per_page)
    }

    // Identical parameters for the same site map to the same cache slot
    pub fn cache_key(&self, site: Site) -> String {
        let price = |p: Option<f64>| p.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            site,
            self.search.trim().to_lowercase(),
            self.page,
            self.items_per_page,
            self.country.as_deref().unwrap_or_default(),
            price(self.min_price),
            price(self.max_price),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps_paging() {
        let query = SearchQuery {
            search: "  chanel bag ".to_string(),
            page: 0,
            items_per_page: 500,
            country: Some(" UK ".to_string()),
            ..Default::default()
        }
        .normalized();

        assert_eq!(query.search, "chanel bag");
        assert_eq!(query.page, 1);
        assert_eq!(query.items_per_page, MAX_ITEMS_PER_PAGE);
        assert_eq!(query.country.as_deref(), Some("uk"));
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_huge_page_is_capped_without_overflow() {
        let raw = SearchQuery {
            page: u32::MAX,
            items_per_page: MAX_ITEMS_PER_PAGE,
            ..Default::default()
        };
        assert_eq!(raw.offset(), u32::MAX);

        let query = raw.normalized();
        assert_eq!(query.page, MAX_PAGE);
        assert_eq!(query.offset(), (MAX_PAGE - 1) * MAX_ITEMS_PER_PAGE);
    }

    #[test]
    fn test_cache_key_distinguishes_site_and_paging() {
        let query = SearchQuery::new("Dress");
        let page_two = SearchQuery {
            page: 2,
            ..query.clone()
        };

        assert_eq!(query.cache_key(Site::Vinted), "vinted:dress:1:25:::");
        assert_ne!(query.cache_key(Site::Vinted), query.cache_key(Site::Ebay));
        assert_ne!(query.cache_key(Site::Vinted), page_two.cache_key(Site::Vinted));
        assert_eq!(
            SearchQuery::new(" dress ").cache_key(Site::Vinted),
            query.cache_key(Site::Vinted)
        );
        assert_eq!(page_two.offset(), 25);
    }
}
