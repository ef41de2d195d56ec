use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{check_status, non_empty, parse_price, ListingSource};
use crate::{
    error::FetchError,
    product::{Product, SearchQuery, Site},
};

const SEARCH_API: &str = "https://search.vestiairecollective.com";
const LISTING_HOST: &str = "https://www.vestiairecollective.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    pub site_id: u8,
    pub country: &'static str,
    pub language: &'static str,
    pub currency: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    pagination: Pagination,
    locale: LocaleBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    q: Option<&'a str>,
    filters: Filters,
    sort: Sort,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: u32,
    page_size: u32,
    limit: u32,
    offset: u32,
}

#[derive(Debug, Serialize)]
struct LocaleBody<'a> {
    country: &'a str,
    language: &'a str,
    currency: &'a str,
}

#[derive(Debug, Default, Serialize)]
struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<PriceRange>,
}

#[derive(Debug, Serialize)]
struct PriceRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Sort {
    by: &'static str,
    direction: &'static str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    brand: Value,
    #[serde(default)]
    size: Value,
    condition: Option<String>,
    link: Option<String>,
    #[serde(default)]
    pictures: Vec<String>,
    seller: Option<Seller>,
}

#[derive(Debug, Deserialize)]
struct Seller {
    #[serde(alias = "firstname")]
    name: Option<String>,
}

// Fields that are sometimes a bare string and sometimes {"name": ..}
fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("name")
            .or_else(|| obj.get("label"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

impl Item {
    fn into_product(self) -> Product {
        // Prices arrive either flat or as {"cents": .., "currency": ..}
        let (price, currency) = match &self.price {
            Value::Object(obj) => (
                obj.get("cents")
                    .and_then(parse_price)
                    .map(|cents| cents / 100.0)
                    .or_else(|| obj.get("amount").and_then(parse_price)),
                obj.get("currency").and_then(Value::as_str).map(str::to_string),
            ),
            other => (parse_price(other), None),
        };

        let id = match self.id {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };

        let url = self.link.map(|link| {
            if link.starts_with("http") {
                link
            } else {
                format!("{LISTING_HOST}{link}")
            }
        });

        Product {
            id,
            site: Site::Vestiaire,
            title: self.name,
            price,
            currency: non_empty(currency),
            brand: non_empty(name_of(&self.brand)),
            size: non_empty(name_of(&self.size)),
            condition: non_empty(self.condition),
            image_url: non_empty(self.pictures.into_iter().next()),
            url: non_empty(url),
            seller: non_empty(self.seller.and_then(|s| s.name)),
        }
    }
}

pub struct VestiaireSource {
    client: Client,
    base_url: String,
}

impl VestiaireSource {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, SEARCH_API)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn locale_for(country: &str) -> Locale {
        match country {
            "uk" | "gb" => Locale {
                site_id: 3,
                country: "gb",
                language: "en",
                currency: "GBP",
            },
            "fr" => Locale {
                site_id: 1,
                country: "fr",
                language: "fr",
                currency: "EUR",
            },
            "de" => Locale {
                site_id: 5,
                country: "de",
                language: "de",
                currency: "EUR",
            },
            "it" => Locale {
                site_id: 4,
                country: "it",
                language: "it",
                currency: "EUR",
            },
            "es" => Locale {
                site_id: 2,
                country: "es",
                language: "es",
                currency: "EUR",
            },
            _ => Locale {
                site_id: 6,
                country: "us",
                language: "en",
                currency: "USD",
            },
        }
    }

    fn request_body<'a>(query: &'a SearchQuery, locale: &Locale) -> SearchRequest<'a> {
        let price = match (query.min_price, query.max_price) {
            (None, None) => None,
            (min, max) => Some(PriceRange { min, max }),
        };

        SearchRequest {
            pagination: Pagination {
                page: query.page,
                page_size: query.items_per_page,
                limit: query.items_per_page,
                offset: query.offset(),
            },
            locale: LocaleBody {
                country: locale.country,
                language: locale.language,
                currency: locale.currency,
            },
            q: Some(query.search.as_str()).filter(|q| !q.is_empty()),
            filters: Filters { price },
            sort: Sort {
                by: "relevance",
                direction: "desc",
            },
        }
    }
}

#[async_trait]
impl ListingSource for VestiaireSource {
    fn site(&self) -> Site {
        Site::Vestiaire
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, FetchError> {
        let locale = Self::locale_for(query.country.as_deref().unwrap_or("us"));
        let origin = format!("https://{}.vestiairecollective.com", locale.country);

        let response = self
            .client
            .post(format!("{}/v1/product/search", self.base_url))
            .header("x-siteid", locale.site_id.to_string())
            .header("x-language", locale.language)
            .header("x-currency", locale.currency)
            .header(reqwest::header::ORIGIN, &origin)
            .header(reqwest::header::REFERER, format!("{origin}/"))
            .json(&Self::request_body(query, &locale))
            .send()
            .await?;

        let body: SearchResponse = check_status(response)?.json().await?;
        Ok(body.items.into_iter().map(Item::into_product).collect())
    }
}
