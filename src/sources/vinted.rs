use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{check_status, non_empty, parse_price, ListingSource};
use crate::{
    error::FetchError,
    product::{Product, SearchQuery, Site},
};

const DEFAULT_COUNTRY: &str = "uk";

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    price: serde_json::Value,
    currency: Option<String>,
    brand_title: Option<String>,
    size_title: Option<String>,
    status: Option<String>,
    url: Option<String>,
    photo: Option<Photo>,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: Option<String>,
}

pub struct VintedSource {
    client: Client,
    base_url: Option<String>,
}

impl VintedSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    // Pins every country to one host, used against mock servers
    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: Some(base_url.into()),
        }
    }

    pub fn domain_for(country: &str) -> &'static str {
        match country {
            "pl" => "vinted.pl",
            "de" => "vinted.de",
            "fr" => "vinted.fr",
            "it" => "vinted.it",
            "es" => "vinted.es",
            "nl" => "vinted.nl",
            _ => "vinted.co.uk",
        }
    }

    fn catalog_url(&self, country: &str) -> String {
        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://www.{}", Self::domain_for(country)),
        };
        format!("{base}/api/v2/catalog/items")
    }
}

impl CatalogItem {
    fn into_product(self) -> Product {
        // Newer payloads nest the price as {"amount": "..", "currency_code": ".."}
        let (price, currency) = match &self.price {
            serde_json::Value::Object(obj) => (
                obj.get("amount").and_then(parse_price),
                obj.get("currency_code")
                    .and_then(|c| c.as_str())
                    .map(str::to_string),
            ),
            other => (parse_price(other), None),
        };

        let id = match self.id {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        };

        Product {
            id,
            site: Site::Vinted,
            title: self.title,
            price,
            currency: non_empty(currency.or(self.currency)),
            brand: non_empty(self.brand_title),
            size: non_empty(self.size_title),
            condition: non_empty(self.status),
            image_url: non_empty(self.photo.and_then(|p| p.url)),
            url: non_empty(self.url),
            seller: non_empty(self.user.and_then(|u| u.login)),
        }
    }
}

#[async_trait]
impl ListingSource for VintedSource {
    fn site(&self) -> Site {
        Site::Vinted
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, FetchError> {
        let country = query.country.as_deref().unwrap_or(DEFAULT_COUNTRY);
        let url = self.catalog_url(country);

        let mut params = vec![
            ("search_text", query.search.clone()),
            ("page", query.page.to_string()),
            ("per_page", query.items_per_page.to_string()),
            ("order", "newest_first".to_string()),
        ];
        if let Some(min) = query.min_price {
            params.push(("price_from", min.to_string()));
        }
        if let Some(max) = query.max_price {
            params.push(("price_to", max.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&params)
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        let response = check_status(response)?;
        let body: CatalogResponse = response.json().await?;

        Ok(body
            .items
            .into_iter()
            .map(CatalogItem::into_product)
            .collect())
    }
}
