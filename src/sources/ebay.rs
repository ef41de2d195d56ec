use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

use super::{check_status, non_empty, parse_price, ListingSource};
use crate::{
    config::EbayCredentials,
    error::FetchError,
    product::{Product, SearchQuery, Site},
};

const PRODUCTION_API: &str = "https://api.ebay.com";
const SANDBOX_API: &str = "https://api.sandbox.ebay.com";
const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
// Browse API rejects larger pages
const MAX_PAGE_SIZE: u32 = 50;
// Refresh a little early so a token never expires mid-request
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    7200
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    item_id: Option<String>,
    #[serde(default)]
    title: String,
    price: Option<Price>,
    image: Option<Image>,
    item_web_url: Option<String>,
    condition: Option<String>,
    seller: Option<Seller>,
}

#[derive(Debug, Deserialize)]
struct Price {
    #[serde(default)]
    value: serde_json::Value,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Seller {
    username: Option<String>,
}

impl ItemSummary {
    fn into_product(self) -> Product {
        let (price, currency) = match self.price {
            Some(p) => (parse_price(&p.value), p.currency),
            None => (None, None),
        };

        Product {
            id: non_empty(self.item_id),
            site: Site::Ebay,
            title: self.title,
            price,
            currency: non_empty(currency),
            brand: None,
            size: None,
            condition: non_empty(self.condition),
            image_url: non_empty(self.image.and_then(|i| i.image_url)),
            url: non_empty(self.item_web_url),
            seller: non_empty(self.seller.and_then(|s| s.username)),
        }
    }
}

// eBay Browse API search, authenticated with an application token.
// The client-credentials token is fetched inside `search` and shares its retry and breaker path
pub struct EbaySource {
    client: Client,
    base_url: String,
    credentials: Option<EbayCredentials>,
    token: Mutex<Option<CachedToken>>,
}

impl EbaySource {
    pub fn new(client: Client, credentials: Option<EbayCredentials>) -> Self {
        let base_url = match &credentials {
            Some(c) if c.sandbox => SANDBOX_API,
            _ => PRODUCTION_API,
        };
        Self::with_base_url(client, credentials, base_url)
    }

    pub fn with_base_url(
        client: Client,
        credentials: Option<EbayCredentials>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            token: Mutex::new(None),
        }
    }

    pub fn marketplace_for(country: &str) -> &'static str {
        match country {
            "uk" | "gb" => "EBAY_GB",
            "de" => "EBAY_DE",
            "fr" => "EBAY_FR",
            "it" => "EBAY_IT",
            "es" => "EBAY_ES",
            "nl" => "EBAY_NL",
            "pl" => "EBAY_PL",
            "ca" => "EBAY_CA",
            "au" => "EBAY_AU",
            _ => "EBAY_US",
        }
    }

    pub fn price_filter(min: Option<f64>, max: Option<f64>) -> Option<String> {
        match (min, max) {
            (None, None) => None,
            (min, max) => Some(format!(
                "price:[{}..{}]",
                min.map(|v| v.to_string()).unwrap_or_default(),
                max.map(|v| v.to_string()).unwrap_or_default()
            )),
        }
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        if let Some(token) = self.token.lock().as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let credentials = self.credentials.as_ref().ok_or_else(|| {
            FetchError::MissingCredentials("EBAY_APP_ID and EBAY_CERT_ID are not set".to_string())
        })?;

        let response = self
            .client
            .post(format!("{}/identity/v1/oauth2/token", self.base_url))
            .basic_auth(&credentials.app_id, Some(&credentials.cert_id))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
            .send()
            .await?;
        let token: TokenResponse = check_status(response)?.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "obtained eBay application token");

        Ok(token.access_token)
    }
}

#[async_trait]
impl ListingSource for EbaySource {
    fn site(&self) -> Site {
        Site::Ebay
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, FetchError> {
        let token = self.access_token().await?;
        let limit = query.items_per_page.min(MAX_PAGE_SIZE);
        let marketplace = Self::marketplace_for(query.country.as_deref().unwrap_or("us"));

        let mut params = vec![
            ("q", query.search.clone()),
            ("limit", limit.to_string()),
            ("offset", query.offset().to_string()),
        ];
        if let Some(filter) = Self::price_filter(query.min_price, query.max_price) {
            params.push(("filter", filter));
        }

        let response = self
            .client
            .get(format!("{}/buy/browse/v1/item_summary/search", self.base_url))
            .query(&params)
            .bearer_auth(&token)
            .header("X-EBAY-C-MARKETPLACE-ID", marketplace)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Revoked or expired early; the next call fetches a new one
            *self.token.lock() = None;
        }

        let body: SearchResponse = check_status(response)?.json().await?;
        Ok(body
            .item_summaries
            .into_iter()
            .map(ItemSummary::into_product)
            .collect())
    }
}
