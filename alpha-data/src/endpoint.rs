use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Binance public 24h ticker endpoints, region resistant mirrors last.
pub const TICKER_24HR_URLS: [&str; 3] = [
    "https://api.binance.com/api/v3/ticker/24hr",
    "https://api1.binance.com/api/v3/ticker/24hr",
    "https://data-api.binance.vision/api/v3/ticker/24hr",
];

/// Internal Alpha token list (undocumented).
pub const ALPHA_TOKEN_LIST_URL: &str =
    "https://www.binance.com/bapi/defi/v1/public/wallet-direct/buw/wallet/cex/alpha/all/token/list";

/// Internal product list (undocumented).
pub const PRODUCT_LIST_URL: &str =
    "https://www.binance.com/bapi/asset/v2/public/asset-service/product/get-products?includeEtf=true";

/// Internal Alpha candlestick query (undocumented).
pub const ALPHA_KLINES_URL: &str = "https://www.binance.com/bapi/defi/v1/public/alpha-trade/klines";

/// HTTP method of an [`Attempt`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum Method {
    #[display("GET")]
    Get,
    #[display("POST")]
    Post,
}

/// One `(method, url)` pair of an [`EndpointSet`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Attempt {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Attempt {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// POST with an empty JSON object body, which the internal list endpoints accept.
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(serde_json::json!({})),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Ordered list of equivalent upstream attempts for one logical data source.
///
/// Order is a declared preference: the [`FailoverFetcher`](crate::fetch::FailoverFetcher) walks
/// it front to back and never shuffles.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct EndpointSet {
    pub name: SmolStr,
    pub attempts: Vec<Attempt>,
}

impl EndpointSet {
    pub fn new(name: impl Into<SmolStr>, attempts: Vec<Attempt>) -> Self {
        Self {
            name: name.into(),
            attempts,
        }
    }

    /// Every url requested with GET, in listed order.
    pub fn get_all<I, S>(name: impl Into<SmolStr>, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, urls.into_iter().map(Attempt::get).collect())
    }

    pub fn ticker_24hr() -> Self {
        Self::get_all("ticker_24hr", TICKER_24HR_URLS)
    }

    pub fn alpha_token_list() -> Self {
        Self::new(
            "alpha_token_list",
            vec![
                Attempt::get(ALPHA_TOKEN_LIST_URL),
                Attempt::post(ALPHA_TOKEN_LIST_URL),
            ],
        )
    }

    pub fn product_list() -> Self {
        Self::new(
            "product_list",
            vec![Attempt::post(PRODUCT_LIST_URL), Attempt::get(PRODUCT_LIST_URL)],
        )
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }
}

/// Parameters of the per-symbol candlestick query used by enrichment.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct KlineSource {
    pub urls: Vec<String>,
    pub interval: SmolStr,
    pub limit: u32,
}

impl Default for KlineSource {
    fn default() -> Self {
        Self {
            urls: vec![ALPHA_KLINES_URL.to_string()],
            interval: SmolStr::new_static("1d"),
            limit: 1,
        }
    }
}

impl KlineSource {
    /// [`EndpointSet`] querying the candles of one market symbol (eg/ "ALPHA_175USDT").
    pub fn endpoints(&self, symbol: &str) -> EndpointSet {
        let limit = self.limit.to_string();
        EndpointSet::new(
            format!("klines:{symbol}"),
            self.urls
                .iter()
                .map(|url| {
                    Attempt::get(url.as_str())
                        .with_query("symbol", symbol)
                        .with_query("interval", self.interval.as_str())
                        .with_query("limit", limit.as_str())
                })
                .collect(),
        )
    }
}
