use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    http::{base_url, HttpClient},
    RetrieveError, RetrieveWindow, Retriever, SourceId, SourceOutput,
};
use crate::config::PriceSettings;

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<f64>,
}

/// `simple/price` answers with `{ "<coin id>": { "usd": <price> } }`.
type SimplePriceResponse = HashMap<String, UsdQuote>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceOutput {
    pub price: Option<f64>,
}

/// Current USD price of the tracked token.
pub struct PriceRetriever {
    http: HttpClient,
    base_url: Url,
    coin_id: String,
}

impl PriceRetriever {
    pub fn new(settings: &PriceSettings, request_timeout: Duration) -> Result<Self, RetrieveError> {
        Ok(Self {
            http: HttpClient::new(SourceId::Price, request_timeout)?,
            base_url: base_url(&settings.base_url)?,
            coin_id: settings.coin_id.clone(),
        })
    }

    fn price_url(&self) -> Result<Url, RetrieveError> {
        let mut url = self
            .base_url
            .join("simple/price")
            .map_err(|e| RetrieveError::Config(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("ids", &self.coin_id)
            .append_pair("vs_currencies", "usd");

        Ok(url)
    }

    fn serialize(coin_id: &str, response: &SimplePriceResponse) -> PriceOutput {
        PriceOutput {
            price: response
                .get(coin_id)
                .and_then(|quote| quote.usd)
                .filter(|price| price.is_finite()),
        }
    }
}

#[async_trait]
impl Retriever for PriceRetriever {
    fn source(&self) -> SourceId {
        SourceId::Price
    }

    async fn retrieve(&self, _window: &RetrieveWindow) -> Result<SourceOutput, RetrieveError> {
        let response: SimplePriceResponse = self.http.get_json(self.price_url()?).await?;

        Ok(SourceOutput::Price(Self::serialize(&self.coin_id, &response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> SimplePriceResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_serialize_price() {
        let response = parse(r#"{"pocket-network": {"usd": 0.025}}"#);
        let output = PriceRetriever::serialize("pocket-network", &response);
        assert_eq!(output.price, Some(0.025));
    }

    #[test]
    fn test_missing_coin_is_absent_not_zero() {
        let response = parse(r#"{}"#);
        assert_eq!(
            PriceRetriever::serialize("pocket-network", &response).price,
            None
        );

        let response = parse(r#"{"pocket-network": {}}"#);
        assert_eq!(
            PriceRetriever::serialize("pocket-network", &response).price,
            None
        );
    }

    #[test]
    fn test_price_url() {
        let settings = PriceSettings {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            coin_id: "pocket-network".to_string(),
        };
        let retriever = PriceRetriever::new(&settings, Duration::from_secs(30)).unwrap();

        assert_eq!(
            retriever.price_url().unwrap().as_str(),
            "https://api.coingecko.com/api/v3/simple/price?ids=pocket-network&vs_currencies=usd"
        );
    }
}
