//! Off-chain ticket metadata (`{base}/{tokenId}.json`).

use crate::{
    Error,
    Result,
    types::{
        NUMBERS_PER_TICKET,
        TicketType,
    },
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_METADATA_BASE_URL: &str = "https://api.chainlottery.space/data";
pub const FALLBACK_IMAGE: &str = "https://placehold.co/600x400?text=Ticket+Image";

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketMetadata {
    pub token_id: u64,
    pub image: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub numbers: Option<Vec<u8>>,
    pub edition: Option<TicketType>,
    /// Why the fallback was used, if the document itself was unusable.
    pub error: Option<String>,
}

impl TicketMetadata {
    pub fn fallback(token_id: u64, error: impl Into<String>) -> Self {
        Self {
            token_id,
            image: FALLBACK_IMAGE.to_string(),
            name: None,
            description: None,
            numbers: None,
            edition: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Deserialize)]
struct MetadataDto {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attributes: Vec<AttributeDto>,
}

#[derive(Deserialize)]
struct AttributeDto {
    trait_type: String,
    value: Value,
}

impl MetadataDto {
    fn numbers(&self) -> Option<Vec<u8>> {
        (1..=NUMBERS_PER_TICKET)
            .map(|i| {
                let name = format!("Number {i}");
                let attr = self.attributes.iter().find(|a| a.trait_type == name)?;
                match &attr.value {
                    Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }
            })
            .collect()
    }

    fn edition(&self) -> Option<TicketType> {
        let attr = self.attributes.iter().find(|a| a.trait_type == "Edition")?;
        attr.value.as_str()?.parse().ok()
    }
}

#[derive(Clone)]
pub struct MetadataClient {
    base_url: String,
    http: reqwest::Client,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self { base_url, http })
    }

    pub fn url_for(&self, token_id: u64) -> String {
        format!("{}/{}.json", self.base_url, token_id)
    }

    /// Never fails: any problem yields the fallback image with the reason.
    pub async fn fetch(&self, token_id: u64) -> TicketMetadata {
        match self.try_fetch(token_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(token_id, error = %e, "metadata unavailable, using fallback");
                TicketMetadata::fallback(token_id, e.to_string())
            }
        }
    }

    async fn try_fetch(&self, token_id: u64) -> Result<TicketMetadata> {
        let res = self.http.get(self.url_for(token_id)).send().await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::InvalidResponse(format!(
                "no metadata for token {token_id}"
            )));
        }
        if !status.is_success() {
            return Err(Error::InvalidResponse(format!(
                "metadata server responded with {status}"
            )));
        }
        let bytes = res.bytes().await?;
        let dto: MetadataDto = serde_json::from_slice(&bytes)?;
        let image = match dto.image.as_deref().map(str::trim) {
            Some(image) if !image.is_empty() => image.to_string(),
            _ => {
                debug!(token_id, "metadata has no image, using placeholder");
                FALLBACK_IMAGE.to_string()
            }
        };
        Ok(TicketMetadata {
            token_id,
            numbers: dto.numbers(),
            edition: dto.edition(),
            image,
            name: dto.name,
            description: dto.description,
            error: None,
        })
    }
}
