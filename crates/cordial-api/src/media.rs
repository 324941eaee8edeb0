use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use cordial_types::api::MediaResult;
use cordial_types::models::MediaType;

use crate::error::{BackendError, BackendResult};

const GIPHY_URL: &str = "https://api.giphy.com";
const UNSPLASH_URL: &str = "https://api.unsplash.com";
const RESULT_LIMIT: u32 = 12;

/// GIF and stock-image search for the media picker.
#[derive(Clone)]
pub struct MediaSearch {
    http: Client,
    giphy_key: Option<String>,
    unsplash_key: Option<String>,
    giphy_url: String,
    unsplash_url: String,
}

#[derive(Deserialize)]
struct GiphyResponse {
    data: Vec<GiphyGif>,
}

#[derive(Deserialize)]
struct GiphyGif {
    images: GiphyImages,
}

#[derive(Deserialize)]
struct GiphyImages {
    fixed_height: GiphyRendition,
    #[serde(default)]
    fixed_height_small: Option<GiphyRendition>,
}

#[derive(Deserialize)]
struct GiphyRendition {
    url: String,
}

#[derive(Deserialize)]
struct UnsplashResponse {
    results: Vec<UnsplashPhoto>,
}

#[derive(Deserialize)]
struct UnsplashPhoto {
    urls: UnsplashUrls,
}

#[derive(Deserialize)]
struct UnsplashUrls {
    regular: String,
    thumb: String,
}

impl MediaSearch {
    pub fn new(giphy_key: Option<String>, unsplash_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            giphy_key,
            unsplash_key,
            giphy_url: GIPHY_URL.to_string(),
            unsplash_url: UNSPLASH_URL.to_string(),
        }
    }

    /// Points both providers at another host (used against a local stand-in).
    pub fn with_base_urls(mut self, giphy_url: &str, unsplash_url: &str) -> Self {
        self.giphy_url = giphy_url.trim_end_matches('/').to_string();
        self.unsplash_url = unsplash_url.trim_end_matches('/').to_string();
        self
    }

    pub async fn gifs(&self, query: &str) -> BackendResult<Vec<MediaResult>> {
        let key = self
            .giphy_key
            .as_deref()
            .ok_or(BackendError::NotConfigured("GIF search"))?;
        let limit = RESULT_LIMIT.to_string();

        let resp = self
            .http
            .get(format!("{}/v1/gifs/search", self.giphy_url))
            .query(&[
                ("api_key", key),
                ("q", query),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        let body: GiphyResponse = decode(resp).await?;
        debug!("GIF search '{}' returned {} results", query, body.data.len());

        Ok(body
            .data
            .into_iter()
            .map(|gif| {
                let preview_url = gif
                    .images
                    .fixed_height_small
                    .map(|small| small.url)
                    .unwrap_or_else(|| gif.images.fixed_height.url.clone());
                MediaResult {
                    url: gif.images.fixed_height.url,
                    preview_url,
                    media_type: MediaType::Image,
                }
            })
            .collect())
    }

    pub async fn images(&self, query: &str) -> BackendResult<Vec<MediaResult>> {
        let key = self
            .unsplash_key
            .as_deref()
            .ok_or(BackendError::NotConfigured("image search"))?;
        let per_page = RESULT_LIMIT.to_string();

        let resp = self
            .http
            .get(format!("{}/search/photos", self.unsplash_url))
            .query(&[("query", query), ("per_page", per_page.as_str())])
            .header("Authorization", format!("Client-ID {}", key))
            .send()
            .await?;
        let body: UnsplashResponse = decode(resp).await?;
        debug!("Image search '{}' returned {} results", query, body.results.len());

        Ok(body
            .results
            .into_iter()
            .map(|photo| MediaResult {
                url: photo.urls.regular,
                preview_url: photo.urls.thumb,
                media_type: MediaType::Image,
            })
            .collect())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> BackendResult<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(BackendError::Remote {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }
    Ok(serde_json::from_str(&body)?)
}
