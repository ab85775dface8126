use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;

pub type Params<'a> = [(&'a str, String)];

/// Raw HTTP capability the session client talks through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &Params<'_>) -> Result<String>;
    async fn post_form(&self, url: &str, form: &Params<'_>) -> Result<String>;
    async fn post_xml(&self, url: &str, body: String) -> Result<String>;
}

pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed building HTTP client")?;
        Ok(Self { http })
    }
}

async fn read_body(response: reqwest::Response, url: &str) -> Result<String> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("Failed reading response from {url}"))?;
    if !status.is_success() {
        bail!("HTTP {status} from {url}: {text}");
    }
    log::debug!("Response from {url}: {text}");
    Ok(text)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, query: &Params<'_>) -> Result<String> {
        log::debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed requesting {url}"))?;
        read_body(response, url).await
    }

    async fn post_form(&self, url: &str, form: &Params<'_>) -> Result<String> {
        log::debug!("POST {url}");
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Failed posting to {url}"))?;
        read_body(response, url).await
    }

    async fn post_xml(&self, url: &str, body: String) -> Result<String> {
        log::debug!("POST {url} (xml)");
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed posting to {url}"))?;
        read_body(response, url).await
    }
}
