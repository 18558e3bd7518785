//! Browser-free page loading: plain GET plus CSS selection over the
//! server-rendered markup. XPath rules never match here.

use crate::browser::PageLoader;
use crate::error::{EnrichError, Result};
use crate::extractor::{Document, Locator};
use ::scraper::{Html, Selector};
use log::{debug, warn};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use std::time::Duration;

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| EnrichError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(HttpLoader { client })
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }
}

impl PageLoader for HttpLoader {
    type Page = HtmlDocument;

    fn navigate(&mut self, url: &str) -> Result<HtmlDocument> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .send()
            .map_err(|e| EnrichError::navigation(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichError::navigation(url, format!("HTTP {}", status)));
        }
        let body = resp.text().map_err(|e| EnrichError::navigation(url, e))?;
        Ok(HtmlDocument::parse(&body))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct HtmlDocument {
    html: Html,
}

impl HtmlDocument {
    pub fn parse(body: &str) -> Self {
        HtmlDocument {
            html: Html::parse_document(body),
        }
    }
}

impl Document for HtmlDocument {
    fn find_text(&self, locator: &Locator) -> Result<Option<String>> {
        let css = match locator {
            Locator::Css(css) => css,
            Locator::Xpath(_) => {
                debug!("XPath {} skipped without a browser", locator);
                return Ok(None);
            }
        };
        let selector = match Selector::parse(css) {
            Ok(s) => s,
            Err(e) => {
                warn!("Invalid CSS selector '{}': {:?}", css, e);
                return Ok(None);
            }
        };
        Ok(self.html.select(&selector).next().map(|el| {
            let raw = el.text().collect::<Vec<_>>().join(" ");
            raw.split_whitespace().collect::<Vec<_>>().join(" ")
        }))
    }

    fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.html
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    }
}
