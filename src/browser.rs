//! Automation session driving Chrome over the DevTools protocol.
//!
//! One session owns one browser and one page, so navigations are strictly
//! sequential. The async client runs on a runtime private to the session;
//! callers see a blocking API. The browser is closed on `close` or, failing
//! that, when the value is dropped.

use crate::delay_manager::{wait_until, WaitPolicy};
use crate::error::{EnrichError, Result};
use crate::extractor::{Document, Locator};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{SetDownloadBehaviorBehavior, SetDownloadBehaviorParams};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use log::{debug, info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Anything that can load a URL and hand back a page for extraction.
pub trait PageLoader {
    type Page: Document;

    fn navigate(&mut self, url: &str) -> Result<Self::Page>;

    /// Releases the loader. Called once, on every exit path.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Attach to a running browser's DevTools websocket instead of launching one.
    pub devtools_url: Option<String>,
    /// Chrome binary; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub disable_dev_shm: bool,
    /// Only used when the session downloads the seed CSV.
    pub download_dir: Option<PathBuf>,
    pub nav_timeout: Duration,
    /// Readiness polling after each navigation.
    pub ready: WaitPolicy,
    /// Element whose presence marks a detail page as rendered.
    pub ready_locator: Option<Locator>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        BrowserOptions {
            devtools_url: None,
            chrome_executable: None,
            headless: true,
            no_sandbox: true,
            disable_dev_shm: true,
            download_dir: None,
            nav_timeout: Duration::from_secs(30),
            ready: WaitPolicy::new(Duration::from_secs(5), Duration::from_millis(250)),
            ready_locator: None,
        }
    }
}

impl BrowserOptions {
    /// Extra command-line switches for a launched browser. Headless and
    /// sandbox modes go through the config builder instead.
    pub fn extra_args(&self) -> Vec<&'static str> {
        let mut args = Vec::new();
        if self.disable_dev_shm {
            args.push("--disable-dev-shm-usage");
        }
        args
    }

    fn launch_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.nav_timeout)
            .args(self.extra_args());
        if !self.headless {
            builder = builder.with_head();
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| EnrichError::navigation("chrome", format!("invalid browser config: {}", e)))
    }
}

pub struct ChromeSession {
    runtime: Runtime,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    options: BrowserOptions,
}

impl ChromeSession {
    pub fn open(options: BrowserOptions) -> Result<Self> {
        // One worker keeps the CDP event stream drained between blocking calls.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| EnrichError::navigation("chrome", e))?;

        let target = options.devtools_url.clone().unwrap_or_else(|| "chrome".to_string());
        let (mut browser, mut events) = match &options.devtools_url {
            Some(url) => runtime.block_on(Browser::connect(url.clone())),
            None => {
                let config = options.launch_config()?;
                runtime.block_on(Browser::launch(config))
            }
        }
        .map_err(|e| EnrichError::navigation(&target, format!("cannot start browser: {}", e)))?;

        let handler = runtime.spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
        });

        let page = runtime.block_on(async {
            if let Some(dir) = &options.download_dir {
                let params = SetDownloadBehaviorParams::builder()
                    .behavior(SetDownloadBehaviorBehavior::Allow)
                    .download_path(dir.to_string_lossy())
                    .build()
                    .map_err(CdpError::ChromeMessage)?;
                browser.execute(params).await?;
            }
            browser.new_page("about:blank").await
        });
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = runtime.block_on(browser.close()) {
                    warn!("Failed to close browser after setup error: {}", close_err);
                }
                handler.abort();
                return Err(EnrichError::navigation(&target, format!("cannot open page: {}", e)));
            }
        };

        info!("Opened browser session ({})", target);
        Ok(ChromeSession {
            runtime,
            browser: Some(browser),
            handler: Some(handler),
            page: Some(page),
            options,
        })
    }

    fn page(&self, url: &str) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| EnrichError::navigation(url, "session already closed"))
    }

    /// Runs one protocol call to completion, bounded by the navigation timeout.
    fn block<T, F>(&self, url: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, CdpError>>,
    {
        let limit = self.options.nav_timeout;
        match self.runtime.block_on(tokio::time::timeout(limit, fut)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EnrichError::navigation(url, e)),
            Err(_) => Err(EnrichError::navigation(url, format!("no response within {}s", limit.as_secs()))),
        }
    }

    /// Clicks the first element matching `locator`. `Ok(false)` when absent.
    pub fn click(&self, locator: &Locator) -> Result<bool> {
        let page = self.page("click")?;
        let url = locator.to_string();
        match locator {
            Locator::Css(selector) => self.block(&url, async {
                match page.find_elements(selector.as_str()).await?.into_iter().next() {
                    Some(element) => {
                        element.click().await?;
                        Ok::<_, CdpError>(true)
                    }
                    None => Ok(false),
                }
            }),
            Locator::Xpath(xpath) => {
                let script = format!(
                    "(() => {{ try {{ const n = {}; if (!n) return false; n.click(); return true; }} catch (e) {{ return false; }} }})()",
                    xpath_node(xpath)
                );
                self.block(&url, async { page.evaluate(script).await?.into_value::<bool>().map_err(CdpError::from) })
            }
        }
    }
}

impl PageLoader for ChromeSession {
    type Page = ChromePage;

    fn navigate(&mut self, url: &str) -> Result<ChromePage> {
        let page = self.page(url)?.clone();
        self.block(url, async { page.goto(url).await.map(|_| ()) })?;

        wait_until("document ready", self.options.ready, || {
            let state: String = self.block(url, async {
                page.evaluate("document.readyState").await?.into_value::<String>().map_err(CdpError::from)
            })?;
            Ok((state == "complete").then_some(()))
        })?;

        let doc = ChromePage {
            page,
            runtime: self.runtime.handle().clone(),
            url: url.to_string(),
        };
        if let Some(locator) = &self.options.ready_locator {
            let present = wait_until("detail content", self.options.ready, || {
                doc.find_text(locator).map(|found| found.map(|_| ()))
            });
            match present {
                Ok(()) => {}
                // Missing content is an extraction concern, not a navigation failure.
                Err(EnrichError::Timeout { .. }) => debug!("{} never appeared on {}", locator, url),
                Err(e) => return Err(e),
            }
        }
        Ok(doc)
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        let page = self.page.take();
        let attached = self.options.devtools_url.is_some();

        let result = self.runtime.block_on(async {
            if attached {
                // Leave a browser we did not start running; only drop our tab.
                return match page {
                    Some(page) => page.close().await,
                    None => Ok(()),
                };
            }
            browser.close().await?;
            if let Err(e) = browser.wait().await {
                debug!("Browser process did not exit cleanly: {}", e);
            }
            Ok::<(), CdpError>(())
        });
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        result.map_err(|e| EnrichError::navigation("chrome", e))?;
        info!("Closed browser session.");
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close browser session: {}", e);
        }
    }
}

/// The page currently loaded in a session.
pub struct ChromePage {
    page: Page,
    runtime: Handle,
    url: String,
}

impl ChromePage {
    fn block<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, CdpError>>,
    {
        self.runtime.block_on(fut).map_err(|e| EnrichError::navigation(&self.url, e))
    }
}

impl Document for ChromePage {
    fn find_text(&self, locator: &Locator) -> Result<Option<String>> {
        let text = match locator {
            Locator::Css(selector) => self.block(async {
                match page_first(&self.page, selector).await {
                    Ok(Some(element)) => element.inner_text().await,
                    Ok(None) | Err(CdpError::NotFound) => Ok(None),
                    Err(e) => Err(e),
                }
            })?,
            Locator::Xpath(xpath) => {
                let script = format!(
                    "(() => {{ try {{ const n = {}; return n ? (n.innerText || n.textContent || '') : ''; }} catch (e) {{ return ''; }} }})()",
                    xpath_node(xpath)
                );
                let text: String = self.block(async {
                    self.page.evaluate(script).await?.into_value::<String>().map_err(CdpError::from)
                })?;
                Some(text)
            }
        };
        Ok(text.filter(|t| !t.is_empty()))
    }

    fn title(&self) -> Option<String> {
        self.block(self.page.get_title()).ok().flatten()
    }
}

async fn page_first(page: &Page, selector: &str) -> std::result::Result<Option<chromiumoxide::Element>, CdpError> {
    Ok(page.find_elements(selector).await?.into_iter().next())
}

/// JavaScript expression evaluating to the first node matching `xpath`, or null.
fn xpath_node(xpath: &str) -> String {
    // A JSON string literal is a valid JavaScript string literal.
    let quoted = serde_json::Value::String(xpath.to_string()).to_string();
    format!(
        "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
        quoted
    )
}
