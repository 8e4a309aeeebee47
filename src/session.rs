use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::config::RendererConfig;
use crate::utils::error::{AppError, Result};

/// What a rendered page reports about its add-to-cart control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlProbe {
    pub present: bool,
    pub enabled: bool,
}

impl ControlProbe {
    pub const ABSENT: ControlProbe = ControlProbe {
        present: false,
        enabled: false,
    };
}

/// How to recognize the purchase control on a product page: known button
/// classes, text keywords for purchasable and sold-out states, and class
/// fragments that mark a button as sold out even when its label looks
/// purchasable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorProfile {
    pub add_button_classes: Vec<String>,
    pub sold_out_class_fragments: Vec<String>,
    pub available_keywords: Vec<String>,
    pub sold_out_keywords: Vec<String>,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            add_button_classes: vec![
                "index_usBtn__2KlEx".to_string(),
                "index_btnFull__F7k90".to_string(),
            ],
            sold_out_class_fragments: vec![
                "index_red__kx6Ql".to_string(),
                "index_soldOut__".to_string(),
            ],
            available_keywords: vec![
                "add to bag".to_string(),
                "add to cart".to_string(),
                "buy now".to_string(),
                "purchase".to_string(),
                "in stock".to_string(),
                "add to shopping bag".to_string(),
                "add to my bag".to_string(),
            ],
            sold_out_keywords: vec![
                "sold out".to_string(),
                "out of stock".to_string(),
                "currently unavailable".to_string(),
                "not available".to_string(),
                "notify me".to_string(),
                "coming soon".to_string(),
                "temporarily unavailable".to_string(),
                "email when available".to_string(),
            ],
        }
    }
}

/// A stateful handle able to load a page and report on its rendered content.
/// Exclusively owned by the pool; leased one holder at a time.
#[async_trait]
pub trait RenderSession: Send {
    /// Navigates to `url` and waits until the DOM is minimally interactive.
    /// Full resource completion is not awaited.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Inspects the current page for the purchase control.
    async fn query_control(&mut self, profile: &SelectorProfile) -> Result<ControlProbe>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn RenderSession>>;
}

/// Classifies rendered markup against a selector profile.
///
/// Mirrors the page heuristics of the site being watched: a known add button
/// (or any control with a purchasable label) that is not disabled and not
/// carrying a sold-out class means the control is present and enabled; a
/// sold-out label or a disabled purchasable control means present but
/// disabled.
pub fn classify_markup(html: &str, profile: &SelectorProfile) -> ControlProbe {
    let document = Html::parse_document(html);
    // Infallible for this literal selector list.
    let controls = Selector::parse("button, div, a, span").unwrap();

    let mut disabled_control_seen = false;

    for element in document.select(&controls) {
        let text = element
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_lowercase();
        if text.is_empty() || text.len() > 120 {
            continue;
        }

        let classes: Vec<&str> = element.value().classes().collect();
        let is_known_button = classes
            .iter()
            .any(|c| profile.add_button_classes.iter().any(|known| c == known));
        let looks_purchasable = profile
            .available_keywords
            .iter()
            .any(|keyword| text.contains(keyword.as_str()));

        if is_known_button || looks_purchasable {
            let sold_out_class = classes.iter().any(|c| {
                profile
                    .sold_out_class_fragments
                    .iter()
                    .any(|fragment| c.starts_with(fragment.as_str()))
            });
            let disabled = element.value().attr("disabled").is_some()
                || classes.iter().any(|c| c.to_lowercase().contains("disabled"));
            let sold_out_label = profile
                .sold_out_keywords
                .iter()
                .any(|keyword| text.contains(keyword.as_str()));

            if sold_out_class || disabled || sold_out_label {
                disabled_control_seen = true;
                continue;
            }

            return ControlProbe {
                present: true,
                enabled: true,
            };
        }

        if profile
            .sold_out_keywords
            .iter()
            .any(|keyword| text.contains(keyword.as_str()))
        {
            disabled_control_seen = true;
        }
    }

    if disabled_control_seen {
        ControlProbe {
            present: true,
            enabled: false,
        }
    } else {
        ControlProbe::ABSENT
    }
}

/// Render session backed by a dedicated headless Chrome instance.
///
/// Image and remote-font loading is disabled at construction so each check
/// only pays for markup and script execution.
pub struct ChromeRenderSession {
    // Keeps the Chrome process alive for the lifetime of the session.
    _browser: Browser,
    tab: Arc<Tab>,
}

#[async_trait]
impl RenderSession for ChromeRenderSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        let url = url.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)
                .map_err(|e| AppError::Render(format!("navigation failed: {}", e)))?;

            // Eager load strategy: the page is usable once the DOM is
            // interactive, without waiting for full resource completion.
            // Bounded so the thread cannot outlive a cancelled check.
            let deadline = std::time::Instant::now() + Duration::from_secs(60);
            loop {
                let ready_state = tab
                    .evaluate("document.readyState", false)
                    .ok()
                    .and_then(|object| object.value)
                    .and_then(|value| value.as_str().map(str::to_string))
                    .unwrap_or_default();

                if ready_state == "interactive" || ready_state == "complete" {
                    return Ok(());
                }
                if std::time::Instant::now() >= deadline {
                    return Err(AppError::Render("page never became interactive".to_string()));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })
        .await
        .map_err(|e| AppError::Render(format!("navigation task panicked: {}", e)))?
    }

    async fn query_control(&mut self, profile: &SelectorProfile) -> Result<ControlProbe> {
        let tab = Arc::clone(&self.tab);
        let profile = profile.clone();

        tokio::task::spawn_blocking(move || -> Result<ControlProbe> {
            let html = tab
                .get_content()
                .map_err(|e| AppError::Render(format!("failed to get page content: {}", e)))?;
            Ok(classify_markup(&html, &profile))
        })
        .await
        .map_err(|e| AppError::Render(format!("query task panicked: {}", e)))?
    }
}

/// Creates Chrome-backed sessions. One browser process per session keeps
/// leases fully isolated from each other.
pub struct ChromeSessionFactory {
    config: RendererConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    fn launch(config: &RendererConfig) -> Result<ChromeRenderSession> {
        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-extensions"),
            OsStr::new("--disable-background-timer-throttling"),
        ];
        if !config.load_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
            args.push(OsStr::new("--disable-remote-fonts"));
        }

        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(args)
            .build()
            .map_err(|e| AppError::Render(format!("failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::Render(format!("failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Render(format!("failed to create tab: {}", e)))?;
        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| AppError::Render(format!("failed to set user agent: {}", e)))?;

        Ok(ChromeRenderSession {
            _browser: browser,
            tab,
        })
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn create(&self) -> Result<Box<dyn RenderSession>> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || Self::launch(&config))
            .await
            .map_err(|e| AppError::Render(format!("launch task panicked: {}", e)))??;
        Ok(Box::new(session))
    }
}
