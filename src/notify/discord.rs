use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::DiscordConfig;
use crate::models::{DegradedEvent, StockEvent, StockState};
use crate::notify::Notifier;
use crate::utils::error::{AppError, Result};

/// Sends stock and degraded notifications as Discord webhook embeds.
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    username: String,
    avatar_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .clone()
            .ok_or_else(|| AppError::Validation("Discord webhook_url is not configured".to_string()))?;

        Ok(Self {
            client: Client::new(),
            webhook_url,
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn embed_color(state: StockState) -> u32 {
        match state {
            StockState::InStock => 0x00ff00,    // Green: go buy it
            StockState::OutOfStock => 0xff0000, // Red
            _ => 0xff9900,                      // Orange for anything unusual
        }
    }

    fn stock_embed(&self, event: &StockEvent) -> serde_json::Value {
        let (emoji, headline) = match event.to_state {
            StockState::InStock => ("🎉", "Back in stock!"),
            _ => ("😞", "Sold out"),
        };

        json!({
            "title": format!("{} {}", emoji, event.display_name),
            "url": event.url,
            "color": Self::embed_color(event.to_state),
            "timestamp": event.occurred_at.to_rfc3339(),
            "fields": [
                {
                    "name": headline,
                    "value": format!("**Was:** {}\n**Now:** {}", event.from_state, event.to_state),
                    "inline": false
                },
                {
                    "name": "🔗 Product",
                    "value": format!("[Open product page]({})", event.url),
                    "inline": false
                }
            ],
            "footer": { "text": "Shelfwatch" }
        })
    }

    fn degraded_embed(&self, event: &DegradedEvent) -> serde_json::Value {
        json!({
            "title": format!("⚠️ Monitoring degraded: {}", event.display_name),
            "url": event.url,
            "color": 0xff9900u32,
            "timestamp": event.occurred_at.to_rfc3339(),
            "description": format!(
                "{} consecutive check failures.\nLast error: {}",
                event.consecutive_errors,
                event.last_error.as_deref().unwrap_or("unknown")
            ),
            "footer": { "text": "Shelfwatch" }
        })
    }

    fn webhook_payload(&self, embed: serde_json::Value) -> serde_json::Value {
        let mut payload = json!({
            "username": self.username,
            "embeds": [embed]
        });
        if let Some(avatar_url) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }
        payload
    }

    async fn post(&self, payload: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::NotifierDelivery(format!("webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::NotifierDelivery(format!(
                "webhook returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify_stock(&self, event: &StockEvent) -> Result<()> {
        self.post(self.webhook_payload(self.stock_embed(event))).await
    }

    async fn notify_degraded(&self, event: &DegradedEvent) -> Result<()> {
        self.post(self.webhook_payload(self.degraded_embed(event))).await
    }
}
