use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, Element, Tab};
use tracing::{debug, info, warn};

use charla_core::config::BrowserConfig;

use crate::error::{DriverError, Result};
use crate::selectors;
use crate::session::{self, ProfileLock};
use crate::surface::{ChatSurface, InboxEntry, IncomingMessage};

/// Settle time after clicking a chat row.
const OPEN_SETTLE: Duration = Duration::from_millis(1500);
/// Settle time after typing a search query.
const SEARCH_SETTLE: Duration = Duration::from_millis(2000);

/// The live WhatsApp Web driver: one persistent browser context, one tab.
///
/// Every primitive blocks the calling thread; the orchestrator owns this
/// struct and serializes all DOM work through it.
pub struct WaDriver {
    browser: Browser,
    tab: Arc<Tab>,
    _lock: ProfileLock,
}

impl WaDriver {
    /// Acquire the profile, launch the browser and navigate to WhatsApp Web.
    pub fn launch(cfg: &BrowserConfig) -> Result<Self> {
        let lock = ProfileLock::acquire(Path::new(&cfg.user_data_dir))?;
        let (browser, tab) = session::launch(cfg)?;
        Ok(Self {
            browser,
            tab,
            _lock: lock,
        })
    }

    /// Close the session. With `keep_browser_open` the browser process is
    /// left running for operator inspection; only the profile lock is
    /// released.
    pub fn shutdown(self, keep_browser_open: bool) {
        let WaDriver {
            browser,
            tab,
            _lock,
        } = self;
        drop(tab);
        if keep_browser_open {
            info!("leaving browser context running");
            std::mem::forget(browser);
        }
    }

    /// First element matching any selector in the list, logging which one hit.
    fn first_match(&self, candidates: &[&str], operation: &'static str) -> Result<Element<'_>> {
        for sel in candidates {
            if let Ok(el) = self.tab.find_element(sel) {
                debug!(selector = sel, operation, "selector matched");
                return Ok(el);
            }
        }
        Err(DriverError::SelectorMissed { operation })
    }

    fn composer(&self) -> Result<Element<'_>> {
        self.first_match(selectors::COMPOSER, "composer")
    }

    fn chat_is_open(&self) -> bool {
        selectors::CHAT_OPEN_INDICATORS
            .iter()
            .any(|sel| self.tab.find_element(sel).is_ok())
    }

    /// Clear the search overlay. Used on every return path of
    /// `find_and_open_chat` so a failed search never poisons the next tick.
    fn close_search(&self) {
        for sel in selectors::SEARCH_CLOSE {
            if let Ok(el) = self.tab.find_element(sel) {
                if el.click().is_ok() {
                    debug!(selector = sel, "search closed");
                    return;
                }
            }
        }
        if let Ok(el) = self.tab.find_element(selectors::CHAT_LIST) {
            let _ = el.click();
        }
    }

    fn chat_rows(&self) -> Result<Vec<Element<'_>>> {
        self.tab
            .wait_for_element(selectors::PANE_SIDE)
            .map_err(|e| DriverError::NotReady(e.to_string()))?;
        for sel in selectors::CHAT_ROWS {
            match self.tab.find_elements(sel) {
                Ok(rows) if !rows.is_empty() => {
                    debug!(selector = sel, count = rows.len(), "chat rows located");
                    return Ok(rows);
                }
                _ => continue,
            }
        }
        Ok(Vec::new())
    }
}

impl ChatSurface for WaDriver {
    fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        self.tab
            .wait_for_element_with_custom_timeout(selectors::PANE_SIDE, timeout)
            .map_err(|e| DriverError::NotReady(e.to_string()))?;
        info!("conversation list visible");
        Ok(())
    }

    fn scan_inbox(&self) -> Result<Vec<InboxEntry>> {
        let mut entries = Vec::new();
        for row in self.chat_rows()? {
            let Some(unread) = row_unread(&row) else {
                continue;
            };
            let Some(chat_id) = row_title(&row) else {
                continue;
            };
            debug!(chat = %chat_id, unread, "unread badge");
            entries.push(InboxEntry { chat_id, unread });
        }
        Ok(entries)
    }

    fn open_chat(&self, chat_id: &str) -> Result<()> {
        for row in self.chat_rows()? {
            if row_title(&row).as_deref() == Some(chat_id) {
                row.click().map_err(DriverError::browser)?;
                std::thread::sleep(OPEN_SETTLE);
                if self.chat_is_open() {
                    debug!(chat = %chat_id, "chat opened");
                    return Ok(());
                }
                return Err(DriverError::SelectorMissed {
                    operation: "open_chat",
                });
            }
        }
        Err(DriverError::SelectorMissed {
            operation: "open_chat",
        })
    }

    fn read_last_incoming(&self) -> Result<Option<IncomingMessage>> {
        let mut containers = Vec::new();
        for sel in selectors::MESSAGE_CONTAINERS {
            if let Ok(found) = self.tab.find_elements(sel) {
                if !found.is_empty() {
                    containers = found;
                    break;
                }
            }
        }
        let Some(last) = containers.into_iter().last() else {
            return Ok(None);
        };

        // Direction from DOM markers only.
        let mut from_us = selectors::OUTGOING_MARKERS
            .iter()
            .any(|sel| last.find_element(sel).is_ok());
        if !from_us {
            if let Ok(Some(class)) = last.get_attribute_value("class") {
                from_us = class.contains("message-out");
            }
        }

        let text = last
            .find_element(selectors::MESSAGE_TEXT)
            .ok()
            .and_then(|el| el.get_inner_text().ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Some(IncomingMessage { from_us, text }))
    }

    fn type_and_send(&self, text: &str, per_char_delay: Duration) -> Result<()> {
        let composer = self
            .composer()
            .map_err(|_| DriverError::SendFailed("composer not found".into()))?;
        composer
            .click()
            .map_err(|e| DriverError::SendFailed(e.to_string()))?;

        for ch in text.chars() {
            self.tab
                .type_str(&ch.to_string())
                .map_err(|e| DriverError::SendFailed(e.to_string()))?;
            std::thread::sleep(per_char_delay);
        }
        self.tab
            .press_key("Enter")
            .map_err(|e| DriverError::SendFailed(e.to_string()))?;
        std::thread::sleep(Duration::from_millis(500));
        info!(chars = text.chars().count(), "message sent");
        Ok(())
    }

    fn exit_chat(&self) -> Result<()> {
        let _ = self.tab.press_key("Escape");
        std::thread::sleep(Duration::from_millis(200));

        // Auxiliary tab round trip knocks WhatsApp out of composing state;
        // fall back to clicking the list pane.
        let round_trip = (|| -> std::result::Result<(), anyhow::Error> {
            self.tab.find_element(selectors::STATUS_TAB)?.click()?;
            std::thread::sleep(Duration::from_millis(400));
            self.tab.find_element(selectors::CHATS_TAB)?.click()?;
            Ok(())
        })();
        if round_trip.is_err() {
            if let Ok(pane) = self.tab.find_element(selectors::PANE_SIDE) {
                let _ = pane.click();
            }
        }

        // The composer must not keep focus once we are back on the list.
        if self.composer().is_ok() {
            let _ = self.tab.press_key("Escape");
            debug!("extra Escape after composer still present");
        }
        Ok(())
    }

    fn find_and_open_chat(&self, chat_id: &str) -> Result<()> {
        self.exit_chat()?;
        std::thread::sleep(Duration::from_millis(1000));

        self.first_match(selectors::SEARCH_BOX, "search")?
            .click()
            .map_err(DriverError::browser)?;
        std::thread::sleep(Duration::from_millis(500));

        let input = self.first_match(selectors::SEARCH_INPUT, "search_input")?;
        input.click().map_err(DriverError::browser)?;
        self.tab.type_str(chat_id).map_err(DriverError::browser)?;
        std::thread::sleep(SEARCH_SETTLE);

        // Strategy 1: Enter opens the top result.
        let _ = self.tab.press_key("Enter");
        std::thread::sleep(OPEN_SETTLE);
        if self.chat_is_open() {
            debug!(chat = %chat_id, "search opened chat via Enter");
            self.close_search();
            return Ok(());
        }

        // Strategy 2: click the first result, escalating through click
        // styles (plain, repeated, JS) per result selector.
        for sel in selectors::SEARCH_RESULTS {
            let Ok(results) = self.tab.find_elements(sel) else {
                continue;
            };
            let Some(first) = results.first() else {
                continue;
            };

            let mut clicked = first.click().is_ok();
            if !clicked {
                // Double click covers rows that ignore a single tap.
                std::thread::sleep(Duration::from_millis(150));
                clicked = first.click().is_ok() && first.click().is_ok();
            }
            if !clicked {
                clicked = self
                    .tab
                    .evaluate(
                        &format!(r#"document.querySelector("{sel}")?.click()"#),
                        false,
                    )
                    .is_ok();
            }

            if clicked {
                std::thread::sleep(SEARCH_SETTLE);
                if self.chat_is_open() {
                    debug!(chat = %chat_id, selector = sel, "search opened chat via click");
                    self.close_search();
                    return Ok(());
                }
            }
        }

        warn!(chat = %chat_id, "search could not open the chat");
        self.close_search();
        Err(DriverError::SelectorMissed {
            operation: "find_and_open_chat",
        })
    }
}

/// A row is unread iff some span holds a positive integer badge. "•", muted
/// markers and empty spans never count.
fn row_unread(row: &Element<'_>) -> Option<u32> {
    let spans = row.find_elements("span").ok()?;
    for span in spans {
        if let Ok(text) = span.get_inner_text() {
            if let Some(n) = parse_badge(&text) {
                return Some(n);
            }
        }
    }
    None
}

fn row_title(row: &Element<'_>) -> Option<String> {
    for sel in selectors::ROW_TITLE {
        if let Ok(el) = row.find_element(sel) {
            if let Ok(Some(title)) = el.get_attribute_value("title") {
                let title = title.trim();
                if !title.is_empty() {
                    return Some(title.to_string());
                }
            }
            if let Ok(text) = el.get_inner_text() {
                let text = text.trim();
                if text.len() > 3 {
                    return Some(text.to_string());
                }
            }
        }
    }
    None
}

/// Parse a visible badge into a positive unread count.
fn parse_badge(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match trimmed.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_badges_parse() {
        assert_eq!(parse_badge("3"), Some(3));
        assert_eq!(parse_badge(" 12 "), Some(12));
    }

    #[test]
    fn non_numeric_badges_are_ignored() {
        assert_eq!(parse_badge("•"), None);
        assert_eq!(parse_badge(""), None);
        assert_eq!(parse_badge("nuevo"), None);
        assert_eq!(parse_badge("3 mensajes"), None);
    }

    #[test]
    fn zero_badge_is_not_unread() {
        assert_eq!(parse_badge("0"), None);
    }
}
