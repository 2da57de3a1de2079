use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::normalize::{date_in_text, normalize_date};

pub fn parse_selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Skipping invalid selector '{}': {:?}", raw, e);
            None
        }
    }
}

/// Text of an element without script/style content, whitespace collapsed.
pub fn visible_text(element: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style" | "noscript")))
            .unwrap_or(false);
        if !hidden {
            parts.extend(text.split_whitespace());
        }
    }
    parts.join(" ")
}

/// Elements matched by the first selector in the cascade that matches anything.
pub fn first_matching<'a>(document: &'a Html, cascade: &[String]) -> Vec<ElementRef<'a>> {
    for raw in cascade {
        let Some(selector) = parse_selector(raw) else {
            continue;
        };
        let found: Vec<ElementRef<'a>> = document.select(&selector).collect();
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

/// Non-empty text of the first element matched by the cascade, searched under `root`.
pub fn first_text_within(root: ElementRef<'_>, cascade: &[String]) -> Option<String> {
    cascade.iter().filter_map(|raw| parse_selector(raw)).find_map(|selector| {
        root.select(&selector)
            .map(visible_text)
            .find(|text| !text.is_empty())
    })
}

pub fn first_text(document: &Html, cascade: &[String]) -> Option<String> {
    first_text_within(document.root_element(), cascade)
}

/// First `href` found under `root` by the cascade.
pub fn first_href(root: ElementRef<'_>, cascade: &[String]) -> Option<String> {
    cascade.iter().filter_map(|raw| parse_selector(raw)).find_map(|selector| {
        root.select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .find(|href| !href.is_empty() && !href.starts_with('#'))
            .map(str::to_string)
    })
}

/// `content` of `<meta {attr}="{value}">`.
pub fn meta_content(document: &Html, attr: &str, value: &str) -> Option<String> {
    let selector = parse_selector(&format!("meta[{}=\"{}\"]", attr, value))?;
    document
        .select(&selector)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

pub fn page_title(document: &Html) -> Option<String> {
    meta_content(document, "property", "og:title").or_else(|| {
        let selector = parse_selector("title")?;
        document
            .select(&selector)
            .map(visible_text)
            .find(|t| !t.is_empty())
    })
}

pub fn site_name(document: &Html) -> Option<String> {
    meta_content(document, "property", "og:site_name")
}

/// First date found under `root` by the cascade, from `datetime` or element text.
pub fn first_date_within(root: ElementRef<'_>, cascade: &[String]) -> Option<NaiveDate> {
    cascade.iter().filter_map(|raw| parse_selector(raw)).find_map(|selector| {
        root.select(&selector).find_map(|element| {
            element
                .value()
                .attr("datetime")
                .and_then(normalize_date)
                .or_else(|| {
                    let text = visible_text(element);
                    normalize_date(&text).or_else(|| date_in_text(&text))
                })
        })
    })
}
