//! Recitals of the regulation page.
//!
//! Each recital is an `<h4>` holding its number as `(N)`, followed somewhere
//! among its siblings by the `<p>` holding the text.

use anyhow::Result;
use scraper::Html;

use super::html::{element_text, next_element_siblings, selector};
use crate::models::Recital;

pub fn parse_recitals(html: &str) -> Result<Vec<Recital>> {
    let document = Html::parse_document(html);
    let headings = selector("h4")?;

    let mut recitals = Vec::new();
    for heading in document.select(&headings) {
        let number = unwrap_number(&element_text(heading));

        let paragraph = next_element_siblings(heading).find(|s| s.value().name() == "p");
        if let Some(p) = paragraph {
            recitals.push(Recital {
                number,
                text: element_text(p),
            });
        }
    }

    Ok(recitals)
}

/// `"(12)"` becomes `"12"`; anything else is kept as printed.
fn unwrap_number(raw: &str) -> String {
    raw.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .filter(|inner| !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(raw)
        .to_string()
}
