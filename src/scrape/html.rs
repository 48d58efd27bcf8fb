//! Small helpers over the `scraper` DOM shared by the page parsers.

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Selector};

/// Parses a CSS selector, turning the parser's error into an `anyhow` error.
pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

/// Text content of an element: all descendant text nodes concatenated,
/// whitespace collapsed to single spaces and trimmed.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Element siblings following `element`, in document order.
pub fn next_element_siblings<'a>(
    element: ElementRef<'a>,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    element.next_siblings().filter_map(ElementRef::wrap)
}

/// Direct element children of `element` with the given tag name.
pub fn child_elements<'a>(
    element: ElementRef<'a>,
    tag: &'a str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |child| child.value().name() == tag)
}

/// Cell texts of every body row of `table`.
pub fn table_rows(table: ElementRef<'_>) -> Result<Vec<Vec<String>>> {
    let rows = selector("tbody tr")?;
    let cells = selector("td")?;

    Ok(table
        .select(&rows)
        .map(|row| row.select(&cells).map(element_text).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn text_is_collapsed_across_inline_tags() {
        let doc = Html::parse_fragment("<p>  Le <em>responsable</em>\n  du traitement </p>");
        let p = doc.select(&selector("p").unwrap()).next().unwrap();
        assert_eq!(element_text(p), "Le responsable du traitement");
    }

    #[test]
    fn siblings_skip_text_nodes() {
        let doc = Html::parse_fragment("<div><h4>(1)</h4> text <span>x</span><p>body</p></div>");
        let h4 = doc.select(&selector("h4").unwrap()).next().unwrap();
        let names: Vec<&str> = next_element_siblings(h4)
            .map(|e| e.value().name())
            .collect();
        assert_eq!(names, vec!["span", "p"]);
    }

    #[test]
    fn table_rows_read_implicit_tbody() {
        let doc = Html::parse_document(
            "<table><tr><td>a</td><td> b </td></tr><tr><td>c</td></tr></table>",
        );
        let table = doc.select(&selector("table").unwrap()).next().unwrap();
        let rows = table_rows(table).unwrap();
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c"]]);
    }
}
