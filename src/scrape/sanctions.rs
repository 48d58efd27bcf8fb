//! CNIL sanctions page.
//!
//! The page carries two layouts of the same four-column table: the current
//! tables in `div.ctn-gen-body.js-zoom-wrapper.zoom-wrapper`, and yearly
//! sections in `div.ctn-gen-ascenseur` headed by
//! "Les sanctions prononcées en YYYY". Both are aligned onto [`Sanction`].

use anyhow::Result;
use scraper::Html;
use std::collections::HashSet;
use tracing::debug;

use super::html::{element_text, selector, table_rows};
use crate::models::Sanction;

const YEAR_HEADING_PREFIX: &str = "Les sanctions prononcées en ";

pub fn parse_sanction_tables(html: &str) -> Result<Vec<Sanction>> {
    let document = Html::parse_document(html);
    let wrappers = selector("div.ctn-gen-body.js-zoom-wrapper.zoom-wrapper")?;
    let tables = selector("table")?;

    let mut sanctions = Vec::new();
    for wrapper in document.select(&wrappers) {
        if let Some(table) = wrapper.select(&tables).next() {
            sanctions.extend(rows_to_sanctions(table_rows(table)?));
        }
    }
    Ok(sanctions)
}

pub fn parse_sanctions_by_year(html: &str, from_year: i32, to_year: i32) -> Result<Vec<Sanction>> {
    let document = Html::parse_document(html);
    let sections = selector("div.ctn-gen-ascenseur")?;
    let heading = selector("h2")?;
    let body = selector("div.ctn-gen-ascenseur-texte")?;
    let tables = selector("table")?;

    let mut sanctions = Vec::new();
    for section in document.select(&sections) {
        let Some(h2) = section.select(&heading).next() else {
            continue;
        };
        let Some(year) = heading_year(&element_text(h2)) else {
            continue;
        };
        if !(from_year..=to_year).contains(&year) {
            debug!(year, "skipping sanctions section outside year range");
            continue;
        }

        let table = section
            .select(&body)
            .next()
            .and_then(|container| container.select(&tables).next());
        if let Some(table) = table {
            sanctions.extend(rows_to_sanctions(table_rows(table)?));
        }
    }
    Ok(sanctions)
}

/// Concatenates both layouts, dropping exact duplicates. First occurrence
/// wins and order is preserved.
pub fn merge_sanctions(primary: Vec<Sanction>, yearly: Vec<Sanction>) -> Vec<Sanction> {
    let mut seen = HashSet::new();
    primary
        .into_iter()
        .chain(yearly)
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn heading_year(heading: &str) -> Option<i32> {
    let year = heading.strip_prefix(YEAR_HEADING_PREFIX).unwrap_or(heading).trim();
    if year.is_empty() || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    year.parse().ok()
}

fn rows_to_sanctions(rows: Vec<Vec<String>>) -> impl Iterator<Item = Sanction> {
    rows.into_iter()
        .map(Sanction::from_cells)
        .filter(|s| !s.is_blank())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <div class="ctn-gen-body js-zoom-wrapper zoom-wrapper">
            <table>
                <thead><tr><th>Date</th><th>Type</th><th>Manquement</th><th>Sanction</th></tr></thead>
                <tbody>
                    <tr><td>12/01/2024</td><td>Société</td><td>Défaut de sécurité</td><td>Amende de 50 000 euros</td></tr>
                    <tr><td></td><td></td><td></td><td></td></tr>
                    <tr><td>03/02/2024</td><td>Association</td><td>Durée de conservation</td></tr>
                </tbody>
            </table>
        </div>
        <div class="ctn-gen-ascenseur">
            <h2>Les sanctions prononcées en 2022</h2>
            <div class="ctn-gen-ascenseur-texte">
                <table><tbody>
                    <tr><td>05/05/2022</td><td>Commune</td><td>Vidéosurveillance</td><td>Rappel à l'ordre</td></tr>
                </tbody></table>
            </div>
        </div>
        <div class="ctn-gen-ascenseur">
            <h2>Les sanctions prononcées en 2017</h2>
            <div class="ctn-gen-ascenseur-texte">
                <table><tbody>
                    <tr><td>01/01/2017</td><td>Société</td><td>Cookies</td><td>Amende</td></tr>
                </tbody></table>
            </div>
        </div>
        <div class="ctn-gen-ascenseur">
            <h2>Archives</h2>
        </div>
        </body></html>
    "#;

    #[test]
    fn main_tables_skip_blank_rows_and_pad_short_ones() {
        let sanctions = parse_sanction_tables(PAGE).unwrap();
        assert_eq!(sanctions.len(), 2);
        assert_eq!(sanctions[0].date, "12/01/2024");
        assert_eq!(sanctions[0].sanction, "Amende de 50 000 euros");
        assert_eq!(sanctions[1].organization_type, "Association");
        assert_eq!(sanctions[1].sanction, "");
    }

    #[test]
    fn yearly_sections_respect_range() {
        let sanctions = parse_sanctions_by_year(PAGE, 2019, 2023).unwrap();
        assert_eq!(sanctions.len(), 1);
        assert_eq!(sanctions[0].organization_type, "Commune");
        assert_eq!(sanctions[0].sanction, "Rappel à l'ordre");

        let all = parse_sanctions_by_year(PAGE, 2000, 2030).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn merge_drops_exact_duplicates_in_order() {
        let a = Sanction::from_cells(vec!["1".into(), "a".into()]);
        let b = Sanction::from_cells(vec!["2".into(), "b".into()]);
        let merged = merge_sanctions(vec![a.clone(), b.clone()], vec![a.clone(), b.clone(), a]);
        assert_eq!(merged, vec![
            Sanction::from_cells(vec!["1".into(), "a".into()]),
            b,
        ]);
    }

    #[test]
    fn heading_year_requires_digits() {
        assert_eq!(heading_year("Les sanctions prononcées en 2021"), Some(2021));
        assert_eq!(heading_year("Archives"), None);
        assert_eq!(heading_year("Les sanctions prononcées en 2021 et 2022"), None);
    }
}
