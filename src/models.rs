//! Core data models used throughout the harness.
//!
//! Scraped pages yield typed records ([`Recital`], [`ArticleParagraph`],
//! [`Sanction`]). Each record normalizes into a [`SourceItem`] through the
//! [`Record`] trait before it reaches the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Normalized item produced by a scrape target, ready for ingestion.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub metadata_json: String,
    pub scraped_at: DateTime<Utc>,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A document-level search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// A recital ("considérant") from the preamble of the regulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recital {
    /// Recital number as printed, with surrounding parentheses removed.
    pub number: String,
    pub text: String,
}

impl Recital {
    pub fn label(&self) -> String {
        format!("Preambule du RGPD {}", self.number)
    }
}

/// Link to one chapter page of the regulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub title: String,
    pub url: String,
}

/// One paragraph (or list item) of an article, optionally with a quoted
/// sub-paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleParagraph {
    pub chapter: String,
    pub article: String,
    pub paragraph: String,
    pub sub_paragraph: Option<String>,
    /// Position of this record within its article, starting at 0.
    pub position: usize,
}

/// A sanction pronounced by the CNIL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Sanction {
    pub date: String,
    pub organization_type: String,
    pub breach: String,
    pub sanction: String,
}

impl Sanction {
    /// Aligns a table row onto the four sanction columns. Missing cells
    /// become empty strings; extra cells are ignored.
    pub fn from_cells(cells: Vec<String>) -> Self {
        let mut cells = cells.into_iter();
        let mut next = || cells.next().unwrap_or_default();
        Self {
            date: next(),
            organization_type: next(),
            breach: next(),
            sanction: next(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.date.is_empty()
            && self.organization_type.is_empty()
            && self.breach.is_empty()
            && self.sanction.is_empty()
    }
}

/// Normalization of a scraped record into an indexable item.
pub trait Record {
    /// Machine source name stored in `documents.source`.
    const SOURCE: &'static str;
    /// Human label of the dataset.
    const LABEL: &'static str;

    /// Stable identifier, unique within [`Record::SOURCE`].
    fn source_id(&self) -> String;
    fn title(&self) -> String;
    /// Columns joined into the indexed text, in order.
    fn text_columns(&self) -> Vec<&str>;
    /// Columns kept as searchable metadata.
    fn metadata(&self) -> serde_json::Map<String, serde_json::Value>;

    fn body(&self) -> String {
        self.text_columns()
            .into_iter()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    fn to_source_item(&self, source_url: Option<&str>, scraped_at: DateTime<Utc>) -> SourceItem {
        let mut metadata = self.metadata();
        metadata.insert("source_label".to_string(), Self::LABEL.into());

        SourceItem {
            source: Self::SOURCE.to_string(),
            source_id: self.source_id(),
            source_url: source_url.map(str::to_string),
            title: Some(self.title()),
            body: self.body(),
            metadata_json: serde_json::Value::Object(metadata).to_string(),
            scraped_at,
        }
    }
}

impl Record for Recital {
    const SOURCE: &'static str = "recitals";
    const LABEL: &'static str = "RGPD";

    fn source_id(&self) -> String {
        format!("recital:{}", self.number)
    }

    fn title(&self) -> String {
        self.label()
    }

    fn text_columns(&self) -> Vec<&str> {
        vec![self.text.as_str()]
    }

    fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("numero_alinea".to_string(), self.label().into());
        m.insert("texte".to_string(), self.text.trim().into());
        m
    }

    fn body(&self) -> String {
        let text = self.text.trim();
        if text.is_empty() {
            self.label()
        } else {
            format!("{} - {}", self.label(), text)
        }
    }
}

impl Record for ArticleParagraph {
    const SOURCE: &'static str = "articles";
    const LABEL: &'static str = "Articles RGPD";

    /// Chapter-qualified, so equal article headings on two chapter pages
    /// stay distinct.
    fn source_id(&self) -> String {
        format!("{} / {}#{}", self.chapter, self.article, self.position)
    }

    fn title(&self) -> String {
        self.article.clone()
    }

    fn text_columns(&self) -> Vec<&str> {
        vec![
            self.chapter.as_str(),
            self.article.as_str(),
            self.paragraph.as_str(),
            self.sub_paragraph.as_deref().unwrap_or(""),
        ]
    }

    fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("chapitre".to_string(), self.chapter.clone().into());
        m.insert("article".to_string(), self.article.clone().into());
        m
    }
}

impl Record for Sanction {
    const SOURCE: &'static str = "sanctions";
    const LABEL: &'static str = "Sanctions CNIL";

    /// Content-addressed: identical rows collapse onto one document.
    fn source_id(&self) -> String {
        let mut hasher = Sha256::new();
        for column in self.text_columns() {
            hasher.update(column.as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("sanction:{}", &digest[..16])
    }

    fn title(&self) -> String {
        match (self.date.is_empty(), self.organization_type.is_empty()) {
            (false, false) => format!("{} - {}", self.date, self.organization_type),
            (false, true) => self.date.clone(),
            (true, false) => self.organization_type.clone(),
            (true, true) => "Sanction CNIL".to_string(),
        }
    }

    fn text_columns(&self) -> Vec<&str> {
        vec![
            self.date.as_str(),
            self.organization_type.as_str(),
            self.breach.as_str(),
            self.sanction.as_str(),
        ]
    }

    fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("date".to_string(), self.date.clone().into());
        m.insert(
            "type_organisme".to_string(),
            self.organization_type.clone().into(),
        );
        m.insert("manquement".to_string(), self.breach.clone().into());
        m.insert("sanction".to_string(), self.sanction.clone().into());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanction(date: &str) -> Sanction {
        Sanction {
            date: date.to_string(),
            organization_type: "Société".to_string(),
            breach: "Défaut de sécurité".to_string(),
            sanction: "Amende de 10 000 euros".to_string(),
        }
    }

    #[test]
    fn recital_body_starts_with_label() {
        let r = Recital {
            number: "12".to_string(),
            text: "Le présent règlement...".to_string(),
        };
        assert_eq!(r.source_id(), "recital:12");
        assert_eq!(r.body(), "Preambule du RGPD 12 - Le présent règlement...");
    }

    #[test]
    fn recital_metadata_keeps_label_and_text() {
        let r = Recital {
            number: "4".to_string(),
            text: " Le traitement des données devrait être conçu pour servir l'humanité. "
                .to_string(),
        };
        let item = r.to_source_item(None, Utc::now());
        let meta: serde_json::Value = serde_json::from_str(&item.metadata_json).unwrap();
        assert_eq!(meta["numero_alinea"], "Preambule du RGPD 4");
        assert_eq!(
            meta["texte"],
            "Le traitement des données devrait être conçu pour servir l'humanité."
        );
        assert_eq!(meta["source_label"], "RGPD");
    }

    #[test]
    fn article_body_skips_missing_sub_paragraph() {
        let a = ArticleParagraph {
            chapter: "Chapitre II".to_string(),
            article: "Article 5".to_string(),
            paragraph: "Les données doivent être traitées de manière licite.".to_string(),
            sub_paragraph: None,
            position: 0,
        };
        assert_eq!(
            a.body(),
            "Chapitre II - Article 5 - Les données doivent être traitées de manière licite."
        );
        assert_eq!(a.source_id(), "Chapitre II / Article 5#0");
    }

    #[test]
    fn same_article_heading_in_two_chapters_gets_two_ids() {
        let paragraph = |chapter: &str| ArticleParagraph {
            chapter: chapter.to_string(),
            article: "Article 1 - Objet".to_string(),
            paragraph: "Texte.".to_string(),
            sub_paragraph: None,
            position: 0,
        };
        assert_ne!(
            paragraph("Chapitre I").source_id(),
            paragraph("Chapitre IX").source_id()
        );
    }

    #[test]
    fn source_item_carries_label_and_metadata() {
        let item = sanction("12/01/2022").to_source_item(Some("https://example.org"), Utc::now());
        assert_eq!(item.source, "sanctions");
        let meta: serde_json::Value = serde_json::from_str(&item.metadata_json).unwrap();
        assert_eq!(meta["source_label"], "Sanctions CNIL");
        assert_eq!(meta["date"], "12/01/2022");
        assert_eq!(item.title.as_deref(), Some("12/01/2022 - Société"));
    }

    #[test]
    fn identical_sanctions_share_source_id() {
        assert_eq!(
            sanction("2021").source_id(),
            sanction("2021").source_id()
        );
        assert_ne!(
            sanction("2021").source_id(),
            sanction("2022").source_id()
        );
    }

    #[test]
    fn sanction_from_short_row_is_padded() {
        let s = Sanction::from_cells(vec!["2020".to_string(), "Mairie".to_string()]);
        assert_eq!(s.date, "2020");
        assert_eq!(s.organization_type, "Mairie");
        assert!(s.breach.is_empty());
        assert!(!s.is_blank());
        assert!(Sanction::from_cells(vec![]).is_blank());
    }
}
