//! Chapter index and article pages of the regulation.
//!
//! The regulation page lists chapters in `div.chiffre`. Each chapter page
//! holds its articles as `<h3>` headings followed by sibling `<p>`, `<ol>`
//! and `<blockquote>` elements up to the next `<h3>`.

use anyhow::Result;
use scraper::{ElementRef, Html};
use tracing::warn;
use url::Url;

use super::html::{
    child_elements, collapse_whitespace, element_text, next_element_siblings, selector,
};
use crate::models::{ArticleParagraph, ChapterLink};

/// Paragraphs starting with these prefixes are structural headings, not text.
const HEADING_PREFIXES: [&str; 2] = ["CHAPITRE", "Section"];

pub fn parse_chapter_links(html: &str, base_url: &str) -> Result<Vec<ChapterLink>> {
    let document = Html::parse_document(html);
    let container = match document.select(&selector("div.chiffre")?).next() {
        Some(div) => div,
        None => {
            warn!("no div.chiffre on regulation page, no chapters found");
            return Ok(Vec::new());
        }
    };

    let paragraphs = selector("p")?;
    let anchors = selector("a[href]")?;
    let base = Url::parse(base_url).ok();

    let mut chapters = Vec::new();
    for p in container.select(&paragraphs) {
        if p.value().attr("class").is_some() {
            continue;
        }
        let Some(anchor) = p.select(&anchors).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default();
        chapters.push(ChapterLink {
            title: element_text(anchor),
            url: absolutize(base.as_ref(), base_url, href),
        });
    }

    Ok(chapters)
}

fn absolutize(base: Option<&Url>, base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => format!("{}{}", base_url.trim_end_matches('/'), href),
    }
}

pub fn parse_articles(chapter: &str, html: &str) -> Result<Vec<ArticleParagraph>> {
    let document = Html::parse_document(html);
    let headings = selector("h3")?;

    let mut records = Vec::new();
    for heading in document.select(&headings) {
        let mut article = ArticleBuilder::new(chapter, element_text(heading));

        for sibling in next_element_siblings(heading) {
            match sibling.value().name() {
                "h3" => break,
                "ol" => {
                    article.flush();
                    article.items = child_elements(sibling, "li").map(element_text).collect();
                }
                "p" => {
                    let text = element_text(sibling);
                    if text.is_empty() || HEADING_PREFIXES.iter().any(|h| text.starts_with(h)) {
                        continue;
                    }
                    article.paragraphs.push(text);
                }
                "blockquote" => article.quote(blockquote_texts(sibling)),
                _ => article.flush(),
            }
        }

        article.flush();
        records.extend(article.records);
    }

    Ok(records)
}

/// Direct text nodes and direct `<p>` children of a blockquote, in order.
fn blockquote_texts(blockquote: ElementRef<'_>) -> Vec<String> {
    let mut texts = Vec::new();
    for child in blockquote.children() {
        let text = if let Some(text) = child.value().as_text() {
            collapse_whitespace(text)
        } else if let Some(p) = ElementRef::wrap(child).filter(|el| el.value().name() == "p") {
            element_text(p)
        } else {
            continue;
        };
        if !text.is_empty() {
            texts.push(text);
        }
    }
    texts
}

/// Pending list items and paragraphs of the article being walked.
struct ArticleBuilder<'c> {
    chapter: &'c str,
    article: String,
    items: Vec<String>,
    paragraphs: Vec<String>,
    records: Vec<ArticleParagraph>,
}

impl<'c> ArticleBuilder<'c> {
    fn new(chapter: &'c str, article: String) -> Self {
        Self {
            chapter,
            article,
            items: Vec::new(),
            paragraphs: Vec::new(),
            records: Vec::new(),
        }
    }

    fn emit(&mut self, paragraph: String, sub_paragraph: Option<String>) {
        let position = self.records.len();
        self.records.push(ArticleParagraph {
            chapter: self.chapter.to_string(),
            article: self.article.clone(),
            paragraph,
            sub_paragraph,
            position,
        });
    }

    /// Emits pending list items one record each, then pending paragraphs
    /// joined into one record.
    fn flush(&mut self) {
        for item in std::mem::take(&mut self.items) {
            self.emit(item, None);
        }
        if !self.paragraphs.is_empty() {
            let joined = std::mem::take(&mut self.paragraphs).join(" ");
            self.emit(joined, None);
        }
    }

    /// Attaches quoted texts as sub-paragraphs of the last pending list item,
    /// or of the pending paragraph text when no list is pending.
    fn quote(&mut self, quotes: Vec<String>) {
        if quotes.is_empty() {
            return;
        }

        if let Some(last) = self.items.pop() {
            for item in std::mem::take(&mut self.items) {
                self.emit(item, None);
            }
            for quote in quotes {
                self.emit(last.clone(), Some(quote));
            }
        } else if !self.paragraphs.is_empty() {
            let joined = std::mem::take(&mut self.paragraphs).join(" ");
            for quote in quotes {
                self.emit(joined.clone(), Some(quote));
            }
        } else {
            for quote in quotes {
                self.emit(quote, None);
            }
        }
        // Paragraphs pending alongside a list come out after it.
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
        <html><body>
        <div class="chiffre">
            <p class="intro"><a href="/fr/ignored">Intro</a></p>
            <p><a href="/fr/reglement-europeen-protection-donnees/chapitre1">Chapitre I - Dispositions générales</a></p>
            <p>Pas de lien ici</p>
            <p><a href="https://other.example/chapitre2">Chapitre II - Principes</a></p>
        </div>
        </body></html>
    "#;

    const CHAPTER: &str = r#"
        <html><body><div class="content">
            <p>CHAPITRE II</p>
            <h3>Article 5 - Principes relatifs au traitement</h3>
            <ol>
                <li>Les données à caractère personnel doivent être :</li>
                <li>collectées pour des finalités déterminées ;</li>
            </ol>
            <blockquote>
                <p>a) traitées de manière licite ;</p>
                <p>b) exactes et tenues à jour ;</p>
            </blockquote>
            <p>Section 1</p>
            <p>Le responsable du traitement est responsable du respect du paragraphe 1.</p>
            <div class="separator"></div>
            <h3>Article 6 - Licéité du traitement</h3>
            <p>Le traitement n'est licite que si</p>
            <p>au moins une des conditions suivantes est remplie :</p>
            <blockquote>la personne concernée a consenti au traitement</blockquote>
            <p>Dernier alinéa.</p>
        </div></body></html>
    "#;

    #[test]
    fn chapter_links_skip_classed_and_linkless_paragraphs() {
        let links = parse_chapter_links(INDEX, "https://www.cnil.fr").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "Chapitre I - Dispositions générales");
        assert_eq!(
            links[0].url,
            "https://www.cnil.fr/fr/reglement-europeen-protection-donnees/chapitre1"
        );
        assert_eq!(links[1].url, "https://other.example/chapitre2");
    }

    #[test]
    fn missing_chapter_container_yields_nothing() {
        let links = parse_chapter_links("<html><body></body></html>", "https://x.y").unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn list_items_take_quotes_on_their_last_item() {
        let records = parse_articles("Chapitre II", CHAPTER).unwrap();
        let art5: Vec<_> = records
            .iter()
            .filter(|r| r.article.starts_with("Article 5"))
            .collect();

        assert_eq!(art5.len(), 4);
        assert_eq!(art5[0].paragraph, "Les données à caractère personnel doivent être :");
        assert_eq!(art5[0].sub_paragraph, None);
        assert_eq!(art5[1].paragraph, "collectées pour des finalités déterminées ;");
        assert_eq!(
            art5[1].sub_paragraph.as_deref(),
            Some("a) traitées de manière licite ;")
        );
        assert_eq!(
            art5[2].sub_paragraph.as_deref(),
            Some("b) exactes et tenues à jour ;")
        );
        // "Section 1" is a structural heading and is skipped.
        assert_eq!(
            art5[3].paragraph,
            "Le responsable du traitement est responsable du respect du paragraphe 1."
        );
        for (i, r) in art5.iter().enumerate() {
            assert_eq!(r.position, i);
            assert_eq!(r.chapter, "Chapitre II");
        }
    }

    #[test]
    fn paragraphs_take_quotes_when_no_list_is_pending() {
        let records = parse_articles("Chapitre II", CHAPTER).unwrap();
        let art6: Vec<_> = records
            .iter()
            .filter(|r| r.article.starts_with("Article 6"))
            .collect();

        assert_eq!(art6.len(), 2);
        assert_eq!(
            art6[0].paragraph,
            "Le traitement n'est licite que si au moins une des conditions suivantes est remplie :"
        );
        assert_eq!(
            art6[0].sub_paragraph.as_deref(),
            Some("la personne concernée a consenti au traitement")
        );
        assert_eq!(art6[1].paragraph, "Dernier alinéa.");
    }

    #[test]
    fn quotes_with_nothing_pending_become_paragraphs() {
        let html = r#"
            <h3>Article 99 - Entrée en vigueur</h3>
            <blockquote>
                Le présent règlement entre en vigueur le vingtième jour.
                <p>Il est applicable à partir du 25 mai 2018.</p>
            </blockquote>
            <p>Le présent règlement est obligatoire dans tous ses éléments.</p>
        "#;
        let records = parse_articles("Chapitre XI", html).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].paragraph,
            "Le présent règlement entre en vigueur le vingtième jour."
        );
        assert_eq!(records[1].paragraph, "Il est applicable à partir du 25 mai 2018.");
        assert!(records[..2].iter().all(|r| r.sub_paragraph.is_none()));
        assert_eq!(
            records[2].paragraph,
            "Le présent règlement est obligatoire dans tous ses éléments."
        );
        assert_eq!(records[2].position, 2);
    }

    #[test]
    fn content_before_first_article_is_ignored() {
        let records = parse_articles("Chapitre II", CHAPTER).unwrap();
        assert!(records.iter().all(|r| !r.paragraph.contains("CHAPITRE")));
    }
}
