//! `rgpd sources`: scrape targets with their URLs, and provider health.

use anyhow::Result;

use crate::config::Config;
use crate::scrape::TARGETS;

/// Page each scrape target starts from.
pub fn target_url(config: &Config, target: &str) -> String {
    match target {
        "sanctions" => config.scraper.sanctions_url(),
        _ => config.scraper.regulation_url(),
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<12} URL", "TARGET");
    for target in TARGETS {
        println!("{:<12} {}", target, target_url(config, target));
    }
    println!(
        "{:<12} yearly sanctions {}-{}",
        "", config.scraper.sanctions_from_year, config.scraper.sanctions_to_year
    );

    let key_set = std::env::var("OPENAI_API_KEY").is_ok();
    println!();
    println!("{:<12} {:<10} {:<28} HEALTHY", "SERVICE", "PROVIDER", "MODEL");
    println!(
        "{:<12} {:<10} {:<28} {}",
        "embedding",
        config.embedding.provider,
        config.embedding.model.as_deref().unwrap_or("-"),
        provider_healthy(&config.embedding.provider, key_set)
    );
    println!(
        "{:<12} {:<10} {:<28} {}",
        "llm",
        config.llm.provider,
        if config.llm.is_enabled() {
            config.llm.model.as_str()
        } else {
            "-"
        },
        provider_healthy(&config.llm.provider, key_set)
    );

    Ok(())
}

/// A disabled provider is never healthy; OpenAI additionally needs its key.
fn provider_healthy(provider: &str, openai_key_set: bool) -> bool {
    match provider {
        "disabled" => false,
        "openai" => openai_key_set,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_depends_on_provider_and_key() {
        assert!(!provider_healthy("disabled", true));
        assert!(!provider_healthy("openai", false));
        assert!(provider_healthy("openai", true));
        assert!(provider_healthy("ollama", false));
    }

    #[test]
    fn targets_map_to_pages() {
        let cfg = crate::config::parse_config(
            "[db]\npath = \"x.sqlite\"\n\n[chunking]\nmax_tokens = 700\n\n[scraper]\nbase_url = \"http://127.0.0.1:9/\"\n",
        )
        .unwrap();
        assert_eq!(
            target_url(&cfg, "articles"),
            "http://127.0.0.1:9/fr/reglement-europeen-protection-donnees"
        );
        assert_eq!(
            target_url(&cfg, "sanctions"),
            "http://127.0.0.1:9/fr/les-sanctions-prononcees-par-la-cnil"
        );
    }
}
