//! Detección de citas del CFR (p. ej. `12 CFR 217.10`, `§ 217.10(a)(1)`,
//! `Part 217`) y construcción de enlaces a eCFR.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

const ECFR_BASE: &str = "https://www.ecfr.gov/current";
const DEFAULT_TITLE: &str = "12";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CfrLink {
    pub citation: String,
    pub url: String,
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            (?:
                (?P<title>\d{1,2})\s*C\.?F\.?R\.?\s*(?:§+\s*|(?i:part)\s+)?
              | §+\s*
              | \b(?i:part)\s+
            )
            (?P<part>\d{1,4})
            (?:\.(?P<section>\d+[a-z]?))?
            (?P<paragraphs>(?:\([0-9a-zA-Z]{1,4}\))*)
            ",
        )
        .expect("regex de citas CFR válida")
    })
}

fn build_url(caps: &Captures<'_>) -> String {
    let title = caps.name("title").map_or(DEFAULT_TITLE, |m| m.as_str());
    let part = &caps["part"];

    match caps.name("section") {
        Some(section) => {
            let section_id = format!("{part}.{}", section.as_str());
            let paragraphs = caps.name("paragraphs").map_or("", |m| m.as_str());
            if paragraphs.is_empty() {
                format!("{ECFR_BASE}/title-{title}/part-{part}/section-{section_id}")
            } else {
                format!("{ECFR_BASE}/title-{title}/part-{part}/section-{section_id}#p-{section_id}{paragraphs}")
            }
        }
        None => format!("{ECFR_BASE}/title-{title}/part-{part}"),
    }
}

/// Todas las citas de un texto, sin duplicados y en orden de aparición.
pub fn find_cfr_links(text: &str) -> Vec<CfrLink> {
    let mut links: Vec<CfrLink> = Vec::new();
    for caps in citation_regex().captures_iter(text) {
        let url = build_url(&caps);
        if links.iter().any(|l| l.url == url) {
            continue;
        }
        links.push(CfrLink {
            citation: caps[0].trim().to_string(),
            url,
        });
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_for_citation(citation: &str) -> Option<String> {
        find_cfr_links(citation).into_iter().next().map(|l| l.url)
    }

    #[test]
    fn full_citation_links_to_section() {
        assert_eq!(
            link_for_citation("12 CFR 217.10").as_deref(),
            Some("https://www.ecfr.gov/current/title-12/part-217/section-217.10")
        );
    }

    #[test]
    fn section_sign_defaults_to_title_12_and_keeps_paragraphs() {
        assert_eq!(
            link_for_citation("§ 217.32(f)(1)").as_deref(),
            Some("https://www.ecfr.gov/current/title-12/part-217/section-217.32#p-217.32(f)(1)")
        );
    }

    #[test]
    fn part_reference_links_to_part() {
        assert_eq!(
            link_for_citation("Part 217").as_deref(),
            Some("https://www.ecfr.gov/current/title-12/part-217")
        );
        assert_eq!(
            link_for_citation("31 CFR Part 1020").as_deref(),
            Some("https://www.ecfr.gov/current/title-31/part-1020")
        );
    }

    #[test]
    fn plain_prose_has_no_links() {
        assert!(find_cfr_links("The risk weight is 100 percent for 2024.").is_empty());
        assert_eq!(link_for_citation("corporate exposure"), None);
    }

    #[test]
    fn links_in_text_are_deduplicated() {
        let text = "See 12 CFR § 217.32 and § 217.32; see also 12 CFR 217.10(a)(1) and Part 217.";
        let links = find_cfr_links(text);
        let citations: Vec<&str> = links.iter().map(|l| l.citation.as_str()).collect();
        assert_eq!(citations, vec!["12 CFR § 217.32", "12 CFR 217.10(a)(1)", "Part 217"]);
    }
}
