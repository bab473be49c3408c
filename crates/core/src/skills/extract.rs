//! Bullet-list parsers for the two extraction stages.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::state::StylizedFact;

static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-\s*").expect("Invalid regex"));

/// Separators between a fact and its description: spaced dash or em dash, or a colon
static FACT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s[—:\-]\s|:\s|\s—\s").expect("Invalid regex"));

fn bullet_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('-'))
        .map(|line| BULLET.replace(line, "").trim().to_string())
}

/// Parse `- Fact — Description` bullets, dropping duplicates
pub fn parse_facts(text: &str) -> Vec<StylizedFact> {
    let mut seen = HashSet::new();
    let mut facts = Vec::new();

    for line in bullet_lines(text) {
        let mut parts = FACT_SEPARATOR.split(&line);
        let Some(fact) = parts.next().map(str::trim) else {
            continue;
        };
        let description = parts.collect::<Vec<_>>().join(" ").trim().to_string();
        if fact.is_empty() || description.is_empty() {
            continue;
        }

        let fact = StylizedFact {
            fact: fact.to_string(),
            description,
        };
        if seen.insert((fact.fact.clone(), fact.description.clone())) {
            facts.push(fact);
        }
    }
    facts
}

/// Parse `- question` bullets, dropping duplicates
pub fn parse_questions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    bullet_lines(text)
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.clone()))
        .collect()
}
