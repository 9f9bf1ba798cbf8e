//! Selector strategy chains + listing/detail page parsers for the job board.

use std::fs;
use std::path::Path;

use anyhow::Context;
use jobscout_core::{DetailFields, ExtractedJob, UNKNOWN_POSITION};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const CRATE_NAME: &str = "jobscout-extract";

const CARD_DESCRIPTION_MAX_CHARS: usize = 200;
const SUMMARY_WORDS: usize = 30;
const CARD_SKILL_LIMIT: usize = 10;
const DETAIL_SKILL_LIMIT: usize = 15;

/// One rule for locating a field inside a page fragment.
///
/// The strategy matches the first node selected by `selector` whose value
/// (text, or `attr` when set) passes every constraint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Strategy {
    pub selector: String,
    #[serde(default)]
    pub attr: Option<String>,
    /// Join text nodes with newlines instead of collapsing whitespace.
    #[serde(default)]
    pub block: bool,
    /// The node's own text must contain this (case-insensitive), even when
    /// the value is read from `attr`.
    #[serde(default)]
    pub text_contains: Option<String>,
    #[serde(default)]
    pub min_len: Option<usize>,
    #[serde(default)]
    pub max_len: Option<usize>,
    #[serde(default)]
    pub reject: Vec<String>,
    #[serde(default)]
    pub reject_exact: Vec<String>,
    #[serde(default)]
    pub require_any: Vec<String>,
}

impl Strategy {
    pub fn text(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
            ..Default::default()
        }
    }

    pub fn block(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            block: true,
            ..Default::default()
        }
    }

    pub fn text_contains(mut self, needle: &str) -> Self {
        self.text_contains = Some(needle.to_string());
        self
    }

    pub fn len_between(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    pub fn reject(mut self, words: &[&str]) -> Self {
        self.reject = words.iter().map(ToString::to_string).collect();
        self
    }

    pub fn reject_exact(mut self, words: &[&str]) -> Self {
        self.reject_exact = words.iter().map(ToString::to_string).collect();
        self
    }

    pub fn require_any(mut self, words: &[&str]) -> Self {
        self.require_any = words.iter().map(ToString::to_string).collect();
        self
    }
}

fn chain(strategies: Vec<Strategy>, apply: impl Fn(Strategy) -> Strategy) -> Vec<Strategy> {
    strategies.into_iter().map(apply).collect()
}

/// Every selector chain and constant needed to read the job board.
/// Fields missing from a YAML override keep the built-in value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub base_url: String,
    pub listing_url: String,
    pub listing_ready: String,
    pub detail_ready: String,
    /// Card locators, strict first.
    pub cards: Vec<String>,
    pub title: Vec<Strategy>,
    pub company: Vec<Strategy>,
    pub job_type: Vec<Strategy>,
    pub location: Vec<Strategy>,
    pub experience: Vec<Strategy>,
    pub short_description: Vec<Strategy>,
    pub compensation: Vec<Strategy>,
    pub compensation_patterns: Vec<String>,
    pub card_skills: Vec<Strategy>,
    pub detail_link: Vec<Strategy>,
    pub apply_link: Vec<Strategy>,
    pub detail_description: Vec<Strategy>,
    pub detail_skills: Vec<Strategy>,
    pub fact_labels: String,
    pub skill_vocabulary: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self::devsunite()
    }
}

impl SiteProfile {
    pub fn devsunite() -> Self {
        Self {
            base_url: "https://devsunite.com".to_string(),
            listing_url: "https://devsunite.com/jobs".to_string(),
            listing_ready: "main".to_string(),
            detail_ready: "main".to_string(),
            cards: vec![
                "div.group.relative.w-full".to_string(),
                r#"div[class*="group"][class*="relative"][class*="w-full"]"#.to_string(),
            ],
            title: chain(
                vec![
                    Strategy::text(
                        r#"div[class*="tracking-tight"][class*="font-semibold"][class*="text-white"]"#,
                    ),
                    Strategy::text(r#"div[class*="font-semibold"][class*="leading-tight"]"#),
                    Strategy::text(r#"div[class*="text-base"][class*="sm:text-lg"]"#),
                    Strategy::text("h1"),
                    Strategy::text("h2"),
                    Strategy::text("h3"),
                    Strategy::text("h4"),
                    Strategy::text(r#"[class*="job-title"]"#),
                    Strategy::text(r#"[class*="title"]"#),
                    Strategy::text(r#"div[class*="font-semibold"]:not([class*="text-xs"])"#),
                ],
                |s| {
                    s.len_between(4, 99)
                        .reject_exact(&["full time", "part time", "internship", "contract"])
                },
            ),
            company: chain(
                vec![
                    Strategy::attr("img[alt]", "alt"),
                    Strategy::text(
                        r#"p[class*="text-xs"][class*="font-medium"][class*="text-neutral-500"][class*="uppercase"]"#,
                    ),
                    Strategy::text(r#"p[class*="uppercase"][class*="tracking-wide"]"#),
                    Strategy::text(r#"p[class*="text-neutral-500"][class*="mb-1"]"#),
                    Strategy::text(r#"[class*="company"]"#),
                    Strategy::text(r#"[class*="employer"]"#),
                ],
                |s| {
                    s.len_between(2, 49).reject(&[
                        "apply", "view", "details", " ago", "hours", "days", "full time",
                        "part time",
                    ])
                },
            ),
            job_type: chain(
                vec![
                    Strategy::text(
                        r#"div[class*="inline-flex"][class*="rounded-full"][class*="px-2.5"][class*="py-0.5"]"#,
                    ),
                    Strategy::text(
                        r#"div[class*="border-neutral-700"][class*="bg-neutral-800"][class*="text-xs"]"#,
                    ),
                    Strategy::text(r#"span[class*="rounded-full"][class*="px-2"]"#),
                    Strategy::text(r#"div[class*="badge"]"#),
                ],
                |s| s.max_len(40).require_any(&["full", "part", "intern", "contract", "freelance"]),
            ),
            location: chain(
                vec![
                    Strategy::text(r#"svg[class*="map-pin"] + span"#),
                    Strategy::text(r#"svg[class*="map-pin"] ~ span"#),
                    Strategy::text(r#"span[class*="truncate"]"#),
                    Strategy::text(r#"[class*="location"]"#),
                ],
                |s| s.max_len(49).reject(&["year", "month", "experience", "apply", "view"]),
            ),
            experience: chain(
                vec![
                    Strategy::text(r#"svg[class*="clock"] + span"#),
                    Strategy::text(r#"svg[class*="clock"] ~ span"#),
                    Strategy::text(r#"span[class*="font-medium"]"#),
                    Strategy::text(r#"[class*="experience"]"#),
                ],
                |s| s.max_len(29).require_any(&["year", "experience"]),
            ),
            short_description: chain(
                vec![
                    Strategy::text(
                        r#"p[class*="text-sm"][class*="text-neutral-300"][class*="leading-relaxed"]"#,
                    ),
                    Strategy::text(r#"p[class*="line-clamp-3"]"#),
                    Strategy::text(r#"[class*="description"]"#),
                    Strategy::text(r#"[class*="summary"]"#),
                ],
                |s| {
                    let mut s = s.reject(&["compensation", "apply now", "view details"]);
                    s.min_len = Some(51);
                    s
                },
            ),
            compensation: chain(
                vec![
                    Strategy::text(
                        r#"span[class*="text-sm"][class*="font-semibold"][class*="text-neutral-200"]"#,
                    ),
                    Strategy::text(r#"div[class*="border-t"] span[class*="font-semibold"]"#),
                    Strategy::text(r#"div[class*="py-3"] span[class*="font-semibold"]"#),
                ],
                |s| {
                    s.max_len(60).reject_exact(&["compensation"]).require_any(&[
                        "lpa", "ctc", "$", "₹", "€", "£", "salary", "k", "lakhs",
                    ])
                },
            ),
            compensation_patterns: vec![
                r"(?i)\d+\s*-\s*\d+\s*LPA".to_string(),
                r"(?i)\d+\s*LPA".to_string(),
                r"(?i)\$[\d,]+(?:\s*-\s*\$?[\d,]+)?(?:\s*(?:per|/)\s*(?:year|yr|month|mo|hour|hr))?"
                    .to_string(),
                r"(?i)₹[\d,]+(?:\s*-\s*₹?[\d,]+)?(?:\s*(?:per|/)\s*(?:year|yr|month|mo|hour|hr))?"
                    .to_string(),
                r"(?i)€[\d,]+(?:\s*-\s*€?[\d,]+)?(?:\s*(?:per|/)\s*(?:year|yr|month|mo|hour|hr))?"
                    .to_string(),
                r"(?i)£[\d,]+(?:\s*-\s*£?[\d,]+)?(?:\s*(?:per|/)\s*(?:year|yr|month|mo|hour|hr))?"
                    .to_string(),
            ],
            card_skills: chain(
                vec![
                    Strategy::text(r#"[class*="skill"]"#),
                    Strategy::text(r#"[class*="tag"]:not([class*="rounded-full"])"#),
                    Strategy::text(r#"[class*="tech"]"#),
                ],
                |s| {
                    s.max_len(29).reject_exact(&[
                        "full time",
                        "part time",
                        "internship",
                        "contract",
                        "remote",
                        "onsite",
                        "hybrid",
                    ])
                },
            ),
            detail_link: vec![
                Strategy::attr("a[href]", "href").text_contains("view details"),
                Strategy::attr(r#"a[href][class*="border-neutral-700"]"#, "href"),
                Strategy::attr(r#"a[href*="/jobs/"]"#, "href"),
            ],
            apply_link: vec![Strategy::attr("a[href]", "href").text_contains("apply")],
            detail_description: vec![
                Strategy::block("div.prose.prose-invert"),
                Strategy::block("div.prose"),
                Strategy::block(r#"div[class*="bg-gradient-to-br"] div[class*="prose"]"#),
                Strategy::block(r#"div[class*="description"]"#),
                Strategy::block(r#"div[class*="job-details"]"#),
                Strategy::block("article"),
            ],
            detail_skills: chain(
                vec![
                    Strategy::text(r#"div.flex.flex-wrap span[class*="bg-[#2CEE91]"]"#),
                    Strategy::text(r#"div.flex.flex-wrap span[class*="text-[#2CEE91]"]"#),
                    Strategy::text("div.flex.flex-wrap span"),
                    Strategy::text(r#"[class*="skill"]"#),
                    Strategy::text(".tech-stack li"),
                ],
                |s| s.max_len(29),
            ),
            fact_labels: "div, span, dt, p, h3, h4".to_string(),
            skill_vocabulary: [
                "Python",
                "JavaScript",
                "TypeScript",
                "Java",
                "Golang",
                "Rust",
                "C++",
                "C#",
                "Ruby",
                "PHP",
                "Kotlin",
                "Swift",
                "SQL",
                "PostgreSQL",
                "MySQL",
                "MongoDB",
                "Redis",
                "React",
                "Angular",
                "Vue",
                "Node.js",
                "Next.js",
                "Django",
                "Flask",
                "Spring",
                "AWS",
                "Azure",
                "GCP",
                "Docker",
                "Kubernetes",
                "Terraform",
                "Linux",
                "Git",
                "GraphQL",
                "Machine Learning",
                "TensorFlow",
                "PyTorch",
                "Figma",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ProfileError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn compile(&self) -> Result<SiteExtractor, ProfileError> {
        let base_url = Url::parse(&self.base_url).map_err(|source| ProfileError::InvalidBaseUrl {
            url: self.base_url.clone(),
            source,
        })?;
        let cards = self
            .cards
            .iter()
            .map(|s| parse_selector("cards", s))
            .collect::<Result<Vec<_>, _>>()?;
        let compensation_patterns = self
            .compensation_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| ProfileError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SiteExtractor {
            base_url,
            cards,
            title: compile_chain("title", &self.title)?,
            company: compile_chain("company", &self.company)?,
            job_type: compile_chain("job_type", &self.job_type)?,
            location: compile_chain("location", &self.location)?,
            experience: compile_chain("experience", &self.experience)?,
            short_description: compile_chain("short_description", &self.short_description)?,
            compensation: compile_chain("compensation", &self.compensation)?,
            compensation_patterns,
            card_skills: compile_chain("card_skills", &self.card_skills)?,
            detail_link: compile_chain("detail_link", &self.detail_link)?,
            apply_link: compile_chain("apply_link", &self.apply_link)?,
            detail_description: compile_chain("detail_description", &self.detail_description)?,
            detail_skills: compile_chain("detail_skills", &self.detail_skills)?,
            fact_labels: parse_selector("fact_labels", &self.fact_labels)?,
            profile: self.clone(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid selector for {field}: {selector:?}: {message}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
        message: String,
    },
    #[error("invalid compensation pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid base url {url:?}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

fn parse_selector(field: &'static str, selector: &str) -> Result<Selector, ProfileError> {
    Selector::parse(selector).map_err(|e| ProfileError::InvalidSelector {
        field,
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    selector: Selector,
    rule: Strategy,
}

fn compile_chain(field: &'static str, rules: &[Strategy]) -> Result<Vec<CompiledStrategy>, ProfileError> {
    rules
        .iter()
        .map(|rule| {
            Ok(CompiledStrategy {
                selector: parse_selector(field, &rule.selector)?,
                rule: rule.clone(),
            })
        })
        .collect()
}

/// A field value plus the index of the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub value: String,
    pub strategy: usize,
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn collapsed_text(node: ElementRef<'_>) -> String {
    node.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn block_text(node: ElementRef<'_>) -> String {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn candidate(node: ElementRef<'_>, rule: &Strategy) -> Option<String> {
    if let Some(needle) = &rule.text_contains {
        if !collapsed_text(node)
            .to_lowercase()
            .contains(&needle.to_lowercase())
        {
            return None;
        }
    }
    let raw = match &rule.attr {
        Some(attr) => node.value().attr(attr)?.to_string(),
        None if rule.block => block_text(node),
        None => collapsed_text(node),
    };
    let value = text_or_none(raw)?;
    let len = value.chars().count();
    if rule.min_len.is_some_and(|min| len < min) || rule.max_len.is_some_and(|max| len > max) {
        return None;
    }
    let lower = value.to_lowercase();
    if rule.reject.iter().any(|w| lower.contains(&w.to_lowercase())) {
        return None;
    }
    if rule.reject_exact.iter().any(|w| lower == w.to_lowercase()) {
        return None;
    }
    if !rule.require_any.is_empty()
        && !rule
            .require_any
            .iter()
            .any(|w| lower.contains(&w.to_lowercase()))
    {
        return None;
    }
    Some(value)
}

/// Applies `chain` in order; the first strategy with an acceptable node wins.
/// No match is a normal outcome and yields `None`.
pub fn first_match(fragment: ElementRef<'_>, chain: &[CompiledStrategy]) -> Option<Match> {
    chain.iter().enumerate().find_map(|(index, strategy)| {
        fragment
            .select(&strategy.selector)
            .find_map(|node| candidate(node, &strategy.rule))
            .map(|value| Match {
                value,
                strategy: index,
            })
    })
}

pub fn extract(fragment: ElementRef<'_>, chain: &[CompiledStrategy], default: &str) -> String {
    first_match(fragment, chain)
        .map(|m| m.value)
        .unwrap_or_else(|| default.to_string())
}

/// Multi-valued variant: every acceptable node of the first strategy that
/// yields anything, deduplicated and capped at `limit`.
pub fn extract_all(fragment: ElementRef<'_>, chain: &[CompiledStrategy], limit: usize) -> Vec<String> {
    for strategy in chain {
        let mut values: Vec<String> = Vec::new();
        for node in fragment.select(&strategy.selector) {
            if let Some(value) = candidate(node, &strategy.rule) {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        if !values.is_empty() {
            values.truncate(limit);
            return values;
        }
    }
    Vec::new()
}

/// Cards parsed from one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub cards: Vec<ExtractedJob>,
    /// Index of the card locator that matched, if any.
    pub card_strategy: Option<usize>,
}

/// Compiled form of a [`SiteProfile`].
#[derive(Debug, Clone)]
pub struct SiteExtractor {
    profile: SiteProfile,
    base_url: Url,
    cards: Vec<Selector>,
    title: Vec<CompiledStrategy>,
    company: Vec<CompiledStrategy>,
    job_type: Vec<CompiledStrategy>,
    location: Vec<CompiledStrategy>,
    experience: Vec<CompiledStrategy>,
    short_description: Vec<CompiledStrategy>,
    compensation: Vec<CompiledStrategy>,
    compensation_patterns: Vec<Regex>,
    card_skills: Vec<CompiledStrategy>,
    detail_link: Vec<CompiledStrategy>,
    apply_link: Vec<CompiledStrategy>,
    detail_description: Vec<CompiledStrategy>,
    detail_skills: Vec<CompiledStrategy>,
    fact_labels: Selector,
}

impl SiteExtractor {
    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Strict locator first, then the loose one; empty is a valid result.
    pub fn find_cards<'a>(&self, document: &'a Html) -> (Vec<ElementRef<'a>>, Option<usize>) {
        for (index, selector) in self.cards.iter().enumerate() {
            let found = document.select(selector).collect::<Vec<_>>();
            if !found.is_empty() {
                return (found, Some(index));
            }
        }
        (Vec::new(), None)
    }

    pub fn parse_listing(&self, html: &str) -> ListingPage {
        let document = Html::parse_document(html);
        let (cards, card_strategy) = self.find_cards(&document);
        debug!(cards = cards.len(), ?card_strategy, "located listing cards");
        ListingPage {
            cards: cards.into_iter().map(|card| self.parse_card(card)).collect(),
            card_strategy,
        }
    }

    pub fn parse_card(&self, card: ElementRef<'_>) -> ExtractedJob {
        let card_text = collapsed_text(card);

        let detail_url = first_match(card, &self.detail_link).and_then(|m| self.resolve(&m.value));
        let apply_link = first_match(card, &self.apply_link)
            .and_then(|m| self.resolve(&m.value))
            .or_else(|| detail_url.clone());

        ExtractedJob {
            role: extract(card, &self.title, UNKNOWN_POSITION),
            company_name: extract(card, &self.company, ""),
            job_type: first_match(card, &self.job_type)
                .map(|m| m.value)
                .or_else(|| infer_job_type(&card_text)),
            location: first_match(card, &self.location)
                .map(|m| m.value)
                .or_else(|| infer_location(&card_text)),
            experience_required: first_match(card, &self.experience)
                .map(|m| m.value)
                .or_else(|| infer_experience(&card_text)),
            short_description: first_match(card, &self.short_description)
                .map(|m| truncate_chars(&m.value, CARD_DESCRIPTION_MAX_CHARS)),
            compensation: first_match(card, &self.compensation)
                .map(|m| m.value)
                .or_else(|| self.find_compensation_pattern(&card_text)),
            skills: extract_all(card, &self.card_skills, CARD_SKILL_LIMIT),
            apply_link,
            detail_url,
            detail: None,
        }
    }

    pub fn parse_detail(&self, html: &str) -> DetailFields {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let full_description = first_match(root, &self.detail_description).map(|m| m.value);
        let mut skills = extract_all(root, &self.detail_skills, DETAIL_SKILL_LIMIT);
        if skills.is_empty() {
            if let Some(description) = &full_description {
                skills = infer_skills(description, &self.profile.skill_vocabulary);
                skills.truncate(DETAIL_SKILL_LIMIT);
            }
        }

        DetailFields {
            summary: full_description.as_deref().map(summarize),
            full_description,
            skills,
            location: self.labeled_fact(&document, "location"),
            job_type: self.labeled_fact(&document, "job type"),
            compensation: self.labeled_fact(&document, "compensation"),
        }
    }

    /// Value of the element right after a label element such as
    /// `<div>Location</div><div>Remote</div>`.
    fn labeled_fact(&self, document: &Html, label: &str) -> Option<String> {
        document.select(&self.fact_labels).find_map(|el| {
            let text = collapsed_text(el).to_lowercase();
            let text = text.trim_end_matches(':').trim();
            if text != label {
                return None;
            }
            el.next_siblings()
                .find_map(ElementRef::wrap)
                .and_then(|next| text_or_none(collapsed_text(next)))
        })
    }

    fn find_compensation_pattern(&self, text: &str) -> Option<String> {
        self.compensation_patterns
            .iter()
            .find_map(|re| re.find(text))
            .map(|m| m.as_str().trim().to_string())
    }

    pub fn resolve(&self, href: &str) -> Option<String> {
        self.base_url.join(href.trim()).ok().map(|u| u.to_string())
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut = text.chars().take(max).collect::<String>();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

fn summarize(description: &str) -> String {
    let words = description
        .split_whitespace()
        .take(SUMMARY_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if words.chars().count() > CARD_DESCRIPTION_MAX_CHARS {
        truncate_chars(&words, CARD_DESCRIPTION_MAX_CHARS)
    } else {
        format!("{words}...")
    }
}

/// Byte offset of `needle` in `haystack` where it is not embedded in a
/// longer alphanumeric word. Both sides must already be lowercase.
fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.match_indices(needle).find_map(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        let bounded = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
        if bounded(before) && bounded(after) {
            Some(start)
        } else {
            None
        }
    })
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    find_word(haystack, needle).is_some()
}

/// Vocabulary terms found in `text`, in order of first appearance.
pub fn infer_skills(text: &str, vocabulary: &[String]) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found = vocabulary
        .iter()
        .filter_map(|term| find_word(&lower, &term.to_lowercase()).map(|pos| (pos, term.clone())))
        .collect::<Vec<_>>();
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, term)| term).collect()
}

fn infer_job_type(card_text: &str) -> Option<String> {
    let lower = card_text.to_lowercase();
    let label = if contains_word(&lower, "internship") || contains_word(&lower, "intern") {
        "Internship"
    } else if contains_word(&lower, "part-time") || contains_word(&lower, "part time") {
        "Part Time"
    } else if contains_word(&lower, "contract") || contains_word(&lower, "freelance") {
        "Contract"
    } else if contains_word(&lower, "full-time") || contains_word(&lower, "full time") {
        "Full Time"
    } else {
        return None;
    };
    Some(label.to_string())
}

fn infer_location(card_text: &str) -> Option<String> {
    let lower = card_text.to_lowercase();
    let label = if contains_word(&lower, "remote") {
        "Remote"
    } else if contains_word(&lower, "onsite") || contains_word(&lower, "on-site") {
        "On-site"
    } else if contains_word(&lower, "hybrid") {
        "Hybrid"
    } else {
        return None;
    };
    Some(label.to_string())
}

fn infer_experience(card_text: &str) -> Option<String> {
    const LEVELS: &[(&str, &str)] = &[
        ("entry level", "Entry Level"),
        ("junior", "Junior"),
        ("senior", "Senior"),
        ("mid level", "Mid Level"),
        ("lead", "Lead"),
        ("principal", "Principal"),
        ("0 years", "Entry Level"),
        ("0-1 years", "Entry Level"),
        ("1-3 years", "Junior"),
        ("3-5 years", "Mid Level"),
        ("5+ years", "Senior"),
        ("fresher", "Entry Level"),
        ("experienced", "Mid Level"),
    ];
    let lower = card_text.to_lowercase();
    LEVELS
        .iter()
        .find(|(pattern, _)| contains_word(&lower, pattern))
        .map(|(_, level)| level.to_string())
}
