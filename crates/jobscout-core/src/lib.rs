//! Core job posting model, normalization and merge rules for jobscout.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-core";

/// Role substituted when no title strategy matches a card.
pub const UNKNOWN_POSITION: &str = "Unknown Position";

/// Stored value for free-text fields never seen on any pass.
pub const NOT_SPECIFIED: &str = "Not specified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    #[default]
    Unknown,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullTime => "FULL_TIME",
            JobType::PartTime => "PART_TIME",
            JobType::Contract => "CONTRACT",
            JobType::Internship => "INTERNSHIP",
            JobType::Unknown => "UNKNOWN",
        }
    }

    /// Canonicalizes a badge label or stored code, case-insensitively.
    /// Anything unrecognized maps to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let lower = label
            .to_ascii_lowercase()
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if lower.contains("intern") {
            JobType::Internship
        } else if lower.contains("part time") || lower.contains("parttime") {
            JobType::PartTime
        } else if lower.contains("contract") || lower.contains("freelance") {
            JobType::Contract
        } else if lower.contains("full time") || lower.contains("fulltime") {
            JobType::FullTime
        } else {
            JobType::Unknown
        }
    }

    pub fn is_known(&self) -> bool {
        *self != JobType::Unknown
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long-form fields pulled from a job's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailFields {
    pub full_description: Option<String>,
    pub summary: Option<String>,
    pub skills: Vec<String>,
    pub location: Option<String>,
    pub job_type: Option<String>,
    pub compensation: Option<String>,
}

/// Raw, unvalidated fields for one listing card, optionally enriched from
/// its detail page. This is the handoff from extraction into the Normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedJob {
    pub role: String,
    pub company_name: String,
    pub job_type: Option<String>,
    pub location: Option<String>,
    pub experience_required: Option<String>,
    pub short_description: Option<String>,
    pub compensation: Option<String>,
    pub skills: Vec<String>,
    pub apply_link: Option<String>,
    pub detail_url: Option<String>,
    pub detail: Option<DetailFields>,
}

impl ExtractedJob {
    /// Folds a completed detail-page pass into the card fields. Facts the card
    /// already carried win over the detail page's labeled facts.
    pub fn with_detail(mut self, detail: DetailFields) -> Self {
        fill_if_missing(&mut self.location, &detail.location);
        fill_if_missing(&mut self.job_type, &detail.job_type);
        fill_if_missing(&mut self.compensation, &detail.compensation);
        fill_if_missing(&mut self.short_description, &detail.summary);
        self.detail = Some(detail);
        self
    }

    pub fn details_scraped(&self) -> bool {
        self.detail.is_some()
    }
}

fn fill_if_missing(slot: &mut Option<String>, candidate: &Option<String>) {
    if slot.as_deref().map(str::trim).unwrap_or_default().is_empty() {
        if let Some(value) = candidate {
            *slot = Some(value.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    pub raw: String,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Compensation {
    pub fn parse(raw: &str) -> Self {
        let (min, max) = parse_compensation(raw);
        Self {
            raw: raw.trim().to_string(),
            min,
            max,
        }
    }
}

/// A validated record ready for upsert. `None` means the field was not
/// observed on this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub role: String,
    pub company_name: String,
    pub job_type: JobType,
    pub location: Option<String>,
    pub experience_required: Option<String>,
    pub short_description: Option<String>,
    pub full_description: Option<String>,
    pub skills_required: Vec<String>,
    pub compensation: Option<Compensation>,
    pub apply_link: Option<String>,
    pub source_url: Option<String>,
    pub details_scraped: bool,
}

impl NormalizedJob {
    pub fn identity_key(&self) -> String {
        identity_key(&self.role, &self.company_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("role is empty")]
    MissingRole,
    #[error("company name is empty for role {role:?}")]
    MissingCompany { role: String },
}

pub fn normalize(raw: ExtractedJob) -> Result<NormalizedJob, NormalizeError> {
    let role = raw.role.trim().to_string();
    if role.is_empty() {
        return Err(NormalizeError::MissingRole);
    }
    let company_name = raw.company_name.trim().to_string();
    if company_name.is_empty() {
        return Err(NormalizeError::MissingCompany { role });
    }

    let details_scraped = raw.details_scraped();
    let (full_description, detail_skills) = match raw.detail {
        Some(detail) => (non_empty(detail.full_description), detail.skills),
        None => (None, Vec::new()),
    };

    Ok(NormalizedJob {
        role,
        company_name,
        job_type: raw
            .job_type
            .as_deref()
            .map(JobType::from_label)
            .unwrap_or_default(),
        location: non_empty(raw.location),
        experience_required: non_empty(raw.experience_required),
        short_description: non_empty(raw.short_description),
        full_description,
        skills_required: dedupe_skills(raw.skills.into_iter().chain(detail_skills)),
        compensation: non_empty(raw.compensation).map(|c| Compensation::parse(&c)),
        apply_link: non_empty(raw.apply_link),
        source_url: non_empty(raw.detail_url),
        details_scraped,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Returns the first two numeric groups in `text` as `(min, max)`.
/// Commas between digits are thousands separators.
pub fn parse_compensation(text: &str) -> (Option<i64>, Option<i64>) {
    let groups = numeric_groups(text);
    (groups.first().copied(), groups.get(1).copied())
}

fn numeric_groups(text: &str) -> Vec<i64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == ',' && !current.is_empty() && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if !current.is_empty() {
            out.push(saturating_number(&current));
            current.clear();
        }
    }
    if !current.is_empty() {
        out.push(saturating_number(&current));
    }
    out
}

/// `digits` is ASCII digits only, so parsing fails only on overflow.
fn saturating_number(digits: &str) -> i64 {
    digits.parse::<i64>().unwrap_or(i64::MAX)
}

/// Trims, drops empties and removes case-insensitive duplicates, keeping the
/// first-seen spelling and order.
pub fn dedupe_skills<I, S>(skills: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for skill in skills {
        let trimmed = skill.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-normalized identity of a posting: `(role, company_name)`.
pub fn identity_key(role: &str, company_name: &str) -> String {
    format!(
        "{}::{}",
        normalize_key_fragment(role),
        normalize_key_fragment(company_name)
    )
}

/// Canonical persisted job posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub role: String,
    pub company_name: String,
    pub job_type: JobType,
    pub location: String,
    pub experience_required: String,
    pub short_description: String,
    pub full_description: Option<String>,
    pub skills_required: Vec<String>,
    pub compensation_raw: Option<String>,
    pub compensation_min: Option<i64>,
    pub compensation_max: Option<i64>,
    pub apply_link: Option<String>,
    pub source_url: Option<String>,
    pub details_scraped: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobPosting {
    /// Builds the record for a key seen for the first time.
    pub fn from_normalized(job: &NormalizedJob, now: DateTime<Utc>) -> Self {
        let compensation = job.compensation.clone();
        Self {
            id: Uuid::new_v4(),
            role: job.role.clone(),
            company_name: job.company_name.clone(),
            job_type: job.job_type,
            location: job
                .location
                .clone()
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
            experience_required: job
                .experience_required
                .clone()
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
            short_description: job.short_description.clone().unwrap_or_default(),
            full_description: job.full_description.clone(),
            skills_required: job.skills_required.clone(),
            compensation_raw: compensation.as_ref().map(|c| c.raw.clone()),
            compensation_min: compensation.as_ref().and_then(|c| c.min),
            compensation_max: compensation.as_ref().and_then(|c| c.max),
            apply_link: job.apply_link.clone(),
            source_url: job.source_url.clone(),
            details_scraped: job.details_scraped,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity_key(&self) -> String {
        identity_key(&self.role, &self.company_name)
    }

    /// Field-level merge of a later sighting of the same key.
    ///
    /// Observed fields overwrite; unobserved fields (including an `Unknown`
    /// job type) keep their stored value. A pass that completed enrichment
    /// refreshes `full_description`, `skills_required` and `details_scraped`;
    /// a card-only pass never clears them.
    pub fn merge(&mut self, job: &NormalizedJob, now: DateTime<Utc>) {
        self.role = job.role.clone();
        self.company_name = job.company_name.clone();
        if job.job_type.is_known() {
            self.job_type = job.job_type;
        }
        overwrite_if_present(&mut self.location, &job.location);
        overwrite_if_present(&mut self.experience_required, &job.experience_required);
        overwrite_if_present(&mut self.short_description, &job.short_description);
        if let Some(compensation) = &job.compensation {
            self.compensation_raw = Some(compensation.raw.clone());
            self.compensation_min = compensation.min;
            self.compensation_max = compensation.max;
        }
        if job.apply_link.is_some() {
            self.apply_link = job.apply_link.clone();
        }
        if job.source_url.is_some() {
            self.source_url = job.source_url.clone();
        }

        if job.details_scraped {
            self.full_description = job.full_description.clone();
            self.skills_required = job.skills_required.clone();
            self.details_scraped = true;
        } else if !self.details_scraped && !job.skills_required.is_empty() {
            // Enriched skills already include the card's, keep them.
            self.skills_required = job.skills_required.clone();
        }
        self.updated_at = now;
    }
}

fn overwrite_if_present(slot: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *slot = value.clone();
    }
}
