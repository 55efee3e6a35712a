//! Rule-Based Triple Extractor
//!
//! Deterministic pattern families, each scanning the whole text and
//! emitting candidates at a fixed confidence:
//!
//! - instance-of (both spans validated through the inferer)
//! - temporal: start time and duration
//! - spatial: location
//! - action: condition and outcome
//! - containment
//! - schema relation triggers (surface forms of declared relations)
//! - sentence co-occurrence with trigger words, as a fallback

use crate::hybrid::merge_and_deduplicate;
use crate::inferer::LayeredInferer;
use crate::text::{context_window, contains_term, split_sentences};
use regex::{Captures, Regex};
use std::collections::HashMap;
use triplex_core::{normalize_term, CandidateTriple, ExtractionMethod};
use triplex_schema::{RelationTypeDef, Schema};

// ============================================================================
// Family confidences
// ============================================================================

pub const INSTANCE_CONFIDENCE: f32 = 0.9;
pub const TEMPORAL_CONFIDENCE: f32 = 0.8;
pub const SPATIAL_CONFIDENCE: f32 = 0.8;
pub const ACTION_CONFIDENCE: f32 = 0.7;
pub const CONTAINMENT_CONFIDENCE: f32 = 0.7;
pub const RELATION_TRIGGER_CONFIDENCE: f32 = 0.75;
pub const CO_OCCURRENCE_CONFIDENCE: f32 = 0.6;

/// Longest gap, in bytes, between two co-occurring entities
const MAX_CO_OCCURRENCE_GAP: usize = 80;

// ============================================================================
// Pattern fragments
// ============================================================================

/// Capitalized multi-word phrase
const CAP_PHRASE: &str = r"[A-Z][\w'-]*(?:[ \t]+[A-Z][\w'-]*)*";

/// Optional leading determiner
const DET: &str = r"(?:(?i:the|an?|this|that|these|those|its|their)[ \t]+)?";

/// CJK clause fragment: anything up to punctuation or whitespace
const CJK_SPAN: &str = r"[^\s，。,.；;：:！？!?、]";

const TIME: &str = r"\d{4}-\d{2}-\d{2}|\d{1,2}:\d{2}(?:[ \t]*(?i:am|pm))?|(?i:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?[ \t]+\d{1,2}(?:,[ \t]*\d{4})?|\d{4}";

const DURATION: &str = r"\d+(?:\.\d+)?[ \t]*(?i:milliseconds?|seconds?|minutes?|hours?|days?|weeks?|months?|years?|ms|min|h|s)\b";

const DETERMINERS: [&str; 7] = ["the", "a", "an", "this", "that", "these", "those"];

const STOPWORDS: [&str; 30] = [
    "the", "a", "an", "this", "that", "these", "those", "it", "its", "they", "we", "he", "she",
    "there", "here", "when", "if", "after", "before", "then", "however", "in", "on", "at", "for",
    "and", "or", "but", "which", "who",
];

/// Generic co-occurrence triggers used alongside the schema's relations
const DEFAULT_TRIGGERS: [(&str, &[&str]); 4] = [
    ("uses", &["uses", "use", "using", "used", "utilizes", "employs"]),
    ("part_of", &["part of"]),
    ("related_to", &["related to", "associated with"]),
    ("causes", &["causes", "caused"]),
];

fn entity() -> String {
    format!(r"(?:{}|\w+)", CAP_PHRASE)
}

/// Compile a built-in pattern; failures are logged and the rule skipped
fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping extraction rule");
            None
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// A fixed-predicate family rule
#[derive(Debug, Clone)]
struct FamilyRule {
    regex: Regex,
    predicate: &'static str,
    method: ExtractionMethod,
    confidence: f32,
}

/// Surface forms of one declared relation
#[derive(Debug, Clone)]
struct RelationRule {
    regex: Regex,
    predicate: String,
    def: RelationTypeDef,
}

/// Trigger words mapped to a predicate
#[derive(Debug, Clone)]
struct Trigger {
    predicate: String,
    surfaces: Vec<String>,
}

/// Typed pattern families for one schema
#[derive(Debug, Clone)]
pub struct RuleBasedTripleExtractor {
    schema_id: String,
    instance_relation: String,
    instance_min_confidence: f32,
    /// Normalized type names and aliases to the declared type name
    class_names: HashMap<String, String>,
    instance_rules: Vec<Regex>,
    families: Vec<FamilyRule>,
    relations: Vec<RelationRule>,
    entity_spans: Option<Regex>,
    triggers: Vec<Trigger>,
}

impl RuleBasedTripleExtractor {
    /// Compile the families for a schema. Instance-of spans must both
    /// resolve above `instance_min_confidence`; the triple keeps the stated
    /// object and scores `min(INSTANCE_CONFIDENCE, subject, object)`.
    pub fn new(schema: &Schema, instance_min_confidence: f32) -> Self {
        let e = entity();
        let instance_relation = schema.instance_relation().to_string();
        let class_names = schema
            .entity_types
            .iter()
            .flat_map(|(name, def)| {
                std::iter::once(name)
                    .chain(def.aliases.iter())
                    .map(move |surface| (normalize_term(surface), name.clone()))
            })
            .collect();

        let instance_rules = [
            format!(
                r"{DET}(?P<subj>{e})[ \t]+(?i:is[ \t]+an?[ \t]+(?:instance|kind|type)[ \t]+of|is[ \t]+instance[ \t]+of|is[ \t]+an?)[ \t]+{DET}(?P<obj>{e})"
            ),
            format!(r"(?P<subj>[^\s，。,.；;：:！？!?、是]+)是(?:一种|一个|一类)?(?P<obj>{CJK_SPAN}+)"),
            format!(r"(?P<subj>{CJK_SPAN}+?)属于(?P<obj>{CJK_SPAN}+)"),
        ]
        .iter()
        .filter_map(|p| compile(p))
        .collect();

        let family_specs: Vec<(ExtractionMethod, &'static str, String)> = vec![
            (
                ExtractionMethod::TemporalPattern,
                "starts_at",
                format!(
                    r"{DET}(?P<subj>{e})[ \t]+(?i:starts|started|begins|began|commences|commenced|opens|opened)[ \t]+(?i:at|on|in)[ \t]+(?P<obj>{TIME})"
                ),
            ),
            (
                ExtractionMethod::TemporalPattern,
                "has_duration",
                format!(
                    r"{DET}(?P<subj>{e})[ \t]+(?i:lasts|lasted|takes|took|runs|ran)(?:[ \t]+(?i:for))?[ \t]+(?P<obj>{DURATION})"
                ),
            ),
            (
                ExtractionMethod::TemporalPattern,
                "starts_at",
                format!(
                    r"(?P<subj>{CJK_SPAN}+?)(?:于|在)(?P<obj>\d{{4}}年(?:\d{{1,2}}月)?(?:\d{{1,2}}日)?|\d{{1,2}}[:：]\d{{2}})(?:开始|启动)"
                ),
            ),
            (
                ExtractionMethod::TemporalPattern,
                "has_duration",
                format!(
                    r"(?P<subj>{CJK_SPAN}+?)持续(?:了)?(?P<obj>\d+(?:\.\d+)?(?:个)?(?:秒钟|秒|分钟|小时|天|周|个月|月|年))"
                ),
            ),
            (
                ExtractionMethod::SpatialPattern,
                "located_in",
                format!(
                    r"{DET}(?P<subj>{e})[ \t]+(?:(?i:is|was|are|were)[ \t]+)?(?i:located|situated|based|headquartered)[ \t]+(?i:in|at|on|near)[ \t]+{DET}(?P<obj>{e})"
                ),
            ),
            (
                ExtractionMethod::SpatialPattern,
                "located_in",
                format!(r"(?P<subj>{CJK_SPAN}+?)(?:位于|坐落于|地处)(?P<obj>{CJK_SPAN}+)"),
            ),
            (
                ExtractionMethod::ActionPattern,
                "has_outcome",
                format!(
                    r"{DET}(?P<subj>{e})[ \t]+(?i:results[ \t]+in|resulted[ \t]+in|leads[ \t]+to|led[ \t]+to|produces|produced|yields|yielded)[ \t]+{DET}(?P<obj>{e})"
                ),
            ),
            (
                ExtractionMethod::ActionPattern,
                "has_condition",
                format!(
                    r"{DET}(?P<subj>{e})[ \t]+(?i:requires|required|depends[ \t]+on|depended[ \t]+on|is[ \t]+triggered[ \t]+by|is[ \t]+conditioned[ \t]+on)[ \t]+{DET}(?P<obj>{e})"
                ),
            ),
            (
                ExtractionMethod::ActionPattern,
                "has_outcome",
                format!(r"(?P<subj>{CJK_SPAN}+?)(?:导致|产生)(?P<obj>{CJK_SPAN}+)"),
            ),
            (
                ExtractionMethod::ActionPattern,
                "has_condition",
                format!(r"(?P<subj>{CJK_SPAN}+?)(?:需要|取决于|依赖于)(?P<obj>{CJK_SPAN}+)"),
            ),
            (
                ExtractionMethod::ContainmentPattern,
                "contains",
                format!(
                    r"{DET}(?P<subj>{e})[ \t]+(?i:contains|contained|includes|included|consists[ \t]+of|comprises|is[ \t]+composed[ \t]+of)[ \t]+{DET}(?P<obj>{e})"
                ),
            ),
            (
                ExtractionMethod::ContainmentPattern,
                "contains",
                format!(
                    r"{DET}(?P<obj>{e})[ \t]+(?i:is|are|was|were)[ \t]+(?i:part|a[ \t]+part|a[ \t]+component|a[ \t]+member)[ \t]+(?i:of)[ \t]+{DET}(?P<subj>{e})"
                ),
            ),
            (
                ExtractionMethod::ContainmentPattern,
                "contains",
                format!(r"(?P<subj>{CJK_SPAN}+?)(?:包含|包括)(?P<obj>{CJK_SPAN}+)"),
            ),
        ];

        let families = family_specs
            .into_iter()
            .filter_map(|(method, predicate, pattern)| {
                compile(&pattern).map(|regex| FamilyRule {
                    regex,
                    predicate,
                    method,
                    confidence: family_confidence(method),
                })
            })
            .collect();

        let mut relations = Vec::new();
        let mut triggers = Vec::new();
        for (name, def) in &schema.relation_types {
            if name == &instance_relation {
                continue;
            }
            let surfaces = relation_surfaces(name, def);
            if surfaces.is_empty() {
                continue;
            }
            let alternatives: Vec<String> = surfaces
                .iter()
                .map(|s| regex::escape(s).replace(' ', r"[ \t]+"))
                .collect();
            let pattern = format!(
                r"{DET}(?P<subj>{e})[ \t]+(?i:{})[ \t]+{DET}(?P<obj>{e})",
                alternatives.join("|")
            );
            if let Some(regex) = compile(&pattern) {
                relations.push(RelationRule {
                    regex,
                    predicate: name.clone(),
                    def: def.clone(),
                });
            }
            triggers.push(Trigger {
                predicate: name.clone(),
                surfaces,
            });
        }
        triggers.extend(DEFAULT_TRIGGERS.iter().map(|(predicate, surfaces)| Trigger {
            predicate: predicate.to_string(),
            surfaces: surfaces.iter().map(|s| s.to_string()).collect(),
        }));

        Self {
            schema_id: schema.id.clone(),
            instance_relation,
            instance_min_confidence,
            class_names,
            instance_rules,
            families,
            relations,
            entity_spans: compile(CAP_PHRASE),
            triggers,
        }
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Run every family over the text and deduplicate the candidates
    pub fn extract(&self, text: &str, inferer: &LayeredInferer<'_>) -> Vec<CandidateTriple> {
        let mut triples = Vec::new();

        self.extract_instances(text, inferer, &mut triples);
        for rule in &self.families {
            self.apply_family(rule, text, &mut triples);
        }
        self.extract_relation_triggers(text, inferer, &mut triples);
        self.extract_co_occurrences(text, &mut triples);

        let raw = triples.len();
        let triples = merge_and_deduplicate(triples);
        tracing::debug!(
            schema = %self.schema_id,
            raw,
            unique = triples.len(),
            "Rule extraction finished"
        );
        triples
    }

    fn extract_instances(
        &self,
        text: &str,
        inferer: &LayeredInferer<'_>,
        out: &mut Vec<CandidateTriple>,
    ) {
        let window = inferer.config().context_window;
        for regex in &self.instance_rules {
            for caps in regex.captures_iter(text) {
                let Some((subject, object, evidence)) = spans(&caps) else {
                    continue;
                };
                let (start, end) = match caps.get(0) {
                    Some(m) => (m.start(), m.end()),
                    None => continue,
                };
                let context = context_window(text, start, end, window);

                let subject_type = inferer.infer(&subject, Some(context));
                let object_type = inferer.infer(&object, Some(context));
                if !(subject_type.confidence() > self.instance_min_confidence
                    && object_type.confidence() > self.instance_min_confidence)
                {
                    tracing::trace!(subject = %subject, object = %object, "Instance span not validated");
                    continue;
                }

                let confidence = INSTANCE_CONFIDENCE
                    .min(subject_type.confidence())
                    .min(object_type.confidence());
                // A span naming a declared type takes its declared spelling
                let object = self
                    .class_names
                    .get(&normalize_term(&object))
                    .cloned()
                    .unwrap_or(object);
                out.push(
                    CandidateTriple::new(
                        subject,
                        self.instance_relation.clone(),
                        object,
                        confidence,
                        ExtractionMethod::InstancePattern,
                    )
                    .with_evidence(evidence),
                );
            }
        }
    }

    fn apply_family(&self, rule: &FamilyRule, text: &str, out: &mut Vec<CandidateTriple>) {
        for caps in rule.regex.captures_iter(text) {
            if let Some((subject, object, evidence)) = spans(&caps) {
                out.push(
                    CandidateTriple::new(subject, rule.predicate, object, rule.confidence, rule.method)
                        .with_evidence(evidence),
                );
            }
        }
    }

    fn extract_relation_triggers(
        &self,
        text: &str,
        inferer: &LayeredInferer<'_>,
        out: &mut Vec<CandidateTriple>,
    ) {
        let window = inferer.config().context_window;
        for rule in &self.relations {
            for caps in rule.regex.captures_iter(text) {
                let Some((subject, object, evidence)) = spans(&caps) else {
                    continue;
                };
                let context = caps
                    .get(0)
                    .map(|m| context_window(text, m.start(), m.end(), window));

                // Unresolved endpoints pass; resolved ones must fit the declaration
                let subject_ok = inferer
                    .infer(&subject, context)
                    .entity_type()
                    .map_or(true, |ty| rule.def.allows_subject(ty));
                let object_ok = inferer
                    .infer(&object, context)
                    .entity_type()
                    .map_or(true, |ty| rule.def.allows_object(ty));
                if !(subject_ok && object_ok) {
                    tracing::trace!(
                        predicate = %rule.predicate,
                        subject = %subject,
                        object = %object,
                        "Relation trigger rejected by domain/range"
                    );
                    continue;
                }

                out.push(
                    CandidateTriple::new(
                        subject,
                        rule.predicate.clone(),
                        object,
                        RELATION_TRIGGER_CONFIDENCE,
                        ExtractionMethod::RelationTrigger,
                    )
                    .with_evidence(evidence),
                );
            }
        }
    }

    fn extract_co_occurrences(&self, text: &str, out: &mut Vec<CandidateTriple>) {
        let Some(entity_spans) = &self.entity_spans else {
            return;
        };

        for sentence in split_sentences(text) {
            let entities: Vec<(usize, usize, String)> = entity_spans
                .find_iter(sentence)
                .filter_map(|m| clean_span(m.as_str()).map(|name| (m.start(), m.end(), name)))
                .collect();

            for pair in entities.windows(2) {
                let (_, a_end, a) = &pair[0];
                let (b_start, _, b) = &pair[1];
                if b_start - a_end > MAX_CO_OCCURRENCE_GAP || a.eq_ignore_ascii_case(b) {
                    continue;
                }
                let between = sentence[*a_end..*b_start].to_lowercase();
                let trigger = self
                    .triggers
                    .iter()
                    .find(|t| t.surfaces.iter().any(|s| contains_term(&between, s)));

                if let Some(trigger) = trigger {
                    out.push(
                        CandidateTriple::new(
                            a.clone(),
                            trigger.predicate.clone(),
                            b.clone(),
                            CO_OCCURRENCE_CONFIDENCE,
                            ExtractionMethod::CoOccurrence,
                        )
                        .with_evidence(sentence),
                    );
                }
            }
        }
    }
}

/// Base confidence of a rule family
pub fn family_confidence(method: ExtractionMethod) -> f32 {
    match method {
        ExtractionMethod::InstancePattern => INSTANCE_CONFIDENCE,
        ExtractionMethod::TemporalPattern => TEMPORAL_CONFIDENCE,
        ExtractionMethod::SpatialPattern => SPATIAL_CONFIDENCE,
        ExtractionMethod::ActionPattern => ACTION_CONFIDENCE,
        ExtractionMethod::ContainmentPattern => CONTAINMENT_CONFIDENCE,
        ExtractionMethod::RelationTrigger => RELATION_TRIGGER_CONFIDENCE,
        ExtractionMethod::CoOccurrence => CO_OCCURRENCE_CONFIDENCE,
        ExtractionMethod::Oracle => 0.0,
    }
}

/// Cleaned subject, object and the matched snippet
fn spans(caps: &Captures<'_>) -> Option<(String, String, String)> {
    let subject = clean_span(caps.name("subj")?.as_str())?;
    let object = clean_span(caps.name("obj")?.as_str())?;
    if subject.eq_ignore_ascii_case(&object) {
        return None;
    }
    let evidence = caps.get(0)?.as_str().trim().to_string();
    Some((subject, object, evidence))
}

/// Trim punctuation and leading determiners; reject bare stopwords
fn clean_span(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_end_matches(|c: char| ".,;:!?，。；：！？".contains(c))
        .trim();

    let mut words: Vec<&str> = trimmed.split_whitespace().collect();
    while words.len() > 1 && DETERMINERS.contains(&words[0].to_lowercase().as_str()) {
        words.remove(0);
    }
    if words.is_empty() {
        return None;
    }
    if words.len() == 1 && STOPWORDS.contains(&words[0].to_lowercase().as_str()) {
        return None;
    }
    Some(words.join(" "))
}

/// Lower-cased surface forms of a relation name and its aliases
fn relation_surfaces(name: &str, def: &RelationTypeDef) -> Vec<String> {
    let mut surfaces: Vec<String> = Vec::new();
    for raw in std::iter::once(name).chain(def.aliases.iter().map(String::as_str)) {
        let base = split_identifier(raw);
        if base.is_empty() {
            continue;
        }
        let mut forms = vec![base.clone()];
        if !base.contains(' ') && base.chars().all(|c| c.is_ascii_alphabetic()) {
            match base.strip_suffix('s') {
                Some(stem) if !stem.is_empty() => forms.push(stem.to_string()),
                _ => forms.push(format!("{}s", base)),
            }
        }
        for form in forms {
            if !surfaces.contains(&form) {
                surfaces.push(form);
            }
        }
    }
    // Longest first so alternation prefers the most specific surface
    surfaces.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    surfaces
}

/// `located_in` / `isPartOf` to `located in` / `is part of`
fn split_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.trim().chars() {
        if c == '_' || c == '-' {
            out.push(' ');
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase();
        out.extend(c.to_lowercase());
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
