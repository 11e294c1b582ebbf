//! Task complexity classification.
//!
//! Maps raw prompt text onto a four-axis complexity vector using curated
//! pattern tables. Deterministic: the same text always produces the same
//! vector, which makes the optimizer cache and the selector reproducible.

use common::{RouterError, RouterResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One level per axis, ordered from trivial to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ComplexityLevel {
    /// Integer value used for averaging and the weighted score (Low=0 ... VeryHigh=3).
    pub fn as_index(&self) -> u8 {
        match self {
            ComplexityLevel::Low => 0,
            ComplexityLevel::Medium => 1,
            ComplexityLevel::High => 2,
            ComplexityLevel::VeryHigh => 3,
        }
    }

    /// Token budget a task of this level is expected to consume.
    pub fn estimated_tokens(&self) -> u64 {
        match self {
            ComplexityLevel::Low => 200,
            ComplexityLevel::Medium => 500,
            ComplexityLevel::High => 1000,
            ComplexityLevel::VeryHigh => 2000,
        }
    }

    /// Latency stretch factor applied to a provider's average latency.
    pub fn latency_multiplier(&self) -> f64 {
        match self {
            ComplexityLevel::Low => 1.0,
            ComplexityLevel::Medium => 1.2,
            ComplexityLevel::High => 1.5,
            ComplexityLevel::VeryHigh => 2.0,
        }
    }
}

/// Multi-axis complexity vector with the derived overall level and scalar score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    pub reasoning: ComplexityLevel,
    pub knowledge: ComplexityLevel,
    pub computation: ComplexityLevel,
    pub coordination: ComplexityLevel,
    pub overall: ComplexityLevel,
    /// Weighted normalized sum of the axes, in [0, 1].
    pub score: f64,
}

const REASONING_WEIGHT: f64 = 0.30;
const KNOWLEDGE_WEIGHT: f64 = 0.25;
const COMPUTATION_WEIGHT: f64 = 0.25;
const COORDINATION_WEIGHT: f64 = 0.20;

fn word_set(words: &[&str]) -> Regex {
    let alternation = words.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("static pattern set must compile")
}

static REASONING_WORDS: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "prove", "proof", "proofs", "theorem", "lemma", "deduce", "deduction", "infer",
        "inference", "derive", "derivation", "justify", "logic", "logical", "reason", "reasoning",
        "analyze", "analysis", "evaluate", "argument", "formal", "rigorous", "hypothesis",
        "conclude", "conclusion", "paradox", "contradiction", "why",
    ])
});

static KNOWLEDGE_DOMAIN_WORDS: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "history", "historical", "law", "legal", "medicine", "medical", "biology", "physics",
        "chemistry", "economics", "finance", "geography", "literature", "poetry", "poem", "haiku",
        "philosophy", "astronomy", "geology", "psychology", "linguistics", "theorem", "anatomy",
        "architecture",
    ])
});

static KNOWLEDGE_SPECIALIZED_WORDS: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "quantum", "calculus", "integral", "integrals", "derivative", "derivatives", "topology",
        "genomics", "proteomics", "cryptography", "blockchain", "neural", "transformer",
        "relativity", "thermodynamics", "epidemiology", "jurisprudence", "fermat", "ai", "llm",
        "ml",
    ])
});

static COMPUTE_WORDS: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "calculate", "calculation", "compute", "computation", "solve", "solving", "equation",
        "equations", "sum", "multiply", "divide", "division", "integrate", "differentiate",
        "optimize", "optimization", "algorithm", "numeric", "numerical", "matrix", "matrices",
        "probability", "statistics", "calculus", "integral", "integrals",
    ])
});

static HARD_COMPUTE_PHRASES: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "formal proof", "numerical analysis", "linear algebra", "differential equation",
        "differential equations", "monte carlo", "time complexity", "big o", "gradient descent",
        "fourier transform",
    ])
});

/// Arithmetic expressions such as `12 * 7` count toward the computation axis.
static MATH_OPERATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s*[+\-*/^]\s*\d+").expect("static pattern set must compile"));

static COORDINATION_WORDS: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "coordinate", "coordination", "organize", "combine", "merge", "integrate", "orchestrate",
        "collaborate", "sequence", "schedule", "workflow", "pipeline", "first", "then", "next",
        "finally", "afterwards", "steps", "checklist", "delegate",
    ])
});

/// Imperative production verbs and explicit sequencing phrases; a prompt that
/// opens a deliverable-producing workflow weighs double on coordination.
static MULTI_STEP_MARKERS: Lazy<Regex> = Lazy::new(|| {
    word_set(&[
        "write", "create", "build", "design", "develop", "implement", "compose", "draft", "plan",
        "step by step", "multi-step", "end to end",
    ])
});

fn count(regex: &Regex, text: &str) -> u32 {
    regex.find_iter(text).count() as u32
}

/// Thresholds for the reasoning and knowledge axes.
fn level_5_3_1(count: u32) -> ComplexityLevel {
    match count {
        c if c >= 5 => ComplexityLevel::VeryHigh,
        c if c >= 3 => ComplexityLevel::High,
        c if c >= 1 => ComplexityLevel::Medium,
        _ => ComplexityLevel::Low,
    }
}

/// Thresholds for the computation and coordination axes.
fn level_3_2_1(count: u32) -> ComplexityLevel {
    match count {
        c if c >= 3 => ComplexityLevel::VeryHigh,
        c if c >= 2 => ComplexityLevel::High,
        c if c >= 1 => ComplexityLevel::Medium,
        _ => ComplexityLevel::Low,
    }
}

/// Deterministic prompt-text classifier.
#[derive(Debug, Default)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify `text` along all four axes.
    ///
    /// Pure function of the input; empty (or whitespace-only) text is invalid.
    /// Long text is scanned fully, the pattern passes are linear.
    pub fn classify(&self, text: &str) -> RouterResult<Complexity> {
        if text.trim().is_empty() {
            return Err(RouterError::InvalidInput(
                "cannot classify empty text".to_string(),
            ));
        }

        let reasoning = level_5_3_1(count(&REASONING_WORDS, text));

        let knowledge_count =
            count(&KNOWLEDGE_DOMAIN_WORDS, text) + 2 * count(&KNOWLEDGE_SPECIALIZED_WORDS, text);
        let knowledge = level_5_3_1(knowledge_count);

        let computation_count = count(&COMPUTE_WORDS, text)
            + count(&MATH_OPERATORS, text)
            + 2 * count(&HARD_COMPUTE_PHRASES, text);
        let computation = level_3_2_1(computation_count);

        let coordination_count =
            count(&COORDINATION_WORDS, text) + 2 * count(&MULTI_STEP_MARKERS, text);
        let coordination = level_3_2_1(coordination_count);

        Ok(Complexity::from_axes(
            reasoning,
            knowledge,
            computation,
            coordination,
        ))
    }
}

impl Complexity {
    /// Build the derived overall level and scalar score from the four axes.
    pub fn from_axes(
        reasoning: ComplexityLevel,
        knowledge: ComplexityLevel,
        computation: ComplexityLevel,
        coordination: ComplexityLevel,
    ) -> Self {
        let (r, k, c, d) = (
            reasoning.as_index() as f64,
            knowledge.as_index() as f64,
            computation.as_index() as f64,
            coordination.as_index() as f64,
        );

        let average = (r + k + c + d) / 4.0;
        let overall = if average >= 3.0 {
            ComplexityLevel::VeryHigh
        } else if average >= 2.0 {
            ComplexityLevel::High
        } else if average >= 1.0 {
            ComplexityLevel::Medium
        } else {
            ComplexityLevel::Low
        };

        let score = (REASONING_WEIGHT * r
            + KNOWLEDGE_WEIGHT * k
            + COMPUTATION_WEIGHT * c
            + COORDINATION_WEIGHT * d)
            / 3.0;

        Self {
            reasoning,
            knowledge,
            computation,
            coordination,
            overall,
            score,
        }
    }

    /// Uniform complexity across all axes; handy in tests and priors.
    pub fn uniform(level: ComplexityLevel) -> Self {
        Self::from_axes(level, level, level, level)
    }
}
