use dexter_core::{Action, MatchRule};
use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;
use std::io::Read;
use thiserror::Error;

/// Configuration errors found while loading rules. These abort the run.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule {index}: invalid pattern '{expr}': {source}")]
    BadPattern {
        index: usize,
        expr: String,
        #[source]
        source: regex::Error,
    },
    #[error("Rule {index}: malformed placeholder in '{repl}'")]
    MalformedPlaceholder { index: usize, repl: String },
    #[error("Rule {index}: unknown transform '{name}'")]
    UnknownTransform { index: usize, name: String },
    #[error("Rule {index}: template refers to group {group} but '{expr}' has {available}")]
    NoSuchGroup {
        index: usize,
        expr: String,
        group: usize,
        available: usize,
    },
    #[error("Rule file: {0}")]
    Csv(#[from] csv::Error),
    #[error("Rule file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Rule file line {line}: {message}")]
    BadRecord { line: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Lower,
    Title,
}

impl Transform {
    fn parse(name: &str) -> Option<Transform> {
        match name {
            "" | "id" | "identity" => Some(Transform::Identity),
            "lower" | "lowercase" => Some(Transform::Lower),
            "title" | "cap" | "capitalize" => Some(Transform::Title),
            _ => None,
        }
    }

    fn apply(self, text: &str) -> String {
        match self {
            Transform::Identity => text.to_string(),
            Transform::Lower => text.to_lowercase(),
            Transform::Title => title_case(text),
        }
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Literal(String),
    Group(usize, Transform),
}

/// A parsed `repl` template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pieces: Vec<Piece>,
}

impl Template {
    fn parse(repl: &str, index: usize) -> Result<Template, RuleError> {
        let malformed = || RuleError::MalformedPlaceholder {
            index,
            repl: repl.to_string(),
        };

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = repl.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => body.push(ch),
                            None => return Err(malformed()),
                        }
                    }
                    let (group, transform) = match body.split_once('.') {
                        Some((g, t)) => (g, t),
                        None => (body.as_str(), ""),
                    };
                    let group: usize = group.trim().parse().map_err(|_| malformed())?;
                    let transform =
                        Transform::parse(transform.trim()).ok_or_else(|| RuleError::UnknownTransform {
                            index,
                            name: transform.to_string(),
                        })?;
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Group(group, transform));
                }
                '}' => return Err(malformed()),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(Template { pieces })
    }

    fn max_group(&self) -> Option<usize> {
        self.pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Group(g, _) => Some(*g),
                Piece::Literal(_) => None,
            })
            .max()
    }

    fn expand(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Group(g, transform) => {
                    let text = caps.get(*g).map_or("", |m| m.as_str());
                    out.push_str(&transform.apply(text));
                }
            }
        }
        out
    }
}

/// A rule with its case-insensitive regex and parsed template.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: MatchRule,
    regex: Regex,
    template: Template,
}

impl CompiledRule {
    pub fn compile(rule: MatchRule, index: usize) -> Result<Self, RuleError> {
        let regex = RegexBuilder::new(&rule.expr)
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleError::BadPattern {
                index,
                expr: rule.expr.clone(),
                source,
            })?;
        let template = Template::parse(&rule.repl, index)?;
        let available = regex.captures_len() - 1;
        if let Some(group) = template.max_group() {
            if group > available {
                return Err(RuleError::NoSuchGroup {
                    index,
                    expr: rule.expr.clone(),
                    group,
                    available,
                });
            }
        }
        Ok(CompiledRule {
            rule,
            regex,
            template,
        })
    }

    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    pub fn action(&self) -> Action {
        self.rule.action
    }

    pub fn account(&self) -> &str {
        &self.rule.acct
    }

    pub fn matches(&self, description: &str) -> bool {
        self.regex.is_match(description)
    }

    /// Expands the template against the first match, or `None` when the
    /// pattern does not match.
    pub fn apply(&self, description: &str) -> Option<String> {
        self.regex
            .captures(description)
            .map(|caps| self.template.expand(&caps))
    }

    /// Replaces every match inside `description` with the expanded template.
    pub fn substitute(&self, description: &str) -> String {
        self.regex
            .replace_all(description, |caps: &Captures<'_>| self.template.expand(caps))
            .into_owned()
    }
}

/// Ordered, compiled rule table. Immutable for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<MatchRule>,
}

#[derive(Debug, Deserialize)]
struct RuleRecord {
    action: String,
    expr: String,
    #[serde(default)]
    repl: String,
    #[serde(default)]
    acct: String,
}

impl RuleSet {
    pub fn new(rules: Vec<MatchRule>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .enumerate()
            .map(|(idx, rule)| CompiledRule::compile(rule, idx + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Parses `[[rule]]` tables.
    pub fn parse_toml(content: &str) -> Result<Vec<MatchRule>, RuleError> {
        let file: RuleFile = toml::from_str(content)?;
        Ok(file.rules)
    }

    /// Parses CSV with the header `action,expr,repl,acct`.
    pub fn parse_csv<R: Read>(data: R) -> Result<Vec<MatchRule>, RuleError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(data);
        let mut rules = Vec::new();
        for (idx, record) in reader.deserialize::<RuleRecord>().enumerate() {
            let record = record?;
            let action = record.action.parse().map_err(|e: dexter_core::LedgerError| {
                RuleError::BadRecord {
                    line: idx + 2,
                    message: e.to_string(),
                }
            })?;
            rules.push(MatchRule {
                action,
                expr: record.expr,
                repl: record.repl,
                acct: record.acct,
            });
        }
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    /// First rule in load order whose action is in `actions` and whose
    /// pattern matches `description`.
    pub fn find(&self, description: &str, actions: &[Action]) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .filter(|r| actions.contains(&r.action()))
            .find(|r| r.matches(description))
    }

    /// Applies every `substitute` rule in order.
    pub fn substitute_all(&self, description: &str) -> String {
        self.rules
            .iter()
            .filter(|r| r.action() == Action::Substitute)
            .fold(description.to_string(), |desc, r| r.substitute(&desc))
    }

    /// Suggested description for an entry left for interactive completion.
    pub fn suggest(&self, description: &str) -> String {
        match self.find(description, &[Action::Fill]).and_then(|r| r.apply(description)) {
            Some(desc) => desc,
            None => self.substitute_all(description),
        }
    }
}
