//! Read-step assertions: a small recursive predicate language over the
//! bytes a read returned.

use crate::jsonpath;
use anyhow::Context;
use regex::bytes::Regex;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum Assert {
    Contains(String),
    Regex(Regex),
    /// Inclusive byte-length bounds.
    LengthRange { min: usize, max: usize },
    /// Body parses as JSON and the path resolves to a non-null value.
    JsonPath(String),
    Not(Box<Assert>),
    /// Every inner assertion must pass; an empty list passes.
    All(Vec<Assert>),
}

impl Assert {
    pub fn contains(s: impl Into<String>) -> Self {
        Self::Contains(s.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Check `body`; the error names the predicate that failed.
    pub fn evaluate(&self, body: &[u8]) -> Result<(), String> {
        match self {
            Self::Contains(needle) => {
                if String::from_utf8_lossy(body).contains(needle.as_str()) {
                    Ok(())
                } else {
                    Err(format!("contains {needle:?} assertion failed"))
                }
            }
            Self::Regex(re) => {
                if re.is_match(body) {
                    Ok(())
                } else {
                    Err(format!("regex {:?} assertion failed", re.as_str()))
                }
            }
            Self::LengthRange { min, max } => {
                if (*min..=*max).contains(&body.len()) {
                    Ok(())
                } else {
                    Err(format!(
                        "length {} outside [{min}, {max}] assertion failed",
                        body.len()
                    ))
                }
            }
            Self::JsonPath(path) => {
                let found = serde_json::from_slice::<Value>(body)
                    .ok()
                    .is_some_and(|doc| jsonpath::lookup(&doc, path).is_some());
                if found {
                    Ok(())
                } else {
                    Err(format!("jsonpath {path:?} assertion failed"))
                }
            }
            Self::Not(inner) => match inner.evaluate(body) {
                Ok(()) => Err("not assertion failed".to_string()),
                Err(_) => Ok(()),
            },
            Self::All(all) => all.iter().try_for_each(|a| a.evaluate(body)),
        }
    }
}

/// YAML form: any combination of keys, all of which must hold.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawAssert {
    #[serde(default)]
    contains: Option<String>,
    #[serde(default)]
    regex: Option<String>,
    #[serde(default)]
    len_range: Option<RawLenRange>,
    #[serde(default)]
    jsonpath: Option<String>,
    #[serde(default)]
    jmespath: Option<String>,
    #[serde(default)]
    not: Option<Box<RawAssert>>,
}

#[derive(Debug, Deserialize)]
struct RawLenRange {
    min: usize,
    max: usize,
}

impl TryFrom<RawAssert> for Assert {
    type Error = anyhow::Error;

    fn try_from(raw: RawAssert) -> anyhow::Result<Self> {
        let mut all = Vec::new();
        if let Some(c) = raw.contains.filter(|c| !c.is_empty()) {
            all.push(Assert::Contains(c));
        }
        if let Some(p) = raw.regex.filter(|p| !p.is_empty()) {
            all.push(Assert::regex(&p).with_context(|| format!("invalid regex {p:?}"))?);
        }
        if let Some(r) = raw.len_range {
            all.push(Assert::LengthRange {
                min: r.min,
                max: r.max,
            });
        }
        if let Some(p) = raw.jsonpath.filter(|p| !p.is_empty()) {
            all.push(Assert::JsonPath(p));
        }
        if let Some(p) = raw.jmespath.filter(|p| !p.is_empty()) {
            all.push(Assert::JsonPath(format!("$.{p}")));
        }
        if let Some(inner) = raw.not {
            all.push(Assert::try_from(*inner)?.negate());
        }
        Ok(if all.len() == 1 {
            all.remove(0)
        } else {
            Assert::All(all)
        })
    }
}
