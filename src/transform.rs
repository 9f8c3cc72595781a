//! Value-transform pipeline for trigger target fields.
//!
//! Transform specs like `substr(0,3)` or `regex_replace(\s+,-)` are parsed
//! once at configuration load into a closed [`Transform`] variant and then
//! applied left-to-right per message. A transform carrying an invalid regex
//! is kept in the chain but acts as a pass-through, so a bad pattern never
//! aborts delivery.

use std::collections::BTreeMap;

use regex::Regex;

use crate::template;

/// One parsed, parameterized string-rewrite operation.
#[derive(Debug, Clone)]
pub enum Transform {
    Lower,
    Upper,
    /// Character-based slice; negative `start` counts from the end.
    Substr { start: i64, len: Option<i64> },
    Replace { old: String, new: String },
    Prefix(String),
    Suffix(String),
    Truncate(usize),
    /// Extract a capture group; the original value on no match.
    RegexExtract { regex: Option<Regex>, group: usize },
    /// `$1`-style group references in the replacement.
    RegexReplace {
        regex: Option<Regex>,
        replacement: String,
    },
    /// Conditional substitution; without both branches it acts as a filter
    /// (value on match, empty string otherwise).
    RegexMatch {
        regex: Option<Regex>,
        on_match: Option<String>,
        on_no_match: Option<String>,
    },
}

/// A transform spec that could not be parsed into a known operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unrecognized transform: {0}")]
pub struct UnknownTransform(pub String);

impl Transform {
    /// Parse a single spec like `lower` or `replace(old,new)`.
    pub fn parse(spec: &str) -> Result<Self, UnknownTransform> {
        let spec = spec.trim();
        let (name, args_str) = match spec.find('(') {
            Some(open) => {
                let close = spec
                    .rfind(')')
                    .ok_or_else(|| UnknownTransform(spec.to_string()))?;
                if close < open {
                    return Err(UnknownTransform(spec.to_string()));
                }
                (spec[..open].trim(), spec[open + 1..close].trim())
            }
            None => (spec, ""),
        };

        match name {
            "lower" => Ok(Transform::Lower),
            "upper" => Ok(Transform::Upper),
            "substr" => {
                let args = split_args(args_str);
                let start = args.first().map(|a| parse_int(a)).unwrap_or(0);
                let len = args.get(1).map(|a| parse_int(a));
                Ok(Transform::Substr { start, len })
            }
            "replace" => {
                let args = split_args(args_str);
                if args.len() < 2 {
                    return Err(UnknownTransform(spec.to_string()));
                }
                Ok(Transform::Replace {
                    old: args[0].clone(),
                    new: args[1].clone(),
                })
            }
            "prefix" => Ok(Transform::Prefix(strip_quotes(args_str).to_string())),
            "suffix" => Ok(Transform::Suffix(strip_quotes(args_str).to_string())),
            "truncate" => {
                let n = parse_int(args_str).max(0) as usize;
                Ok(Transform::Truncate(n))
            }
            "regex_extract" => {
                let args = split_args(args_str);
                let pattern = args
                    .first()
                    .ok_or_else(|| UnknownTransform(spec.to_string()))?;
                let group = args.get(1).map(|a| parse_int(a).max(0) as usize).unwrap_or(0);
                Ok(Transform::RegexExtract {
                    regex: compile(pattern),
                    group,
                })
            }
            "regex_replace" => {
                let args = split_args(args_str);
                if args.len() < 2 {
                    return Err(UnknownTransform(spec.to_string()));
                }
                Ok(Transform::RegexReplace {
                    regex: compile(&args[0]),
                    replacement: args[1].clone(),
                })
            }
            "regex_match" => {
                let args = split_args(args_str);
                let pattern = args
                    .first()
                    .ok_or_else(|| UnknownTransform(spec.to_string()))?;
                // Both branches or neither; a lone second argument falls back
                // to filter behavior.
                let (on_match, on_no_match) = if args.len() >= 3 {
                    (Some(args[1].clone()), Some(args[2].clone()))
                } else {
                    (None, None)
                };
                Ok(Transform::RegexMatch {
                    regex: compile(pattern),
                    on_match,
                    on_no_match,
                })
            }
            _ => Err(UnknownTransform(spec.to_string())),
        }
    }

    /// Apply this transform to a value.
    pub fn apply(&self, value: &str) -> String {
        self.apply_with(value, &BTreeMap::new())
    }

    /// Apply with trigger variables in scope. Only `regex_match` branch
    /// values carry `{var}` placeholders; a missing variable keeps the
    /// branch text as-is.
    pub fn apply_with(&self, value: &str, vars: &BTreeMap<String, String>) -> String {
        match self {
            Transform::Lower => value.to_lowercase(),
            Transform::Upper => value.to_uppercase(),
            Transform::Substr { start, len } => slice_chars(value, *start, *len),
            Transform::Replace { old, new } => value.replace(old.as_str(), new),
            Transform::Prefix(p) => format!("{p}{value}"),
            Transform::Suffix(s) => format!("{value}{s}"),
            Transform::Truncate(n) => value.chars().take(*n).collect(),
            Transform::RegexExtract { regex, group } => {
                let Some(re) = regex else {
                    return value.to_string();
                };
                match re.captures(value) {
                    Some(caps) => caps
                        .get(*group)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| value.to_string()),
                    None => value.to_string(),
                }
            }
            Transform::RegexReplace { regex, replacement } => match regex {
                Some(re) => re.replace_all(value, replacement.as_str()).into_owned(),
                None => value.to_string(),
            },
            Transform::RegexMatch {
                regex,
                on_match,
                on_no_match,
            } => {
                let Some(re) = regex else {
                    return value.to_string();
                };
                let matched = re.is_match(value);
                match (on_match, on_no_match) {
                    (Some(t), Some(f)) => {
                        let branch = if matched { t } else { f };
                        template::expand(branch, vars).unwrap_or_else(|_| branch.clone())
                    }
                    _ => {
                        if matched {
                            value.to_string()
                        } else {
                            String::new()
                        }
                    }
                }
            }
        }
    }
}

/// Parse a list of specs, dropping (and warning about) anything unknown.
pub fn parse_chain(specs: &[String]) -> Vec<Transform> {
    specs
        .iter()
        .filter_map(|spec| match Transform::parse(spec) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(%e, "Skipping transform");
                None
            }
        })
        .collect()
}

/// Apply a chain left-to-right.
pub fn apply_chain(value: &str, chain: &[Transform]) -> String {
    apply_chain_with(value, chain, &BTreeMap::new())
}

/// Apply a chain left-to-right with trigger variables in scope.
pub fn apply_chain_with(
    value: &str,
    chain: &[Transform],
    vars: &BTreeMap<String, String>,
) -> String {
    chain
        .iter()
        .fold(value.to_string(), |v, t| t.apply_with(&v, vars))
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, %e, "Invalid transform regex; treating as pass-through");
            None
        }
    }
}

fn parse_int(arg: &str) -> i64 {
    strip_quotes(arg.trim()).parse().unwrap_or(0)
}

fn strip_quotes(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Python-style character slice with negative-index support.
fn slice_chars(value: &str, start: i64, len: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let total = chars.len() as i64;
    let begin = if start < 0 {
        (total + start).max(0)
    } else {
        start.min(total)
    };
    let end = match len {
        Some(l) => (begin + l.max(0)).min(total),
        None => total,
    };
    chars[begin as usize..end.max(begin) as usize].iter().collect()
}

/// Split comma-separated transform arguments, honoring quotes and keeping
/// backslash escapes intact (they belong to the regex, not the splitter).
fn split_args(args_str: &str) -> Vec<String> {
    if args_str.is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape_next = false;

    for c in args_str.chars() {
        if escape_next {
            current.push(c);
            escape_next = false;
        } else if c == '\\' {
            escape_next = true;
            current.push(c);
        } else if c == '"' || c == '\'' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c == ',' && !in_quotes {
            args.push(finalize_arg(&current));
            current = String::new();
        } else {
            current.push(c);
        }
    }
    args.push(finalize_arg(&current));

    args
}

/// Trim whitespace, then strip one pair of matching outer quotes so quoted
/// arguments can carry leading/trailing spaces or commas.
fn finalize_arg(raw: &str) -> String {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(spec: &str, value: &str) -> String {
        Transform::parse(spec).unwrap().apply(value)
    }

    #[test]
    fn case_transforms() {
        assert_eq!(apply("lower", "MacBook"), "macbook");
        assert_eq!(apply("upper", "dev"), "DEV");
        // Parenthesized forms work too.
        assert_eq!(apply("lower()", "A"), "a");
    }

    #[test]
    fn substr_and_truncate() {
        assert_eq!(apply("substr(0,3)", "workstation"), "wor");
        assert_eq!(apply("substr(4)", "workstation"), "station");
        assert_eq!(apply("substr(-4)", "workstation"), "tion");
        assert_eq!(apply("truncate(4)", "workstation"), "work");
        assert_eq!(apply("truncate(99)", "ws"), "ws");
    }

    #[test]
    fn replace_prefix_suffix() {
        assert_eq!(apply("replace(-, _)", "my-phone"), "my_phone");
        assert_eq!(apply("prefix(dev-)", "box"), "dev-box");
        assert_eq!(apply("suffix(-01)", "box"), "box-01");
        assert_eq!(apply("prefix('srv ')", "x"), "srv x");
    }

    #[test]
    fn regex_extract_groups() {
        assert_eq!(apply(r"regex_extract(\d+)", "host42x"), "42");
        assert_eq!(apply(r"regex_extract((\w+)-(\w+),2)", "dev-box"), "box");
        // Out-of-range group falls back to the full match.
        assert_eq!(apply(r"regex_extract((\w+)-(\w+),9)", "dev-box"), "dev-box");
    }

    #[test]
    fn regex_extract_no_match_is_identity() {
        assert_eq!(apply(r"regex_extract(\d+)", "no digits"), "no digits");
    }

    #[test]
    fn regex_invalid_pattern_is_identity() {
        assert_eq!(apply(r"regex_extract([)", "value"), "value");
        assert_eq!(apply(r"regex_replace([,x)", "value"), "value");
        assert_eq!(apply(r"regex_match([)", "value"), "value");
    }

    #[test]
    fn regex_replace_with_group_refs() {
        assert_eq!(
            apply(r"regex_replace((\w+)@(\w+),$2/$1)", "alice@wonder"),
            "wonder/alice"
        );
        assert_eq!(apply(r"regex_replace(\s+,-)", "a b  c"), "a-b-c");
    }

    #[test]
    fn regex_match_conditional() {
        assert_eq!(apply("regex_match(^prod,live,test)", "prod-1"), "live");
        assert_eq!(apply("regex_match(^prod,live,test)", "dev-1"), "test");
    }

    #[test]
    fn regex_match_branches_expand_variables() {
        let t = Transform::parse("regex_match(^prod,{env}-live,{env}-idle)").unwrap();
        let vars: BTreeMap<String, String> =
            [("env".to_string(), "eu".to_string())].into_iter().collect();
        assert_eq!(t.apply_with("prod-1", &vars), "eu-live");
        assert_eq!(t.apply_with("dev-1", &vars), "eu-idle");
        // Unknown variables keep the branch text verbatim.
        assert_eq!(t.apply_with("prod-1", &BTreeMap::new()), "{env}-live");
    }

    #[test]
    fn regex_match_filter_form() {
        assert_eq!(apply("regex_match(^prod)", "prod-1"), "prod-1");
        assert_eq!(apply("regex_match(^prod)", "dev-1"), "");
    }

    #[test]
    fn unknown_spec_is_rejected() {
        assert!(Transform::parse("frobnicate(3)").is_err());
        assert!(Transform::parse("replace(only-one-arg)").is_err());
    }

    #[test]
    fn chain_applies_left_to_right() {
        let chain = parse_chain(&[
            "lower".to_string(),
            "replace(' ',-)".to_string(),
            "prefix(s-)".to_string(),
        ]);
        assert_eq!(apply_chain("My Phone", &chain), "s-my-phone");
    }

    #[test]
    fn chain_drops_unknown_specs() {
        let chain = parse_chain(&["bogus(1)".to_string(), "upper".to_string()]);
        assert_eq!(chain.len(), 1);
        assert_eq!(apply_chain("ab", &chain), "AB");
    }

    #[test]
    fn quoted_args_keep_commas() {
        assert_eq!(
            apply(r#"replace("a,b", "c")"#, "xa,by"),
            "xcy"
        );
    }
}
