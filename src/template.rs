//! `{name}` template expansion shared by triggers and slash commands.

use std::collections::BTreeMap;

/// A template referenced a variable that is not defined.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing variable in template: {0}")]
pub struct MissingVariable(pub String);

/// Expand `{name}` placeholders against the variable map.
///
/// `{{` and `}}` are literal braces. A placeholder naming an undefined
/// variable fails the whole expansion; the caller decides whether that
/// aborts the action or keeps the raw template.
pub fn expand(template: &str, vars: &BTreeMap<String, String>) -> Result<String, MissingVariable> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    // Unterminated placeholder: keep the raw text.
                    out.push('{');
                    out.push_str(&name);
                    break;
                }
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => return Err(MissingVariable(name)),
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_variables() {
        let v = vars(&[("group1", "feature"), ("group2", "staging")]);
        assert_eq!(
            expand("deploy.sh {group1} {group2}", &v).unwrap(),
            "deploy.sh feature staging"
        );
    }

    #[test]
    fn missing_variable_is_an_error() {
        let v = vars(&[("message", "hi")]);
        let err = expand("echo {nope}", &v).unwrap_err();
        assert_eq!(err, MissingVariable("nope".to_string()));
    }

    #[test]
    fn doubled_braces_are_literal() {
        let v = vars(&[("x", "1")]);
        assert_eq!(expand("a {{b}} {x}", &v).unwrap(), "a {b} 1");
    }

    #[test]
    fn no_placeholders_is_identity() {
        assert_eq!(expand("plain text", &BTreeMap::new()).unwrap(), "plain text");
    }

    #[test]
    fn unterminated_placeholder_kept_verbatim() {
        let v = vars(&[("x", "1")]);
        assert_eq!(expand("echo {x", &v).unwrap(), "echo {x");
    }
}
