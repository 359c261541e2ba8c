use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::models::Action;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("malformed placeholder near '{0}'")]
    Malformed(String),

    #[error("placeholder '${{{0}}}' has no matching argument")]
    UnknownPlaceholder(String),

    #[error("value supplied for unknown argument '{0}'")]
    UnknownArgument(String),

    #[error("value '{value}' is not allowed for argument '{argument}'")]
    ValueNotAllowed { argument: String, value: String },
}

/// One `${name}` occurrence in a program template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder regex"))
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"))
}

/// Ordered placeholders of a program template.
pub fn placeholders(program: &str) -> Result<Vec<Placeholder>, RenderError> {
    let mut out = Vec::new();
    let mut last_end = 0;

    for caps in placeholder_re().captures_iter(program) {
        let whole = caps.get(0).expect("match 0 is always present");
        check_gap(&program[last_end..whole.start()])?;

        let name = &caps[1];
        if !identifier_re().is_match(name) {
            return Err(RenderError::Malformed(whole.as_str().to_string()));
        }
        out.push(Placeholder {
            name: name.to_string(),
            start: whole.start(),
            end: whole.end(),
        });
        last_end = whole.end();
    }
    check_gap(&program[last_end..])?;

    Ok(out)
}

// A `${` outside a complete match never closes.
fn check_gap(text: &str) -> Result<(), RenderError> {
    match text.find("${") {
        Some(pos) => {
            let fragment: String = text[pos..].chars().take(24).collect();
            Err(RenderError::Malformed(fragment))
        }
        None => Ok(()),
    }
}

/// Substitute every placeholder of the action's program.
///
/// Values come from `values` first, then from the argument's default.
pub fn render(action: &Action, values: &BTreeMap<String, String>) -> Result<String, RenderError> {
    for name in values.keys() {
        if action.arg(name).is_none() {
            return Err(RenderError::UnknownArgument(name.clone()));
        }
    }

    let program = &action.program;
    let mut rendered = String::with_capacity(program.len());
    let mut cursor = 0;

    for ph in placeholders(program)? {
        let arg = action
            .arg(&ph.name)
            .ok_or_else(|| RenderError::UnknownPlaceholder(ph.name.clone()))?;
        let value = values.get(&ph.name).unwrap_or(&arg.value);
        if !arg.allows(value) {
            return Err(RenderError::ValueNotAllowed {
                argument: arg.name.clone(),
                value: value.clone(),
            });
        }

        rendered.push_str(&program[cursor..ph.start]);
        rendered.push_str(value);
        cursor = ph.end;
    }
    rendered.push_str(&program[cursor..]);

    Ok(rendered)
}

/// Parse `key=value` pairs as given on the command line.
pub fn parse_assignments(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{}'", pair))?;
        anyhow::ensure!(!k.trim().is_empty(), "empty argument name in '{}'", pair);
        out.insert(k.trim().to_string(), v.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArgFlags, ArgType, Argument, SetEntry};

    fn arg(name: &str, value: &str) -> Argument {
        Argument {
            name: name.to_string(),
            title: None,
            desc: None,
            flags: ArgFlags::default(),
            ty: ArgType::String,
            ext: None,
            value: value.to_string(),
            set: None,
        }
    }

    fn action(program: &str, args: Vec<Argument>) -> Action {
        Action {
            title: "Test".to_string(),
            name: "test".to_string(),
            desc: String::new(),
            version: "v1".to_string(),
            icon: String::new(),
            category: String::new(),
            local: "True".to_string(),
            subtype: None,
            program: program.to_string(),
            args,
        }
    }

    #[test]
    fn test_placeholders_in_order() {
        let phs = placeholders("tool -i ${input} -o ${output} ${input}").unwrap();
        let names: Vec<_> = phs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["input", "output", "input"]);
        assert_eq!(phs[0].start, 8);
    }

    #[test]
    fn test_placeholders_rejects_unclosed() {
        let err = placeholders("tool -i ${input -o x").unwrap_err();
        assert!(matches!(err, RenderError::Malformed(_)));
    }

    #[test]
    fn test_placeholders_rejects_bad_identifier() {
        assert!(matches!(
            placeholders("tool ${in put}"),
            Err(RenderError::Malformed(_))
        ));
        assert!(matches!(placeholders("tool ${}"), Err(RenderError::Malformed(_))));
    }

    #[test]
    fn test_plain_dollar_is_not_a_placeholder() {
        assert!(placeholders("echo $HOME {x}").unwrap().is_empty());
    }

    #[test]
    fn test_render_uses_values_then_defaults() {
        let a = action(
            "tool -i \"${input}\" --zoom ${zoom}",
            vec![arg("input", ""), arg("zoom", "2.0")],
        );
        let mut values = BTreeMap::new();
        values.insert("input".to_string(), "a b.pdf".to_string());

        assert_eq!(render(&a, &values).unwrap(), "tool -i \"a b.pdf\" --zoom 2.0");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let a = action("tool ${missing}", vec![]);
        assert_eq!(
            render(&a, &BTreeMap::new()).unwrap_err(),
            RenderError::UnknownPlaceholder("missing".to_string())
        );
    }

    #[test]
    fn test_render_unknown_argument() {
        let a = action("tool", vec![]);
        let values = parse_assignments(&["nope=1".to_string()]).unwrap();
        assert_eq!(
            render(&a, &values).unwrap_err(),
            RenderError::UnknownArgument("nope".to_string())
        );
    }

    #[test]
    fn test_render_respects_set() {
        let mut region = arg("region", "us-east-1");
        region.set = Some(vec![
            SetEntry { value: "us-east-1".to_string() },
            SetEntry { value: "eu-west-1".to_string() },
        ]);
        let a = action("tool --region ${region}", vec![region]);

        let ok = parse_assignments(&["region=eu-west-1".to_string()]).unwrap();
        assert_eq!(render(&a, &ok).unwrap(), "tool --region eu-west-1");

        let bad = parse_assignments(&["region=mars-1".to_string()]).unwrap();
        assert!(matches!(
            render(&a, &bad),
            Err(RenderError::ValueNotAllowed { .. })
        ));
    }

    #[test]
    fn test_parse_assignments() {
        let m = parse_assignments(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(m["a"], "1");
        assert_eq!(m["b"], "x=y");
        assert!(parse_assignments(&["novalue".to_string()]).is_err());
        assert!(parse_assignments(&["=v".to_string()]).is_err());
    }
}
