use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::models::{ActionDescriptor, ArgCapability, ArgType, Argument};
use crate::program;

/// A single broken invariant of an action descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    EmptyVersion,
    DuplicateAction { action: String },
    DuplicateArgument { action: String, argument: String },
    MalformedProgram { action: String, detail: String },
    PlaceholderWithoutArgument { action: String, placeholder: String },
    ArgumentNotInProgram { action: String, argument: String },
    MissingExtension { action: String, argument: String },
    EmptySet { action: String, argument: String },
    ValueNotInSet { action: String, argument: String, value: String },
    UnknownFlagBits { action: String, argument: String, bits: u32 },
    InvalidNumber { action: String, argument: String, value: String },
    InvalidLocal { action: String, value: String },
    PathFlagsOnNonPath { action: String, argument: String, ty: ArgType, capabilities: Vec<ArgCapability> },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyVersion => write!(f, "descriptor version is empty"),
            Violation::DuplicateAction { action } => {
                write!(f, "action name '{}' is used more than once", action)
            }
            Violation::DuplicateArgument { action, argument } => write!(
                f,
                "{}: argument name '{}' is used more than once",
                action, argument
            ),
            Violation::MalformedProgram { action, detail } => {
                write!(f, "{}: program template is malformed: {}", action, detail)
            }
            Violation::PlaceholderWithoutArgument { action, placeholder } => write!(
                f,
                "{}: placeholder '${{{}}}' has no matching argument",
                action, placeholder
            ),
            Violation::ArgumentNotInProgram { action, argument } => write!(
                f,
                "{}: argument '{}' is not referenced by the program",
                action, argument
            ),
            Violation::MissingExtension { action, argument } => write!(
                f,
                "{}: file_path argument '{}' has no 'ext'",
                action, argument
            ),
            Violation::EmptySet { action, argument } => {
                write!(f, "{}: argument '{}' has an empty 'set'", action, argument)
            }
            Violation::ValueNotInSet { action, argument, value } => write!(
                f,
                "{}: default '{}' of argument '{}' is not in its 'set'",
                action, value, argument
            ),
            Violation::UnknownFlagBits { action, argument, bits } => write!(
                f,
                "{}: argument '{}' has undefined flag bits {:#x}",
                action, argument, bits
            ),
            Violation::InvalidNumber { action, argument, value } => write!(
                f,
                "{}: default '{}' of numeric argument '{}' does not parse",
                action, value, argument
            ),
            Violation::InvalidLocal { action, value } => write!(
                f,
                "{}: 'local' must be \"True\" or \"False\", got '{}'",
                action, value
            ),
            Violation::PathFlagsOnNonPath { action, argument, ty, capabilities } => {
                let names: Vec<String> = capabilities.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "{}: {} argument '{}' is flagged as {}",
                    action,
                    ty,
                    argument,
                    names.join(" and ")
                )
            }
        }
    }
}

/// Check the descriptor invariants. Empty result means valid.
pub fn validate(d: &ActionDescriptor) -> Vec<Violation> {
    let mut out = Vec::new();

    if d.version.trim().is_empty() {
        out.push(Violation::EmptyVersion);
    }

    let mut action_names = HashSet::new();
    for action in &d.actions {
        if !action_names.insert(action.name.as_str()) {
            out.push(Violation::DuplicateAction { action: action.name.clone() });
        }
        let mut arg_names = HashSet::new();
        for arg in &action.args {
            if !arg_names.insert(arg.name.as_str()) {
                out.push(Violation::DuplicateArgument {
                    action: action.name.clone(),
                    argument: arg.name.clone(),
                });
            }
            check_argument(&action.name, arg, &mut out);
        }

        match program::placeholders(&action.program) {
            Ok(phs) => {
                let used: BTreeSet<&str> = phs.iter().map(|p| p.name.as_str()).collect();
                for name in &used {
                    if !arg_names.contains(name) {
                        out.push(Violation::PlaceholderWithoutArgument {
                            action: action.name.clone(),
                            placeholder: name.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                out.push(Violation::MalformedProgram {
                    action: action.name.clone(),
                    detail: e.to_string(),
                });
            }
        }
    }

    out
}

/// Findings that do not make a descriptor invalid but usually point at a
/// mistake. `validate --strict` treats them as errors.
pub fn warnings(d: &ActionDescriptor) -> Vec<Violation> {
    let mut out = Vec::new();
    for action in &d.actions {
        // An absent `local` is fine; the host treats it as remote.
        if !action.local.trim().is_empty() && action.is_local().is_none() {
            out.push(Violation::InvalidLocal {
                action: action.name.clone(),
                value: action.local.clone(),
            });
        }

        if let Ok(phs) = program::placeholders(&action.program) {
            let used: HashSet<&str> = phs.iter().map(|p| p.name.as_str()).collect();
            for arg in action.args.iter().filter(|a| !used.contains(a.name.as_str())) {
                out.push(Violation::ArgumentNotInProgram {
                    action: action.name.clone(),
                    argument: arg.name.clone(),
                });
            }
        }

        for arg in &action.args {
            if (arg.flags.is_input_path() || arg.flags.is_output_path()) && !arg.ty.is_path() {
                out.push(Violation::PathFlagsOnNonPath {
                    action: action.name.clone(),
                    argument: arg.name.clone(),
                    ty: arg.ty.clone(),
                    capabilities: arg.flags.capabilities(),
                });
            }
        }
    }
    out
}

fn check_argument(action: &str, arg: &Argument, out: &mut Vec<Violation>) {
    if arg.ty == ArgType::FilePath && arg.ext.as_deref().map_or(true, |e| e.trim().is_empty()) {
        out.push(Violation::MissingExtension {
            action: action.to_string(),
            argument: arg.name.clone(),
        });
    }

    match &arg.set {
        Some(entries) if entries.is_empty() => out.push(Violation::EmptySet {
            action: action.to_string(),
            argument: arg.name.clone(),
        }),
        Some(_) if !arg.allows(&arg.value) => out.push(Violation::ValueNotInSet {
            action: action.to_string(),
            argument: arg.name.clone(),
            value: arg.value.clone(),
        }),
        _ => {}
    }

    let bits = arg.flags.unknown_bits();
    if bits != 0 {
        out.push(Violation::UnknownFlagBits {
            action: action.to_string(),
            argument: arg.name.clone(),
            bits,
        });
    }

    // Empty numeric defaults leave the field blank in the host UI.
    let bad_number = match arg.ty {
        ArgType::Float => !arg.value.is_empty() && arg.value.trim().parse::<f64>().is_err(),
        ArgType::Int => !arg.value.is_empty() && arg.value.trim().parse::<i64>().is_err(),
        _ => false,
    };
    if bad_number {
        out.push(Violation::InvalidNumber {
            action: action.to_string(),
            argument: arg.name.clone(),
            value: arg.value.clone(),
        });
    }
}
