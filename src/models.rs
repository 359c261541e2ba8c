use serde::{Deserialize, Serialize};
use std::fmt;

// ---- Action descriptor schema (config.json) ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDescriptor {
    pub name: String,
    pub version: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub title: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    /// "True" / "False"; the host runs local actions on its own machine.
    #[serde(default)]
    pub local: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl Action {
    /// `None` when `local` is not a boolean string.
    pub fn is_local(&self) -> Option<bool> {
        match self.local.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Argument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub flags: ArgFlags,
    #[serde(rename = "type")]
    pub ty: ArgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Vec<SetEntry>>,
}

impl Argument {
    pub fn allows(&self, value: &str) -> bool {
        match &self.set {
            Some(entries) => entries.iter().any(|e| e.value == value),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetEntry {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArgType {
    FilePath,
    FolderPath,
    String,
    Float,
    Int,
    Bool,
    Other(String),
}

impl ArgType {
    pub fn as_str(&self) -> &str {
        match self {
            ArgType::FilePath => "file_path",
            ArgType::FolderPath => "folder_path",
            ArgType::String => "string",
            ArgType::Float => "float",
            ArgType::Int => "int",
            ArgType::Bool => "bool",
            ArgType::Other(s) => s,
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, ArgType::FilePath | ArgType::FolderPath)
    }
}

impl From<String> for ArgType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "file_path" => ArgType::FilePath,
            "folder_path" => ArgType::FolderPath,
            "string" => ArgType::String,
            "float" => ArgType::Float,
            "int" => ArgType::Int,
            "bool" => ArgType::Bool,
            _ => ArgType::Other(s),
        }
    }
}

impl From<ArgType> for String {
    fn from(t: ArgType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named capabilities carried by the `flags` bitmask of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCapability {
    InputPath,
    OutputPath,
}

impl fmt::Display for ArgCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgCapability::InputPath => "input path",
            ArgCapability::OutputPath => "output path",
        })
    }
}

impl ArgCapability {
    pub const ALL: [ArgCapability; 2] = [ArgCapability::InputPath, ArgCapability::OutputPath];

    pub const fn bit(self) -> u32 {
        match self {
            ArgCapability::InputPath => 2,
            ArgCapability::OutputPath => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgFlags(u32);

impl ArgFlags {
    pub const KNOWN_MASK: u32 = 2 | 4;

    pub fn has(self, cap: ArgCapability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn is_input_path(self) -> bool {
        self.has(ArgCapability::InputPath)
    }

    pub fn is_output_path(self) -> bool {
        self.has(ArgCapability::OutputPath)
    }

    pub fn capabilities(self) -> Vec<ArgCapability> {
        ArgCapability::ALL.into_iter().filter(|c| self.has(*c)).collect()
    }

    /// Bits with no defined meaning; zero for a well-formed descriptor.
    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    const SAMPLE: &str = r#"{
        "name": "Sample",
        "version": "v1.0.0",
        "actions": [{
            "title": "Tag",
            "name": "tag_pdf",
            "desc": "Tag a PDF",
            "version": "v1.0.0",
            "icon": "tag",
            "category": "Tags",
            "local": "True",
            "program": "run -i ${input} --zoom ${zoom}",
            "args": [
                { "name": "input", "flags": 2, "type": "file_path", "ext": "pdf", "value": "" },
                { "name": "zoom", "flags": 0, "type": "float", "value": "2.0",
                  "set": [{ "value": "1.0" }, { "value": "2.0" }] }
            ]
        }]
    }"#;

    #[test]
    fn test_descriptor_deserialization() {
        let d: ActionDescriptor = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(d.name, "Sample");
        assert_eq!(d.version, "v1.0.0");
        assert_eq!(d.actions.len(), 1);

        let action = &d.actions[0];
        assert_eq!(action.name, "tag_pdf");
        assert_eq!(action.is_local(), Some(true));
        assert!(action.subtype.is_none());
        assert_eq!(action.args[0].ty, ArgType::FilePath);
        assert_eq!(action.args[0].ext.as_deref(), Some("pdf"));
        assert!(action.args[0].flags.is_input_path());
        assert!(!action.args[0].flags.is_output_path());
        assert_eq!(action.args[1].ty, ArgType::Float);
        assert!(action.args[1].allows("1.0"));
        assert!(!action.args[1].allows("3.0"));
    }

    #[test]
    fn test_arg_type_keeps_unknown_names() {
        let t: ArgType = serde_json::from_str(r#""color""#).unwrap();
        assert_eq!(t, ArgType::Other("color".to_string()));
        assert_eq!(serde_json::to_string(&t).unwrap(), r#""color""#);

        let t: ArgType = serde_json::from_str(r#""file_path""#).unwrap();
        assert_eq!(t, ArgType::FilePath);
    }

    #[test]
    fn test_arg_flags_capabilities() {
        let flags: ArgFlags = serde_json::from_str("4").unwrap();
        assert!(flags.is_output_path());
        assert_eq!(flags.capabilities(), vec![ArgCapability::OutputPath]);
        assert_eq!(flags.unknown_bits(), 0);

        let odd: ArgFlags = serde_json::from_str("11").unwrap();
        assert!(odd.is_input_path());
        assert_eq!(odd.unknown_bits(), 9);
        assert_eq!(serde_json::to_string(&odd).unwrap(), "11");
        assert_eq!(odd.capabilities(), vec![ArgCapability::InputPath]);
        assert_eq!(ArgCapability::OutputPath.to_string(), "output path");
        assert!(ArgType::FolderPath.is_path());
        assert!(!ArgType::Float.is_path());
    }

    #[test]
    fn test_optional_fields_are_skipped() {
        let arg = Argument {
            name: "out".to_string(),
            title: None,
            desc: None,
            flags: ArgFlags::default(),
            ty: ArgType::String,
            ext: None,
            value: "x".to_string(),
            set: None,
        };

        let json = serde_json::to_value(&arg).unwrap();
        assert!(json.get("title").is_none());
        assert!(json.get("set").is_none());
        assert_eq!(json["type"], "string");
        assert_eq!(json["flags"], 0);
    }

    #[test]
    fn test_is_local_rejects_non_boolean() {
        let mut d: ActionDescriptor = serde_json::from_str(SAMPLE).unwrap();
        d.actions[0].local = "false".to_string();
        assert_eq!(d.actions[0].is_local(), Some(false));
        d.actions[0].local = "maybe".to_string();
        assert_eq!(d.actions[0].is_local(), None);
    }
}
