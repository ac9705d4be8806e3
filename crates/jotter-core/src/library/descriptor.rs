//! Library descriptor format.
//!
//! A descriptor is a JSON document describing what a library contributes
//! to a session:
//!
//! ```json
//! {
//!   "description": "Plotting helpers",
//!   "properties": [{ "name": "theme", "value": "light" }],
//!   "dependencies": ["org.plots:core:$theme"],
//!   "imports": ["plots.*"],
//!   "init": ["val theme = \"$theme\""],
//!   "initCell": [],
//!   "shutdown": [],
//!   "renderers": { "Chart": "render($it)" },
//!   "resources": [{ "name": "plots", "type": "css", "content": "..." }],
//!   "minKernelVersion": "0.2.0"
//! }
//! ```
//!
//! Call-site arguments are substituted into every string as `$name` or
//! `${name}`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::library::definition::{LibraryDefinition, Resource, ResourceKind};
use crate::library::reference::Variable;

static SUBSTITUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("substitution regex is valid")
});

/// Library parameters with their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Properties {
    /// Parameters that accept positional arguments in declaration order.
    Ordered(Vec<Variable>),
    /// Named parameters only.
    Unordered(BTreeMap<String, String>),
}

impl Default for Properties {
    fn default() -> Self {
        Properties::Unordered(BTreeMap::new())
    }
}

impl Properties {
    fn into_variables(self) -> (Vec<Variable>, bool) {
        match self {
            Properties::Ordered(vars) => (vars, true),
            Properties::Unordered(map) => (
                map.into_iter()
                    .map(|(name, value)| Variable::named(name, value))
                    .collect(),
                false,
            ),
        }
    }
}

/// A resource entry as written in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub content: String,
}

/// Parsed library descriptor, before argument substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LibraryDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub properties: Properties,
    pub dependencies: Vec<String>,
    pub repositories: Vec<String>,
    pub imports: Vec<String>,
    pub init: Vec<String>,
    pub init_cell: Vec<String>,
    pub shutdown: Vec<String>,
    pub renderers: BTreeMap<String, String>,
    pub resources: Vec<ResourceDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_kernel_version: Option<String>,
}

impl LibraryDescriptor {
    /// Parse descriptor JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Descriptor(e.to_string()))
    }

    /// Bind call-site arguments and produce the library definition.
    pub fn into_definition(
        self,
        name: &str,
        arguments: &[Variable],
        options: &GlobalOptions,
    ) -> Result<LibraryDefinition> {
        let (parameters, ordered) = self.properties.clone().into_variables();
        let parameters: Vec<Variable> = parameters
            .into_iter()
            .filter(|p| !options.is_property_ignored(&p.name))
            .collect();

        let values = bind_arguments(name, &parameters, ordered, arguments)?;
        let subst = |text: &str| substitute(text, &values);
        let subst_all = |items: &[String]| items.iter().map(|s| subst(s)).collect::<Vec<_>>();

        let mut definition = LibraryDefinition::new(name);
        definition.description = self.description.as_deref().map(subst);
        definition.link = self.link.as_deref().map(subst);
        definition.dependencies = subst_all(&self.dependencies);
        definition.repositories = subst_all(&self.repositories);
        definition.imports = subst_all(&self.imports);
        definition.init = subst_all(&self.init);
        definition.init_cell = subst_all(&self.init_cell);
        definition.shutdown = subst_all(&self.shutdown);
        definition.code_renderers = self
            .renderers
            .iter()
            .map(|(type_name, template)| (type_name.clone(), subst(template)))
            .collect();
        definition.resources = self
            .resources
            .iter()
            .map(|r| Resource {
                name: r.name.clone(),
                kind: r.kind,
                content: subst(&r.content),
            })
            .collect();
        definition.min_kernel_version = self.min_kernel_version.clone();
        definition.options = parameters
            .iter()
            .filter_map(|p| values.get(&p.name).map(|v| (p.name.clone(), v.clone())))
            .collect();
        definition.descriptor = Some(self);

        Ok(definition)
    }
}

fn bind_arguments(
    library: &str,
    parameters: &[Variable],
    ordered: bool,
    arguments: &[Variable],
) -> Result<FxHashMap<String, String>> {
    let error = |message: String| Error::Resolution {
        reference: library.to_string(),
        message,
    };

    let mut values: FxHashMap<String, String> = FxHashMap::default();
    let positional: Vec<&Variable> = arguments.iter().filter(|a| a.is_positional()).collect();

    if ordered {
        if positional.len() > parameters.len() {
            return Err(error(format!(
                "expected at most {} arguments, got {}",
                parameters.len(),
                positional.len()
            )));
        }
        // Positional arguments must precede named ones
        let first_named = arguments.iter().position(|a| !a.is_positional());
        let last_positional = arguments.iter().rposition(|a| a.is_positional());
        if let (Some(named), Some(positional)) = (first_named, last_positional) {
            if positional > named {
                return Err(error(
                    "positional arguments must come before named ones".to_string(),
                ));
            }
        }
        for (parameter, argument) in parameters.iter().zip(&positional) {
            values.insert(parameter.name.clone(), argument.value.clone());
        }
    } else if !positional.is_empty() {
        if parameters.len() != 1 || arguments.len() != 1 {
            return Err(error(
                "unnamed arguments are only allowed for libraries with exactly one parameter"
                    .to_string(),
            ));
        }
        values.insert(parameters[0].name.clone(), positional[0].value.clone());
    }

    for argument in arguments.iter().filter(|a| !a.is_positional()) {
        if !parameters.iter().any(|p| p.name == argument.name) {
            return Err(error(format!("unknown parameter '{}'", argument.name)));
        }
        if values.contains_key(&argument.name) {
            return Err(error(format!(
                "parameter '{}' is given more than once",
                argument.name
            )));
        }
        values.insert(argument.name.clone(), argument.value.clone());
    }

    for parameter in parameters {
        values
            .entry(parameter.name.clone())
            .or_insert_with(|| parameter.value.clone());
    }

    Ok(values)
}

/// Replace `$name` and `${name}` with bound values. Unknown names are kept.
pub fn substitute(text: &str, values: &FxHashMap<String, String>) -> String {
    SUBSTITUTION_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            match values.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Repository-wide options stored next to the descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalOptions {
    /// Regular expressions naming properties that are dropped before
    /// argument binding.
    pub ignored_property_patterns: Vec<String>,
}

impl GlobalOptions {
    /// Parse global options JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Descriptor(e.to_string()))
    }

    /// Whether a property matches one of the ignore patterns.
    pub fn is_property_ignored(&self, property: &str) -> bool {
        self.ignored_property_patterns.iter().any(|pattern| {
            match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(re) => re.is_match(property),
                Err(e) => {
                    tracing::warn!("Ignoring invalid property pattern '{}': {}", pattern, e);
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERED: &str = r#"{
        "properties": [
            { "name": "version", "value": "1.0" },
            { "name": "theme", "value": "light" }
        ],
        "dependencies": ["org.plots:core:$version"],
        "init": ["val theme = \"${theme}\""],
        "renderers": { "Chart": "render($it)" }
    }"#;

    #[test]
    fn test_parse_minimal() {
        let d = LibraryDescriptor::from_json("{}").unwrap();
        assert_eq!(d, LibraryDescriptor::default());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            LibraryDescriptor::from_json("[1, 2]"),
            Err(Error::Descriptor(_))
        ));
    }

    #[test]
    fn test_defaults_substituted() {
        let def = LibraryDescriptor::from_json(ORDERED)
            .unwrap()
            .into_definition("plots", &[], &GlobalOptions::default())
            .unwrap();
        assert_eq!(def.dependencies, vec!["org.plots:core:1.0"]);
        assert_eq!(def.init, vec!["val theme = \"light\""]);
        assert_eq!(def.code_renderers, vec![("Chart".to_string(), "render($it)".to_string())]);
        assert_eq!(def.options.get("theme").map(String::as_str), Some("light"));
    }

    #[test]
    fn test_positional_then_named() {
        let args = vec![Variable::positional("2.0"), Variable::named("theme", "dark")];
        let def = LibraryDescriptor::from_json(ORDERED)
            .unwrap()
            .into_definition("plots", &args, &GlobalOptions::default())
            .unwrap();
        assert_eq!(def.dependencies, vec!["org.plots:core:2.0"]);
        assert_eq!(def.init, vec!["val theme = \"dark\""]);
    }

    #[test]
    fn test_argument_errors() {
        let d = LibraryDescriptor::from_json(ORDERED).unwrap();
        let too_many = vec![
            Variable::positional("1"),
            Variable::positional("2"),
            Variable::positional("3"),
        ];
        assert!(d.clone().into_definition("plots", &too_many, &GlobalOptions::default()).is_err());

        let unknown = vec![Variable::named("colour", "red")];
        assert!(d.clone().into_definition("plots", &unknown, &GlobalOptions::default()).is_err());

        let twice = vec![Variable::positional("1"), Variable::named("version", "2")];
        assert!(d.into_definition("plots", &twice, &GlobalOptions::default()).is_err());
    }

    #[test]
    fn test_unordered_single_positional() {
        let one = r#"{ "properties": { "v": "1" }, "dependencies": ["a:b:$v"] }"#;
        let def = LibraryDescriptor::from_json(one)
            .unwrap()
            .into_definition("a", &[Variable::positional("9")], &GlobalOptions::default())
            .unwrap();
        assert_eq!(def.dependencies, vec!["a:b:9"]);

        let two = r#"{ "properties": { "v": "1", "w": "2" } }"#;
        let result = LibraryDescriptor::from_json(two).unwrap().into_definition(
            "a",
            &[Variable::positional("9")],
            &GlobalOptions::default(),
        );
        assert!(matches!(result, Err(Error::Resolution { .. })));
    }

    #[test]
    fn test_ignored_properties() {
        let options = GlobalOptions::from_json(r#"{ "ignoredPropertyPatterns": ["the.*"] }"#).unwrap();
        assert!(options.is_property_ignored("theme"));
        assert!(!options.is_property_ignored("version"));

        let def = LibraryDescriptor::from_json(ORDERED)
            .unwrap()
            .into_definition("plots", &[], &options)
            .unwrap();
        assert!(!def.options.contains_key("theme"));
        // Unbound names are left untouched
        assert_eq!(def.init, vec!["val theme = \"${theme}\""]);
    }

    #[test]
    fn test_resources() {
        let text = r#"{ "resources": [{ "name": "s", "type": "css", "content": "b { }" }] }"#;
        let def = LibraryDescriptor::from_json(text)
            .unwrap()
            .into_definition("s", &[], &GlobalOptions::default())
            .unwrap();
        assert_eq!(def.resources.len(), 1);
        assert_eq!(def.resources[0].kind, ResourceKind::Css);
    }
}
