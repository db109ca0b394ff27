//! Parameter materializer.
//!
//! Renders a node's typed parameters into effective values, either
//! structured (for embedding into a language-native invocation) or
//! flattened to strings (for shell substitution). Pure; no side effects.

use std::collections::HashMap;

use weir_core::node::{Parameter, ParameterValue};

/// Rendering mode for parameters and multi-valued inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    /// Keep sequences and scalars typed.
    Structured,
    /// Collapse everything to strings for shell substitution.
    Flattened,
}

/// An effective parameter value after rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedValue {
    Str(String),
    Bool(bool),
    Int(i64),
    ListStr(Vec<String>),
    ListInt(Vec<i64>),
}

impl RenderedValue {
    /// Collapse to the flattened string form.
    ///
    /// Lists join on a single space; the separator is ambiguous when
    /// elements contain embedded whitespace, which is the historical
    /// contract of the flattened mode.
    pub fn flatten(&self) -> String {
        match self {
            RenderedValue::Str(s) => s.clone(),
            RenderedValue::Bool(b) => b.to_string(),
            RenderedValue::Int(i) => i.to_string(),
            RenderedValue::ListStr(items) => items.join(" "),
            RenderedValue::ListInt(items) => items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Resolve every parameter to its effective value.
///
/// ENUM indices are clamped into the candidate range, defending against a
/// candidate list that shrank after the index was persisted; an empty
/// candidate list resolves to the empty string (structural validation flags
/// it upstream). Infallible: the closed `ParameterValue` type moves the
/// unknown-tag failure to deserialization.
pub fn render_parameters(
    parameters: &[Parameter],
    mode: ParamMode,
) -> HashMap<String, RenderedValue> {
    let mut rendered = HashMap::with_capacity(parameters.len());

    for parameter in parameters {
        let value = match &parameter.value {
            ParameterValue::Text(text) => RenderedValue::Str(text.clone()),

            ParameterValue::Bool(b) => match mode {
                ParamMode::Structured => RenderedValue::Bool(*b),
                ParamMode::Flattened => RenderedValue::Str(b.to_string()),
            },

            ParameterValue::Int(i) => match mode {
                ParamMode::Structured => RenderedValue::Int(*i),
                ParamMode::Flattened => RenderedValue::Str(i.to_string()),
            },

            ParameterValue::Enum(e) => {
                let resolved = if e.values.is_empty() {
                    String::new()
                } else {
                    let last = e.values.len() as i64 - 1;
                    let index = e.index.clamp(0, last) as usize;
                    e.values[index].clone()
                };
                RenderedValue::Str(resolved)
            }

            ParameterValue::ListStr(items) => match mode {
                ParamMode::Structured => RenderedValue::ListStr(items.clone()),
                ParamMode::Flattened => RenderedValue::Str(items.join(" ")),
            },

            ParameterValue::ListInt(items) => match mode {
                ParamMode::Structured => RenderedValue::ListInt(items.clone()),
                ParamMode::Flattened => RenderedValue::Str(
                    items
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
            },

            ParameterValue::Code(code) => RenderedValue::Str(code.value.clone()),
        };

        rendered.insert(parameter.name.clone(), value);
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::node::{CodeValue, EnumValue};

    fn enum_param(index: i64) -> Parameter {
        Parameter::new(
            "mode",
            ParameterValue::Enum(EnumValue {
                values: vec!["fast".into(), "balanced".into(), "thorough".into()],
                index,
            }),
        )
    }

    #[test]
    fn test_enum_index_in_range() {
        let rendered = render_parameters(&[enum_param(1)], ParamMode::Structured);
        assert_eq!(rendered["mode"], RenderedValue::Str("balanced".into()));
    }

    #[test]
    fn test_enum_index_clamped_low_and_high() {
        let rendered = render_parameters(&[enum_param(-3)], ParamMode::Structured);
        assert_eq!(rendered["mode"], RenderedValue::Str("fast".into()));

        let rendered = render_parameters(&[enum_param(17)], ParamMode::Structured);
        assert_eq!(rendered["mode"], RenderedValue::Str("thorough".into()));
    }

    #[test]
    fn test_enum_empty_candidates() {
        let param = Parameter::new(
            "mode",
            ParameterValue::Enum(EnumValue {
                values: vec![],
                index: 0,
            }),
        );
        let rendered = render_parameters(&[param], ParamMode::Flattened);
        assert_eq!(rendered["mode"], RenderedValue::Str(String::new()));
    }

    #[test]
    fn test_lists_structured_vs_flattened() {
        let params = vec![
            Parameter::new(
                "names",
                ParameterValue::ListStr(vec!["a".into(), "b".into()]),
            ),
            Parameter::new("sizes", ParameterValue::ListInt(vec![1, 2, 3])),
        ];

        let structured = render_parameters(&params, ParamMode::Structured);
        assert_eq!(
            structured["names"],
            RenderedValue::ListStr(vec!["a".into(), "b".into()])
        );
        assert_eq!(structured["sizes"], RenderedValue::ListInt(vec![1, 2, 3]));

        let flattened = render_parameters(&params, ParamMode::Flattened);
        assert_eq!(flattened["names"], RenderedValue::Str("a b".into()));
        assert_eq!(flattened["sizes"], RenderedValue::Str("1 2 3".into()));
    }

    #[test]
    fn test_code_unwraps_nested_value() {
        let param = Parameter::new(
            "script",
            ParameterValue::Code(CodeValue {
                value: "print('hi')".into(),
                mode: "python".into(),
            }),
        );
        let rendered = render_parameters(&[param], ParamMode::Structured);
        assert_eq!(rendered["script"], RenderedValue::Str("print('hi')".into()));
    }

    #[test]
    fn test_scalars_pass_through() {
        let params = vec![
            Parameter::new("cmd", ParameterValue::Text("echo hi".into())),
            Parameter::new("cacheable", ParameterValue::Bool(true)),
            Parameter::new("retries", ParameterValue::Int(4)),
        ];

        let structured = render_parameters(&params, ParamMode::Structured);
        assert_eq!(structured["cmd"], RenderedValue::Str("echo hi".into()));
        assert_eq!(structured["cacheable"], RenderedValue::Bool(true));
        assert_eq!(structured["retries"], RenderedValue::Int(4));

        let flattened = render_parameters(&params, ParamMode::Flattened);
        assert_eq!(flattened["cacheable"], RenderedValue::Str("true".into()));
        assert_eq!(flattened["retries"], RenderedValue::Str("4".into()));
    }
}
