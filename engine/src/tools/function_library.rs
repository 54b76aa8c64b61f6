//! Function Library
//!
//! Sequence-analysis functions exposed as the `function_library` capability
//! source. Functions take positional arguments; named parameters coming from
//! the model are mapped onto positions by sniffing the parameter shape:
//!
//! - no entries: no arguments
//! - one entry: its value is the single argument, whatever the key
//! - `chromosome`, `start`, `end` present: those three, in that order
//! - anything else: values ordered by key name

use async_trait::async_trait;
use sdk::capability::{CapabilityError, CapabilitySource};
use sdk::types::{Parameters, ToolError};
use serde_json::{json, Value};
use tracing::debug;

use super::sequence;

/// (name, arity, description)
const FUNCTIONS: &[(&str, usize, &str)] = &[
    (
        "translate_dna",
        1,
        r#"Translate a DNA sequence in frame 1. {"sequence": "ATG..."}"#,
    ),
    (
        "reverse_complement",
        1,
        r#"Reverse complement of a DNA sequence. {"sequence": "ATG..."}"#,
    ),
    (
        "gc_content",
        1,
        r#"GC percentage of a DNA sequence. {"sequence": "ATG..."}"#,
    ),
    (
        "codon_usage",
        1,
        r#"Codon counts compared with E. coli usage (highly/moderately/rarely used). {"sequence": "ATG..."}"#,
    ),
    (
        "amino_acid_composition",
        1,
        r#"Residue counts and hydrophobic/charged/polar shares of a protein. {"protein": "MTI..."}"#,
    ),
    (
        "region_length",
        3,
        r#"Length in bp of a 1-based inclusive region. {"chromosome": "chr1", "start": 1, "end": 100}"#,
    ),
];

/// Map named parameters onto positional arguments
pub fn positional_args(parameters: &Parameters) -> Vec<Value> {
    if parameters.len() == 1 {
        return parameters.values().cloned().collect();
    }

    if let (Some(chromosome), Some(start), Some(end)) = (
        parameters.get("chromosome"),
        parameters.get("start"),
        parameters.get("end"),
    ) {
        return vec![chromosome.clone(), start.clone(), end.clone()];
    }

    let mut entries: Vec<(&String, &Value)> = parameters.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(_, v)| v.clone()).collect()
}

fn text_arg(value: &Value, position: usize) -> Result<&str, ToolError> {
    value
        .as_str()
        .ok_or_else(|| ToolError::InvalidParameter(format!("argument {} must be a string", position)))
}

fn integer_arg(value: &Value, position: usize) -> Result<i64, ToolError> {
    let invalid = || ToolError::InvalidParameter(format!("argument {} must be an integer", position));
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).ok_or_else(invalid),
        Value::String(s) => s.trim().replace(',', "").parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Run a library function on positional arguments
pub fn call_function(name: &str, args: &[Value]) -> Result<Value, ToolError> {
    let Some((_, arity, _)) = FUNCTIONS.iter().find(|(n, _, _)| *n == name) else {
        return Err(ToolError::UnknownMethod(name.to_string()));
    };

    if args.len() != *arity {
        return Err(ToolError::InvalidParameter(format!(
            "{} expects {} argument(s), got {}",
            name,
            arity,
            args.len()
        )));
    }

    let to_value = |v: Result<Value, serde_json::Error>| {
        v.map_err(|e| ToolError::InvalidParameter(e.to_string()))
    };

    match name {
        "translate_dna" => {
            let protein = sequence::translate(text_arg(&args[0], 1)?)?;
            Ok(json!({ "protein": protein, "length": protein.len() }))
        }
        "reverse_complement" => Ok(json!({
            "sequence": sequence::reverse_complement(text_arg(&args[0], 1)?)?
        })),
        "gc_content" => to_value(serde_json::to_value(sequence::gc_content(text_arg(
            &args[0], 1,
        )?)?)),
        "codon_usage" => to_value(serde_json::to_value(sequence::codon_usage(text_arg(
            &args[0], 1,
        )?)?)),
        "amino_acid_composition" => to_value(serde_json::to_value(
            sequence::amino_acid_composition(text_arg(&args[0], 1)?)?,
        )),
        "region_length" => {
            let chromosome = text_arg(&args[0], 1)?;
            let start = integer_arg(&args[1], 2)?;
            let end = integer_arg(&args[2], 3)?;
            let length = sequence::region_length(start, end)?;
            Ok(json!({
                "region": format!("{}:{}-{}", chromosome, start, end),
                "length": length,
            }))
        }
        other => Err(ToolError::UnknownMethod(other.to_string())),
    }
}

/// Capability source over the function library
#[derive(Debug, Default)]
pub struct FunctionLibrarySource;

impl FunctionLibrarySource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CapabilitySource for FunctionLibrarySource {
    fn id(&self) -> &str {
        "function_library"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn list_names(&self) -> Vec<String> {
        FUNCTIONS.iter().map(|(name, _, _)| name.to_string()).collect()
    }

    async fn invoke(&self, name: &str, parameters: &Parameters) -> Result<Value, CapabilityError> {
        let args = positional_args(parameters);
        debug!("Function library: {} with {} argument(s)", name, args.len());

        match call_function(name, &args) {
            Ok(value) => Ok(value),
            Err(ToolError::UnknownMethod(name)) => Err(CapabilityError::Unresolved(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> Vec<(String, String)> {
        FUNCTIONS
            .iter()
            .map(|(name, _, description)| (name.to_string(), description.to_string()))
            .collect()
    }
}
