//! What a generator declares about itself when run with `-s`.

use std::ffi::OsStr;
use std::process::Stdio;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::SpecError;

/// How a generator wants to receive documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// One document on stdin per process.
    Stdin,
    /// One document path per process.
    File,
    /// The multiplexed stream protocol on stdin/stdout.
    StdinStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub langs: Vec<String>,
    #[serde(alias = "pass_by")]
    pub input: InputMode,
    #[serde(deserialize_with = "one_or_many")]
    pub suffix: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

impl GeneratorSpec {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SpecError> {
        let spec: Self = serde_json::from_slice(bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.langs.is_empty() {
            return Err(SpecError::Invalid("langs is empty"));
        }
        if self.suffix.is_empty() {
            return Err(SpecError::Invalid("suffix is empty"));
        }
        if self.suffix.len() > 1 && self.separator.as_deref().unwrap_or("").is_empty() {
            return Err(SpecError::Invalid(
                "separator is empty when suffix is more than 1",
            ));
        }
        Ok(())
    }

    pub fn uses_stream_protocol(&self) -> bool {
        self.input == InputMode::StdinStream
    }

    /// Split one-shot generator output into one chunk per suffix.
    ///
    /// Fewer chunks than suffixes is fine; more is an error.
    pub fn split_output(&self, output: &[u8]) -> Result<Vec<(&str, Bytes)>, SpecError> {
        let chunks = match self.separator.as_deref() {
            Some(separator) if self.suffix.len() > 1 && !separator.is_empty() => {
                split_bytes(output, separator.as_bytes())
            }
            _ => vec![output],
        };
        if chunks.len() > self.suffix.len() {
            return Err(SpecError::TooManyOutputs {
                expected: self.suffix.len(),
                actual: chunks.len(),
            });
        }
        Ok(self
            .suffix
            .iter()
            .zip(chunks)
            .map(|(suffix, chunk)| (suffix.as_str(), Bytes::copy_from_slice(chunk)))
            .collect())
    }
}

/// Run `program -s [args..]` and parse what it prints.
pub async fn query_spec<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<GeneratorSpec, SpecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program.as_ref())
        .arg("-s")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(SpecError::QueryFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let spec = GeneratorSpec::from_slice(&output.stdout)?;
    debug!(langs = ?spec.langs, input = ?spec.input, "Generator spec loaded");
    Ok(spec)
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(suffix) => vec![suffix],
        OneOrMany::Many(suffixes) => suffixes,
    })
}

fn split_bytes<'a>(haystack: &'a [u8], separator: &[u8]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + separator.len() <= haystack.len() {
        if &haystack[i..i + separator.len()] == separator {
            chunks.push(&haystack[start..i]);
            i += separator.len();
            start = i;
        } else {
            i += 1;
        }
    }
    chunks.push(&haystack[start..]);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<GeneratorSpec, SpecError> {
        GeneratorSpec::from_slice(value.to_string().as_bytes())
    }

    #[test]
    fn test_single_suffix_and_pass_by_alias() {
        let spec = parse(json!({
            "langs": ["go"],
            "pass_by": "stdin_stream",
            "suffix": ".go"
        }))
        .unwrap();
        assert_eq!(spec.suffix, vec![".go"]);
        assert_eq!(spec.input, InputMode::StdinStream);
        assert!(spec.uses_stream_protocol());
    }

    #[test]
    fn test_validation_messages() {
        let err = parse(json!({"langs": [], "input": "stdin", "suffix": ".c"})).unwrap_err();
        assert_eq!(err.to_string(), "langs is empty");

        let err = parse(json!({"langs": ["c"], "input": "file", "suffix": []})).unwrap_err();
        assert_eq!(err.to_string(), "suffix is empty");

        let err = parse(json!({
            "langs": ["c"],
            "input": "stdin",
            "suffix": [".h", ".c"]
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "separator is empty when suffix is more than 1"
        );

        assert!(matches!(
            parse(json!({"langs": ["c"], "input": "pipe", "suffix": ".c"})),
            Err(SpecError::Json(_))
        ));
    }

    #[test]
    fn test_split_output_pairs_chunks_with_suffixes() {
        let spec = parse(json!({
            "langs": ["cpp"],
            "input": "stdin",
            "suffix": [".hpp", ".cpp"],
            "separator": "\n//SEP\n"
        }))
        .unwrap();
        assert!(!spec.uses_stream_protocol());

        let chunks = spec.split_output(b"header\n//SEP\nsource").unwrap();
        assert_eq!(
            chunks,
            vec![
                (".hpp", Bytes::from_static(b"header")),
                (".cpp", Bytes::from_static(b"source")),
            ]
        );

        let chunks = spec.split_output(b"header only").unwrap();
        assert_eq!(chunks.len(), 1);

        let err = spec.split_output(b"a\n//SEP\nb\n//SEP\nc").unwrap_err();
        assert_eq!(err.to_string(), "too many outputs: expect 2 but got 3");
    }

    #[test]
    fn test_single_suffix_output_is_never_split() {
        let spec = GeneratorSpec {
            langs: vec!["go".to_string()],
            input: InputMode::File,
            suffix: vec![".go".to_string()],
            separator: Some(",".to_string()),
        };
        let chunks = spec.split_output(b"a,b").unwrap();
        assert_eq!(chunks, vec![(".go", Bytes::from_static(b"a,b"))]);
    }
}
