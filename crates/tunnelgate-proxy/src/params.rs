//! Query parameter parsing with accumulated validation errors

use crate::models::ValidationError;
use tunnelgate_tunnel::PtyInit;
use uuid::Uuid;

pub const DEFAULT_TERMINAL_SIZE: u16 = 80;

/// Parses query values, recording every failure instead of stopping at the
/// first one
pub struct QueryParamParser<'a> {
    values: &'a [(String, String)],
    errors: Vec<ValidationError>,
}

impl<'a> QueryParamParser<'a> {
    pub fn new(values: &'a [(String, String)]) -> Self {
        Self {
            values,
            errors: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn fail(&mut self, key: &str, detail: String) {
        self.errors.push(ValidationError {
            field: key.to_string(),
            detail,
        });
    }

    /// A UUID, or `default()` when absent or empty
    pub fn uuid(&mut self, key: &str, default: impl FnOnce() -> Uuid) -> Uuid {
        match self.get(key) {
            None => default(),
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(id) => id,
                Err(e) => {
                    self.fail(key, format!("Query param \"{key}\" must be a valid uuid: {e}"));
                    default()
                }
            },
        }
    }

    /// A strictly positive integer that fits in a `u16`
    pub fn positive_u16(&mut self, key: &str, default: u16) -> u16 {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.parse::<u64>() {
            Ok(0) => {
                self.fail(key, format!("Query param \"{key}\" must be greater than zero"));
                default
            }
            Ok(value) => match u16::try_from(value) {
                Ok(value) => value,
                Err(_) => {
                    self.fail(
                        key,
                        format!("Query param \"{key}\" must be at most {}", u16::MAX),
                    );
                    default
                }
            },
            Err(e) => {
                self.fail(
                    key,
                    format!("Query param \"{key}\" must be a valid positive integer: {e}"),
                );
                default
            }
        }
    }

    pub fn string(&mut self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

/// Parse the PTY session parameters: `reconnect`, `height`, `width`, `command`
pub fn parse_pty_params(values: &[(String, String)]) -> Result<PtyInit, Vec<ValidationError>> {
    let mut parser = QueryParamParser::new(values);
    let id = parser.uuid("reconnect", Uuid::new_v4);
    let height = parser.positive_u16("height", DEFAULT_TERMINAL_SIZE);
    let width = parser.positive_u16("width", DEFAULT_TERMINAL_SIZE);
    let command = parser.string("command", "");

    let errors = parser.into_errors();
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(PtyInit {
        id,
        height,
        width,
        command,
    })
}
