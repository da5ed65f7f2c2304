//! Per-call control options

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::Level;
use crate::trie::{Mode, TargetOptions};

/// Levels at which a drop request may use the wildcard
const TRAP_LEVELS: [Level; 4] = [Level::L5, Level::L4, Level::L3, Level::L2];

/// Control options accepted by every public operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctrl {
    /// Shape of request trees and data arguments
    pub q_mode: Mode,
    /// Shape of results
    pub r_mode: Mode,
    /// Strict key validation
    pub validate: bool,
    /// Levels where the drop wildcard is enabled
    pub trap: BTreeSet<Level>,
}

impl Default for Ctrl {
    fn default() -> Self {
        Self {
            q_mode: Mode::Trie,
            r_mode: Mode::Trie,
            validate: true,
            trap: BTreeSet::new(),
        }
    }
}

impl Ctrl {
    /// Same shape for requests and results
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.q_mode = mode;
        self.r_mode = mode;
        self
    }

    /// Enable the drop wildcard at `level`
    pub fn with_trap(mut self, level: Level) -> Self {
        self.trap.insert(level);
        self
    }

    /// Disable strict key validation
    pub fn lenient(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Parse a control map.
    ///
    /// `null` yields the defaults. `mode` sets both shapes and is applied
    /// before `q_mode`/`r_mode`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidControl(format!(
                    "ctrl must be a map, got {}",
                    other
                )))
            }
        };

        let mut ctrl = Self::default();
        if let Some(mode) = map.get("mode") {
            ctrl = ctrl.with_mode(parse_mode("mode", mode)?);
        }
        for (name, value) in map {
            match name.as_str() {
                "mode" => {}
                "q_mode" => ctrl.q_mode = parse_mode(name, value)?,
                "r_mode" => ctrl.r_mode = parse_mode(name, value)?,
                "validate" => ctrl.validate = parse_flag(name, value)?,
                trap if trap.starts_with("trap_") => {
                    let level = TRAP_LEVELS
                        .into_iter()
                        .find(|level| &trap[5..] == level.name())
                        .ok_or_else(|| {
                            Error::InvalidControl(format!("unknown ctrl option '{}'", name))
                        })?;
                    if parse_flag(name, value)? {
                        ctrl.trap.insert(level);
                    } else {
                        ctrl.trap.remove(&level);
                    }
                }
                other => {
                    return Err(Error::InvalidControl(format!(
                        "unknown ctrl option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(ctrl)
    }

    pub(crate) fn query_options(&self) -> TargetOptions {
        TargetOptions::query(self.validate)
    }

    pub(crate) fn drop_options(&self) -> TargetOptions {
        TargetOptions::drop(self.validate, self.trap.clone())
    }
}

fn parse_mode(name: &str, value: &Value) -> Result<Mode> {
    value
        .as_str()
        .ok_or_else(|| Error::InvalidControl(format!("'{}' must be a string", name)))?
        .parse()
}

fn parse_flag(name: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::InvalidControl(format!("'{}' must be a boolean", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let ctrl = Ctrl::from_value(&Value::Null).unwrap();
        assert_eq!(ctrl, Ctrl::default());
        assert!(ctrl.validate);
        assert!(ctrl.trap.is_empty());
    }

    #[test]
    fn test_mode_then_overrides() {
        let ctrl = Ctrl::from_value(&json!({"r_mode": "trie", "mode": "matrix"})).unwrap();
        assert_eq!(ctrl.q_mode, Mode::Matrix);
        assert_eq!(ctrl.r_mode, Mode::Trie);
    }

    #[test]
    fn test_traps_and_validate() {
        let ctrl =
            Ctrl::from_value(&json!({"trap_l4": true, "trap_l2": false, "validate": false}))
                .unwrap();
        assert!(ctrl.trap.contains(&Level::L4));
        assert!(!ctrl.trap.contains(&Level::L2));
        assert!(!ctrl.validate);
    }

    #[test]
    fn test_malformed_ctrl() {
        assert_matches!(Ctrl::from_value(&json!({"mode": "tree"})), Err(Error::InvalidControl(_)));
        assert_matches!(
            Ctrl::from_value(&json!({"validate": "yes"})),
            Err(Error::InvalidControl(_))
        );
        assert_matches!(Ctrl::from_value(&json!({"trap_l1": true})), Err(Error::InvalidControl(_)));
        assert_matches!(Ctrl::from_value(&json!({"colour": 1})), Err(Error::InvalidControl(_)));
        assert_matches!(Ctrl::from_value(&json!([1])), Err(Error::InvalidControl(_)));
    }

    #[test]
    fn test_builders() {
        let ctrl = Ctrl::default().with_mode(Mode::Matrix).with_trap(Level::L3).lenient();
        assert_eq!(ctrl.q_mode, Mode::Matrix);
        assert!(ctrl.trap.contains(&Level::L3));
        assert!(!ctrl.validate);
    }
}
