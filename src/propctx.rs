//! Property context (`propctx`, C5): the name→value interchange medium
//! between a mechanism's `prop_request` and the auxprop lookup (§4.6).

use crate::error::{SaslError, Status};

#[derive(Debug, Clone)]
struct PropEntry {
    name: String,
    values: Option<Vec<String>>,
}

/// An ordered set of `{name, values?}` entries (§3 "PropContext"). Requesting
/// a name adds it with `values = None`; an auxprop plugin may fill or erase
/// it. Names are case-sensitive and duplicates are rejected.
#[derive(Debug, Clone, Default)]
pub struct PropContext {
    entries: Vec<PropEntry>,
}

impl PropContext {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Declare interest in a set of property names. Declaring a name already
    /// present is a no-op (the original value, filled or not, is kept).
    pub fn request(&mut self, names: &[&str]) {
        for name in names {
            if !self.entries.iter().any(|e| e.name == *name) {
                self.entries.push(PropEntry {
                    name: (*name).to_string(),
                    values: None,
                });
            }
        }
    }

    /// True if `name` was requested (regardless of whether it is filled).
    pub fn is_requested(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// True if `name` was requested and has at least one value.
    pub fn is_filled(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.name == name && e.values.is_some())
    }

    /// Fill (or replace) the values for a requested property. Returns an
    /// error if the plugin attempts to set a name it was never asked for
    /// (§4.6 "Plugins MUST NOT set a property they were not asked for").
    pub fn set(&mut self, name: &str, values: Vec<String>) -> Result<(), SaslError> {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.values = Some(values);
                Ok(())
            }
            None => Err(SaslError::with_detail(
                Status::BadParam,
                format!("auxprop plugin set unrequested property '{}'", name),
            )),
        }
    }

    /// Erase any filled values for `name`, leaving it requested-but-empty.
    pub fn erase(&mut self, name: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.values = None;
        }
    }

    /// Retrieve the values filled for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.values.as_deref())
    }

    /// All requested names, in request order.
    pub fn requested_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// `(name, values)` for every filled entry, in request order.
    pub fn filled(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .filter_map(|e| e.values.as_deref().map(|v| (e.name.as_str(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_fill_then_get() {
        let mut ctx = PropContext::new();
        ctx.request(&["userPassword", "mailbox"]);
        assert!(ctx.is_requested("userPassword"));
        assert!(!ctx.is_filled("userPassword"));
        ctx.set("userPassword", vec!["hunter2".into()]).unwrap();
        assert!(ctx.is_filled("userPassword"));
        assert_eq!(ctx.get("userPassword"), Some(&["hunter2".to_string()][..]));
    }

    #[test]
    fn setting_unrequested_property_errors() {
        let mut ctx = PropContext::new();
        let result = ctx.set("mailbox", vec!["INBOX".into()]);
        assert!(result.is_err());
    }

    #[test]
    fn erase_clears_but_keeps_requested() {
        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        ctx.set("userPassword", vec!["hunter2".into()]).unwrap();
        ctx.erase("userPassword");
        assert!(ctx.is_requested("userPassword"));
        assert!(!ctx.is_filled("userPassword"));
    }

    #[test]
    fn duplicate_request_is_a_no_op() {
        let mut ctx = PropContext::new();
        ctx.request(&["userPassword"]);
        ctx.set("userPassword", vec!["hunter2".into()]).unwrap();
        ctx.request(&["userPassword"]);
        assert_eq!(ctx.get("userPassword"), Some(&["hunter2".to_string()][..]));
    }
}
