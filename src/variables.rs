//! Channel variable prefixes for originate and bridge strings.

use std::fmt;

/// Bracket style of a variable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariablesType {
    /// `{k=v}`: applies to every leg of the originate.
    #[default]
    Default,
    /// `[k=v]`: applies to one leg only.
    Channel,
    /// `<k=v>`: applies across `:_:`-separated enterprise originates.
    Enterprise,
}

impl VariablesType {
    fn delimiters(&self) -> (char, char) {
        match self {
            VariablesType::Default => ('{', '}'),
            VariablesType::Channel => ('[', ']'),
            VariablesType::Enterprise => ('<', '>'),
        }
    }
}

/// Ordered `key=value` pairs rendered as a variable block.
///
/// Values containing spaces are single-quoted. An empty set renders as
/// nothing at all.
///
/// ```
/// use freeswitch_esl_mux::{Variables, VariablesType};
///
/// let mut vars = Variables::new(VariablesType::Default);
/// vars.insert("origination_caller_id_number", "1000");
/// vars.insert("origination_caller_id_name", "Front Desk");
/// assert_eq!(
///     vars.to_string(),
///     "{origination_caller_id_number=1000,origination_caller_id_name='Front Desk'}"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variables {
    vars_type: VariablesType,
    entries: Vec<(String, String)>,
}

impl Variables {
    pub fn new(vars_type: VariablesType) -> Self {
        Self {
            vars_type,
            entries: Vec::new(),
        }
    }

    pub fn vars_type(&self) -> VariablesType {
        self.vars_type
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| *k == key)
        {
            Some((_, existing)) => *existing = value,
            None => self
                .entries
                .push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(k, _)| k == key)?;
        Some(
            self.entries
                .remove(index)
                .1,
        )
    }

    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }
}

impl fmt::Display for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let (open, close) = self
            .vars_type
            .delimiters();
        write!(f, "{}", open)?;
        for (i, (key, value)) in self
            .entries
            .iter()
            .enumerate()
        {
            if i > 0 {
                f.write_str(",")?;
            }
            if value.contains(' ') {
                write!(f, "{}='{}'", key, value)?;
            } else {
                write!(f, "{}={}", key, value)?;
            }
        }
        write!(f, "{}", close)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Variables::default();
        for (key, value) in iter {
            vars.insert(key, value);
        }
        vars
    }
}
