use crate::error::ExchangeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Scalar(String),
    /// Sent as repeated `key=value` pairs.
    List(Vec<String>),
}

/// Request parameters in insertion order.
///
/// The canonical encoding puts every list-valued entry first, as repeated `key=value` pairs,
/// followed by the scalar entries. Binance parses the repeated keys only in that position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    pub fn with_opt<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn with_list<I, T>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.set(key, ParamValue::List(values));
        self
    }

    /// Sets a scalar, replacing any earlier value for the same key.
    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.set(key, ParamValue::Scalar(value.to_string()));
    }

    fn set(&mut self, key: &str, value: ParamValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Flattened `(key, value)` pairs in canonical order.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let lists = self.entries.iter().filter_map(|(k, v)| match v {
            ParamValue::List(values) => Some(values.iter().map(move |x| (k.as_str(), x.as_str()))),
            ParamValue::Scalar(_) => None,
        });
        let scalars = self.entries.iter().filter_map(|(k, v)| match v {
            ParamValue::Scalar(x) => Some((k.as_str(), x.as_str())),
            ParamValue::List(_) => None,
        });
        lists.flatten().chain(scalars).collect()
    }

    /// Canonical query string. This is exactly what gets signed.
    pub fn encode(&self) -> Result<String, ExchangeError> {
        Ok(serde_urlencoded::to_string(self.pairs())?)
    }
}
