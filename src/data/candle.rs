use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::data::{
    domain::{Price, SourceField, Volume},
    uid::{Keyed, Uid},
};

// ================================================================================================
// Extensions
// ================================================================================================

/// Named auxiliary fields attached to a candle (true range, directional movement, ...).
///
/// Entries are kept sorted by name in an inline `SmallVec`; candles rarely carry more than a
/// handful of fields, so a linear scan beats hashing. Writing an existing name overwrites it.
/// A missing field means "not yet computable", never zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Extensions {
    inner: SmallVec<[(String, f64); 4]>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.inner
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k == name)
    }

    /// Inserts or overwrites `name`, returning the previous value.
    pub fn insert(&mut self, name: &str, value: f64) -> Option<f64> {
        for (i, (k, v)) in self.inner.iter_mut().enumerate() {
            match name.cmp(k.as_str()) {
                std::cmp::Ordering::Less => {
                    self.inner.insert(i, (name.to_string(), value));
                    return None;
                }
                std::cmp::Ordering::Equal => return Some(std::mem::replace(v, value)),
                std::cmp::Ordering::Greater => continue,
            }
        }
        self.inner.push((name.to_string(), value));
        None
    }

    pub fn remove(&mut self, name: &str) -> Option<f64> {
        self.inner
            .iter()
            .position(|(k, _)| k == name)
            .map(|pos| self.inner.remove(pos).1)
    }

    /// Iterates `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

// ================================================================================================
// Candle
// ================================================================================================

/// One bar of a raw or derived series.
///
/// OHLC values are optional: a derived series may only fill `close` (moving averages), and a
/// bar whose inputs are incomplete simply leaves them out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub uid: Uid,
    pub date: DateTime<Utc>,
    pub open: Option<Price>,
    pub high: Option<Price>,
    pub low: Option<Price>,
    pub close: Option<Price>,
    pub volume: Option<Volume>,
    pub extensions: Extensions,
    /// Raw record that completed this bar; set on price-driven derived bars only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Uid>,
}

impl Candle {
    /// An empty bar at `uid`; the date is derived from the timestamp.
    pub fn empty(uid: Uid) -> Self {
        Self {
            uid,
            date: uid.date(),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            extensions: Extensions::new(),
            source: None,
        }
    }

    pub fn ohlc(uid: Uid, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open: Some(Price(open)),
            high: Some(Price(high)),
            low: Some(Price(low)),
            close: Some(Price(close)),
            ..Self::empty(uid)
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(Volume(volume));
        self
    }

    /// Extracts the value an indicator consumes, if the bar carries it.
    pub fn value(&self, field: &SourceField) -> Option<f64> {
        match field {
            SourceField::Open => self.open.map(f64::from),
            SourceField::High => self.high.map(f64::from),
            SourceField::Low => self.low.map(f64::from),
            SourceField::Close => self.close.map(f64::from),
            SourceField::Typical => match (self.high, self.low, self.close) {
                (Some(h), Some(l), Some(c)) => Some((h.0 + l.0 + c.0) / 3.0),
                _ => None,
            },
            SourceField::Extension(name) => self.extensions.get(name),
        }
    }
}

impl Keyed for Candle {
    #[inline]
    fn uid(&self) -> Uid {
        self.uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_stay_sorted_and_overwrite() {
        let mut ext = Extensions::new();
        assert_eq!(ext.insert("tr", 2.0), None);
        assert_eq!(ext.insert("+dm", 1.0), None);
        assert_eq!(ext.insert("-dm", 0.5), None);
        assert_eq!(ext.insert("tr", 3.0), Some(2.0));

        let names: Vec<_> = ext.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["+dm", "-dm", "tr"]);
        assert_eq!(ext.get("tr"), Some(3.0));
        assert_eq!(ext.remove("+dm"), Some(1.0));
        assert!(!ext.contains("+dm"));
    }

    #[test]
    fn test_value_accessor() {
        let mut c = Candle::ohlc(Uid::at(0), 1.0, 4.0, 1.0, 3.0);
        c.extensions.insert("tr", 3.0);

        assert_eq!(c.value(&SourceField::Close), Some(3.0));
        assert_eq!(c.value(&SourceField::Typical), Some(8.0 / 3.0));
        assert_eq!(c.value(&SourceField::Extension("tr".into())), Some(3.0));
        assert_eq!(
            c.value(&SourceField::Extension("gain".into())),
            None,
            "absent extension means not yet computable"
        );
    }
}
