//! Analysis maps and named map collections.

use crate::error::{ItemFailure, MarvinError, MarvinResult};
use crate::object::DataObject;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Value, inverse variance and mask planes of one map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    pub value: Array2<f64>,
    pub ivar: Array2<f64>,
    pub mask: Array2<i32>,
}

impl MapData {
    /// Check that all three planes share one shape.
    pub fn validate(&self) -> MarvinResult<(usize, usize)> {
        let shape = self.value.dim();
        if self.ivar.dim() != shape || self.mask.dim() != shape {
            return Err(MarvinError::InvalidData(format!(
                "map planes disagree: value {:?}, ivar {:?}, mask {:?}",
                shape,
                self.ivar.dim(),
                self.mask.dim()
            )));
        }
        Ok(shape)
    }
}

/// One property/channel map of a Maps object.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub parameter: String,
    pub channel: Option<String>,
    pub unit: String,
    pub bintype: String,
    pub template: String,
    pub data: MapData,
}

impl Map {
    pub fn value(&self) -> &Array2<f64> {
        &self.data.value
    }

    pub fn ivar(&self) -> &Array2<f64> {
        &self.data.ivar
    }

    pub fn mask(&self) -> &Array2<i32> {
        &self.data.mask
    }

    /// `parameter_channel`, or the bare parameter for single-channel maps.
    pub fn name(&self) -> String {
        match &self.channel {
            Some(ch) => format!("{}_{}", self.parameter, ch),
            None => self.parameter.clone(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.value.dim()
    }
}

/// `parameter[:channel]` map address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapKey {
    pub parameter: String,
    pub channel: Option<String>,
}

impl MapKey {
    pub fn new(parameter: &str, channel: Option<&str>) -> Self {
        Self {
            parameter: parameter.to_string(),
            channel: channel.map(str::to_string),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.channel {
            Some(ch) => write!(f, "{}:{}", self.parameter, ch),
            None => write!(f, "{}", self.parameter),
        }
    }
}

impl FromStr for MapKey {
    type Err = MarvinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (parameter, channel) = match s.split_once(':') {
            Some((p, c)) => (p, Some(c)),
            None => (s, None),
        };
        if parameter.is_empty() || channel.is_some_and(str::is_empty) {
            return Err(MarvinError::Identifier(format!(
                "'{s}' is not a parameter:channel map name"
            )));
        }
        Ok(Self::new(parameter, channel))
    }
}

/// Context of the error raised for an incomplete map collection.
pub const MAP_DICT_FAILURE: &str = "could not get map for one of requested parameters";

/// Maps fetched for a list of keys.
///
/// Every requested key ends up either in the collection or in
/// [`MapDict::failures`]; nothing is dropped silently.
#[derive(Debug, Default)]
pub struct MapDict {
    maps: BTreeMap<String, Arc<Map>>,
    order: Vec<String>,
    failures: Vec<ItemFailure>,
}

impl MapDict {
    /// Fetch every key from `object`, recording failures per key.
    pub fn collect<S: AsRef<str>>(object: &DataObject, keys: &[S]) -> Self {
        let mut dict = Self::default();
        for key in keys {
            let key = key.as_ref();
            let result = key
                .parse::<MapKey>()
                .and_then(|k| object.get_map(&k.parameter, k.channel.as_deref()));
            match result {
                Ok(map) => {
                    dict.order.push(key.to_string());
                    dict.maps.insert(key.to_string(), map);
                }
                Err(e) => {
                    log::warn!("Map {key} unavailable: {e}");
                    dict.failures.push(e.as_item_failure(key));
                }
            }
        }
        dict
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Map>> {
        self.maps.get(key)
    }

    /// Successful keys in request order.
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fail with every missing key when the collection is incomplete.
    pub fn check(&self) -> MarvinResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(MarvinError::PartialFailure {
                context: MAP_DICT_FAILURE.to_string(),
                failures: self.failures.clone(),
            })
        }
    }

    /// The maps, or the enumerated failure.
    pub fn into_complete(self) -> MarvinResult<BTreeMap<String, Arc<Map>>> {
        self.check()?;
        Ok(self.maps)
    }
}
