//! Nested evaluation results.
//!
//! Evaluating an artifact produces an arbitrarily nested structure of
//! sequences, mappings and records whose leaves may or may not be numeric
//! tensors. The equivalence check only looks at the tensor leaves, collected
//! in a deterministic order by [`Nested::tensors`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a tensor's storage lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Device {
    #[default]
    Host,
    Accelerator {
        index: u32,
    },
}

/// A dense, row-major tensor of `f64` elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    #[serde(default)]
    pub device: Device,
}

impl Tensor {
    /// A one-dimensional host tensor.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
            device: Device::Host,
        }
    }

    /// A zero-dimensional host tensor.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
            device: Device::Host,
        }
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The same tensor, tagged as residing on `device`.
    pub fn on(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// A host-resident copy of this tensor.
    pub fn to_host(&self) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.clone(),
            device: Device::Host,
        }
    }
}

/// An evaluation result: a closed set of container shapes over tensor and
/// opaque leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Nested {
    Tensor(Tensor),
    Sequence {
        items: Vec<Nested>,
    },
    Mapping {
        entries: BTreeMap<String, Nested>,
    },
    Record {
        name: String,
        fields: Vec<(String, Nested)>,
    },
    /// A non-tensor leaf. Ignored by the equivalence check.
    Opaque {
        value: serde_json::Value,
    },
}

impl Nested {
    pub fn sequence(items: impl IntoIterator<Item = Nested>) -> Self {
        Nested::Sequence {
            items: items.into_iter().collect(),
        }
    }

    pub fn mapping<K: Into<String>>(entries: impl IntoIterator<Item = (K, Nested)>) -> Self {
        Nested::Mapping {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Visit every tensor leaf in traversal order.
    ///
    /// Sequences and record fields are visited in declaration order, mapping
    /// entries in key order, so two congruent structures yield their leaves in
    /// corresponding positions.
    pub fn visit_tensors<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a Tensor),
    {
        match self {
            Nested::Tensor(t) => visit(t),
            Nested::Sequence { items } => {
                for item in items {
                    item.visit_tensors(visit);
                }
            }
            Nested::Mapping { entries } => {
                for value in entries.values() {
                    value.visit_tensors(visit);
                }
            }
            Nested::Record { fields, .. } => {
                for (_, value) in fields {
                    value.visit_tensors(visit);
                }
            }
            Nested::Opaque { .. } => {}
        }
    }

    /// Collect every tensor leaf in traversal order.
    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = Vec::new();
        self.visit_tensors(&mut |t| out.push(t));
        out
    }
}

impl From<Tensor> for Nested {
    fn from(tensor: Tensor) -> Self {
        Nested::Tensor(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tensors_skip_opaque_leaves() {
        let value = Nested::sequence([
            Tensor::scalar(1.0).into(),
            Nested::Opaque { value: json!("x") },
            Nested::sequence([Tensor::from_vec(vec![2.0, 3.0]).into()]),
        ]);

        let leaves: Vec<f64> = value
            .tensors()
            .iter()
            .flat_map(|t| t.data.iter().copied())
            .collect();
        assert_eq!(leaves, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mapping_visits_in_key_order() {
        let value = Nested::mapping([
            ("b", Tensor::scalar(2.0).into()),
            ("a", Tensor::scalar(1.0).into()),
        ]);

        let leaves: Vec<f64> = value.tensors().iter().map(|t| t.data[0]).collect();
        assert_eq!(leaves, vec![1.0, 2.0]);
    }

    #[test]
    fn test_record_visits_in_field_order() {
        let value = Nested::Record {
            name: "Pair".to_string(),
            fields: vec![
                ("second".to_string(), Tensor::scalar(2.0).into()),
                ("first".to_string(), Tensor::scalar(1.0).into()),
            ],
        };

        let leaves: Vec<f64> = value.tensors().iter().map(|t| t.data[0]).collect();
        assert_eq!(leaves, vec![2.0, 1.0]);
    }

    #[test]
    fn test_nested_serde_shape() {
        let value = Nested::sequence([Tensor::from_vec(vec![1.0]).into()]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], json!("sequence"));
        assert_eq!(json["items"][0]["kind"], json!("tensor"));
        assert_eq!(json["items"][0]["device"]["type"], json!("host"));

        let back: Nested = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_tensor_device_defaults_to_host() {
        let t: Tensor = serde_json::from_value(json!({"shape": [2], "data": [1.0, 2.0]})).unwrap();
        assert_eq!(t.device, Device::Host);
    }

    #[test]
    fn test_to_host_keeps_values() {
        let t = Tensor::from_vec(vec![1.0, 2.0]).on(Device::Accelerator { index: 1 });
        let host = t.to_host();
        assert_eq!(host.device, Device::Host);
        assert_eq!(host.data, t.data);
    }
}
