use std::{collections::BTreeMap, io};

use ndarray::{Axis, stack};

use crate::codec::Tensor;

/// The reserved field name for the network input.
pub const INPUT: &str = "input";
/// The reserved field name for the ground truth.
pub const OUTPUT: &str = "output";
/// The reserved field name for a scalar weighting used by the network.
pub const LOSS: &str = "loss";
/// The label a client uses to veto it's own sample.
pub const CHECK: &str = "check";
/// The label carrying a dataset input injected into a simulation.
pub const SAMPLE_IN: &str = "sample_in";
/// The label carrying a dataset output injected into a simulation.
pub const SAMPLE_OUT: &str = "sample_out";

/// A raw `{label: payload}` mapping accumulated until a `done` command.
pub type LabelledData = BTreeMap<String, Vec<u8>>;

/// Free-form parameters exchanged during the handshake.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// A mapping from field names to tensors.
pub type Fields = BTreeMap<String, Tensor>;

/// One record produced by one round of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    fields: Fields,
}

impl Sample {
    /// Creates a new `Sample` with the two mandatory fields.
    ///
    /// # Arguments
    /// * `input` - The network input.
    /// * `output` - The ground truth.
    pub fn new(input: Tensor, output: Tensor) -> Self {
        let mut fields = Fields::new();
        fields.insert(INPUT.to_string(), input);
        fields.insert(OUTPUT.to_string(), output);
        Self { fields }
    }

    /// Creates a `Sample` from an arbitrary mapping.
    ///
    /// # Returns
    /// The sample or an `InvalidData` error if `input` or `output` is missing.
    pub fn from_fields(fields: Fields) -> io::Result<Self> {
        for name in [INPUT, OUTPUT] {
            if !fields.contains_key(name) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("sample is missing the mandatory field {name:?}"),
                ));
            }
        }

        Ok(Self { fields })
    }

    /// Adds or replaces an additional field.
    pub fn with_field(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.fields.insert(name.into(), tensor);
        self
    }

    pub fn input(&self) -> &Tensor {
        &self.fields[INPUT]
    }

    pub fn output(&self) -> &Tensor {
        &self.fields[OUTPUT]
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.fields.get(name)
    }

    /// Mutable access to a field's values, the field set itself can't change.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.fields.get_mut(name)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Iterates over the field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// An ordered sequence of samples sharing the same field set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    samples: Vec<Sample>,
}

impl Batch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Stacks every field along a new leading batch axis.
    ///
    /// # Returns
    /// A mapping from field name to the stacked tensor, or an `InvalidData`
    /// error if the samples don't share the same fields and shapes.
    pub fn stack(&self) -> io::Result<Fields> {
        let Some(first) = self.samples.first() else {
            return Ok(Fields::new());
        };

        let mut stacked = Fields::new();
        for name in first.names() {
            let views = self
                .samples
                .iter()
                .map(|sample| {
                    sample.get(name).map(Tensor::view).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("field {name:?} is missing from a sample of the batch"),
                        )
                    })
                })
                .collect::<io::Result<Vec<_>>>()?;

            let tensor = stack(Axis(0), &views)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            stacked.insert(name.to_string(), tensor);
        }

        if self.samples.iter().any(|s| s.fields.len() != first.fields.len()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "the samples of the batch don't share the same fields",
            ));
        }

        Ok(stacked)
    }
}

impl FromIterator<Sample> for Batch {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
