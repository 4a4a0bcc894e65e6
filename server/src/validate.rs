use std::{collections::BTreeMap, fmt};

use comms::{
    Fields, LabelledData, Sample, Tensor, codec,
    sample::{CHECK, INPUT, OUTPUT},
};
use ndarray::Array1;

/// Why a client's reply was dropped instead of queued.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The client's `check_sample` vetoed the sample.
    Vetoed,
    Missing(&'static str),
    Malformed(String),
    WrongSize {
        field: String,
        expected: usize,
        got: usize,
    },
    /// The additional fields differ from the ones of the first accepted sample.
    FieldSet,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Vetoed => write!(f, "vetoed by the simulation"),
            Rejection::Missing(field) => write!(f, "missing field {field:?}"),
            Rejection::Malformed(field) => write!(f, "field {field:?} is not a tensor"),
            Rejection::WrongSize {
                field,
                expected,
                got,
            } => write!(f, "field {field:?} has {got} values, expected {expected}"),
            Rejection::FieldSet => write!(f, "additional fields differ from the session's"),
        }
    }
}

/// The shapes and field lengths samples are validated against.
///
/// `input` and `output` shapes come from the first client's handshake, the
/// lengths of the additional fields from the first accepted sample.
#[derive(Debug, Clone)]
pub struct SampleRegistry {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    extras: Option<BTreeMap<String, usize>>,
}

impl SampleRegistry {
    pub fn new(input_shape: Vec<usize>, output_shape: Vec<usize>) -> Self {
        Self {
            input_shape,
            output_shape,
            extras: None,
        }
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Turns a client's `cmpt` reply into a sample.
    ///
    /// # Arguments
    /// * `data` - The labelled data the client replied with.
    ///
    /// # Returns
    /// The reshaped sample, or the reason it must be dropped.
    pub fn validate(&mut self, mut data: LabelledData) -> Result<Sample, Rejection> {
        if let Some(check) = data.remove(CHECK) {
            let values =
                codec::decode_flat(&check).map_err(|_| Rejection::Malformed(CHECK.into()))?;

            if values.contains(&0.0) {
                return Err(Rejection::Vetoed);
            }
        }

        let input = take_shaped(&mut data, INPUT, &self.input_shape)?;
        let output = take_shaped(&mut data, OUTPUT, &self.output_shape)?;

        let mut extras = Fields::new();
        for (name, bytes) in data {
            let values =
                codec::decode_flat(&bytes).map_err(|_| Rejection::Malformed(name.clone()))?;
            extras.insert(name, Array1::from(values).into_dyn());
        }

        match &self.extras {
            Some(lens) => {
                if lens.len() != extras.len() {
                    return Err(Rejection::FieldSet);
                }

                for (name, tensor) in &extras {
                    let &expected = lens.get(name).ok_or(Rejection::FieldSet)?;
                    if expected != tensor.len() {
                        return Err(Rejection::WrongSize {
                            field: name.clone(),
                            expected,
                            got: tensor.len(),
                        });
                    }
                }
            }
            None => {
                let lens = extras
                    .iter()
                    .map(|(name, tensor)| (name.clone(), tensor.len()))
                    .collect();
                self.extras = Some(lens);
            }
        }

        Ok(extras
            .into_iter()
            .fold(Sample::new(input, output), |sample, (name, tensor)| {
                sample.with_field(name, tensor)
            }))
    }
}

fn take_shaped(
    data: &mut LabelledData,
    field: &'static str,
    shape: &[usize],
) -> Result<Tensor, Rejection> {
    let bytes = data.remove(field).ok_or(Rejection::Missing(field))?;
    let values = codec::decode_flat(&bytes).map_err(|_| Rejection::Malformed(field.into()))?;

    let expected = shape.iter().product();
    if values.len() != expected {
        return Err(Rejection::WrongSize {
            field: field.into(),
            expected,
            got: values.len(),
        });
    }

    codec::from_flat(values, shape).map_err(|_| Rejection::Malformed(field.into()))
}
