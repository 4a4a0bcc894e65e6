//! Stateless byte codec for tensors and labels.
//!
//! Tensors travel as C-order little-endian `f64`s, the receiving end rebuilds
//! the shape from the field's registered shape.

use std::io;

use ndarray::{ArrayD, IxDyn};

/// A dense rectangular array of 64-bit floats.
pub type Tensor = ArrayD<f64>;

const F64_SIZE: usize = size_of::<f64>();

/// Encodes `tensor` into a fresh byte buffer.
///
/// # Arguments
/// * `tensor` - The tensor to encode.
///
/// # Returns
/// The flattened little-endian bytes of the tensor.
pub fn encode(tensor: &Tensor) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tensor.len() * F64_SIZE);
    encode_into(tensor, &mut buf);
    buf
}

/// Appends the encoded `tensor` to `buf`.
///
/// Non standard layout tensors (transposed views, slices) are written in
/// logical C-order all the same.
pub fn encode_into(tensor: &Tensor, buf: &mut Vec<u8>) {
    match tensor.as_slice() {
        Some(values) => encode_slice_into(values, buf),
        None => {
            let values: Vec<f64> = tensor.iter().copied().collect();
            encode_slice_into(&values, buf);
        }
    }
}

/// Appends the encoded flat `values` to `buf`.
#[cfg(target_endian = "little")]
pub fn encode_slice_into(values: &[f64], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytemuck::cast_slice(values));
}

/// Appends the encoded flat `values` to `buf`.
#[cfg(not(target_endian = "little"))]
pub fn encode_slice_into(values: &[f64], buf: &mut Vec<u8>) {
    buf.reserve(values.len() * F64_SIZE);
    for x in values {
        buf.extend_from_slice(&x.to_le_bytes());
    }
}

/// Turns floats read as raw little-endian words into native ones, a no-op on
/// little-endian targets.
pub fn from_le_in_place(values: &mut [f64]) {
    for x in values {
        *x = f64::from_bits(u64::from_le(x.to_bits()));
    }
}

/// Decodes a flat sequence of floats.
///
/// # Arguments
/// * `bytes` - The encoded floats.
///
/// # Returns
/// The decoded values or an `InvalidData` error if the length isn't a multiple of 8.
pub fn decode_flat(bytes: &[u8]) -> io::Result<Vec<f64>> {
    if bytes.len() % F64_SIZE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "tensor payload of {} bytes is not a multiple of {F64_SIZE}",
                bytes.len()
            ),
        ));
    }

    // `bytes` has no alignment guarantee, copy into an `f64` aligned buffer.
    let mut values: Vec<f64> = vec![0.0; bytes.len() / F64_SIZE];
    bytemuck::cast_slice_mut(values.as_mut_slice()).copy_from_slice(bytes);
    from_le_in_place(&mut values);

    Ok(values)
}

/// Decodes a tensor given it's expected shape.
///
/// # Arguments
/// * `bytes` - The encoded tensor.
/// * `shape` - The registered shape for this tensor.
///
/// # Returns
/// The decoded tensor or an `InvalidData` error if the sizes don't match.
pub fn decode(bytes: &[u8], shape: &[usize]) -> io::Result<Tensor> {
    let values = decode_flat(bytes)?;
    from_flat(values, shape)
}

/// Reshapes flat `values` into a tensor of `shape`.
///
/// # Returns
/// The tensor or an `InvalidData` error if `values.len() != ∏shape`.
pub fn from_flat(values: Vec<f64>, shape: &[usize]) -> io::Result<Tensor> {
    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "tensor has {} elements, shape {shape:?} needs {expected}",
                values.len()
            ),
        ));
    }

    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decodes a UTF-8 label.
pub fn decode_label(bytes: &[u8]) -> io::Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encodes a shape as a tensor of dimensions, used by the `size` reply.
pub fn encode_shape(shape: &[usize]) -> Vec<u8> {
    let dims: Vec<f64> = shape.iter().map(|&d| d as f64).collect();
    let mut buf = Vec::with_capacity(dims.len() * F64_SIZE);
    encode_slice_into(&dims, &mut buf);
    buf
}

/// Decodes a shape sent with `encode_shape`.
///
/// # Returns
/// The shape or an `InvalidData` error if any dimension isn't a positive integer.
pub fn decode_shape(bytes: &[u8]) -> io::Result<Vec<usize>> {
    decode_flat(bytes)?
        .into_iter()
        .map(|d| {
            if d.fract() != 0.0 || d < 1.0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid shape dimension {d}"),
                ));
            }
            Ok(d as usize)
        })
        .collect()
}
