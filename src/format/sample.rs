//! Sample encodings and the owned sample buffer carried by a chunk.

use std::fmt;

use crate::error::MalformedMessage;

/// The fixed set of sample encodings a stream may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    /// Signed 8-bit PCM.
    I8,
    /// Signed 16-bit PCM.
    I16,
    /// Signed 32-bit PCM.
    I32,
    /// 32-bit float in `[-1.0, 1.0]`.
    F32,
    /// 64-bit float in `[-1.0, 1.0]`.
    F64,
}

impl SampleEncoding {
    /// Size of one sample on the wire, in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Returns `true` for the floating-point encodings.
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A primitive sample type that can live in a [`Samples`] buffer.
///
/// `to_unit`/`from_unit` implement the canonical signed-unit mapping:
/// integers of width W divide by 2^(W-1) on the way in and multiply by
/// 2^(W-1)-1 on the way out. Float-to-int casts saturate.
pub trait Sample: Copy + Send + Sync + 'static {
    /// Encoding tag for this type.
    const ENCODING: SampleEncoding;
    /// The value written on underrun.
    const SILENCE: Self;

    /// Lifts the raw value into the workspace without scaling.
    fn to_workspace(self) -> f64;
    /// Casts a workspace value back without scaling (rounds for integers).
    fn from_workspace(value: f64) -> Self;
    /// Maps to the signed-unit range.
    fn to_unit(self) -> f64;
    /// Maps from the signed-unit range, saturating on overflow.
    fn from_unit(value: f64) -> Self;

    /// Borrows the matching variant of a sample buffer.
    fn slice(samples: &Samples) -> Option<&[Self]>;
    /// Wraps an owned vector in the matching variant.
    fn into_samples(samples: Vec<Self>) -> Samples;
    /// Wraps an output slice in the matching variant.
    fn wrap_mut(out: &mut [Self]) -> SamplesMut<'_>;
}

macro_rules! impl_int_sample {
    ($ty:ty, $variant:ident) => {
        impl Sample for $ty {
            const ENCODING: SampleEncoding = SampleEncoding::$variant;
            const SILENCE: Self = 0;

            #[inline]
            fn to_workspace(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_workspace(value: f64) -> Self {
                value.round() as $ty
            }

            #[inline]
            fn to_unit(self) -> f64 {
                self as f64 / -(<$ty>::MIN as f64)
            }

            #[inline]
            fn from_unit(value: f64) -> Self {
                (value * <$ty>::MAX as f64) as $ty
            }

            fn slice(samples: &Samples) -> Option<&[Self]> {
                match samples {
                    Samples::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_samples(samples: Vec<Self>) -> Samples {
                Samples::$variant(samples)
            }

            fn wrap_mut(out: &mut [Self]) -> SamplesMut<'_> {
                SamplesMut::$variant(out)
            }
        }
    };
}

macro_rules! impl_float_sample {
    ($ty:ty, $variant:ident) => {
        impl Sample for $ty {
            const ENCODING: SampleEncoding = SampleEncoding::$variant;
            const SILENCE: Self = 0.0;

            #[inline]
            fn to_workspace(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_workspace(value: f64) -> Self {
                value as $ty
            }

            #[inline]
            fn to_unit(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_unit(value: f64) -> Self {
                value as $ty
            }

            fn slice(samples: &Samples) -> Option<&[Self]> {
                match samples {
                    Samples::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_samples(samples: Vec<Self>) -> Samples {
                Samples::$variant(samples)
            }

            fn wrap_mut(out: &mut [Self]) -> SamplesMut<'_> {
                SamplesMut::$variant(out)
            }
        }
    };
}

impl_int_sample!(i8, I8);
impl_int_sample!(i16, I16);
impl_int_sample!(i32, I32);
impl_float_sample!(f32, F32);
impl_float_sample!(f64, F64);

/// An owned, interleaved sample buffer in exactly one encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Signed 8-bit PCM.
    I8(Vec<i8>),
    /// Signed 16-bit PCM.
    I16(Vec<i16>),
    /// Signed 32-bit PCM.
    I32(Vec<i32>),
    /// 32-bit float.
    F32(Vec<f32>),
    /// 64-bit float.
    F64(Vec<f64>),
}

/// Applies the same expression to whichever vector a [`Samples`] holds.
macro_rules! with_samples {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            Samples::I8($v) => $body,
            Samples::I16($v) => $body,
            Samples::I32($v) => $body,
            Samples::F32($v) => $body,
            Samples::F64($v) => $body,
        }
    };
}

impl Samples {
    /// Creates an empty buffer of the given encoding.
    pub fn empty(encoding: SampleEncoding) -> Self {
        match encoding {
            SampleEncoding::I8 => Self::I8(Vec::new()),
            SampleEncoding::I16 => Self::I16(Vec::new()),
            SampleEncoding::I32 => Self::I32(Vec::new()),
            SampleEncoding::F32 => Self::F32(Vec::new()),
            SampleEncoding::F64 => Self::F64(Vec::new()),
        }
    }

    /// Encoding of the contained samples.
    pub fn encoding(&self) -> SampleEncoding {
        match self {
            Self::I8(_) => SampleEncoding::I8,
            Self::I16(_) => SampleEncoding::I16,
            Self::I32(_) => SampleEncoding::I32,
            Self::F32(_) => SampleEncoding::F32,
            Self::F64(_) => SampleEncoding::F64,
        }
    }

    /// Total number of samples (all channels).
    pub fn len(&self) -> usize {
        with_samples!(self, v => v.len())
    }

    /// Returns `true` if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Little-endian wire bytes, no header.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        with_samples!(self, v => v.iter().flat_map(|s| s.to_le_bytes()).collect())
    }

    /// Parses little-endian wire bytes.
    ///
    /// `frame_bytes` is the size of one frame; a payload that is not a whole
    /// number of frames is rejected.
    pub fn from_le_bytes(
        encoding: SampleEncoding,
        bytes: &[u8],
        channels: u16,
    ) -> Result<Self, MalformedMessage> {
        let frame_bytes = encoding.bytes_per_sample() * usize::from(channels.max(1));
        if bytes.len() % frame_bytes != 0 {
            return Err(MalformedMessage::Misaligned {
                len: bytes.len(),
                frame_bytes,
            });
        }

        macro_rules! parse {
            ($ty:ty, $variant:ident) => {
                Self::$variant(
                    bytes
                        .chunks_exact(std::mem::size_of::<$ty>())
                        .map(|b| {
                            let mut raw = [0u8; std::mem::size_of::<$ty>()];
                            raw.copy_from_slice(b);
                            <$ty>::from_le_bytes(raw)
                        })
                        .collect(),
                )
            };
        }

        Ok(match encoding {
            SampleEncoding::I8 => parse!(i8, I8),
            SampleEncoding::I16 => parse!(i16, I16),
            SampleEncoding::I32 => parse!(i32, I32),
            SampleEncoding::F32 => parse!(f32, F32),
            SampleEncoding::F64 => parse!(f64, F64),
        })
    }

    /// Copies into an `f64` workspace, either unscaled or normalized to unit range.
    pub(crate) fn to_workspace(&self, normalize: bool) -> Vec<f64> {
        fn lift<T: Sample>(v: &[T], normalize: bool) -> Vec<f64> {
            if normalize {
                v.iter().map(|s| s.to_unit()).collect()
            } else {
                v.iter().map(|s| s.to_workspace()).collect()
            }
        }
        with_samples!(self, v => lift(v, normalize))
    }

    /// Builds a buffer from an `f64` workspace, either unscaled or from unit range.
    pub(crate) fn from_workspace(
        encoding: SampleEncoding,
        workspace: &[f64],
        from_unit: bool,
    ) -> Self {
        fn lower<T: Sample>(w: &[f64], from_unit: bool) -> Samples {
            let v: Vec<T> = if from_unit {
                w.iter().map(|&x| T::from_unit(x)).collect()
            } else {
                w.iter().map(|&x| T::from_workspace(x)).collect()
            };
            T::into_samples(v)
        }
        match encoding {
            SampleEncoding::I8 => lower::<i8>(workspace, from_unit),
            SampleEncoding::I16 => lower::<i16>(workspace, from_unit),
            SampleEncoding::I32 => lower::<i32>(workspace, from_unit),
            SampleEncoding::F32 => lower::<f32>(workspace, from_unit),
            SampleEncoding::F64 => lower::<f64>(workspace, from_unit),
        }
    }
}

macro_rules! impl_from_vec {
    ($ty:ty, $variant:ident) => {
        impl From<Vec<$ty>> for Samples {
            fn from(v: Vec<$ty>) -> Self {
                Self::$variant(v)
            }
        }
    };
}

impl_from_vec!(i8, I8);
impl_from_vec!(i16, I16);
impl_from_vec!(i32, I32);
impl_from_vec!(f32, F32);
impl_from_vec!(f64, F64);

/// A borrowed, writable output buffer handed to a playback callback.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    /// Signed 8-bit PCM.
    I8(&'a mut [i8]),
    /// Signed 16-bit PCM.
    I16(&'a mut [i16]),
    /// Signed 32-bit PCM.
    I32(&'a mut [i32]),
    /// 32-bit float.
    F32(&'a mut [f32]),
    /// 64-bit float.
    F64(&'a mut [f64]),
}

impl SamplesMut<'_> {
    /// Number of samples the callback must produce.
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    /// Returns `true` if there is nothing to fill.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
