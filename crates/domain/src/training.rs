//! TensorFlow `Example` messages and the converters that turn remote-data
//! rows into training examples.

use std::collections::HashMap;

use prost::Message;
use thiserror::Error;

/// Number of pixel features in an MNIST row.
pub const MNIST_PIXELS: usize = 784;

const CRITEO_INT_FEATURES: usize = 13;
const CRITEO_COLUMNS: usize = 40;

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: HashMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

impl Feature {
    pub fn bytes(value: &str) -> Self {
        Self {
            kind: Some(feature::Kind::BytesList(BytesList {
                value: vec![value.as_bytes().to_vec()],
            })),
        }
    }

    pub fn floats(values: Vec<f32>) -> Self {
        Self {
            kind: Some(feature::Kind::FloatList(FloatList { value: values })),
        }
    }

    pub fn int64(value: i64) -> Self {
        Self {
            kind: Some(feature::Kind::Int64List(Int64List { value: vec![value] })),
        }
    }
}

impl Example {
    pub fn from_features<I>(features: I) -> Self
    where
        I: IntoIterator<Item = (String, Feature)>,
    {
        Self {
            features: Some(Features {
                feature: features.into_iter().collect(),
            }),
        }
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.as_ref()?.feature.get(name)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExampleError {
    #[error("expected at least {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}

/// One record returned from `on_training_examples`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingExampleRecord {
    pub example: Vec<u8>,
    pub resumption_token: Vec<u8>,
}

impl TrainingExampleRecord {
    pub fn new(example: &Example, index: usize) -> Self {
        Self {
            example: example.to_bytes(),
            resumption_token: format!("token{index}").into_bytes(),
        }
    }
}

/// Empty integer columns read as zero.
fn parse_long(value: &str) -> Result<i64, ExampleError> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .trim()
        .parse()
        .map_err(|_| ExampleError::InvalidNumber(value.to_string()))
}

/// Criteo CSV row: `clicked`, 13 integer features, 26 categorical features.
/// Categorical columns keep their absolute column number in the feature name.
pub fn criteo_example(row: &str) -> Result<Example, ExampleError> {
    let fields: Vec<&str> = row.split(',').collect();
    if fields.len() < CRITEO_COLUMNS {
        return Err(ExampleError::MissingFields {
            expected: CRITEO_COLUMNS,
            found: fields.len(),
        });
    }

    let mut features = Vec::with_capacity(CRITEO_COLUMNS);
    features.push(("clicked".to_string(), Feature::int64(parse_long(fields[0])?)));
    for (column, value) in fields.iter().enumerate().take(CRITEO_COLUMNS).skip(1) {
        let feature = if column <= CRITEO_INT_FEATURES {
            (format!("int-feature-{column}"), Feature::int64(parse_long(value)?))
        } else {
            (format!("categorical-feature-{column}"), Feature::bytes(value))
        };
        features.push(feature);
    }
    Ok(Example::from_features(features))
}

/// MNIST row: `<784 comma separated pixels>:<label>`.
pub fn mnist_example(row: &str) -> Result<Example, ExampleError> {
    let (pixels, label) = row.split_once(':').ok_or(ExampleError::MissingFields {
        expected: 2,
        found: 1,
    })?;
    let raw: Vec<&str> = pixels.split(',').collect();
    if raw.len() < MNIST_PIXELS {
        return Err(ExampleError::MissingFields {
            expected: MNIST_PIXELS,
            found: raw.len(),
        });
    }
    let values = raw[..MNIST_PIXELS]
        .iter()
        .map(|value| {
            value
                .trim()
                .parse::<f32>()
                .map_err(|_| ExampleError::InvalidNumber(value.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let label = label.split(':').next().unwrap_or_default();

    Ok(Example::from_features([
        ("x".to_string(), Feature::floats(values)),
        ("y".to_string(), Feature::int64(parse_long(label)?)),
    ]))
}

/// Synthetic example with random pixels in `[0, 1)` and a 0/1 label.
pub fn synthetic_example(pixels: Vec<f32>, label: i64) -> Example {
    Example::from_features([
        ("x".to_string(), Feature::floats(pixels)),
        ("y".to_string(), Feature::int64(label)),
    ])
}
