//! Serialization support for veles types.
//!
//! This module provides serialization and deserialization capabilities for
//! the graph store and pooler. When the `serde` feature is enabled, all major
//! types implement `Serialize` and `Deserialize`, and a full save/reload
//! round trip reproduces a structurally equal store and pooler (duty cycles,
//! boost factors, iteration counters and random-source state included).
//!
//! # Supported Formats
//!
//! - **Binary** - Fast binary serialization using bincode (default)
//! - **JSON** - Human-readable JSON format using serde_json
//!
//! # Example
//!
//! ```rust,ignore
//! use veles::algorithms::SpatialPooler;
//! use veles::serialization::{Serializable, SerializableFormat};
//!
//! let sp = SpatialPooler::new(/* ... */)?;
//!
//! // Save to binary file
//! sp.save_to_file("model.bin", SerializableFormat::Binary)?;
//!
//! // Load from file
//! let sp2 = SpatialPooler::load_from_file("model.bin", SerializableFormat::Binary)?;
//!
//! // Serialize to bytes or JSON
//! let bytes = sp.to_bytes(SerializableFormat::Binary)?;
//! let json = sp.to_json()?;
//! ```

use crate::error::{Result, VelesError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

/// Serialization format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializableFormat {
    /// Fast binary serialization (default).
    #[default]
    Binary,

    /// Human-readable JSON format.
    Json,
}

impl std::fmt::Display for SerializableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializableFormat::Binary => write!(f, "BINARY"),
            SerializableFormat::Json => write!(f, "JSON"),
        }
    }
}

impl std::str::FromStr for SerializableFormat {
    type Err = VelesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BINARY" | "BIN" => Ok(SerializableFormat::Binary),
            "JSON" => Ok(SerializableFormat::Json),
            _ => Err(VelesError::InvalidParameter {
                name: "format",
                message: format!("Unknown format '{s}'. Expected: BINARY, JSON"),
            }),
        }
    }
}

/// Trait for types that can be serialized and deserialized.
///
/// Provides a unified interface for saving and loading engine components
/// to/from various formats and destinations.
pub trait Serializable: Serialize + DeserializeOwned + Sized {
    /// Serializes to a byte vector.
    fn to_bytes(&self, format: SerializableFormat) -> Result<Vec<u8>> {
        match format {
            SerializableFormat::Binary => {
                bincode::serialize(self).map_err(|e| VelesError::SerializationError {
                    message: format!("Binary serialization failed: {e}"),
                })
            }
            SerializableFormat::Json => {
                serde_json::to_vec_pretty(self).map_err(|e| VelesError::SerializationError {
                    message: format!("JSON serialization failed: {e}"),
                })
            }
        }
    }

    /// Deserializes from a byte slice.
    fn from_bytes(bytes: &[u8], format: SerializableFormat) -> Result<Self> {
        match format {
            SerializableFormat::Binary => {
                bincode::deserialize(bytes).map_err(|e| VelesError::SerializationError {
                    message: format!("Binary deserialization failed: {e}"),
                })
            }
            SerializableFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| VelesError::SerializationError {
                    message: format!("JSON deserialization failed: {e}"),
                })
            }
        }
    }

    /// Serializes to a JSON string.
    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| VelesError::SerializationError {
            message: format!("JSON serialization failed: {e}"),
        })
    }

    /// Deserializes from a JSON string.
    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VelesError::SerializationError {
            message: format!("JSON deserialization failed: {e}"),
        })
    }

    /// Serializes to a writer.
    fn save<W: Write>(&self, writer: W, format: SerializableFormat) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        match format {
            SerializableFormat::Binary => bincode::serialize_into(&mut writer, self).map_err(|e| {
                VelesError::SerializationError {
                    message: format!("Binary serialization failed: {e}"),
                }
            }),
            SerializableFormat::Json => serde_json::to_writer_pretty(&mut writer, self).map_err(
                |e| VelesError::SerializationError {
                    message: format!("JSON serialization failed: {e}"),
                },
            ),
        }
    }

    /// Deserializes from a reader.
    fn load<R: Read>(reader: R, format: SerializableFormat) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        match format {
            SerializableFormat::Binary => bincode::deserialize_from(&mut reader).map_err(|e| {
                VelesError::SerializationError {
                    message: format!("Binary deserialization failed: {e}"),
                }
            }),
            SerializableFormat::Json => serde_json::from_reader(&mut reader).map_err(|e| {
                VelesError::SerializationError {
                    message: format!("JSON deserialization failed: {e}"),
                }
            }),
        }
    }

    /// Saves to a file.
    fn save_to_file<P: AsRef<Path>>(&self, path: P, format: SerializableFormat) -> Result<()> {
        let file = File::create(path.as_ref()).map_err(|e| VelesError::IoError {
            message: format!("Failed to create file: {e}"),
        })?;
        self.save(file, format)
    }

    /// Loads from a file.
    fn load_from_file<P: AsRef<Path>>(path: P, format: SerializableFormat) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| VelesError::IoError {
            message: format!("Failed to open file: {e}"),
        })?;
        Self::load(file, format)
    }

    /// Saves to a file, inferring format from the file extension.
    ///
    /// - `.json` -> JSON format
    /// - All other extensions -> Binary format
    fn save_to_file_auto<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let format = infer_format_from_path(path.as_ref());
        self.save_to_file(path, format)
    }

    /// Loads from a file, inferring format from the file extension.
    ///
    /// - `.json` -> JSON format
    /// - All other extensions -> Binary format
    fn load_from_file_auto<P: AsRef<Path>>(path: P) -> Result<Self> {
        let format = infer_format_from_path(path.as_ref());
        Self::load_from_file(path, format)
    }
}

/// Blanket implementation for all types that implement Serialize + DeserializeOwned.
impl<T> Serializable for T where T: Serialize + DeserializeOwned + Sized {}

/// Infers serialization format from file extension.
fn infer_format_from_path(path: &Path) -> SerializableFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => SerializableFormat::Json,
        _ => SerializableFormat::Binary,
    }
}
