//! chunkscope-io: transports, file system client and dataset readers.
//!
//! This crate talks to the file-sharing service (over HTTP with reqwest, or
//! in-process over a local directory with memory-mapped reads) and provides
//! the dataset slice primitive the remote clients build on.
//!

pub mod dataset;
mod error;
pub mod filesystem;
pub mod frame;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod local;
pub mod memory;
pub mod protocol;
pub mod transport;
pub mod zarr;

pub use dataset::{ArrayData, DatasetInfo, DatasetReader, Dtype, GroupInfo, ReadOptions};
pub use error::{Error, Result};
pub use filesystem::{DirectoryNode, FileEntry, FileSystemClient, ProbeInfo, ServiceReply};
pub use frame::{decode_reply, encode_reply, split_frame, ApiReply};
#[cfg(feature = "hdf5")]
pub use crate::hdf5::Hdf5DatasetReader;
pub use local::{LocalTransport, MappedFile, ServiceHandler};
pub use memory::MemoryDatasetReader;
pub use protocol::{ApiRequest, ApiResponse, DirEntry, FileInfo, PROTOCOL_VERSION};
pub use transport::{is_url, ApiTransport, HttpTransport, TransportConfig};
pub use zarr::ServiceDatasetReader;
