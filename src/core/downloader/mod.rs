mod checksum;
mod client;
mod descriptor;
mod task;
#[cfg(test)]
pub(crate) mod test_helpers;
mod transport;

pub use checksum::{digest_bytes, digest_file, Checksum, HashAlgorithm};
pub use client::HttpTransport;
pub use descriptor::{DownloadDescriptor, DownloadDescriptorBuilder};
pub use task::{DownloadPolicy, DownloadTask};
pub use transport::{Transfer, TransferResponse, Transport, Validators};
