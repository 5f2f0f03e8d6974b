//! CLI command definitions.

use clap::Subcommand;
use nimbus_core::AssetType;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a compiled script or stylesheet bundle
    PublishText {
        /// Asset type (js or css)
        asset_type: AssetType,

        /// File holding the compiled bundle
        file: PathBuf,

        /// Fingerprint to publish under (defaults to the SHA-256 of the file)
        #[arg(short, long)]
        fingerprint: Option<String>,
    },

    /// Publish an image under a virtual path
    PublishImage {
        /// Image file on disk
        local_path: PathBuf,

        /// Virtual path the image is served under, e.g. /images/logo.png
        virtual_path: String,
    },

    /// Print the public URL of a file key
    Url {
        /// File key, e.g. js/compiled.abc123.js
        key: String,
    },

    /// Inspect the cache index
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },
}

#[derive(Subcommand)]
pub enum IndexCommands {
    /// List recorded entries
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the fingerprint recorded for a key
    Get {
        /// File key
        key: String,
    },
}
