use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory holding the config, item tables, vector files and
    /// uploaded images
    #[clap(long, default_value = ".")]
    pub data_dir: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP daemon
    Daemon {},

    /// Search unclaimed found items
    Search {
        /// Free-text description of the lost item
        query: String,

        #[clap(long)]
        lat: Option<f64>,

        #[clap(long)]
        lng: Option<f64>,

        /// Search radius in miles around the given point
        #[clap(long)]
        radius: Option<f64>,
    },

    /// Claim a found item and print the finder's contact
    Claim {
        item_id: String,

        /// Your contact information
        #[clap(long)]
        contact: String,
    },

    /// List match notifications for a notification token
    Notifications { token: String },
}
