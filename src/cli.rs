use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Provision and maintain proxy clients on VPN panels", long_about = None)]
pub struct Args {
    #[arg(
        short,
        long,
        default_value = "panels.toml",
        help = "Panels config, accept file path or URL"
    )]
    pub config: String,

    #[arg(short, long, help = "Emit debug log")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the inbounds of a panel
    Inbounds {
        #[arg(short, long, help = "Panel id from the config")]
        panel: String,
    },

    /// Create a client and print its connection URIs
    Provision {
        #[arg(short, long, help = "Panel id from the config")]
        panel: String,

        #[arg(short, long, help = "Inbound id; prompts when omitted")]
        inbound: Option<String>,

        #[arg(long, help = "Traffic allowance in GB, 0 for unlimited")]
        quota_gb: f64,

        #[arg(long, help = "Validity in days, 0 for no expiry")]
        days: u32,
    },

    /// Add traffic and time to an existing client
    Renew {
        #[arg(short, long, help = "Panel id from the config")]
        panel: String,

        #[arg(short, long, default_value = "", help = "Inbound id holding the client")]
        inbound: String,

        #[arg(short, long, help = "Owner label of the client")]
        label: String,

        #[arg(long, help = "Traffic to add in GB")]
        quota_gb: f64,

        #[arg(long, help = "Days to add")]
        days: u32,
    },

    /// Reissue a client's key material
    Rotate {
        #[arg(short, long, help = "Panel id from the config")]
        panel: String,

        #[arg(short, long, default_value = "", help = "Inbound id holding the client")]
        inbound: String,

        #[arg(short, long, help = "Owner label of the client")]
        label: String,
    },

    /// Show allowance and usage of a client
    Status {
        #[arg(short, long, help = "Panel id from the config")]
        panel: String,

        #[arg(short, long, help = "Owner label of the client")]
        label: String,
    },

    /// List every client of a panel that supports it
    Clients {
        #[arg(short, long, help = "Panel id from the config")]
        panel: String,
    },

    /// Decode a subscription document, accept file path or URL
    Decode { source: String },
}
