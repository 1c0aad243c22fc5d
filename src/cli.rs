use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "portside",
    version,
    about = "A terminal cockpit for Kubernetes port-forwards."
)]
pub struct CliArgs {
    /// kubectl binary to drive (overrides the config file)
    #[arg(long)]
    pub kubectl_bin: Option<String>,

    /// Context to activate at startup instead of kubectl's current one
    #[arg(short, long)]
    pub context: Option<String>,

    /// Namespace to select at startup
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}
