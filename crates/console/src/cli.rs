use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ops-console", version, about = "Operations telemetry console")]
pub(crate) struct Args {
    #[arg(long, default_value = "config/ops-console.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:19320")]
    pub(crate) listen_addr: String,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
