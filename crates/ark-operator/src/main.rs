use clap::Parser;
use tracing_subscriber::EnvFilter;

use ark_operator::cli::{OperatorCmd, OperatorOpt};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let opt = OperatorOpt::parse();
    match opt.command {
        OperatorCmd::Run(run) => ark_operator::start::run(run.into_config()).await,
        OperatorCmd::Crd => {
            print!("{}", ark_operator::crd::manifest());
            Ok(())
        }
    }
}
