#![deny(warnings)]

use {anyhow::Result, curator_server::Options, std::sync::Arc, structopt::StructOpt};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let options = Arc::new(Options::from_args());

    let secret_key = curator_server::secret_key(options.secret_key.as_deref());

    curator_server::serve(&options, secret_key).await
}
